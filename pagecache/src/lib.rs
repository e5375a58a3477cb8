/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! A kernel-style page cache mediating between a filesystem's logical
//! address space and a block device.
//!
//! The cache holds one process-wide [`Cache`] handle, any number of
//! [`Volume`]s (one per backing block device), and any number of
//! [`Node`]s per volume (one per file-like address space). Callers drive
//! I/O through [`Node::reader`]/[`Node::writer`]; the cache fills pages
//! on demand, serves repeat reads from whatever is already cached, and
//! coalesces overlapping writes into a single read-modify-write request
//! against the device.
//!
//! Reclamation ([`Cache::drain`]) and completion fan-out
//! ([`CacheConfig::fanout`]) are explicit operations a caller drives or
//! configures; this crate runs no background threads of its own.

mod cache;
mod collab;
mod errors;
mod io;
mod merge;
mod node;
mod page;
mod page_state;
mod pagelist;
mod range;
mod sg;
mod volume;

pub use cache::{Cache, CacheConfig, FanoutMode};
pub use collab::{FsRead, FsWrite, ImmediateRunQueue, IoCompletion, RunQueue};
pub use errors::Status;
pub use io::sync::{sync_node, sync_volume};
pub use node::Node;
pub use page::Page;
pub use page_state::PageState;
pub use range::ByteRange;
pub use sg::{SgBuf, SgList};
pub use volume::Volume;
