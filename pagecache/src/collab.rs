/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! External collaborators: the filesystem's block-I/O hooks and the
//! run-queue used to defer completion dispatch. Both are out of scope
//! per spec.md §1 — this module only names the shape the cache calls
//! through, it implements none of it.

use std::sync::Arc;

use crate::errors::Status;
use crate::range::ByteRange;
use crate::sg::SgList;

/// Fired exactly once with the outcome of an I/O request.
pub type IoCompletion<E> = Box<dyn FnOnce(Status<E>) + Send>;

/// `fs_read(sg_sink, byte_range, completion)`: byte range is page-aligned
/// and page-sized per request (spec.md §6).
pub type FsRead<E> = Arc<dyn Fn(SgList<E>, ByteRange, IoCompletion<E>) + Send + Sync>;

/// `fs_write(sg_source, byte_range, completion)`: byte range is
/// block-aligned and spans one or more contiguous pages (spec.md §6).
pub type FsWrite<E> = Arc<dyn Fn(SgList<E>, ByteRange, IoCompletion<E>) + Send + Sync>;

/// Stand-in for the kernel run queue deferred completion dispatch posts
/// to (spec.md §4.6, "Deferred" mode). Inline mode never uses this.
pub trait RunQueue: Send + Sync {
    fn enqueue(&self, job: Box<dyn FnOnce() + Send>);
}

/// A `RunQueue` that runs jobs synchronously on the calling thread. Useful
/// in tests exercising deferred mode without standing up a real executor.
pub struct ImmediateRunQueue;

impl RunQueue for ImmediateRunQueue {
    fn enqueue(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}
