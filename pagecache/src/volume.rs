/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! One backing device's worth of nodes, a block size, and the sticky
//! write-error latch spec.md §3 assigns to `Volume`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::cache::CacheInner;
use crate::collab::{FsRead, FsWrite};
use crate::errors::Status;
use crate::node::{Node, NodeInner};

pub struct VolumeInner<E> {
    pub(crate) pc: Weak<CacheInner<E>>,
    block_order: AtomicU32,
    length: AtomicU64,
    write_error: Mutex<Option<Status<E>>>,
    nodes: Mutex<Vec<Weak<NodeInner<E>>>>,
}

/// One backing device. `block_order` must not exceed the owning cache's
/// `page_order` (spec.md §6).
#[derive(Clone)]
pub struct Volume<E>(pub(crate) Arc<VolumeInner<E>>);

impl<E: Clone + Send + Sync + std::fmt::Debug + 'static> Volume<E> {
    pub(crate) fn new(pc: Weak<CacheInner<E>>, length: u64, block_order: u32, page_order: u32) -> Self {
        assert!(block_order <= page_order, "block_order must not exceed the cache's page_order");
        Volume(Arc::new(VolumeInner {
            pc,
            block_order: AtomicU32::new(block_order),
            length: AtomicU64::new(length),
            write_error: Mutex::new(None),
            nodes: Mutex::new(Vec::new()),
        }))
    }

    pub fn length(&self) -> u64 {
        self.0.length.load(Ordering::Acquire)
    }

    pub fn block_order(&self) -> u32 {
        self.0.block_order.load(Ordering::Acquire)
    }

    pub fn block_size(&self) -> u64 {
        1u64 << self.block_order()
    }

    /// `allocate_node(Volume, fs_read, fs_write)` (spec.md §6). `fs_write`
    /// is `None` for a read-only node.
    pub fn allocate_node(&self, fs_read: FsRead<E>, fs_write: Option<FsWrite<E>>) -> Node<E> {
        let node = Node::new(Arc::downgrade(&self.0), fs_read, fs_write);
        self.0.nodes.lock().unwrap().push(Arc::downgrade(node.inner()));
        node
    }

    /// **(added, resolves Open Question (b))** Explicitly clear the sticky
    /// write-error latch. Never invoked automatically; the source never
    /// clears it at all, so this is purely an addition for callers that
    /// have confirmed the underlying fault is resolved.
    pub fn clear_write_error(&self) {
        *self.0.write_error.lock().unwrap() = None;
    }
}

impl<E> VolumeInner<E> {
    pub(crate) fn block_order(&self) -> u32 {
        self.block_order.load(Ordering::Acquire)
    }
}

impl<E: Clone> VolumeInner<E> {
    /// Current sticky write-error status, if any.
    pub(crate) fn write_error(&self) -> Option<Status<E>> {
        self.write_error.lock().unwrap().clone()
    }

    /// Latch `status` as the volume's write error, unless one is already
    /// latched (first error wins — spec.md §4.4, §7).
    pub(crate) fn latch_write_error(&self, status: Status<E>)
    where
        E: std::fmt::Debug,
    {
        let mut guard = self.write_error.lock().unwrap();
        if guard.is_none() {
            log::error!("volume write error latched: {status:?}");
            *guard = Some(status);
        }
    }
}
