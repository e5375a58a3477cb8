/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! A cached address space: one file or file-like object, its page tree,
//! and its block-I/O collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use spin::{Mutex, MutexGuard};

use crate::cache::Cache;
use crate::collab::{FsRead, FsWrite, IoCompletion};
use crate::errors::Status;
use crate::page::Page;
use crate::range::ByteRange;
use crate::sg::SgList;
use crate::volume::VolumeInner;

pub struct NodeInner<E> {
    /// `pages_lock` of spec.md §3/§5: guards the tree and `length`.
    /// Acquired before the cache's `state_lock`, never held across a
    /// collaborator callback.
    pages: Mutex<BTreeMap<u64, Arc<Page<E>>>>,
    length: AtomicU64,
    fs_read: FsRead<E>,
    fs_write: Option<FsWrite<E>>,
    volume: Weak<VolumeInner<E>>,
    retired: AtomicBool,
}

impl<E> NodeInner<E> {
    /// The node's `pages_lock` (spec.md §3/§5). Exposed on the inner type
    /// too since eviction reaches a node only via `Page::node()`'s
    /// `Arc<NodeInner<E>>`, never through a `Node<E>` handle.
    pub(crate) fn pages_lock(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<Page<E>>>> {
        self.pages.lock()
    }
}

/// One file or file-like object: a page tree keyed by index, a logical
/// length, and its filesystem-supplied `fs_read`/`fs_write` collaborators.
#[derive(Clone)]
pub struct Node<E>(pub(crate) Arc<NodeInner<E>>);

impl<E: Clone + Send + Sync + std::fmt::Debug + 'static> Node<E> {
    pub(crate) fn new(volume: Weak<VolumeInner<E>>, fs_read: FsRead<E>, fs_write: Option<FsWrite<E>>) -> Self {
        Node(Arc::new(NodeInner {
            pages: Mutex::new(BTreeMap::new()),
            length: AtomicU64::new(0),
            fs_read,
            fs_write,
            volume,
            retired: AtomicBool::new(false),
        }))
    }

    pub(crate) fn inner(&self) -> &Arc<NodeInner<E>> {
        &self.0
    }

    pub fn length(&self) -> u64 {
        self.0.length.load(Ordering::Acquire)
    }

    /// `set_node_length(Node, length)` (spec.md §6).
    pub fn set_length(&self, length: u64) {
        self.0.length.store(length, Ordering::Release);
    }

    pub(crate) fn fs_read(&self) -> &FsRead<E> {
        &self.0.fs_read
    }

    pub(crate) fn fs_write(&self) -> Option<&FsWrite<E>> {
        self.0.fs_write.as_ref()
    }

    pub(crate) fn pages_lock(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<Page<E>>>> {
        self.0.pages_lock()
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner<E>> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn volume(&self) -> Option<Arc<VolumeInner<E>>> {
        self.0.volume.upgrade()
    }

    fn cache(&self) -> Option<Cache<E>> {
        self.volume()?.pc.upgrade().map(Cache::from_inner)
    }

    /// `node_reader(Node) → (sg, range, completion) → sg` (spec.md §6).
    /// Returns the sg list populated with descriptors into the cache's
    /// pages; safe to copy out of only after `completion` fires `Ok`.
    pub fn reader(&self, sg: SgList<E>, range: ByteRange, completion: IoCompletion<E>) -> SgList<E> {
        let Some(cache) = self.cache() else {
            completion(Status::AllocFailed("cache"));
            return sg;
        };
        crate::io::read::read(&cache, self, sg, range, completion)
    }

    /// `node_writer(Node) → (source, range, completion) → void`; absent
    /// in read-only builds (spec.md §6) — here, panics if this node was
    /// constructed with no `fs_write`. `source` must be exactly
    /// `range.span()` bytes long.
    pub fn writer(&self, source: Vec<u8>, range: ByteRange, completion: IoCompletion<E>) {
        assert!(!self.0.retired.load(Ordering::Acquire), "write submitted to a retired node");
        assert!(self.0.fs_write.is_some(), "writer() called on a read-only node");
        let Some(cache) = self.cache() else {
            completion(Status::AllocFailed("cache"));
            return;
        };
        crate::io::write::write(&cache, self, source, range, completion);
    }

    /// **(added, resolves Open Question (a))**: stop accepting new writes,
    /// drain in-flight writes via `sync_volume`-style attachment, evict
    /// every page this node owns, then let the last `Arc` drop it.
    pub fn retire(&self, completion: IoCompletion<E>) {
        self.0.retired.store(true, Ordering::Release);
        let (Some(volume), Some(cache)) = (self.volume(), self.cache()) else {
            completion(Status::AllocFailed("cache"));
            return;
        };
        let node = self.clone();
        crate::io::sync::sync_volume_inner(&cache, &volume, Box::new(move |status| {
            if status.is_ok() {
                cache.drain_node(&node);
            }
            completion(status);
        }));
    }
}
