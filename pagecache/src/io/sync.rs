/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! `sync_volume`/`sync_node` (spec.md §4.7): wait for every write
//! currently in flight against a volume to finish, without blocking new
//! writes from being issued after the call.

use std::sync::Arc;

use crate::cache::Cache;
use crate::collab::IoCompletion;
use crate::errors::Status;
use crate::node::Node;
use crate::volume::{Volume, VolumeInner};

/// Attach `completion` to the tail of the volume's current writers, or
/// fire it immediately if none are outstanding. Shared by the public
/// `sync_volume` operation and `Node::retire`'s quiescence wait, both of
/// which need exactly this "no earlier than the last pending write"
/// guarantee (spec.md §4.7).
pub(crate) fn sync_volume_inner<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    volume: &Arc<VolumeInner<E>>,
    completion: IoCompletion<E>,
) {
    let _ = volume;
    let merge = crate::merge::Merge::new(completion);
    cache.with_lists(|lists| {
        for page in lists.writing.iter() {
            let handle = merge.handle();
            page.enqueue_completion(Box::new(move |status| handle.fire(status)));
        }
    });
    merge.fire_initial(Status::Ok);
}

/// `sync_volume(Volume, completion)` (spec.md §4.7): completion fires no
/// earlier than the last write dispatched before this call returns.
pub fn sync_volume<E: Clone + Send + Sync + std::fmt::Debug + 'static>(volume: &Volume<E>, completion: IoCompletion<E>) {
    let Some(cache) = volume.0.pc.upgrade().map(Cache::from_inner) else {
        completion(Status::AllocFailed("cache"));
        return;
    };
    sync_volume_inner(&cache, &volume.0, completion);
}

/// `sync_node(Node, completion)` (spec.md §4.7, §9): the original source
/// ties this to writeback of `Dirty` pages, which this core's transition
/// table never produces (see pagelist.rs) — so per-node sync degrades to
/// the same volume-wide wait as [`sync_volume`].
pub fn sync_node<E: Clone + Send + Sync + std::fmt::Debug + 'static>(node: &Node<E>, completion: IoCompletion<E>) {
    let Some(volume) = node.volume() else {
        completion(Status::AllocFailed("volume"));
        return;
    };
    let Some(cache) = volume.pc.upgrade().map(Cache::from_inner) else {
        completion(Status::AllocFailed("cache"));
        return;
    };
    sync_volume_inner(&cache, &volume, completion);
}
