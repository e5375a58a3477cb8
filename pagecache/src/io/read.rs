/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! `read(node, sg_sink, range, completion)` and `touch_or_fill`, grounded
//! on `pagecache_read_sg` / `touch_or_fill_page_nodelocked` of
//! `original_source/pagecache.c`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::Cache;
use crate::collab::IoCompletion;
use crate::errors::Status;
use crate::merge::Merge;
use crate::node::Node;
use crate::page::Page;
use crate::page_state::PageState;
use crate::range::ByteRange;
use crate::sg::{SgBuf, SgList};

/// Look a page up in an already-locked tree, allocating it in `ALLOC`
/// state on a miss. Shared by the read path and the write path's RMW
/// pre-fetch (`touch_page_by_num_nodelocked` in the source calls the same
/// lookup-or-allocate before touching).
pub(crate) fn lookup_or_allocate<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    tree: &mut BTreeMap<u64, Arc<Page<E>>>,
    index: u64,
) -> Arc<Page<E>> {
    match tree.get(&index) {
        Some(p) => p.clone(),
        None => cache.allocate_page(tree, node.downgrade(), index),
    }
}

/// `read(node, sg_sink, range, completion)` (spec.md §4.2).
///
/// Returns the populated `sg` synchronously: walking the node's tree and
/// appending a descriptor per covered page never blocks on I/O (only the
/// fill dispatched for a cold page does), so the caller gets descriptors
/// into the cache's pages back immediately. `completion` fires once every
/// page covered is actually readable — only then are the returned
/// descriptors safe to copy out of.
pub(crate) fn read<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    mut sg: SgList<E>,
    range: ByteRange,
    completion: IoCompletion<E>,
) -> SgList<E> {
    let range = range.clamp_end(node.length());
    if range.is_empty() {
        completion(Status::Ok);
        return sg;
    }

    let page_size = cache.page_size() as u64;
    let page_order = cache.get_page_order();
    let start_index = range.start >> page_order;
    let end_index = range.end.div_ceil(page_size);

    let merge = Merge::new(completion);

    {
        let mut tree = node.pages_lock();
        for index in start_index..end_index {
            let page = lookup_or_allocate(cache, node, &mut tree, index);

            let page_start = index * page_size;
            let page_range = ByteRange::new(page_start, page_start + page_size);
            let seg = range.intersection(&page_range);
            let offset = (seg.start - page_start) as usize;
            sg.push(SgBuf::new(page.clone(), offset, seg.span() as usize));

            touch_or_fill(cache, node, &page, &merge);
        }
    }

    merge.fire_initial(Status::Ok);
    sg
}

/// `touch_or_fill` (spec.md §4.3), under `state_lock`. Only the
/// `READING`/`ALLOC` branches reserve a merge handle — a cache hit
/// resolves synchronously and never touches `merge` at all, matching
/// `touch_or_fill_page_nodelocked`'s use of `apply_merge` only on those
/// two branches.
pub(crate) fn touch_or_fill<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    page: &Arc<Page<E>>,
    merge: &Merge<E>,
) {
    let mut dispatch = false;
    cache.with_lists(|lists| match page.state() {
        PageState::Reading => {
            let handle = merge.handle();
            page.enqueue_completion(Box::new(move |status| handle.fire(status)));
        }
        PageState::Alloc => {
            let handle = merge.handle();
            page.enqueue_completion(Box::new(move |status| handle.fire(status)));
            lists.transition(page, PageState::Reading);
            dispatch = true;
        }
        PageState::Active => lists.touch_active(page),
        PageState::New => lists.transition(page, PageState::Active),
        PageState::Writing | PageState::Dirty => {}
        other => panic!("touch_or_fill: page {} in unexpected state {other:?}", page.index()),
    });

    if dispatch {
        dispatch_fill(cache, node, page);
    }
}

fn dispatch_fill<E: Clone + Send + Sync + std::fmt::Debug + 'static>(cache: &Cache<E>, node: &Node<E>, page: &Arc<Page<E>>) {
    let page_size = cache.page_size();
    let mut sg = SgList::new();
    sg.push(SgBuf::new(page.clone(), 0, page_size));
    let start = page.index() * page_size as u64;
    let range = ByteRange::new(start, start + page_size as u64);

    let cache = cache.clone();
    let page = page.clone();
    log::trace!("dispatching fs_read for page {}", page.index());
    (node.fs_read())(
        sg,
        range,
        Box::new(move |status| on_read_complete(&cache, &page, status)),
    );
}

/// `pagecache_read_page_complete` (spec.md §4.3 final paragraph).
fn on_read_complete<E: Clone + Send + Sync + std::fmt::Debug + 'static>(cache: &Cache<E>, page: &Arc<Page<E>>, status: Status<E>) {
    if !status.is_ok() {
        log::warn!("fs_read failed for page {}: {status:?}", page.index());
    }
    let completions = cache.with_lists(|lists| {
        lists.transition(page, PageState::New);
        page.take_completions()
    });
    cache.fire_completions(completions, status);
}
