/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! `write(node, source, range, completion)`: RMW pre-fetch, then the
//! two-phase `finish` continuation. Grounded on `pagecache_write_sg` /
//! `pagecache_write_sg_finish` of `original_source/pagecache.c`.

use crate::cache::Cache;
use crate::collab::IoCompletion;
use crate::errors::Status;
use crate::io::read::{lookup_or_allocate, touch_or_fill};
use crate::merge::Merge;
use crate::node::Node;
use crate::page_state::PageState;
use crate::range::ByteRange;
use crate::sg::{SgBuf, SgList};

/// `write(node, source, range, completion)` (spec.md §4.4). `source` is
/// the caller's own buffer, sized to exactly `range.span()` bytes — the
/// scatter/gather lists this crate builds (`write_sg` below) are an
/// internal detail of dispatching to `fs_write`, not something a caller
/// constructs (the real sg buffer library is an out-of-scope external
/// collaborator per `sg.rs`).
pub(crate) fn write<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    source: Vec<u8>,
    range: ByteRange,
    completion: IoCompletion<E>,
) {
    assert_eq!(source.len() as u64, range.span(), "write source length must match range");
    let Some(volume) = node.volume() else {
        completion(Status::AllocFailed("volume"));
        return;
    };
    if let Some(err) = volume.write_error() {
        completion(err);
        return;
    }
    if range.is_empty() {
        completion(Status::Ok);
        return;
    }
    if range.end > node.length() {
        node.set_length(range.end);
    }

    let page_size = cache.page_size() as u64;
    let page_order = cache.get_page_order();
    let start_offset = range.start & (page_size - 1);
    let end_offset = range.end & (page_size - 1);
    let page_index_range = range.rshift(page_order);
    let start_index = page_index_range.start;

    let cache_for_finish = cache.clone();
    let node_for_finish = node.clone();
    let merge = Merge::new(Box::new(move |_status: Status<E>| {
        finish_phase1(&cache_for_finish, &node_for_finish, range, source, completion);
    }));

    // Whole-page scan bound: pages strictly before this index were already
    // handled by the head RMW touch below; the source advances `r.start`
    // past the head page the same way.
    let mut whole_start = start_index;
    let whole_end = page_index_range.end;

    {
        let mut tree = node.pages_lock();
        if start_offset != 0 {
            let head = lookup_or_allocate(cache, node, &mut tree, start_index);
            touch_or_fill(cache, node, &head, &merge);
            whole_start = start_index + 1;
        }
        let tail_index = whole_end;
        let double_fill = start_offset != 0 && tail_index == start_index;
        if end_offset != 0 && range.end < node.length() && !double_fill {
            let tail = lookup_or_allocate(cache, node, &mut tree, tail_index);
            touch_or_fill(cache, node, &tail, &merge);
        }

        if whole_start < whole_end {
            for page in tree.range(whole_start..whole_end).map(|(_, p)| p) {
                cache.with_lists(|_lists| {
                    if page.state() == PageState::Reading {
                        let handle = merge.handle();
                        page.enqueue_completion(Box::new(move |status| handle.fire(status)));
                    }
                });
            }
        }
    }

    merge.fire_initial(Status::Ok);
}

/// `pagecache_write_sg_finish` with `complete == false`: copy the
/// caller's bytes into each covered page, build the block-aligned
/// outbound scatter/gather list, transition every page to `WRITING`, and
/// dispatch `fs_write`. The user-visible `completion` fires immediately
/// after dispatch — storage errors surface later via the sticky latch.
fn finish_phase1<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    range: ByteRange,
    source: Vec<u8>,
    completion: IoCompletion<E>,
) {
    let Some(volume) = node.volume() else {
        completion(Status::AllocFailed("volume"));
        return;
    };
    let page_size = cache.page_size() as u64;
    let page_order = cache.get_page_order();
    let block_size = 1u64 << volume.block_order();
    let node_length = node.length();
    let mut pos = 0usize;

    let pi_start = range.start >> page_order;
    let pi_end = range.end.div_ceil(page_size);

    let mut write_sg = SgList::new();

    {
        let mut tree = node.pages_lock();
        let mut offset = range.start & (page_size - 1);
        let mut block_offset = range.start & (block_size - 1);

        for pi in pi_start..pi_end {
            let page_start = pi * page_size;
            let page_range = ByteRange::new(page_start, page_start + page_size);
            let seg_end = range.intersection(&page_range).end;

            let (page, newly_allocated) = match tree.get(&pi) {
                Some(p) => (p.clone(), false),
                None => {
                    debug_assert_eq!(offset, 0, "should never allocate for an unaligned head");
                    debug_assert_eq!(block_offset, 0, "should never allocate for an unaligned head");
                    (cache.allocate_page(&mut tree, node.downgrade(), pi), true)
                }
            };

            if newly_allocated {
                let tail_offset = seg_end & (block_size - 1);
                if tail_offset != 0 && seg_end == node_length {
                    let zero_from = (seg_end & (page_size - 1)) as usize;
                    let zero_len = (block_size - tail_offset) as usize;
                    page.with_bytes_mut(|buf| buf[zero_from..zero_from + zero_len].fill(0));
                }
            }

            let copy_len = (seg_end - page_start - offset) as usize;
            let req_len = {
                let padded = copy_len as u64 + block_offset;
                padded.div_ceil(block_size) * block_size
            };
            write_sg.push(SgBuf::new(page.clone(), (offset - block_offset) as usize, req_len as usize));

            page.with_bytes_mut(|buf| {
                buf[offset as usize..offset as usize + copy_len].copy_from_slice(&source[pos..pos + copy_len]);
            });
            pos += copy_len;

            cache.with_lists(|lists| lists.transition(&page, PageState::Writing));

            offset = 0;
            block_offset = 0;
        }
    }

    let out_range = ByteRange::new(range.start & !(block_size - 1), range.end);
    log::trace!("dispatching fs_write for {out_range:?}");

    let cache2 = cache.clone();
    let node2 = node.clone();
    match node.fs_write() {
        Some(fs_write) => {
            fs_write(
                write_sg,
                out_range,
                Box::new(move |status| finish_phase2(&cache2, &node2, range, status)),
            );
            completion(Status::Ok);
        }
        None => {
            completion(Status::AllocFailed("fs_write"));
        }
    }
}

/// `pagecache_write_sg_finish` with `complete == true`: the device
/// completion. Latches a failure into the volume's sticky error, then
/// walks the affected pages decrementing `write_count` and transitioning
/// `WRITING -> NEW` on the 0-edge.
fn finish_phase2<E: Clone + Send + Sync + std::fmt::Debug + 'static>(
    cache: &Cache<E>,
    node: &Node<E>,
    range: ByteRange,
    status: Status<E>,
) {
    let Some(volume) = node.volume() else { return };
    if !status.is_ok() {
        volume.latch_write_error(status.clone());
    }

    let page_order = cache.get_page_order();
    let page_size = cache.page_size() as u64;
    let pi_start = range.start >> page_order;
    let pi_end = range.end.div_ceil(page_size);

    let tree = node.pages_lock();
    for pi in pi_start..pi_end {
        let Some(page) = tree.get(&pi) else {
            log::error!("finish_phase2: page {pi} missing for a write in flight");
            continue;
        };
        let completions = cache.with_lists(|lists| {
            if page.write_count_dec() == 0 {
                lists.transition(page, PageState::New);
                Some(page.take_completions())
            } else {
                None
            }
        });
        if let Some(completions) = completions {
            cache.fire_completions(completions, status.clone());
        }
    }
}
