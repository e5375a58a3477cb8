/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! The process-wide cache: the global pagelists, the zero page, and
//! completion fan-out dispatch (inline or deferred).
//!
//! Grounded on `vm/page_queues.rs`'s `PageQueues` for the list-owning
//! shape, and on `original_source/pagecache.c`'s `struct pagecache`
//! (`state_lock`, `new`/`active`/`writing`/`free` lists, `total_pages`,
//! `zero_page`, `completion_vecs`, `service_enqueued`) for the fields and
//! the `evict_pages_locked` / `balance_page_lists_locked` algorithms.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::collab::RunQueue;
use crate::errors::Status;
use crate::merge::Completion;
use crate::node::{Node, NodeInner};
use crate::page::{self, Page};
use crate::page_state::PageState;
use crate::pagelist::PageLists;
use crate::volume::Volume;

/// When a page's completion list drains, do the continuations run inline
/// on the completing thread, or get posted to a run queue (spec.md §4.6)?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FanoutMode {
    Inline,
    Deferred,
}

/// Tuning knobs that replace the source's compile-time constants
/// (`MAX_PAGE_COMPLETION_VECS`, the fixed page size) with constructor
/// arguments, per SPEC_FULL.md §6.
pub struct CacheConfig {
    pub page_size_bytes: usize,
    pub fanout: FanoutMode,
    pub completion_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { page_size_bytes: 4096, fanout: FanoutMode::Inline, completion_queue_capacity: 16384 }
    }
}

type CompletionBatch<E> = (Vec<Completion<E>>, Status<E>);

pub struct CacheInner<E> {
    lists: Mutex<PageLists<E>>,
    total_pages: AtomicU64,
    page_order: u32,
    zero_page: Arc<Page<E>>,
    fanout: FanoutMode,
    completion_vecs: ArrayQueue<CompletionBatch<E>>,
    service_enqueued: AtomicBool,
    run_queue: Option<Arc<dyn RunQueue>>,
}

/// The process-wide cache singleton, passed explicitly as a handle
/// (spec.md §9: "Global mutable state ... should be passed explicitly").
#[derive(Clone)]
pub struct Cache<E>(Arc<CacheInner<E>>);

impl<E: Clone + Send + Sync + std::fmt::Debug + 'static> Cache<E> {
    /// `allocate_cache(general_allocator, contiguous_allocator, page_size_bytes)`
    /// (spec.md §6), simplified per SPEC_FULL.md §2's construction-surface
    /// note: the two external allocators are the global allocator here.
    /// `run_queue` is required (and only used) when `config.fanout` is
    /// `Deferred`.
    pub fn new(config: CacheConfig, run_queue: Option<Arc<dyn RunQueue>>) -> Self {
        assert!(config.page_size_bytes.is_power_of_two(), "page_size_bytes must be a power of two");
        if config.fanout == FanoutMode::Deferred {
            assert!(run_queue.is_some(), "deferred fan-out requires a run queue collaborator");
        }
        let page_order = config.page_size_bytes.trailing_zeros();
        let zero_page = Arc::new(Page::new(u64::MAX, config.page_size_bytes, Weak::new()));
        Cache(Arc::new(CacheInner {
            lists: Mutex::new(PageLists::new_lists()),
            total_pages: AtomicU64::new(0),
            page_order,
            zero_page,
            fanout: config.fanout,
            completion_vecs: ArrayQueue::new(config.completion_queue_capacity),
            service_enqueued: AtomicBool::new(false),
            run_queue,
        }))
    }

    pub(crate) fn from_inner(inner: Arc<CacheInner<E>>) -> Self {
        Cache(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<CacheInner<E>> {
        Arc::downgrade(&self.0)
    }

    #[inline]
    pub fn get_page_order(&self) -> u32 {
        self.0.page_order
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        1usize << self.0.page_order
    }

    pub fn get_zero_page(&self) -> Arc<Page<E>> {
        self.0.zero_page.clone()
    }

    pub fn total_pages(&self) -> u64 {
        self.0.total_pages.load(Ordering::Acquire)
    }

    /// `allocate_volume(Cache, length, block_order)` (spec.md §6).
    pub fn allocate_volume(&self, length: u64, block_order: u32) -> Volume<E> {
        Volume::new(self.downgrade(), length, block_order, self.0.page_order)
    }

    /// `allocate_page(node, index)` (spec.md §4.5). The caller must
    /// already hold `tree`'s lock (the node's `pages_lock`) — this never
    /// locks it itself, since callers (the read/write paths) are already
    /// walking the tree under that lock when a miss is discovered.
    pub(crate) fn allocate_page(
        &self,
        tree: &mut BTreeMap<u64, Arc<Page<E>>>,
        node: Weak<NodeInner<E>>,
        index: u64,
    ) -> Arc<Page<E>> {
        let page = Arc::new(Page::new(index, self.page_size(), node));
        tree.insert(index, page.clone());
        self.0.total_pages.fetch_add(1, Ordering::AcqRel);
        page
    }

    /// Apply the state-transition table to `page`, under `state_lock`.
    pub(crate) fn transition(&self, page: &Arc<Page<E>>, to: PageState) {
        self.0.lists.lock().transition(page, to);
    }

    /// Run the body `f` with the pagelists locked (`state_lock`). Kept as
    /// a single choke point so no other code in this crate can forget to
    /// release the lock before firing completions or calling into an
    /// I/O collaborator.
    pub(crate) fn with_lists<R>(&self, f: impl FnOnce(&mut PageLists<E>) -> R) -> R {
        f(&mut self.0.lists.lock())
    }

    /// Dispatch a page's drained completions per the selected
    /// [`FanoutMode`] (spec.md §4.6). Must be called with `state_lock`
    /// already released.
    pub(crate) fn fire_completions(&self, completions: Vec<Completion<E>>, status: Status<E>) {
        if completions.is_empty() {
            return;
        }
        match self.0.fanout {
            FanoutMode::Inline => page::fire_all(completions, &status),
            FanoutMode::Deferred => {
                self.0
                    .completion_vecs
                    .push((completions, status))
                    .unwrap_or_else(|_| panic!("completion_vecs exhausted: size it for worst-case concurrent I/O"));
                if !self.0.service_enqueued.swap(true, Ordering::AcqRel) {
                    let cache = self.clone();
                    self.0
                        .run_queue
                        .as_ref()
                        .expect("deferred fan-out requires a run queue")
                        .enqueue(Box::new(move || cache.service_completions()));
                }
            }
        }
    }

    fn service_completions(&self) {
        self.0.service_enqueued.store(false, Ordering::Release);
        while let Some((completions, status)) = self.0.completion_vecs.pop() {
            page::fire_all(completions, &status);
        }
    }

    /// `drain(Cache, bytes) → bytes_actually_evicted` (spec.md §4.5, §9
    /// Open Question (c)). Phase one transitions victims to `Evicted`
    /// under `state_lock` alone; phase two, lock released, removes each
    /// victim from its own node's tree under that node's `pages_lock`
    /// alone — see SPEC_FULL.md §9 for why this never nests the locks in
    /// the forbidden order.
    pub fn drain(&self, bytes: u64) -> u64 {
        let page_size = self.page_size() as u64;
        let target = bytes.div_ceil(page_size);
        let victims = self.with_lists(|lists| {
            let mut victims = Vec::new();
            let mut remaining = target;
            while remaining > 0 {
                let candidate = lists.new.front().cloned().or_else(|| lists.active.front().cloned());
                match candidate {
                    Some(p) => {
                        lists.transition(&p, PageState::Evicted);
                        victims.push(p);
                        remaining -= 1;
                    }
                    None => break,
                }
            }
            Self::balance_new_and_active(lists);
            victims
        });
        self.reclaim_evicted(victims) * page_size
    }

    /// **(added, resolves Open Question (a))**: evict every page
    /// belonging to `node`, used by `Node::retire` once in-flight writes
    /// have drained. Pages still `Reading`/`Writing`/`Alloc` at the time
    /// of the call are left alone and logged, since retiring a node with
    /// in-flight fills is a caller error this crate does not attempt to
    /// paper over.
    pub fn drain_node(&self, node: &Node<E>) -> u64 {
        let page_size = self.page_size() as u64;
        let candidates: Vec<Arc<Page<E>>> = node.pages_lock().values().cloned().collect();
        let victims = self.with_lists(|lists| {
            let mut victims = Vec::new();
            for p in &candidates {
                match p.state() {
                    PageState::New | PageState::Active => {
                        lists.transition(p, PageState::Evicted);
                        victims.push(p.clone());
                    }
                    PageState::Evicted => {}
                    other => log::warn!("drain_node: page {} left in state {other:?}, not evicting", p.index()),
                }
            }
            Self::balance_new_and_active(lists);
            victims
        });
        self.reclaim_evicted(victims) * page_size
    }

    /// Phase two of eviction: remove each now-`Evicted` page from its own
    /// node's tree and release the cache's reference, returning the page
    /// count reclaimed.
    fn reclaim_evicted(&self, victims: Vec<Arc<Page<E>>>) -> u64 {
        let mut reclaimed = 0u64;
        for victim in victims {
            if let Some(node) = victim.node() {
                node.pages_lock().remove(&victim.index());
            }
            self.0.total_pages.fetch_sub(1, Ordering::AcqRel);
            victim.release();
            reclaimed += 1;
        }
        reclaimed
    }

    /// `balance_new_and_active` (spec.md §4.5). Only demotes pages held
    /// exclusively by the cache (`refcount == 1`) — the only mechanism
    /// that moves pages from `active` back to `new`.
    fn balance_new_and_active(lists: &mut PageLists<E>) {
        let dp = (lists.len_active() as i64 - lists.len_new() as i64) / 2;
        let mut remaining = dp;
        let mut i = 0;
        while remaining > 0 && i < lists.active.len() {
            let candidate = lists.active[i].clone();
            if candidate.refcount() == 1 {
                lists.transition(&candidate, PageState::New);
                remaining -= 1;
            } else {
                i += 1;
            }
        }
    }
}
