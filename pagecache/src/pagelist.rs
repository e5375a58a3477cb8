/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! The cache's four pagelists and the page-state transition table
//! (spec.md §4.1). `transition` is the sole means of moving a page
//! between lists; any pair not in the table is a programming error.
//!
//! Grounded on `vm/page_queues.rs`'s `PageQueues` (named queues a page
//! moves between on access/reclaim) translated from its fixed-size array
//! of intrusive lists to one `VecDeque<Arc<Page>>` per list, since the
//! cache has no arena to index into and `Arc::ptr_eq` scan-and-remove is
//! the safe-Rust substitute for unlinking from `klib::list::List`.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::page::Page;
use crate::page_state::PageState;

/// The cache's pagelists. `free` and `dirty` are carried in the data
/// model (spec.md §3) but the transition table never populates them in
/// this core — the source itself has the FREE path disabled
/// (`#if 0` around `pagecache_page_free`'s free-list return) and DIRTY is
/// reserved for a write-back policy this core does not implement.
#[derive(Default)]
pub(crate) struct PageLists<E> {
    pub new: VecDeque<Arc<Page<E>>>,
    pub active: VecDeque<Arc<Page<E>>>,
    pub writing: VecDeque<Arc<Page<E>>>,
    pub free: VecDeque<Arc<Page<E>>>,
}

impl<E> PageLists<E> {
    pub fn new_lists() -> Self {
        Self { new: VecDeque::new(), active: VecDeque::new(), writing: VecDeque::new(), free: VecDeque::new() }
    }

    fn unlink(list: &mut VecDeque<Arc<Page<E>>>, page: &Arc<Page<E>>) {
        let pos = list
            .iter()
            .position(|p| Arc::ptr_eq(p, page))
            .expect("page missing from the pagelist its state says it belongs to");
        list.remove(pos);
    }

    /// Apply the transition table of spec.md §4.1, updating both the
    /// pagelists and the page's packed state word. `page.state()` is read
    /// to determine the "from" side; callers must hold the cache's
    /// `state_lock` across this call (spec.md §5).
    pub fn transition(&mut self, page: &Arc<Page<E>>, to: PageState) {
        let from = page.state();
        use PageState::*;
        match (from, to) {
            (Alloc, Reading) => {}
            (Reading, New) => self.new.push_back(page.clone()),
            (New, Active) => {
                Self::unlink(&mut self.new, page);
                self.active.push_back(page.clone());
            }
            (Active, New) => {
                Self::unlink(&mut self.active, page);
                self.new.push_back(page.clone());
            }
            (New, Writing) => {
                Self::unlink(&mut self.new, page);
                self.writing.push_back(page.clone());
                page.write_count_inc();
            }
            (Active, Writing) => {
                Self::unlink(&mut self.active, page);
                self.writing.push_back(page.clone());
                page.write_count_inc();
            }
            (Writing, Writing) => {
                Self::unlink(&mut self.writing, page);
                self.writing.push_back(page.clone());
                page.write_count_inc();
            }
            (Alloc, Writing) => {
                self.writing.push_back(page.clone());
                page.write_count_inc();
            }
            (Writing, New) => {
                debug_assert_eq!(page.write_count(), 0, "WRITING -> NEW only on write_count reaching zero");
                Self::unlink(&mut self.writing, page);
                self.new.push_back(page.clone());
            }
            (New, Evicted) => Self::unlink(&mut self.new, page),
            (Active, Evicted) => Self::unlink(&mut self.active, page),
            _ => panic!("invalid page state transition {from:?} -> {to:?}"),
        }
        page.set_state(to);
    }

    /// Move a page already in `active` to its tail without a state
    /// change (the LRU "touch" of spec.md §4.3's ACTIVE case).
    pub fn touch_active(&mut self, page: &Arc<Page<E>>) {
        debug_assert_eq!(page.state(), PageState::Active);
        Self::unlink(&mut self.active, page);
        self.active.push_back(page.clone());
    }

    pub fn len_new(&self) -> usize {
        self.new.len()
    }

    pub fn len_active(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn page() -> Arc<Page<()>> {
        Arc::new(Page::<()>::new(0, 4096, Weak::new()))
    }

    #[test]
    fn reading_to_new_enqueues() {
        let mut lists = PageLists::<()>::new_lists();
        let p = page();
        p.set_state(PageState::Alloc);
        lists.transition(&p, PageState::Reading);
        lists.transition(&p, PageState::New);
        assert_eq!(lists.len_new(), 1);
    }

    #[test]
    fn new_to_active_moves_lists() {
        let mut lists = PageLists::<()>::new_lists();
        let p = page();
        lists.transition(&p, PageState::Reading);
        lists.transition(&p, PageState::New);
        lists.transition(&p, PageState::Active);
        assert_eq!(lists.len_new(), 0);
        assert_eq!(lists.len_active(), 1);
    }

    #[test]
    fn writing_tracks_write_count() {
        let mut lists = PageLists::<()>::new_lists();
        let p = page();
        lists.transition(&p, PageState::Reading);
        lists.transition(&p, PageState::New);
        lists.transition(&p, PageState::Writing);
        assert_eq!(p.write_count(), 1);
        lists.transition(&p, PageState::Writing);
        assert_eq!(p.write_count(), 2);
        assert_eq!(lists.writing.len(), 1, "overlapping write re-enqueues at the tail, not twice");
    }

    #[test]
    #[should_panic(expected = "invalid page state transition")]
    fn disallowed_transition_panics() {
        let mut lists = PageLists::<()>::new_lists();
        let p = page();
        lists.transition(&p, PageState::Evicted);
    }
}
