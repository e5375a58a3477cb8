/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! Page lifecycle states, mirroring `vm_page_state.rs` and the
//! `PAGECACHE_PAGESTATE_*` constants of the original source.

/// Which pagelist (if any) a page in a given state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    Free = 0,
    Alloc = 1,
    Reading = 2,
    New = 3,
    Active = 4,
    Writing = 5,
    Dirty = 6,
    Evicted = 7,
}

impl PageState {
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => PageState::Free,
            1 => PageState::Alloc,
            2 => PageState::Reading,
            3 => PageState::New,
            4 => PageState::Active,
            5 => PageState::Writing,
            6 => PageState::Dirty,
            7 => PageState::Evicted,
            _ => panic!("bad page state byte"),
        }
    }

    /// True for the states in which a page is a member of exactly one
    /// pagelist AND of its node's tree (invariant 1 of spec.md §3).
    #[inline]
    pub const fn has_pagelist(&self) -> bool {
        matches!(self, PageState::New | PageState::Active | PageState::Writing | PageState::Free)
    }
}
