/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! N-way completion fan-in, per the "Merge objects" design note in
//! spec.md §9: allocate with a continuation, hand out `handle()`s, and
//! invoke the continuation once every handle has fired.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::Status;

/// The continuation a [`Merge`] fires when its last handle completes.
pub type Completion<E> = Box<dyn FnOnce(Status<E>) + Send>;

struct MergeInner<E> {
    outstanding: AtomicUsize,
    worst: Mutex<Option<Status<E>>>,
    continuation: Mutex<Option<Completion<E>>>,
}

/// An N-way completion aggregator.
///
/// A `Merge` is created with one implicit outstanding handle (the
/// "initial merge handle" of spec.md §4.2/§4.4, used by the issuing code
/// while it is still dispatching further handles so the merge cannot fire
/// prematurely). The issuer must eventually fire that initial handle via
/// [`Merge::initial_handle`] exactly once.
#[derive(Clone)]
pub struct Merge<E> {
    inner: Arc<MergeInner<E>>,
}

/// A single participant's completion callback. Fires the owning [`Merge`]
/// when invoked; the merge's continuation runs once the last handle fires.
pub struct MergeHandle<E> {
    inner: Arc<MergeInner<E>>,
}

impl<E: Clone + Send + Sync + std::fmt::Debug + 'static> Merge<E> {
    /// Allocate a merge with one outstanding (initial) handle already
    /// reserved.
    pub fn new(continuation: Completion<E>) -> Self {
        Self {
            inner: Arc::new(MergeInner {
                outstanding: AtomicUsize::new(1),
                worst: Mutex::new(None),
                continuation: Mutex::new(Some(continuation)),
            }),
        }
    }

    /// Hand out a new participant handle, incrementing the outstanding
    /// count. Must be balanced by firing the returned handle exactly once.
    pub fn handle(&self) -> MergeHandle<E> {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        MergeHandle { inner: self.inner.clone() }
    }

    /// Fire the merge's initial (constructor-reserved) handle.
    pub fn fire_initial(self, status: Status<E>) {
        MergeHandle { inner: self.inner }.fire(status);
    }
}

impl<E> MergeHandle<E> {
    /// Record `status` and decrement the outstanding count. If this was
    /// the last outstanding handle, invokes the merge's continuation with
    /// the first non-OK status seen, or `Ok` if every handle reported OK.
    pub fn fire(self, status: Status<E>) {
        {
            let mut worst = self.inner.worst.lock().unwrap();
            match &*worst {
                None => *worst = Some(status),
                Some(existing) if existing.is_ok() && !status.is_ok() => *worst = Some(status),
                _ => {}
            }
        }
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let final_status =
                self.inner.worst.lock().unwrap().take().unwrap_or(Status::Ok);
            if let Some(continuation) = self.inner.continuation.lock().unwrap().take() {
                continuation(final_status);
            }
        }
    }
}
