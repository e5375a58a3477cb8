/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! Status values returned across the cache's external interface.
//!
//! The cache itself only ever distinguishes three kinds of outcome: success,
//! an internal allocation failure, and whatever status an I/O collaborator
//! handed back (passed through verbatim, never interpreted). Everything
//! else about `E` is opaque to this crate.

use core::fmt;

/// Outcome of a cache operation or of an I/O collaborator callback.
///
/// `E` is the caller's own I/O error type (whatever `fs_read`/`fs_write`
/// report on failure). It is threaded through unexamined; the cache does
/// not attempt to interpret it beyond storing and replaying it.
#[derive(Clone)]
pub enum Status<E> {
    Ok,
    /// The cache failed to allocate an internal resource (a page
    /// descriptor or its backing buffer). `resource` names what couldn't
    /// be allocated.
    AllocFailed(&'static str),
    /// Status handed back verbatim by an `fs_read`/`fs_write` collaborator.
    Io(E),
}

impl<E> Status<E> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl<E: fmt::Debug> fmt::Debug for Status<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "Ok"),
            Status::AllocFailed(resource) => write!(f, "failed to allocate {resource}"),
            Status::Io(e) => write!(f, "io error: {e:?}"),
        }
    }
}
