/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the public operation surface.
///
/// A containment violation (a path that resolves outside the sandbox root)
/// is never reported as a distinct variant here — it is folded into
/// [`FsError::NotFound`] so that callers cannot learn anything about the host
/// layout from the shape of an error. See [`crate::resolve`].
#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,

    #[error("is a directory")]
    IsDirectory,

    #[error("already exists")]
    AlreadyExists,

    #[error("not enough disk space: requested {requested} bytes, {available} available")]
    NotEnoughDiskSpace { requested: i64, available: i64 },

    #[error("cannot delete the root directory")]
    CannotDeleteRoot,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Internal-only verdict produced while resolving paths. `OutOfRoot` must be
/// converted to [`FsError::NotFound`] before crossing the public boundary;
/// `PathBuf` is kept around purely for debug logging, never returned to callers.
#[derive(Debug)]
pub(crate) enum Resolved {
    InRoot(PathBuf),
    OutOfRoot,
}

pub(crate) type Result<T> = std::result::Result<T, FsError>;
