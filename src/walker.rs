/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{io, path::Path};

use log::warn;
use walkdir::WalkDir;

/// Sum the sizes of every regular file under `path`, recursively. Used by
/// `Recount` (over the whole root) and by `Delete` (over the subtree about
/// to be removed).
///
/// Symlinks are never followed and never counted. A read error on an entry
/// below the root is logged and skipped; a read error at the root itself is
/// fatal and propagated.
pub(crate) fn sum_subtree_bytes(path: &Path) -> io::Result<i64> {
    let mut total: i64 = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(err.into());
                }
                warn!("skipping unreadable entry during walk: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => total += meta.len() as i64,
            Err(err) => warn!("skipping entry with unreadable metadata '{}': {}", entry.path().display(), err),
        }
    }
    Ok(total)
}

/// Recursively copy a directory tree, used as the fallback path for `Rename`
/// across devices. Symlinks are skipped, same as [`sum_subtree_bytes`].
pub(crate) fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).follow_links(false).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).expect("entry under from");
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
