/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use crate::error::Resolved;

/// Lexically clean a user-supplied path relative to `root`, rejecting any
/// `..` that climbs past the root, and return the remaining root-relative
/// components. `None` means the path escapes the root before symlinks are
/// even considered.
fn clean_components(root: &Path, user_path: &str) -> Option<Vec<String>> {
    let root_str = root.to_string_lossy();
    let relative = user_path
        .strip_prefix(root_str.as_ref())
        .unwrap_or(user_path);
    let relative = relative.trim_start_matches('/');

    let mut stack: Vec<String> = Vec::new();
    for component in relative.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return None;
                }
            }
            other => stack.push(other.to_owned()),
        }
    }
    Some(stack)
}

/// Resolve a user path to a confined host path, or classify it as
/// [`Resolved::OutOfRoot`]. `root` must already be canonical.
///
/// Lexically cleans the path first, then resolves symlinks along the
/// longest existing ancestor, re-checking containment after each step.
/// Components that do not exist yet are appended verbatim so operations like
/// `Writefile` can resolve a path for a file about to be created.
pub(crate) fn resolve(root: &Path, user_path: &str) -> Resolved {
    let Some(components) = clean_components(root, user_path) else {
        return Resolved::OutOfRoot;
    };

    let mut candidate = root.to_path_buf();
    for component in &components {
        candidate.push(component);
    }

    let mut existing = candidate.clone();
    let mut missing_tail: Vec<OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => missing_tail.push(name.to_owned()),
            None => break,
        }
        if !existing.pop() {
            break;
        }
    }
    missing_tail.reverse();

    let canonical_existing = match fs::canonicalize(&existing) {
        Ok(p) => p,
        Err(_) => return Resolved::OutOfRoot,
    };
    if !canonical_existing.starts_with(root) {
        return Resolved::OutOfRoot;
    }

    let mut resolved = canonical_existing;
    for part in missing_tail {
        resolved.push(part);
    }
    Resolved::InRoot(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::symlink};

    use crate::path::LocalPath;

    fn fresh_root(name: &str) -> LocalPath {
        let root = LocalPath::new_tmp(name);
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        LocalPath::new(&fs::canonicalize(&root).unwrap())
    }

    #[test]
    fn dotdot_traversal_escapes_to_out_of_root() {
        let root = fresh_root("resolve-traversal");
        let result = resolve(root.as_ref(), "/some/../foo/../../test.txt");
        assert!(matches!(result, Resolved::OutOfRoot));
    }

    #[test]
    fn plain_relative_path_stays_in_root() {
        let root = fresh_root("resolve-relative");
        match resolve(root.as_ref(), "foo/bar.txt") {
            Resolved::InRoot(p) => assert_eq!(p, root.as_ref().join("foo/bar.txt")),
            Resolved::OutOfRoot => panic!("expected InRoot"),
        }
    }

    #[test]
    fn symlink_escaping_root_is_out_of_root() {
        let root = fresh_root("resolve-symlink");
        let outside = LocalPath::new_tmp("resolve-symlink-outside");
        let _ = fs::remove_dir_all(&outside);
        fs::create_dir_all(&outside).unwrap();
        symlink(outside.as_ref(), root.join("escape")).unwrap();

        let result = resolve(root.as_ref(), "escape/file.txt");
        assert!(matches!(result, Resolved::OutOfRoot));
    }

    #[test]
    fn external_absolute_path_is_out_of_root() {
        let root = fresh_root("resolve-external");
        let outside = LocalPath::new_tmp("resolve-external-target");
        fs::write(&outside, b"hi").unwrap();

        let result = resolve(root.as_ref(), &format!("../{}", outside.base.file_name().unwrap().to_string_lossy()));
        assert!(matches!(result, Resolved::OutOfRoot));
    }
}
