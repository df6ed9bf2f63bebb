/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs::{self, File, OpenOptions, Permissions},
    io::{self, Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use log::debug;

use crate::{
    accountant::{Accountant, DiskSpace},
    config::{OwnershipConfig, ServerConfig},
    error::{FsError, Resolved, Result},
    resolve,
    stat::{guess_mime, mode_of, mtime_of, StatInfo},
    walker,
};

/// Bytes buffered up front to learn a write's length without knowing it in
/// advance. Writes that fit entirely within this threshold get a precise,
/// pre-admitted quota check; larger writes stream and are admitted
/// incrementally, chunk by chunk.
const WRITE_PEEK_THRESHOLD: usize = 64 * 1024;
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// The sandboxed filesystem for one workload, rooted at a fixed host
/// directory.
pub struct Filesystem {
    root: PathBuf,
    ownership: Option<OwnershipConfig>,
    accountant: Accountant,
}

impl Filesystem {
    /// Construct a sandbox rooted at `config.root_directory`. The root must
    /// already exist; this type never creates it.
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        let root = fs::canonicalize(&config.root_directory)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("root '{}' is not a directory", root.display()),
            ));
        }
        let interval = Duration::from_secs(config.disk_check_interval.max(1) as u64);
        Ok(Self {
            root,
            ownership: config.user,
            accountant: Accountant::new(config.disk_limit_bytes, interval),
        })
    }

    /// The sandbox's root, as an absolute host path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ---- Path Resolver -------------------------------------------------

    /// Resolve `path`, collapsing `OutOfRoot` into `NotFound` so callers
    /// cannot distinguish "escaped the sandbox" from "does not exist".
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        match resolve::resolve(&self.root, path) {
            Resolved::InRoot(p) => Ok(p),
            Resolved::OutOfRoot => Err(FsError::NotFound),
        }
    }

    fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_owned(),
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => "/".to_owned(),
        }
    }

    // ---- Operation Surface ----------------------------------------------

    pub fn open(&self, path: &str, sink: &mut dyn Write) -> Result<()> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(map_not_found)?;
        if meta.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let mut file = File::open(&resolved).map_err(map_not_found)?;
        io::copy(&mut file, sink)?;
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.open(path, &mut buffer)?;
        Ok(buffer)
    }

    pub fn write_file(&self, path: &str, source: &mut dyn Read) -> Result<()> {
        let resolved = self.resolve(path)?;
        let old_size = fs::metadata(&resolved).map(|m| m.len() as i64).unwrap_or(0);

        let mut peeked = Vec::new();
        (&mut *source)
            .take(WRITE_PEEK_THRESHOLD as u64 + 1)
            .read_to_end(&mut peeked)?;

        let created_dirs = self.create_parent_dirs(&resolved)?;

        if peeked.len() <= WRITE_PEEK_THRESHOLD {
            // Whole write fit in the peek buffer: length is known, so the
            // quota check happens before a single byte is committed.
            let delta = peeked.len() as i64 - old_size;
            self.check_quota(delta)?;
            let mut file = File::create(&resolved)?;
            file.write_all(&peeked)?;
            self.finish_write(&resolved, &created_dirs)?;
            self.accountant.add(delta);
            return Ok(());
        }

        // Length unknown up front: admit the already-buffered peek before
        // touching the destination at all. `File::create` opens with
        // create-or-truncate semantics, so opening it first would destroy
        // any existing content even on a write that's about to be rejected;
        // checking against the peek buffer alone needs no open file.
        let peeked_delta = peeked.len() as i64 - old_size;
        self.check_quota(peeked_delta)?;

        // Stream the rest, admitting each chunk against the current
        // headroom. A mid-stream rejection still counts the bytes already
        // written — the file exists by that point, and a later recount
        // reconciles the estimate.
        let mut file = File::create(&resolved)?;
        let mut written: i64 = 0;

        file.write_all(&peeked)?;
        written += peeked.len() as i64;

        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = source.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let prospective_delta = written + n as i64 - old_size;
            if !self.accountant.has_space_for(prospective_delta) {
                self.finish_write(&resolved, &created_dirs)?;
                self.accountant.add(written - old_size);
                return Err(FsError::NotEnoughDiskSpace {
                    requested: prospective_delta,
                    available: self.accountant.headroom(),
                });
            }
            file.write_all(&chunk[..n])?;
            written += n as i64;
        }
        self.finish_write(&resolved, &created_dirs)?;
        self.accountant.add(written - old_size);
        Ok(())
    }

    pub fn create_directory(&self, parent: &str, name: &str) -> Result<()> {
        let combined = format!("{}/{}", parent.trim_end_matches('/'), name);
        let resolved = self.resolve(&combined)?;
        let created = self.create_dir_chain(&resolved)?;
        for dir in &created {
            self.apply_ownership(dir)?;
        }
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let resolved_to = self.resolve(to)?;
        if resolved_to == self.root || resolved_to.exists() {
            return Err(FsError::AlreadyExists);
        }
        let resolved_from = self.resolve(from)?;
        if !resolved_from.exists() || resolved_from == self.root {
            return Err(FsError::NotFound);
        }

        let created_dirs = self.create_parent_dirs(&resolved_to)?;
        for dir in &created_dirs {
            self.apply_ownership(dir)?;
        }

        if fs::rename(&resolved_from, &resolved_to).is_err() {
            // Same-device atomic rename failed (or crossed devices): fall
            // back to copy-then-delete.
            if resolved_from.is_dir() {
                walker::copy_dir_recursive(&resolved_from, &resolved_to)?;
                fs::remove_dir_all(&resolved_from)?;
            } else {
                fs::copy(&resolved_from, &resolved_to)?;
                fs::remove_file(&resolved_from)?;
            }
        }
        Ok(())
    }

    pub fn copy(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(map_not_found)?;
        if !meta.is_file() {
            return Err(FsError::NotFound);
        }
        let size = meta.len() as i64;
        self.check_quota(size)?;

        let dest = self.reserve_copy_name(&resolved)?;
        fs::copy(&resolved, &dest)?;
        fs::set_permissions(&dest, meta.permissions())?;
        self.apply_ownership(&dest)?;
        self.accountant.add(size);
        Ok(self.relative(&dest))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        if path.is_empty() || path == "/" {
            return Err(FsError::CannotDeleteRoot);
        }
        let resolved = match resolve::resolve(&self.root, path) {
            Resolved::OutOfRoot => return Err(FsError::NotFound),
            Resolved::InRoot(p) => p,
        };
        if resolved == self.root {
            return Err(FsError::CannotDeleteRoot);
        }
        if !resolved.exists() {
            // Idempotent: "gone" is always the desired postcondition.
            return Ok(());
        }
        if resolved.is_dir() {
            let size = walker::sum_subtree_bytes(&resolved)?;
            fs::remove_dir_all(&resolved)?;
            self.accountant.add(-size);
        } else {
            let size = fs::metadata(&resolved)?.len() as i64;
            fs::remove_file(&resolved)?;
            self.accountant.add(-size);
        }
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<StatInfo> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(map_not_found)?;
        Ok(self.stat_entry(&resolved, &meta))
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<StatInfo>> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(map_not_found)?;
        if !meta.is_dir() {
            return Err(FsError::NotFound);
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&resolved)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping unreadable directory entry: {}", err);
                    continue;
                }
            };
            let entry_meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    debug!("skipping entry with unreadable metadata '{}': {}", entry.path().display(), err);
                    continue;
                }
            };
            entries.push(self.stat_entry(&entry.path(), &entry_meta));
        }
        Ok(entries)
    }

    pub fn chown(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(FsError::NotFound);
        }
        self.apply_ownership(&resolved)?;
        if resolved.is_dir() {
            for entry in walkdir::WalkDir::new(&resolved).follow_links(false).min_depth(1) {
                let entry = entry.map_err(|e| e.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk error")))?;
                self.apply_ownership(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let resolved = self.resolve(path)?;
        fs::set_permissions(&resolved, Permissions::from_mode(mode & 0o7777)).map_err(map_not_found)?;
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn touch(&self, path: &str) -> Result<()> {
        if self.exists(path) {
            return Ok(());
        }
        let resolved = self.resolve(path)?;
        self.check_quota(0)?;
        let created_dirs = self.create_parent_dirs(&resolved)?;
        File::create(&resolved)?;
        self.finish_write(&resolved, &created_dirs)?;
        Ok(())
    }

    // ---- Disk Accountant -------------------------------------------------

    pub fn disk_usage(&self) -> DiskSpace {
        self.accountant.recount_if_due(&self.root);
        self.accountant.get()
    }

    pub fn has_space_for(&self, delta: i64) -> bool {
        self.accountant.has_space_for(delta)
    }

    /// Trigger a full recount on demand (e.g. after restoring a backup).
    pub fn recount(&self) -> i64 {
        self.accountant.recount(&self.root)
    }

    // ---- internals ------------------------------------------------------

    fn check_quota(&self, delta: i64) -> Result<()> {
        if !self.accountant.has_space_for(delta) {
            return Err(FsError::NotEnoughDiskSpace {
                requested: delta,
                available: self.accountant.headroom(),
            });
        }
        Ok(())
    }

    fn stat_entry(&self, resolved: &Path, meta: &fs::Metadata) -> StatInfo {
        StatInfo {
            name: self.relative(resolved),
            size: meta.len(),
            is_directory: meta.is_dir(),
            mode: mode_of(meta),
            mtime: mtime_of(meta),
            mime: guess_mime(resolved, meta.is_dir()),
        }
    }

    fn apply_ownership(&self, path: &Path) -> Result<()> {
        if let Some(owner) = self.ownership {
            std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))?;
        }
        Ok(())
    }

    /// Create every missing directory in `full`'s chain (`full` included),
    /// mode 0755, returning the ones actually created so ownership can be
    /// applied to them afterward.
    fn create_dir_chain(&self, full: &Path) -> Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut cursor = full.to_path_buf();
        loop {
            if cursor.exists() {
                break;
            }
            missing.push(cursor.clone());
            if !cursor.pop() {
                break;
            }
        }
        missing.reverse();
        for dir in &missing {
            fs::create_dir(dir)?;
            fs::set_permissions(dir, Permissions::from_mode(DIR_MODE))?;
        }
        Ok(missing)
    }

    fn create_parent_dirs(&self, target: &Path) -> Result<Vec<PathBuf>> {
        match target.parent() {
            Some(parent) => self.create_dir_chain(parent),
            None => Ok(Vec::new()),
        }
    }

    fn finish_write(&self, file: &Path, created_dirs: &[PathBuf]) -> Result<()> {
        fs::set_permissions(file, Permissions::from_mode(FILE_MODE))?;
        self.apply_ownership(file)?;
        for dir in created_dirs {
            self.apply_ownership(dir)?;
        }
        Ok(())
    }

    /// Pick the first unused `stem copy[.ext]`, `stem copy N[.ext]`, ...
    /// name for a copy of `source`, reserving it with an exclusive create to
    /// avoid two concurrent copies picking the same name.
    fn reserve_copy_name(&self, source: &Path) -> Result<PathBuf> {
        let parent = source.parent().unwrap_or(&self.root);
        let file_name = source
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let (stem, ext) = split_stem_ext(file_name);

        let mut index: Option<u32> = None;
        loop {
            let candidate = parent.join(copy_name(stem, ext, index));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    index = Some(index.map_or(1, |i| i + 1));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn map_not_found(err: io::Error) -> FsError {
    if err.kind() == io::ErrorKind::NotFound {
        FsError::NotFound
    } else {
        FsError::Io(err)
    }
}

fn split_stem_ext(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx + 1..]),
        _ => (file_name, ""),
    }
}

fn copy_name(stem: &str, ext: &str, index: Option<u32>) -> String {
    let label = match index {
        None => format!("{stem} copy"),
        Some(i) => format!("{stem} copy {i}"),
    };
    if ext.is_empty() {
        label
    } else {
        format!("{label}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::LocalPath;

    fn test_fs(name: &str, limit: i64) -> (LocalPath, Filesystem) {
        let root = LocalPath::new_tmp(name);
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        let config = ServerConfig {
            root_directory: root.to_string(),
            disk_check_interval: 3600,
            disk_limit_bytes: limit,
            user: None,
        };
        let fs = Filesystem::new(&config).unwrap();
        (root, fs)
    }

    #[test]
    fn traversal_is_rejected_and_creates_nothing() {
        let (root, fs) = test_fs("scenario-traversal", 0);
        let mut source: &[u8] = b"hi";
        let result = fs.write_file("/some/../foo/../../test.txt", &mut source);
        assert!(matches!(result, Err(FsError::NotFound)));
        assert_eq!(walker::sum_subtree_bytes(root.as_ref()).unwrap(), 0);
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let (_root, fs) = test_fs("scenario-quota", 1024);
        let mut source: &[u8] = &[0u8; 1025];
        let result = fs.write_file("a.bin", &mut source);
        assert!(matches!(
            result,
            Err(FsError::NotEnoughDiskSpace { requested: 1025, .. })
        ));
        assert_eq!(fs.disk_usage().bytes_used, 0);
    }

    #[test]
    fn append_then_shrink_updates_accountant() {
        let (_root, fs) = test_fs("scenario-append-resize", 0);
        // Baseline usage from unrelated files already in the sandbox.
        fs.accountant.add(100);

        let mut first: &[u8] = &[0u8; 100];
        fs.write_file("t", &mut first).unwrap();
        assert_eq!(fs.disk_usage().bytes_used, 200);

        let mut second: &[u8] = &[0u8; 50];
        fs.write_file("t", &mut second).unwrap();
        assert_eq!(fs.disk_usage().bytes_used, 150);
    }

    #[test]
    fn copy_suffix_rule_applies_in_order() {
        let (_root, fs) = test_fs("scenario-copy-suffix", 0);
        let mut content: &[u8] = b"test content";
        fs.write_file("source.txt", &mut content).unwrap();

        let first = fs.copy("source.txt").unwrap();
        let second = fs.copy("source.txt").unwrap();
        assert_eq!(first, "/source copy.txt");
        assert_eq!(second, "/source copy 1.txt");

        let names: Vec<String> = fs
            .list_directory("/")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"/source.txt".to_owned()));
        assert!(names.contains(&"/source copy.txt".to_owned()));
        assert!(names.contains(&"/source copy 1.txt".to_owned()));
        assert_eq!(fs.disk_usage().bytes_used, "test content".len() as i64 * 3);
    }

    #[test]
    fn recursive_delete_removes_subtree_and_decrements_usage() {
        let (_root, fs) = test_fs("scenario-recursive-delete", 0);
        for path in ["foo/source.txt", "foo/bar/source.txt", "foo/bar/baz/source.txt"] {
            let mut content: &[u8] = b"test content";
            fs.write_file(path, &mut content).unwrap();
        }
        assert_eq!(fs.disk_usage().bytes_used, 12 * 3);

        fs.delete("foo").unwrap();

        assert!(!fs.exists("foo/source.txt"));
        assert!(!fs.exists("foo/bar/source.txt"));
        assert!(!fs.exists("foo/bar/baz/source.txt"));
        assert_eq!(fs.disk_usage().bytes_used, 0);
    }

    #[test]
    fn rename_onto_root_is_already_exists() {
        let (_root, fs) = test_fs("scenario-rename-root", 0);
        let mut content: &[u8] = b"hi";
        fs.write_file("source.txt", &mut content).unwrap();
        let result = fs.rename("source.txt", "/");
        assert!(matches!(result, Err(FsError::AlreadyExists)));
    }

    #[test]
    fn open_on_directory_is_is_directory() {
        let (_root, fs) = test_fs("scenario-open-dir", 0);
        fs.create_directory("/", "dir").unwrap();
        let mut sink = Vec::new();
        let result = fs.open("dir", &mut sink);
        assert!(matches!(result, Err(FsError::IsDirectory)));
    }

    #[test]
    fn rename_from_outside_root_is_not_found() {
        let (root, fs) = test_fs("scenario-rename-external", 0);
        let parent = root.as_ref().parent().unwrap();
        fs::write(parent.join("ext.txt"), b"secret").unwrap();

        let result = fs.rename("../ext.txt", "t.txt");
        assert!(matches!(result, Err(FsError::NotFound)));
        assert!(parent.join("ext.txt").exists());

        let _ = fs::remove_file(parent.join("ext.txt"));
    }

    #[test]
    fn delete_of_missing_path_is_idempotent() {
        let (_root, fs) = test_fs("scenario-delete-idempotent", 0);
        fs.delete("never-existed.txt").unwrap();
        fs.delete("never-existed.txt").unwrap();
    }

    #[test]
    fn delete_root_is_rejected() {
        let (_root, fs) = test_fs("scenario-delete-root", 0);
        assert!(matches!(fs.delete("/"), Err(FsError::CannotDeleteRoot)));
        assert!(matches!(fs.delete(""), Err(FsError::CannotDeleteRoot)));
    }

    #[test]
    fn streaming_write_rejects_before_exceeding_quota() {
        let (_root, fs) = test_fs("scenario-streaming-quota", 1024);
        let mut source: &[u8] = &[0u8; WRITE_PEEK_THRESHOLD + 1024];
        let result = fs.write_file("big.bin", &mut source);
        assert!(matches!(result, Err(FsError::NotEnoughDiskSpace { .. })));
        assert_eq!(fs.disk_usage().bytes_used, 0);
        assert!(!fs.exists("big.bin"));
    }

    #[test]
    fn rejected_streaming_overwrite_preserves_existing_content() {
        let (_root, fs) = test_fs("scenario-streaming-overwrite-quota", 100);
        let mut original: &[u8] = b"original content";
        fs.write_file("big.bin", &mut original).unwrap();

        let mut oversized: &[u8] = &[0u8; WRITE_PEEK_THRESHOLD + 1024];
        let result = fs.write_file("big.bin", &mut oversized);
        assert!(matches!(result, Err(FsError::NotEnoughDiskSpace { .. })));

        let bytes = fs.read_file("big.bin").unwrap();
        assert_eq!(bytes, b"original content");
        assert_eq!(fs.disk_usage().bytes_used, "original content".len() as i64);
    }

    #[test]
    fn write_then_open_round_trips_bytes() {
        let (_root, fs) = test_fs("scenario-round-trip", 0);
        let mut content: &[u8] = b"round trip payload";
        fs.write_file("p.txt", &mut content).unwrap();

        let bytes = fs.read_file("p.txt").unwrap();
        assert_eq!(bytes, b"round trip payload");
    }
}
