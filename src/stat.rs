/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs::{File, Metadata},
    io::Read,
    path::Path,
};

/// A single entry's metadata, as returned by `Stat` and `ListDirectory`.
///
/// `name` is always root-relative; the absolute host path is never exposed
/// here (see [`crate::resolve`]).
#[derive(Debug, Clone, PartialEq)]
pub struct StatInfo {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    pub mode: u32,
    pub mtime: u64,
    pub mime: String,
}

pub(crate) fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

pub(crate) fn mtime_of(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Best-effort content type: first by extension, falling back to sniffing
/// the first bytes of the file. Never fails — an unrecognized file is
/// reported as `application/octet-stream`.
pub(crate) fn guess_mime(path: &Path, is_directory: bool) -> String {
    if is_directory {
        return "inode/directory".to_owned();
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(mime) = mime_by_extension(&ext.to_ascii_lowercase()) {
            return mime.to_owned();
        }
    }
    sniff_mime(path).unwrap_or_else(|| "application/octet-stream".to_owned())
}

fn mime_by_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "txt" | "log" | "cfg" | "conf" | "ini" | "properties" => "text/plain",
        "json" => "application/json",
        "toml" => "application/toml",
        "yml" | "yaml" => "application/yaml",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "jar" => "application/java-archive",
        "sh" => "text/x-shellscript",
        "py" => "text/x-python",
        _ => return None,
    })
}

/// Magic-byte sniffing for extension-less or unrecognized files.
fn sniff_mime(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut head = [0u8; 16];
    let n = file.read(&mut head).ok()?;
    let head = &head[..n];

    if head.starts_with(b"\x7fELF") {
        return Some("application/x-elf".to_owned());
    }
    if head.starts_with(b"PK\x03\x04") {
        return Some("application/zip".to_owned());
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return Some("application/gzip".to_owned());
    }
    if head.starts_with(b"#!") {
        return Some("text/x-shellscript".to_owned());
    }
    if head.iter().all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()) {
        return Some("text/plain".to_owned());
    }
    None
}
