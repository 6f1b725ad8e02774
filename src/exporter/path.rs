use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::fs::OutputFileSystem;
use crate::plugin::SubFormat;

/// `name.ext`, or `name` alone when `ext` is empty.
pub(crate) fn file_name_with_extension(name: &str, ext: &str) -> OsString {
    let mut file = OsString::from(name);
    if !ext.is_empty() {
        file.push(".");
        file.push(ext);
    }
    file
}

/// Give `path` an extension `sub` accepts.
///
/// An accepted extension is kept as written. Otherwise the canonical extension
/// is appended, so a dotted name like `Live at 9.30` stays whole. A path
/// without a file name gets `default_name`.
pub(crate) fn with_format_extension(path: &Path, sub: &SubFormat, default_name: &str) -> PathBuf {
    let mut path = path.to_path_buf();
    if path.file_stem().is_none() {
        path.push(default_name);
    }
    let accepted = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| sub.accepts_extension(e));
    if !accepted {
        let mut name = path.file_name().map(OsStr::to_os_string).unwrap_or_default();
        name.push(".");
        name.push(sub.extension());
        path.set_file_name(name);
    }
    path
}

/// `path` itself if it is free, else `stem-N.ext` with the lowest free `N`.
pub(crate) fn first_free_path(fs: &dyn OutputFileSystem, path: &Path) -> PathBuf {
    if !fs.exists(path) {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    (1u64..)
        .map(|n| path.with_file_name(file_name_with_extension(&format!("{stem}-{n}"), &ext)))
        .find(|candidate| !fs.exists(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}
