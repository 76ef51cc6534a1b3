//! Filesystem helpers for whole-tree copies.
//!
//! All functions here are blocking; async callers run them on the blocking
//! pool.

use std::io;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Copy `src` into `dest` recursively, overwriting files that exist.
///
/// Entries already in `dest` but absent from `src` are left alone.
pub fn copy_dir_recursive(src: &Path, dest: &Path) -> io::Result<()> {
    let meta = std::fs::metadata(src)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", src.display()),
        ));
    }
    std::fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel_path = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let new_path = dest.join(rel_path);

        if entry.file_type().is_dir() {
            if new_path.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
                std::fs::remove_file(&new_path)?;
            }
            std::fs::create_dir_all(&new_path)?;
        } else {
            if new_path.symlink_metadata().is_ok_and(|m| m.is_dir()) {
                std::fs::remove_dir_all(&new_path)?;
            }
            if entry.file_type().is_symlink() {
                copy_symlink(entry.path(), &new_path)?;
            } else {
                if let Some(parent) = new_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &new_path)?;
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    let target = std::fs::read_link(link)?;
    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    // Follow the link; creating symlinks needs extra privileges on Windows.
    std::fs::copy(link, dest).map(|_| ())
}

/// Make `dest` an exact copy of `src`.
///
/// Files are copied over first and destination-only entries pruned after, so
/// a copy that fails part way leaves the previous contents of `dest` in place.
pub fn mirror_dir(src: &Path, dest: &Path) -> io::Result<()> {
    copy_dir_recursive(src, dest)?;
    prune_extra(src, dest)
}

/// Delete entries under `dest` that have no counterpart under `src`.
fn prune_extra(src: &Path, dest: &Path) -> io::Result<()> {
    let mut walker = WalkDir::new(dest).min_depth(1).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        let rel_path = entry
            .path()
            .strip_prefix(dest)
            .map_err(|e| io::Error::other(e.to_string()))?;
        match src.join(rel_path).symlink_metadata() {
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())?;
            walker.skip_current_dir();
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Most recent modification time of any file below `dir`.
///
/// Directories are not counted. An existing tree without files reports the
/// UNIX epoch; a missing one is `NotFound`.
pub fn latest_modification(dir: &Path) -> io::Result<SystemTime> {
    let meta = std::fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut latest = SystemTime::UNIX_EPOCH;
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
        if modified > latest {
            latest = modified;
        }
    }
    Ok(latest)
}

/// Move a directory, falling back to copy + delete across filesystems.
pub fn move_dir(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_dir_recursive(src, dest)?;
            std::fs::remove_dir_all(src)
        }
        Err(e) => Err(e),
    }
}

/// Remove a directory tree; absence is not an error.
pub fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
