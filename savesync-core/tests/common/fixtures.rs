use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Scratch layout shared by the session tests.
pub struct SaveTree {
    pub dir: TempDir,
    pub local: PathBuf,
    pub remote_root: PathBuf,
    pub sandboxes: PathBuf,
    pub lock_path: PathBuf,
}

impl SaveTree {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating save tree");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let local = dir.path().join("local");
        let remote_root = dir.path().join("remote");
        let sandboxes = dir.path().join("sandboxes");
        for path in [&local, &remote_root, &sandboxes] {
            fs::create_dir_all(path).expect("Failed to create fixture dir");
        }
        let lock_path = dir.path().join("session.lock");

        Self {
            dir,
            local,
            remote_root,
            sandboxes,
            lock_path,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

/// Write `content` to `path` and backdate it by `age`.
pub fn write_aged(path: &Path, content: &str, age: Duration) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write save file");
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to reopen save file");
    file.set_modified(SystemTime::now() - age)
        .expect("Failed to set mtime");
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}
