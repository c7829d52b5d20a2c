//! Process-wide exclusive access to one store path.
//!
//! Every read-modify-write of a store file runs under a [`StoreLock`] for
//! that file, so concurrent writers never drop each other's entries.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{Condvar, Mutex, OnceLock, PoisonError},
};

struct HeldPaths {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

fn held_paths() -> &'static HeldPaths {
    static HELD: OnceLock<HeldPaths> = OnceLock::new();
    HELD.get_or_init(|| HeldPaths {
        held: Mutex::new(HashSet::new()),
        released: Condvar::new(),
    })
}

/// Exclusive hold on a store path, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    key: PathBuf,
}

impl StoreLock {
    /// Block until no other holder in this process has `path`.
    ///
    /// The parent directory is created if missing, since the lock key is the
    /// canonical directory joined with the file name.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let key = lock_key(path)?;
        let paths = held_paths();
        let mut held = paths.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(&key) {
            held = paths
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.clone());

        Ok(Self {
            path: path.to_path_buf(),
            key,
        })
    }

    /// The store path as given to [`StoreLock::acquire`].
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let paths = held_paths();
        paths
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        paths.released.notify_all();
    }
}

/// Directory containing `path`, `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn lock_key(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "store path has no file name")
    })?;
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    Ok(dir.canonicalize()?.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn spellings_of_one_path_share_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let direct = dir.path().join("ssl.keystore");
        let dotted = dir.path().join(".").join("ssl.keystore");
        assert_eq!(lock_key(&direct).unwrap(), lock_key(&dotted).unwrap());
    }

    #[test]
    fn holders_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssl.keystore");
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _lock = StoreLock::acquire(&path).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_paths_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let _a = StoreLock::acquire(&dir.path().join("a.keystore")).unwrap();
        let _b = StoreLock::acquire(&dir.path().join("b.keystore")).unwrap();
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        assert!(StoreLock::acquire(Path::new("/")).is_err());
    }
}
