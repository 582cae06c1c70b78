//! File plumbing for the `msoffice-crypt` front end.
//!
//! Documents are handled as whole buffers, so this crate only has to get bytes in and out safely:
//! - [`read_bounded`] refuses oversized inputs from their metadata before reading them
//! - [`write_atomic`] stages output in a temp file next to the destination, syncs it and renames
//!   it into place, so an interrupted run never leaves a truncated document behind
//! - [`tagged_sibling`] derives default output names such as `book_e.xlsx`

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` is `Some("")` for a bare file name.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Read a whole file, failing with [`io::ErrorKind::InvalidInput`] when it is larger than
/// `max_len` bytes.
///
/// The size is checked from metadata first and the read itself is capped, so a file that grows
/// while being read is still refused.
pub fn read_bounded(path: impl AsRef<Path>, max_len: u64) -> io::Result<Vec<u8>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len > max_len {
        return Err(too_large(path, len, max_len));
    }

    let mut buf = Vec::with_capacity(len as usize);
    file.take(max_len.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_len {
        return Err(too_large(path, buf.len() as u64, max_len));
    }
    Ok(buf)
}

fn too_large(path: &Path, len: u64, max_len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "{} is {len} bytes; the limit is {max_len} bytes",
            path.display()
        ),
    )
}

/// Replace `dest` with `bytes` atomically.
///
/// Parent directories are created as needed. On failure the previous contents of `dest` (if any)
/// are left in place and the staging file is removed.
pub fn write_atomic(dest: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;

    let staged = staged.into_temp_path();
    replace_file(staged.as_ref(), dest)?;
    // The temp path no longer exists after the rename; don't try to delete it again.
    let _ = staged.keep();

    // The data is already in place; a directory sync failure is not a write failure.
    let _ = sync_dir(dir);
    Ok(())
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    // Opening a directory as a file works on most Unix platforms only.
    File::open(dir)?.sync_all()
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt as _;
        use windows_sys::Win32::Storage::FileSystem::{MoveFileExW, MOVEFILE_REPLACE_EXISTING};

        fn wide(path: &Path) -> Vec<u16> {
            path.as_os_str().encode_wide().chain(Some(0)).collect()
        }

        let (from_w, to_w) = (wide(from), wide(to));
        let ok = unsafe { MoveFileExW(from_w.as_ptr(), to_w.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}

/// `dir/book.xlsx` with tag `e` becomes `dir/book_e.xlsx`; a name without an extension just
/// gains the `_e` suffix.
///
/// Returns `None` for paths without a file name (`/`, `..`).
pub fn tagged_sibling(path: impl AsRef<Path>, tag: &str) -> Option<PathBuf> {
    let path = path.as_ref();
    let stem = path.file_stem()?.to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{tag}"),
    };
    Some(path.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    struct CwdGuard {
        old: PathBuf,
    }

    impl CwdGuard {
        fn chdir(path: &Path) -> Self {
            let old = std::env::current_dir().expect("current_dir");
            std::env::set_current_dir(path).expect("set_current_dir");
            Self { old }
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.old);
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_atomic_supports_bare_file_names() {
        let _guard = CWD_LOCK.lock().expect("lock");
        let tmp = tempfile::tempdir().expect("temp dir");
        let _cwd = CwdGuard::chdir(tmp.path());

        write_atomic("book_e.xlsx", b"hello").expect("atomic write");
        assert_eq!(fs::read(tmp.path().join("book_e.xlsx")).expect("read"), b"hello");
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_staging_files() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("nested").join("out.docx");

        write_atomic(&dest, b"first").expect("first write");
        write_atomic(&dest, b"second").expect("second write");

        assert_eq!(fs::read(&dest).expect("read"), b"second");
        assert_eq!(file_names(dest.parent().unwrap()), ["out.docx"]);
    }

    #[test]
    fn failed_write_keeps_existing_destination() {
        let tmp = tempfile::tempdir().expect("temp dir");
        // A directory cannot be replaced by a file rename.
        let dest = tmp.path().join("occupied");
        fs::create_dir(&dest).expect("mkdir");
        fs::write(dest.join("keep.txt"), b"sentinel").expect("sentinel");

        write_atomic(&dest, b"new").expect_err("rename over a non-empty directory fails");
        assert_eq!(fs::read(dest.join("keep.txt")).expect("read"), b"sentinel");
        assert_eq!(file_names(tmp.path()), ["occupied"]);
    }

    #[test]
    fn read_bounded_refuses_large_files() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("in.xlsx");
        fs::write(&path, [7u8; 100]).expect("write");

        assert_eq!(read_bounded(&path, 100).expect("within limit").len(), 100);
        let err = read_bounded(&path, 99).expect_err("over limit");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn tagged_sibling_names() {
        assert_eq!(
            tagged_sibling("dir/book.xlsx", "e"),
            Some(PathBuf::from("dir/book_e.xlsx"))
        );
        assert_eq!(
            tagged_sibling("report.v2.docx", "d"),
            Some(PathBuf::from("report.v2_d.docx"))
        );
        assert_eq!(tagged_sibling("README", "e"), Some(PathBuf::from("README_e")));
        assert_eq!(tagged_sibling("..", "e"), None);
    }
}
