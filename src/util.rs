//! Rename helpers that fall back to copy-then-delete when an atomic rename
//! is refused (e.g. crossing a filesystem boundary).

use std::fs;
use std::path::Path;

use crate::error::{CdnError, Result};

pub(crate) fn rename_file_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|e| CdnError::io(dst, e))?;
    fs::remove_file(src).map_err(|e| CdnError::io(src, e))?;
    Ok(())
}

pub(crate) fn rename_dir_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_dir_recursive(src, dst)?;
    fs::remove_dir_all(src).map_err(|e| CdnError::io(src, e))?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| CdnError::io(dst, e))?;
    for entry in fs::read_dir(src).map_err(|e| CdnError::io(src, e))? {
        let entry = entry.map_err(|e| CdnError::io(src, e))?;
        let file_type = entry.file_type().map_err(|e| CdnError::io(entry.path(), e))?;
        let to = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &to)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|e| CdnError::io(entry.path(), e))?;
            std::os::unix::fs::symlink(&target, &to).map_err(|e| CdnError::io(&to, e))?;
        } else {
            fs::copy(entry.path(), &to).map_err(|e| CdnError::io(&to, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_file_or_copy_moves_within_same_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"hello").unwrap();
        rename_file_or_copy(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn rename_dir_or_copy_moves_a_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/file.txt"), b"x").unwrap();
        let dst = dir.path().join("dst");
        rename_dir_or_copy(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("nested/file.txt")).unwrap(), b"x");
    }
}
