//! Scratch directory helpers.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tempfile::TempDir;

const SCRATCH_DIR_NAME: &str = ".depot_scratch";

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for ancestor in manifest_dir.ancestors() {
        if ancestor.join("Cargo.lock").is_file() {
            return ancestor.to_path_buf();
        }
    }
    manifest_dir
}

/// Directory under the workspace target area that holds test scratch space.
///
/// # Errors
///
/// Returns an error when the scratch directory cannot be created.
pub fn scratch_root() -> Result<PathBuf> {
    let root = workspace_root().join("target").join(SCRATCH_DIR_NAME);
    fs::create_dir_all(&root)?;
    Ok(root)
}

/// Create a uniquely named temporary directory that is removed on drop.
///
/// # Errors
///
/// Returns an error when the directory cannot be created.
pub fn temp_dir(prefix: &str) -> Result<TempDir> {
    Ok(tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(scratch_root()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dirs_are_unique_and_removed_on_drop() -> Result<()> {
        let first = temp_dir("depot-fixture-")?;
        let second = temp_dir("depot-fixture-")?;
        assert_ne!(first.path(), second.path());

        let kept = first.path().to_path_buf();
        drop(first);
        assert!(!kept.exists());
        Ok(())
    }
}
