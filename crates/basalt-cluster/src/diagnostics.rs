//! Working-directory snapshots for post-mortem inspection.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copies `src` into `dest`, creating directories as needed.
///
/// Used by `save_workdir` to archive node working directories (data, logs,
/// config-as-launched) outside the ephemeral root before teardown removes
/// them.
pub fn snapshot_dir(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_nested_tree() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("logs")).unwrap();
        fs::write(src.path().join("node.toml"), "role = \"master\"").unwrap();
        fs::write(src.path().join("logs/stdout.log"), "booted").unwrap();

        let dest = TempDir::new().unwrap();
        let target = dest.path().join("master-0");
        snapshot_dir(src.path(), &target).unwrap();

        assert_eq!(
            fs::read_to_string(target.join("node.toml")).unwrap(),
            "role = \"master\""
        );
        assert_eq!(
            fs::read_to_string(target.join("logs/stdout.log")).unwrap(),
            "booted"
        );
    }

    #[test]
    fn missing_source_is_an_error() {
        let dest = TempDir::new().unwrap();
        let result = snapshot_dir(Path::new("/nonexistent/workdir"), dest.path());
        assert!(result.is_err());
    }
}
