use crate::version::VersionToken;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Default Xilinx install location; each release lives in a `<year>.<n>` directory below it.
pub const DEFAULT_INSTALL_ROOT: &str = r"C:\Xilinx\Vivado";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Vivado installation directory not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("failed to list {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Installed versions under `root`, newest first.
///
/// Only immediate child directories whose names are version tokens count;
/// entries that cannot be inspected are skipped.
pub fn list_available_versions(root: &Path) -> Result<Vec<VersionToken>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }

    let mut versions = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ScanError::Read {
                    path: root.to_path_buf(),
                    source: err,
                })
            }
            Err(_) => continue,
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(version) = VersionToken::parse(name) {
            versions.push(version);
        }
    }

    versions.sort_by(|a, b| b.cmp(a));
    Ok(versions)
}
