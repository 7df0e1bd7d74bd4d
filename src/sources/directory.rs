//! Local directory backend.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::is_supported_image;

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    recursive: bool,
}

impl DirectorySource {
    pub fn new(path: &Path, recursive: bool) -> Self {
        // canonical form keeps the source identity stable across working dirs
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self { root, recursive }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Image files under the root, sorted for a deterministic playlist.
    pub fn enumerate(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            bail!("invalid photo directory: {}", self.root.display());
        }

        let mut wd = WalkDir::new(&self.root).follow_links(true);
        if !self.recursive {
            wd = wd.max_depth(1);
        }

        let mut out = Vec::new();
        for entry in wd.into_iter().filter_entry(|e| !should_skip_dir(e)) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping unreadable entry: {err}");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_file() && is_supported_image(path) {
                out.push(path.to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 {
        return false;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_images_flat_or_recursive() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.jpg"), b"x").unwrap();
        fs::write(root.join("a.png"), b"x").unwrap();
        fs::write(root.join("c.txt"), b"x").unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("d.jpeg"), b"x").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("e.jpg"), b"x").unwrap();

        let flat = DirectorySource::new(root, false).enumerate().unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| Path::new(p).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg"]);

        let deep = DirectorySource::new(root, true).enumerate().unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.iter().any(|p| p.ends_with("d.jpeg")));
        assert!(!deep.iter().any(|p| p.ends_with("e.jpg")));
    }

    #[test]
    fn missing_root_fails_the_whole_source() {
        let src = DirectorySource::new(Path::new("/no/such/birds"), true);
        assert!(src.enumerate().is_err());
    }
}
