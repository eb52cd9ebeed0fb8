use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// @module: File and directory utilities

/// A harvested record sidecar and the document file it describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestPair {
    /// `<name>.json` holding the source record
    pub record_path: PathBuf,
    /// `<name>.<ext>` holding the document body
    pub file_path: PathBuf,
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    /// Find files with a specific extension in a directory, sorted by path
    pub fn find_files<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        let normalized_ext = extension.trim_start_matches('.');

        for entry in WalkDir::new(dir.as_ref()).follow_links(true).sort_by_file_name() {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension() {
                    if ext.to_string_lossy().eq_ignore_ascii_case(normalized_ext) {
                        result.push(path.to_path_buf());
                    }
                }
            }
        }

        Ok(result)
    }

    /// Pair every `<name>.json` with the non-JSON file of the same stem in the
    /// same directory; records without a file are skipped
    pub fn find_harvest_pairs<P: AsRef<Path>>(dir: P) -> Result<Vec<HarvestPair>> {
        let mut pairs = Vec::new();

        for record_path in Self::find_files(dir, "json")? {
            let (Some(parent), Some(stem)) = (record_path.parent(), record_path.file_stem())
            else {
                continue;
            };

            let mut candidates: Vec<PathBuf> = fs::read_dir(parent)
                .with_context(|| format!("Failed to list directory: {:?}", parent))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path.file_stem() == Some(stem)
                        && path
                            .extension()
                            .is_some_and(|ext| !ext.eq_ignore_ascii_case("json"))
                })
                .collect();
            candidates.sort();

            if let Some(file_path) = candidates.into_iter().next() {
                pairs.push(HarvestPair {
                    record_path,
                    file_path,
                });
            } else {
                log::warn!("No document file next to record {:?}, skipping", record_path);
            }
        }

        Ok(pairs)
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Read a file to bytes
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        fs::read(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }
}
