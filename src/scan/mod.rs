//! Directory scanning
//!
//! Enumerates the files of a local resource that are eligible for indexing:
//! - `.git/` and everything matched by the root `.gitignore` is excluded
//! - files tagged `filter=git-crypt` are excluded when git is available
//! - a fixed table of binary extensions is always excluded

mod crypt;

pub use crypt::git_crypt_files;

use crate::config::ScanConfig;
use crate::error::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions that are never indexed
const BINARY_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "exr", "hdr", "svg", "psd", "ai",
    "eps",
    // Audio/Video
    "mp3", "wav", "mp4", "avi", "mov", "webm", "flac", "ogg", "m4a", "aac", "wma", "flv", "mkv",
    "wmv",
    // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt",
    // Archives
    "zip", "tar", "gz", "7z", "rar", "iso", "dmg", "pkg", "deb", "rpm", "msi", "apk", "xz", "bz2",
    // Compiled
    "exe", "dll", "so", "dylib", "class", "pyc", "o", "obj", "lib", "a", "out", "app", "jar",
    // Fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // Other
    "bin", "dat", "db", "sqlite",
];

/// Check if a file has a binary extension (or is a Finder metadata file)
pub fn is_binary_file(path: &Path) -> bool {
    if path.file_name().and_then(|n| n.to_str()) == Some(".DS_Store") {
        return true;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// Combined ignore rules of one root directory
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
    crypt_files: HashSet<PathBuf>,
}

impl IgnoreRules {
    /// Build the rules for `root` from `.git/`, the root `.gitignore`, and
    /// git-crypt tagged files
    pub fn load(root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        builder
            .add_line(None, ".git/")
            .map_err(|e| Error::Other(format!("Invalid ignore pattern: {}", e)))?;

        let gitignore = root.join(".gitignore");
        if gitignore.is_file() {
            if let Some(e) = builder.add(&gitignore) {
                warn!("Problem reading {:?}: {}", gitignore, e);
            }
        }

        let matcher = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to build ignore rules: {}", e)))?;

        let crypt_files = match git_crypt_files(root) {
            Ok(files) => files.into_iter().collect(),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("git command not found, git-crypt files will not be excluded");
                HashSet::new()
            }
            Err(e) => {
                warn!("Error getting git-crypt files: {}", e);
                HashSet::new()
            }
        };

        Ok(Self {
            root: root.to_path_buf(),
            matcher,
            crypt_files,
        })
    }

    /// Whether `path` (absolute under the root, or root-relative) is excluded
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let rel = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => return false,
            }
        } else {
            path
        };

        if rel.as_os_str().is_empty() {
            return false;
        }

        self.crypt_files.contains(rel)
            || self
                .matcher
                .matched_path_or_any_parents(rel, is_dir)
                .is_ignore()
    }
}

/// Enumerates eligible files under a root
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    allowed_extensions: HashSet<String>,
}

impl DirectoryScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Whether the extension filter admits `path`
    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.allowed_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// Extension-only checks; no ignore rules needed
    pub fn is_candidate(&self, path: &Path) -> bool {
        !is_binary_file(path) && self.is_allowed_extension(path)
    }

    /// Whether a single file should reach the pipeline
    pub fn is_eligible(&self, rules: &IgnoreRules, path: &Path) -> bool {
        self.is_candidate(path) && !rules.is_ignored(path, false)
    }

    /// Scan `root` and return sorted, deduplicated absolute file paths
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let root = root.canonicalize()?;
        let rules = IgnoreRules::load(&root)?;
        info!("Scanning directory: {:?}", root);

        let mut files = BTreeSet::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !rules.is_ignored(entry.path(), entry.file_type().is_dir())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if is_binary_file(path) {
                debug!("Skipping binary file: {:?}", path);
                continue;
            }
            if !self.is_allowed_extension(path) {
                debug!("Skipping unsupported extension: {:?}", path);
                continue;
            }
            files.insert(path.to_path_buf());
        }

        info!("Found {} eligible files under {:?}", files.len(), root);
        Ok(files.into_iter().collect())
    }
}
