//! Repository walk with gitignore-style pruning and content checksums.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::Result;
use crate::languages::is_indexable;
use crate::unit::FileRecord;

/// Project-specific ignore file read alongside `.gitignore`.
pub const IGNORE_FILE: &str = ".repodexignore";

const CHUNK_SIZE: usize = 64 * 1024;

/// Compiled ignore matcher for one repository root.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    matcher: Arc<Gitignore>,
}

impl IgnoreRules {
    /// Build rules from `<root>/.gitignore`, `<root>/.repodexignore` (both
    /// optional) and additional patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if an ignore file exists but cannot be read, or a
    /// pattern is malformed.
    pub fn load(root: &Path, extra_patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for name in [".gitignore", IGNORE_FILE] {
            let path = root.join(name);
            if path.is_file()
                && let Some(err) = builder.add(&path)
            {
                return Err(err.into());
            }
        }
        for pattern in extra_patterns {
            builder.add_line(None, pattern)?;
        }
        Ok(Self {
            matcher: Arc::new(builder.build()?),
        })
    }

    /// Rules that ignore nothing except hidden directories.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            matcher: Arc::new(Gitignore::empty()),
        }
    }

    #[must_use]
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }
}

/// BLAKE3 digest of a file, hex-encoded, computed over fixed-size reads.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Checksum of zero bytes. Files with this checksum have nothing to index.
#[must_use]
pub fn empty_checksum() -> String {
    blake3::hash(b"").to_hex().to_string()
}

/// Walk `root` and fingerprint every file with a supported language.
///
/// Ignored entries and hidden directories are filtered before descent, so
/// their subtrees are never read. Records come back sorted by relative path
/// with `/` separators and no units.
///
/// # Errors
///
/// Returns an error only if `root` itself cannot be walked; unreadable
/// entries below it are logged and skipped.
pub fn scan(root: &Path, rules: &IgnoreRules) -> Result<Vec<FileRecord>> {
    if !root.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", root.display()),
        )
        .into());
    }

    let filter_rules = rules.clone();
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if is_dir && entry.file_name().to_string_lossy().starts_with('.') {
                return false;
            }
            !filter_rules.is_ignored(entry.path(), is_dir)
        })
        .build();

    let mut records = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) || !is_indexable(entry.path()) {
            continue;
        }

        let Some(rel) = relative_path(root, entry.path()) else {
            continue;
        };
        match file_checksum(entry.path()) {
            Ok(checksum) => records.push(FileRecord::new(rel, checksum)),
            Err(e) => tracing::warn!(file = %rel, "failed to checksum: {e:#}"),
        }
    }

    records.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    tracing::debug!(files = records.len(), root = %root.display(), "scan complete");
    Ok(records)
}

/// `path` relative to `root`, joined with `/` regardless of platform.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
