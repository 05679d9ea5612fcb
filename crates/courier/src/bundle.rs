//! Book bundles
//!
//! Packaging a book into a transferable bundle is not this crate's job; it
//! only needs *a* bundle file for a book, which the [`BundleProducer`] seam
//! provides. [`PrebuiltBundleProducer`] stages an already packaged
//! `.bloompub` file, which is what the command line tool delivers.

use common::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of a packaged book
pub const BUNDLE_EXTENSION: &str = ".bloompub";

/// A book offered to reader devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub title: String,
    /// Language code of the title
    pub language: String,
    /// Where the producer finds the book's content
    pub bundle_source: PathBuf,
}

impl Book {
    /// Describe a prebuilt bundle file; the title defaults to the file stem
    pub fn from_bundle_path(path: &Path, title: Option<String>, language: &str) -> Self {
        let title = title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Self {
            title,
            language: language.to_string(),
            bundle_source: path.to_path_buf(),
        }
    }

    /// Name the bundle file has on the device
    pub fn bundle_file_name(&self) -> String {
        format!("{}{}", sanitize_file_name(&self.title), BUNDLE_EXTENSION)
    }
}

/// A materialized bundle ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub path: PathBuf,
    /// File name to use on the receiving side
    pub file_name: String,
    pub size_bytes: u64,
    /// Version code advertised to readers
    pub version: String,
}

/// Produces the bundle file for a book
///
/// Called synchronously from a background thread.
pub trait BundleProducer: Send + Sync {
    fn produce(&self, book: &Book, output_dir: &Path) -> Result<Bundle>;
}

/// Stages a prebuilt bundle file into the output directory
#[derive(Debug, Default, Clone, Copy)]
pub struct PrebuiltBundleProducer;

impl BundleProducer for PrebuiltBundleProducer {
    fn produce(&self, book: &Book, output_dir: &Path) -> Result<Bundle> {
        if !book.bundle_source.is_file() {
            return Err(Error::Bundle(format!(
                "Bundle file not found: {}",
                book.bundle_source.display()
            )));
        }

        fs::create_dir_all(output_dir)?;
        let file_name = book.bundle_file_name();
        let dest = output_dir.join(&file_name);
        if dest != book.bundle_source {
            fs::copy(&book.bundle_source, &dest)?;
        }

        let size_bytes = fs::metadata(&dest)?.len();
        let version = version_code(&dest)?;
        debug!(
            "Staged bundle {} ({} bytes, version {})",
            dest.display(),
            size_bytes,
            version
        );

        Ok(Bundle {
            path: dest,
            file_name,
            size_bytes,
            version,
        })
    }
}

/// Replace characters that are not allowed in file names on common platforms
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "book".to_string()
    } else {
        trimmed.to_string()
    }
}

/// CRC-32 of the file contents, as 8 lowercase hex digits
pub fn version_code(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:08x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("A/B: the \"story\""), "A B  the  story");
        assert_eq!(sanitize_file_name("Trailing dots..."), "Trailing dots");
        assert_eq!(sanitize_file_name("  "), "book");
        assert_eq!(sanitize_file_name("Ñandú"), "Ñandú");
    }

    #[test]
    fn test_version_code_tracks_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"one").unwrap();
        fs::write(&b, b"two").unwrap();

        let va = version_code(&a).unwrap();
        assert_eq!(va.len(), 8);
        assert_eq!(va, version_code(&a).unwrap());
        assert_ne!(va, version_code(&b).unwrap());
    }

    #[test]
    fn test_prebuilt_producer_stages_copy() {
        let src_dir = tempdir().unwrap();
        let out_dir = tempdir().unwrap();
        let source = src_dir.path().join("goat.bloompub");
        fs::write(&source, vec![7u8; 1500]).unwrap();

        let book = Book::from_bundle_path(&source, Some("The Goat?".to_string()), "en");
        let bundle = PrebuiltBundleProducer.produce(&book, out_dir.path()).unwrap();

        assert_eq!(bundle.file_name, "The Goat.bloompub");
        assert_eq!(bundle.size_bytes, 1500);
        assert_eq!(bundle.path, out_dir.path().join("The Goat.bloompub"));
        assert!(bundle.path.exists());
    }

    #[test]
    fn test_prebuilt_producer_missing_source() {
        let out_dir = tempdir().unwrap();
        let book = Book::from_bundle_path(Path::new("/nonexistent/x.bloompub"), None, "en");

        let err = PrebuiltBundleProducer.produce(&book, out_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Bundle(_)));
        assert_eq!(book.title, "x");
    }
}
