//! Persisted filename selection and path sanitization.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use mime::Mime;

type CustomFilename = dyn Fn(&str, &str, &Mime) -> Option<String> + Send + Sync;

/// Strategy used to derive the persisted name of an uploaded file.
#[derive(Clone, Default)]
pub enum FilenameStrategy {
    /// Deterministic non-cryptographic hash of the original filename.
    #[default]
    Hash,
    /// Every file is stored under the same literal name.
    Fixed(String),
    /// Caller-supplied function of `(original name, field name, mime type)`.
    ///
    /// Returning `None` or an empty string keeps the original filename.
    Custom(Arc<CustomFilename>),
}

impl FilenameStrategy {
    /// Builds a [`FilenameStrategy::Custom`] from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &Mime) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Computes the unsanitized persisted name for a file part.
    pub fn name(&self, original_name: &str, field_name: &str, mime: &Mime) -> String {
        let name = match self {
            Self::Hash => return hash_filename(original_name),
            Self::Fixed(name) => name.clone(),
            Self::Custom(f) => f(original_name, field_name, mime)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| original_name.to_owned()),
        };

        if name.is_empty() {
            hash_filename(original_name)
        } else {
            name
        }
    }
}

impl fmt::Debug for FilenameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => f.write_str("Hash"),
            Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Hashes an original filename into a stable 16 hex digit name.
///
/// Not collision-proof and not a security control.
pub fn hash_filename(original_name: &str) -> String {
    format!("{:016x}", fxhash::hash64(original_name))
}

/// Splits a resolved name into a directory under `base` and a bare filename.
///
/// Separators (`/` and `\`) introduce subdirectories; `.` and empty segments
/// are dropped and `..` never climbs above `base`. Characters that are unsafe
/// in filenames are removed from every segment. When nothing usable remains
/// the hash of `fallback` becomes the filename.
pub fn resolve_target(base: &Path, name: &str, fallback: &str) -> (PathBuf, String) {
    let (segments, file_name) = split_segments(name);
    let file_name = file_name.unwrap_or_else(|| hash_filename(fallback));

    let mut directory = base.to_path_buf();
    for segment in segments {
        directory.push(segment);
    }
    (directory, file_name)
}

/// Removes path separators, traversal sequences and unsafe characters from a
/// single filename component.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !is_reserved_char(*c))
        .collect();

    let mut out = cleaned;
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out.trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_owned()
}

fn split_segments(name: &str) -> (Vec<String>, Option<String>) {
    let mut stack: Vec<String> = Vec::new();
    for raw in name.split(['/', '\\']) {
        match raw.trim() {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            segment => {
                let clean = sanitize_filename(segment);
                if !clean.is_empty() {
                    stack.push(clean);
                }
            }
        }
    }

    let last = stack.pop();
    (stack, last)
}

fn is_reserved_char(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}
