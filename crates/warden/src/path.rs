//! Lexical path canonicalization relative to a fixed root.
//!
//! Every path the guard sees is reduced to a normalized string before any
//! policy lookup:
//!
//! - paths under the root become root-relative (`src/main.rs`), the root
//!   itself is `""`;
//! - paths outside the root stay absolute (`/etc/passwd`, `C:/Windows`).
//!
//! Normalization is purely lexical. `.` and `..` are resolved on the string,
//! the path does not have to exist, and symbolic links are not followed.

use std::io;
use std::path::{Path, PathBuf};

/// A path reduced to its comparison form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalPath {
    key: String,
    within_root: bool,
}

impl CanonicalPath {
    /// Wrap an already-normalized policy key.
    ///
    /// Keys starting with `/` or a drive prefix are treated as lying outside
    /// the root; everything else as root-relative.
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let within_root = !is_absolute_key(&key);
        Self { key, within_root }
    }

    /// The normalized form.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Whether the path lies under the root.
    pub fn is_within_root(&self) -> bool {
        self.within_root
    }

    /// The path followed by each of its ancestors, most specific first.
    ///
    /// For a root-relative path the chain ends at the root (`""`); for an
    /// absolute path it ends at the filesystem root.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        std::iter::successors(Some(self.key.as_str()), |&key| parent_key(key))
    }
}

impl std::fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Normalizes paths relative to a fixed root directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canonicalizer {
    root: PathBuf,
    prefix: String,
    segments: Vec<String>,
}

impl Canonicalizer {
    /// Create a canonicalizer rooted at `root`.
    ///
    /// A relative root is made absolute against the process working
    /// directory. The root does not need to exist.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let absolute = std::path::absolute(root.as_ref())?;
        let text = to_slashes(&absolute);
        let (prefix, segments) = split_lexical(&text);
        let prefix = prefix.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("root {} is not absolute", absolute.display()),
            )
        })?;
        let segments: Vec<String> = segments.into_iter().map(str::to_string).collect();

        let mut root = PathBuf::from(&prefix);
        root.extend(&segments);

        Ok(Self {
            root,
            prefix,
            segments,
        })
    }

    /// Create a canonicalizer rooted at the process working directory.
    pub fn current_dir() -> io::Result<Self> {
        Self::new(std::env::current_dir()?)
    }

    /// The absolute, lexically normalized root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reduce `path` to its comparison form.
    pub fn canonicalize(&self, path: impl AsRef<Path>) -> CanonicalPath {
        let text = to_slashes(path.as_ref());
        let (prefix, segments) = split_lexical(&text);

        let (prefix, segments) = match prefix {
            Some(prefix) => (prefix, segments),
            None => {
                let mut joined: Vec<&str> = self.segments.iter().map(String::as_str).collect();
                for segment in segments {
                    if segment == ".." {
                        joined.pop();
                    } else {
                        joined.push(segment);
                    }
                }
                (self.prefix.clone(), joined)
            }
        };

        if prefix.eq_ignore_ascii_case(&self.prefix)
            && segments.len() >= self.segments.len()
            && segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| *a == b.as_str())
        {
            return CanonicalPath {
                key: segments[self.segments.len()..].join("/"),
                within_root: true,
            };
        }

        CanonicalPath {
            key: format!("{prefix}{}", segments.join("/")),
            within_root: false,
        }
    }

    /// Normalize a policy key against this root.
    ///
    /// Unlike [`normalize_key`], absolute keys that point inside the root
    /// are rebased to root-relative form and leading `..` segments are
    /// resolved against the root.
    pub fn normalize_key(&self, raw: &str) -> String {
        self.canonicalize(raw.trim()).key
    }
}

/// Normalize a policy key without knowledge of the root.
///
/// Separators become `/`, `.` and `..` are resolved lexically, and trailing
/// slashes are removed. Relative keys stay relative; a leading `..` that
/// would climb above the root is kept verbatim so that the key can never
/// match a path inside the root.
pub fn normalize_key(raw: &str) -> String {
    let text = raw.trim().replace('\\', "/");
    let (prefix, segments) = split_lexical(&text);
    format!("{}{}", prefix.unwrap_or_default(), segments.join("/"))
}

/// Returns true if a normalized key names an absolute location.
pub(crate) fn is_absolute_key(key: &str) -> bool {
    key.starts_with('/') || drive_prefix(key).is_some()
}

fn to_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Length of a `C:` style drive prefix, if present.
fn drive_prefix(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':').then_some(2)
}

/// Split a slash-separated path into its absolute prefix (if any) and its
/// lexically resolved segments.
///
/// For absolute paths `..` never climbs above the prefix. For relative paths
/// leading `..` segments are preserved for the caller to interpret.
fn split_lexical(text: &str) -> (Option<String>, Vec<&str>) {
    let (prefix, rest) = if let Some(len) = drive_prefix(text) {
        (Some(format!("{}/", &text[..len])), &text[len..])
    } else if text.starts_with('/') {
        (Some("/".to_string()), text)
    } else {
        (None, text)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if prefix.is_none() {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    (prefix, segments)
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    match key.rfind('/') {
        None => Some(""),
        Some(idx) if idx + 1 == key.len() => None,
        Some(idx) => {
            let head = &key[..idx];
            if head.is_empty() || head.ends_with(':') {
                Some(&key[..=idx])
            } else {
                Some(head)
            }
        }
    }
}
