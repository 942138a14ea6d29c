//! Path rendering utilities.
//!
//! File names on Unix are arbitrary byte strings, so a path is not always
//! valid UTF-8 and may contain control characters that corrupt terminal or
//! log output. Nothing here changes how a path is stored or compared; these
//! functions only produce text for humans.
//!
//! # Example
//!
//! ```
//! use fileregistry::scanner::path_utils::{display_path, sanitize_for_filename};
//! use std::path::Path;
//!
//! assert_eq!(display_path(Path::new("/tmp/a\nb.txt")), "/tmp/a\\nb.txt");
//! assert_eq!(sanitize_for_filename("/mnt/My Photos"), "---mnt---My_Photos");
//! ```

use std::borrow::Cow;
use std::path::Path;

/// Render a path for logs and reports.
///
/// Invalid UTF-8 sequences become U+FFFD and control characters are escaped.
/// Paths that are already clean are borrowed without allocation.
#[must_use]
pub fn display_path(path: &Path) -> Cow<'_, str> {
    let lossy = path.to_string_lossy();
    if !lossy.chars().any(char::is_control) {
        return lossy;
    }

    let mut out = String::with_capacity(lossy.len() + 8);
    for c in lossy.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Check whether a path can be rendered as text without loss.
#[must_use]
pub fn is_representable(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|s| !s.chars().any(char::is_control))
}

/// Turn a scan root into a string usable inside a file name.
///
/// Spaces become `_`, separators become `---`, and anything that is not
/// alphanumeric, `_` or `-` is dropped.
#[must_use]
pub fn sanitize_for_filename(root: &str) -> String {
    root.replace(' ', "_")
        .replace(['/', '\\'], "---")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
