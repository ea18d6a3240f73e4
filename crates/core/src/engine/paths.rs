//! Destination path construction and filename sanitization.

use std::path::{Path, PathBuf};

/// Characters replaced before a filename touches the filesystem. Covers
/// path separators, Windows-reserved characters, and shell troublemakers.
const UNSAFE_CHARS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '$', '#', '@', '&', '%', '!', '`', '^',
    '(', ')', '{', '}', '[', ']', '=', '+', '~', ',', ';',
];

/// Sanitize a filename for safe filesystem usage.
///
/// Unsafe characters and whitespace become underscores; leading and
/// trailing dots go away, which also kills `..` traversal. An empty
/// result becomes "unnamed".
pub fn sanitize_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() || c == ' ' {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == '.' || c == '_' || c == ' ');

    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Final destination for a descriptor: `<root>/<source>/<sanitized name>`.
pub fn dest_path(root: &Path, source: &str, filename: &str) -> PathBuf {
    root.join(sanitize_filename(source))
        .join(sanitize_filename(filename))
}
