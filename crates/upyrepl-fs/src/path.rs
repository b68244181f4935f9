//! Remote path handling.
//!
//! Every path that ends up in generated source goes through [`quote_path`].
//! The result is a single-quoted Python literal that evaluates back to exactly
//! the input, whatever characters it contains, so a path can never close the
//! literal early or smuggle a protocol control byte into the command.

use crate::{FsError, FsResult};

/// Render `path` as a single-quoted Python string literal.
///
/// Empty paths are rejected.
pub fn quote_path(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty",
        });
    }
    Ok(quote_str(path))
}

/// Render any text as a single-quoted Python string literal.
pub fn quote_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render raw bytes as a bytes literal with every byte hex-escaped.
pub fn bytes_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 3);
    out.push_str("b'");
    for b in bytes {
        out.push_str(&format!("\\x{:02X}", b));
    }
    out.push('\'');
    out
}

/// Join a remote directory and an entry name with exactly one separator.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
