//! Parsing of a printed `repr()` of a list of names.
//!
//! The device quotes each name itself, so leading/trailing whitespace, line
//! breaks and control bytes in names come back exactly as stored.

use std::iter::Peekable;
use std::str::Chars;

use crate::{FsError, FsResult};

/// Parse output such as `['a.py', " it's", 'x\n']` into the listed names.
pub(crate) fn parse_names(printed: &str) -> FsResult<Vec<String>> {
    let malformed = || FsError::MalformedListing(printed.to_string());
    let mut chars = printed.trim().chars().peekable();
    if chars.next() != Some('[') {
        return Err(malformed());
    }

    let mut names = Vec::new();
    loop {
        skip_spaces(&mut chars);
        match chars.next() {
            Some(']') if names.is_empty() => break,
            Some(quote @ ('\'' | '"')) => names.push(parse_quoted(&mut chars, quote).ok_or_else(malformed)?),
            _ => return Err(malformed()),
        }
        skip_spaces(&mut chars);
        match chars.next() {
            Some(',') => continue,
            Some(']') => break,
            _ => return Err(malformed()),
        }
    }

    if chars.next().is_some() {
        return Err(malformed());
    }
    Ok(names)
}

fn skip_spaces(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek() == Some(&' ') {
        chars.next();
    }
}

/// Read a string body up to the closing `quote`, resolving escapes.
fn parse_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Option<String> {
    let mut out = String::new();
    loop {
        match chars.next()? {
            c if c == quote => return Some(out),
            '\\' => {
                let c = match chars.next()? {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '0' => '\0',
                    'x' => hex_char(chars, 2)?,
                    'u' => hex_char(chars, 4)?,
                    'U' => hex_char(chars, 8)?,
                    c @ ('\\' | '\'' | '"') => c,
                    _ => return None,
                };
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn hex_char(chars: &mut Peekable<Chars<'_>>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list() {
        assert!(parse_names("[]").unwrap().is_empty());
    }

    #[test]
    fn test_plain_names_keep_order() {
        assert_eq!(parse_names("['zeta', 'alpha']\r\n").unwrap(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_whitespace_is_kept() {
        assert_eq!(
            parse_names("[' padded.py', 'tail.py ', 'plain.py']").unwrap(),
            vec![" padded.py", "tail.py ", "plain.py"]
        );
    }

    #[test]
    fn test_escapes_and_quote_styles() {
        assert_eq!(
            parse_names(r#"["it's", 'a\nb', 'back\\slash', '\x04\x7f', 'q\'"']"#).unwrap(),
            vec!["it's", "a\nb", "back\\slash", "\u{4}\u{7f}", "q'\""]
        );
    }

    #[test]
    fn test_unicode_passes_through() {
        assert_eq!(parse_names("['caf\u{e9}.py', '\\u00e9']").unwrap(), vec!["café.py", "é"]);
    }

    #[test]
    fn test_rejects_garbage() {
        for text in ["", "a.py\nb.py", "['open", "['a' 'b']", "['a'] x", "[,]"] {
            assert!(
                matches!(parse_names(text), Err(FsError::MalformedListing(_))),
                "accepted {:?}",
                text
            );
        }
    }
}
