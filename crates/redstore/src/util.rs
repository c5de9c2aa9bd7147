//! Small helpers shared across engines: glob matching, strict numeric
//! parsing and the wall clock the versioning scheme leans on.

use crate::error::{StoreError, StoreResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Microseconds since the Unix epoch, for latency measurements.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Glob match supporting `*`, `?`, `[...]` (with `^` negation and ranges)
/// and `\` escapes, over raw bytes.
pub fn string_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match(pattern, text, false)
}

fn glob_match(mut pattern: &[u8], mut text: &[u8], nocase: bool) -> bool {
    while let Some(&p) = pattern.first() {
        match p {
            b'*' => {
                while pattern.get(1) == Some(&b'*') {
                    pattern = &pattern[1..];
                }
                if pattern.len() == 1 {
                    return true;
                }
                while !text.is_empty() {
                    if glob_match(&pattern[1..], text, nocase) {
                        return true;
                    }
                    text = &text[1..];
                }
                return glob_match(&pattern[1..], text, nocase);
            }
            b'?' => {
                if text.is_empty() {
                    return false;
                }
                text = &text[1..];
                pattern = &pattern[1..];
            }
            b'[' => {
                if text.is_empty() {
                    return false;
                }
                let mut rest = &pattern[1..];
                let negate = rest.first() == Some(&b'^');
                if negate {
                    rest = &rest[1..];
                }
                let mut matched = false;
                loop {
                    match rest.first() {
                        None => break,
                        Some(b']') => {
                            rest = &rest[1..];
                            break;
                        }
                        Some(&b'\\') if rest.len() >= 2 => {
                            if rest[1] == text[0] {
                                matched = true;
                            }
                            rest = &rest[2..];
                        }
                        Some(&start) if rest.get(1) == Some(&b'-') && rest.len() >= 3 => {
                            let end = rest[2];
                            let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                            if text[0] >= lo && text[0] <= hi {
                                matched = true;
                            }
                            rest = &rest[3..];
                        }
                        Some(&c) => {
                            if c == text[0] {
                                matched = true;
                            }
                            rest = &rest[1..];
                        }
                    }
                }
                if matched == negate {
                    return false;
                }
                text = &text[1..];
                pattern = rest;
            }
            b'\\' if pattern.len() >= 2 => {
                if text.first() != Some(&pattern[1]) {
                    return false;
                }
                text = &text[1..];
                pattern = &pattern[2..];
            }
            _ => {
                if text.first() != Some(&p) {
                    return false;
                }
                text = &text[1..];
                pattern = &pattern[1..];
            }
        }
    }
    text.is_empty()
}

/// True when the pattern is a pure prefix scan (`prefix*` with no other
/// metacharacters), which lets SCAN seek straight to the prefix.
pub fn is_tail_wildcard(pattern: &[u8]) -> bool {
    pattern.len() >= 2
        && pattern.last() == Some(&b'*')
        && pattern[..pattern.len() - 1]
            .iter()
            .all(|&c| c != b'*' && c != b'?' && c != b'[' && c != b'\\')
}

/// Strict decimal i64 parse: optional sign, digits only, full string.
pub fn parse_i64_strict(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) || (s.len() > 2 && s.starts_with("-0")) {
        // reject leading zeros the way redis does, but allow "0" and "-0"
        if !(s == "0" || s == "-0") {
            return None;
        }
    }
    s.parse::<i64>().ok()
}

/// Strict finite f64 parse; rejects empty, NaN and trailing garbage.
pub fn parse_f64_strict(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?.trim();
    if s.is_empty() {
        return None;
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_nan() {
        return None;
    }
    Some(v)
}

/// Format a float the INCRBYFLOAT way: fixed precision, trailing zeros
/// trimmed, never scientific notation.
pub fn format_f64(value: f64) -> String {
    let mut s = format!("{:.17}", value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Smallest byte string greater than every string starting with
/// `prefix`; None when the prefix is all 0xff. Used to position reverse
/// iterators just past a prefix region.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last == 0xff {
            out.pop();
        } else {
            *last += 1;
            return Some(out);
        }
    }
    None
}

/// Checked i64 addition mapped to the stable overflow message.
pub fn checked_incr(current: i64, by: i64) -> StoreResult<i64> {
    current
        .checked_add(by)
        .ok_or_else(|| StoreError::InvalidArgument("increment or decrement would overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_basics() {
        assert!(string_match(b"*", b"anything"));
        assert!(string_match(b"h?llo", b"hello"));
        assert!(string_match(b"h[ae]llo", b"hallo"));
        assert!(string_match(b"h[^e]llo", b"hallo"));
        assert!(!string_match(b"h[^e]llo", b"hello"));
        assert!(string_match(b"h[a-c]llo", b"hbllo"));
        assert!(string_match(b"key:*", b"key:1"));
        assert!(!string_match(b"key:*", b"other"));
        assert!(string_match(b"", b""));
        assert!(!string_match(b"", b"x"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(is_tail_wildcard(b"user:*"));
        assert!(!is_tail_wildcard(b"*"));
        assert!(!is_tail_wildcard(b"user:?*"));
        assert!(!is_tail_wildcard(b"user"));
    }

    #[test]
    fn test_parse_i64_strict() {
        assert_eq!(parse_i64_strict(b"42"), Some(42));
        assert_eq!(parse_i64_strict(b"-7"), Some(-7));
        assert_eq!(parse_i64_strict(b"0"), Some(0));
        assert_eq!(parse_i64_strict(b"007"), None);
        assert_eq!(parse_i64_strict(b"1.5"), None);
        assert_eq!(parse_i64_strict(b""), None);
        assert_eq!(parse_i64_strict(b"12abc"), None);
    }

    #[test]
    fn test_format_f64_trims() {
        assert_eq!(format_f64(10.5), "10.5");
        assert_eq!(format_f64(3.0), "3");
        assert_eq!(format_f64(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_successor(b"ab\xff"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(b"\xff\xff"), None);
    }

    #[test]
    fn test_checked_incr_overflow() {
        assert_eq!(checked_incr(1, 2).unwrap(), 3);
        let err = checked_incr(i64::MAX, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument: increment or decrement would overflow"
        );
    }
}
