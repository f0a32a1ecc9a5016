pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Recognise an opening `$tag$` delimiter starting at `start`.
///
/// Returns the tag and the index of the delimiter's closing `$`.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    if bytes.get(idx).is_some_and(u8::is_ascii_digit) {
        // `$1` is a numbered placeholder, never a tag
        return None;
    }
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() && bytes[idx] == b'$' {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

/// Whether the closing `$tag$` delimiter starts at `idx`.
pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..=end].starts_with(tag.as_bytes())
        && bytes.get(end) == Some(&b'$')
}

fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier_part(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

/// End index (exclusive) of the marker name starting at `start`; equals `start` when no name
/// begins there. Trailing dots are not part of the name.
pub(super) fn scan_identifier(bytes: &[u8], start: usize) -> usize {
    if !bytes.get(start).copied().is_some_and(is_identifier_start) {
        return start;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && is_identifier_part(bytes[idx]) {
        idx += 1;
    }
    while idx > start + 1 && bytes[idx - 1] == b'.' {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_quote_tags() {
        assert_eq!(
            try_start_dollar_quote(b"$fn$ body $fn$", 0),
            Some(("fn".to_string(), 3))
        );
        assert_eq!(try_start_dollar_quote(b"$$", 0), Some((String::new(), 1)));
        assert_eq!(try_start_dollar_quote(b"$1$", 0), None);
        assert_eq!(try_start_dollar_quote(b"$a b$", 0), None);
        assert!(matches_tag(b"x $fn$", 2, "fn"));
        assert!(!matches_tag(b"x $fn", 2, "fn"));
    }

    #[test]
    fn identifiers_stop_at_trailing_dot() {
        let sql = b":p.name. and";
        assert_eq!(scan_identifier(sql, 1), 7);
        assert_eq!(scan_identifier(b": x", 1), 1);
    }
}
