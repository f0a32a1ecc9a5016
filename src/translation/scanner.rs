use crate::error::SqlPipelineError;

use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, matches_tag,
    scan_identifier, try_start_dollar_quote,
};

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// Which sigils the scan recognises in unquoted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ScanMode {
    /// `:name`, `?`, and the escapes `\:` / `\?`.
    Markers,
    /// Only classify quoted text and comments; everything else is literal.
    Plain,
}

/// Whether `/* */` comments nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockComments {
    /// The first `*/` ends the comment, as in SQLite and most dialects.
    Flat,
    /// Each `/*` needs its own `*/`, as in PostgreSQL.
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TokenKind {
    Literal,
    Quoted,
    DoubleQuoted,
    DollarQuoted,
    Comment,
    /// Escaped sigil; `text` is the sigil without its backslash.
    Escaped,
    /// Named marker; `text` is the identifier without its sigil.
    Named,
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Token<'a> {
    pub(super) kind: TokenKind,
    pub(super) text: &'a str,
}

impl<'a> Token<'a> {
    fn new(kind: TokenKind, text: &'a str) -> Self {
        Self { kind, text }
    }
}

struct Tokens<'a> {
    sql: &'a str,
    out: Vec<Token<'a>>,
}

impl<'a> Tokens<'a> {
    fn literal(&mut self, start: usize, end: usize) {
        if end > start {
            self.out.push(Token::new(TokenKind::Literal, &self.sql[start..end]));
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.out.push(Token::new(kind, &self.sql[start..end]));
    }
}

/// Split `sql` into tokens with a single left-to-right pass.
///
/// # Errors
///
/// Returns `SqlPipelineError::MalformedTemplate` for an unterminated quote, comment, or
/// dollar-quoted block.
pub(super) fn tokenize(
    sql: &str,
    mode: ScanMode,
    comments: BlockComments,
) -> Result<Vec<Token<'_>>, SqlPipelineError> {
    let bytes = sql.as_bytes();
    let markers = mode == ScanMode::Markers;
    let mut tokens = Tokens {
        sql,
        out: Vec::new(),
    };
    let mut state = State::Normal;
    let mut start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    tokens.literal(start, idx);
                    start = idx;
                    state = State::SingleQuoted;
                }
                b'"' => {
                    tokens.literal(start, idx);
                    start = idx;
                    state = State::DoubleQuoted;
                }
                _ if is_line_comment_start(bytes, idx) => {
                    tokens.literal(start, idx);
                    start = idx;
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    tokens.literal(start, idx);
                    start = idx;
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, delimiter_end)) = try_start_dollar_quote(bytes, idx) {
                        tokens.literal(start, idx);
                        start = idx;
                        state = State::DollarQuoted(tag);
                        idx = delimiter_end;
                    }
                }
                b'\\' if markers && matches!(bytes.get(idx + 1), Some(b':' | b'?')) => {
                    tokens.literal(start, idx);
                    tokens.push(TokenKind::Escaped, idx + 1, idx + 2);
                    idx += 2;
                    start = idx;
                    continue;
                }
                b':' if markers => {
                    if bytes.get(idx + 1) == Some(&b':') {
                        // `::` cast operator stays literal
                        idx += 2;
                        continue;
                    }
                    let end = scan_identifier(bytes, idx + 1);
                    if end > idx + 1 {
                        tokens.literal(start, idx);
                        tokens.push(TokenKind::Named, idx + 1, end);
                        idx = end;
                        start = idx;
                        continue;
                    }
                }
                b'?' if markers => {
                    tokens.literal(start, idx);
                    tokens.push(TokenKind::Positional, idx, idx + 1);
                    idx += 1;
                    start = idx;
                    continue;
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        tokens.push(TokenKind::Quoted, start, idx + 1);
                        start = idx + 1;
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // skip escaped quote
                    } else {
                        tokens.push(TokenKind::DoubleQuoted, start, idx + 1);
                        start = idx + 1;
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    tokens.push(TokenKind::Comment, start, idx);
                    start = idx;
                    state = State::Normal;
                    continue;
                }
            }
            State::BlockComment(depth) => {
                if comments == BlockComments::Nested && is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    idx += 1;
                    if depth == 1 {
                        tokens.push(TokenKind::Comment, start, idx + 1);
                        start = idx + 1;
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    tokens.push(TokenKind::DollarQuoted, start, idx + 1);
                    start = idx + 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    let unterminated = |reason: &str| SqlPipelineError::MalformedTemplate {
        position: start,
        reason: reason.to_string(),
    };
    match state {
        State::Normal => tokens.literal(start, bytes.len()),
        State::LineComment => tokens.push(TokenKind::Comment, start, bytes.len()),
        State::SingleQuoted => return Err(unterminated("unterminated quoted text")),
        State::DoubleQuoted => return Err(unterminated("unterminated double-quoted text")),
        State::BlockComment(_) => return Err(unterminated("unterminated block comment")),
        State::DollarQuoted(_) => return Err(unterminated("unterminated dollar-quoted text")),
    }

    Ok(tokens.out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        tokenize(sql, ScanMode::Markers, BlockComments::Nested)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn classifies_markers_and_literals() {
        assert_eq!(
            kinds("select :a, ? from t"),
            vec![
                (TokenKind::Literal, "select "),
                (TokenKind::Named, "a"),
                (TokenKind::Literal, ", "),
                (TokenKind::Positional, "?"),
                (TokenKind::Literal, " from t"),
            ]
        );
    }

    #[test]
    fn quotes_and_comments_hide_markers() {
        assert_eq!(
            kinds("'it''s :x' \"?\" -- :y\n/* ? /* :z */ */"),
            vec![
                (TokenKind::Quoted, "'it''s :x'"),
                (TokenKind::Literal, " "),
                (TokenKind::DoubleQuoted, "\"?\""),
                (TokenKind::Literal, " "),
                (TokenKind::Comment, "-- :y"),
                (TokenKind::Literal, "\n"),
                (TokenKind::Comment, "/* ? /* :z */ */"),
            ]
        );
    }

    #[test]
    fn dollar_quotes_hide_markers() {
        assert_eq!(
            kinds("$fn$ :a ? $fn$:b"),
            vec![
                (TokenKind::DollarQuoted, "$fn$ :a ? $fn$"),
                (TokenKind::Named, "b"),
            ]
        );
    }

    #[test]
    fn escapes_and_casts() {
        assert_eq!(
            kinds("a::int \\:b \\?"),
            vec![
                (TokenKind::Literal, "a::int "),
                (TokenKind::Escaped, ":"),
                (TokenKind::Literal, "b "),
                (TokenKind::Escaped, "?"),
            ]
        );
    }

    #[test]
    fn plain_mode_ignores_sigils() {
        let tokens =
            tokenize("select :a, ? from '<x>'", ScanMode::Plain, BlockComments::Flat).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::Literal);
        assert_eq!(tokens[1].kind, TokenKind::Quoted);
    }

    #[test]
    fn unterminated_constructs_are_malformed() {
        for sql in ["select 'abc", "select \"abc", "/* open", "$q$ open"] {
            let err = tokenize(sql, ScanMode::Markers, BlockComments::Flat).unwrap_err();
            assert!(
                matches!(err, SqlPipelineError::MalformedTemplate { .. }),
                "{sql}"
            );
        }
    }

    #[test]
    fn block_comments_nest_only_when_asked() {
        let sql = "/* /* */ select :a";
        let flat = tokenize(sql, ScanMode::Markers, BlockComments::Flat).unwrap();
        assert_eq!(flat[0], Token::new(TokenKind::Comment, "/* /* */"));
        assert_eq!(flat.last().map(|t| t.kind), Some(TokenKind::Named));

        let err = tokenize(sql, ScanMode::Markers, BlockComments::Nested).unwrap_err();
        assert!(matches!(err, SqlPipelineError::MalformedTemplate { .. }));
    }
}
