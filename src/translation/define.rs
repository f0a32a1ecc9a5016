use std::borrow::Cow;
use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SqlPipelineError;
use crate::types::Value;

use super::PlaceholderStyle;
use super::scanner::{ScanMode, TokenKind, tokenize};

/// Per-execution template variables, keyed by define name.
pub type Attributes = HashMap<String, Value>;

lazy_static! {
    static ref DEFINE_TOKEN: Regex =
        Regex::new(r"\\?<([A-Za-z_][A-Za-z0-9_]*)>").expect("define token pattern is valid");
}

/// Whether `template` contains at least one unescaped `<key>` token outside quotes and comments.
pub(super) fn has_defines(
    template: &str,
    style: PlaceholderStyle,
) -> Result<bool, SqlPipelineError> {
    Ok(tokenize(template, ScanMode::Plain, style.block_comments())?
        .iter()
        .filter(|t| t.kind == TokenKind::Literal)
        .any(|t| {
            DEFINE_TOKEN
                .find_iter(t.text)
                .any(|m| !m.as_str().starts_with('\\'))
        }))
}

/// Substitute `<key>` tokens from `attributes`.
///
/// `style` decides whether block comments nest.
///
/// Tokens inside quoted text and comments are left alone; `\<key>` is emitted as a literal
/// `<key>`. Returns a borrowed `Cow` when the template contains no define tokens at all.
///
/// # Errors
///
/// Returns `SqlPipelineError::UndefinedAttribute` when a referenced key is absent or null,
/// `SqlPipelineError::ConversionError` when the attribute cannot be rendered as SQL text, and
/// `SqlPipelineError::MalformedTemplate` for unterminated quotes or comments.
pub fn render_defines<'a>(
    template: &'a str,
    attributes: &Attributes,
    style: PlaceholderStyle,
) -> Result<Cow<'a, str>, SqlPipelineError> {
    let tokens = tokenize(template, ScanMode::Plain, style.block_comments())?;
    if !tokens
        .iter()
        .any(|t| t.kind == TokenKind::Literal && DEFINE_TOKEN.is_match(t.text))
    {
        return Ok(Cow::Borrowed(template));
    }

    let mut out = String::with_capacity(template.len());
    for token in tokens {
        if token.kind != TokenKind::Literal {
            out.push_str(token.text);
            continue;
        }
        let mut last = 0;
        for caps in DEFINE_TOKEN.captures_iter(token.text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&token.text[last..whole.start()]);
            last = whole.end();
            if let Some(escaped) = whole.as_str().strip_prefix('\\') {
                out.push_str(escaped);
                continue;
            }
            let key = &caps[1];
            let rendered = attributes
                .get(key)
                .map(render_attribute)
                .transpose()?
                .flatten()
                .ok_or_else(|| SqlPipelineError::UndefinedAttribute(key.to_string()))?;
            out.push_str(&rendered);
        }
        out.push_str(&token.text[last..]);
    }
    Ok(Cow::Owned(out))
}

/// SQL text for a define value; `None` for null.
fn render_attribute(value: &Value) -> Result<Option<String>, SqlPipelineError> {
    let text = match value {
        Value::Null | Value::Optional(None) => return Ok(None),
        Value::Optional(Some(inner)) => return render_attribute(inner),
        Value::Text(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Enum(e) => e.name().to_string(),
        Value::Json(j) => j.to_string(),
        Value::Timestamp(ts) => ts.to_string(),
        Value::Date(d) => d.to_string(),
        Value::Time(t) => t.to_string(),
        Value::Blob(_) | Value::Custom(_) => {
            return Err(SqlPipelineError::ConversionError(format!(
                "cannot render a {} value into SQL text",
                value.kind()
            )));
        }
    };
    Ok(Some(text))
}
