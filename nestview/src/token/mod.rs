// Token engine - the argument mini-language resolved against parent rows
//
// A token string is a `,` or `/` separated list. Each piece is either a
// bracketed field token (`[!uid]` raw, `[%uid]` rendered, `[uid]` raw by
// default), a positional argument token (`!1` input, `%1` title), or a
// literal that passes through unchanged (`123`, `"my term"`).

use crate::view::{ParentContext, Row};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// How a token's value is read from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `!` prefix: the raw value.
    Raw,
    /// `%` prefix: the rendered value (field markup or argument title).
    Rendered,
    /// No prefix: behaves as `Raw` at resolution.
    Default,
}

/// A parsed token. `key` is the field identifier or 1-based argument
/// ordinal; `original` keeps the whitespace-trimmed source text for the
/// literal fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub kind: TokenKind,
    pub key: String,
    pub original: String,
}

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[,/]").expect("separator pattern is valid"))
}

/// Split a token string on `,` or `/`. Both separators are equivalent and
/// there is no escaping.
pub fn split_tokens(token_string: &str) -> Vec<String> {
    separators()
        .split(token_string)
        .map(|piece| piece.to_string())
        .collect()
}

/// Parse one token piece into a descriptor. Total: every input yields
/// exactly one kind, defaulting to `Raw` behavior when no prefix is present.
pub fn parse_token(token: &str) -> TokenDescriptor {
    let trimmed = token.trim();

    // Strip a single surrounding bracket pair.
    let mut inner = trimmed;
    if inner.len() >= 2 && inner.starts_with('[') && inner.ends_with(']') {
        inner = &inner[1..inner.len() - 1];
    }

    // The first character of a leading `!`/`.`/`%` run decides the kind.
    let stripped = inner.trim_start_matches(['!', '.', '%']);
    let kind = if stripped.len() != inner.len() {
        match inner.chars().next() {
            Some('!') => TokenKind::Raw,
            Some('%') => TokenKind::Rendered,
            _ => TokenKind::Default,
        }
    } else {
        TokenKind::Default
    };

    TokenDescriptor {
        kind,
        key: stripped.to_string(),
        original: trimmed.to_string(),
    }
}

/// Resolve a token against one row and the owning view.
///
/// Field keys win over positional ordinals; anything else falls through to
/// the literal constant. Never fails: missing lookups produce an empty
/// string so a value is always returned.
pub fn resolve_token(descriptor: &TokenDescriptor, row: &Row, parent: &ParentContext) -> Value {
    if parent.fields.contains(&descriptor.key) {
        let value = match descriptor.kind {
            TokenKind::Rendered => parent.fields.rendered_value(&descriptor.key),
            TokenKind::Raw | TokenKind::Default => parent.fields.raw_value(&descriptor.key, row),
        };
        return value.unwrap_or_else(|| Value::String(String::new()));
    }

    if let Ok(position) = descriptor.key.parse::<usize>() {
        if position >= 1 && position <= parent.arguments.len() {
            let value = match descriptor.kind {
                TokenKind::Rendered => parent.arguments.title(position).map(Value::String),
                TokenKind::Raw | TokenKind::Default => parent.arguments.raw_input(position),
            };
            return value.unwrap_or_else(|| Value::String(String::new()));
        }
    }

    literal_value(&descriptor.original)
}

/// Build the ordered argument list for one row from a token string.
/// An empty string yields an empty list.
pub fn build_arguments(token_string: &str, row: &Row, parent: &ParentContext) -> Vec<Value> {
    if token_string.trim().is_empty() {
        return Vec::new();
    }
    split_tokens(token_string)
        .iter()
        .map(|piece| resolve_token(&parse_token(piece), row, parent))
        .collect()
}

/// Literal fallback: strip one layer of surrounding quotes, escape markup.
fn literal_value(original: &str) -> Value {
    let mut literal = original;
    let bytes = literal.as_bytes();
    if literal.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[literal.len() - 1] == first {
            literal = &literal[1..literal.len() - 1];
        }
    }
    Value::String(escape_markup(literal))
}

/// Escape markup-significant characters for safe output.
pub(crate) fn escape_markup(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ArgumentTable, FieldTable};
    use crate::view::FieldRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_row() -> Row {
        let values = json!({
            "uid": 7,
            "title": "Hello",
            "nid": 42,
        });
        match values {
            Value::Object(map) => Row::new(0, map),
            _ => unreachable!(),
        }
    }

    fn test_fields() -> FieldTable {
        let mut fields = FieldTable::new();
        fields.add("uid", "uid");
        fields.add("title", "title");
        fields.add("nid", "nid");
        fields
    }

    fn test_arguments() -> ArgumentTable {
        let mut arguments = ArgumentTable::new();
        arguments.push("Author", json!(5));
        arguments.push("Year", json!("2024"));
        arguments
    }

    #[test]
    fn test_split_on_comma_and_slash() {
        let expected = vec!["[!uid]".to_string(), "[%nid]".to_string()];
        assert_eq!(split_tokens("[!uid],[%nid]"), expected);
        assert_eq!(split_tokens("[!uid]/[%nid]"), expected);
        assert_eq!(
            split_tokens("[uid]/[nid]"),
            vec!["[uid]".to_string(), "[nid]".to_string()]
        );
    }

    #[test]
    fn test_parse_prefixes() {
        let result = parse_token("[!uid]");
        assert_eq!(result.kind, TokenKind::Raw);
        assert_eq!(result.key, "uid");

        let result = parse_token("[%uid]");
        assert_eq!(result.kind, TokenKind::Rendered);
        assert_eq!(result.key, "uid");

        let result = parse_token("[uid]");
        assert_eq!(result.kind, TokenKind::Default);
        assert_eq!(result.key, "uid");
    }

    #[test]
    fn test_parse_bare_positional() {
        let result = parse_token("%1");
        assert_eq!(result.kind, TokenKind::Rendered);
        assert_eq!(result.key, "1");

        let result = parse_token("!2");
        assert_eq!(result.kind, TokenKind::Raw);
        assert_eq!(result.key, "2");
    }

    #[test]
    fn test_parse_keeps_original_for_literals() {
        let result = parse_token(" \"my term\" ");
        assert_eq!(result.kind, TokenKind::Default);
        assert_eq!(result.original, "\"my term\"");
    }

    #[test]
    fn test_resolve_field_tokens() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        assert_eq!(
            resolve_token(&parse_token("[!title]"), &row, &parent),
            json!("Hello")
        );
        // No prefix defaults to the raw value.
        assert_eq!(
            resolve_token(&parse_token("[title]"), &row, &parent),
            json!("Hello")
        );
        assert_eq!(
            resolve_token(&parse_token("[!uid]"), &row, &parent),
            json!(7)
        );
    }

    #[test]
    fn test_resolve_rendered_field_uses_last_render() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        fields.record_rendered("title", "<em>Hello</em>");
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        assert_eq!(
            resolve_token(&parse_token("[%title]"), &row, &parent),
            json!("<em>Hello</em>")
        );
        // Nothing rendered yet for this field: empty, not an error.
        assert_eq!(
            resolve_token(&parse_token("[%uid]"), &row, &parent),
            json!("")
        );
    }

    #[test]
    fn test_resolve_positional_tokens() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        assert_eq!(resolve_token(&parse_token("!1"), &row, &parent), json!(5));
        assert_eq!(
            resolve_token(&parse_token("%1"), &row, &parent),
            json!("Author")
        );
        assert_eq!(
            resolve_token(&parse_token("!2"), &row, &parent),
            json!("2024")
        );
    }

    #[test]
    fn test_resolve_literal_fallback() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        assert_eq!(
            resolve_token(&parse_token("static"), &row, &parent),
            json!("static")
        );
        assert_eq!(
            resolve_token(&parse_token("\"my term\""), &row, &parent),
            json!("my term")
        );
        // Out-of-range ordinal falls through to the literal.
        assert_eq!(resolve_token(&parse_token("9"), &row, &parent), json!("9"));
        assert_eq!(
            resolve_token(&parse_token("<b>x</b>"), &row, &parent),
            json!("&lt;b&gt;x&lt;/b&gt;")
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        for token in ["[!uid]", "[%title]", "!1", "static", "[missing]"] {
            let descriptor = parse_token(token);
            let first = resolve_token(&descriptor, &row, &parent);
            let second = resolve_token(&descriptor, &row, &parent);
            assert_eq!(first, second, "token {token} resolved differently");
        }
    }

    #[test]
    fn test_build_arguments_order_and_empty() {
        let row = test_row();
        let fields = test_fields();
        let arguments = test_arguments();
        let parent = ParentContext {
            fields: &fields,
            arguments: &arguments,
        };

        assert_eq!(
            build_arguments("[!uid],[!title]/!1", &row, &parent),
            vec![json!(7), json!("Hello"), json!(5)]
        );
        assert_eq!(build_arguments("", &row, &parent), Vec::<Value>::new());
        assert_eq!(build_arguments("   ", &row, &parent), Vec::<Value>::new());
    }
}
