//! Single-key value lookup over a JSON document
//!
//! The pipeline only ever needs one field out of a completion response, so the
//! lookup contract is deliberately narrow: find the first object key equal to
//! `key` in document order and hand back its value as text. String values are
//! decoded; any other value is returned as JSON text, whose exact formatting
//! depends on the implementation.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("invalid JSON document: {0}")]
    Parse(String),

    #[error("key '{key}' not found in document")]
    NotFound { key: String },
}

pub trait JsonLookup: Send + Sync {
    fn lookup(&self, document: &str, key: &str) -> Result<String, LookupError>;
}

/// Lookup backed by a full `serde_json` document model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentLookup;

impl JsonLookup for DocumentLookup {
    fn lookup(&self, document: &str, key: &str) -> Result<String, LookupError> {
        let value: Value =
            serde_json::from_str(document).map_err(|e| LookupError::Parse(e.to_string()))?;

        find_value(&value, key)
            .map(|found| match found {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| LookupError::NotFound {
                key: key.to_string(),
            })
    }
}

/// Pre-order walk; relies on `preserve_order` so object keys keep their
/// document position.
fn find_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == key {
                    return Some(v);
                }
                if let Some(found) = find_value(v, key) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_value(item, key)),
        _ => None,
    }
}

/// Lookup that tokenizes the raw text in a single pass without building a
/// document. Non-string values come back exactly as they appear in the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanningLookup;

impl JsonLookup for ScanningLookup {
    fn lookup(&self, document: &str, key: &str) -> Result<String, LookupError> {
        let mut scanner = Scanner::new(document);
        let mut found = None;

        scanner.value(key, &mut found)?;
        scanner.skip_whitespace();
        if scanner.pos != scanner.bytes.len() {
            return Err(scanner.error("trailing characters"));
        }

        found.ok_or_else(|| LookupError::NotFound {
            key: key.to_string(),
        })
    }
}

// Same limit serde_json applies by default
const MAX_DEPTH: usize = 128;

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn error(&self, message: &str) -> LookupError {
        LookupError::Parse(format!("{} at byte {}", message, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), LookupError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    /// Scan one value. The first object key equal to `key` stores its value
    /// in `found`; later matches are ignored.
    fn value(&mut self, key: &str, found: &mut Option<String>) -> Result<(), LookupError> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'{') => self.object(key, found),
            Some(b'[') => self.array(key, found),
            Some(b'"') => self.string().map(|_| ()),
            Some(b't') => self.literal("true"),
            Some(b'f') => self.literal("false"),
            Some(b'n') => self.literal("null"),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of document")),
        }
    }

    fn enter(&mut self) -> Result<(), LookupError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.pos += 1;
        self.skip_whitespace();
        Ok(())
    }

    fn object(&mut self, key: &str, found: &mut Option<String>) -> Result<(), LookupError> {
        self.enter()?;
        if self.peek() == Some(b'}') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(());
        }

        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'"') {
                return Err(self.error("expected object key"));
            }
            let name = decode(self.string()?)?;
            self.skip_whitespace();
            self.expect(b':')?;
            self.skip_whitespace();

            if found.is_none() && name == key {
                let start = self.pos;
                let is_string = self.peek() == Some(b'"');
                // Matches nested inside this value come later in document order
                self.value(key, &mut None)?;
                let raw = &self.text[start..self.pos];
                *found = Some(if is_string {
                    decode(&raw[1..raw.len() - 1])?
                } else {
                    raw.to_string()
                });
            } else {
                self.value(key, found)?;
            }

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }

        self.depth -= 1;
        Ok(())
    }

    fn array(&mut self, key: &str, found: &mut Option<String>) -> Result<(), LookupError> {
        self.enter()?;
        if self.peek() == Some(b']') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(());
        }

        loop {
            self.value(key, found)?;
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }

        self.depth -= 1;
        Ok(())
    }

    /// Returns the raw, still escaped, text between the quotes.
    fn string(&mut self) -> Result<&'a str, LookupError> {
        self.expect(b'"')?;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'"') => {
                    let text = self.text;
                    let raw = &text[start..self.pos];
                    self.pos += 1;
                    return Ok(raw);
                }
                Some(b'\\') => self.pos += 2,
                Some(byte) if byte < 0x20 => return Err(self.error("control character in string")),
                Some(_) => self.pos += 1,
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn literal(&mut self, word: &str) -> Result<(), LookupError> {
        if self.bytes[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(())
        } else {
            Err(self.error("invalid literal"))
        }
    }

    fn digits(&mut self) -> Result<(), LookupError> {
        let start = self.pos;
        while let Some(b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected digit"));
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), LookupError> {
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        if self.peek() == Some(b'0') {
            self.pos += 1;
        } else {
            self.digits()?;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.digits()?;
        }
        if let Some(b'e' | b'E') = self.peek() {
            self.pos += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            self.digits()?;
        }
        Ok(())
    }
}

/// Resolve the escape sequences of a raw JSON string body.
fn decode(raw: &str) -> Result<String, LookupError> {
    let invalid = |what: &str| LookupError::Parse(format!("invalid escape in string: {}", what));

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let high = hex4(&mut chars).ok_or_else(|| invalid("\\u"))?;
                let code = if (0xD800..0xDC00).contains(&high) {
                    if chars.next() != Some('\\') || chars.next() != Some('u') {
                        return Err(invalid("unpaired surrogate"));
                    }
                    let low = hex4(&mut chars).ok_or_else(|| invalid("\\u"))?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(invalid("unpaired surrogate"));
                    }
                    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                } else {
                    high
                };
                out.push(char::from_u32(code).ok_or_else(|| invalid("code point"))?);
            }
            Some(other) => return Err(invalid(&other.to_string())),
            None => return Err(invalid("trailing backslash")),
        }
    }
    Ok(out)
}

fn hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut code = 0;
    for _ in 0..4 {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENAI_RESPONSE: &str = r#"{
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Use `ls -la` to list files"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12}
    }"#;

    fn lookups() -> Vec<(&'static str, Box<dyn JsonLookup>)> {
        vec![
            ("document", Box::new(DocumentLookup)),
            ("scanning", Box::new(ScanningLookup)),
        ]
    }

    #[test]
    fn test_top_level_string() {
        for (name, lookup) in lookups() {
            assert_eq!(
                lookup.lookup(r#"{"content":"hello"}"#, "content").unwrap(),
                "hello",
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_nested_completion_content() {
        for (name, lookup) in lookups() {
            assert_eq!(
                lookup.lookup(OPENAI_RESPONSE, "content").unwrap(),
                "Use `ls -la` to list files",
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_first_match_in_document_order() {
        let document = r#"{"content":"outer","nested":{"content":"inner"}}"#;
        let nested_first = r#"{"a":{"content":"inner"},"content":"outer"}"#;
        for (name, lookup) in lookups() {
            assert_eq!(lookup.lookup(document, "content").unwrap(), "outer", "{}", name);
            assert_eq!(lookup.lookup(nested_first, "content").unwrap(), "inner", "{}", name);
        }
    }

    #[test]
    fn test_escapes_decoded() {
        let document = r#"{"content":"line\n\"quoted\" \\ café 😀"}"#;
        for (name, lookup) in lookups() {
            assert_eq!(
                lookup.lookup(document, "content").unwrap(),
                "line\n\"quoted\" \\ café 😀",
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_escaped_key_matches() {
        let document = r#"{"\u0063ontent":"yes"}"#;
        for (name, lookup) in lookups() {
            assert_eq!(lookup.lookup(document, "content").unwrap(), "yes", "{}", name);
        }
    }

    #[test]
    fn test_string_values_are_not_keys() {
        let document = r#"{"role":"content","other":["content"]}"#;
        for (name, lookup) in lookups() {
            assert!(
                matches!(lookup.lookup(document, "content"), Err(LookupError::NotFound { .. })),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_not_found() {
        for (name, lookup) in lookups() {
            let err = lookup.lookup(r#"{"error":{"message":"bad key"}}"#, "content").unwrap_err();
            assert_eq!(
                err,
                LookupError::NotFound {
                    key: "content".to_string()
                },
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_invalid_documents() {
        let documents = [
            "",
            "{",
            r#"{"content":"unterminated}"#,
            r#"{"content" "missing colon"}"#,
            r#"{"content":"x"} trailing"#,
            r#"{"content":tru}"#,
            r#"{"a":1,}"#,
        ];
        for document in documents {
            for (name, lookup) in lookups() {
                assert!(
                    matches!(lookup.lookup(document, "content"), Err(LookupError::Parse(_))),
                    "{} accepted {:?}",
                    name,
                    document
                );
            }
        }
    }

    #[test]
    fn test_scalar_values_as_text() {
        let document = r#"{"done":true,"missing":null,"count":42}"#;
        for (name, lookup) in lookups() {
            assert_eq!(lookup.lookup(document, "done").unwrap(), "true", "{}", name);
            assert_eq!(lookup.lookup(document, "missing").unwrap(), "null", "{}", name);
            assert_eq!(lookup.lookup(document, "count").unwrap(), "42", "{}", name);
        }
    }

    #[test]
    fn test_scanner_keeps_raw_container_text() {
        let document = r#"{"usage": {"total": 3}}"#;
        assert_eq!(ScanningLookup.lookup(document, "usage").unwrap(), r#"{"total": 3}"#);
        assert_eq!(DocumentLookup.lookup(document, "usage").unwrap(), r#"{"total":3}"#);
    }

    #[test]
    fn test_scanner_depth_limit() {
        let document = format!("{}{}", "[".repeat(MAX_DEPTH + 1), "]".repeat(MAX_DEPTH + 1));
        assert!(matches!(
            ScanningLookup.lookup(&document, "content"),
            Err(LookupError::Parse(_))
        ));
    }
}
