//! Small string helpers shared by the pipeline and the terminal front end.

/// Prefix every `quote` in `input` with a backslash.
pub fn escape(input: &str, quote: char) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == quote {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Drop the backslash in front of every escaped `quote`. Other backslashes
/// are left alone.
pub fn unescape(input: &str, quote: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&quote) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Longest prefix of `input` that fits in `max` bytes without splitting a
/// character.
pub fn truncate(input: &str, max: usize) -> &str {
    if input.len() <= max {
        return input;
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape(r#"say "hi""#, '"'), r#"say \"hi\""#);
        assert_eq!(escape("plain", '"'), "plain");
    }

    #[test]
    fn test_unescape_quotes() {
        assert_eq!(unescape(r#"say \"hi\""#, '"'), r#"say "hi""#);
        assert_eq!(unescape(r#"C:\path"#, '"'), r#"C:\path"#);
    }

    #[test]
    fn test_round_trip_with_quotes_and_escaped_quotes() {
        let samples = [
            r#"""#,
            r#"\""#,
            r#"echo "a \"nested\" quote""#,
            r#"\\"trailing\"#,
            r#"ends with backslash \"#,
            r#""\"\\"\\\""#,
        ];
        for sample in samples {
            assert_eq!(unescape(&escape(sample, '"'), '"'), sample, "sample: {}", sample);
        }
    }

    #[test]
    fn test_round_trip_other_quote_char() {
        let sample = r"it's \'fine\'";
        assert_eq!(unescape(&escape(sample, '\''), '\''), sample);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // 'é' is two bytes; cutting at 3 would split the second one
        assert_eq!(truncate("éé", 3), "é");
        assert_eq!(truncate("", 0), "");
    }
}
