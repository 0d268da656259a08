/// Parse a model's reply as JSON. Models without structured-output support
/// wrap JSON in prose or markdown fences; try, in order: the whole reply, a
/// fenced code block, and the first balanced object or array.
pub fn parse_json_reply(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Some(value);
        }
    }

    if let Some(balanced) = balanced_json(trimmed) {
        if let Ok(value) = serde_json::from_str(balanced) {
            return Some(value);
        }
    }

    None
}

/// Contents of the first ``` fence, tolerating a language tag.
fn fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First balanced `{...}` or `[...]` span, ignoring brackets inside strings.
fn balanced_json(content: &str) -> Option<&str> {
    let open = content.find(['{', '['])?;
    let opener = content.as_bytes()[open];
    let closer = if opener == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in content.bytes().enumerate().skip(open) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => (),
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == opener => depth += 1,
            b if b == closer => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[open..=offset]);
                }
            }
            _ => (),
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::parse_json_reply;
    use serde_json::json;

    #[test]
    fn test_bare_json() {
        assert_eq!(
            parse_json_reply(r#"{"total": 10}"#),
            Some(json!({"total": 10}))
        );
        assert_eq!(parse_json_reply("[1, 2]"), Some(json!([1, 2])));
    }

    #[test]
    fn test_fenced_json() {
        let reply = "Here is the extraction:\n```json\n{\"vendor\": {\"name\": \"ACME\"}}\n```\nLet me know if you need more.";
        assert_eq!(
            parse_json_reply(reply),
            Some(json!({"vendor": {"name": "ACME"}}))
        );
    }

    #[test]
    fn test_embedded_object() {
        let reply = r#"The fields are {"invoice_number": "A-1", "note": "contains } in a string"} as requested."#;
        assert_eq!(
            parse_json_reply(reply),
            Some(json!({"invoice_number": "A-1", "note": "contains } in a string"}))
        );
    }

    #[test]
    fn test_unparseable_reply() {
        assert_eq!(parse_json_reply("I could not find any fields."), None);
        assert_eq!(parse_json_reply("{truncated"), None);
    }
}
