//! Best-effort structured output.
//!
//! [`LlmClient::extract_json`] asks the model for raw JSON, then recovers a
//! value from whatever comes back: code fences are stripped, and if the text
//! still does not parse, the largest `{...}` span and then the largest
//! `[...]` span are tried. No schema validation is performed; conformance to
//! `T` is the model's job.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{LlmError, Result};
use crate::{CompletionRequest, ContentPart, LlmClient, Message, MessageContent, Role};

/// Instruction appended to the final user message.
pub const JSON_INSTRUCTION: &str =
    "\n\nRespond with valid JSON only. No markdown, no code blocks, just raw JSON.";

const FENCE: &str = "```";

/// Append [`JSON_INSTRUCTION`] to the last message if it is a user message.
///
/// Plain text gets the instruction as a suffix. For multi-part content, it is
/// appended to the last part when that part is text, otherwise pushed as a
/// new text part. Non-user final messages are left alone.
pub fn append_json_instruction(messages: &mut [Message]) {
    let Some(last) = messages.last_mut() else {
        return;
    };
    if last.role != Role::User {
        return;
    }
    match &mut last.content {
        MessageContent::Text(text) => text.push_str(JSON_INSTRUCTION),
        MessageContent::Parts(parts) => match parts.last_mut() {
            Some(ContentPart::Text { text, .. }) => text.push_str(JSON_INSTRUCTION),
            _ => parts.push(ContentPart::text(JSON_INSTRUCTION)),
        },
    }
}

/// Remove a surrounding markdown code fence, if any.
///
/// Drops an opening fence with an optional language tag (letters, digits,
/// `_`, `-`) and a closing fence, trimming whitespace around both.
///
/// ```
/// use llm_courier::api::extract::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{\"x\":1}\n```"), "{\"x\":1}");
/// assert_eq!(strip_code_fences("  plain  "), "plain");
/// ```
pub fn strip_code_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix(FENCE) {
        let rest =
            rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        t = rest.trim_start();
        if let Some(body) = t.trim_end().strip_suffix(FENCE) {
            t = body;
        }
    }
    t.trim()
}

/// Recover a `T` from model output.
///
/// Finds the first JSON value among: the fence-stripped text, the largest
/// `{...}` span, the largest `[...]` span. Spans are only searched when the
/// text as a whole is not valid JSON. The value found is then converted to
/// `T` exactly once; a shape mismatch is not recovered.
pub fn recover_json<T: DeserializeOwned>(content: &str) -> Option<T> {
    let value = recover_json_value(content)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Recovered JSON does not match the requested type: {e}");
            None
        }
    }
}

/// The first syntactically valid JSON value in model output.
pub fn recover_json_value(content: &str) -> Option<Value> {
    let cleaned = strip_code_fences(content);
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }
    if let Some(value) = delimited_span(cleaned, '{', '}').and_then(|s| serde_json::from_str(s).ok())
    {
        debug!("Recovered JSON object from surrounding text");
        return Some(value);
    }
    if let Some(value) = delimited_span(cleaned, '[', ']').and_then(|s| serde_json::from_str(s).ok())
    {
        debug!("Recovered JSON array from surrounding text");
        return Some(value);
    }
    None
}

/// The span from the first `open` to the last `close`, inclusive.
fn delimited_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    // Both delimiters are single-byte ASCII, so these are char boundaries.
    text.get(start..end + close.len_utf8())
}

impl LlmClient {
    /// Request JSON output and deserialize it into `T`.
    ///
    /// Appends a raw-JSON instruction to the final user message, makes one
    /// non-streaming call, and recovers a value with [`recover_json`]. Fails
    /// with [`LlmError::Parse`] carrying the full model output when nothing
    /// parses.
    pub async fn extract_json<T: DeserializeOwned>(
        &self,
        mut request: CompletionRequest,
    ) -> Result<T> {
        append_json_instruction(&mut request.messages);

        let result = self.complete(request).await?;
        recover_json(&result.content).ok_or(LlmError::Parse {
            content: result.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Point {
        x: i64,
    }

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(strip_code_fences("```json\n{\"x\":1}\n```"), "{\"x\":1}");
        assert_eq!(strip_code_fences("```\n[1, 2]\n```  \n"), "[1, 2]");
        assert_eq!(strip_code_fences("```json-5 {\"x\":1}```"), "{\"x\":1}");
    }

    #[test]
    fn unterminated_fence_still_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"x\":1}"), "{\"x\":1}");
    }

    #[test]
    fn text_without_fence_only_trimmed() {
        assert_eq!(strip_code_fences("\n {\"x\":1} \n"), "{\"x\":1}");
        assert_eq!(strip_code_fences("see ```code```"), "see ```code```");
    }

    #[test]
    fn recovers_fenced_json() {
        let p: Point = recover_json("```json\n{\"x\":1}\n```").unwrap();
        assert_eq!(p, Point { x: 1 });
    }

    #[test]
    fn recovers_object_from_noise() {
        let p: Point = recover_json("noise {\"x\":1} noise").unwrap();
        assert_eq!(p, Point { x: 1 });
    }

    #[test]
    fn recovers_array_when_object_fails() {
        let v: Value = recover_json("Here you go: [1, 2, 3]. Enjoy!").unwrap();
        assert_eq!(v, json!([1, 2, 3]));

        // Object span `{a} and {b}` is invalid; the array span still parses.
        let v: Value = recover_json("[{\"a\":1}, {\"b\":2}] trailing").unwrap();
        assert_eq!(v, json!([{"a": 1}, {"b": 2}]));
    }

    #[test]
    fn object_preferred_over_array() {
        let v: Value = recover_json("result: {\"players\": [\"a\", \"b\"]} done").unwrap();
        assert_eq!(v, json!({"players": ["a", "b"]}));
    }

    #[test]
    fn unrecoverable_returns_none() {
        assert!(recover_json::<Value>("no json here").is_none());
        assert!(recover_json::<Value>("} backwards {").is_none());
        assert!(recover_json::<Value>("{ broken: ").is_none());
    }

    #[test]
    fn shape_mismatch_is_not_recovered() {
        assert!(recover_json::<Point>("{\"y\": 2}").is_none());
    }

    #[test]
    fn valid_json_of_wrong_shape_is_not_searched() {
        // The whole text is a valid object; its inner array must not be
        // returned in its place.
        assert!(recover_json::<Vec<Value>>(r#"{"items":[1,2]}"#).is_none());
        assert!(recover_json::<Point>(r#"[{"x": 1}]"#).is_none());
        assert_eq!(
            recover_json_value(r#"{"items":[1,2]}"#),
            Some(json!({"items": [1, 2]}))
        );
    }

    #[test]
    fn instruction_appended_to_text() {
        let mut messages = vec![Message::system("sys"), Message::user("list players")];
        append_json_instruction(&mut messages);
        assert_eq!(
            messages[1].content,
            MessageContent::Text(format!("list players{JSON_INSTRUCTION}"))
        );
        assert_eq!(messages[0].content, MessageContent::Text("sys".into()));
    }

    #[test]
    fn instruction_appended_to_last_text_part() {
        let mut messages = vec![Message::user_parts(vec![
            ContentPart::image_url("https://img.example/a.png"),
            ContentPart::text("describe"),
        ])];
        append_json_instruction(&mut messages);
        let MessageContent::Parts(parts) = &messages[0].content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], ContentPart::text(format!("describe{JSON_INSTRUCTION}")));
    }

    #[test]
    fn instruction_pushed_after_non_text_part() {
        let mut messages = vec![Message::user_parts(vec![ContentPart::image_url("u")])];
        append_json_instruction(&mut messages);
        let MessageContent::Parts(parts) = &messages[0].content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], ContentPart::text(JSON_INSTRUCTION));
    }

    #[test]
    fn non_user_final_message_untouched() {
        let mut messages = vec![Message::user("q"), Message::assistant("prefill {")];
        let before = messages.clone();
        append_json_instruction(&mut messages);
        assert_eq!(messages, before);

        let mut empty: Vec<Message> = Vec::new();
        append_json_instruction(&mut empty);
        assert!(empty.is_empty());
    }
}
