//! Server-Sent Events serializer (spec.md §4.3).
//!
//! Formats the `event:`/`id:`/`retry:`/`data:` fields WHATWG-style,
//! splitting multi-line `data` payloads into one `data:` line per input
//! line, and terminates every event with a single blank line. Structured
//! `data` values are serialized to JSON first.

use crate::scope::SseData;

/// The response head an SSE stream always starts with (spec.md §4.3):
/// status 200, `Content-Type: text/event-stream; charset=utf-8`,
/// `Cache-Control: no-cache`, `Connection: keep-alive`.
pub const CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";
pub const CACHE_CONTROL: &str = "no-cache";

/// Appends the wire bytes for one SSE event to `out`.
pub fn write_event(
    event: Option<&str>,
    id: Option<&str>,
    retry: Option<u64>,
    data: &SseData,
    out: &mut Vec<u8>,
) -> Result<(), serde_json::Error> {
    if let Some(event) = event {
        out.extend_from_slice(b"event: ");
        out.extend_from_slice(event.as_bytes());
        out.push(b'\n');
    }
    if let Some(id) = id {
        out.extend_from_slice(b"id: ");
        out.extend_from_slice(id.as_bytes());
        out.push(b'\n');
    }
    if let Some(retry) = retry {
        out.extend_from_slice(b"retry: ");
        out.extend_from_slice(retry.to_string().as_bytes());
        out.push(b'\n');
    }

    let text;
    let data: &str = match data {
        SseData::Text(s) => s.as_str(),
        SseData::Json(value) => {
            text = serde_json::to_string(value)?;
            text.as_str()
        }
    };

    for line in data.split('\n') {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }

    out.push(b'\n');
    Ok(())
}

/// A heartbeat comment line (`: <text>\n\n`), distinct from any named
/// event the application sends, per spec.md §4.3's heartbeat-comment
/// requirement.
pub fn write_heartbeat(text: &str, out: &mut Vec<u8>) {
    out.push(b':');
    out.push(b' ');
    out.extend_from_slice(text.as_bytes());
    out.push(b'\n');
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_s5_example() {
        let mut out = Vec::new();
        write_event(
            Some("tick"),
            Some("1"),
            None,
            &SseData::Text("line1\nline2".to_string()),
            &mut out,
        )
        .unwrap();
        write_event(None, None, None, &SseData::Text("bye".to_string()), &mut out).unwrap();

        assert_eq!(
            std::str::from_utf8(&out).unwrap(),
            "event: tick\nid: 1\ndata: line1\ndata: line2\n\ndata: bye\n\n"
        );
    }

    #[test]
    fn serializes_structured_data_as_json() {
        let mut out = Vec::new();
        write_event(
            None,
            None,
            None,
            &SseData::Json(serde_json::json!({"a": 1})),
            &mut out,
        )
        .unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "data: {\"a\":1}\n\n");
    }

    #[test]
    fn retry_is_emitted_as_plain_integer() {
        let mut out = Vec::new();
        write_event(None, None, Some(3000), &SseData::Text("x".into()), &mut out).unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "retry: 3000\ndata: x\n\n");
    }

    #[test]
    fn heartbeat_is_a_comment_line() {
        let mut out = Vec::new();
        write_heartbeat("keep-alive", &mut out);
        assert_eq!(std::str::from_utf8(&out).unwrap(), ": keep-alive\n\n");
    }
}
