//! Server-Sent Events decoding for the bridge event stream.
//!
//! The sidecar sends one JSON-encoded [`SessionEvent`] per SSE `data:` line.
//! [`drain_data_lines`] pulls complete payloads out of a byte buffer and
//! [`parse_event`] turns each payload into a session event.

use rg_domain::SessionEvent;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by a blank line.  Only `data:` lines are kept;
/// `event:`, `id:`, `retry:` and comment lines are ignored.  Consumed bytes
/// are removed and any trailing partial event stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut data_lines = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_owned());
                }
            }
        }
    }
    data_lines
}

/// Decode one `data:` payload.  Unknown or malformed payloads are logged and
/// skipped so a sidecar upgrade cannot wedge the stream.
pub(crate) fn parse_event(session_id: &str, data: &str) -> Option<SessionEvent> {
    match serde_json::from_str::<SessionEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                payload = %data,
                "ignoring unrecognised bridge event"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: qr\ndata: {\"type\":\"qr\",\"payload\":\"x\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"type\":\"qr\",\"payload\":\"x\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_stays_in_buffer() {
        let mut buf = String::from("data: first\n\ndata: sec");
        assert_eq!(drain_data_lines(&mut buf), vec!["first"]);
        assert_eq!(buf, "data: sec");

        buf.push_str("ond\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn crlf_delimiters_and_comments() {
        let mut buf = String::from(": keep-alive\r\n\r\ndata: {\"type\":\"ready\"}\r\n\r\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"type\":\"ready\"}"]);
    }

    #[test]
    fn parse_known_and_unknown_events() {
        assert_eq!(
            parse_event("s1", r#"{"type":"authenticated"}"#),
            Some(SessionEvent::Authenticated)
        );
        assert_eq!(
            parse_event("s1", r#"{"type":"disconnected","reason":"LOGOUT"}"#),
            Some(SessionEvent::Disconnected { reason: "LOGOUT".into() })
        );
        assert_eq!(parse_event("s1", r#"{"type":"change_battery"}"#), None);
        assert_eq!(parse_event("s1", "not json"), None);
    }
}
