//! Incremental consumer for the line-delimited chat completion stream.
//!
//! Bytes arrive in arbitrary chunks. Two carry-over buffers sit between the
//! network and the line parser: one for a multi-byte UTF-8 sequence split
//! across chunks, one for a line that has not seen its `\n` yet. Only
//! complete characters are decoded and only complete lines are parsed.

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::protocol::ChatChunk;

/// Wire prefix of every line that carries a payload.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that ends the stream successfully.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Something observed while consuming the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text, already appended to the accumulated message.
    ContentDelta(String),
    /// The `[DONE]` sentinel was received.
    Done,
    /// A `data:` payload that was not a valid event record. Non-fatal.
    MalformedEvent { payload: String, reason: String },
    /// The transport failed; the accumulated text is kept as the final message.
    StreamError(String),
}

/// How the stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Sentinel,
    Closed,
    Failed(String),
}

/// Assembles the assistant message from raw response bytes.
#[derive(Debug, Default)]
pub struct StreamConsumer {
    pending_bytes: Vec<u8>,
    pending_line: String,
    text: String,
    done: bool,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Feed one chunk of response bytes. Input after the sentinel is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.pending_bytes.extend_from_slice(chunk);
        let decoded = decode_complete_utf8(&mut self.pending_bytes);
        self.pending_line.push_str(&decoded);

        while let Some(line_end) = self.pending_line.find('\n') {
            let line: String = self.pending_line.drain(..=line_end).collect();
            self.process_line(&line, &mut events);
            if self.done {
                self.pending_line.clear();
                self.pending_bytes.clear();
                break;
            }
        }
        events
    }

    /// Flush the carry-over buffers at end of input. A trailing line without
    /// its newline is processed as a complete line; a dangling partial
    /// character becomes U+FFFD.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.pending_line.push_str(&tail);
        }
        let line = std::mem::take(&mut self.pending_line);
        self.process_line(&line, &mut events);
        events
    }

    fn process_line(&mut self, raw: &str, events: &mut Vec<StreamEvent>) {
        let line = raw.trim_end();
        if line.is_empty() {
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            // comments, `event:` and `id:` fields carry nothing we use
            return;
        };
        if payload == DONE_SENTINEL {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }
        match serde_json::from_str::<ChatChunk>(payload) {
            Ok(chunk) => {
                if let Some(content) = chunk.content() {
                    self.text.push_str(content);
                    events.push(StreamEvent::ContentDelta(content.to_string()));
                }
            }
            Err(e) => {
                warn!(payload, error = %e, "skipping malformed stream event");
                events.push(StreamEvent::MalformedEvent {
                    payload: payload.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Decode the longest valid prefix of `buf`, leaving an incomplete trailing
/// sequence in place. Invalid sequences are replaced with U+FFFD.
fn decode_complete_utf8(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&buf[start..]) {
            Ok(valid) => {
                out.push_str(valid);
                start = buf.len();
                break;
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[start..valid_end]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + bad;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    buf.drain(..start);
    out
}

/// Drive `consumer` from a byte stream until the sentinel, closure, or a
/// transport error. `on_event` sees every event in order, including the
/// final `StreamError` when the transport fails.
pub async fn consume<S, B, E, F>(
    mut stream: S,
    consumer: &mut StreamConsumer,
    mut on_event: F,
) -> Termination
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&StreamEvent),
{
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for event in consumer.feed(bytes.as_ref()) {
                    on_event(&event);
                }
                if consumer.is_done() {
                    debug!(chars = consumer.text().len(), "stream finished with sentinel");
                    return Termination::Sentinel;
                }
            }
            Err(e) => {
                let cause = e.to_string();
                error!(error = %cause, "stream transport failed; keeping partial message");
                for event in consumer.finish() {
                    on_event(&event);
                }
                if consumer.is_done() {
                    return Termination::Sentinel;
                }
                on_event(&StreamEvent::StreamError(cause.clone()));
                return Termination::Failed(cause);
            }
        }
    }
    for event in consumer.finish() {
        on_event(&event);
    }
    if consumer.is_done() {
        Termination::Sentinel
    } else {
        debug!("stream closed without sentinel");
        Termination::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn delta(text: &str) -> String {
        data(&serde_json::json!({"choices":[{"delta":{"content":text}}]}).to_string())
    }

    #[test]
    fn test_hello_then_done() {
        let mut c = StreamConsumer::new();
        let input = format!("{}{}data: [DONE]\n", delta("He"), delta("llo"));
        let events = c.feed(input.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta("He".into()),
                StreamEvent::ContentDelta("llo".into()),
                StreamEvent::Done,
            ]
        );
        assert_eq!(c.text(), "Hello");
        assert!(c.is_done());
    }

    #[test]
    fn test_malformed_line_does_not_halt() {
        let mut c = StreamConsumer::new();
        let input = format!("{}data: {{not json\n{}", delta("a"), delta("b"));
        let events = c.feed(input.as_bytes());
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], StreamEvent::MalformedEvent { ref payload, .. } if payload == "{not json"));
        assert_eq!(c.text(), "ab");
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut c = StreamConsumer::new();
        let input = format!(": keep-alive\nevent: message\nid: 7\n{}", delta("x"));
        let events = c.feed(input.as_bytes());
        assert_eq!(events, vec![StreamEvent::ContentDelta("x".into())]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut c = StreamConsumer::new();
        let line = delta("split");
        let (a, b) = line.split_at(17);
        assert!(c.feed(a.as_bytes()).is_empty());
        assert_eq!(c.feed(b.as_bytes()), vec![StreamEvent::ContentDelta("split".into())]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut c = StreamConsumer::new();
        let line = delta("思维导图");
        let bytes = line.as_bytes();
        // split inside the first CJK character (3 bytes each)
        let cut = line.find('思').expect("char present") + 1;
        assert!(c.feed(&bytes[..cut]).is_empty());
        let events = c.feed(&bytes[cut..]);
        assert_eq!(events, vec![StreamEvent::ContentDelta("思维导图".into())]);
        assert!(!c.text().contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let mut c = StreamConsumer::new();
        let input = format!("{}{}data: [DONE]\n", delta("héllo "), delta("wörld"));
        let mut events = Vec::new();
        for b in input.as_bytes() {
            events.extend(c.feed(std::slice::from_ref(b)));
        }
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(c.text(), "héllo wörld");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut buf = vec![b'a', 0xFF, b'b'];
        assert_eq!(decode_complete_utf8(&mut buf), "a\u{FFFD}b");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_sequence_retained() {
        let mut buf = vec![b'a', 0xE6, 0x80];
        assert_eq!(decode_complete_utf8(&mut buf), "a");
        assert_eq!(buf, vec![0xE6, 0x80]);
    }

    #[test]
    fn test_input_after_done_ignored() {
        let mut c = StreamConsumer::new();
        let input = format!("data: [DONE]\n{}", delta("late"));
        assert_eq!(c.feed(input.as_bytes()), vec![StreamEvent::Done]);
        assert!(c.feed(delta("later").as_bytes()).is_empty());
        assert_eq!(c.text(), "");
    }

    #[test]
    fn test_finish_processes_trailing_line() {
        let mut c = StreamConsumer::new();
        let line = delta("tail");
        assert!(c.feed(line.trim_end().as_bytes()).is_empty());
        assert_eq!(c.finish(), vec![StreamEvent::ContentDelta("tail".into())]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut c = StreamConsumer::new();
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\ndata: [DONE]\r\n";
        let events = c.feed(input.as_bytes());
        assert_eq!(events, vec![StreamEvent::ContentDelta("x".into()), StreamEvent::Done]);
    }

    #[test]
    fn test_role_only_delta_emits_nothing() {
        let mut c = StreamConsumer::new();
        let events = c.feed(data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).as_bytes());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_consume_reports_transport_failure_with_partial_text() {
        let chunks: Vec<Result<Vec<u8>, String>> =
            vec![Ok(delta("partial").into_bytes()), Err("connection reset".to_string())];
        let mut c = StreamConsumer::new();
        let mut seen = Vec::new();
        let term = consume(tokio_stream::iter(chunks), &mut c, |e| seen.push(e.clone())).await;
        assert_eq!(term, Termination::Failed("connection reset".into()));
        assert_eq!(seen.last(), Some(&StreamEvent::StreamError("connection reset".into())));
        assert_eq!(c.text(), "partial");
    }

    #[tokio::test]
    async fn test_consume_closed_without_sentinel() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(delta("only").into_bytes())];
        let mut c = StreamConsumer::new();
        let term = consume(tokio_stream::iter(chunks), &mut c, |_| {}).await;
        assert_eq!(term, Termination::Closed);
        assert_eq!(c.into_text(), "only");
    }
}
