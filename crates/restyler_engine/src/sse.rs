use serde::Deserialize;

const DATA_PREFIX: &str = "data:";
const DONE_PAYLOAD: &str = "[DONE]";

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Incremental content; may be empty.
    Delta(String),
    /// End of stream.
    Terminator,
}

/// An event line whose payload was not valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event frame {line:?}: {message}")]
pub struct FrameError {
    pub line: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Frame(StreamFrame),
    Malformed(FrameError),
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental line reassembler for a delta-streaming completion body.
///
/// Lines are split on raw bytes before UTF-8 decoding, so a multi-byte
/// character cut across two receives decodes the same as an uncut one.
#[derive(Debug, Default)]
pub struct SseReader {
    pending: Vec<u8>,
    finished: bool,
}

impl SseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes and drain the events of every complete line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Signal end-of-stream: flush a trailing unterminated line, then emit the
    /// terminator. Later calls return nothing.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let rest = std::mem::take(&mut self.pending);
        let mut events: Vec<SseEvent> = decode_line(&rest).into_iter().collect();
        events.push(SseEvent::Frame(StreamFrame::Terminator));
        events
    }

    /// Decode a complete body in one shot.
    pub fn read_all(body: &[u8]) -> Vec<SseEvent> {
        let mut reader = Self::new();
        let mut events = reader.feed(body);
        events.extend(reader.finish());
        events
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();
    if payload == DONE_PAYLOAD {
        return None;
    }
    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => chunk
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .map(|content| SseEvent::Frame(StreamFrame::Delta(content))),
        Err(err) => Some(SseEvent::Malformed(FrameError {
            line: line.to_string(),
            message: err.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(events: &[SseEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                SseEvent::Frame(StreamFrame::Delta(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn holds_back_incomplete_line() {
        let mut reader = SseReader::new();
        let events = reader.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"He");
        assert!(events.is_empty());
        assert!(reader.has_pending());

        let events = reader.feed(b"llo\"}}]}\n");
        assert_eq!(deltas(&events), vec!["Hello"]);
        assert!(!reader.has_pending());
    }

    #[test]
    fn ignores_blank_done_and_non_data_lines() {
        let events = SseReader::read_all(b"\n: keep-alive\nevent: ping\ndata: [DONE]\n");
        assert_eq!(events, vec![SseEvent::Frame(StreamFrame::Terminator)]);
    }

    #[test]
    fn missing_content_is_not_an_error() {
        let events = SseReader::read_all(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: {\"choices\":[]}\n",
        );
        assert_eq!(events, vec![SseEvent::Frame(StreamFrame::Terminator)]);
    }

    #[test]
    fn malformed_json_is_reported_and_skipped() {
        let events = SseReader::read_all(
            b"data: {not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert!(matches!(&events[0], SseEvent::Malformed(err) if err.line == "data: {not json"));
        assert_eq!(deltas(&events), vec!["ok"]);
        assert_eq!(events.last(), Some(&SseEvent::Frame(StreamFrame::Terminator)));
    }

    #[test]
    fn trailing_line_without_newline_is_flushed_at_end() {
        let mut reader = SseReader::new();
        assert!(reader
            .feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}")
            .is_empty());
        let events = reader.finish();
        assert_eq!(deltas(&events), vec!["tail"]);
        assert!(reader.finish().is_empty());
        assert!(reader.feed(b"data: x\n").is_empty());
    }
}
