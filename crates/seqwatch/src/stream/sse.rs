//! Incremental `text/event-stream` decoder.

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream, if any.
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Feeds arbitrary byte chunks in, gets complete events out.
///
/// Lines may end in `\n`, `\r\n` or `\r`. An event is dispatched on a
/// blank line; events without data lines are dropped. A partial event left
/// at end of stream is never dispatched.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    started: bool,
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        if !self.started {
            if self.buffer.len() < 3 && b"\xEF\xBB\xBF".starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(b"\xEF\xBB\xBF") {
                self.buffer.drain(..3);
            }
            self.started = true;
        }

        let mut events = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buffer.len() {
            let next = match self.buffer[i] {
                b'\n' => i + 1,
                b'\r' => {
                    if i + 1 == self.buffer.len() {
                        // Might be the first half of \r\n.
                        break;
                    }
                    if self.buffer[i + 1] == b'\n' {
                        i + 2
                    } else {
                        i + 1
                    }
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            let line = String::from_utf8_lossy(&self.buffer[start..i]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = next;
            i = next;
        }
        self.buffer.drain(..start);
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event_type,
            data,
            id: self.last_id.clone(),
            retry: self.retry,
        })
    }
}
