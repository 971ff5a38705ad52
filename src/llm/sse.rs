//! Incremental decoder for OpenAI-style `text/event-stream` chat bodies.
//!
//! The body arrives in arbitrary byte chunks. Complete lines are split out,
//! `data:` payloads are decoded as chat chunks and everything else (comments,
//! event names, blank separators) is ignored. `data: [DONE]` ends generation.

use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::{trace, warn};

use super::{FragmentStream, ProviderError};

const DONE_MARKER: &str = "[DONE]";

/// Longest unterminated line kept in the buffer.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One decoded event of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Fragment(String),
    Done,
}

#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
    done: bool,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[DONE]` has been seen. Input after it is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one body chunk; returns the events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ChatEvent>, ProviderError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=self.scanned + offset).collect();
            self.scanned = 0;
            if let Some(event) = decode_line(&line)? {
                let done = event == ChatEvent::Done;
                events.push(event);
                if done {
                    self.done = true;
                    self.buf.clear();
                    break;
                }
            }
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            return Err(ProviderError::Stream(format!(
                "event stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(events)
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Result<Vec<ChatEvent>, ProviderError> {
        if self.done || self.buf.is_empty() {
            return Ok(Vec::new());
        }
        let line = std::mem::take(&mut self.buf);
        self.scanned = 0;
        match decode_line(&line)? {
            Some(ChatEvent::Done) => {
                self.done = true;
                Ok(vec![ChatEvent::Done])
            }
            Some(event) => Ok(vec![event]),
            None => Ok(Vec::new()),
        }
    }
}

fn decode_line(raw: &[u8]) -> Result<Option<ChatEvent>, ProviderError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| ProviderError::Stream(format!("invalid UTF-8 in event stream: {e}")))?;
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim_start();
    if payload == DONE_MARKER {
        return Ok(Some(ChatEvent::Done));
    }
    if payload.is_empty() {
        return Ok(None);
    }

    trace!(payload, "stream chunk");
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| ProviderError::Stream(format!("malformed stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(ProviderError::Stream(err.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(ChatEvent::Fragment))
}

/// Turn a raw body stream into a [`FragmentStream`].
///
/// The body must end with `[DONE]`; closing without it, a transport error or
/// a malformed chunk all end the stream with a single `Err`.
pub fn fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body,
        decoder: ChatStreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.feed(chunk.as_ref());
                    st.absorb(events);
                }
                Some(Err(e)) => {
                    st.fail(ProviderError::Stream(format!("transport: {e}")));
                }
                None => {
                    let events = st.decoder.finish();
                    st.absorb(events);
                    if !st.decoder.is_done() && !st.finished {
                        warn!("upstream closed the stream before [DONE]");
                        st.fail(ProviderError::Stream("stream ended before [DONE]".into()));
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

struct DecodeState<S> {
    body: S,
    decoder: ChatStreamDecoder,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, events: Result<Vec<ChatEvent>, ProviderError>) {
        match events {
            Ok(events) => {
                for event in events {
                    match event {
                        ChatEvent::Fragment(text) => self.pending.push_back(Ok(text)),
                        ChatEvent::Done => self.finished = true,
                    }
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, err: ProviderError) {
        self.pending.push_back(Err(err));
        self.finished = true;
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}
