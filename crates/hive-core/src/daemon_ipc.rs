//! Newline-delimited JSON envelopes exchanged with the session daemon.
//!
//! Every RPC is one request envelope answered by one reply envelope carrying
//! the same `request_id`. Subscribed clients additionally receive `event`
//! envelopes without a request id.

use crate::model::{PaneViewRequest, PaneViewResponse, StateSnapshot};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{BufRead, Read};
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VersionVisitor;

        impl<'de> Visitor<'de> for VersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as integer or string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                u16::try_from(value)
                    .map(ProtocolVersion)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                value
                    .trim()
                    .trim_start_matches('v')
                    .parse::<u16>()
                    .map(ProtocolVersion)
                    .map_err(|err| E::custom(format!("invalid protocol version '{value}': {err}")))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: WireMsg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMsg {
    Hello(HelloPayload),
    Subscribe(SubscribePayload),
    SnapshotState(SnapshotStatePayload),
    Snapshot(StateSnapshot),
    GetPaneView(PaneViewRequest),
    PaneView(PaneViewResponse),
    FocusPane(FocusPanePayload),
    FocusSession(FocusSessionPayload),
    Ack(AckPayload),
    Event(DaemonEventPayload),
    Error(ErrorPayload),
}

impl WireMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMsg::Hello(_) => "hello",
            WireMsg::Subscribe(_) => "subscribe",
            WireMsg::SnapshotState(_) => "snapshot_state",
            WireMsg::Snapshot(_) => "snapshot",
            WireMsg::GetPaneView(_) => "get_pane_view",
            WireMsg::PaneView(_) => "pane_view",
            WireMsg::FocusPane(_) => "focus_pane",
            WireMsg::FocusSession(_) => "focus_session",
            WireMsg::Ack(_) => "ack",
            WireMsg::Event(_) => "event",
            WireMsg::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub client_id: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribePayload {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotStatePayload {
    #[serde(default)]
    pub since_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusPanePayload {
    pub pane_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusSessionPayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AckPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaemonEventPayload {
    PaneUpdated {
        pane_id: String,
        #[serde(default)]
        update_seq: u64,
    },
    SessionChanged {
        #[serde(default)]
        session: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame read failed: {message}")]
    Read {
        kind: std::io::ErrorKind,
        message: String,
    },
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

fn trim_line_end(mut raw: &[u8]) -> &[u8] {
    while let Some((last, rest)) = raw.split_last() {
        if *last == b'\n' || *last == b'\r' {
            raw = rest;
        } else {
            break;
        }
    }
    raw
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8], max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = trim_line_end(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Reads one frame from a blocking reader. `Ok(None)` means the peer closed
/// the stream cleanly; blank lines are skipped. At most `max_frame_bytes`
/// plus a line ending is buffered per frame.
pub fn read_frame<T: DeserializeOwned, R: BufRead>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<T>, FrameError> {
    let limit = max_frame_bytes.saturating_add(2);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .by_ref()
            .take(limit as u64)
            .read_until(b'\n', &mut line)
            .map_err(|err| FrameError::Read {
                kind: err.kind(),
                message: err.to_string(),
            })?;
        if read == 0 {
            return Ok(None);
        }
        if line.len() >= limit && line.last() != Some(&b'\n') {
            return Err(FrameError::OversizedFrame {
                size: line.len(),
                max: max_frame_bytes,
            });
        }
        if trim_line_end(&line).is_empty() {
            continue;
        }
        return decode_frame(&line, max_frame_bytes).map(Some);
    }
}

#[derive(Debug)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Incremental decoder for streamed chunks; malformed lines are reported and
/// skipped so one bad frame never stalls the stream.
pub struct NdjsonFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T> NdjsonFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T> Default for NdjsonFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> NdjsonFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        self.pending.extend_from_slice(chunk);
        let mut report = DecodeReport::default();

        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset + 1;
            let line = trim_line_end(&self.pending[consumed..end]);
            if !line.is_empty() {
                match decode_frame(line, self.max_frame_bytes) {
                    Ok(frame) => report.frames.push(frame),
                    Err(err) => report.errors.push(err),
                }
            }
            consumed = end;
        }
        self.pending.drain(..consumed);

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }
        report
    }

    pub fn finish(&mut self) -> DecodeReport<T> {
        let rest = std::mem::take(&mut self.pending);
        let mut report = DecodeReport::default();
        if trim_line_end(&rest).is_empty() {
            return report;
        }
        match decode_frame(&rest, self.max_frame_bytes) {
            Ok(frame) => report.frames.push(frame),
            Err(err) => report.errors.push(err),
        }
        report
    }
}
