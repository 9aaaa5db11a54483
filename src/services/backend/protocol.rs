//! Frames and the pull loop shared by both backend transports.
//!
//! A scan opens with a [`ScanInit`]; the engine then issues `retr` commands
//! for the windows it wants and finishes with `quit` carrying the raw verdict.
//! The on-premise engine exchanges these as length-delimited JSON frames over
//! TCP; the hosted API carries the same commands in HTTP bodies.

use super::BackendError;
use crate::{
    models::{scan::ScanOptions, verdict::RawVerdictPayload},
    services::content_provider::ContentProvider,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_util::codec::LengthDelimitedCodec;
use tracing::debug;

/// Backend-side form of the scan options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanToggles {
    pub digest: bool,
    pub pml: bool,
    pub feedback: bool,
    pub verbose: bool,
    pub active_content: bool,
}

impl From<&ScanOptions> for ScanToggles {
    fn from(options: &ScanOptions) -> Self {
        Self {
            digest: options.digest_enabled,
            pml: options.predictive_ml_enabled,
            feedback: options.feedback_enabled,
            verbose: options.verbose_enabled,
            active_content: options.active_content_enabled,
        }
    }
}

impl ScanToggles {
    /// Query-string form used by the hosted API.
    pub fn query_pairs(&self) -> [(&'static str, String); 5] {
        [
            ("digest", self.digest.to_string()),
            ("pml", self.pml.to_string()),
            ("feedback", self.feedback.to_string()),
            ("verbose", self.verbose.to_string()),
            ("activeContent", self.active_content.to_string()),
        ]
    }
}

/// Per-scan parameters handed to a backend.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub identifier: String,
    pub tags: Vec<String>,
    pub toggles: ScanToggles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanInit {
    pub identifier: String,
    pub size: u64,
    pub tags: Vec<String>,
    pub toggles: ScanToggles,
}

impl ScanInit {
    pub fn new(ctx: &ScanContext, size: u64) -> Self {
        Self {
            identifier: ctx.identifier.clone(),
            size,
            tags: ctx.tags.clone(),
            toggles: ctx.toggles,
        }
    }
}

/// Frames sent by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Init(ScanInit),
    Chunk {
        offset: u64,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
}

/// Frames sent by a scanning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineFrame {
    Pong { engine: String },
    Retr { offset: u64, length: u64 },
    Quit { result: String },
    Error { message: String },
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

/// Codec for the engine connection; frames must fit one base64 chunk.
pub(crate) fn frame_codec(max_range_bytes: u64) -> LengthDelimitedCodec {
    let max_frame = (max_range_bytes as usize / 3 + 1) * 4 + 64 * 1024;
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame)
        .new_codec()
}

pub(crate) fn encode_frame<T: Serialize>(frame: &T) -> Result<Bytes, BackendError> {
    serde_json::to_vec(frame)
        .map(Bytes::from)
        .map_err(|err| BackendError::Protocol(format!("encoding frame: {}", err)))
}

pub(crate) fn decode_frame<T: DeserializeOwned>(raw: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(raw)
        .map_err(|err| BackendError::Protocol(format!("undecodable frame: {}", err)))
}

/// One leg of the pull exchange: deliver a chunk, get the next command.
#[async_trait]
pub(crate) trait PullChannel: Send {
    async fn reply(&mut self, offset: u64, data: Bytes) -> Result<EngineFrame, BackendError>;
}

/// Answer engine commands from `provider` until the engine quits.
///
/// Each requested window is read, sent and dropped before the next command
/// is awaited, so at most one window is resident per scan.
pub(crate) async fn serve_pulls<C: PullChannel + ?Sized>(
    channel: &mut C,
    first: EngineFrame,
    provider: &dyn ContentProvider,
    scan_id: &str,
    max_range_bytes: u64,
) -> Result<RawVerdictPayload, BackendError> {
    let mut command = first;
    let mut served: u64 = 0;

    loop {
        command = match command {
            EngineFrame::Retr { offset, length } => {
                if length > max_range_bytes {
                    return Err(BackendError::Protocol(format!(
                        "engine requested {} bytes, limit is {}",
                        length, max_range_bytes
                    )));
                }
                let chunk = provider.read_range(offset, length).await?;
                served += chunk.len() as u64;
                channel.reply(offset, chunk).await?
            }
            EngineFrame::Quit { result } => {
                debug!(scan_id, served, size = provider.size(), "engine finished pulling");
                return Ok(RawVerdictPayload::new(scan_id, result));
            }
            EngineFrame::Error { message } => return Err(BackendError::Engine(message)),
            EngineFrame::Pong { .. } => {
                return Err(BackendError::Protocol("unexpected pong during scan".into()));
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::content_provider::BytesProvider;

    /// Scripted engine: pulls fixed windows, then quits.
    struct Scripted {
        windows: Vec<(u64, u64)>,
        seen: Vec<(u64, usize)>,
    }

    #[async_trait]
    impl PullChannel for Scripted {
        async fn reply(&mut self, offset: u64, data: Bytes) -> Result<EngineFrame, BackendError> {
            self.seen.push((offset, data.len()));
            Ok(match self.windows.pop() {
                Some((offset, length)) => EngineFrame::Retr { offset, length },
                None => EngineFrame::Quit {
                    result: "{}".into(),
                },
            })
        }
    }

    #[test]
    fn chunk_frames_carry_base64() {
        let frame = ClientFrame::Chunk {
            offset: 7,
            data: Bytes::from_static(b"hello"),
        };
        let encoded = encode_frame(&frame).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains(r#""type":"chunk""#));
        assert!(text.contains("aGVsbG8="));
        assert_eq!(decode_frame::<ClientFrame>(&encoded).unwrap(), frame);
    }

    #[test]
    fn toggles_are_translated_one_to_one() {
        let options = ScanOptions {
            digest_enabled: false,
            predictive_ml_enabled: true,
            feedback_enabled: false,
            verbose_enabled: true,
            active_content_enabled: false,
        };
        let toggles = ScanToggles::from(&options);
        assert_eq!(
            toggles,
            ScanToggles {
                digest: false,
                pml: true,
                feedback: false,
                verbose: true,
                active_content: false,
            }
        );
        assert_eq!(toggles.query_pairs()[1], ("pml", "true".to_string()));
    }

    #[tokio::test]
    async fn serves_non_monotonic_and_repeated_windows() {
        let provider = BytesProvider::new("mem", Bytes::from(vec![1u8; 100]));
        let mut channel = Scripted {
            // popped from the back
            windows: vec![(10, 10), (90, 50), (10, 10)],
            seen: vec![],
        };

        let payload = serve_pulls(
            &mut channel,
            EngineFrame::Retr {
                offset: 50,
                length: 25,
            },
            &provider,
            "scan-1",
            1024,
        )
        .await
        .unwrap();

        assert_eq!(payload.scan_id, "scan-1");
        assert_eq!(channel.seen, vec![(50, 25), (10, 10), (90, 10), (10, 10)]);
    }

    #[tokio::test]
    async fn oversized_window_is_a_protocol_error() {
        let provider = BytesProvider::new("mem", Bytes::from(vec![0u8; 10]));
        let mut channel = Scripted {
            windows: vec![],
            seen: vec![],
        };

        let err = serve_pulls(
            &mut channel,
            EngineFrame::Retr {
                offset: 0,
                length: 4096,
            },
            &provider,
            "scan-2",
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BackendError::Protocol(_)));
        assert!(channel.seen.is_empty());
    }

    #[tokio::test]
    async fn engine_error_is_surfaced() {
        let provider = BytesProvider::new("mem", Bytes::from_static(b"x"));
        let mut channel = Scripted {
            windows: vec![],
            seen: vec![],
        };

        let err = serve_pulls(
            &mut channel,
            EngineFrame::Error {
                message: "license expired".into(),
            },
            &provider,
            "scan-3",
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BackendError::Engine(ref m) if m == "license expired"));
    }
}
