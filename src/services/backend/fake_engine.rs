//! In-process stand-in for an on-premise scanning engine, for tests.

use super::protocol::{
    ClientFrame, EngineFrame, ScanInit, decode_frame, encode_frame, frame_codec,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

pub(crate) const EICAR: &[u8] = b"EICAR-STANDARD-ANTIVIRUS-TEST-FILE";
pub(crate) const DETECTION: &str = "Eicar_test_file";

#[derive(Debug, Clone)]
pub(crate) enum EngineBehavior {
    /// Pull the content front to back in windows of `chunk` bytes.
    Pull { chunk: u64 },
    /// Accept connections, read frames, never answer.
    Silent,
    /// Answer every scan with an engine error.
    Fail(String),
}

impl Default for EngineBehavior {
    fn default() -> Self {
        EngineBehavior::Pull { chunk: 64 * 1024 }
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct EngineLog {
    pub inits: Vec<ScanInit>,
    pub windows: Vec<(u64, u64)>,
}

impl EngineLog {
    pub fn requested_bytes(&self) -> u64 {
        self.windows.iter().map(|(_, len)| len).sum()
    }

    pub fn max_window(&self) -> u64 {
        self.windows.iter().map(|(_, len)| *len).max().unwrap_or(0)
    }
}

pub(crate) struct FakeEngine {
    addr: SocketAddr,
    log: Arc<Mutex<EngineLog>>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn spawn(behavior: EngineBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(EngineLog::default()));

        let task_log = log.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, behavior.clone(), task_log.clone()));
            }
        });

        Self { addr, log, task }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn log(&self) -> EngineLog {
        self.log.lock().unwrap().clone()
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, behavior: EngineBehavior, log: Arc<Mutex<EngineLog>>) {
    let mut conn = Framed::new(socket, frame_codec(64 * 1024 * 1024));

    while let Some(Ok(raw)) = conn.next().await {
        if matches!(behavior, EngineBehavior::Silent) {
            continue;
        }

        let init = match decode_frame::<ClientFrame>(&raw).unwrap() {
            ClientFrame::Ping => {
                let pong = EngineFrame::Pong {
                    engine: "fake-engine/1.0".into(),
                };
                conn.send(encode_frame(&pong).unwrap()).await.unwrap();
                continue;
            }
            ClientFrame::Init(init) => init,
            ClientFrame::Chunk { .. } => panic!("chunk before init"),
        };
        log.lock().unwrap().inits.push(init.clone());

        let chunk = match &behavior {
            EngineBehavior::Fail(message) => {
                let frame = EngineFrame::Error {
                    message: message.clone(),
                };
                conn.send(encode_frame(&frame).unwrap()).await.unwrap();
                continue;
            }
            EngineBehavior::Pull { chunk } => *chunk,
            EngineBehavior::Silent => unreachable!(),
        };

        let mut infected = false;
        let mut offset = 0;
        while offset < init.size {
            let length = chunk.min(init.size - offset);
            let retr = EngineFrame::Retr { offset, length };
            conn.send(encode_frame(&retr).unwrap()).await.unwrap();
            log.lock().unwrap().windows.push((offset, length));

            let Some(Ok(reply)) = conn.next().await else {
                return;
            };
            match decode_frame::<ClientFrame>(&reply).unwrap() {
                ClientFrame::Chunk { offset: got, data } => {
                    assert_eq!(got, offset);
                    infected |= data.windows(EICAR.len()).any(|w| w == EICAR);
                }
                other => panic!("expected chunk, got {:?}", other),
            }
            offset += length;
        }

        let quit = EngineFrame::Quit {
            result: verdict(&init, infected),
        };
        conn.send(encode_frame(&quit).unwrap()).await.unwrap();
    }
}

/// Verbose toggle selects the nested result shape, otherwise the flat one.
fn verdict(init: &ScanInit, infected: bool) -> String {
    let count = u32::from(infected);
    let doc = if init.toggles.verbose {
        let malware: Vec<_> = if infected {
            vec![json!({ "name": DETECTION, "type": "Virus" })]
        } else {
            vec![]
        };
        json!({
            "scanId": init.identifier,
            "fileSha256": "0000000000000000000000000000000000000000000000000000000000000000",
            "result": { "atse": { "malwareCount": count, "malware": malware } }
        })
    } else {
        let found: Vec<_> = if infected {
            vec![json!({ "fileName": init.identifier, "malwareName": DETECTION })]
        } else {
            vec![]
        };
        json!({
            "scanId": init.identifier,
            "scanResult": count,
            "foundMalwares": found
        })
    };
    doc.to_string()
}
