//! Client for an on-premise scanning engine.
//!
//! One TCP connection (optionally TLS) per scan, opened lazily. Frames are
//! length-delimited JSON, see [`super::protocol`].

use super::{
    BackendError, BackendInitError, BackendOptions,
    protocol::{
        ClientFrame, EngineFrame, PullChannel, ScanContext, ScanInit, decode_frame, encode_frame,
        frame_codec, serve_pulls,
    },
};
use crate::{
    models::{backend_config::ExternalSettings, verdict::RawVerdictPayload},
    services::content_provider::ContentProvider,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, lookup_host},
    time::timeout,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, crypto::ring, pki_types::ServerName},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info};

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type Connection = Framed<Box<dyn Transport>, LengthDelimitedCodec>;

#[derive(Clone)]
pub struct ExternalClient {
    address: String,
    host: String,
    port: u16,
    tls: Option<TlsConnector>,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_range_bytes: u64,
}

impl ExternalClient {
    pub fn new(
        settings: &ExternalSettings,
        options: &BackendOptions,
    ) -> Result<Self, BackendInitError> {
        let (host, port) = parse_address(&settings.address)?;
        let tls = if settings.use_tls {
            Some(tls_connector()?)
        } else {
            None
        };

        Ok(Self {
            address: settings.address.trim().to_string(),
            host,
            port,
            tls,
            connect_timeout: options.connect_timeout,
            io_timeout: options.request_timeout,
            max_range_bytes: options.max_range_bytes,
        })
    }

    pub fn descriptor(&self) -> String {
        let scheme = if self.tls.is_some() { "tls" } else { "tcp" };
        format!("{}://{}", scheme, self.address)
    }

    async fn connect(&self) -> Result<Connection, BackendError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| BackendError::Resolve {
                address: self.address.clone(),
                source,
            })?
            .collect();

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host has no addresses");
        let mut tcp = None;
        for addr in &addrs {
            match timeout(self.connect_timeout, TcpStream::connect(*addr)).await {
                Ok(Ok(stream)) => {
                    tcp = Some(stream);
                    break;
                }
                Ok(Err(err)) => last_err = err,
                Err(_) => last_err = io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            }
        }
        let tcp = tcp.ok_or_else(|| BackendError::Connect {
            address: self.address.clone(),
            source: last_err,
        })?;
        tcp.set_nodelay(true)?;

        let io: Box<dyn Transport> = match &self.tls {
            Some(connector) => {
                let name = ServerName::try_from(self.host.clone()).map_err(|err| {
                    BackendError::TlsHandshake {
                        address: self.address.clone(),
                        source: io::Error::new(io::ErrorKind::InvalidInput, err),
                    }
                })?;
                let handshake = timeout(self.connect_timeout, connector.connect(name, tcp));
                let stream = handshake
                    .await
                    .map_err(|_| BackendError::Connect {
                        address: self.address.clone(),
                        source: io::Error::new(io::ErrorKind::TimedOut, "TLS handshake stalled"),
                    })?
                    .map_err(|source| BackendError::TlsHandshake {
                        address: self.address.clone(),
                        source,
                    })?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };

        debug!(address = %self.address, "connected to scan engine");
        Ok(Framed::new(io, frame_codec(self.max_range_bytes)))
    }

    pub async fn ping(&self) -> Result<String, BackendError> {
        let mut conn = self.connect().await?;
        send(&mut conn, &ClientFrame::Ping).await?;
        match recv(&mut conn, self.io_timeout).await? {
            EngineFrame::Pong { engine } => Ok(engine),
            other => Err(BackendError::Protocol(format!(
                "expected pong, got {:?}",
                other
            ))),
        }
    }

    pub async fn scan(
        &self,
        provider: &dyn ContentProvider,
        ctx: &ScanContext,
    ) -> Result<RawVerdictPayload, BackendError> {
        let mut conn = self.connect().await?;
        info!(
            scan_id = %ctx.identifier,
            address = %self.address,
            size = provider.size(),
            "submitting scan to external engine"
        );

        send(
            &mut conn,
            &ClientFrame::Init(ScanInit::new(ctx, provider.size())),
        )
        .await?;
        let first = recv(&mut conn, self.io_timeout).await?;

        let mut channel = FramedChannel {
            conn: &mut conn,
            io_timeout: self.io_timeout,
        };
        serve_pulls(
            &mut channel,
            first,
            provider,
            &ctx.identifier,
            self.max_range_bytes,
        )
        .await
    }
}

struct FramedChannel<'a> {
    conn: &'a mut Connection,
    io_timeout: Duration,
}

#[async_trait]
impl PullChannel for FramedChannel<'_> {
    async fn reply(&mut self, offset: u64, data: Bytes) -> Result<EngineFrame, BackendError> {
        send(&mut *self.conn, &ClientFrame::Chunk { offset, data }).await?;
        recv(&mut *self.conn, self.io_timeout).await
    }
}

async fn send(conn: &mut Connection, frame: &ClientFrame) -> Result<(), BackendError> {
    conn.send(encode_frame(frame)?).await?;
    Ok(())
}

async fn recv(conn: &mut Connection, limit: Duration) -> Result<EngineFrame, BackendError> {
    match timeout(limit, conn.next()).await {
        Ok(Some(frame)) => decode_frame(&frame?),
        Ok(None) => Err(BackendError::ConnectionClosed),
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}

/// Split `host:port`; IPv6 hosts must be bracketed (`[::1]:9000`).
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), BackendInitError> {
    let trimmed = address.trim();
    let invalid = |reason: &str| BackendInitError::InvalidAddress {
        address: trimmed.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.contains("://") {
        return Err(invalid("expected host:port without a scheme"));
    }
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| invalid("unterminated IPv6 bracket"))?,
        None if host.contains(':') => return Err(invalid("IPv6 hosts must be bracketed")),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok((host.to_string(), port)),
        _ => Err(invalid("port must be a number between 1 and 65535")),
    }
}

fn tls_connector() -> Result<TlsConnector, BackendInitError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|err| BackendInitError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
