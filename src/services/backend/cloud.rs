//! Client for the hosted scanning API.

use super::{
    BackendError, BackendInitError, BackendOptions,
    protocol::{EngineFrame, PullChannel, ScanContext, ScanInit, serve_pulls},
};
use crate::{
    models::{backend_config::CloudSettings, verdict::RawVerdictPayload},
    services::content_provider::ContentProvider,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use tracing::info;

#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_range_bytes: u64,
}

/// Reply to session creation and to every chunk upload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionReply {
    #[serde(default)]
    session_id: Option<String>,
    command: EngineFrame,
}

impl CloudClient {
    pub fn new(
        settings: &CloudSettings,
        options: &BackendOptions,
    ) -> Result<Self, BackendInitError> {
        if !settings.has_credential() {
            return Err(BackendInitError::MissingCredential);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(BackendInitError::HttpClient)?;

        Ok(Self {
            http,
            endpoint: settings.endpoint_url(),
            api_key: settings.api_key.trim().to_string(),
            max_range_bytes: options.max_range_bytes,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorization(&self) -> String {
        format!("ApiKey {}", self.api_key)
    }

    /// Checks reachability and that the API key is accepted.
    pub async fn ping(&self) -> Result<String, BackendError> {
        let response = self
            .http
            .get(format!("{}/api/v1/health", self.endpoint))
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await?;
        check_status(response).await?;
        Ok(format!("hosted API at {}", self.endpoint))
    }

    pub async fn scan_buffer(
        &self,
        data: Bytes,
        ctx: &ScanContext,
    ) -> Result<RawVerdictPayload, BackendError> {
        let mut query: Vec<(&str, String)> = vec![("identifier", ctx.identifier.clone())];
        query.extend(ctx.toggles.query_pairs());
        query.extend(ctx.tags.iter().map(|tag| ("tag", tag.clone())));

        info!(
            scan_id = %ctx.identifier,
            endpoint = %self.endpoint,
            size = data.len(),
            "submitting buffer to hosted API"
        );
        let response = self
            .http
            .post(format!("{}/api/v1/scan", self.endpoint))
            .header(AUTHORIZATION, self.authorization())
            .query(&query)
            .body(data)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        Ok(RawVerdictPayload::new(&ctx.identifier, body))
    }

    pub async fn scan_stream(
        &self,
        provider: &dyn ContentProvider,
        ctx: &ScanContext,
    ) -> Result<RawVerdictPayload, BackendError> {
        info!(
            scan_id = %ctx.identifier,
            endpoint = %self.endpoint,
            size = provider.size(),
            "opening hosted API scan session"
        );
        let response = self
            .http
            .post(format!("{}/api/v1/sessions", self.endpoint))
            .header(AUTHORIZATION, self.authorization())
            .json(&ScanInit::new(ctx, provider.size()))
            .send()
            .await?;
        let reply: SessionReply = check_status(response).await?.json().await?;
        let session_id = reply
            .session_id
            .ok_or_else(|| BackendError::Protocol("session reply without sessionId".into()))?;

        let mut channel = SessionChannel {
            client: self,
            session_id,
        };
        serve_pulls(
            &mut channel,
            reply.command,
            provider,
            &ctx.identifier,
            self.max_range_bytes,
        )
        .await
    }
}

struct SessionChannel<'a> {
    client: &'a CloudClient,
    session_id: String,
}

#[async_trait]
impl PullChannel for SessionChannel<'_> {
    async fn reply(&mut self, offset: u64, data: Bytes) -> Result<EngineFrame, BackendError> {
        let url = format!(
            "{}/api/v1/sessions/{}/chunks/{}",
            self.client.endpoint, self.session_id, offset
        );
        let response = self
            .client
            .http
            .put(url)
            .header(AUTHORIZATION, self.client.authorization())
            .body(data)
            .send()
            .await?;
        let reply: SessionReply = check_status(response).await?.json().await?;
        Ok(reply.command)
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BackendError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
