//! HTTP client for the remote session API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared_types::{
    RequestContext, ServerEvent, SessionApi, SessionApiError, SessionStatus, Timestamp, TokenGrant,
};
use tracing::debug;

use crate::config::ApiConfig;

pub const EVENTS_PATH: &str = "/api/auth/session/events";
pub const HEARTBEAT_PATH: &str = "/api/auth/session/heartbeat";
pub const REFRESH_PATH: &str = "/api/auth/token/refresh";
pub const VALIDATE_PATH: &str = "/api/auth/session/validate";

pub const DEVICE_HEADER: &str = "X-Device-Id";
pub const TAB_HEADER: &str = "X-Tab-Id";
pub const LEADER_HEADER: &str = "X-Tab-Leader";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// `SessionApi` over HTTP.
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpSessionApi {
    /// # Errors
    ///
    /// Returns `SessionApiError::Transport` if the client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, SessionApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_identity(&self, request: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        let mut request = request
            .header(DEVICE_HEADER, &ctx.device_id)
            .header(TAB_HEADER, ctx.tab_id.as_str())
            .header(LEADER_HEADER, if ctx.is_leader { "true" } else { "false" });
        if let Some(csrf) = &ctx.csrf_token {
            request = request.header(CSRF_HEADER, csrf);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SessionApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionApiError::Transport(e.to_string()))?;
        check_status(response.status())?;
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SessionApiError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| SessionApiError::Decode(e.to_string()))
    }
}

/// Map a response status onto the session error taxonomy.
fn check_status(status: StatusCode) -> Result<(), SessionApiError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED {
        Err(SessionApiError::Unauthorized)
    } else {
        Err(SessionApiError::Status {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn events_since(
        &self,
        ctx: &RequestContext,
        since: Timestamp,
    ) -> Result<Vec<ServerEvent>, SessionApiError> {
        let request = self
            .client
            .get(self.url(EVENTS_PATH))
            .query(&[("since", since)]);
        let events: Vec<ServerEvent> = self.send_json(self.with_identity(request, ctx)).await?;
        debug!(since, count = events.len(), "Fetched session events");
        Ok(events)
    }

    async fn heartbeat(&self, ctx: &RequestContext) -> Result<(), SessionApiError> {
        let request = self.client.post(self.url(HEARTBEAT_PATH));
        self.send(self.with_identity(request, ctx)).await?;
        Ok(())
    }

    async fn refresh_tokens(&self, ctx: &RequestContext) -> Result<TokenGrant, SessionApiError> {
        let request = self.client.post(self.url(REFRESH_PATH));
        self.send_json(self.with_identity(request, ctx)).await
    }

    async fn validate_session(
        &self,
        ctx: &RequestContext,
    ) -> Result<SessionStatus, SessionApiError> {
        let request = self.client.get(self.url(VALIDATE_PATH));
        self.send_json(self.with_identity(request, ctx)).await
    }
}
