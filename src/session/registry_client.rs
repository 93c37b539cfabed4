use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::api::{LeaveRequest, TokenRequest, TokenResponse, UsersResponse};
use crate::registry::ParticipantRecord;

use super::SessionError;

/// What the call session needs from the registry server.
pub trait RegistryApi: Send + Sync + 'static {
    fn request_token(
        &self,
        channel: &str,
        user_name: &str,
    ) -> impl Future<Output = Result<TokenResponse, SessionError>> + Send;

    fn fetch_users(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Vec<ParticipantRecord>, SessionError>> + Send;

    fn notify_leave(&self, uid: u32) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// `RegistryApi` over the REST surface served by [`crate::api::router`].
#[derive(Clone)]
pub struct HttpRegistryClient {
    http: Client,
    base_url: String,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl RegistryApi for HttpRegistryClient {
    async fn request_token(
        &self,
        channel: &str,
        user_name: &str,
    ) -> Result<TokenResponse, SessionError> {
        let body = TokenRequest {
            channel_name: Some(channel.to_string()),
            user_name: Some(user_name.to_string()),
        };

        let resp = self
            .http
            .post(self.url("/token"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<TokenResponse>().await?)
    }

    async fn fetch_users(&self, channel: &str) -> Result<Vec<ParticipantRecord>, SessionError> {
        let mut url = reqwest::Url::parse(&self.url("/users"))
            .map_err(|e| SessionError::Registry(format!("invalid registry url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SessionError::Registry("registry url cannot have a path".into()))?
            .push(channel);

        let resp = self.http.get(url).send().await?.error_for_status()?;
        let users = resp.json::<UsersResponse>().await?.users;

        debug!(channel, count = users.len(), "fetched channel users");
        Ok(users)
    }

    async fn notify_leave(&self, uid: u32) -> Result<(), SessionError> {
        self.http
            .post(self.url("/leave"))
            .json(&LeaveRequest { uid: Some(uid) })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
