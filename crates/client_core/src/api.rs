//! REST boundary to the chat backend.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::UserId,
    error::ApiError,
    protocol::{HistoryRecord, LoginForm, RegisterRequest, TokenResponse, UserSummary},
};
use url::Url;

/// Filter value that never matches a real username, so the user listing
/// returns everyone, the caller included.
pub const LOOKUP_SENTINEL: &str = "__lookup__";

#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_all_users(&self, filter: &str) -> Result<Vec<UserSummary>>;
    async fn list_chat_users(&self, username: &str) -> Result<Vec<UserSummary>>;
    async fn fetch_history(
        &self,
        user_id: UserId,
        contact_id: UserId,
    ) -> Result<Vec<HistoryRecord>>;
    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse>;
    async fn register(&self, request: &RegisterRequest) -> Result<UserSummary>;
    async fn health(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        let base =
            Url::parse(server_url).with_context(|| format!("invalid server_url: {server_url}"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server_url cannot carry a path: {server_url}"));
        }
        Ok(Self {
            http: Client::new(),
            base,
            token: None,
        })
    }

    /// Same backend, with every request carrying `Authorization: Bearer`.
    pub fn authenticated(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base: self.base.clone(),
            token: Some(token.into()),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("not logged in: missing access token"))?;
        Ok(request
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json"))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments);
        let response = self
            .authorized(self.http.get(url.clone()))?
            .send()
            .await
            .with_context(|| format!("request failed: GET {url}"))?;
        decode(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::from_response(status.as_u16(), &body).into());
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(ensure_success(response).await?.json().await?)
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_all_users(&self, filter: &str) -> Result<Vec<UserSummary>> {
        self.get_json(&["user_lists", "all_users", filter]).await
    }

    async fn list_chat_users(&self, username: &str) -> Result<Vec<UserSummary>> {
        self.get_json(&["user_lists", "chat_user", username]).await
    }

    async fn fetch_history(
        &self,
        user_id: UserId,
        contact_id: UserId,
    ) -> Result<Vec<HistoryRecord>> {
        let user_id = user_id.to_string();
        let contact_id = contact_id.to_string();
        self.get_json(&["messages", &user_id, &contact_id]).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.endpoint(&["login"]))
            .form(&LoginForm {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;
        decode(response).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<UserSummary> {
        let response = self
            .http
            .post(self.endpoint(&["register"]))
            .json(request)
            .send()
            .await
            .context("register request failed")?;
        decode(response).await
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(self.endpoint(&["health"]))
            .send()
            .await
            .context("health request failed")?;
        // Any success status counts; the body is not inspected.
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
