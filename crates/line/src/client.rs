use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use shiftbot_core::config::LineConfig;
use shiftbot_core::domain::profile::{LineUserId, Profile};

use crate::events::ReplyToken;
use crate::menu::{RichMenu, RichMenuImage};
use crate::messages::Message;

#[derive(Debug, Error)]
pub enum LineApiError {
    #[error("{endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("{endpoint} returned {status}: {body}")]
    Status { endpoint: String, status: u16, body: String },
    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("messaging client misconfigured: {0}")]
    Configuration(String),
}

impl LineApiError {
    /// Timeouts, transport failures, throttling and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Decode { .. } | Self::Configuration(_) => false,
        }
    }
}

/// Outbound Messaging API surface used by the workflow.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn get_profile(&self, user_id: &LineUserId) -> Result<Profile, LineApiError>;

    /// Spends `token`. The upstream rejects a token used twice, so callers
    /// hand it over by value.
    async fn reply(&self, token: ReplyToken, messages: Vec<Message>) -> Result<(), LineApiError>;

    async fn push(&self, to: &LineUserId, messages: Vec<Message>) -> Result<(), LineApiError>;

    async fn create_rich_menu(&self, menu: &RichMenu) -> Result<String, LineApiError>;

    async fn upload_rich_menu_image(
        &self,
        rich_menu_id: &str,
        image: &RichMenuImage,
    ) -> Result<(), LineApiError>;

    async fn link_rich_menu(
        &self,
        user_id: &LineUserId,
        rich_menu_id: &str,
    ) -> Result<(), LineApiError>;
}

#[derive(Clone)]
pub struct LineMessagingClient {
    http: Client,
    access_token: SecretString,
    api_base_url: String,
    data_api_base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    user_id: Option<String>,
    #[serde(default)]
    display_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRichMenuResponse {
    rich_menu_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: &'a [Message],
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: &'a [Message],
}

impl LineMessagingClient {
    pub fn new(config: &LineConfig) -> Result<Self, LineApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LineApiError::Configuration(error.to_string()))?;

        Ok(Self {
            http,
            access_token: config.channel_access_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            data_api_base_url: config.data_api_base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response, LineApiError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    LineApiError::Timeout { endpoint: endpoint.to_owned() }
                } else {
                    LineApiError::Transport {
                        endpoint: endpoint.to_owned(),
                        message: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LineApiError::Status {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(endpoint, status = status.as_u16(), "messaging api call succeeded");
        Ok(response)
    }
}

fn decode_error(endpoint: &str, error: reqwest::Error) -> LineApiError {
    LineApiError::Decode { endpoint: endpoint.to_owned(), message: error.to_string() }
}

#[async_trait]
impl MessagingApi for LineMessagingClient {
    async fn get_profile(&self, user_id: &LineUserId) -> Result<Profile, LineApiError> {
        let endpoint = "GET /v2/bot/profile";
        let url = format!("{}/v2/bot/profile/{}", self.api_base_url, user_id.as_str());
        let response = self.send(endpoint, self.http.get(url)).await?;
        let profile: ProfileResponse =
            response.json().await.map_err(|error| decode_error(endpoint, error))?;

        Ok(Profile {
            user_id: profile.user_id.map(LineUserId).unwrap_or_else(|| user_id.clone()),
            display_name: profile.display_name,
        })
    }

    async fn reply(&self, token: ReplyToken, messages: Vec<Message>) -> Result<(), LineApiError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base_url);
        let body = ReplyRequest { reply_token: token.as_str(), messages: &messages };
        self.send("POST /v2/bot/message/reply", self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn push(&self, to: &LineUserId, messages: Vec<Message>) -> Result<(), LineApiError> {
        let url = format!("{}/v2/bot/message/push", self.api_base_url);
        let body = PushRequest { to: to.as_str(), messages: &messages };
        self.send("POST /v2/bot/message/push", self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn create_rich_menu(&self, menu: &RichMenu) -> Result<String, LineApiError> {
        let endpoint = "POST /v2/bot/richmenu";
        let url = format!("{}/v2/bot/richmenu", self.api_base_url);
        let response = self.send(endpoint, self.http.post(url).json(menu)).await?;
        let created: CreateRichMenuResponse =
            response.json().await.map_err(|error| decode_error(endpoint, error))?;
        Ok(created.rich_menu_id)
    }

    async fn upload_rich_menu_image(
        &self,
        rich_menu_id: &str,
        image: &RichMenuImage,
    ) -> Result<(), LineApiError> {
        let url = format!("{}/v2/bot/richmenu/{rich_menu_id}/content", self.data_api_base_url);
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, image.content_type)
            .body(image.bytes.clone());
        self.send("POST /v2/bot/richmenu/{id}/content", request).await?;
        Ok(())
    }

    async fn link_rich_menu(
        &self,
        user_id: &LineUserId,
        rich_menu_id: &str,
    ) -> Result<(), LineApiError> {
        let url = format!(
            "{}/v2/bot/user/{}/richmenu/{rich_menu_id}",
            self.api_base_url,
            user_id.as_str()
        );
        self.send("POST /v2/bot/user/{id}/richmenu/{id}", self.http.post(url)).await?;
        Ok(())
    }
}
