// https://developers.facebook.com/docs/whatsapp/cloud-api/reference/messages

use std::path::PathBuf;
use std::time::Duration;

pub mod models;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

pub use crate::models::{ListRow, MediaInfo, ReplyButton, SendMessageResponse};

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("request to WhatsApp failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WhatsApp returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("failed to store media: {0}")]
    Io(#[from] std::io::Error),
}

impl WhatsAppError {
    /// Short classification used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WhatsAppError::Transport(e) if e.is_timeout() => "timeout",
            WhatsAppError::Transport(e) if e.is_decode() => "decode",
            WhatsAppError::Transport(_) => "transport",
            WhatsAppError::Api { status, .. } if status.is_server_error() => "http_5xx",
            WhatsAppError::Api { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
                "rate_limited"
            }
            WhatsAppError::Api { .. } => "http_4xx",
            WhatsAppError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppOptions {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_version: String,
    pub base_url: String,
    pub media_dir: PathBuf,
    pub request_timeout: Duration,
}

impl WhatsAppOptions {
    pub fn new(access_token: impl Into<String>, phone_number_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            phone_number_id: phone_number_id.into(),
            api_version: "v21.0".to_string(),
            base_url: "https://graph.facebook.com".to_string(),
            media_dir: std::env::temp_dir().join("whatsapp-media"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppService {
    options: WhatsAppOptions,
    client: Client,
}

impl WhatsAppService {
    pub fn new(options: WhatsAppOptions) -> Result<Self, WhatsAppError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Self { options, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{base}/{version}/{phone_id}/messages",
            base = self.options.base_url,
            version = self.options.api_version,
            phone_id = self.options.phone_number_id
        )
    }

    async fn post_message(&self, body: &Value) -> Result<SendMessageResponse, WhatsAppError> {
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.options.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api { status, body });
        }

        Ok(response.json::<SendMessageResponse>().await?)
    }

    pub async fn send_text(
        &self,
        to: &str,
        body: &str,
    ) -> Result<SendMessageResponse, WhatsAppError> {
        self.post_message(&models::text_body(to, body)).await
    }

    pub async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[ReplyButton],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<SendMessageResponse, WhatsAppError> {
        self.post_message(&models::buttons_body(to, body, buttons, header, footer))
            .await
    }

    pub async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<SendMessageResponse, WhatsAppError> {
        self.post_message(&models::list_body(
            to,
            body,
            button_label,
            rows,
            header,
            footer,
        ))
        .await
    }

    pub async fn mark_read(&self, message_id: &str) -> Result<(), WhatsAppError> {
        self.post_message(&models::read_receipt_body(message_id))
            .await
            .map(|_| ())
    }

    /// Send a previously captured message body again, replacing its recipient.
    pub async fn resend(
        &self,
        to: &str,
        raw_payload: &Value,
    ) -> Result<SendMessageResponse, WhatsAppError> {
        let mut body = raw_payload.clone();
        body["messaging_product"] = Value::from("whatsapp");
        body["to"] = Value::from(to);
        self.post_message(&body).await
    }

    /// Download a media object into the configured media directory.
    pub async fn download_media(&self, media_id: &str) -> Result<PathBuf, WhatsAppError> {
        let url = format!(
            "{base}/{version}/{media_id}",
            base = self.options.base_url,
            version = self.options.api_version,
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.options.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api { status, body });
        }
        let info = response.json::<MediaInfo>().await?;

        let response = self
            .client
            .get(&info.url)
            .bearer_auth(&self.options.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api { status, body });
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.options.media_dir).await?;
        let path = self
            .options
            .media_dir
            .join(media_file_name(media_id, info.mime_type.as_deref()));
        tokio::fs::write(&path, &bytes).await?;

        Ok(path)
    }
}

fn media_file_name(media_id: &str, mime_type: Option<&str>) -> String {
    let safe_id: String = media_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    let extension = mime_type
        .and_then(|m| m.split(';').next())
        .and_then(|m| m.rsplit('/').next())
        .map(|ext| ext.trim())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{safe_id}.{ext}"),
        None => format!("{safe_id}.bin"),
    }
}
