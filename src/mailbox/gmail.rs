//! Gmail REST implementation of [`MailboxGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::auth::GoogleAuth;
use super::{Header, Label, MailboxGateway, MessageRef, RawMessage, UNREAD_LABEL};
use crate::error::MailboxError;

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail delivers base64url with or without padding.
const BASE64URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub base_url: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl GmailConfig {
    /// Reads the optional `GMAIL_API_BASE_URL` override.
    pub fn from_env() -> Self {
        match std::env::var("GMAIL_API_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => Self {
                base_url: url.trim().trim_end_matches('/').to_string(),
            },
            _ => Self::default(),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewLabel<'a> {
    name: &'a str,
    label_list_visibility: &'a str,
    message_list_visibility: &'a str,
}

#[derive(Deserialize)]
struct CreatedLabel {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageListEntry>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListEntry {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    payload: MessagePart,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Deserialize)]
struct WireHeader {
    name: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct PartBody {
    data: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    raw: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    thread_id: &'a str,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Gmail API client authenticated with a [`GoogleAuth`] token provider.
pub struct GmailGateway {
    config: GmailConfig,
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
}

impl GmailGateway {
    pub fn new(config: GmailConfig, http: reqwest::Client, auth: Arc<GoogleAuth>) -> Self {
        Self { config, http, auth }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, MailboxError> {
        let token = self.auth.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MailboxError::RequestFailed {
                reason: format!("{what}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    if status == StatusCode::UNAUTHORIZED {
                        self.auth.invalidate().await;
                    }
                    MailboxError::AuthFailed {
                        reason: format!("{what} returned {status}: {body}"),
                    }
                }
                StatusCode::TOO_MANY_REQUESTS => MailboxError::RateLimited,
                _ => MailboxError::RequestFailed {
                    reason: format!("{what} returned {status}: {body}"),
                },
            });
        }

        response
            .json()
            .await
            .map_err(|e| MailboxError::InvalidResponse {
                reason: format!("{what}: {e}"),
            })
    }
}

#[async_trait]
impl MailboxGateway for GmailGateway {
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        let list: LabelList = self
            .call(self.http.get(self.url("labels")), "labels.list")
            .await?;
        Ok(list.labels)
    }

    async fn create_label(&self, name: &str) -> Result<String, MailboxError> {
        let request = self.http.post(self.url("labels")).json(&NewLabel {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        });
        let created: CreatedLabel = self.call(request, "labels.create").await?;
        debug!(label = %name, id = %created.id, "Created label");
        Ok(created.id)
    }

    async fn list_unread_by_label(&self, label_id: &str) -> Result<Vec<MessageRef>, MailboxError> {
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(self.url("messages")).query(&[
                ("labelIds", label_id),
                ("labelIds", UNREAD_LABEL),
                ("q", "is:unread"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: MessageList = self.call(request, "messages.list").await?;
            refs.extend(page.messages.into_iter().map(|m| MessageRef {
                id: m.id,
                thread_id: m.thread_id,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(label_id, count = refs.len(), "Listed unread messages");
        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, MailboxError> {
        let request = self
            .http
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "full")]);
        let message: FullMessage = self.call(request, "messages.get").await?;

        let body = match extract_body_data(&message.payload) {
            Some(data) => decode_base64url(data)?,
            None => {
                warn!(id = %message.id, "Message has no body data");
                Vec::new()
            }
        };

        Ok(RawMessage {
            id: message.id,
            thread_id: message.thread_id,
            headers: message
                .payload
                .headers
                .into_iter()
                .map(|h| Header {
                    name: h.name,
                    value: h.value,
                })
                .collect(),
            body,
            label_ids: message.label_ids,
        })
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError> {
        let request = self
            .http
            .post(self.url(&format!("messages/{id}/modify")))
            .json(&ModifyRequest {
                add_label_ids: add,
                remove_label_ids: remove,
            });
        let _: serde_json::Value = self.call(request, "messages.modify").await?;
        Ok(())
    }

    async fn send(&self, raw: &[u8], thread_id: &str) -> Result<String, MailboxError> {
        let request = self.http.post(self.url("messages/send")).json(&SendRequest {
            raw: URL_SAFE.encode(raw),
            thread_id,
        });
        let sent: SentMessage = self.call(request, "messages.send").await?;
        Ok(sent.id)
    }
}

/// Encoded body of a message: a `text/plain` part anywhere in the tree,
/// else the first part's data, else the top-level body.
fn extract_body_data(payload: &MessagePart) -> Option<&str> {
    find_plain_text(payload)
        .or_else(|| payload.parts.first().and_then(|p| p.body.data.as_deref()))
        .or(payload.body.data.as_deref())
        .filter(|d| !d.is_empty())
}

fn find_plain_text(part: &MessagePart) -> Option<&str> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.body.data.as_deref().filter(|d| !d.is_empty()) {
            return Some(data);
        }
    }
    part.parts.iter().find_map(find_plain_text)
}

pub(crate) fn decode_base64url(data: &str) -> Result<Vec<u8>, MailboxError> {
    BASE64URL_LENIENT
        .decode(data.trim())
        .map_err(|e| MailboxError::InvalidResponse {
            reason: format!("body is not base64url: {e}"),
        })
}
