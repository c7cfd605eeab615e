use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::models::*;
use crate::service::MailService;

pub mod batch;

const TIMEOUT: Duration = Duration::from_secs(30);
const MESSAGES_PATH: &str = "/gmail/v1/users/me/messages";
const PROFILE_PATH: &str = "/gmail/v1/users/me/profile";

/// Gmail REST client for a single authenticated mailbox.
pub struct GmailClient {
    client: Client,
    api_base: String,
    account: String,
    max_results: u32,
    tokens: Mutex<TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Best-effort extraction of Google's `{"error": {"message": ...}}` text.
pub(crate) fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(env) => match env.error.status {
            Some(status) if !status.is_empty() => format!("{} ({})", env.error.message, status),
            _ => env.error.message,
        },
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

async fn check_status(resp: Response, method: &str) -> Result<Response> {
    let status = resp.status();
    match status.as_u16() {
        401 => return Err(Error::InvalidToken(format!("{} was rejected", method))),
        429 => return Err(Error::RateLimited),
        500..=599 => return Err(Error::Server(format!("{} returned {}", method, status))),
        _ => {}
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            method: method.into(),
            status: status.as_u16(),
            message: api_error_message(&body),
        });
    }

    Ok(resp)
}

impl GmailClient {
    pub fn new(api_base: &str, tokens: TokenProvider, max_results: u32) -> Result<Self> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            account: tokens.account().to_string(),
            max_results,
            tokens: Mutex::new(tokens),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens.lock().await.access_token().await
    }
}

#[async_trait]
impl MailService for GmailClient {
    #[instrument(skip(self), fields(account = %self.account))]
    async fn list_unread(&self) -> Result<Vec<String>> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.url(MESSAGES_PATH))
            .bearer_auth(&token)
            .query(&[
                ("labelIds", UNREAD_LABEL.to_string()),
                ("maxResults", self.max_results.to_string()),
            ])
            .send()
            .await?;

        let list: ListMessagesResponse = check_status(resp, "messages.list").await?.json().await?;
        if list.next_page_token.is_some() {
            debug!(
                estimate = list.result_size_estimate,
                "More unread messages than one page; the rest wait for a later cycle"
            );
        }

        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    #[instrument(skip(self, ids), fields(account = %self.account, count = ids.len()))]
    async fn batch_get(&self, ids: &[String]) -> Result<Vec<Result<Message>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let boundary = batch::new_boundary();
        let requests: Vec<batch::SubRequest> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| batch::SubRequest::get_message(i, id))
            .collect();

        let token = self.bearer().await?;
        debug!("Sending batch request");
        let resp = self
            .client
            .post(self.url(batch::BATCH_PATH))
            .bearer_auth(&token)
            .header(
                CONTENT_TYPE,
                format!("multipart/mixed; boundary={}", boundary),
            )
            .body(batch::encode_batch(&boundary, &requests))
            .send()
            .await?;

        let resp = check_status(resp, "batch").await?;
        let response_boundary = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(batch::boundary_from_content_type)
            .ok_or_else(|| Error::Server("Batch response is not multipart".into()))?;

        let text = resp.text().await?;
        let parts = batch::parse_batch_response(&response_boundary, &text)?;
        debug!(parts = parts.len(), "Batch response received");

        Ok(parts
            .into_iter()
            .map(|part| batch::decode_message_part(part, ids))
            .collect())
    }

    #[instrument(skip(self), fields(account = %self.account))]
    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<String> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.url(&format!(
                "{}/{}/attachments/{}",
                MESSAGES_PATH, message_id, attachment_id
            )))
            .bearer_auth(&token)
            .send()
            .await?;

        let attachment: AttachmentBody = check_status(resp, "attachments.get")
            .await?
            .json()
            .await?;
        debug!(size = attachment.size, "Attachment fetched");
        Ok(attachment.data)
    }

    #[instrument(skip(self, raw), fields(account = %self.account))]
    async fn send(&self, raw: &str, thread_id: Option<&str>) -> Result<()> {
        let mut body = json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }

        let token = self.bearer().await?;
        let resp = self
            .client
            .post(self.url(&format!("{}/send", MESSAGES_PATH)))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        let sent: MessageRef = check_status(resp, "messages.send").await?.json().await?;
        debug!(sent_id = %sent.id, "Message sent");
        Ok(())
    }

    #[instrument(skip(self, ids), fields(account = %self.account, count = ids.len()))]
    async fn batch_modify(&self, ids: &[String], remove_labels: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let token = self.bearer().await?;
        let resp = self
            .client
            .post(self.url(&format!("{}/batchModify", MESSAGES_PATH)))
            .bearer_auth(&token)
            .json(&json!({
                "ids": ids,
                "removeLabelIds": remove_labels,
            }))
            .send()
            .await?;

        check_status(resp, "messages.batchModify").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(account = %self.account))]
    async fn get_identity(&self) -> Result<String> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.url(PROFILE_PATH))
            .bearer_auth(&token)
            .send()
            .await?;

        let profile: Profile = check_status(resp, "getProfile").await?.json().await?;
        debug!(
            email = %profile.email_address,
            messages = profile.messages_total,
            "Profile fetched"
        );
        Ok(profile.email_address)
    }
}
