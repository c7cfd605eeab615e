//! The remote mailbox surface the forwarding engine drives.
//!
//! `GmailClient` is the production implementation; tests use an in-memory fake.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Message;

#[async_trait]
pub trait MailService: Send + Sync {
    /// Ids of messages currently carrying the unread label.
    async fn list_unread(&self) -> Result<Vec<String>>;

    /// Fetches full messages in a single round trip.
    ///
    /// The outer error is a transport failure of the whole batch. Inner
    /// results arrive in no particular order; match them by message id.
    async fn batch_get(&self, ids: &[String]) -> Result<Vec<Result<Message>>>;

    /// Base64url-encoded attachment data.
    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<String>;

    /// Sends an already base64url-encoded RFC 5322 message into `thread_id`.
    async fn send(&self, raw: &str, thread_id: Option<&str>) -> Result<()>;

    /// Removes `labels` from every id in a single round trip.
    async fn batch_modify(&self, ids: &[String], remove_labels: &[&str]) -> Result<()>;

    /// Address of the mailbox this session is authenticated as.
    async fn get_identity(&self) -> Result<String>;
}
