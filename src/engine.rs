//! One forwarding pass for one account.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mime::{reconstruct, OutboundMessage};
use crate::models::{ForwardingRule, Message, MessageRef, UNREAD_LABEL};
use crate::service::MailService;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleResult {
    /// Sent and acknowledged.
    pub forwarded: Vec<MessageRef>,
    /// Left unread for a later cycle.
    pub skipped: Vec<String>,
}

impl CycleResult {
    pub fn is_empty(&self) -> bool {
        self.forwarded.is_empty() && self.skipped.is_empty()
    }
}

/// Lists unread mail, forwards each message to `rule` and acknowledges the
/// ones that were sent.
///
/// Per-message failures are logged and the message stays unread. Listing,
/// batch transport and acknowledgement failures abort the cycle with
/// [`Error::Cycle`].
pub async fn run_cycle<S: MailService>(
    account: &str,
    rule: &ForwardingRule,
    service: &S,
) -> Result<CycleResult> {
    let ids = service
        .list_unread()
        .await
        .map_err(|e| Error::cycle("list", e))?;
    if ids.is_empty() {
        debug!(account, "No unread messages");
        return Ok(CycleResult::default());
    }
    info!(account, count = ids.len(), "Unread messages found");

    let results = service
        .batch_get(&ids)
        .await
        .map_err(|e| Error::cycle("batch fetch", e))?;

    let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = CycleResult::default();

    for item in results {
        let message = match item {
            Ok(message) => message,
            Err(e) => {
                let id = match &e {
                    Error::Fetch { message_id, .. } => message_id.clone(),
                    _ => "(unknown)".to_string(),
                };
                warn!(account, message_id = %id, error = %e, "Skipping message that could not be fetched");
                if seen.insert(id.clone()) && requested.contains(id.as_str()) {
                    result.skipped.push(id);
                }
                continue;
            }
        };

        if !requested.contains(message.id.as_str()) || !seen.insert(message.id.clone()) {
            debug!(account, message_id = %message.id, "Ignoring unrequested or duplicate batch item");
            continue;
        }

        match forward_message(account, rule, &message, service).await {
            Ok(()) => {
                info!(account, message_id = %message.id, to = %rule.to, "Message forwarded");
                result.forwarded.push(message.message_ref());
            }
            Err(e) => {
                warn!(account, message_id = %message.id, error = %e, "Skipping message");
                result.skipped.push(message.id);
            }
        }
    }

    for id in &ids {
        if !seen.contains(id) {
            warn!(account, message_id = %id, "No batch result for message");
            result.skipped.push(id.clone());
        }
    }

    let acknowledged: Vec<String> = result.forwarded.iter().map(|m| m.id.clone()).collect();
    service
        .batch_modify(&acknowledged, &[UNREAD_LABEL])
        .await
        .map_err(|e| Error::cycle("acknowledge", e))?;

    if !acknowledged.is_empty() {
        info!(account, count = acknowledged.len(), "Messages marked as read");
    }
    Ok(result)
}

async fn forward_message<S: MailService>(
    account: &str,
    rule: &ForwardingRule,
    message: &Message,
    service: &S,
) -> Result<()> {
    let payload = message.payload.as_ref().ok_or_else(|| Error::MalformedMessage {
        message_id: message.id.clone(),
        reason: "message has no payload".into(),
    })?;

    let body = reconstruct(payload, service, &message.id).await?;
    let raw = OutboundMessage::forward_of(account, rule, message, body).to_raw()?;

    service
        .send(&raw, message.thread_id.as_deref())
        .await
        .map_err(|e| Error::Send {
            message_id: message.id.clone(),
            reason: e.to_string(),
        })
}
