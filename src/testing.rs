//! In-memory mailbox and payload builders for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Header, Message, MessagePart, MessagePartBody, UNREAD_LABEL};
use crate::service::MailService;
use crate::util::encode_base64url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub raw: String,
    pub thread_id: Option<String>,
}

#[derive(Default)]
struct State {
    messages: Vec<Message>,
    unread: BTreeSet<String>,
    attachments: HashMap<(String, String), String>,
    sent: Vec<SentMessage>,
    attachment_fetches: usize,
    list_calls: usize,
    fail_list: bool,
    fail_batch_get: bool,
    fail_identity: bool,
    failing_fetches: HashSet<String>,
    failing_send_threads: HashSet<String>,
    fail_next_modify: usize,
}

pub struct FakeMailService {
    identity: String,
    state: Mutex<State>,
}

impl FakeMailService {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Stores `message` and marks it unread.
    pub fn add_message(&self, message: Message) {
        let mut state = self.state();
        state.unread.insert(message.id.clone());
        state.messages.push(message);
    }

    pub fn add_attachment(&self, message_id: &str, attachment_id: &str, bytes: &[u8]) {
        self.state().attachments.insert(
            (message_id.to_string(), attachment_id.to_string()),
            encode_base64url(bytes),
        );
    }

    pub fn fail_list(&self) {
        self.state().fail_list = true;
    }

    pub fn fail_batch_get(&self) {
        self.state().fail_batch_get = true;
    }

    pub fn fail_identity(&self) {
        self.state().fail_identity = true;
    }

    pub fn fail_fetch(&self, message_id: &str) {
        self.state().failing_fetches.insert(message_id.to_string());
    }

    pub fn fail_send_to_thread(&self, thread_id: &str) {
        self.state()
            .failing_send_threads
            .insert(thread_id.to_string());
    }

    pub fn fail_next_modify(&self) {
        self.state().fail_next_modify += 1;
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.state().unread.iter().cloned().collect()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn attachment_fetches(&self) -> usize {
        self.state().attachment_fetches
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }
}

#[async_trait]
impl MailService for FakeMailService {
    async fn list_unread(&self) -> Result<Vec<String>> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.fail_list {
            return Err(Error::Server("list unavailable".into()));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| state.unread.contains(&m.id))
            .map(|m| m.id.clone())
            .collect())
    }

    async fn batch_get(&self, ids: &[String]) -> Result<Vec<Result<Message>>> {
        let state = self.state();
        if state.fail_batch_get {
            return Err(Error::Server("batch unavailable".into()));
        }
        // Reverse order so callers cannot rely on request order
        Ok(ids
            .iter()
            .rev()
            .map(|id| {
                if state.failing_fetches.contains(id) {
                    return Err(Error::Fetch {
                        message_id: id.clone(),
                        reason: "HTTP 500".into(),
                    });
                }
                state
                    .messages
                    .iter()
                    .find(|m| &m.id == id)
                    .map(|m| {
                        let mut m = m.clone();
                        m.label_ids = if state.unread.contains(id) {
                            vec![UNREAD_LABEL.to_string()]
                        } else {
                            Vec::new()
                        };
                        m
                    })
                    .ok_or_else(|| Error::Fetch {
                        message_id: id.clone(),
                        reason: "HTTP 404".into(),
                    })
            })
            .collect())
    }

    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<String> {
        let mut state = self.state();
        state.attachment_fetches += 1;
        state
            .attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::Api {
                method: "attachments.get".into(),
                status: 404,
                message: "not found".into(),
            })
    }

    async fn send(&self, raw: &str, thread_id: Option<&str>) -> Result<()> {
        let mut state = self.state();
        if let Some(thread) = thread_id
            && state.failing_send_threads.contains(thread)
        {
            return Err(Error::Api {
                method: "messages.send".into(),
                status: 400,
                message: "rejected".into(),
            });
        }
        state.sent.push(SentMessage {
            raw: raw.to_string(),
            thread_id: thread_id.map(str::to_string),
        });
        Ok(())
    }

    async fn batch_modify(&self, ids: &[String], remove_labels: &[&str]) -> Result<()> {
        let mut state = self.state();
        if state.fail_next_modify > 0 {
            state.fail_next_modify -= 1;
            return Err(Error::Server("batchModify unavailable".into()));
        }
        if remove_labels.contains(&UNREAD_LABEL) {
            for id in ids {
                state.unread.remove(id);
            }
        }
        Ok(())
    }

    async fn get_identity(&self) -> Result<String> {
        if self.state().fail_identity {
            return Err(Error::InvalidToken("getProfile was rejected".into()));
        }
        Ok(self.identity.clone())
    }
}

pub fn text_part(subtype: &str, content: &str) -> MessagePart {
    MessagePart {
        mime_type: format!("text/{}", subtype),
        body: MessagePartBody {
            size: content.len() as u64,
            data: Some(encode_base64url(content.as_bytes())),
            ..MessagePartBody::default()
        },
        ..MessagePart::default()
    }
}

pub fn inline_attachment(mime_type: &str, filename: &str, bytes: &[u8]) -> MessagePart {
    MessagePart {
        mime_type: mime_type.to_string(),
        filename: filename.to_string(),
        body: MessagePartBody {
            size: bytes.len() as u64,
            data: Some(encode_base64url(bytes)),
            ..MessagePartBody::default()
        },
        ..MessagePart::default()
    }
}

pub fn remote_attachment(mime_type: &str, filename: &str, attachment_id: &str) -> MessagePart {
    MessagePart {
        mime_type: mime_type.to_string(),
        filename: filename.to_string(),
        body: MessagePartBody {
            attachment_id: Some(attachment_id.to_string()),
            ..MessagePartBody::default()
        },
        ..MessagePart::default()
    }
}

pub fn container(mime_type: &str, parts: Vec<MessagePart>) -> MessagePart {
    MessagePart {
        mime_type: mime_type.to_string(),
        parts,
        ..MessagePart::default()
    }
}

pub fn message(id: &str, thread_id: &str, subject: Option<&str>, mut payload: MessagePart) -> Message {
    if let Some(subject) = subject {
        payload.headers.push(Header {
            name: "Subject".into(),
            value: subject.to_string(),
        });
    }
    Message {
        id: id.to_string(),
        thread_id: Some(thread_id.to_string()),
        label_ids: vec![UNREAD_LABEL.to_string()],
        snippet: None,
        payload: Some(payload),
    }
}
