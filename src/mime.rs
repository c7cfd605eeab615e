//! Rebuilding a fetched message body as an outbound MIME tree.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Mailboxes, MultiPart, MultiPartKind, SinglePart};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ForwardingRule, Message, MessagePart};
use crate::service::MailService;
use crate::util::{decode_base64url, encode_base64url};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound body tree. Containers always hold at least one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    Text {
        subtype: String,
        content: String,
    },
    Attachment {
        main_type: String,
        subtype: String,
        filename: String,
        bytes: Vec<u8>,
    },
    /// Sent as `multipart/alternative`, `multipart/related` or, for any other
    /// type, `multipart/mixed`.
    Container {
        main_type: String,
        subtype: String,
        children: Vec<MimePart>,
    },
}

/// Rebuilds `part` and everything below it.
///
/// Branch order is fixed: a `text/*` part is text even when it carries a
/// filename; any other part with a filename is an attachment; everything else
/// is a container and must have children. Recursion only descends into
/// `part.parts`, so it terminates on any finite tree.
pub fn reconstruct<'a>(
    part: &'a MessagePart,
    service: &'a dyn MailService,
    message_id: &'a str,
) -> BoxFuture<'a, Result<MimePart>> {
    Box::pin(async move {
        let (main_type, subtype) = part.mime_split();

        if main_type == "text" {
            let bytes = match part_data(part, service, message_id).await? {
                Some(data) => decode(&data, message_id, "text part")?,
                None => Vec::new(),
            };
            let content = String::from_utf8(bytes).map_err(|e| Error::Decode {
                what: format!("text part of {}", message_id),
                reason: e.to_string(),
            })?;
            return Ok(MimePart::Text { subtype, content });
        }

        if !part.filename.is_empty() {
            let data = part_data(part, service, message_id)
                .await?
                .ok_or_else(|| Error::MalformedMessage {
                    message_id: message_id.to_string(),
                    reason: format!("attachment {:?} has no data", part.filename),
                })?;
            let bytes = decode(&data, message_id, &part.filename)?;
            return Ok(MimePart::Attachment {
                main_type,
                subtype,
                filename: part.filename.clone(),
                bytes,
            });
        }

        if part.parts.is_empty() {
            return Err(Error::MalformedMessage {
                message_id: message_id.to_string(),
                reason: format!("{} container has no parts", part.mime_type),
            });
        }

        let mut children = Vec::with_capacity(part.parts.len());
        for child in &part.parts {
            children.push(reconstruct(child, service, message_id).await?);
        }
        Ok(MimePart::Container {
            main_type,
            subtype,
            children,
        })
    })
}

/// Inline body data, or one attachment fetch when the body is stored remotely.
async fn part_data(
    part: &MessagePart,
    service: &dyn MailService,
    message_id: &str,
) -> Result<Option<String>> {
    if let Some(data) = &part.body.data {
        return Ok(Some(data.clone()));
    }
    let Some(attachment_id) = &part.body.attachment_id else {
        return Ok(None);
    };
    service
        .fetch_attachment(message_id, attachment_id)
        .await
        .map(Some)
        .map_err(|e| Error::Fetch {
            message_id: message_id.to_string(),
            reason: format!("attachment {}: {}", attachment_id, e),
        })
}

fn decode(data: &str, message_id: &str, what: &str) -> Result<Vec<u8>> {
    decode_base64url(data).map_err(|e| Error::Decode {
        what: format!("{} of {}", what, message_id),
        reason: e.to_string(),
    })
}

enum LettrePart {
    Single(SinglePart),
    Multi(MultiPart),
}

fn multipart_kind(main_type: &str, subtype: &str) -> MultiPartKind {
    let subtype = subtype.to_lowercase();
    match (main_type, subtype.as_str()) {
        ("multipart", "alternative") => MultiPartKind::Alternative,
        ("multipart", "related") => MultiPartKind::Related,
        ("multipart", "mixed") => MultiPartKind::Mixed,
        _ => {
            debug!(mime_type = %format!("{}/{}", main_type, subtype), "Sending container as multipart/mixed");
            MultiPartKind::Mixed
        }
    }
}

impl MimePart {
    fn to_lettre(&self) -> Result<LettrePart> {
        match self {
            MimePart::Text { subtype, content } => {
                let content_type =
                    ContentType::parse(&format!("text/{}; charset=utf-8", subtype.to_lowercase()))
                        .unwrap_or(ContentType::TEXT_PLAIN);
                Ok(LettrePart::Single(
                    SinglePart::builder()
                        .header(content_type)
                        .body(content.clone()),
                ))
            }
            MimePart::Attachment {
                main_type,
                subtype,
                filename,
                bytes,
            } => {
                let content_type = ContentType::parse(&format!("{}/{}", main_type, subtype))
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|e| Error::Decode {
                        what: format!("content type of {}", filename),
                        reason: e.to_string(),
                    })?;
                Ok(LettrePart::Single(
                    Attachment::new(filename.clone()).body(bytes.clone(), content_type),
                ))
            }
            MimePart::Container {
                main_type,
                subtype,
                children,
            } => {
                let (first, rest) = children.split_first().ok_or_else(|| Error::MalformedMessage {
                    message_id: String::new(),
                    reason: "empty container".into(),
                })?;
                let builder = MultiPart::builder().kind(multipart_kind(main_type, subtype));
                let mut multi = match first.to_lettre()? {
                    LettrePart::Single(p) => builder.singlepart(p),
                    LettrePart::Multi(m) => builder.multipart(m),
                };
                for child in rest {
                    multi = match child.to_lettre()? {
                        LettrePart::Single(p) => multi.singlepart(p),
                        LettrePart::Multi(m) => multi.multipart(m),
                    };
                }
                Ok(LettrePart::Multi(multi))
            }
        }
    }
}

/// A forwarded copy of one message, threaded onto the original.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub in_reply_to: String,
    pub references: String,
    pub subject: String,
    pub body: MimePart,
}

impl OutboundMessage {
    pub fn forward_of(account: &str, rule: &ForwardingRule, original: &Message, body: MimePart) -> Self {
        Self {
            from: account.to_string(),
            to: rule.to.clone(),
            cc: rule.cc_header(),
            in_reply_to: original.id.clone(),
            references: original.id.clone(),
            subject: original.subject().to_string(),
            body,
        }
    }

    /// RFC 5322 text of the message; the body sits inside a `multipart/mixed` root.
    pub fn to_rfc5322(&self) -> Result<Vec<u8>> {
        let invalid = |field: &str, e: &dyn std::fmt::Display| Error::Send {
            message_id: self.in_reply_to.clone(),
            reason: format!("invalid {} address: {}", field, e),
        };

        let from: Mailbox = self.from.parse().map_err(|e| invalid("from", &e))?;
        let to: Mailbox = self.to.parse().map_err(|e| invalid("to", &e))?;

        let mut builder = lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .in_reply_to(self.in_reply_to.clone())
            .references(self.references.clone());

        if !self.cc.trim().is_empty() {
            let cc: Mailboxes = self.cc.parse().map_err(|e| invalid("cc", &e))?;
            for mailbox in cc {
                builder = builder.cc(mailbox);
            }
        }

        let root = MultiPart::mixed();
        let root = match self.body.to_lettre()? {
            LettrePart::Single(p) => root.singlepart(p),
            LettrePart::Multi(m) => root.multipart(m),
        };

        let email = builder.multipart(root).map_err(|e| Error::Send {
            message_id: self.in_reply_to.clone(),
            reason: format!("could not build message: {}", e),
        })?;
        Ok(email.formatted())
    }

    /// The `raw` field expected by `messages.send`.
    pub fn to_raw(&self) -> Result<String> {
        Ok(encode_base64url(&self.to_rfc5322()?))
    }
}
