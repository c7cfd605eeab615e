//! Gmail HTTP batch envelope.
//!
//! A batch request is a `multipart/mixed` body whose parts are embedded
//! `application/http` requests. The response mirrors it: one part per
//! sub-request, each holding a status line, headers and a JSON body, in
//! whatever order the server finished them.

use chrono::Utc;
use std::fmt::Write as _;

use super::api_error_message;
use crate::error::{Error, Result};
use crate::models::Message;

pub const BATCH_PATH: &str = "/batch/gmail/v1";

/// Gmail rejects batches with more sub-requests than this.
pub const MAX_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequest {
    pub content_id: String,
    pub method: &'static str,
    pub path: String,
}

impl SubRequest {
    pub fn get_message(index: usize, id: &str) -> Self {
        Self {
            content_id: format!("item-{}", index),
            method: "GET",
            path: format!("/gmail/v1/users/me/messages/{}?format=full", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePart {
    pub content_id: Option<String>,
    pub status: u16,
    pub body: String,
}

pub fn new_boundary() -> String {
    format!("batch_gmail_relay_{}", Utc::now().timestamp_micros())
}

pub fn encode_batch(boundary: &str, requests: &[SubRequest]) -> String {
    let mut body = String::new();
    for req in requests {
        let _ = write!(
            body,
            "--{}\r\nContent-Type: application/http\r\nContent-ID: <{}>\r\n\r\n{} {}\r\n\r\n",
            boundary, req.content_id, req.method, req.path
        );
    }
    let _ = write!(body, "--{}--\r\n", boundary);
    body
}

/// Pulls `boundary=` out of a `multipart/mixed; boundary=...` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

pub fn parse_batch_response(boundary: &str, body: &str) -> Result<Vec<ResponsePart>> {
    // JSON may span lines but escapes newlines inside strings, so folding CRLF
    // never changes a value
    let body = body.replace("\r\n", "\n");
    let delimiter = format!("--{}", boundary);

    let mut sections = body.split(delimiter.as_str());
    sections.next(); // preamble

    let mut parts = Vec::new();
    let mut closed = false;
    for section in sections {
        if section.starts_with("--") {
            closed = true;
            break;
        }
        parts.push(parse_part(section)?);
    }

    if !closed {
        return Err(Error::Server(
            "Batch response ended without a closing boundary".into(),
        ));
    }
    Ok(parts)
}

fn parse_part(section: &str) -> Result<ResponsePart> {
    let malformed = |what: &str| Error::Server(format!("Malformed batch response part: {}", what));

    // Rest of the delimiter line (transport padding) is discarded
    let (_, rest) = section.split_once('\n').ok_or_else(|| malformed("empty part"))?;
    let (outer_headers, inner) = rest
        .split_once("\n\n")
        .ok_or_else(|| malformed("missing part headers"))?;

    let content_id = header_value(outer_headers, "Content-ID")
        .map(|v| v.trim_start_matches('<').trim_end_matches('>').to_string());

    let (inner_head, inner_body) = inner.split_once("\n\n").unwrap_or((inner, ""));
    let status = inner_head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| malformed("missing HTTP status line"))?;

    Ok(ResponsePart {
        content_id,
        status,
        body: inner_body.trim().to_string(),
    })
}

fn header_value<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    block.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then_some(value.trim())
    })
}

/// `response-item-3` -> 3
fn item_index(content_id: &str) -> Option<usize> {
    content_id
        .strip_prefix("response-")
        .unwrap_or(content_id)
        .strip_prefix("item-")?
        .parse()
        .ok()
}

/// Turns one response part into a message, or a fetch error naming the id
/// that was requested in that slot.
pub fn decode_message_part(part: ResponsePart, ids: &[String]) -> Result<Message> {
    let requested = part
        .content_id
        .as_deref()
        .and_then(item_index)
        .and_then(|i| ids.get(i))
        .cloned()
        .unwrap_or_else(|| "(unknown)".to_string());

    if !(200..300).contains(&part.status) {
        return Err(Error::Fetch {
            message_id: requested,
            reason: format!("HTTP {}: {}", part.status, api_error_message(&part.body)),
        });
    }

    serde_json::from_str(&part.body).map_err(|e| Error::Fetch {
        message_id: requested,
        reason: format!("invalid message JSON: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ok_part(index: usize, id: &str) -> String {
        format!(
            "--batch_xyz\r\nContent-Type: application/http\r\nContent-ID: <response-item-{}>\r\n\r\n\
             HTTP/1.1 200 OK\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"id\": \"{}\", \"threadId\": \"t-{}\", \"labelIds\": [\"UNREAD\"]}}\r\n",
            index, id, id
        )
    }

    fn not_found_part(index: usize) -> String {
        format!(
            "--batch_xyz\r\nContent-Type: application/http\r\nContent-ID: <response-item-{}>\r\n\r\n\
             HTTP/1.1 404 Not Found\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"error\": {{\"code\": 404, \"message\": \"Requested entity was not found.\", \"status\": \"NOT_FOUND\"}}}}\r\n",
            index
        )
    }

    #[test]
    fn test_encode_batch_layout() {
        let body = encode_batch(
            "b1",
            &[
                SubRequest::get_message(0, "A"),
                SubRequest::get_message(1, "B"),
            ],
        );
        assert!(body.starts_with("--b1\r\nContent-Type: application/http\r\nContent-ID: <item-0>\r\n\r\n"));
        assert!(body.contains("GET /gmail/v1/users/me/messages/A?format=full\r\n"));
        assert!(body.contains("Content-ID: <item-1>"));
        assert!(body.ends_with("--b1--\r\n"));
        assert_eq!(body.matches("--b1\r\n").count(), 2);
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=batch_abc"),
            Some("batch_abc".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/mixed; charset=utf-8; Boundary=\"q r\""),
            Some("q r".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn test_results_matched_by_id_not_position() {
        // Server answered C, then B (failed), then A
        let body = format!(
            "{}{}{}--batch_xyz--\r\n",
            ok_part(2, "C"),
            not_found_part(1),
            ok_part(0, "A")
        );
        let requested = ids(&["A", "B", "C"]);
        let parts = parse_batch_response("batch_xyz", &body).unwrap();
        assert_eq!(parts.len(), 3);

        let results: Vec<Result<Message>> = parts
            .into_iter()
            .map(|p| decode_message_part(p, &requested))
            .collect();

        let mut ok_ids: Vec<String> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|m| m.id.clone()))
            .collect();
        ok_ids.sort();
        assert_eq!(ok_ids, vec!["A", "C"]);

        let failures: Vec<&Error> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        match failures[0] {
            Error::Fetch { message_id, reason } => {
                assert_eq!(message_id, "B");
                assert!(reason.contains("404"));
                assert!(reason.contains("Requested entity was not found."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_preamble_and_lf_only_line_endings() {
        let body = "ignored preamble\n--b\nContent-Type: application/http\nContent-ID: <response-item-0>\n\nHTTP/1.1 200 OK\n\n{\"id\": \"A\"}\n--b--\n";
        let parts = parse_batch_response("b", body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].status, 200);
        assert_eq!(parts[0].content_id.as_deref(), Some("response-item-0"));
        assert_eq!(parts[0].body, "{\"id\": \"A\"}");
    }

    #[test]
    fn test_pretty_printed_json_body() {
        let body = "--b\r\nContent-Type: application/http\r\nContent-ID: <response-item-0>\r\n\r\n\
                    HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n\
                    {\r\n  \"id\": \"A\",\r\n  \"snippet\": \"line one\\r\\nline two\"\r\n}\r\n--b--\r\n";
        let parts = parse_batch_response("b", body).unwrap();
        let message = decode_message_part(parts[0].clone(), &ids(&["A"])).unwrap();
        assert_eq!(message.id, "A");
        assert_eq!(message.snippet.as_deref(), Some("line one\r\nline two"));
    }

    #[test]
    fn test_truncated_envelope_is_an_error() {
        let body = ok_part(0, "A");
        assert!(matches!(
            parse_batch_response("batch_xyz", &body),
            Err(Error::Server(_))
        ));
    }

    #[test]
    fn test_missing_status_line_is_an_error() {
        let body = "--b\r\nContent-ID: <response-item-0>\r\n\r\n\r\n--b--\r\n";
        assert!(parse_batch_response("b", body).is_err());
    }

    #[test]
    fn test_unknown_content_id_still_reports_failure() {
        let part = ResponsePart {
            content_id: None,
            status: 500,
            body: String::new(),
        };
        match decode_message_part(part, &ids(&["A"])) {
            Err(Error::Fetch { message_id, .. }) => assert_eq!(message_id, "(unknown)"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_item_index() {
        assert_eq!(item_index("response-item-12"), Some(12));
        assert_eq!(item_index("item-3"), Some(3));
        assert_eq!(item_index("something-else"), None);
    }
}
