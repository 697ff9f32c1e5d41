//! Server-sent events transport.
//!
//! Events arrive on a long-lived `GET` with `Accept: text/event-stream`, each
//! `data:` block holding one JSON envelope. Commands go out as `POST
//! {endpoint}/commands`; the reply body is the `Ack`/`Error` envelope, which
//! is fed into the same inbound channel as pushed events.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use orderlink_shared::{
    try_problem_detail, ClientCommand, RealtimeError, RealtimeResult, ServerEvent, WsEnvelope,
};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc::{self, WeakUnboundedSender};

use super::{Transport, TransportLink};
use crate::config::ClientConfig;

pub struct SseTransport {
    http: Client,
    events_url: String,
    commands_url: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SseTransport {
    pub fn new(config: &ClientConfig) -> RealtimeResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(RealtimeError::transport)?;
        let events_url = config.hub_url();
        Ok(Self {
            http,
            commands_url: format!("{}/commands", events_url),
            events_url,
            connect_timeout: config.connect_timeout,
            command_timeout: config.ack_timeout,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn connect(&self, token: &str) -> RealtimeResult<TransportLink> {
        tracing::debug!("Opening event stream at {}", self.events_url);
        let request = self
            .http
            .get(&self.events_url)
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send();

        let response = match tokio::time::timeout(self.connect_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(RealtimeError::transport(e)),
            Err(_) => return Err(RealtimeError::ConnectTimeout(self.connect_timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeError::Transport(format!(
                "event stream rejected ({}): {}",
                status,
                rejection_reason(status, &body)
            )));
        }
        tracing::info!("Event stream open at {}", self.events_url);

        let (outbound, mut commands) = mpsc::unbounded_channel::<WsEnvelope<ClientCommand>>();
        let (events, inbound) = mpsc::unbounded_channel::<WsEnvelope<ServerEvent>>();
        let replies = events.downgrade();

        let events_url = self.events_url.clone();
        tokio::spawn(async move {
            let mut stream = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::default();

            'read: loop {
                let chunk = tokio::select! {
                    _ = events.closed() => break,
                    next = stream.next() => match next {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            tracing::error!("Event stream read error: {}", e);
                            break;
                        }
                        None => break,
                    },
                };

                for message in decoder.feed(&chunk) {
                    if message.data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WsEnvelope<ServerEvent>>(&message.data) {
                        Ok(event) => {
                            if events.send(event).is_err() {
                                break 'read;
                            }
                        }
                        Err(e) => tracing::error!(
                            "Failed to parse {} event: {}",
                            message.event.as_deref().unwrap_or("message"),
                            e
                        ),
                    }
                }
            }
            tracing::info!("Event stream at {} closed", events_url);
        });

        let http = self.http.clone();
        let commands_url = self.commands_url.clone();
        let token = token.to_string();
        let command_timeout = self.command_timeout;
        tokio::spawn(async move {
            while let Some(cmd) = commands.recv().await {
                let reply =
                    post_command(&http, &commands_url, &token, command_timeout, &cmd).await;
                if !deliver(&replies, reply) {
                    break;
                }
            }
        });

        Ok(TransportLink { outbound, inbound })
    }
}

/// Post one command and turn whatever comes back into a reply envelope.
///
/// The whole exchange is bounded by `timeout` so a stalled post cannot hold
/// up the commands queued behind it.
async fn post_command(
    http: &Client,
    url: &str,
    token: &str,
    timeout: Duration,
    cmd: &WsEnvelope<ClientCommand>,
) -> WsEnvelope<ServerEvent> {
    tracing::debug!("Posting {} ({})", cmd.payload.target(), cmd.id);
    let request = http.post(url).bearer_auth(token).timeout(timeout).json(cmd);
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            return error_reply(cmd, "timeout", format!("no reply within {:?}", timeout))
        }
        Err(e) => return error_reply(cmd, "transport", e.to_string()),
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) if e.is_timeout() => {
            return error_reply(cmd, "timeout", format!("no reply within {:?}", timeout))
        }
        Err(e) => return error_reply(cmd, "transport", e.to_string()),
    };

    if !status.is_success() {
        return error_reply(cmd, status.as_u16().to_string(), rejection_reason(status, &body));
    }
    reply_from_body(cmd, &body)
}

/// Read a `/commands` response body; an empty body counts as an `Ack`.
fn reply_from_body(cmd: &WsEnvelope<ClientCommand>, body: &str) -> WsEnvelope<ServerEvent> {
    if body.trim().is_empty() {
        return WsEnvelope::reply(
            ServerEvent::Ack {
                target: cmd.payload.target().to_string(),
            },
            cmd.id.clone(),
        );
    }

    match serde_json::from_str::<WsEnvelope<ServerEvent>>(body) {
        Ok(mut reply) => {
            reply.correlation_id.get_or_insert_with(|| cmd.id.clone());
            reply
        }
        Err(e) => {
            let error = RealtimeError::Protocol(format!("unreadable reply: {}", e));
            error_reply(cmd, "protocol", error.to_string())
        }
    }
}

fn error_reply(
    cmd: &WsEnvelope<ClientCommand>,
    code: impl Into<String>,
    message: String,
) -> WsEnvelope<ServerEvent> {
    WsEnvelope::reply(
        ServerEvent::Error {
            code: code.into(),
            message,
        },
        cmd.id.clone(),
    )
}

/// Push a reply into the inbound channel if the link is still alive.
fn deliver(replies: &WeakUnboundedSender<WsEnvelope<ServerEvent>>, reply: WsEnvelope<ServerEvent>) -> bool {
    match replies.upgrade() {
        Some(sender) => sender.send(reply).is_ok(),
        None => false,
    }
}

fn rejection_reason(status: StatusCode, body: &str) -> String {
    try_problem_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request rejected")
            .to_string()
    })
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Consume a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(message) = self.take_message() {
                    messages.push(message);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (&*line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id and retry are not used by the hub
                _ => {}
            }
        }

        messages
    }

    fn take_message(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseMessage {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: order\r\ndata: {\"a\"").is_empty());
        let messages = decoder.feed(b":1}\r\n\r\n");

        assert_eq!(
            messages,
            vec![SseMessage {
                event: Some("order".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let messages = decoder.feed(b": keep-alive\n\ndata: one\ndata:two\nid: 7\n\ndata: three\n\n");

        let data: Vec<&str> = messages.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(data, vec!["one\ntwo", "three"]);
        assert!(messages.iter().all(|m| m.event.is_none()));
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.len() - 3;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let messages = decoder.feed(&bytes[split..]);
        assert_eq!(messages[0].data, "café");
    }

    #[test]
    fn rejection_prefers_problem_detail() {
        let body = r#"{"type":"about:blank","title":"Forbidden","status":403,"detail":"not your vendor"}"#;
        assert_eq!(rejection_reason(StatusCode::FORBIDDEN, body), "not your vendor");
        assert_eq!(rejection_reason(StatusCode::NOT_FOUND, "nope"), "Not Found");
    }

    #[test]
    fn error_reply_correlates_with_command() {
        let cmd = WsEnvelope::new(ClientCommand::JoinVendorOrders {
            vendor_id: "v".to_string(),
        });
        let reply = error_reply(&cmd, "403", "denied".to_string());

        assert_eq!(reply.correlation_id.as_deref(), Some(cmd.id.as_str()));
        assert!(matches!(reply.payload, ServerEvent::Error { ref code, .. } if code == "403"));
    }

    #[test]
    fn reply_bodies_become_ack_or_protocol_error() {
        let cmd = WsEnvelope::new(ClientCommand::JoinOrderGroup {
            order_id: "ord-1".to_string(),
        });

        let ack = reply_from_body(&cmd, "  ");
        assert_eq!(ack.correlation_id.as_deref(), Some(cmd.id.as_str()));
        assert!(matches!(ack.payload, ServerEvent::Ack { ref target } if target == "JoinOrderGroup"));

        let garbled = reply_from_body(&cmd, "<html>bad gateway</html>");
        assert_eq!(garbled.correlation_id.as_deref(), Some(cmd.id.as_str()));
        match garbled.payload {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, "protocol");
                assert!(message.starts_with("protocol error: unreadable reply"), "{}", message);
            }
            other => panic!("expected an error reply, got {:?}", other),
        }
    }
}
