//! Host bridge - JSON-lines transport between the UI host and the channels
//!
//! Every line the host sends is one request:
//!
//! ```text
//! {"id": 7, "channel": "data_limit", "method": "setDailyLimit", "args": {"limitMB": 500}}
//! ```
//!
//! and every line written back is a response (`result`, `error` or
//! `notImplemented`, echoing the request id) or an event pushed by the data
//! stream or the notifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::channels::{ChannelRouter, MethodCall, MethodResult, DATA_STREAM_CHANNEL};
use crate::notify::NotificationEvent;

/// Event name of forwarded notifications
pub const NOTIFICATION_EVENT: &str = "notification";

/// Errors that end a bridge session
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Request {
    id: u64,
    channel: String,
    method: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// One line written to the host
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outgoing {
    Result {
        id: Option<u64>,
        result: Value,
    },
    Error {
        id: Option<u64>,
        error: ErrorBody,
    },
    NotImplemented {
        id: Option<u64>,
        #[serde(rename = "notImplemented")]
        not_implemented: bool,
    },
    Event {
        event: &'static str,
        payload: Value,
    },
}

impl Outgoing {
    fn response(id: u64, result: MethodResult) -> Self {
        match result {
            MethodResult::Success(result) => Outgoing::Result { id: Some(id), result },
            MethodResult::Error { code, message } => Outgoing::Error {
                id: Some(id),
                error: ErrorBody { code, message },
            },
            MethodResult::NotImplemented => Outgoing::NotImplemented {
                id: Some(id),
                not_implemented: true,
            },
        }
    }

    fn invalid_request(id: Option<u64>, message: String) -> Self {
        Outgoing::Error {
            id,
            error: ErrorBody {
                code: "INVALID_REQUEST".to_string(),
                message,
            },
        }
    }
}

/// Serves channel calls over a pair of byte streams
pub struct Bridge {
    router: ChannelRouter,
    notifications: Option<broadcast::Receiver<NotificationEvent>>,
}

impl Bridge {
    pub fn new(router: ChannelRouter) -> Self {
        Self {
            router,
            notifications: None,
        }
    }

    /// Also forwards notifications to the host
    pub fn with_notifications(mut self, receiver: broadcast::Receiver<NotificationEvent>) -> Self {
        self.notifications = Some(receiver);
        self
    }

    /// Handles requests until the input ends
    ///
    /// Requests are handled one at a time; stream payloads and notifications
    /// are written between responses as they arrive.
    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<(), BridgeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Bridge {
            router,
            mut notifications,
        } = self;
        let mut lines = reader.lines();
        let mut stream = Some(router.state().stream.subscribe());

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("Host closed the bridge");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = handle_line(&router, &line).await;
                    write_line(&mut writer, &response).await?;
                }
                payload = recv_from(&mut stream) => {
                    if let Some(payload) = forward(payload, &mut stream, DATA_STREAM_CHANNEL) {
                        let event = Outgoing::Event {
                            event: DATA_STREAM_CHANNEL,
                            payload: Value::String(payload),
                        };
                        write_line(&mut writer, &event).await?;
                    }
                }
                notification = recv_from(&mut notifications) => {
                    let forwarded = forward(notification, &mut notifications, NOTIFICATION_EVENT);
                    if let Some(notification) = forwarded {
                        let event = Outgoing::Event {
                            event: NOTIFICATION_EVENT,
                            payload: serde_json::to_value(notification)?,
                        };
                        write_line(&mut writer, &event).await?;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_line(router: &ChannelRouter, line: &str) -> Outgoing {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Malformed request line: {}", e);
            return Outgoing::invalid_request(None, e.to_string());
        }
    };

    let id = value.get("id").and_then(Value::as_u64);
    let request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Invalid request: {}", e);
            return Outgoing::invalid_request(id, e.to_string());
        }
    };

    tracing::debug!("Request {}: {}.{}", request.id, request.channel, request.method);
    let call = MethodCall {
        channel: request.channel,
        method: request.method,
        args: request.args,
    };
    Outgoing::response(request.id, router.handle(&call).await)
}

/// Receives from an optional subscription, waiting forever once it is gone
async fn recv_from<T: Clone>(
    receiver: &mut Option<broadcast::Receiver<T>>,
) -> Result<T, RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn forward<T: Clone>(
    received: Result<T, RecvError>,
    receiver: &mut Option<broadcast::Receiver<T>>,
    name: &str,
) -> Option<T> {
    match received {
        Ok(item) => Some(item),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!("Bridge fell behind, skipped {} {} events", skipped, name);
            None
        }
        Err(RecvError::Closed) => {
            tracing::debug!("{} events closed", name);
            *receiver = None;
            None
        }
    }
}

/// Writes one message as a single line
async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
