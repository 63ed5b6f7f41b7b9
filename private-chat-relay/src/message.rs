use std::io;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

const REQUEST_TYPES: &[&str] = &["join", "chat_request", "leave_chat", "chat", "quit"];

/// Requests a client may send. Fields default to empty so the handler can
/// answer a missing field with the precise error instead of a generic one,
/// and non-string values are taken as their JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    Join {
        #[serde(default, deserialize_with = "lenient_string")]
        username: String,
    },
    ChatRequest {
        #[serde(default, deserialize_with = "lenient_string")]
        to: String,
    },
    LeaveChat,
    Chat {
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
    },
    Quit,
}

/// `"bob"` stays `bob`, `null` becomes empty, anything else (`7`, `true`)
/// becomes its JSON text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    System { message: String },
    Error { message: String },
    ChatStarted { with: String },
    Chat { from: String, message: String },
}

impl ServerToClient {
    pub fn system(message: impl Into<String>) -> Self {
        ServerToClient::System {
            message: message.into(),
        }
    }

    pub fn error(err: &RelayError) -> Self {
        ServerToClient::Error {
            message: err.to_string(),
        }
    }
}

/// Reads one raw line, without the trailing line ending.
///
/// Returns `Ok(None)` at end of stream. Invalid UTF-8 is replaced rather
/// than failing the connection.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let bytes = reader.read_until(b'\n', &mut raw).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&raw);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Decodes a client request, separating broken JSON, JSON without a request
/// type we know, and a known request whose fields do not fit.
pub fn decode_request(line: &str) -> Result<ClientToServer, RelayError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RelayError::MalformedJson)?;
    let known = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| REQUEST_TYPES.contains(&kind));

    serde_json::from_value(value).map_err(|_| {
        if known {
            RelayError::INVALID_FIELDS
        } else {
            RelayError::UNKNOWN_TYPE
        }
    })
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let line = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    let parsed = serde_json::from_str(&line).map_err(to_io_error)?;
    Ok(Some(parsed))
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
