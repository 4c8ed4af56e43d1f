//! Wire framing shared by clients, the load balancer and workers
//!
//! Requests are `<name>\r\n\r\n<payload>\r\n\r\n`. Responses are a single status byte,
//! followed by the payload only when the status is success. There is no length prefix:
//! a request ends at its second delimiter and a response ends when the peer closes.
//! Both are bounded by `max_frame_size` so a misbehaving peer cannot grow a buffer
//! without limit.

use crate::error::{RpcError, RpcResult};
use crate::status::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Separator between the operation name and payload, and after the payload
pub const DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Default read bound for a single frame, in bytes
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Operation name used by liveness probes
pub const HEALTH_CHECK: &str = "health-check";

/// Operation name of the port assignment sent during registration
pub const REGISTER_SERVER: &str = "register-server";

/// A single request: operation name plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Probe frames are never dispatched and never answered
    pub fn is_probe(&self) -> bool {
        is_probe_name(&self.name)
    }
}

pub fn is_probe_name(name: &str) -> bool {
    name.is_empty() || name == HEALTH_CHECK
}

fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Encode a request frame
pub fn encode_request(frame: &Frame) -> RpcResult<Vec<u8>> {
    if find_delimiter(frame.name.as_bytes()).is_some() {
        return Err(RpcError::MalformedFrame(
            "operation name contains the frame delimiter".to_string(),
        ));
    }

    let mut out =
        Vec::with_capacity(frame.name.len() + frame.payload.len() + 2 * DELIMITER.len());
    out.extend_from_slice(frame.name.as_bytes());
    out.extend_from_slice(DELIMITER);
    out.extend_from_slice(&frame.payload);
    out.extend_from_slice(DELIMITER);
    Ok(out)
}

/// Decode a request frame.
///
/// The payload is whatever lies between the first and second delimiter. A missing
/// trailing delimiter is tolerated and the payload then runs to the end of input.
pub fn decode_request(bytes: &[u8]) -> RpcResult<Frame> {
    let split = find_delimiter(bytes)
        .ok_or_else(|| RpcError::MalformedFrame("missing delimiter".to_string()))?;

    let name = std::str::from_utf8(&bytes[..split])
        .map_err(|e| RpcError::MalformedFrame(format!("operation name is not UTF-8: {}", e)))?;

    let rest = &bytes[split + DELIMITER.len()..];
    let payload = match find_delimiter(rest) {
        Some(end) => &rest[..end],
        None => rest,
    };

    Ok(Frame::new(name, payload))
}

/// Whether `bytes` holds a full request: a name delimiter followed by a payload delimiter
pub fn is_complete_request(bytes: &[u8]) -> bool {
    match find_delimiter(bytes) {
        Some(split) => find_delimiter(&bytes[split + DELIMITER.len()..]).is_some(),
        None => false,
    }
}

/// Encode a response. The payload is only written for success.
pub fn encode_response(status: StatusCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(status.as_u8());
    if status.is_success() {
        out.extend_from_slice(payload);
    }
    out
}

/// Encode a bare failure response, honoring the legacy code mapping.
///
/// Returns `None` when the status has no legacy byte and the caller should send nothing.
pub fn encode_status(status: StatusCode, legacy: bool) -> Option<Vec<u8>> {
    status.wire_byte(legacy).map(|byte| vec![byte])
}

/// Decode a response into its status and payload
pub fn decode_response(bytes: &[u8]) -> RpcResult<(StatusCode, &[u8])> {
    let (&status, payload) = bytes.split_first().ok_or(RpcError::EmptyResponse)?;
    Ok((StatusCode::from_u8(status), payload))
}

/// Read one request from a connection.
///
/// Stops at the end of a complete request, at end of stream, or fails once more than
/// `max_frame_size` bytes arrive. An empty buffer means the peer closed without sending.
pub async fn read_request<R>(reader: &mut R, max_frame_size: usize) -> RpcResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(max_frame_size.min(DEFAULT_MAX_FRAME_SIZE));
    let mut chunk = [0u8; 512];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > max_frame_size {
            return Err(RpcError::FrameTooLarge {
                limit: max_frame_size,
            });
        }
        buf.extend_from_slice(&chunk[..n]);
        if is_complete_request(&buf) {
            return Ok(buf);
        }
    }
}

/// Read until the peer closes, failing past `max_frame_size` bytes
pub async fn read_to_close<R>(reader: &mut R, max_frame_size: usize) -> RpcResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = reader.take(max_frame_size as u64 + 1);
    limited.read_to_end(&mut buf).await?;

    if buf.len() > max_frame_size {
        return Err(RpcError::FrameTooLarge {
            limit: max_frame_size,
        });
    }
    Ok(buf)
}
