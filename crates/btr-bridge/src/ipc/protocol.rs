//! Wire format for the TCP transport.
//!
//! 4-byte big-endian length prefix followed by a UTF-8 JSON payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Requests carry an envelope's text payload; responses carry either the
//! handler's outcome or a transport-level error (unparseable frame, unknown
//! procedure).

use crate::bridge::{CallEnvelope, CallOutcome, ProcedureId};
use crate::codec::EncodedValue;
use crate::config::IpcConfig;
use crate::error::RemoteError;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Call request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub procedure: String,
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xsrf: Option<String>,
}

impl WireRequest {
    /// Fails for structured payloads, which this transport cannot carry.
    pub fn from_envelope(id: u64, procedure: &ProcedureId, envelope: CallEnvelope) -> Result<Self> {
        Ok(Self {
            id,
            procedure: procedure.to_string(),
            args: text_payload(envelope.args)?,
            xsrf: envelope.xsrf,
        })
    }

    pub fn into_envelope(self) -> (ProcedureId, CallEnvelope) {
        (
            ProcedureId::from(self.procedure),
            CallEnvelope {
                args: EncodedValue::Text(self.args),
                xsrf: self.xsrf,
            },
        )
    }
}

/// Handler outcome as it travels: `result` is the encoded value on success
/// and the error message on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOutcome {
    pub success: bool,
    pub result: String,
}

impl TryFrom<CallOutcome> for WireOutcome {
    type Error = BridgeError;

    fn try_from(outcome: CallOutcome) -> Result<Self> {
        Ok(match outcome {
            CallOutcome::Success(value) => Self {
                success: true,
                result: text_payload(value)?,
            },
            CallOutcome::Failure(remote) => Self {
                success: false,
                result: remote.message,
            },
        })
    }
}

impl From<WireOutcome> for CallOutcome {
    fn from(wire: WireOutcome) -> Self {
        if wire.success {
            CallOutcome::Success(EncodedValue::Text(wire.result))
        } else {
            CallOutcome::Failure(RemoteError::new(wire.result))
        }
    }
}

/// Transport-level failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
}

/// Response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WireOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireResponse {
    pub fn outcome(id: u64, outcome: WireOutcome) -> Self {
        Self {
            id: Some(id),
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, code: i32, message: String) -> Self {
        Self {
            id,
            outcome: None,
            error: Some(WireError { code, message }),
        }
    }
}

fn text_payload(value: EncodedValue) -> Result<String> {
    match value {
        EncodedValue::Text(text) => Ok(text),
        EncodedValue::Native(_) => Err(BridgeError::transport(
            "Structured payloads cannot cross the TCP transport",
        )),
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(BridgeError::transport(format!(
            "IPC message size {} exceeds maximum {}",
            len,
            IpcConfig::MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        BridgeError::transport(format!("IPC message size {} does not fit a frame", payload.len()))
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
