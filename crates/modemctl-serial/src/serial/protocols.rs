//! File storage protocols: upload (`AT+QFUPL`) and delete (`AT+QFDEL`).
//!
//! Upload runs a small state machine over the dispatcher:
//!
//! ```text
//! prepare -> command sent -> HandshakeWait -> streaming -> CompletionWait
//!         -> Verified | SizeMismatch | ProtocolError
//! ```
//!
//! The device acknowledges nothing per byte, so integrity is checked once
//! at the end by comparing the size it reports with the local size.

use crate::serial::modem::{AtCommands, ModemController};
use crate::serial::transport::wait_then_read;
use crate::serial::types::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimum upload timeout sent to the modem, in seconds.
pub const MIN_UPLOAD_TIMEOUT_SECS: u64 = 20;

/// Upload timeout argument for a file of `file_size` bytes.
///
/// Only sent to the modem; nothing waits on it locally.
pub fn computed_timeout(file_size: u64) -> u64 {
    (file_size / 100).max(MIN_UPLOAD_TIMEOUT_SECS)
}

/// The wait-then-read exchange an upload broke down in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadPhase {
    /// Waiting for `CONNECT` after the initiation command.
    HandshakeWait,
    /// Waiting for the `+QFUPL:` report after the payload.
    CompletionWait,
}

/// One file transfer, fully loaded before anything is sent.  Never
/// shared across files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub filename: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub computed_timeout: u64,
    pub data: Vec<u8>,
}

impl UploadSession {
    /// Resolve `filename` under `file_root` and read it.
    ///
    /// Any failure here is `FileNotFound`; the modem has not been told
    /// about the transfer yet, so nothing needs unwinding.
    pub async fn prepare(file_root: &Path, filename: &str) -> SerialResult<Self> {
        let path = file_root.join(filename);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            SerialError::file_not_found(format!("File {} not found: {}", path.display(), e))
        })?;
        let file_size = data.len() as u64;
        Ok(Self {
            filename: filename.to_string(),
            path,
            file_size,
            computed_timeout: computed_timeout(file_size),
            data,
        })
    }

    /// The upload-initiation command for this transfer.
    pub fn command(&self) -> String {
        AtCommands::upload(&self.filename, self.file_size, self.computed_timeout)
    }
}

/// Terminal result of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum UploadOutcome {
    Verified { size: u64 },
    /// `actual` is the size the modem reported.
    SizeMismatch { expected: u64, actual: u64 },
    ProtocolError {
        phase: UploadPhase,
        reason: String,
        raw_response: String,
    },
}

/// Reason reported when the handshake is refused.
pub const NOT_READY: &str = "modem not ready for upload";
/// Reason reported when the completion report cannot be parsed.
pub const INVALID_RESPONSE: &str = "invalid modem response";

/// Whether the modem granted the raw-data handshake.
pub fn is_handshake_granted(response: &str) -> bool {
    response.contains(AtCommands::CONNECT)
}

/// Parse the size field of a `+QFUPL: <size>,<checksum>` report.
pub fn parse_upload_ack(response: &str) -> Option<u64> {
    let rest = response.trim().strip_prefix(AtCommands::UPLOAD_ACK)?;
    let first_line = rest.lines().next().unwrap_or("");
    let size_field = first_line.split(',').next().unwrap_or("");
    size_field.trim().parse::<u64>().ok()
}

/// Classify the completion report against the local size.
pub fn verify_completion(response: &str, file_size: u64) -> UploadOutcome {
    match parse_upload_ack(response) {
        Some(actual) if actual == file_size => UploadOutcome::Verified { size: actual },
        Some(actual) => UploadOutcome::SizeMismatch {
            expected: file_size,
            actual,
        },
        None => UploadOutcome::ProtocolError {
            phase: UploadPhase::CompletionWait,
            reason: INVALID_RESPONSE.to_string(),
            raw_response: response.to_string(),
        },
    }
}

/// Upload `filename` from `file_root` into modem storage.
///
/// `Err` is returned for a missing local file (nothing is sent) and for
/// transport failures; protocol refusals and size mismatches are
/// reported as an [`UploadOutcome`].
pub async fn upload_file(
    modem: &ModemController,
    file_root: &Path,
    filename: &str,
) -> SerialResult<UploadOutcome> {
    let session = UploadSession::prepare(file_root, filename).await?;
    let port = modem.port_name().to_string();
    log::debug!(
        "[upload:{}] {} is {} bytes, timeout {}s",
        port,
        session.path.display(),
        session.file_size,
        session.computed_timeout
    );

    let command = session.command();
    modem.send_raw(&command).await?;
    let handshake =
        wait_then_read(modem.transport(), modem.timings().upload_handshake_delay()).await?;
    modem.transcript().record(&command, Some(&handshake));

    if !is_handshake_granted(&handshake) {
        log::error!("[upload:{}] {}: {:?}", port, NOT_READY, handshake);
        return Ok(UploadOutcome::ProtocolError {
            phase: UploadPhase::HandshakeWait,
            reason: NOT_READY.to_string(),
            raw_response: handshake,
        });
    }

    let bytes_sent = modem.transport().write(&session.data).await?;
    log::debug!("[upload:{}] sent {} bytes", port, bytes_sent);

    let completion =
        wait_then_read(modem.transport(), modem.timings().upload_completion_delay()).await?;
    modem
        .transcript()
        .record(&format!("Sending file: {}", filename), Some(&completion));

    let outcome = verify_completion(&completion, session.file_size);
    match outcome {
        UploadOutcome::Verified { .. } => {
            log::info!("[upload:{}] {} uploaded and verified", port, filename)
        }
        UploadOutcome::SizeMismatch { expected, actual } => log::error!(
            "[upload:{}] {} size mismatch: expected {}, got {}",
            port,
            filename,
            expected,
            actual
        ),
        UploadOutcome::ProtocolError { .. } => {
            log::error!("[upload:{}] {}: {:?}", port, INVALID_RESPONSE, completion)
        }
    }
    Ok(outcome)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Delete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a delete command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum DeleteOutcome {
    Deleted,
    /// The file was not there.  Benign.
    NotFound,
    OtherError { raw_response: String },
}

/// Classify a delete response.  `OK` takes precedence over the
/// not-found error code when both appear.
pub fn classify_delete(response: &str) -> DeleteOutcome {
    if response.contains(AtCommands::OK) {
        DeleteOutcome::Deleted
    } else if response.contains(AtCommands::FILE_NOT_FOUND) {
        DeleteOutcome::NotFound
    } else {
        DeleteOutcome::OtherError {
            raw_response: response.to_string(),
        }
    }
}

/// Send a delete command as-is and classify the response.
pub async fn delete_file(modem: &ModemController, command: &str) -> SerialResult<DeleteOutcome> {
    let response = modem.dispatch(command).await?;
    let outcome = classify_delete(&response);
    match outcome {
        DeleteOutcome::Deleted => log::info!("[delete:{}] {} ok", modem.port_name(), command),
        DeleteOutcome::NotFound => log::info!(
            "[delete:{}] nothing to delete for {}, skipping",
            modem.port_name(),
            command
        ),
        DeleteOutcome::OtherError { .. } => log::error!(
            "[delete:{}] {} failed: {:?}",
            modem.port_name(),
            command,
            response
        ),
    }
    Ok(outcome)
}
