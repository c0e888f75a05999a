//! AT command support.
//!
//! Command constants and builders, command-shape parsing, response
//! matching, and the [`ModemController`] that dispatches one command at a
//! time over a serial transport.

use crate::serial::logging::TranscriptSink;
use crate::serial::transport::{wait_then_read, SerialTransport};
use crate::serial::types::*;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Standard AT commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Well-known AT commands and result strings.
pub struct AtCommands;

impl AtCommands {
    /// Attention / ping.
    pub const AT: &'static str = "AT";
    /// Upload a file to modem storage.
    pub const UPLOAD: &'static str = "AT+QFUPL";
    /// Delete a file from modem storage.
    pub const DELETE: &'static str = "AT+QFDEL";

    /// Final result for a successful command.
    pub const OK: &'static str = "OK";
    /// Modem is ready to receive a raw byte stream.
    pub const CONNECT: &'static str = "CONNECT";
    /// Prefix of the upload completion report.
    pub const UPLOAD_ACK: &'static str = "+QFUPL:";
    /// Extended error for "file does not exist".
    pub const FILE_NOT_FOUND: &'static str = "+CME ERROR: 418";

    /// Build an upload command for a file of `size` bytes.
    pub fn upload(filename: &str, size: u64, timeout_secs: u64) -> String {
        format!("{}=\"{}\",{},{}", Self::UPLOAD, filename, size, timeout_secs)
    }

    /// Build a delete command.
    pub fn delete(filename: &str) -> String {
        format!("{}=\"{}\"", Self::DELETE, filename)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a command from the command source is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Sent as-is and matched against the expected response.
    Plain,
    /// File upload; size and timeout arguments are recomputed.
    Upload { filename: String },
    /// File deletion; the command text is sent as-is.
    Delete { filename: Option<String> },
    /// Recognised shape with missing arguments.
    Malformed { reason: String },
}

impl ParsedCommand {
    pub fn parse(command: &str) -> Self {
        let command = command.trim();
        if command.starts_with(AtCommands::UPLOAD) {
            match quoted_argument(command) {
                Some(name) if !name.is_empty() => Self::Upload {
                    filename: name.to_string(),
                },
                _ => Self::Malformed {
                    reason: "upload command has no quoted filename".to_string(),
                },
            }
        } else if command.starts_with(AtCommands::DELETE) {
            Self::Delete {
                filename: quoted_argument(command).map(str::to_string),
            }
        } else {
            Self::Plain
        }
    }
}

/// Text between the first pair of double quotes.
pub fn quoted_argument(command: &str) -> Option<&str> {
    let mut parts = command.split('"');
    parts.next()?;
    let arg = parts.next()?;
    // An unterminated quote yields no closing part.
    parts.next()?;
    Some(arg)
}

/// Whether `raw` satisfies `expected`.  Case-sensitive; both sides are
/// trimmed and an empty expectation always matches.
pub fn response_matches(raw: &str, expected: &str) -> bool {
    let expected = expected.trim();
    expected.is_empty() || raw.trim().contains(expected)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sends commands to an open modem, one at a time, and records every
/// exchange in the transcript.
pub struct ModemController {
    transport: Arc<dyn SerialTransport>,
    transcript: Arc<dyn TranscriptSink>,
    timings: Timings,
}

impl ModemController {
    pub fn new(
        transport: Arc<dyn SerialTransport>,
        transcript: Arc<dyn TranscriptSink>,
        timings: Timings,
    ) -> Self {
        Self {
            transport,
            transcript,
            timings,
        }
    }

    pub fn transport(&self) -> &dyn SerialTransport {
        self.transport.as_ref()
    }

    pub fn transcript(&self) -> &dyn TranscriptSink {
        self.transcript.as_ref()
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    /// Write `command` followed by CR and record it as pending.
    pub async fn send_raw(&self, command: &str) -> SerialResult<()> {
        let mut bytes = command.as_bytes().to_vec();
        bytes.push(b'\r');
        self.transport.write(&bytes).await?;
        self.transcript.record(command, None);
        Ok(())
    }

    /// Send `command`, wait the inter-command delay, and return the
    /// trimmed response.  No retries and no command-specific parsing.
    pub async fn dispatch(&self, command: &str) -> SerialResult<String> {
        self.send_raw(command).await?;
        let response =
            wait_then_read(self.transport.as_ref(), self.timings.command_delay()).await?;
        log::debug!(
            "[modem:{}] {} -> {:?}",
            self.transport.port_name(),
            command,
            response
        );
        self.transcript.record(command, Some(&response));
        Ok(response)
    }

    /// Dispatch a plain command and classify it against its expectation.
    pub async fn execute(&self, descriptor: &CommandDescriptor) -> SerialResult<CommandResult> {
        let raw_response = self.dispatch(&descriptor.command).await?;
        let matched = response_matches(&raw_response, &descriptor.expected_response);
        Ok(CommandResult {
            command: descriptor.command.clone(),
            raw_response,
            matched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::logging::MemoryTranscript;
    use crate::serial::transport::SimulatedTransport;

    async fn controller() -> (Arc<SimulatedTransport>, Arc<MemoryTranscript>, ModemController) {
        let transport = SimulatedTransport::new("COM1");
        transport
            .open(&SerialConfig::for_port("COM1"))
            .await
            .unwrap();
        let transcript = Arc::new(MemoryTranscript::new());
        let controller = ModemController::new(
            transport.clone(),
            transcript.clone(),
            Timings::default(),
        );
        (transport, transcript, controller)
    }

    #[test]
    fn test_upload_command_builder() {
        assert_eq!(
            AtCommands::upload("cert.pem", 2048, 20),
            "AT+QFUPL=\"cert.pem\",2048,20"
        );
        assert_eq!(AtCommands::delete("cert.pem"), "AT+QFDEL=\"cert.pem\"");
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(ParsedCommand::parse("AT+CFUN?"), ParsedCommand::Plain);
        assert_eq!(ParsedCommand::parse("ATI"), ParsedCommand::Plain);
    }

    #[test]
    fn test_parse_upload_discards_arguments() {
        assert_eq!(
            ParsedCommand::parse("AT+QFUPL=\"UFS:cacert.pem\",10,5"),
            ParsedCommand::Upload {
                filename: "UFS:cacert.pem".to_string()
            }
        );
        assert_eq!(
            ParsedCommand::parse("AT+QFUPL=\"cert.pem\""),
            ParsedCommand::Upload {
                filename: "cert.pem".to_string()
            }
        );
    }

    #[test]
    fn test_parse_upload_without_filename() {
        assert!(matches!(
            ParsedCommand::parse("AT+QFUPL"),
            ParsedCommand::Malformed { .. }
        ));
        assert!(matches!(
            ParsedCommand::parse("AT+QFUPL=\"\""),
            ParsedCommand::Malformed { .. }
        ));
        assert!(matches!(
            ParsedCommand::parse("AT+QFUPL=\"cert.pem"),
            ParsedCommand::Malformed { .. }
        ));
    }

    #[test]
    fn test_parse_delete() {
        assert_eq!(
            ParsedCommand::parse("AT+QFDEL=\"missing.pem\""),
            ParsedCommand::Delete {
                filename: Some("missing.pem".to_string())
            }
        );
        assert_eq!(
            ParsedCommand::parse("AT+QFDEL=*"),
            ParsedCommand::Delete { filename: None }
        );
    }

    #[test]
    fn test_response_matches() {
        assert!(response_matches("+CFUN: 1\r\n\r\nOK", "+CFUN: 1"));
        assert!(response_matches("anything", ""));
        assert!(response_matches("", "   "));
        assert!(!response_matches("+cfun: 1", "+CFUN: 1"));
        assert!(!response_matches("", "OK"));
        assert!(response_matches("  OK  ", " OK "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_writes_cr_and_records() {
        let (transport, transcript, controller) = controller().await;
        transport.script_reply(b"\r\nOK\r\n").await;

        let response = controller.dispatch("ATE0").await.unwrap();
        assert_eq!(response, "OK");
        assert_eq!(transport.drain_tx().await, b"ATE0\r");

        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "ATE0");
        assert!(entries[0].response.is_none());
        assert_eq!(entries[1].response.as_deref(), Some("OK"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_waits_command_delay() {
        let (transport, _transcript, controller) = controller().await;
        transport.script_reply(b"OK").await;
        let start = tokio::time::Instant::now();
        controller.dispatch("AT").await.unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_classifies() {
        let (transport, _transcript, controller) = controller().await;
        transport.script_reply(b"+CFUN: 1\r\n\r\nOK\r\n").await;
        transport.script_reply(b"+CFUN: 0\r\n\r\nOK\r\n").await;

        let hit = controller
            .execute(&CommandDescriptor::new("AT+CFUN?", "+CFUN: 1"))
            .await
            .unwrap();
        assert!(hit.matched);
        assert_eq!(hit.raw_response, "+CFUN: 1\r\n\r\nOK");

        let miss = controller
            .execute(&CommandDescriptor::new("AT+CFUN?", "+CFUN: 1"))
            .await
            .unwrap();
        assert!(!miss.matched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_transport_error() {
        let (transport, _transcript, controller) = controller().await;
        transport.set_fail_write(true);
        let err = controller.dispatch("AT").await.unwrap_err();
        assert!(err.is_fatal_to_session());
    }
}
