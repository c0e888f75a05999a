//! Shared types for the modem session engine.
//!
//! Covers port configuration, discovery candidates, command descriptors,
//! session timings and policy, and the structured error type.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Baud rate every modem connection is opened with.
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Read timeout every modem connection is opened with.
pub const MODEM_READ_TIMEOUT_MS: u64 = 1_000;

/// Serial port configuration.  The line format is always 8N1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    /// Port name (e.g. `COM3`, `/dev/ttyUSB2`).
    pub port_name: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    MODEM_BAUD_RATE
}

fn default_read_timeout() -> u64 {
    MODEM_READ_TIMEOUT_MS
}

impl SerialConfig {
    /// Modem configuration for the given port.
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: MODEM_BAUD_RATE,
            read_timeout_ms: MODEM_READ_TIMEOUT_MS,
        }
    }

    /// Human-readable shorthand, e.g. `115200 8N1`.
    pub fn shorthand(&self) -> String {
        format!("{} 8N1", self.baud_rate)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl std::fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.shorthand())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classification of a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    UsbSerial,
    Native,
    Bluetooth,
    Virtual,
    Unknown,
}

impl PortType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UsbSerial => "USB Serial",
            Self::Native => "Native",
            Self::Bluetooth => "Bluetooth",
            Self::Virtual => "Virtual",
            Self::Unknown => "Unknown",
        }
    }
}

/// An endpoint found during enumeration.  Built fresh on every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortCandidate {
    pub port_name: String,
    pub description: String,
    pub port_type: PortType,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of the command source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub command: String,
    /// Substring the response must contain.  Empty always matches.
    #[serde(default)]
    pub expected_response: String,
}

impl CommandDescriptor {
    pub fn new(command: impl Into<String>, expected_response: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected_response: expected_response.into(),
        }
    }
}

/// Result of a plain dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command: String,
    pub raw_response: String,
    pub matched: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed waits used by the wait-then-read exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    /// Wait before enumerating ports, so a just-plugged device can boot.
    #[serde(default = "default_discovery_settle_ms")]
    pub discovery_settle_ms: u64,
    /// Wait between a liveness probe and its read.
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,
    /// Wait between a plain command and its read.
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,
    /// Wait between the upload command and the `CONNECT` read.
    #[serde(default = "default_upload_delay_ms")]
    pub upload_handshake_delay_ms: u64,
    /// Wait between the file stream and the `+QFUPL:` read.
    #[serde(default = "default_upload_delay_ms")]
    pub upload_completion_delay_ms: u64,
}

fn default_discovery_settle_ms() -> u64 {
    2_000
}

fn default_probe_delay_ms() -> u64 {
    1_000
}

fn default_command_delay_ms() -> u64 {
    1_000
}

fn default_upload_delay_ms() -> u64 {
    2_000
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            discovery_settle_ms: default_discovery_settle_ms(),
            probe_delay_ms: default_probe_delay_ms(),
            command_delay_ms: default_command_delay_ms(),
            upload_handshake_delay_ms: default_upload_delay_ms(),
            upload_completion_delay_ms: default_upload_delay_ms(),
        }
    }
}

impl Timings {
    pub fn discovery_settle(&self) -> Duration {
        Duration::from_millis(self.discovery_settle_ms)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn upload_handshake_delay(&self) -> Duration {
        Duration::from_millis(self.upload_handshake_delay_ms)
    }

    pub fn upload_completion_delay(&self) -> Duration {
        Duration::from_millis(self.upload_completion_delay_ms)
    }
}

/// What the session runner does after a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Every command is independent; keep going.
    #[default]
    Continue,
    /// Stop at the first failed step and skip the rest.
    StopOnError,
}

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Directory upload filenames are resolved against.
    #[serde(default = "default_file_root")]
    pub file_root: PathBuf,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub timings: Timings,
}

fn default_file_root() -> PathBuf {
    PathBuf::from("..").join("serts")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file_root: default_file_root(),
            failure_policy: FailurePolicy::default(),
            timings: Timings::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error kinds for discovery and session operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SerialErrorKind {
    NoPortsAvailable,
    ModemNotFound,
    TransportError,
    NotConnected,
    ConfigurationError,
    FileNotFound,
    ProtocolError,
    SizeMismatch,
}

/// Structured serial error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialError {
    pub kind: SerialErrorKind,
    pub message: String,
    pub port_name: Option<String>,
}

pub type SerialResult<T> = Result<T, SerialError>;

impl std::fmt::Display for SerialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port_name {
            Some(ref port) => write!(f, "[{:?}] {} ({})", self.kind, self.message, port),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SerialError {}

impl SerialError {
    pub fn new(kind: SerialErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            port_name: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port_name = Some(port.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::TransportError, msg)
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::NotConnected, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::ConfigurationError, msg)
    }

    pub fn file_not_found(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::FileNotFound, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(SerialErrorKind::ProtocolError, msg)
    }

    /// Errors that leave the connection unusable and abort a session.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self.kind,
            SerialErrorKind::TransportError | SerialErrorKind::NotConnected
        )
    }
}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        Self::transport(format!("I/O error: {}", e))
    }
}

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        Self::transport(e.to_string())
    }
}

impl From<serde_json::Error> for SerialError {
    fn from(e: serde_json::Error) -> Self {
        Self::configuration(format!("invalid command document: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_for_port() {
        let cfg = SerialConfig::for_port("/dev/ttyUSB2");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.shorthand(), "115200 8N1");
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let cfg: SerialConfig = serde_json::from_str(r#"{"portName":"COM4"}"#).unwrap();
        assert_eq!(cfg, SerialConfig::for_port("COM4"));
    }

    #[test]
    fn test_command_descriptor_default_expected() {
        let cmd: CommandDescriptor = serde_json::from_str(r#"{"command":"ATI"}"#).unwrap();
        assert_eq!(cmd.command, "ATI");
        assert!(cmd.expected_response.is_empty());
    }

    #[test]
    fn test_command_descriptor_snake_case_key() {
        let cmd: CommandDescriptor =
            serde_json::from_str(r#"{"command":"AT+CFUN?","expected_response":"+CFUN: 1"}"#)
                .unwrap();
        assert_eq!(cmd, CommandDescriptor::new("AT+CFUN?", "+CFUN: 1"));
    }

    #[test]
    fn test_timings_default() {
        let t = Timings::default();
        assert_eq!(t.discovery_settle(), Duration::from_secs(2));
        assert_eq!(t.probe_delay(), Duration::from_secs(1));
        assert_eq!(t.command_delay(), Duration::from_secs(1));
        assert_eq!(t.upload_handshake_delay(), Duration::from_secs(2));
        assert_eq!(t.upload_completion_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_session_config_partial_json() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"failurePolicy":"stopOnError","timings":{"commandDelayMs":5}}"#)
                .unwrap();
        assert_eq!(cfg.failure_policy, FailurePolicy::StopOnError);
        assert_eq!(cfg.timings.command_delay_ms, 5);
        assert_eq!(cfg.timings.probe_delay_ms, 1_000);
        assert_eq!(cfg.file_root, PathBuf::from("..").join("serts"));
    }

    #[test]
    fn test_error_display_and_port() {
        let err = SerialError::transport("write failed").with_port("COM3");
        assert_eq!(err.to_string(), "[TransportError] write failed (COM3)");
        assert!(err.is_fatal_to_session());
        assert!(!SerialError::file_not_found("x").is_fatal_to_session());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<CommandDescriptor>("{").unwrap_err();
        let err: SerialError = json_err.into();
        assert_eq!(err.kind, SerialErrorKind::ConfigurationError);
    }
}
