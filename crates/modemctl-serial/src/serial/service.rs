//! Modem service: discovery plus one session against the found device.
//!
//! Owns the port back-end and the two observers (status rows and the
//! transcript).  The transport for a session is created here and closed
//! here on every exit path.

use crate::serial::logging::TranscriptSink;
use crate::serial::modem::ModemController;
use crate::serial::port_scanner::{self, PortBackend};
use crate::serial::session::{SessionReport, SessionRunner};
use crate::serial::types::*;
use modemctl_core::{StatusRow, StatusSink};
use std::sync::Arc;

/// Shared handle to a service.
pub type ModemServiceState = Arc<ModemService>;

/// Top-level entry point for discovery and sessions.
pub struct ModemService {
    backend: Arc<dyn PortBackend>,
    status: Arc<dyn StatusSink>,
    transcript: Arc<dyn TranscriptSink>,
    config: SessionConfig,
}

impl ModemService {
    pub fn new(
        backend: Arc<dyn PortBackend>,
        status: Arc<dyn StatusSink>,
        transcript: Arc<dyn TranscriptSink>,
        config: SessionConfig,
    ) -> ModemServiceState {
        Arc::new(Self {
            backend,
            status,
            transcript,
            config,
        })
    }

    // ── Discovery ─────────────────────────────────────────────────

    /// Every serial port currently present, unfiltered.
    pub async fn list_ports(&self) -> SerialResult<Vec<PortCandidate>> {
        self.backend.available_ports().await
    }

    /// Find the modem among ports matching `filter`.
    pub async fn discover(&self, filter: &str) -> SerialResult<Option<String>> {
        port_scanner::find_modem_port(
            self.backend.as_ref(),
            filter,
            &self.config.timings,
            self.status.as_ref(),
        )
        .await
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Open `port_name`, run `commands`, and close the port whatever the
    /// result.
    pub async fn run_session(
        &self,
        port_name: &str,
        commands: &[CommandDescriptor],
    ) -> SerialResult<SessionReport> {
        let serial_config = SerialConfig::for_port(port_name);
        let transport = self
            .backend
            .connect(&serial_config)
            .await
            .map_err(|e| e.with_port(port_name))?;
        log::info!("[session:{}] connected at {}", port_name, serial_config);

        let modem = ModemController::new(
            transport.clone(),
            self.transcript.clone(),
            self.config.timings,
        );
        let result = SessionRunner::new(&modem, self.status.as_ref(), &self.config)
            .run(commands)
            .await;

        match transport.close().await {
            Ok(()) => log::info!("[session:{}] connection closed", port_name),
            Err(e) => log::warn!("[session:{}] close failed: {}", port_name, e),
        }
        result
    }

    /// Discover the modem (unless `port_override` names one) and run a
    /// session against it.
    ///
    /// `Ok(None)` means no modem was found; no transport was opened.
    pub async fn execute(
        &self,
        commands: &[CommandDescriptor],
        port_override: Option<&str>,
    ) -> SerialResult<Option<SessionReport>> {
        let port_name = match port_override {
            Some(port) => {
                log::info!("[service] using port {} without discovery", port);
                self.status
                    .report(StatusRow::info("Using port", port.to_string()));
                port.to_string()
            }
            None => match self.discover(port_scanner::platform_port_filter()).await? {
                Some(port) => port,
                None => return Ok(None),
            },
        };

        let report = self.run_session(&port_name, commands).await?;
        self.status.report(report.summary_row());
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::logging::MemoryTranscript;
    use crate::serial::port_scanner::SimulatedPortBackend;
    use crate::serial::transport::SerialTransport;
    use modemctl_core::RecordingStatusSink;

    fn service(
        backend: SimulatedPortBackend,
        root: &std::path::Path,
    ) -> (ModemServiceState, Arc<RecordingStatusSink>, Arc<MemoryTranscript>) {
        let status = Arc::new(RecordingStatusSink::new());
        let transcript = Arc::new(MemoryTranscript::new());
        let config = SessionConfig {
            file_root: root.to_path_buf(),
            ..SessionConfig::default()
        };
        let svc = ModemService::new(Arc::new(backend), status.clone(), transcript.clone(), config);
        (svc, status, transcript)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_session_closes_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SimulatedPortBackend::new();
        let port = backend.add_port("/dev/ttyUSB2", "Quectel USB Modem");
        port.script_reply(b"OK").await;
        let (svc, _status, transcript) = service(backend, dir.path());

        let report = svc
            .run_session("/dev/ttyUSB2", &[CommandDescriptor::new("AT", "OK")])
            .await
            .unwrap();
        assert!(report.is_success());
        assert!(!port.is_open());
        assert_eq!(transcript.entries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_session_closes_on_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SimulatedPortBackend::new();
        let port = backend.add_port("/dev/ttyUSB2", "");
        let (svc, _status, _transcript) = service(backend, dir.path());
        port.set_fail_write(true);

        let err = svc
            .run_session("/dev/ttyUSB2", &[CommandDescriptor::new("AT", "OK")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::TransportError);
        assert!(!port.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_without_modem_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SimulatedPortBackend::new();
        let port = backend.add_port("/dev/ttyS0", "");
        let (svc, status, _transcript) = service(backend, dir.path());

        let result = svc
            .execute(&[CommandDescriptor::new("AT", "OK")], None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(port.open_count(), 0);
        assert_eq!(status.rows()[0].message, "Modem not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_port_override_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SimulatedPortBackend::new();
        let port = backend.add_port("COM7", "USB Serial");
        port.script_reply(b"+CFUN: 1\r\nOK").await;
        let (svc, status, _transcript) = service(backend, dir.path());

        let report = svc
            .execute(&[CommandDescriptor::new("AT+CFUN?", "+CFUN: 1")], Some("COM7"))
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_success());
        assert_eq!(port.open_count(), 1);
        let rows = status.rows();
        assert_eq!(rows.first().unwrap().message, "Using port");
        assert_eq!(rows.last().unwrap().message, "Session on COM7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_ports() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SimulatedPortBackend::new();
        backend.add_port("COM3", "Quectel USB Modem");
        backend.add_port("COM4", "USB Serial");
        let (svc, _status, _transcript) = service(backend, dir.path());
        let ports = svc.list_ports().await.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port_name, "COM3");
    }
}
