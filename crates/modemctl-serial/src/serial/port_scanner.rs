//! Serial port discovery and modem probing.
//!
//! Enumerates the host's serial ports, narrows them with a per-platform
//! filter string, and sends an `AT` liveness probe to each survivor until
//! one answers `OK`.

use crate::serial::modem::AtCommands;
use crate::serial::transport::{wait_then_read, SerialTransport, SimulatedTransport, SystemTransport};
use crate::serial::types::*;
use modemctl_core::{StatusRow, StatusSink};
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port back-ends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Source of port candidates and connections.
#[async_trait::async_trait]
pub trait PortBackend: Send + Sync {
    /// Enumerate every serial endpoint currently present.
    async fn available_ports(&self) -> SerialResult<Vec<PortCandidate>>;

    /// Open a connection to `port_name`.
    async fn connect(&self, config: &SerialConfig) -> SerialResult<Arc<dyn SerialTransport>>;
}

/// Real ports, via the `serialport` crate.
#[derive(Debug, Default)]
pub struct SystemPortBackend;

impl SystemPortBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl PortBackend for SystemPortBackend {
    async fn available_ports(&self) -> SerialResult<Vec<PortCandidate>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| SerialError::transport(format!("blocking task failed: {}", e)))??;
        Ok(ports.into_iter().map(candidate_from_system).collect())
    }

    async fn connect(&self, config: &SerialConfig) -> SerialResult<Arc<dyn SerialTransport>> {
        let transport = SystemTransport::new(&config.port_name);
        transport.open(config).await?;
        Ok(transport)
    }
}

fn candidate_from_system(info: serialport::SerialPortInfo) -> PortCandidate {
    let (description, port_type) = match info.port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let desc = usb
                .product
                .or(usb.manufacturer)
                .unwrap_or_else(|| format!("USB {:04X}:{:04X}", usb.vid, usb.pid));
            (desc, PortType::UsbSerial)
        }
        serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), PortType::Bluetooth),
        serialport::SerialPortType::PciPort => ("PCI".to_string(), PortType::Native),
        serialport::SerialPortType::Unknown => ("n/a".to_string(), classify_port(&info.port_name)),
    };
    PortCandidate {
        port_name: info.port_name,
        description,
        port_type,
    }
}

/// A fixed set of simulated ports, served in order.
pub struct SimulatedPortBackend {
    ports: Vec<(PortCandidate, Arc<SimulatedTransport>)>,
}

impl SimulatedPortBackend {
    pub fn new() -> Self {
        Self { ports: Vec::new() }
    }

    /// Register a simulated port and return its transport for scripting.
    pub fn add_port(&mut self, port_name: &str, description: &str) -> Arc<SimulatedTransport> {
        let transport = SimulatedTransport::new(port_name);
        self.ports.push((
            PortCandidate {
                port_name: port_name.to_string(),
                description: description.to_string(),
                port_type: classify_port(port_name),
            },
            Arc::clone(&transport),
        ));
        transport
    }

    pub fn transport(&self, port_name: &str) -> Option<Arc<SimulatedTransport>> {
        self.ports
            .iter()
            .find(|(c, _)| c.port_name == port_name)
            .map(|(_, t)| Arc::clone(t))
    }
}

impl Default for SimulatedPortBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PortBackend for SimulatedPortBackend {
    async fn available_ports(&self) -> SerialResult<Vec<PortCandidate>> {
        Ok(self.ports.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn connect(&self, config: &SerialConfig) -> SerialResult<Arc<dyn SerialTransport>> {
        let transport = self.transport(&config.port_name).ok_or_else(|| {
            SerialError::transport("No such port").with_port(&config.port_name)
        })?;
        transport.open(config).await?;
        Ok(transport)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Filtering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Windows exposes the modem's AT port by its driver description.
pub const WINDOWS_PORT_FILTER: &str = "Quectel USB Modem";

/// Elsewhere the USB serial device path is the only stable handle.
pub const UNIX_PORT_FILTER: &str = "ttyUSB";

/// Filter string for a host OS name as reported by `std::env::consts::OS`.
pub fn port_filter_for(os: &str) -> &'static str {
    match os {
        "windows" => WINDOWS_PORT_FILTER,
        _ => UNIX_PORT_FILTER,
    }
}

/// Filter string for the running host.
pub fn platform_port_filter() -> &'static str {
    port_filter_for(std::env::consts::OS)
}

/// Whether the candidate's device path or description contains `filter`.
pub fn matches_filter(candidate: &PortCandidate, filter: &str) -> bool {
    candidate.port_name.contains(filter) || candidate.description.contains(filter)
}

/// Classify a port name into a PortType.
pub fn classify_port(port_name: &str) -> PortType {
    let lower = port_name.to_lowercase();
    if lower.contains("usb") || lower.contains("acm") {
        PortType::UsbSerial
    } else if lower.contains("bluetooth") || lower.contains("rfcomm") || lower.contains("bth") {
        PortType::Bluetooth
    } else if lower.contains("pts") || lower.contains("pty") {
        PortType::Virtual
    } else if lower.starts_with("com") || lower.starts_with("/dev/ttys") {
        PortType::Native
    } else {
        PortType::Unknown
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Probing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check if a probe response came from a live AT interpreter.
pub fn is_probe_ack(response: &str) -> bool {
    response.contains(AtCommands::OK)
}

/// Open `port_name`, send `AT`, and report whether it answered `OK`.
///
/// The probe connection is always closed before returning.
pub async fn probe_port(
    backend: &dyn PortBackend,
    port_name: &str,
    timings: &Timings,
) -> SerialResult<bool> {
    let transport = backend.connect(&SerialConfig::for_port(port_name)).await?;
    log::debug!("[probe:{}] trying port", port_name);

    let exchange = async {
        transport
            .write(format!("{}\r", AtCommands::AT).as_bytes())
            .await?;
        wait_then_read(transport.as_ref(), timings.probe_delay()).await
    }
    .await;

    if let Err(e) = transport.close().await {
        log::warn!("[probe:{}] close failed: {}", port_name, e);
    }

    let response = exchange?;
    log::debug!("[probe:{}] response: {:?}", port_name, response);
    Ok(is_probe_ack(&response))
}

/// Locate the modem.
///
/// Waits for the device to settle, enumerates ports, and probes every
/// candidate matching `filter` in enumeration order.  The first one that
/// answers `OK` wins.  `Ok(None)` means nothing answered, which includes
/// an empty enumeration; per-candidate transport errors are logged and
/// skipped.
pub async fn find_modem_port(
    backend: &dyn PortBackend,
    filter: &str,
    timings: &Timings,
    status: &dyn StatusSink,
) -> SerialResult<Option<String>> {
    tokio::time::sleep(timings.discovery_settle()).await;

    let ports = backend.available_ports().await?;
    if ports.is_empty() {
        let err = SerialError::new(
            SerialErrorKind::NoPortsAvailable,
            "No ports available. Ensure the modem is connected.",
        );
        log::error!("{}", err);
        status.report(StatusRow::fail("Modem not found", "no serial ports available."));
        return Ok(None);
    }

    for candidate in &ports {
        if !matches_filter(candidate, filter) {
            log::debug!("[probe:{}] skipping port", candidate.port_name);
            continue;
        }
        match probe_port(backend, &candidate.port_name, timings).await {
            Ok(true) => {
                log::info!("[probe:{}] modem answered", candidate.port_name);
                status.report(StatusRow::pass(
                    "Modem found",
                    format!("on port: {}", candidate.port_name),
                ));
                return Ok(Some(candidate.port_name.clone()));
            }
            Ok(false) => {}
            Err(e) => log::error!("[probe:{}] error on port: {}", candidate.port_name, e),
        }
    }

    let err = SerialError::new(
        SerialErrorKind::ModemNotFound,
        "Modem not found on any available ports.",
    );
    log::error!("{}", err);
    status.report(StatusRow::fail("Modem not found", "on any available ports."));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemctl_core::{RecordingStatusSink, Severity};

    fn timings() -> Timings {
        Timings::default()
    }

    #[test]
    fn test_port_filter_lookup() {
        assert_eq!(port_filter_for("windows"), "Quectel USB Modem");
        assert_eq!(port_filter_for("linux"), "ttyUSB");
        assert_eq!(port_filter_for("macos"), "ttyUSB");
    }

    #[test]
    fn test_matches_filter_path_or_description() {
        let by_path = PortCandidate {
            port_name: "/dev/ttyUSB2".into(),
            description: "n/a".into(),
            port_type: PortType::UsbSerial,
        };
        let by_desc = PortCandidate {
            port_name: "COM7".into(),
            description: "Quectel USB Modem (COM7)".into(),
            port_type: PortType::UsbSerial,
        };
        assert!(matches_filter(&by_path, "ttyUSB"));
        assert!(!matches_filter(&by_path, "Quectel USB Modem"));
        assert!(matches_filter(&by_desc, "Quectel USB Modem"));
    }

    #[test]
    fn test_classify_port() {
        assert_eq!(classify_port("/dev/ttyUSB0"), PortType::UsbSerial);
        assert_eq!(classify_port("/dev/ttyACM0"), PortType::UsbSerial);
        assert_eq!(classify_port("COM1"), PortType::Native);
        assert_eq!(classify_port("/dev/ttyS0"), PortType::Native);
        assert_eq!(classify_port("/dev/rfcomm0"), PortType::Bluetooth);
        assert_eq!(classify_port("/dev/pts/3"), PortType::Virtual);
    }

    #[test]
    fn test_is_probe_ack() {
        assert!(is_probe_ack("AT\r\nOK"));
        assert!(!is_probe_ack("ERROR"));
        assert!(!is_probe_ack(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_wins() {
        let mut backend = SimulatedPortBackend::new();
        let silent = backend.add_port("/dev/ttyUSB0", "n/a");
        let first = backend.add_port("/dev/ttyUSB1", "n/a");
        let second = backend.add_port("/dev/ttyUSB2", "n/a");
        first.script_reply(b"AT\r\nOK\r\n").await;
        second.script_reply(b"OK\r\n").await;

        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, "ttyUSB", &timings(), &sink)
            .await
            .unwrap();
        assert_eq!(port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(silent.open_count(), 1);
        assert_eq!(second.open_count(), 0);
        assert!(!first.is_open());
        assert!(!silent.is_open());

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].detail, "on port: /dev/ttyUSB1");
        assert_eq!(rows[0].severity, Severity::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_skips_non_matching() {
        let mut backend = SimulatedPortBackend::new();
        let native = backend.add_port("/dev/ttyS0", "n/a");
        native.script_reply(b"OK").await;
        let modem = backend.add_port("/dev/ttyUSB3", "n/a");
        modem.script_reply(b"OK").await;

        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, "ttyUSB", &timings(), &sink)
            .await
            .unwrap();
        assert_eq!(port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(native.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_does_not_abort_scan() {
        let mut backend = SimulatedPortBackend::new();
        let busy = backend.add_port("COM3", "Quectel USB Modem (COM3)");
        busy.set_fail_open(true);
        let modem = backend.add_port("COM4", "Quectel USB Modem (COM4)");
        modem.script_reply(b"OK").await;

        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, WINDOWS_PORT_FILTER, &timings(), &sink)
            .await
            .unwrap();
        assert_eq!(port.as_deref(), Some("COM4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_closes_probe() {
        let mut backend = SimulatedPortBackend::new();
        let broken = backend.add_port("/dev/ttyUSB0", "n/a");
        broken.set_fail_write(true);

        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, "ttyUSB", &timings(), &sink)
            .await
            .unwrap();
        assert!(port.is_none());
        assert!(!broken.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ports_is_absence() {
        let backend = SimulatedPortBackend::new();
        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, "ttyUSB", &timings(), &sink)
            .await
            .unwrap();
        assert!(port.is_none());
        assert_eq!(sink.rows()[0].severity, Severity::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_when_nothing_answers() {
        let mut backend = SimulatedPortBackend::new();
        let t = backend.add_port("/dev/ttyUSB0", "n/a");
        t.script_reply(b"ERROR").await;

        let sink = RecordingStatusSink::new();
        let port = find_modem_port(&backend, "ttyUSB", &timings(), &sink)
            .await
            .unwrap();
        assert!(port.is_none());
        let rows = sink.rows();
        assert_eq!(rows[0].message, "Modem not found");
        assert_eq!(rows[0].detail, "on any available ports.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_sends_at() {
        let mut backend = SimulatedPortBackend::new();
        let t = backend.add_port("/dev/ttyUSB0", "n/a");
        t.script_reply(b"OK").await;
        assert!(probe_port(&backend, "/dev/ttyUSB0", &Timings::default())
            .await
            .unwrap());
        assert_eq!(t.drain_tx().await, b"AT\r");
    }
}
