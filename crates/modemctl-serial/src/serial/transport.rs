//! Serial port transport abstraction.
//!
//! The protocol layers talk to a [`SerialTransport`] trait object.  The
//! production back-end wraps the `serialport` crate; the simulated one is
//! an in-memory device with scripted replies used by the test-suite.
//!
//! All reads go through [`wait_then_read`]: sleep for a fixed delay, then
//! drain whatever the device has buffered.  The modem gives no framing we
//! can wait on, so the delay is the only synchronisation.

use crate::serial::types::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Half-duplex byte-stream connection to one endpoint.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` by the session and the probe loop.
#[async_trait::async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the port with the given configuration.
    async fn open(&self, config: &SerialConfig) -> SerialResult<()>;

    /// Close the port.  Closing a closed port is a no-op.
    async fn close(&self) -> SerialResult<()>;

    /// Read up to `buf.len()` bytes into `buf`.  Returns number of bytes read.
    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize>;

    /// Write all bytes in `buf`.
    async fn write(&self, buf: &[u8]) -> SerialResult<usize>;

    /// Get number of bytes waiting in the receive buffer.
    async fn bytes_available(&self) -> SerialResult<usize>;

    /// Check whether the port is open.
    fn is_open(&self) -> bool;

    /// Retrieve the port name.
    fn port_name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Wait-then-read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain every byte currently buffered by the transport.
pub async fn read_available(transport: &dyn SerialTransport) -> SerialResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if transport.bytes_available().await? == 0 {
            break;
        }
        let n = transport.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

/// Decode a device response as trimmed text.
pub fn decode_response(data: &[u8]) -> String {
    String::from_utf8_lossy(data).trim().to_string()
}

/// Sleep for `delay`, then drain and decode the receive buffer.
///
/// An empty string means the device said nothing within the delay; there
/// is no escalation beyond that.
pub async fn wait_then_read(transport: &dyn SerialTransport, delay: Duration) -> SerialResult<String> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let data = read_available(transport).await?;
    Ok(decode_response(&data))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  System transport (serialport crate)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PortSlot = Arc<std::sync::Mutex<Option<Box<dyn serialport::SerialPort>>>>;

/// Transport backed by an OS serial port.  Every blocking call runs on
/// the blocking thread pool.
pub struct SystemTransport {
    name: String,
    port: PortSlot,
    open: AtomicBool,
}

impl SystemTransport {
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: port_name.into(),
            port: Arc::new(std::sync::Mutex::new(None)),
            open: AtomicBool::new(false),
        })
    }

    async fn with_port<T, F>(&self, f: F) -> SerialResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn serialport::SerialPort) -> SerialResult<T> + Send + 'static,
    {
        let slot = Arc::clone(&self.port);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| SerialError::transport("port lock poisoned").with_port(&name))?;
            match guard.as_mut() {
                Some(port) => f(port.as_mut()).map_err(|e| e.with_port(&name)),
                None => Err(SerialError::not_connected("Port not open").with_port(&name)),
            }
        })
        .await
        .map_err(|e| SerialError::transport(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait::async_trait]
impl SerialTransport for SystemTransport {
    async fn open(&self, config: &SerialConfig) -> SerialResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Err(SerialError::transport("Port already open").with_port(&self.name));
        }
        let name = self.name.clone();
        let baud = config.baud_rate;
        let timeout = config.read_timeout();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(timeout)
                .open()
        })
        .await
        .map_err(|e| SerialError::transport(format!("blocking task failed: {}", e)))?
        .map_err(|e| SerialError::from(e).with_port(&self.name))?;

        let mut slot = self
            .port
            .lock()
            .map_err(|_| SerialError::transport("port lock poisoned").with_port(&self.name))?;
        *slot = Some(port);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> SerialResult<()> {
        let mut slot = self
            .port
            .lock()
            .map_err(|_| SerialError::transport("port lock poisoned").with_port(&self.name))?;
        slot.take();
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize> {
        let len = buf.len();
        let data = self
            .with_port(move |port| {
                let mut tmp = vec![0u8; len];
                match port.read(&mut tmp) {
                    Ok(n) => {
                        tmp.truncate(n);
                        Ok(tmp)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn write(&self, buf: &[u8]) -> SerialResult<usize> {
        let data = buf.to_vec();
        self.with_port(move |port| {
            port.write_all(&data)?;
            port.flush()?;
            Ok(data.len())
        })
        .await
    }

    async fn bytes_available(&self) -> SerialResult<usize> {
        self.with_port(|port| Ok(port.bytes_to_read()? as usize))
            .await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport (for testing & offline use)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully in-memory modem.
///
/// Replies queued with [`SimulatedTransport::script_reply`] are delivered
/// one per `write` call, in order, which models the command-then-response
/// rhythm of the real device.
pub struct SimulatedTransport {
    name: String,
    open: AtomicBool,
    rx_buf: Mutex<VecDeque<u8>>,
    tx_buf: Mutex<VecDeque<u8>>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    rx_notify: Notify,
    fail_open: AtomicBool,
    fail_write: AtomicBool,
    open_count: std::sync::atomic::AtomicUsize,
}

impl SimulatedTransport {
    /// Create a new simulated transport for the given port name.
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: port_name.into(),
            open: AtomicBool::new(false),
            rx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            tx_buf: Mutex::new(VecDeque::with_capacity(4096)),
            replies: Mutex::new(VecDeque::new()),
            rx_notify: Notify::new(),
            fail_open: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            open_count: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Make every subsequent `open` fail, as a busy or vanished port would.
    pub fn set_fail_open(&self, enabled: bool) {
        self.fail_open.store(enabled, Ordering::SeqCst);
    }

    /// Make every subsequent `write` fail.
    pub fn set_fail_write(&self, enabled: bool) {
        self.fail_write.store(enabled, Ordering::SeqCst);
    }

    /// Queue a reply to be delivered after the next unanswered write.
    pub async fn script_reply(&self, data: &[u8]) {
        self.replies.lock().await.push_back(data.to_vec());
    }

    /// Inject bytes into the receive buffer (simulate incoming data).
    pub async fn inject_rx(&self, data: &[u8]) {
        let mut buf = self.rx_buf.lock().await;
        buf.extend(data);
        self.rx_notify.notify_waiters();
    }

    /// Drain all bytes from the transmit buffer (for test assertions).
    pub async fn drain_tx(&self) -> Vec<u8> {
        let mut buf = self.tx_buf.lock().await;
        buf.drain(..).collect()
    }

    /// How many times the port has been opened.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SerialTransport for SimulatedTransport {
    async fn open(&self, _config: &SerialConfig) -> SerialResult<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SerialError::transport("Access denied").with_port(&self.name));
        }
        if self.open.load(Ordering::SeqCst) {
            return Err(SerialError::transport("Port already open").with_port(&self.name));
        }
        self.open.store(true, Ordering::SeqCst);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> SerialResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> SerialResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SerialError::not_connected("Port not open").with_port(&self.name));
        }
        let mut rx = self.rx_buf.lock().await;
        if rx.is_empty() {
            drop(rx);
            // Wait for data with a short timeout
            tokio::select! {
                _ = self.rx_notify.notified() => {},
                _ = tokio::time::sleep(Duration::from_millis(50)) => {},
            }
            rx = self.rx_buf.lock().await;
        }
        let count = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    async fn write(&self, buf: &[u8]) -> SerialResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SerialError::not_connected("Port not open").with_port(&self.name));
        }
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(SerialError::transport("Write failed").with_port(&self.name));
        }
        self.tx_buf.lock().await.extend(buf);

        let reply = self.replies.lock().await.pop_front();
        if let Some(reply) = reply {
            self.inject_rx(&reply).await;
        }
        Ok(buf.len())
    }

    async fn bytes_available(&self) -> SerialResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SerialError::not_connected("Port not open").with_port(&self.name));
        }
        Ok(self.rx_buf.lock().await.len())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
