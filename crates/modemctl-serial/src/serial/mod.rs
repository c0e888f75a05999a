//! Modem session engine: sub-modules.

pub mod types;
pub mod transport;
pub mod port_scanner;
pub mod modem;
pub mod protocols;
pub mod logging;
pub mod script;
pub mod session;
pub mod service;

// Re-export top-level items for convenience.
pub use types::*;
pub use service::{ModemService, ModemServiceState};
