//! # modemctl – Serial modem session engine
//!
//! Drives a cellular modem over a serial port:
//!
//! - **Port Discovery** – enumerate serial ports, filter by platform, and
//!   probe each candidate with `AT` until one answers `OK`
//! - **Transport** – async read/write over a real or simulated serial port
//! - **AT Commands** – single-command dispatch with response matching
//! - **File Protocols** – `AT+QFUPL` upload with size verification and
//!   `AT+QFDEL` deletion
//! - **Sessions** – run an ordered command list and report each outcome
//! - **Transcript** – timestamped command/response log on disk

pub mod serial;
