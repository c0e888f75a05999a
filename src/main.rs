//! modemctl
//!
//! Finds a cellular modem on the serial bus and runs a command file
//! against it.
//!
//! - Probes candidate ports with `AT` until one answers `OK`
//! - Sends each command from the command file and checks its response
//! - Uploads files from the file root with `AT+QFUPL`, verifying the size
//! - Deletes modem files with `AT+QFDEL`, treating "not found" as benign
//! - Appends every exchange to `modem_log.txt` in the log directory

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use modemctl_core::{render_grid, ConsoleStatusSink, StatusRow, StatusSink};
use modemctl_serial::serial::logging::{NullTranscript, TranscriptSink, TranscriptWriter};
use modemctl_serial::serial::port_scanner::{PortBackend, SystemPortBackend};
use modemctl_serial::serial::script::CommandScript;
use modemctl_serial::serial::{FailurePolicy, ModemService, SessionConfig};
use tracing_subscriber::EnvFilter;

/// Cellular modem provisioning over a serial port.
#[derive(Parser, Debug)]
#[command(name = "modemctl", about = "Run an AT command file against a serial modem")]
struct Cli {
    /// JSON command file (`{"commands": [...]}`).
    #[arg(long, default_value = "commands.json")]
    commands: PathBuf,

    /// Directory upload filenames are resolved against.
    #[arg(long, default_value = "../serts")]
    file_root: PathBuf,

    /// Directory for the session transcript.
    #[arg(long, default_value = "../logs")]
    log_dir: PathBuf,

    /// Use this port instead of probing for the modem.
    #[arg(long)]
    port: Option<String>,

    /// Stop at the first failed command and skip the rest.
    #[arg(long, default_value_t = false)]
    stop_on_error: bool,

    /// Print the serial ports present and exit.
    #[arg(long, default_value_t = false)]
    list_ports: bool,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn list_ports(backend: &dyn PortBackend) -> anyhow::Result<ExitCode> {
    let ports = backend.available_ports().await?;
    let rows: Vec<StatusRow> = ports
        .iter()
        .map(|p| {
            StatusRow::info(
                p.port_name.clone(),
                format!("{} ({})", p.description, p.port_type.label()),
            )
        })
        .collect();
    if rows.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("{}", render_grid(&[("Port", "Description")], &rows));
    }
    Ok(ExitCode::SUCCESS)
}

fn open_transcript(cli: &Cli) -> Arc<dyn TranscriptSink> {
    match TranscriptWriter::in_dir(&cli.log_dir) {
        Ok(writer) => {
            tracing::info!(path = %writer.path().display(), "writing transcript");
            Arc::new(writer)
        }
        Err(e) => {
            tracing::warn!(
                log_dir = %cli.log_dir.display(),
                error = %e,
                "cannot create log directory, transcript disabled"
            );
            Arc::new(NullTranscript)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let backend = Arc::new(SystemPortBackend::new());
    if cli.list_ports {
        return list_ports(backend.as_ref()).await;
    }

    let status: Arc<dyn StatusSink> = Arc::new(ConsoleStatusSink::new());

    // Configuration problems abort before the device is touched.
    let script = match CommandScript::load(&cli.commands) {
        Ok(script) => script,
        Err(e) => {
            tracing::error!(error = %e, "cannot load command file");
            status.report(StatusRow::fail("Configuration error", e.message));
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = SessionConfig {
        file_root: cli.file_root.clone(),
        failure_policy: if cli.stop_on_error {
            FailurePolicy::StopOnError
        } else {
            FailurePolicy::Continue
        },
        ..SessionConfig::default()
    };
    tracing::info!(
        commands = script.len(),
        file_root = %config.file_root.display(),
        policy = ?config.failure_policy,
        "modemctl starting"
    );

    let service = ModemService::new(backend, status.clone(), open_transcript(&cli), config);
    match service.execute(&script.commands, cli.port.as_deref()).await {
        Ok(Some(report)) if report.is_success() => Ok(ExitCode::SUCCESS),
        Ok(Some(_)) => Ok(ExitCode::FAILURE),
        // Discovery already reported why.
        Ok(None) => Ok(ExitCode::FAILURE),
        Err(e) => {
            tracing::error!(error = %e, "session aborted");
            status.report(StatusRow::fail("Session aborted", e.to_string()));
            Ok(ExitCode::FAILURE)
        }
    }
}
