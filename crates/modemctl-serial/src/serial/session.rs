//! Session runner.
//!
//! Walks the command list in order, routes each entry to the dispatcher or
//! one of the file protocols, reports a status row per step, and collects
//! the outcomes into a [`SessionReport`].

use crate::serial::modem::{ModemController, ParsedCommand};
use crate::serial::protocols::{self, DeleteOutcome, UploadOutcome, UploadPhase};
use crate::serial::types::*;
use modemctl_core::{Severity, StatusRow, StatusSink};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Succeeded,
    /// Nothing was done but nothing went wrong either (delete of a
    /// missing file).
    Benign,
    Failed,
    /// Not attempted because an earlier step failed under
    /// [`FailurePolicy::StopOnError`].
    Skipped,
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub command: String,
    pub status: StepStatus,
    /// The text shown next to the command in the status table.
    pub detail: String,
}

impl StepOutcome {
    fn new(command: &str, status: StepStatus, detail: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// Aggregate result of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub port_name: String,
    pub outcomes: Vec<StepOutcome>,
}

impl SessionReport {
    fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Steps that succeeded, benign deletes included.
    pub fn succeeded(&self) -> usize {
        self.count(StepStatus::Succeeded) + self.count(StepStatus::Benign)
    }

    pub fn failed(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    /// One-row summary for the status table.
    pub fn summary_row(&self) -> StatusRow {
        let detail = format!(
            "{} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
        let message = format!("Session on {}", self.port_name);
        if self.is_success() {
            StatusRow::pass(message, detail)
        } else {
            StatusRow::fail(message, detail)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives one command list over an open modem connection.
pub struct SessionRunner<'a> {
    modem: &'a ModemController,
    status: &'a dyn StatusSink,
    file_root: PathBuf,
    policy: FailurePolicy,
}

impl<'a> SessionRunner<'a> {
    pub fn new(modem: &'a ModemController, status: &'a dyn StatusSink, config: &SessionConfig) -> Self {
        Self {
            modem,
            status,
            file_root: config.file_root.clone(),
            policy: config.failure_policy,
        }
    }

    /// Run every command in order.
    ///
    /// Per-command failures become outcomes.  A transport failure leaves
    /// the connection unusable and aborts the run with `Err`; the caller
    /// still owns the transport and closes it.
    pub async fn run(&self, commands: &[CommandDescriptor]) -> SerialResult<SessionReport> {
        let mut report = SessionReport {
            port_name: self.modem.port_name().to_string(),
            outcomes: Vec::with_capacity(commands.len()),
        };

        let mut stopped = false;
        for descriptor in commands {
            if stopped {
                report.outcomes.push(StepOutcome::new(
                    &descriptor.command,
                    StepStatus::Skipped,
                    "skipped after earlier failure",
                ));
                continue;
            }

            let outcome = match self.run_step(descriptor).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = e.with_port(self.modem.port_name());
                    log::error!("[session:{}] aborting: {}", self.modem.port_name(), e);
                    self.status
                        .report(StatusRow::fail(descriptor.command.clone(), e.message.clone()));
                    return Err(e);
                }
            };

            if outcome.status == StepStatus::Failed && self.policy == FailurePolicy::StopOnError {
                log::warn!(
                    "[session:{}] stopping after failed step: {}",
                    self.modem.port_name(),
                    descriptor.command
                );
                stopped = true;
            }
            report.outcomes.push(outcome);
        }

        log::info!(
            "[session:{}] done: {} succeeded, {} failed, {} skipped",
            report.port_name,
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Execute one command.  `Err` only for errors fatal to the session.
    async fn run_step(&self, descriptor: &CommandDescriptor) -> SerialResult<StepOutcome> {
        let command = descriptor.command.trim();
        match ParsedCommand::parse(command) {
            ParsedCommand::Plain => {
                let trimmed = CommandDescriptor::new(command, descriptor.expected_response.as_str());
                let result = self.modem.execute(&trimmed).await?;
                let (status, severity) = if result.matched {
                    (StepStatus::Succeeded, Severity::Pass)
                } else {
                    (StepStatus::Failed, Severity::Fail)
                };
                Ok(self.emit(command, command, status, severity, result.raw_response))
            }
            ParsedCommand::Malformed { reason } => {
                log::error!("[session:{}] {}: {}", self.modem.port_name(), reason, command);
                Ok(self.emit(command, command, StepStatus::Failed, Severity::Fail, reason))
            }
            ParsedCommand::Upload { filename } => self.upload_step(command, &filename).await,
            ParsedCommand::Delete { .. } => {
                let (status, severity, detail) =
                    match protocols::delete_file(self.modem, command).await? {
                        DeleteOutcome::Deleted => (
                            StepStatus::Succeeded,
                            Severity::Pass,
                            "File deleted successfully".to_string(),
                        ),
                        DeleteOutcome::NotFound => {
                            (StepStatus::Benign, Severity::Warn, "File not found".to_string())
                        }
                        DeleteOutcome::OtherError { raw_response } => {
                            (StepStatus::Failed, Severity::Fail, raw_response)
                        }
                    };
                Ok(self.emit(command, command, status, severity, detail))
            }
        }
    }

    async fn upload_step(&self, command: &str, filename: &str) -> SerialResult<StepOutcome> {
        let outcome = match protocols::upload_file(self.modem, &self.file_root, filename).await {
            Ok(outcome) => outcome,
            Err(e) if e.kind == SerialErrorKind::FileNotFound => {
                log::error!("[session:{}] {}", self.modem.port_name(), e.message);
                return Ok(self.emit(
                    command,
                    filename,
                    StepStatus::Failed,
                    Severity::Fail,
                    "File not found",
                ));
            }
            Err(e) => return Err(e),
        };

        let (status, severity, detail) = match outcome {
            UploadOutcome::Verified { .. } => (
                StepStatus::Succeeded,
                Severity::Pass,
                "File upload successful".to_string(),
            ),
            UploadOutcome::SizeMismatch { expected, actual } => (
                StepStatus::Failed,
                Severity::Fail,
                format!("File size mismatch: expected {}, got {}", expected, actual),
            ),
            UploadOutcome::ProtocolError {
                phase: UploadPhase::HandshakeWait,
                raw_response,
                ..
            } => (StepStatus::Failed, Severity::Fail, raw_response),
            UploadOutcome::ProtocolError { raw_response, .. } => (
                StepStatus::Failed,
                Severity::Fail,
                format!("Invalid modem response: {}", raw_response),
            ),
        };
        Ok(self.emit(command, filename, status, severity, detail))
    }

    /// Report a status row (`label`, `detail`) and build the outcome for
    /// `command`.
    fn emit(
        &self,
        command: &str,
        label: &str,
        status: StepStatus,
        severity: Severity,
        detail: impl Into<String>,
    ) -> StepOutcome {
        let detail = detail.into();
        self.status
            .report(StatusRow::new(label.to_string(), detail.clone(), severity));
        StepOutcome::new(command, status, detail)
    }
}
