//! Command source: the ordered command list a session runs.
//!
//! ```json
//! { "commands": [ { "command": "AT+CFUN?", "expected_response": "+CFUN: 1" } ] }
//! ```

use crate::serial::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An ordered list of commands loaded from a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandScript {
    pub commands: Vec<CommandDescriptor>,
}

#[derive(Deserialize)]
struct RawScript {
    commands: Option<Vec<CommandDescriptor>>,
}

impl CommandScript {
    /// Parse a command document.  A missing `commands` key and an empty
    /// list are both configuration errors.
    pub fn from_json_str(text: &str) -> SerialResult<Self> {
        let raw: RawScript = serde_json::from_str(text)?;
        let commands = raw
            .commands
            .ok_or_else(|| SerialError::configuration("No 'commands' key in command file."))?;
        if commands.is_empty() {
            return Err(SerialError::configuration("No commands found in command file."));
        }
        Ok(Self { commands })
    }

    /// Read and parse a command file.
    pub fn load(path: &Path) -> SerialResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SerialError::configuration(format!(
                "Failed to read command file {}: {}",
                path.display(),
                e
            ))
        })?;
        let script = Self::from_json_str(&text).map_err(|e| {
            SerialError::configuration(format!("{}: {}", path.display(), e.message))
        })?;
        log::info!(
            "[script] loaded {} command(s) from {}",
            script.commands.len(),
            path.display()
        );
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
