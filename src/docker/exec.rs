// Exec results and output sanitizing

use crate::errors::{DyError, Result};

/// Raw result of running a command in a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the engine could not report how the command ended
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn combined(&self) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        combined.extend_from_slice(&self.stdout);
        combined.extend_from_slice(&self.stderr);
        combined
    }
}

/// Outcome of `StartedContainer::exec`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub command: Vec<String>,
    pub output: String,
    pub exit_code: i64,
}

impl ExecResult {
    pub(crate) fn from_output(command: &[String], output: ExecOutput, raw: bool) -> Result<Self> {
        let exit_code = output.exit_code.ok_or(DyError::ExitCodeUnavailable)?;
        let bytes = output.combined();
        let output = if raw {
            lossy_utf8(&bytes)
        } else {
            sanitize_output(&bytes)
        };

        Ok(Self {
            command: command.to_vec(),
            output,
            exit_code,
        })
    }

    pub fn successful(&self) -> bool {
        self.exit_code == 0
    }
}

/// Decode bytes as UTF-8, replacing invalid sequences
pub fn lossy_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decode bytes for human consumption: invalid UTF-8 is replaced and control
/// characters other than newline and tab are dropped.
pub fn sanitize_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}
