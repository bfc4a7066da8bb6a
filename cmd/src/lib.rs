mod powershell;

pub use crate::powershell::{ErrorCategory, PowerShell, PowerShellError, quote};

use std::{
    ffi::OsStr,
    fmt::{self, Display},
    process::{Output, Stdio},
};
use thiserror::Error;
use tokio::process::Command as BaseCommand;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {error}")]
    Spawn {
        program: String,
        #[source]
        error: tokio::io::Error,
    },
}

/// A child process whose output is captured, never inherited.
#[derive(Debug)]
pub struct Command {
    cmd: BaseCommand,
}

impl Display for Command {
    /// Program and arguments, with any argument containing whitespace elided.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmd = self.cmd.as_std();
        write!(f, "{}", cmd.get_program().to_string_lossy())?;
        for arg in cmd.get_args() {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " <{} chars>", arg.chars().count())?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    /// Run to completion. A non-zero exit status is not an error here.
    pub async fn output(&mut self) -> Result<Output, CommandError> {
        self.cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| CommandError::Spawn {
                program: self.cmd.as_std().get_program().to_string_lossy().into_owned(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_program_and_flags() {
        let mut command = Command::new("pwsh");
        command.arg("-NoProfile").arg("-NonInteractive");
        assert_eq!(command.to_string(), "pwsh -NoProfile -NonInteractive");
    }

    #[test]
    fn elides_script_arguments() {
        let mut command = Command::new("pwsh");
        command.arg("-Command").arg("Get-VM -Name 'web01'");
        assert_eq!(command.to_string(), "pwsh -Command <20 chars>");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let error = Command::new("berth-test-no-such-program")
            .output()
            .await
            .unwrap_err();
        assert!(matches!(error, CommandError::Spawn { ref program, .. } if program == "berth-test-no-such-program"));
    }
}
