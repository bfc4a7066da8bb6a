use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{Command, CommandError};

const CATEGORY_MARKER: &str = "berth-error-category=";

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The addressed object does not exist.
    NotFound,
    /// The server could not be reached or refused the session.
    Unavailable,
    Other,
}

impl ErrorCategory {
    fn from_powershell(category: &str) -> Self {
        match category {
            "ObjectNotFound" => ErrorCategory::NotFound,
            "ConnectionError" | "ResourceUnavailable" | "OpenError" => ErrorCategory::Unavailable,
            _ => ErrorCategory::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum PowerShellError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("powershell script failed ({category:?}): {message}")]
    Failed {
        category: ErrorCategory,
        message: String,
    },

    #[error("failed to decode powershell output `{output}`: {source}")]
    Json {
        output: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PowerShellError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PowerShellError::Failed { category, .. } => *category,
            PowerShellError::Command(CommandError::Spawn { .. }) => ErrorCategory::Unavailable,
            _ => ErrorCategory::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    pub fn is_unavailable(&self) -> bool {
        self.category() == ErrorCategory::Unavailable
    }
}

/// Quote a value as a single-quoted PowerShell string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A PowerShell script run non-interactively with terminating errors.
///
/// The script body is wrapped so that any terminating error writes its
/// category to stderr, which is how failures get an [`ErrorCategory`].
#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
    lines: Vec<String>,
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            lines: Vec::new(),
        }
    }

    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    /// Throw an `ObjectNotFound` error unless `condition` holds.
    pub fn require(&mut self, condition: &str, message: &str) -> &mut Self {
        self.line(format!(
            "if (-not ({condition})) {{ throw [System.Management.Automation.ItemNotFoundException]::new({}) }}",
            quote(message)
        ))
    }

    /// Bind `$variable` to the output of `command`, collecting its errors.
    ///
    /// Only errors whose `"<category> <error id> <message>"` matches the
    /// `missing` pattern leave `$variable` empty. Anything else is rethrown.
    pub fn lookup(&mut self, variable: &str, command: &str, missing: &str) -> &mut Self {
        self.line(format!(
            "${variable} = {command} -ErrorVariable lookupErrors -ErrorAction SilentlyContinue"
        ))
        .line(format!(
            "foreach ($e in $lookupErrors) {{ if (\"$($e.CategoryInfo.Category) $($e.FullyQualifiedErrorId) $($e.Exception.Message)\" -notmatch {}) {{ throw $e }} }}",
            quote(missing)
        ))
    }

    pub fn body(&self) -> String {
        self.lines.join("\n")
    }

    pub fn script(&self) -> String {
        format!(
            "$ErrorActionPreference = 'Stop'\n$ProgressPreference = 'SilentlyContinue'\ntry {{\n{}\n}} catch {{\n[Console]::Error.WriteLine('{CATEGORY_MARKER}' + $_.CategoryInfo.Category)\n[Console]::Error.WriteLine($_.Exception.Message)\nexit 1\n}}",
            self.body()
        )
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(self.script());
        command
    }

    /// Run the script and return its standard output.
    pub async fn run(&self) -> Result<String, PowerShellError> {
        trace!(script = %self.body(), "Running powershell script");
        let output = self.command().output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let error = parse_failure(&stderr);
        debug!(%error, "Powershell script failed");
        Err(error)
    }

    /// Run the script and decode its output as JSON.
    pub async fn run_json<T: DeserializeOwned>(&self) -> Result<T, PowerShellError> {
        let output = self.run().await?;
        decode_json(&output)
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(output: &str) -> Result<T, PowerShellError> {
    serde_json::from_str(output).map_err(|source| PowerShellError::Json {
        output: output.to_owned(),
        source,
    })
}

pub(crate) fn parse_failure(stderr: &str) -> PowerShellError {
    let mut category = ErrorCategory::Other;
    let mut message = Vec::new();
    for line in stderr.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix(CATEGORY_MARKER) {
            category = ErrorCategory::from_powershell(name.trim());
        } else if !line.is_empty() {
            message.push(line);
        }
    }
    PowerShellError::Failed {
        category,
        message: message.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn quotes_embedded_apostrophes() {
        assert_eq!(quote("web01"), "'web01'");
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn wraps_body_in_try_catch() {
        let mut ps = PowerShell::new("pwsh");
        ps.line("Get-VM -Name 'web01'");
        let script = ps.script();
        assert!(script.starts_with("$ErrorActionPreference = 'Stop'"));
        assert!(script.contains("try {\nGet-VM -Name 'web01'\n} catch {"));
        assert!(script.contains(CATEGORY_MARKER));
    }

    #[test]
    fn require_throws_item_not_found() {
        let mut ps = PowerShell::new("pwsh");
        ps.require("$vm", "no vm named 'x'");
        assert_eq!(
            ps.body(),
            "if (-not ($vm)) { throw [System.Management.Automation.ItemNotFoundException]::new('no vm named ''x''') }"
        );
    }

    #[test]
    fn lookup_rethrows_unexpected_errors() {
        let mut ps = PowerShell::new("pwsh");
        ps.lookup("vm", "Get-VM -Name 'web01'", "unable to find");
        let lines: Vec<_> = ps.body().lines().map(str::to_owned).collect();
        assert_eq!(
            lines,
            vec![
                "$vm = Get-VM -Name 'web01' -ErrorVariable lookupErrors -ErrorAction SilentlyContinue",
                r#"foreach ($e in $lookupErrors) { if ("$($e.CategoryInfo.Category) $($e.FullyQualifiedErrorId) $($e.Exception.Message)" -notmatch 'unable to find') { throw $e } }"#,
            ]
        );
    }

    #[test]
    fn classifies_failures() {
        let not_found = parse_failure("berth-error-category=ObjectNotFound\nno such vm\n");
        assert!(not_found.is_not_found());
        assert_eq!(not_found.to_string(), "powershell script failed (NotFound): no such vm");

        let unavailable = parse_failure("berth-error-category=ConnectionError\nWinRM refused");
        assert!(unavailable.is_unavailable());

        let other = parse_failure("berth-error-category=PermissionDenied\naccess denied");
        assert_eq!(other.category(), ErrorCategory::Other);

        let unmarked = parse_failure("something exploded");
        assert_eq!(unmarked.category(), ErrorCategory::Other);
    }

    #[test]
    fn decodes_json_output() {
        #[derive(Deserialize)]
        struct Vm {
            #[serde(rename = "Name")]
            name: String,
        }
        let vm: Vm = decode_json(r#"{"Name":"web01"}"#).unwrap();
        assert_eq!(vm.name, "web01");
        assert!(matches!(
            decode_json::<Vm>("not json"),
            Err(PowerShellError::Json { .. })
        ));
    }
}
