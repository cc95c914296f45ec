//! One module per subcommand. Each returns a [`Report`]; `main` prints it and maps it
//! to the process exit code.

#[cfg(feature = "nmap")]
pub mod nmap_targets;
#[cfg(feature = "sync")]
pub mod scan_speed;
#[cfg(feature = "sync")]
pub mod scanner_sync;
#[cfg(feature = "nmap")]
pub mod set_internet;
#[cfg(feature = "subs")]
pub mod subdomains;

use serde::Serialize;
use serde_json::Value;

/// What a command hands back to `main`: the stdout payload and the exit status.
#[derive(Debug, Clone)]
pub struct Report {
    pub exit_code: u8,
    pub summary: Value,
    /// Plain-text stdout in place of the JSON summary.
    pub text: Option<String>,
}

impl Report {
    /// `ok` decides the exit status; the summary is expected to carry its own `ok` field.
    pub fn from_summary<S: Serialize>(ok: bool, summary: &S) -> anyhow::Result<Report> {
        Ok(Report { exit_code: if ok { 0 } else { 1 }, summary: serde_json::to_value(summary)?, text: None })
    }

    /// The catch-all failure shape for errors no command handled itself.
    pub fn unexpected(err: &anyhow::Error) -> Report {
        Report {
            exit_code: 1,
            summary: serde_json::json!({ "ok": false, "error": "unexpected_error", "details": format!("{err:#}") }),
            text: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout(&self) -> anyhow::Result<String> {
        match &self.text {
            Some(t) => Ok(t.clone()),
            None => Ok(serde_json::to_string(&self.summary)?),
        }
    }
}
