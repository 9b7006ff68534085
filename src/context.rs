//! Deployment context injected into the reconciler.
//!
//! The reconciler never reads ambient global state. Everything it needs
//! from the environment — the machine's own name (for the local-certificate
//! exclusion filter) and the transcript log directory — is gathered here
//! once and passed in explicitly, so tests can substitute fixed values.

use std::env;
use std::path::PathBuf;

/// Task-sequence environment variable naming the log directory.
///
/// Set by the deployment task-sequence engine when the tool runs inside an
/// OS deployment; absent in interactive runs.
pub const TS_LOG_PATH_VAR: &str = "_SMSTSLogPath";

/// Ambient values the reconciler depends on.
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// The local machine's name, used to recognize the machine's own
    /// identity certificate during subject matching.
    pub machine_name: String,
    /// Directory the transcript log is written to.
    pub log_dir: PathBuf,
}

impl DeployContext {
    /// Build a context with fixed values.
    pub fn new(machine_name: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            machine_name: machine_name.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Probe the process environment.
    ///
    /// The log directory is the task-sequence log path when the tool runs
    /// from a deployment task sequence, otherwise the OS temp directory.
    pub fn from_environment() -> Self {
        let log_dir = env::var_os(TS_LOG_PATH_VAR)
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(env::temp_dir);

        Self {
            machine_name: crate::windows::identity::machine_name(),
            log_dir,
        }
    }

    /// True if `subject` names this machine's own identity certificate.
    ///
    /// Matches the bare machine name or its `CN=` form, case-insensitively,
    /// which is how the self-signed machine certificate is issued.
    pub fn is_local_machine_subject(&self, subject: &str) -> bool {
        if self.machine_name.is_empty() {
            return false;
        }
        subject.eq_ignore_ascii_case(&self.machine_name)
            || subject.eq_ignore_ascii_case(&format!("CN={}", self.machine_name))
    }
}
