//! Error types for certificate and binding reconciliation.
//!
//! Each variant corresponds to one failure class the reconciler can record.
//! Failures are caught at step boundaries and written to the run report;
//! they never abort the whole run except where a later step's precondition
//! was left unsatisfied.

use thiserror::Error;

/// Result type alias using [`CertBindError`].
pub type Result<T> = std::result::Result<T, CertBindError>;

/// Errors that can occur during a reconciliation run.
#[derive(Debug, Error)]
pub enum CertBindError {
    /// The web-server administration tooling is unavailable.
    ///
    /// The run continues in degraded mode; binding steps will fail
    /// individually and be recorded.
    #[error("Administration tooling unavailable: {0}")]
    ModuleLoad(String),

    /// PFX import into the certificate store failed (bad password,
    /// malformed file, permission denied).
    #[error("Certificate import failed: {0}")]
    Import(String),

    /// Removing a site binding or SSL association failed.
    #[error("Binding removal failed: {0}")]
    BindingRemoval(String),

    /// Creating a site binding or SSL association failed.
    #[error("Binding creation failed: {0}")]
    BindingCreation(String),

    /// Deleting a certificate from the store failed.
    #[error("Certificate deletion failed: {0}")]
    Delete(String),

    /// A certificate store query failed.
    #[error("Certificate store error: {0}")]
    Store(String),

    /// Platform-level failure (Windows API error, unsupported OS).
    #[error("Platform error: {0}")]
    Platform(String),

    /// Invalid configuration or request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CertBindError {
    /// Create a module-load error with the given message.
    pub fn module_load(msg: impl Into<String>) -> Self {
        Self::ModuleLoad(msg.into())
    }

    /// Create an import error with the given message.
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// Create a binding-removal error with the given message.
    pub fn binding_removal(msg: impl Into<String>) -> Self {
        Self::BindingRemoval(msg.into())
    }

    /// Create a binding-creation error with the given message.
    pub fn binding_creation(msg: impl Into<String>) -> Self {
        Self::BindingCreation(msg.into())
    }

    /// Create a deletion error with the given message.
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::Delete(msg.into())
    }

    /// Create a store error with the given message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a platform error with the given message.
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CertBindError::import("bad password");
        assert_eq!(err.to_string(), "Certificate import failed: bad password");

        let err = CertBindError::module_load("appcmd.exe not found");
        assert_eq!(
            err.to_string(),
            "Administration tooling unavailable: appcmd.exe not found"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CertBindError = io.into();
        assert!(matches!(err, CertBindError::Io(_)));
    }
}
