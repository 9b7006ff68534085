//! Request types describing one reconciliation run.
//!
//! A [`ReconciliationRequest`] is the sole input the reconciler operates on
//! and is immutable for the duration of a run.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{CertBindError, Result};

/// Default HTTPS port when unspecified.
pub const DEFAULT_PORT: u16 = 443;

/// Default bind address: all interfaces.
pub const DEFAULT_IP: &str = "*";

/// Default IIS site name.
pub const DEFAULT_SITE: &str = "Default Web Site";

/// Where the replacement certificate comes from.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    /// Import the PFX at `path` using `password`.
    Pfx {
        /// Path to the PKCS#12 file.
        path: PathBuf,
        /// Password protecting the file. May contain special characters;
        /// it is passed through verbatim.
        password: String,
    },
    /// Removal request: no import, tear down the binding and delete the
    /// matching certificate.
    Remove,
}

impl CertificateSource {
    /// True if this is a removal request.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Remove)
    }
}

/// The network endpoint of an HTTPS binding: (ip, port, optional host
/// header).
///
/// Host-header absence is represented as `None` and is distinct from an
/// empty host header; the two select different binding code paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BindingEndpoint {
    /// Bind address, or `*` for all interfaces.
    pub ip: String,
    /// TCP port.
    pub port: u16,
    /// Host header, if the binding is host-name qualified.
    pub host_header: Option<String>,
}

impl BindingEndpoint {
    /// Endpoint at the given address and port with no host header.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            host_header: None,
        }
    }

    /// Attach a host header.
    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        self.host_header = Some(host.into());
        self
    }

    /// Render as the `ip:port:host` binding information string used by the
    /// web-server configuration.
    pub fn binding_information(&self) -> String {
        format!(
            "{}:{}:{}",
            self.ip,
            self.port,
            self.host_header.as_deref().unwrap_or("")
        )
    }
}

impl Default for BindingEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_IP, DEFAULT_PORT)
    }
}

impl std::fmt::Display for BindingEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host_header {
            Some(host) => write!(f, "{}:{} (host {})", self.ip, self.port, host),
            None => write!(f, "{}:{}", self.ip, self.port),
        }
    }
}

/// A logical HTTPS binding slot on a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSpec {
    /// The web site to bind.
    pub site_name: String,
    /// The network endpoint.
    pub endpoint: BindingEndpoint,
    /// Require Server Name Indication on the binding.
    pub sni: bool,
}

impl BindingSpec {
    /// Binding spec for the given site at the default endpoint (`*:443`).
    pub fn new(site_name: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            endpoint: BindingEndpoint::default(),
            sni: false,
        }
    }

    /// Replace the endpoint.
    pub fn with_endpoint(mut self, endpoint: BindingEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Enable or disable SNI.
    pub fn with_sni(mut self, sni: bool) -> Self {
        self.sni = sni;
        self
    }
}

impl Default for BindingSpec {
    fn default() -> Self {
        Self::new(DEFAULT_SITE)
    }
}

/// Everything one reconciliation run operates on.
#[derive(Debug, Clone)]
pub struct ReconciliationRequest {
    /// Certificate source: a PFX to import, or a removal request.
    pub source: CertificateSource,
    /// Subject prefix identifying the target certificate in the store.
    pub subject_match: String,
    /// The binding slot to reconcile.
    pub binding: BindingSpec,
    /// Filter out the machine's own identity certificate when matching by
    /// subject. Defaults to true; prevents a self-signed machine
    /// certificate from being mistaken for the target when wildcard-style
    /// subject prefixes are used.
    pub exclude_local_machine_cert: bool,
}

impl ReconciliationRequest {
    /// Build an install/update request.
    pub fn install(
        pfx_path: impl Into<PathBuf>,
        password: impl Into<String>,
        subject_match: impl Into<String>,
        binding: BindingSpec,
    ) -> Self {
        Self {
            source: CertificateSource::Pfx {
                path: pfx_path.into(),
                password: password.into(),
            },
            subject_match: subject_match.into(),
            binding,
            exclude_local_machine_cert: true,
        }
    }

    /// Build a removal request.
    pub fn removal(subject_match: impl Into<String>, binding: BindingSpec) -> Self {
        Self {
            source: CertificateSource::Remove,
            subject_match: subject_match.into(),
            binding,
            exclude_local_machine_cert: true,
        }
    }

    /// Disable the local-machine-certificate exclusion filter.
    pub fn include_local_machine_cert(mut self) -> Self {
        self.exclude_local_machine_cert = false;
        self
    }

    /// Validate the request before running.
    pub fn validate(&self) -> Result<()> {
        if self.subject_match.trim().is_empty() {
            return Err(CertBindError::config("subject match must not be empty"));
        }
        if self.binding.site_name.trim().is_empty() {
            return Err(CertBindError::config("site name must not be empty"));
        }
        if self.binding.endpoint.ip.trim().is_empty() {
            return Err(CertBindError::config("bind address must not be empty"));
        }
        if let CertificateSource::Pfx { path, .. } = &self.source {
            if path.as_os_str().is_empty() {
                return Err(CertBindError::config("PFX path must not be empty"));
            }
        }
        Ok(())
    }
}
