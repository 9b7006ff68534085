//! Store abstractions for the reconciler.
//!
//! Two narrow interfaces separate the reconciliation logic from the OS:
//!
//! - [`CertificateStore`]: the machine certificate store (enumerate by
//!   subject, import a PFX, delete by thumbprint).
//! - [`BindingStore`]: the web-server configuration store (site-level HTTPS
//!   bindings plus the low-level SSL-to-certificate associations, which are
//!   tracked independently of the site binding object).
//!
//! Real backends live in [`crate::windows`]; in-memory fakes for tests live
//! in [`crate::memory`].

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::request::{BindingEndpoint, BindingSpec};

/// A certificate as recorded in the certificate store.
///
/// The reconciler only reads these and deletes them by thumbprint; it never
/// inspects certificate contents beyond the subject string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRecord {
    /// Hash-based unique identifier for the record, hex-encoded.
    pub thumbprint: String,
    /// Subject distinguished name (e.g., "CN=example.com, O=Example").
    pub subject: String,
    /// Validity start (NotBefore), as the store reports it.
    pub not_before: String,
    /// Validity end (NotAfter), as the store reports it.
    pub not_after: String,
    /// Whether the private key was imported as exportable.
    pub exportable: bool,
}

/// A site-level HTTPS binding slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteBinding {
    /// The web site the binding belongs to.
    pub site_name: String,
    /// The network endpoint of the binding.
    pub endpoint: BindingEndpoint,
    /// Whether Server Name Indication is required on this binding.
    pub sni: bool,
}

/// A low-level association between an endpoint and a certificate thumbprint.
///
/// Stored in the binding store independently of the site binding object;
/// both must be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SslBinding {
    /// The endpoint the certificate is bound to.
    pub endpoint: BindingEndpoint,
    /// Thumbprint of the bound certificate.
    pub thumbprint: String,
}

/// Narrow interface over the machine certificate store.
pub trait CertificateStore {
    /// Return all records whose subject matches the given prefix.
    ///
    /// Matching follows [`subject_matches`]: the prefix may be a bare name
    /// ("example.com") or a DN prefix ("CN=example.com"), compared
    /// case-insensitively.
    fn find_by_subject_prefix(&self, prefix: &str) -> Result<Vec<CertificateRecord>>;

    /// Import the PFX at `path` using `password`, marking the private key
    /// exportable when requested.
    fn import_pfx(&mut self, path: &Path, password: &str, exportable: bool) -> Result<()>;

    /// Delete the record with the given thumbprint, including its private
    /// key material.
    fn delete_by_thumbprint(&mut self, thumbprint: &str) -> Result<()>;
}

/// Narrow interface over the web-server configuration store.
pub trait BindingStore {
    /// Find the HTTPS binding at `endpoint` on the named site, if any.
    fn find_binding(&self, site_name: &str, endpoint: &BindingEndpoint)
        -> Result<Option<SiteBinding>>;

    /// Remove the HTTPS binding at `endpoint` from the named site.
    ///
    /// Removing a binding that does not exist is a no-op.
    fn remove_binding(&mut self, site_name: &str, endpoint: &BindingEndpoint) -> Result<()>;

    /// Create a site-level HTTPS binding described by `spec`.
    fn create_binding(&mut self, spec: &BindingSpec) -> Result<()>;

    /// Find the SSL certificate association at `endpoint`, if any.
    fn find_ssl_binding(&self, endpoint: &BindingEndpoint) -> Result<Option<SslBinding>>;

    /// Remove the SSL certificate association at `endpoint`.
    ///
    /// Removing an association that does not exist is a no-op.
    fn unbind_certificate(&mut self, endpoint: &BindingEndpoint) -> Result<()>;

    /// Associate `endpoint` with the certificate identified by `thumbprint`.
    fn bind_certificate(&mut self, endpoint: &BindingEndpoint, thumbprint: &str) -> Result<()>;
}

/// Subject prefix match shared by every store backend.
///
/// Accepts either a bare name or a DN-style prefix so that a request for
/// "example.com" matches a stored subject of "CN=example.com, O=Example".
/// Comparison is ASCII case-insensitive, mirroring how the store itself
/// compares DN strings.
pub fn subject_matches(subject: &str, prefix: &str) -> bool {
    let subject_lower = subject.to_ascii_lowercase();
    let prefix_lower = prefix.to_ascii_lowercase();

    if subject_lower.starts_with(&prefix_lower) {
        return true;
    }

    // A bare name should match the leading CN= attribute.
    match subject_lower.strip_prefix("cn=") {
        Some(rest) => rest.starts_with(&prefix_lower),
        None => false,
    }
}
