//! In-memory store implementations.
//!
//! These back the reconciler tests without touching a real certificate or
//! web-server configuration store. PFX import is modeled by *staging*: a
//! test registers the record a given path+password pair would produce, and
//! [`MemoryCertificateStore::import_pfx`] materializes it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CertBindError, Result};
use crate::request::{BindingEndpoint, BindingSpec};
use crate::store::{
    subject_matches, BindingStore, CertificateRecord, CertificateStore, SiteBinding, SslBinding,
};

struct StagedPfx {
    password: String,
    record: CertificateRecord,
}

/// In-memory certificate store.
#[derive(Default)]
pub struct MemoryCertificateStore {
    certs: Vec<CertificateRecord>,
    staged: HashMap<PathBuf, StagedPfx>,
}

impl MemoryCertificateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing record.
    pub fn with_certificate(mut self, record: CertificateRecord) -> Self {
        self.certs.push(record);
        self
    }

    /// Register the record that importing `path` with `password` produces.
    pub fn stage_pfx(
        mut self,
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        record: CertificateRecord,
    ) -> Self {
        self.staged.insert(
            path.into(),
            StagedPfx {
                password: password.into(),
                record,
            },
        );
        self
    }

    /// All records currently in the store.
    pub fn records(&self) -> &[CertificateRecord] {
        &self.certs
    }

    /// Look up a record by thumbprint.
    pub fn get(&self, thumbprint: &str) -> Option<&CertificateRecord> {
        self.certs.iter().find(|c| c.thumbprint == thumbprint)
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find_by_subject_prefix(&self, prefix: &str) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .certs
            .iter()
            .filter(|c| subject_matches(&c.subject, prefix))
            .cloned()
            .collect())
    }

    fn import_pfx(&mut self, path: &Path, password: &str, exportable: bool) -> Result<()> {
        let staged = self.staged.get(path).ok_or_else(|| {
            CertBindError::import(format!("cannot read PFX file {}", path.display()))
        })?;
        if staged.password != password {
            return Err(CertBindError::import("the PFX password is incorrect"));
        }

        let mut record = staged.record.clone();
        record.exportable = exportable;

        // Re-importing the same certificate replaces the existing record.
        self.certs.retain(|c| c.thumbprint != record.thumbprint);
        self.certs.push(record);
        Ok(())
    }

    fn delete_by_thumbprint(&mut self, thumbprint: &str) -> Result<()> {
        let before = self.certs.len();
        self.certs.retain(|c| c.thumbprint != thumbprint);
        if self.certs.len() == before {
            return Err(CertBindError::delete(format!(
                "no certificate with thumbprint {} in store",
                thumbprint
            )));
        }
        Ok(())
    }
}

/// In-memory binding store.
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: Vec<SiteBinding>,
    ssl: HashMap<BindingEndpoint, String>,
}

impl MemoryBindingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a site-level binding.
    pub fn with_binding(mut self, binding: SiteBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Seed an SSL certificate association.
    pub fn with_ssl_binding(
        mut self,
        endpoint: BindingEndpoint,
        thumbprint: impl Into<String>,
    ) -> Self {
        self.ssl.insert(endpoint, thumbprint.into());
        self
    }

    /// All site bindings currently in the store.
    pub fn bindings(&self) -> &[SiteBinding] {
        &self.bindings
    }

    /// The thumbprint bound at `endpoint`, if any.
    pub fn bound_thumbprint(&self, endpoint: &BindingEndpoint) -> Option<&str> {
        self.ssl.get(endpoint).map(String::as_str)
    }
}

impl BindingStore for MemoryBindingStore {
    fn find_binding(
        &self,
        site_name: &str,
        endpoint: &BindingEndpoint,
    ) -> Result<Option<SiteBinding>> {
        Ok(self
            .bindings
            .iter()
            .find(|b| b.site_name == site_name && b.endpoint == *endpoint)
            .cloned())
    }

    fn remove_binding(&mut self, site_name: &str, endpoint: &BindingEndpoint) -> Result<()> {
        // Idempotent: removing an absent binding is a no-op.
        self.bindings
            .retain(|b| !(b.site_name == site_name && b.endpoint == *endpoint));
        Ok(())
    }

    fn create_binding(&mut self, spec: &BindingSpec) -> Result<()> {
        if self
            .bindings
            .iter()
            .any(|b| b.site_name == spec.site_name && b.endpoint == spec.endpoint)
        {
            return Err(CertBindError::binding_creation(format!(
                "site '{}' already has a binding at {}",
                spec.site_name, spec.endpoint
            )));
        }
        self.bindings.push(SiteBinding {
            site_name: spec.site_name.clone(),
            endpoint: spec.endpoint.clone(),
            sni: spec.sni,
        });
        Ok(())
    }

    fn find_ssl_binding(&self, endpoint: &BindingEndpoint) -> Result<Option<SslBinding>> {
        Ok(self.ssl.get(endpoint).map(|thumbprint| SslBinding {
            endpoint: endpoint.clone(),
            thumbprint: thumbprint.clone(),
        }))
    }

    fn unbind_certificate(&mut self, endpoint: &BindingEndpoint) -> Result<()> {
        // Idempotent: removing an absent association is a no-op.
        self.ssl.remove(endpoint);
        Ok(())
    }

    fn bind_certificate(&mut self, endpoint: &BindingEndpoint, thumbprint: &str) -> Result<()> {
        if self.ssl.contains_key(endpoint) {
            return Err(CertBindError::binding_creation(format!(
                "endpoint {} already has an SSL certificate bound",
                endpoint
            )));
        }
        self.ssl.insert(endpoint.clone(), thumbprint.to_string());
        Ok(())
    }
}
