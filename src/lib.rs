// SPDX-License-Identifier: Apache-2.0

//! # iis-certbind
//!
//! Installs or replaces a TLS certificate in the Windows machine
//! certificate store and rebinds an IIS web site's HTTPS listener, or —
//! for a removal request — tears down the binding and deletes the
//! matching certificate. Intended to run interactively or from a
//! deployment task sequence.
//!
//! The core is the [`reconciler::Reconciler`], a single-pass procedure
//! over two narrow store interfaces:
//!
//! - [`store::CertificateStore`]: the machine certificate store.
//! - [`store::BindingStore`]: the web-server configuration store (site
//!   bindings plus HTTP.sys SSL associations).
//!
//! Real Windows backends live in [`windows`]; in-memory implementations
//! for testing live in [`memory`].
//!
//! ## Example
//!
//! ```
//! use iis_certbind::context::DeployContext;
//! use iis_certbind::memory::{MemoryBindingStore, MemoryCertificateStore};
//! use iis_certbind::reconciler::Reconciler;
//! use iis_certbind::request::{BindingSpec, ReconciliationRequest};
//! use iis_certbind::store::CertificateRecord;
//!
//! let mut certs = MemoryCertificateStore::new().stage_pfx(
//!     "new.pfx",
//!     "secret",
//!     CertificateRecord {
//!         thumbprint: "T2".into(),
//!         subject: "CN=example.com".into(),
//!         not_before: "2026-01-01T00:00:00Z".into(),
//!         not_after: "2027-01-01T00:00:00Z".into(),
//!         exportable: true,
//!     },
//! );
//! let mut bindings = MemoryBindingStore::new();
//! let context = DeployContext::new("WEBSRV01", std::env::temp_dir());
//!
//! let request = ReconciliationRequest::install(
//!     "new.pfx",
//!     "secret",
//!     "example.com",
//!     BindingSpec::default(),
//! );
//!
//! let report = Reconciler::new(&mut certs, &mut bindings, &context).run(&request);
//! assert!(report.succeeded());
//! ```
//!
//! ## Semantics
//!
//! The run is best-effort, not transactional: each step is guarded at its
//! boundary, recorded in the [`reconciler::RunReport`], and a failure in
//! one step never prevents later independent steps from attempting to
//! run. There is no rollback across the two stores.

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod memory;
pub mod reconciler;
pub mod request;
pub mod store;
pub mod transcript;
pub mod windows;

pub use context::DeployContext;
pub use error::{CertBindError, Result};
pub use reconciler::{Reconciler, RunReport, StepName, StepOutcome};
pub use request::{BindingEndpoint, BindingSpec, CertificateSource, ReconciliationRequest};
pub use store::{BindingStore, CertificateRecord, CertificateStore, SiteBinding, SslBinding};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
