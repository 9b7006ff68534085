//! End-to-end reconciler tests against the in-memory stores.

use iis_certbind::context::DeployContext;
use iis_certbind::error::{CertBindError, Result};
use iis_certbind::memory::{MemoryBindingStore, MemoryCertificateStore};
use iis_certbind::reconciler::{Reconciler, StepName, StepOutcome};
use iis_certbind::request::{BindingEndpoint, BindingSpec, ReconciliationRequest};
use iis_certbind::store::{
    BindingStore, CertificateRecord, SiteBinding, SslBinding,
};
use iis_certbind::transcript::{Transcript, TranscriptFormat};

fn record(thumbprint: &str, subject: &str) -> CertificateRecord {
    CertificateRecord {
        thumbprint: thumbprint.to_string(),
        subject: subject.to_string(),
        not_before: "2026-01-01T00:00:00Z".to_string(),
        not_after: "2027-01-01T00:00:00Z".to_string(),
        exportable: true,
    }
}

fn context() -> DeployContext {
    DeployContext::new("WEBSRV01", std::env::temp_dir())
}

fn site_binding(endpoint: BindingEndpoint) -> SiteBinding {
    SiteBinding {
        site_name: "Default Web Site".to_string(),
        endpoint,
        sni: false,
    }
}

/// Scenario 1: replace an existing certificate and move the binding.
#[test]
fn replaces_certificate_and_rebinds() {
    let endpoint = BindingEndpoint::default();
    let mut certs = MemoryCertificateStore::new()
        .with_certificate(record("T1", "CN=example.com"))
        .stage_pfx("new.pfx", "secret", record("T2", "CN=example.com"));
    let mut bindings = MemoryBindingStore::new()
        .with_binding(site_binding(endpoint.clone()))
        .with_ssl_binding(endpoint.clone(), "T1");
    let ctx = context();

    let request = ReconciliationRequest::install(
        "new.pfx",
        "secret",
        "example.com",
        BindingSpec::default(),
    );

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded(), "failures: {:?}", report.failures());
    assert_eq!(report.old_thumbprint.as_deref(), Some("T1"));
    assert_eq!(report.new_thumbprint.as_deref(), Some("T2"));

    // Binding moved from T1 to T2.
    assert_eq!(bindings.bound_thumbprint(&endpoint), Some("T2"));
    assert_eq!(bindings.bindings().len(), 1);

    // T1 removed from the store, T2 present.
    assert!(certs.get("T1").is_none());
    assert!(certs.get("T2").is_some());
}

/// Scenario 2: fresh install with no prior certificate.
#[test]
fn installs_when_no_old_certificate_exists() {
    let endpoint = BindingEndpoint::default();
    let mut certs = MemoryCertificateStore::new().stage_pfx(
        "org.pfx",
        "secret",
        record("T3", "CN=example.org"),
    );
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::install(
        "org.pfx",
        "secret",
        "example.org",
        BindingSpec::default(),
    );

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded(), "failures: {:?}", report.failures());
    assert_eq!(report.old_thumbprint, None);
    assert_eq!(report.new_thumbprint.as_deref(), Some("T3"));

    // New binding created at the default endpoint.
    assert_eq!(bindings.bound_thumbprint(&endpoint), Some("T3"));
    assert_eq!(bindings.bindings().len(), 1);

    // Nothing to delete.
    assert!(matches!(
        report.outcome(StepName::DeleteOldCertificate),
        Some(StepOutcome::Skipped { .. })
    ));
}

/// Scenario 3: remove-only request tears down the binding and the
/// certificate, including a host-header-qualified endpoint.
#[test]
fn removal_tears_down_binding_and_certificate() {
    let endpoint = BindingEndpoint::default().with_host_header("shop.example.com");
    let mut certs =
        MemoryCertificateStore::new().with_certificate(record("T1", "CN=example.com"));
    let mut bindings = MemoryBindingStore::new()
        .with_binding(site_binding(endpoint.clone()))
        .with_ssl_binding(endpoint.clone(), "T1");
    let ctx = context();

    let binding = BindingSpec::default().with_endpoint(endpoint.clone());
    let request = ReconciliationRequest::removal("example.com", binding);

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded(), "failures: {:?}", report.failures());

    // Import and creation never ran.
    assert!(matches!(
        report.outcome(StepName::ImportCertificate),
        Some(StepOutcome::Skipped { .. })
    ));
    assert!(matches!(
        report.outcome(StepName::CreateBinding),
        Some(StepOutcome::Skipped { .. })
    ));

    // Binding and certificate are gone.
    assert!(bindings.bindings().is_empty());
    assert_eq!(bindings.bound_thumbprint(&endpoint), None);
    assert!(certs.get("T1").is_none());
}

/// Scenario 4: the machine's own certificate is never mistaken for the
/// target, even when it is the only subject match.
#[test]
fn local_machine_certificate_is_excluded() {
    let mut certs =
        MemoryCertificateStore::new().with_certificate(record("TM", "CN=WEBSRV01"));
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::removal("WEBSRV01", BindingSpec::default());

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded());
    assert_eq!(report.old_thumbprint, None);

    // The machine certificate survives.
    assert!(certs.get("TM").is_some());
    assert!(matches!(
        report.outcome(StepName::DeleteOldCertificate),
        Some(StepOutcome::Skipped { .. })
    ));
}

/// Disabling the exclusion filter makes the machine certificate eligible.
#[test]
fn exclusion_filter_can_be_disabled() {
    let mut certs =
        MemoryCertificateStore::new().with_certificate(record("TM", "CN=WEBSRV01"));
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::removal("WEBSRV01", BindingSpec::default())
        .include_local_machine_cert();

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded());
    assert_eq!(report.old_thumbprint.as_deref(), Some("TM"));
    assert!(certs.get("TM").is_none());
}

/// Zero subject matches: the old-certificate lookup reports absent and the
/// deletion step is skipped without error.
#[test]
fn zero_matches_treated_as_absent() {
    let mut certs = MemoryCertificateStore::new();
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::removal("example.com", BindingSpec::default());

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded());
    assert!(matches!(
        report.outcome(StepName::LocateOldCertificate),
        Some(StepOutcome::Completed { .. })
    ));
    assert!(matches!(
        report.outcome(StepName::DeleteOldCertificate),
        Some(StepOutcome::Skipped { .. })
    ));
}

/// Multiple subject matches are treated as "no match", not an error.
#[test]
fn ambiguous_matches_treated_as_absent() {
    let mut certs = MemoryCertificateStore::new()
        .with_certificate(record("T1", "CN=example.com"))
        .with_certificate(record("T4", "CN=example.com.internal"));
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::removal("example.com", BindingSpec::default());

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(report.succeeded());
    assert_eq!(report.old_thumbprint, None);
    assert!(certs.get("T1").is_some());
    assert!(certs.get("T4").is_some());
}

/// Removing a binding that does not exist is a no-op; repeating the run
/// yields the same end state.
#[test]
fn binding_removal_is_idempotent() {
    let mut certs =
        MemoryCertificateStore::new().with_certificate(record("T1", "CN=example.com"));
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::removal("example.com", BindingSpec::default());

    let first = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);
    assert!(first.succeeded());
    assert!(certs.get("T1").is_none());

    let second = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);
    assert!(matches!(
        second.outcome(StepName::RemoveBinding),
        Some(StepOutcome::Completed { .. })
    ));
    assert!(matches!(
        second.outcome(StepName::DeleteOldCertificate),
        Some(StepOutcome::Skipped { .. })
    ));
    assert!(bindings.bindings().is_empty());
}

/// Re-running an install after it converged leaves the end state alone:
/// the exclusion filter makes the second new-certificate lookup come up
/// empty, so no binding or deletion step runs again.
#[test]
fn rerunning_converged_install_is_stable() {
    let endpoint = BindingEndpoint::default();
    let mut certs = MemoryCertificateStore::new()
        .with_certificate(record("T1", "CN=example.com"))
        .stage_pfx("new.pfx", "secret", record("T2", "CN=example.com"));
    let mut bindings = MemoryBindingStore::new()
        .with_binding(site_binding(endpoint.clone()))
        .with_ssl_binding(endpoint.clone(), "T1");
    let ctx = context();

    let request = ReconciliationRequest::install(
        "new.pfx",
        "secret",
        "example.com",
        BindingSpec::default(),
    );

    let first = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);
    assert!(first.succeeded());
    assert_eq!(bindings.bound_thumbprint(&endpoint), Some("T2"));

    // Second run re-imports T2, which is now the "old" certificate; the
    // new-certificate lookup excludes it and reports absent.
    let second = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);
    assert!(second.succeeded());
    assert_eq!(second.old_thumbprint.as_deref(), Some("T2"));
    assert_eq!(second.new_thumbprint, None);
    assert_eq!(bindings.bound_thumbprint(&endpoint), Some("T2"));
    assert!(certs.get("T2").is_some());
}

/// Import failure is terminal for the install path but does not abort the
/// run; nothing downstream mutates either store.
#[test]
fn import_failure_skips_dependent_steps() {
    let endpoint = BindingEndpoint::default();
    let mut certs =
        MemoryCertificateStore::new().with_certificate(record("T1", "CN=example.com"));
    let mut bindings = MemoryBindingStore::new()
        .with_binding(site_binding(endpoint.clone()))
        .with_ssl_binding(endpoint.clone(), "T1");
    let ctx = context();

    // Nothing staged at this path: the import fails.
    let request = ReconciliationRequest::install(
        "missing.pfx",
        "secret",
        "example.com",
        BindingSpec::default(),
    );

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(!report.succeeded());
    assert!(matches!(
        report.outcome(StepName::ImportCertificate),
        Some(StepOutcome::Failed { .. })
    ));
    for step in [
        StepName::LocateNewCertificate,
        StepName::RemoveBinding,
        StepName::CreateBinding,
        StepName::DeleteOldCertificate,
    ] {
        assert!(
            matches!(report.outcome(step), Some(StepOutcome::Skipped { .. })),
            "{} should have been skipped",
            step
        );
    }

    // Prior state intact.
    assert_eq!(bindings.bound_thumbprint(&endpoint), Some("T1"));
    assert!(certs.get("T1").is_some());
}

/// Binding store that fails creation, for exercising the
/// no-speculative-delete invariant.
struct FailingCreateBindings {
    inner: MemoryBindingStore,
}

impl BindingStore for FailingCreateBindings {
    fn find_binding(
        &self,
        site_name: &str,
        endpoint: &BindingEndpoint,
    ) -> Result<Option<SiteBinding>> {
        self.inner.find_binding(site_name, endpoint)
    }

    fn remove_binding(&mut self, site_name: &str, endpoint: &BindingEndpoint) -> Result<()> {
        self.inner.remove_binding(site_name, endpoint)
    }

    fn create_binding(&mut self, _spec: &BindingSpec) -> Result<()> {
        Err(CertBindError::binding_creation("injected failure"))
    }

    fn find_ssl_binding(&self, endpoint: &BindingEndpoint) -> Result<Option<SslBinding>> {
        self.inner.find_ssl_binding(endpoint)
    }

    fn unbind_certificate(&mut self, endpoint: &BindingEndpoint) -> Result<()> {
        self.inner.unbind_certificate(endpoint)
    }

    fn bind_certificate(&mut self, endpoint: &BindingEndpoint, thumbprint: &str) -> Result<()> {
        self.inner.bind_certificate(endpoint, thumbprint)
    }
}

/// The old certificate is deleted only after the replacement binding
/// succeeds — a failed creation leaves it in place.
#[test]
fn old_certificate_survives_failed_binding_creation() {
    let endpoint = BindingEndpoint::default();
    let mut certs = MemoryCertificateStore::new()
        .with_certificate(record("T1", "CN=example.com"))
        .stage_pfx("new.pfx", "secret", record("T2", "CN=example.com"));
    let mut bindings = FailingCreateBindings {
        inner: MemoryBindingStore::new()
            .with_binding(site_binding(endpoint.clone()))
            .with_ssl_binding(endpoint.clone(), "T1"),
    };
    let ctx = context();

    let request = ReconciliationRequest::install(
        "new.pfx",
        "secret",
        "example.com",
        BindingSpec::default(),
    );

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx).run(&request);

    assert!(!report.succeeded());
    assert!(matches!(
        report.outcome(StepName::CreateBinding),
        Some(StepOutcome::Failed { .. })
    ));
    assert!(matches!(
        report.outcome(StepName::DeleteOldCertificate),
        Some(StepOutcome::Skipped { .. })
    ));

    // T1 was never deleted. The old binding is gone, though: that is the
    // accepted operational risk of the non-transactional design.
    assert!(certs.get("T1").is_some());
}

/// Every step outcome is written to the transcript.
#[test]
fn transcript_records_each_step() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = Transcript::create_in(dir.path(), TranscriptFormat::Text).unwrap();

    let mut certs = MemoryCertificateStore::new().stage_pfx(
        "org.pfx",
        "secret",
        record("T3", "CN=example.org"),
    );
    let mut bindings = MemoryBindingStore::new();
    let ctx = context();

    let request = ReconciliationRequest::install(
        "org.pfx",
        "secret",
        "example.org",
        BindingSpec::default(),
    );

    let report = Reconciler::new(&mut certs, &mut bindings, &ctx)
        .with_transcript(&transcript)
        .run(&request);
    assert!(report.succeeded());

    let contents = std::fs::read_to_string(transcript.path().unwrap()).unwrap();
    for step in [
        "locate-old-certificate",
        "import-certificate",
        "locate-new-certificate",
        "remove-binding",
        "create-binding",
        "delete-old-certificate",
    ] {
        assert!(
            contents.contains(&format!("step={}", step)),
            "transcript missing step {}:\n{}",
            step,
            contents
        );
    }
}
