//! The certificate reconciler.
//!
//! A single-pass procedure that drives the certificate store and the
//! binding store to a state where either the binding points at a freshly
//! imported certificate and the superseded one is gone, or — for a removal
//! request — both the binding and the certificate are gone.
//!
//! The pipeline is fixed:
//!
//! locate-old-cert → import-or-skip → locate-new-cert → remove-old-binding
//! → create-new-binding → delete-old-cert → report
//!
//! Semantics are best-effort, not transactional: every step is guarded at
//! its boundary, its outcome is recorded in the [`RunReport`], and later
//! steps consult only the specific predecessor results they depend on.
//! There is no rollback; if binding creation fails after the old binding
//! was removed, the site is left without an HTTPS binding at that endpoint
//! until corrected manually.

use serde::Serialize;
use tracing::{info, warn};

use crate::context::DeployContext;
use crate::error::CertBindError;
use crate::request::{CertificateSource, ReconciliationRequest};
use crate::store::{BindingStore, CertificateRecord, CertificateStore};
use crate::transcript::{Entry, Level, Transcript};

/// The steps of the reconciliation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    /// Locate the certificate being replaced.
    LocateOldCertificate,
    /// Import the replacement PFX.
    ImportCertificate,
    /// Locate the freshly imported certificate.
    LocateNewCertificate,
    /// Remove the existing site binding and SSL association.
    RemoveBinding,
    /// Create the site binding and SSL association for the new certificate.
    CreateBinding,
    /// Delete the superseded certificate from the store.
    DeleteOldCertificate,
}

impl StepName {
    /// Stable kebab-case name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocateOldCertificate => "locate-old-certificate",
            Self::ImportCertificate => "import-certificate",
            Self::LocateNewCertificate => "locate-new-certificate",
            Self::RemoveBinding => "remove-binding",
            Self::CreateBinding => "create-binding",
            Self::DeleteOldCertificate => "delete-old-certificate",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StepOutcome {
    /// The step ran and succeeded.
    Completed {
        /// Human-readable description of what was done.
        detail: String,
    },
    /// The step's precondition was not met; nothing was attempted.
    Skipped {
        /// Why the step did not run.
        reason: String,
    },
    /// The step ran and failed. The run continues with the next
    /// independent step.
    Failed {
        /// The failure, rendered.
        error: String,
    },
}

/// One recorded step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Which step.
    pub step: StepName,
    /// Its outcome.
    pub outcome: StepOutcome,
}

/// The full record of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Per-step records, in execution order.
    pub steps: Vec<StepRecord>,
    /// Thumbprint of the certificate identified as "old", if any.
    pub old_thumbprint: Option<String>,
    /// Thumbprint of the freshly imported certificate, if identified.
    pub new_thumbprint: Option<String>,
}

impl RunReport {
    /// True if no recorded step failed.
    pub fn succeeded(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
    }

    /// The records of steps that failed.
    pub fn failures(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .collect()
    }

    /// The recorded outcome of a step, if it was reached.
    pub fn outcome(&self, step: StepName) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }
}

/// Result of a subject lookup after all exclusion filters.
enum Lookup {
    /// Exactly one record matched.
    Unique(CertificateRecord),
    /// Zero or multiple records matched; treated as "no certificate".
    Absent { matches: usize },
}

/// Drives one reconciliation run against the two stores.
pub struct Reconciler<'a> {
    certs: &'a mut dyn CertificateStore,
    bindings: &'a mut dyn BindingStore,
    context: &'a DeployContext,
    transcript: Option<&'a Transcript>,
}

impl<'a> Reconciler<'a> {
    /// New reconciler over the given stores and context.
    pub fn new(
        certs: &'a mut dyn CertificateStore,
        bindings: &'a mut dyn BindingStore,
        context: &'a DeployContext,
    ) -> Self {
        Self {
            certs,
            bindings,
            context,
            transcript: None,
        }
    }

    /// Attach a transcript; every step outcome is written to it.
    pub fn with_transcript(mut self, transcript: &'a Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Execute the pipeline for `request` and return the run report.
    ///
    /// Never returns an error: failures are recorded per step.
    pub fn run(&mut self, request: &ReconciliationRequest) -> RunReport {
        let mut report = RunReport::default();
        let removal = request.source.is_removal();

        info!(
            subject = %request.subject_match,
            site = %request.binding.site_name,
            endpoint = %request.binding.endpoint,
            removal,
            "starting reconciliation"
        );

        // Step 1: locate the certificate being replaced.
        let old_cert = match self.locate(request, None) {
            Ok(Lookup::Unique(cert)) => {
                self.record(
                    &mut report,
                    StepName::LocateOldCertificate,
                    StepOutcome::Completed {
                        detail: format!("found certificate {}", cert.thumbprint),
                    },
                );
                Some(cert)
            }
            Ok(Lookup::Absent { matches }) => {
                self.record(
                    &mut report,
                    StepName::LocateOldCertificate,
                    StepOutcome::Completed {
                        detail: format!("no unambiguous match ({} candidates)", matches),
                    },
                );
                None
            }
            Err(err) => {
                self.record(
                    &mut report,
                    StepName::LocateOldCertificate,
                    StepOutcome::Failed {
                        error: err.to_string(),
                    },
                );
                None
            }
        };
        report.old_thumbprint = old_cert.as_ref().map(|c| c.thumbprint.clone());

        // Step 2: import the replacement PFX. Skipped entirely for removal.
        let mut import_ok = false;
        match &request.source {
            CertificateSource::Remove => {
                self.record(
                    &mut report,
                    StepName::ImportCertificate,
                    StepOutcome::Skipped {
                        reason: "removal request".to_string(),
                    },
                );
            }
            CertificateSource::Pfx { path, password } => {
                match self.certs.import_pfx(path, password, true) {
                    Ok(()) => {
                        import_ok = true;
                        self.record(
                            &mut report,
                            StepName::ImportCertificate,
                            StepOutcome::Completed {
                                detail: format!("imported {}", path.display()),
                            },
                        );
                    }
                    Err(err) => {
                        self.record(
                            &mut report,
                            StepName::ImportCertificate,
                            StepOutcome::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
        }

        // Step 3: locate the freshly imported certificate, excluding the
        // old thumbprint to disambiguate it from the one being replaced.
        let new_cert = if removal {
            self.record(
                &mut report,
                StepName::LocateNewCertificate,
                StepOutcome::Skipped {
                    reason: "removal request".to_string(),
                },
            );
            None
        } else if !import_ok {
            self.record(
                &mut report,
                StepName::LocateNewCertificate,
                StepOutcome::Skipped {
                    reason: "import did not succeed".to_string(),
                },
            );
            None
        } else {
            let exclude = old_cert.as_ref().map(|c| c.thumbprint.as_str());
            match self.locate(request, exclude) {
                Ok(Lookup::Unique(cert)) => {
                    self.record(
                        &mut report,
                        StepName::LocateNewCertificate,
                        StepOutcome::Completed {
                            detail: format!("found certificate {}", cert.thumbprint),
                        },
                    );
                    Some(cert)
                }
                Ok(Lookup::Absent { matches }) => {
                    self.record(
                        &mut report,
                        StepName::LocateNewCertificate,
                        StepOutcome::Completed {
                            detail: format!("no unambiguous match ({} candidates)", matches),
                        },
                    );
                    None
                }
                Err(err) => {
                    self.record(
                        &mut report,
                        StepName::LocateNewCertificate,
                        StepOutcome::Failed {
                            error: err.to_string(),
                        },
                    );
                    None
                }
            }
        };
        report.new_thumbprint = new_cert.as_ref().map(|c| c.thumbprint.clone());

        // Step 4: remove the existing site binding and SSL association.
        // Runs when a new certificate was identified or on removal.
        if new_cert.is_some() || removal {
            match self.remove_binding_step(request) {
                Ok(detail) => {
                    self.record(
                        &mut report,
                        StepName::RemoveBinding,
                        StepOutcome::Completed { detail },
                    );
                }
                Err(err) => {
                    self.record(
                        &mut report,
                        StepName::RemoveBinding,
                        StepOutcome::Failed {
                            error: err.to_string(),
                        },
                    );
                }
            }
        } else {
            self.record(
                &mut report,
                StepName::RemoveBinding,
                StepOutcome::Skipped {
                    reason: "no new certificate identified".to_string(),
                },
            );
        }

        // Step 5: create the replacement binding. Never runs for removal.
        let mut binding_created = false;
        match &new_cert {
            Some(cert) => match self.create_binding_step(request, cert) {
                Ok(detail) => {
                    binding_created = true;
                    self.record(
                        &mut report,
                        StepName::CreateBinding,
                        StepOutcome::Completed { detail },
                    );
                }
                Err(err) => {
                    self.record(
                        &mut report,
                        StepName::CreateBinding,
                        StepOutcome::Failed {
                            error: err.to_string(),
                        },
                    );
                }
            },
            None => {
                let reason = if removal {
                    "removal request"
                } else {
                    "no new certificate identified"
                };
                self.record(
                    &mut report,
                    StepName::CreateBinding,
                    StepOutcome::Skipped {
                        reason: reason.to_string(),
                    },
                );
            }
        }

        // Step 6: delete the superseded certificate. Only after the
        // replacement binding succeeded, or on an explicit removal — never
        // speculatively.
        match &old_cert {
            Some(old) if binding_created || removal => {
                match self.certs.delete_by_thumbprint(&old.thumbprint) {
                    Ok(()) => {
                        self.record(
                            &mut report,
                            StepName::DeleteOldCertificate,
                            StepOutcome::Completed {
                                detail: format!("deleted certificate {}", old.thumbprint),
                            },
                        );
                    }
                    Err(err) => {
                        self.record(
                            &mut report,
                            StepName::DeleteOldCertificate,
                            StepOutcome::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
            Some(_) => {
                self.record(
                    &mut report,
                    StepName::DeleteOldCertificate,
                    StepOutcome::Skipped {
                        reason: "replacement binding was not created".to_string(),
                    },
                );
            }
            None => {
                self.record(
                    &mut report,
                    StepName::DeleteOldCertificate,
                    StepOutcome::Skipped {
                        reason: "no old certificate found".to_string(),
                    },
                );
            }
        }

        info!(succeeded = report.succeeded(), "reconciliation finished");
        report
    }

    /// Query the certificate store by subject prefix and apply the
    /// exclusion filters.
    ///
    /// Zero or multiple surviving matches are both treated as "absent" —
    /// callers must use a sufficiently specific subject string. The
    /// multiple-match case is surfaced as a warning since it usually means
    /// the subject filter is too broad.
    fn locate(
        &self,
        request: &ReconciliationRequest,
        exclude_thumbprint: Option<&str>,
    ) -> crate::error::Result<Lookup> {
        let mut matches = self.certs.find_by_subject_prefix(&request.subject_match)?;

        if request.exclude_local_machine_cert {
            matches.retain(|c| !self.context.is_local_machine_subject(&c.subject));
        }
        if let Some(thumbprint) = exclude_thumbprint {
            matches.retain(|c| c.thumbprint != thumbprint);
        }

        if matches.len() == 1 {
            Ok(Lookup::Unique(matches.remove(0)))
        } else {
            if matches.len() > 1 {
                warn!(
                    subject = %request.subject_match,
                    matches = matches.len(),
                    "multiple certificates match the subject filter; treating as no match"
                );
                if let Some(t) = self.transcript {
                    let _ = t.warn(format!(
                        "{} certificates match subject '{}'; treating as no match",
                        matches.len(),
                        request.subject_match
                    ));
                }
            }
            Ok(Lookup::Absent {
                matches: matches.len(),
            })
        }
    }

    /// Remove the site binding and the raw SSL association at the target
    /// endpoint. Both removals are attempted even if one is absent or
    /// fails; absence is an idempotent no-op.
    fn remove_binding_step(&mut self, request: &ReconciliationRequest) -> crate::error::Result<String> {
        let site = &request.binding.site_name;
        let endpoint = &request.binding.endpoint;
        let mut notes = Vec::new();
        let mut errors = Vec::new();

        match self.bindings.find_binding(site, endpoint) {
            Ok(Some(_)) => match self.bindings.remove_binding(site, endpoint) {
                Ok(()) => notes.push(format!("removed site binding at {}", endpoint)),
                Err(err) => errors.push(err.to_string()),
            },
            Ok(None) => notes.push("no site binding present".to_string()),
            Err(err) => errors.push(err.to_string()),
        }

        match self.bindings.find_ssl_binding(endpoint) {
            Ok(Some(ssl)) => match self.bindings.unbind_certificate(endpoint) {
                Ok(()) => notes.push(format!("removed SSL binding for {}", ssl.thumbprint)),
                Err(err) => errors.push(err.to_string()),
            },
            Ok(None) => notes.push("no SSL binding present".to_string()),
            Err(err) => errors.push(err.to_string()),
        }

        if errors.is_empty() {
            Ok(notes.join("; "))
        } else {
            Err(CertBindError::binding_removal(errors.join("; ")))
        }
    }

    /// Create the site binding, then associate the endpoint with the new
    /// certificate. The association only runs if the site binding was
    /// created.
    fn create_binding_step(
        &mut self,
        request: &ReconciliationRequest,
        cert: &CertificateRecord,
    ) -> crate::error::Result<String> {
        self.bindings.create_binding(&request.binding)?;
        self.bindings
            .bind_certificate(&request.binding.endpoint, &cert.thumbprint)?;
        Ok(format!(
            "bound {} at {}",
            cert.thumbprint, request.binding.endpoint
        ))
    }

    /// Record a step outcome in the report, the tracing stream, and the
    /// transcript.
    fn record(&self, report: &mut RunReport, step: StepName, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Completed { detail } => {
                info!(step = %step, detail = %detail, "step completed");
                if let Some(t) = self.transcript {
                    let _ = t.log(
                        &Entry::new(Level::Info, detail.clone())
                            .with_field("step", step.as_str())
                            .with_field("status", "completed"),
                    );
                }
            }
            StepOutcome::Skipped { reason } => {
                info!(step = %step, reason = %reason, "step skipped");
                if let Some(t) = self.transcript {
                    let _ = t.log(
                        &Entry::new(Level::Info, reason.clone())
                            .with_field("step", step.as_str())
                            .with_field("status", "skipped"),
                    );
                }
            }
            StepOutcome::Failed { error } => {
                warn!(step = %step, error = %error, "step failed");
                if let Some(t) = self.transcript {
                    let _ = t.log(
                        &Entry::new(Level::Error, error.clone())
                            .with_field("step", step.as_str())
                            .with_field("status", "failed"),
                    );
                }
            }
        }
        report.steps.push(StepRecord { step, outcome });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_are_kebab_case() {
        assert_eq!(
            StepName::LocateOldCertificate.to_string(),
            "locate-old-certificate"
        );
        assert_eq!(StepName::RemoveBinding.to_string(), "remove-binding");
    }

    #[test]
    fn test_report_succeeded() {
        let mut report = RunReport::default();
        report.steps.push(StepRecord {
            step: StepName::ImportCertificate,
            outcome: StepOutcome::Completed {
                detail: "imported".to_string(),
            },
        });
        assert!(report.succeeded());

        report.steps.push(StepRecord {
            step: StepName::CreateBinding,
            outcome: StepOutcome::Failed {
                error: "duplicate".to_string(),
            },
        });
        assert!(!report.succeeded());
        assert_eq!(report.failures().len(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let mut report = RunReport::default();
        report.steps.push(StepRecord {
            step: StepName::RemoveBinding,
            outcome: StepOutcome::Skipped {
                reason: "no new certificate identified".to_string(),
            },
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["step"], "remove-binding");
        assert_eq!(json["steps"][0]["outcome"]["status"], "skipped");
    }
}
