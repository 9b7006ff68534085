// SPDX-License-Identifier: Apache-2.0

//! IIS certificate deployment tool.
//!
//! Installs or replaces a TLS certificate in the machine certificate store
//! and rebinds an IIS site's HTTPS listener, or tears both down with
//! `--remove`. Designed for interactive use and for deployment task
//! sequences; every run writes a timestamped transcript to the
//! task-sequence log directory (or the temp directory).
//!
//! # Usage
//!
//! ```text
//! iis-certbind --subject <SUBJECT> [OPTIONS]
//!
//! Options:
//!   --pfx <PATH>            PFX file (default: pkcs12.pfx beside the executable)
//!   --password <PASSWORD>   PFX password
//!   --subject <SUBJECT>     Certificate subject prefix to match (required)
//!   --site <SITE>           IIS site name [default: Default Web Site]
//!   --ip <IP>               Bind address [default: *]
//!   --port <PORT>           Bind port [default: 443]
//!   --host-header <HOST>    Host header for the binding
//!   --sni                   Require Server Name Indication
//!   --remove                Remove the binding and delete the certificate
//!   --exclude-local-cert <BOOL>  Skip the machine's own certificate [default: true]
//!   --log-dir <PATH>        Transcript directory override
//!   --json                  Print the run report as JSON
//!   -v, --verbose           Enable verbose output
//!   -q, --quiet             Suppress non-error output
//! ```
//!
//! Exit code is 0 only when every executed step succeeded.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

use iis_certbind::context::DeployContext;
use iis_certbind::reconciler::{Reconciler, RunReport, StepOutcome};
use iis_certbind::request::{
    BindingEndpoint, BindingSpec, ReconciliationRequest, DEFAULT_IP, DEFAULT_PORT, DEFAULT_SITE,
};
use iis_certbind::transcript::{Transcript, TranscriptFormat};
use iis_certbind::windows::{is_elevated, IisBindingStore, MachineCertStore};

/// IIS certificate deployment tool.
#[derive(Parser)]
#[command(name = "iis-certbind")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install a TLS certificate and rebind an IIS HTTPS listener", long_about = None)]
struct Cli {
    /// PFX file to import (default: pkcs12.pfx beside the executable)
    #[arg(long, value_name = "PATH")]
    pfx: Option<PathBuf>,

    /// Password for the PFX file
    #[arg(long, value_name = "PASSWORD", default_value = "")]
    password: String,

    /// Certificate subject prefix to match
    #[arg(long, value_name = "SUBJECT")]
    subject: String,

    /// IIS site name
    #[arg(long, value_name = "SITE", default_value = DEFAULT_SITE)]
    site: String,

    /// Bind address, or * for all interfaces
    #[arg(long, value_name = "IP", default_value = DEFAULT_IP)]
    ip: String,

    /// Bind port
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host header for the binding
    #[arg(long, value_name = "HOST")]
    host_header: Option<String>,

    /// Require Server Name Indication on the binding
    #[arg(long)]
    sni: bool,

    /// Remove the binding and delete the matching certificate
    #[arg(long)]
    remove: bool,

    /// Skip the machine's own identity certificate during subject matching
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    exclude_local_cert: bool,

    /// Transcript directory (default: task-sequence log path or temp dir)
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut context = DeployContext::from_environment();
    if let Some(dir) = &cli.log_dir {
        context.log_dir = dir.clone();
    }

    if cfg!(windows) && !is_elevated() {
        tracing::warn!(
            "not running elevated; certificate store and IIS changes will likely be denied"
        );
    }

    let request = match build_request(&cli) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::FAILURE;
        }
    };

    let transcript = match Transcript::create_in(&context.log_dir, TranscriptFormat::Text) {
        Ok(t) => {
            if let Some(path) = t.path() {
                tracing::info!(path = %path.display(), "writing transcript");
            }
            Some(t)
        }
        Err(err) => {
            tracing::warn!(%err, "cannot create transcript file; continuing without one");
            None
        }
    };

    let mut certs = match MachineCertStore::open() {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut bindings = IisBindingStore::discover();
    if let Err(err) = bindings.probe() {
        // Degraded mode: binding steps will fail individually and be
        // recorded in the report.
        tracing::warn!(%err, "binding store probe failed");
        if let Some(t) = &transcript {
            let _ = t.warn(err.to_string());
        }
    }

    let mut reconciler = Reconciler::new(&mut certs, &mut bindings, &context);
    if let Some(t) = &transcript {
        reconciler = reconciler.with_transcript(t);
    }

    let report = reconciler.run(&request);

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(err) => eprintln!("Error: cannot serialize report: {}", err),
        }
    } else if !cli.quiet {
        print_summary(&report);
    }

    if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_request(cli: &Cli) -> Result<ReconciliationRequest, String> {
    let mut endpoint = BindingEndpoint::new(cli.ip.clone(), cli.port);
    if let Some(host) = &cli.host_header {
        endpoint = endpoint.with_host_header(host.clone());
    }

    let binding = BindingSpec::new(cli.site.clone())
        .with_endpoint(endpoint)
        .with_sni(cli.sni);

    let mut request = if cli.remove {
        ReconciliationRequest::removal(cli.subject.clone(), binding)
    } else {
        let pfx = match &cli.pfx {
            Some(path) => path.clone(),
            None => default_pfx_path()?,
        };
        ReconciliationRequest::install(pfx, cli.password.clone(), cli.subject.clone(), binding)
    };

    if !cli.exclude_local_cert {
        request = request.include_local_machine_cert();
    }

    request.validate().map_err(|err| err.to_string())?;
    Ok(request)
}

/// `pkcs12.pfx` next to the executable, the conventional drop location in
/// a deployment package.
fn default_pfx_path() -> Result<PathBuf, String> {
    let exe = std::env::current_exe().map_err(|err| format!("cannot locate executable: {}", err))?;
    let dir = exe
        .parent()
        .ok_or_else(|| "cannot locate executable directory".to_string())?;
    Ok(dir.join("pkcs12.pfx"))
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Reconciliation summary:");
    for record in &report.steps {
        match &record.outcome {
            StepOutcome::Completed { detail } => {
                println!("  [OK]   {}: {}", record.step, detail);
            }
            StepOutcome::Skipped { reason } => {
                println!("  [SKIP] {}: {}", record.step, reason);
            }
            StepOutcome::Failed { error } => {
                println!("  [FAIL] {}: {}", record.step, error);
            }
        }
    }
    if let Some(thumbprint) = &report.new_thumbprint {
        println!("  New certificate: {}", thumbprint);
    }
    if let Some(thumbprint) = &report.old_thumbprint {
        println!("  Superseded certificate: {}", thumbprint);
    }
    println!(
        "  Result: {}",
        if report.succeeded() { "success" } else { "FAILED" }
    );
}
