// SPDX-License-Identifier: Apache-2.0

//! IIS binding store backend.
//!
//! Implements [`BindingStore`] by driving the Windows administration tools:
//!
//! - Site-level HTTPS bindings through `appcmd.exe`
//!   (`%windir%\System32\inetsrv\appcmd.exe`).
//! - HTTP.sys SSL certificate associations through `netsh http … sslcert`.
//!
//! The two are separate stores in IIS: a site binding describes the
//! listener on the site object, while the SSL association maps the
//! endpoint to a certificate hash in HTTP.sys. The reconciler removes and
//! creates both.
//!
//! When `appcmd.exe` is missing (IIS not installed, or a non-Windows host)
//! [`IisBindingStore::probe`] reports a module-load failure; the run then
//! continues in degraded mode and each binding step fails individually.

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::{CertBindError, Result};
use crate::request::{BindingEndpoint, BindingSpec};
use crate::store::{BindingStore, SiteBinding, SslBinding};

/// The application ID recorded on SSL associations created for IIS.
const IIS_APP_ID: &str = "{4dc3e181-e14b-4a21-b022-59fc669b0914}";

/// Binding store backed by `appcmd.exe` and `netsh`.
pub struct IisBindingStore {
    appcmd: PathBuf,
}

impl IisBindingStore {
    /// Locate the administration tooling at its conventional path.
    pub fn discover() -> Self {
        let windir = std::env::var("windir").unwrap_or_else(|_| "C:\\Windows".to_string());
        Self {
            appcmd: PathBuf::from(windir)
                .join("System32")
                .join("inetsrv")
                .join("appcmd.exe"),
        }
    }

    /// Use an explicit `appcmd.exe` path.
    pub fn with_appcmd(appcmd: impl Into<PathBuf>) -> Self {
        Self {
            appcmd: appcmd.into(),
        }
    }

    /// Verify the administration tooling is available.
    ///
    /// A failure here means every binding operation will fail; callers log
    /// it and continue in degraded mode.
    pub fn probe(&self) -> Result<()> {
        if self.appcmd.is_file() {
            Ok(())
        } else {
            Err(CertBindError::module_load(format!(
                "{} not found; is IIS installed?",
                self.appcmd.display()
            )))
        }
    }

    fn run_appcmd(&self, args: &[&str]) -> Result<String> {
        run_tool(Command::new(&self.appcmd).args(args), "appcmd")
    }

    fn run_netsh(&self, args: &[&str]) -> Result<String> {
        run_tool(Command::new("netsh").args(args), "netsh")
    }
}

impl BindingStore for IisBindingStore {
    fn find_binding(
        &self,
        site_name: &str,
        endpoint: &BindingEndpoint,
    ) -> Result<Option<SiteBinding>> {
        let output = match self.run_appcmd(&["list", "site", site_name, "/text:bindings"]) {
            Ok(out) => out,
            // An unknown site has no bindings.
            Err(err) if err.to_string().contains("Cannot find") => return Ok(None),
            Err(err) => return Err(CertBindError::store(err.to_string())),
        };

        let wanted = endpoint.binding_information();
        for (protocol, info) in parse_bindings(&output) {
            if protocol.eq_ignore_ascii_case("https") && info.eq_ignore_ascii_case(&wanted) {
                return Ok(Some(SiteBinding {
                    site_name: site_name.to_string(),
                    endpoint: endpoint.clone(),
                    // appcmd's bindings listing does not expose sslFlags;
                    // the reconciler only checks for presence.
                    sni: false,
                }));
            }
        }
        Ok(None)
    }

    fn remove_binding(&mut self, site_name: &str, endpoint: &BindingEndpoint) -> Result<()> {
        // Idempotent: nothing to do when the binding is absent.
        if self.find_binding(site_name, endpoint)?.is_none() {
            return Ok(());
        }

        let selector = format!(
            "/-bindings.[protocol='https',bindingInformation='{}']",
            endpoint.binding_information()
        );
        let site_arg = format!("/site.name:{}", site_name);
        self.run_appcmd(&["set", "site", &site_arg, &selector])
            .map(|_| ())
            .map_err(|err| CertBindError::binding_removal(err.to_string()))
    }

    fn create_binding(&mut self, spec: &BindingSpec) -> Result<()> {
        let selector = if spec.sni {
            format!(
                "/+bindings.[protocol='https',bindingInformation='{}',sslFlags='1']",
                spec.endpoint.binding_information()
            )
        } else {
            format!(
                "/+bindings.[protocol='https',bindingInformation='{}']",
                spec.endpoint.binding_information()
            )
        };
        let site_arg = format!("/site.name:{}", spec.site_name);
        self.run_appcmd(&["set", "site", &site_arg, &selector])
            .map(|_| ())
            .map_err(|err| CertBindError::binding_creation(err.to_string()))
    }

    fn find_ssl_binding(&self, endpoint: &BindingEndpoint) -> Result<Option<SslBinding>> {
        let (key, value) = netsh_endpoint(endpoint);
        let arg = format!("{}={}", key, value);
        let output = match self.run_netsh(&["http", "show", "sslcert", &arg]) {
            Ok(out) => out,
            // netsh reports a missing association as a failure.
            Err(err)
                if err.to_string().contains("cannot find")
                    || err.to_string().contains("does not exist") =>
            {
                return Ok(None)
            }
            Err(err) => return Err(CertBindError::store(err.to_string())),
        };

        Ok(parse_certificate_hash(&output).map(|thumbprint| SslBinding {
            endpoint: endpoint.clone(),
            thumbprint,
        }))
    }

    fn unbind_certificate(&mut self, endpoint: &BindingEndpoint) -> Result<()> {
        // Idempotent: nothing to do when no association exists.
        if self.find_ssl_binding(endpoint)?.is_none() {
            return Ok(());
        }

        let (key, value) = netsh_endpoint(endpoint);
        let arg = format!("{}={}", key, value);
        self.run_netsh(&["http", "delete", "sslcert", &arg])
            .map(|_| ())
            .map_err(|err| CertBindError::binding_removal(err.to_string()))
    }

    fn bind_certificate(&mut self, endpoint: &BindingEndpoint, thumbprint: &str) -> Result<()> {
        let (key, value) = netsh_endpoint(endpoint);
        let endpoint_arg = format!("{}={}", key, value);
        let hash_arg = format!("certhash={}", thumbprint.replace([':', ' '], ""));
        let appid_arg = format!("appid={}", IIS_APP_ID);
        self.run_netsh(&[
            "http",
            "add",
            "sslcert",
            &endpoint_arg,
            &hash_arg,
            &appid_arg,
            "certstorename=MY",
        ])
        .map(|_| ())
        .map_err(|err| CertBindError::binding_creation(err.to_string()))
    }
}

/// Run an administration tool and return its stdout on success.
fn run_tool(command: &mut Command, tool: &str) -> Result<String> {
    debug!(?command, "running {}", tool);

    let output = command.output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CertBindError::module_load(format!("{} is not available: {}", tool, err))
        } else {
            CertBindError::platform(format!("failed to run {}: {}", tool, err))
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(CertBindError::platform(format!(
            "{} exited with {}: {}",
            tool, output.status, message
        )))
    }
}

/// Parse appcmd's bindings text (`http/*:80:,https/*:443:`) into
/// (protocol, binding-information) pairs.
fn parse_bindings(text: &str) -> Vec<(String, String)> {
    text.trim()
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (protocol, info) = entry.split_once('/')?;
            if protocol.is_empty() {
                return None;
            }
            Some((protocol.to_string(), info.to_string()))
        })
        .collect()
}

/// The netsh selector for an endpoint: host-header bindings use
/// `hostnameport`, address bindings use `ipport` with the wildcard mapped
/// to `0.0.0.0`.
fn netsh_endpoint(endpoint: &BindingEndpoint) -> (&'static str, String) {
    match &endpoint.host_header {
        Some(host) => ("hostnameport", format!("{}:{}", host, endpoint.port)),
        None => {
            let ip = if endpoint.ip == "*" {
                "0.0.0.0"
            } else {
                endpoint.ip.as_str()
            };
            ("ipport", format!("{}:{}", ip, endpoint.port))
        }
    }
}

/// Pull the certificate hash out of `netsh http show sslcert` output.
fn parse_certificate_hash(output: &str) -> Option<String> {
    for line in output.lines() {
        let line = line.trim();
        if line.to_ascii_lowercase().starts_with("certificate hash") {
            let hash = line.rsplit(':').next()?.trim();
            if !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some(hash.to_ascii_uppercase());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bindings() {
        let parsed = parse_bindings("http/*:80:,https/*:443:,https/10.0.0.5:8443:shop.example.com");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], ("https".to_string(), "*:443:".to_string()));
        assert_eq!(
            parsed[2],
            (
                "https".to_string(),
                "10.0.0.5:8443:shop.example.com".to_string()
            )
        );
    }

    #[test]
    fn test_parse_bindings_empty() {
        assert!(parse_bindings("").is_empty());
        assert!(parse_bindings("\r\n").is_empty());
    }

    #[test]
    fn test_netsh_endpoint_wildcard() {
        let (key, value) = netsh_endpoint(&BindingEndpoint::new("*", 443));
        assert_eq!(key, "ipport");
        assert_eq!(value, "0.0.0.0:443");
    }

    #[test]
    fn test_netsh_endpoint_host_header() {
        let endpoint = BindingEndpoint::new("*", 443).with_host_header("shop.example.com");
        let (key, value) = netsh_endpoint(&endpoint);
        assert_eq!(key, "hostnameport");
        assert_eq!(value, "shop.example.com:443");
    }

    #[test]
    fn test_parse_certificate_hash() {
        let output = "\
    IP:port                      : 0.0.0.0:443\r\n\
    Certificate Hash             : a909502dd82ae41433e6f83886b00d4277a32a7b\r\n\
    Application ID               : {4dc3e181-e14b-4a21-b022-59fc669b0914}\r\n";
        assert_eq!(
            parse_certificate_hash(output).as_deref(),
            Some("A909502DD82AE41433E6F83886B00D4277A32A7B")
        );
    }

    #[test]
    fn test_parse_certificate_hash_absent() {
        assert_eq!(parse_certificate_hash("SSL Certificate bindings:\r\n"), None);
    }

    #[test]
    fn test_probe_missing_tool() {
        let store = IisBindingStore::with_appcmd("/nonexistent/appcmd.exe");
        let err = store.probe().unwrap_err();
        assert!(matches!(err, CertBindError::ModuleLoad(_)));
    }
}
