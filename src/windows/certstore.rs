// SPDX-License-Identifier: Apache-2.0

//! LocalMachine certificate store backend.
//!
//! Implements [`CertificateStore`] against the Windows `LocalMachine\My`
//! store using CryptoAPI:
//!
//! - Subject lookups enumerate the store and apply the shared
//!   [`subject_matches`] filter, so the backend and the in-memory fake
//!   select identically.
//! - PFX import goes through `PFXImportCertStore` with the machine-keyset
//!   flag (and the exportable flag when requested), then moves each
//!   contained certificate into the open store.
//! - Deletion finds the context by SHA-1 hash and removes it together with
//!   a best-effort delete of its private key container.
//!
//! All operations require Windows and, for writes, an elevated process.

use std::path::Path;

use crate::error::{CertBindError, Result};
use crate::store::{CertificateRecord, CertificateStore};
#[cfg(windows)]
use crate::store::subject_matches;

#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CertCloseStore, CertOpenStore, HCERTSTORE, CERT_STORE_PROV_SYSTEM_W,
    CERT_SYSTEM_STORE_LOCAL_MACHINE,
};

/// Handle to the machine's personal certificate store.
pub struct MachineCertStore {
    #[cfg(windows)]
    handle: HCERTSTORE,
    #[cfg(not(windows))]
    _marker: std::marker::PhantomData<()>,
}

// SAFETY: store handles may be moved between threads; CryptoAPI store
// operations are internally synchronized.
#[cfg(windows)]
unsafe impl Send for MachineCertStore {}

impl MachineCertStore {
    /// Open `LocalMachine\My`.
    ///
    /// Write operations on this store require administrator privileges.
    pub fn open() -> Result<Self> {
        Self::open_named("My")
    }

    /// Open a named LocalMachine store.
    pub fn open_named(name: &str) -> Result<Self> {
        #[cfg(windows)]
        {
            let wide_name = to_wide(name);

            let handle = unsafe {
                CertOpenStore(
                    CERT_STORE_PROV_SYSTEM_W,
                    0,
                    None,
                    CERT_SYSTEM_STORE_LOCAL_MACHINE,
                    Some(wide_name.as_ptr() as *const _),
                )
            };

            match handle {
                Ok(h) if !h.is_invalid() => Ok(Self { handle: h }),
                _ => Err(super::windows_api_error(&format!(
                    "Failed to open certificate store LocalMachine\\{}",
                    name
                ))),
            }
        }

        #[cfg(not(windows))]
        {
            let _ = name;
            Err(CertBindError::platform(
                "certificate store operations require Windows",
            ))
        }
    }
}

#[cfg(windows)]
impl Drop for MachineCertStore {
    fn drop(&mut self) {
        unsafe {
            let _ = CertCloseStore(self.handle, 0);
        }
    }
}

impl CertificateStore for MachineCertStore {
    fn find_by_subject_prefix(&self, prefix: &str) -> Result<Vec<CertificateRecord>> {
        #[cfg(windows)]
        {
            use windows::Win32::Security::Cryptography::{
                CertEnumCertificatesInStore, CERT_CONTEXT,
            };

            let mut records = Vec::new();
            let mut context: *const CERT_CONTEXT = std::ptr::null();

            loop {
                context = unsafe { CertEnumCertificatesInStore(self.handle, Some(context)) };
                if context.is_null() {
                    break;
                }

                if let Some(record) = extract_record(context) {
                    if subject_matches(&record.subject, prefix) {
                        records.push(record);
                    }
                }
            }

            Ok(records)
        }

        #[cfg(not(windows))]
        {
            let _ = prefix;
            Err(CertBindError::platform(
                "certificate store operations require Windows",
            ))
        }
    }

    fn import_pfx(&mut self, path: &Path, password: &str, exportable: bool) -> Result<()> {
        #[cfg(windows)]
        {
            use windows::Win32::Security::Cryptography::{
                CertAddCertificateContextToStore, CertEnumCertificatesInStore,
                PFXImportCertStore, CERT_CONTEXT, CERT_STORE_ADD_REPLACE_EXISTING,
                CRYPT_EXPORTABLE, CRYPT_INTEGER_BLOB, CRYPT_MACHINE_KEYSET,
            };

            let data = std::fs::read(path).map_err(|e| {
                CertBindError::import(format!("cannot read PFX file {}: {}", path.display(), e))
            })?;

            let blob = CRYPT_INTEGER_BLOB {
                cbData: data.len() as u32,
                pbData: data.as_ptr() as *mut _,
            };

            let wide_password = to_wide(password);
            let mut flags = CRYPT_MACHINE_KEYSET;
            if exportable {
                flags |= CRYPT_EXPORTABLE;
            }

            let pfx_store = unsafe {
                PFXImportCertStore(
                    &blob,
                    windows::core::PCWSTR(wide_password.as_ptr()),
                    flags,
                )
            };

            let pfx_store = match pfx_store {
                Ok(h) if !h.is_invalid() => h,
                _ => {
                    return Err(CertBindError::import(format!(
                        "PFXImportCertStore failed for {} (wrong password or malformed file)",
                        path.display()
                    )));
                }
            };

            // Move every certificate in the PFX into the open store.
            let mut imported = 0usize;
            let mut context: *const CERT_CONTEXT = std::ptr::null();
            loop {
                context = unsafe { CertEnumCertificatesInStore(pfx_store, Some(context)) };
                if context.is_null() {
                    break;
                }

                let added = unsafe {
                    CertAddCertificateContextToStore(
                        self.handle,
                        context,
                        CERT_STORE_ADD_REPLACE_EXISTING,
                        None,
                    )
                };
                if added.is_ok() {
                    imported += 1;
                }
            }

            unsafe {
                let _ = CertCloseStore(pfx_store, 0);
            }

            if imported == 0 {
                return Err(CertBindError::import(format!(
                    "{} contained no importable certificates",
                    path.display()
                )));
            }
            Ok(())
        }

        #[cfg(not(windows))]
        {
            let _ = (path, password, exportable);
            Err(CertBindError::platform(
                "certificate store operations require Windows",
            ))
        }
    }

    fn delete_by_thumbprint(&mut self, thumbprint: &str) -> Result<()> {
        #[cfg(windows)]
        {
            use windows::Win32::Security::Cryptography::{
                CertDeleteCertificateFromStore, CertFindCertificateInStore, CERT_FIND_HASH,
                CRYPT_INTEGER_BLOB,
            };

            let hash = parse_thumbprint(thumbprint)?;
            let hash_blob = CRYPT_INTEGER_BLOB {
                cbData: hash.len() as u32,
                pbData: hash.as_ptr() as *mut _,
            };

            let context = unsafe {
                CertFindCertificateInStore(
                    self.handle,
                    X509_AND_PKCS7_ENCODING,
                    0,
                    CERT_FIND_HASH,
                    Some(&hash_blob as *const _ as *const _),
                    None,
                )
            };

            if context.is_null() {
                return Err(CertBindError::delete(format!(
                    "no certificate with thumbprint {} in store",
                    thumbprint
                )));
            }

            // Best effort: remove the private key container first. The key
            // survives the certificate context otherwise.
            delete_private_key(context);

            let deleted = unsafe { CertDeleteCertificateFromStore(context) };
            if deleted.is_err() {
                return Err(CertBindError::delete(format!(
                    "failed to delete certificate {}: {}",
                    thumbprint,
                    super::windows_api_error("CertDeleteCertificateFromStore")
                )));
            }
            Ok(())
        }

        #[cfg(not(windows))]
        {
            let _ = thumbprint;
            Err(CertBindError::platform(
                "certificate store operations require Windows",
            ))
        }
    }
}

/// X509_ASN_ENCODING | PKCS_7_ASN_ENCODING
#[cfg(windows)]
const X509_AND_PKCS7_ENCODING: u32 = 0x00000001;

#[cfg(windows)]
fn to_wide(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;

    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// Parse a hex thumbprint (with or without separators) into SHA-1 bytes.
#[cfg(windows)]
fn parse_thumbprint(thumbprint: &str) -> Result<Vec<u8>> {
    let bytes: Vec<u8> = thumbprint
        .replace([':', ' ', '-'], "")
        .as_bytes()
        .chunks(2)
        .filter_map(|chunk| {
            std::str::from_utf8(chunk)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        })
        .collect();

    if bytes.len() != 20 {
        return Err(CertBindError::store(format!(
            "invalid SHA-1 thumbprint length: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Build a [`CertificateRecord`] from a certificate context.
#[cfg(windows)]
fn extract_record(
    context: *const windows::Win32::Security::Cryptography::CERT_CONTEXT,
) -> Option<CertificateRecord> {
    use windows::Win32::Security::Cryptography::{
        CertGetCertificateContextProperty, CertGetNameStringW, CERT_HASH_PROP_ID,
        CERT_KEY_PROV_INFO_PROP_ID, CERT_NAME_RDN_TYPE,
    };

    let info = unsafe { (*context).pCertInfo };
    if info.is_null() {
        return None;
    }

    // Full X.500 subject string.
    let subject = unsafe {
        let len = CertGetNameStringW(context, CERT_NAME_RDN_TYPE, 0, None, None);
        if len <= 1 {
            return None;
        }
        let mut buffer = vec![0u16; len as usize];
        CertGetNameStringW(context, CERT_NAME_RDN_TYPE, 0, None, Some(&mut buffer));
        String::from_utf16_lossy(&buffer[..buffer.len().saturating_sub(1)])
    };

    // SHA-1 hash property, hex-encoded without separators.
    let thumbprint = unsafe {
        let mut size = 0u32;
        if CertGetCertificateContextProperty(context, CERT_HASH_PROP_ID, None, &mut size).is_err()
        {
            return None;
        }
        let mut hash = vec![0u8; size as usize];
        if CertGetCertificateContextProperty(
            context,
            CERT_HASH_PROP_ID,
            Some(hash.as_mut_ptr() as *mut _),
            &mut size,
        )
        .is_err()
        {
            return None;
        }
        hash.iter().map(|b| format!("{:02X}", b)).collect::<String>()
    };

    // Key provider info presence is the signal for an importable private
    // key; the store does not expose the original exportable flag.
    let has_key = unsafe {
        let mut size = 0u32;
        CertGetCertificateContextProperty(context, CERT_KEY_PROV_INFO_PROP_ID, None, &mut size)
            .is_ok()
    };

    let (not_before, not_after) = unsafe {
        (
            filetime_to_string(&(*info).NotBefore),
            filetime_to_string(&(*info).NotAfter),
        )
    };

    Some(CertificateRecord {
        thumbprint,
        subject,
        not_before,
        not_after,
        exportable: has_key,
    })
}

/// Render a FILETIME as RFC 3339 UTC.
#[cfg(windows)]
fn filetime_to_string(ft: &windows::Win32::Foundation::FILETIME) -> String {
    // FILETIME counts 100ns intervals since 1601-01-01.
    const EPOCH_DIFF_SECS: i64 = 11_644_473_600;

    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    let unix_secs = (ticks / 10_000_000) as i64 - EPOCH_DIFF_SECS;

    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// Delete the private key container behind a certificate context.
///
/// Failures are ignored: the certificate delete proceeds regardless, and a
/// stranded key container is preferable to a stranded certificate.
#[cfg(windows)]
fn delete_private_key(context: *const windows::Win32::Security::Cryptography::CERT_CONTEXT) {
    use windows::Win32::Security::Cryptography::{
        CryptAcquireCertificatePrivateKey, NCryptDeleteKey, CERT_KEY_SPEC,
        CRYPT_ACQUIRE_ONLY_NCRYPT_KEY_FLAG, HCRYPTPROV_OR_NCRYPT_KEY_HANDLE,
    };

    unsafe {
        let mut handle = HCRYPTPROV_OR_NCRYPT_KEY_HANDLE::default();
        let mut key_spec = CERT_KEY_SPEC::default();
        let mut caller_free = windows::Win32::Foundation::BOOL::default();

        let acquired = CryptAcquireCertificatePrivateKey(
            context,
            CRYPT_ACQUIRE_ONLY_NCRYPT_KEY_FLAG,
            None,
            &mut handle,
            Some(&mut key_spec),
            Some(&mut caller_free),
        );

        if acquired.is_ok() && handle.0 != 0 {
            let _ = NCryptDeleteKey(
                windows::Win32::Security::Cryptography::NCRYPT_KEY_HANDLE(handle.0),
                0,
            );
        }
    }
}
