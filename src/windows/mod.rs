// SPDX-License-Identifier: Apache-2.0

//! Windows platform integration.
//!
//! Real backends for the two store interfaces the reconciler composes:
//!
//! - [`certstore::MachineCertStore`]: the LocalMachine\My certificate store
//!   via CryptoAPI.
//! - [`iis::IisBindingStore`]: IIS site bindings via `appcmd.exe` and
//!   HTTP.sys SSL certificate associations via `netsh http`.
//!
//! Plus [`identity::machine_name`] for the local-certificate exclusion
//! filter and [`is_elevated`] for the pre-run privilege warning.
//!
//! Certificate store operations require Windows; on other platforms they
//! return a `Platform` error. The binding backend shells out to Windows
//! administration tools and degrades the same way when they are absent.

pub mod certstore;
pub mod identity;
pub mod iis;

pub use certstore::MachineCertStore;
pub use iis::IisBindingStore;

use crate::error::CertBindError;

/// Check if the current process has administrator privileges.
///
/// LocalMachine certificate store writes and IIS configuration changes
/// both require elevation.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use std::mem::MaybeUninit;
    use windows::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = windows::Win32::Foundation::HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }

        let mut elevation = MaybeUninit::<TOKEN_ELEVATION>::uninit();
        let mut size = 0u32;

        let result = GetTokenInformation(
            token,
            TokenElevation,
            Some(elevation.as_mut_ptr() as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );

        if result.is_ok() {
            elevation.assume_init().TokenIsElevated != 0
        } else {
            false
        }
    }
}

/// Non-Windows stub; elevation is a Windows concept here.
#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    false
}

/// Create a platform error from the last Windows API error.
#[allow(dead_code)]
pub(crate) fn windows_api_error(operation: &str) -> CertBindError {
    #[cfg(windows)]
    {
        use windows::Win32::Foundation::GetLastError;
        let code = unsafe { GetLastError() };
        CertBindError::platform(format!("{}: Windows error 0x{:08X}", operation, code.0))
    }
    #[cfg(not(windows))]
    {
        CertBindError::platform(format!("{}: not running on Windows", operation))
    }
}
