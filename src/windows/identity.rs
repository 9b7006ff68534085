// SPDX-License-Identifier: Apache-2.0

//! Machine name lookup.
//!
//! The reconciler uses the machine's own name to recognize the self-signed
//! machine identity certificate during subject matching, so that a
//! wildcard-style subject prefix never selects it by accident.

/// The local machine's name.
///
/// On Windows this is the NetBIOS computer name. Elsewhere it falls back
/// to the `COMPUTERNAME`/`HOSTNAME` environment variables and finally the
/// `hostname` utility. Returns an empty string when nothing is available;
/// an empty name disables the local-certificate exclusion filter rather
/// than failing the run.
pub fn machine_name() -> String {
    #[cfg(windows)]
    {
        if let Some(name) = netbios_name() {
            return name;
        }
    }

    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|n| !n.is_empty())
        .or_else(hostname_command)
        .unwrap_or_default()
}

#[cfg(windows)]
fn netbios_name() -> Option<String> {
    use windows::Win32::System::SystemInformation::{
        ComputerNameNetBIOS, GetComputerNameExW,
    };

    let mut size = 0u32;
    unsafe {
        // First call sizes the buffer.
        let _ = GetComputerNameExW(ComputerNameNetBIOS, windows::core::PWSTR::null(), &mut size);
    }
    if size == 0 {
        return None;
    }

    let mut buffer = vec![0u16; size as usize];
    let result = unsafe {
        GetComputerNameExW(
            ComputerNameNetBIOS,
            windows::core::PWSTR(buffer.as_mut_ptr()),
            &mut size,
        )
    };
    if result.is_err() {
        return None;
    }

    buffer.truncate(size as usize);
    let name = String::from_utf16_lossy(&buffer);
    if name.is_empty() { None } else { Some(name) }
}

fn hostname_command() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() { None } else { Some(name) }
}
