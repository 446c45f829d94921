//! AppArmor profile management.

use std::path::Path;
use std::process::Command;

use berth_core::error::{BerthError, Result};

/// Name of the built-in default profile.
pub const DEFAULT_PROFILE: &str = "berth-default";

const ENABLED_PATH: &str = "/sys/module/apparmor/parameters/enabled";
const LOADED_PROFILES_PATH: &str = "/sys/kernel/security/apparmor/profiles";
const PROFILE_INSTALL_PATH: &str = "/etc/apparmor.d/berth-default";

const DEFAULT_PROFILE_TEMPLATE: &str = r#"#include <tunables/global>

profile berth-default flags=(attach_disconnected,mediate_deleted) {
  #include <abstractions/base>

  network,
  capability,
  file,
  umount,

  deny @{PROC}/sys/fs/** wklx,
  deny @{PROC}/sysrq-trigger rwklx,
  deny @{PROC}/mem rwklx,
  deny @{PROC}/kmem rwklx,
  deny mount,

  deny /sys/[^f]*/** wklx,
  deny /sys/f[^s]*/** wklx,
  deny /sys/fs/[^c]*/** wklx,
  deny /sys/fs/c[^g]*/** wklx,
  deny /sys/fs/cg[^r]*/** wklx,
  deny /sys/firmware/efi/efivars/** rwklx,
  deny /sys/kernel/security/** rwklx,
}
"#;

/// Whether AppArmor is enabled on the host.
pub fn is_enabled() -> bool {
    std::fs::read_to_string(ENABLED_PATH)
        .map(|v| v.trim_start().starts_with('Y'))
        .unwrap_or(false)
}

/// Whether a profile is currently loaded in the kernel.
pub fn is_loaded(name: &str) -> Result<bool> {
    let profiles = std::fs::read_to_string(LOADED_PROFILES_PATH).map_err(|e| {
        BerthError::ConfigError(format!("failed to read loaded AppArmor profiles: {}", e))
    })?;
    Ok(profile_in_list(&profiles, name))
}

/// Install and load the built-in default profile if it is not already loaded.
pub fn ensure_default_profile() -> Result<()> {
    if is_loaded(DEFAULT_PROFILE)? {
        return Ok(());
    }

    std::fs::write(PROFILE_INSTALL_PATH, DEFAULT_PROFILE_TEMPLATE).map_err(|e| {
        BerthError::ConfigError(format!(
            "failed to install default AppArmor profile at {}: {}",
            PROFILE_INSTALL_PATH, e
        ))
    })?;
    load_profile(PROFILE_INSTALL_PATH)
}

fn load_profile(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let output = Command::new("apparmor_parser")
        .arg("-Kr")
        .arg(path)
        .output()
        .map_err(|e| BerthError::ConfigError(format!("failed to run apparmor_parser: {}", e)))?;

    if !output.status.success() {
        return Err(BerthError::ConfigError(format!(
            "apparmor_parser failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Scan the kernel's loaded-profiles listing for a profile name.
///
/// Each line has the form `name (mode)`.
fn profile_in_list(profiles: &str, name: &str) -> bool {
    profiles
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|loaded| loaded == name)
}
