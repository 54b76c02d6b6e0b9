//! Startup requirement validation for node-nanny.
//!
//! This module validates that the scanner has the permissions it needs
//! before the scan loop starts.

use nix::unistd::geteuid;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Validate all runtime requirements
pub fn validate_requirements(proc_root: &Path) -> Result<(), RequirementError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges();
    check_proc_access(proc_root)?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Warns when processes of other users cannot be signalled.
pub fn check_user_privileges() -> bool {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - processes of other users cannot be killed");
        warn!("   Recommendation: Run as root so the memory limit can be enforced");
        false
    } else {
        info!("✅ Running as root (uid=0)");
        true
    }
}

/// Check that /proc/meminfo and the status file of init are readable
pub fn check_proc_access(proc_root: &Path) -> Result<(), RequirementError> {
    let meminfo = proc_root.join("meminfo");
    if let Err(e) = fs::metadata(&meminfo) {
        error!("❌ Cannot read {}: {}", meminfo.display(), e);
        return Err(RequirementError::ProcUnavailable(format!(
            "{}: {}",
            meminfo.display(),
            e
        )));
    }

    let test_file = proc_root.join("1").join("status");
    match fs::read_to_string(&test_file) {
        Ok(_) => {
            info!("✅ /proc access: Can read process status files");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            error!("❌ Cannot read {} - insufficient permissions", test_file.display());
            error!("   Processes of other users will not be accounted for!");
            error!("   Check the hidepid mount option of /proc or run as root.");
            Err(RequirementError::InsufficientPermissions(e.to_string()))
        }
        Err(e) => {
            warn!("⚠️  Could not test /proc access: {}", e);
            Ok(()) // Continue but warn
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequirementError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("/proc not available: {0}")]
    ProcUnavailable(String),
}
