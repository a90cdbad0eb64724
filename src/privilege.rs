//! Privilege-elevation check gating `CaptureController::start`.
//!
//! The original loads `advapi32.dll` at runtime and checks the process
//! token's elevation state, logging a warning (not a hard failure) if the
//! check itself can't be performed, and failing the check outright if the
//! process is not elevated. The portable equivalent here is whether the
//! process holds `CAP_SYS_PTRACE` (needed to attach to another process's
//! compositor/driver event stream), checked via the `caps` crate the
//! teacher already depends on for its own privilege-adjacent bookkeeping.

use caps::{CapSet, Capability};
use log::{error, warn};

pub trait PrivilegeChecker: Send + Sync {
    fn has_capture_privilege(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CapsPrivilegeChecker;

impl PrivilegeChecker for CapsPrivilegeChecker {
    fn has_capture_privilege(&self) -> bool {
        match caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_PTRACE) {
            Ok(true) => true,
            Ok(false) => {
                error!("missing CAP_SYS_PTRACE; run with elevated privileges to capture presents");
                false
            }
            Err(e) => {
                warn!("unable to detect privilege level: {e}");
                true
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::PrivilegeChecker;

    #[derive(Debug, Clone, Copy)]
    pub struct FixedPrivilegeChecker(pub bool);

    impl PrivilegeChecker for FixedPrivilegeChecker {
        fn has_capture_privilege(&self) -> bool {
            self.0
        }
    }
}
