//! Process image-name resolution and liveness checks.
//!
//! The original resolves these through `OpenProcess`/`QueryFullProcessImageNameA`;
//! this is exactly the kind of OS-specific identifier the portable core treats
//! as opaque and binds through a small shim (section 9). The default shim
//! here reads `/proc` directly, matching the teacher's own reliance on the
//! `procfs` crate for process introspection.

use procfs::process::Process;

/// External collaborator the correlator consults to resolve a pid to an
/// image name and to check liveness. Mockable for deterministic tests.
pub trait ProcessLookup: Send + Sync {
    /// Resolves `pid`'s image (executable) name. Returns `"<error>"` if the
    /// process cannot be queried, matching the original's fallback string.
    fn image_name(&self, pid: u32) -> String;
    fn is_alive(&self, pid: u32) -> bool;
}

/// `/proc`-backed implementation used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsLookup;

impl ProcessLookup for ProcfsLookup {
    fn image_name(&self, pid: u32) -> String {
        Process::new(pid as i32)
            .and_then(|p| p.exe())
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "<error>".to_string())
    }

    fn is_alive(&self, pid: u32) -> bool {
        Process::new(pid as i32).is_ok()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::ProcessLookup;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deterministic in-memory stand-in for tests: processes are "alive" iff
    /// present in the map, and resolve to the given name.
    #[derive(Default)]
    pub struct FakeProcessLookup {
        processes: Mutex<HashMap<u32, String>>,
    }

    impl FakeProcessLookup {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, pid: u32, name: &str) {
            self.processes.lock().unwrap().insert(pid, name.to_string());
        }

        pub fn kill(&self, pid: u32) {
            self.processes.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessLookup for FakeProcessLookup {
        fn image_name(&self, pid: u32) -> String {
            self.processes
                .lock()
                .unwrap()
                .get(&pid)
                .cloned()
                .unwrap_or_else(|| "<error>".to_string())
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.processes.lock().unwrap().contains_key(&pid)
        }
    }
}
