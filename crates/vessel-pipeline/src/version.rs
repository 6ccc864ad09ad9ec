//! Library version reporting.
//!
//! Manifests embed the engine version.  Tests inject a fixed string through
//! `TestParams::injected_library_version` so golden outputs stay stable.

use std::sync::{Mutex, OnceLock};

fn injected() -> &'static Mutex<Option<String>> {
    static INJECTED: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    INJECTED.get_or_init(|| Mutex::new(None))
}

/// The version reported in generated manifests.
pub fn library_version() -> String {
    injected()
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

/// Override the reported version for the lifetime of the process.
pub fn set_version_for_testing(version: &str) {
    *injected().lock().unwrap() = Some(version.to_string());
}

#[cfg(test)]
mod tests {
    use super::library_version;

    #[test]
    fn default_version_is_the_crate_version() {
        // The injection override is process-global, so only assert the
        // fallback shape here.
        assert!(!library_version().is_empty());
    }
}
