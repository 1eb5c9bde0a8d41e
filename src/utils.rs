//! Small free-standing helpers shared across subsystems: fingerprinting and architecture alias
//! normalization (§4.C, §4.D). Grounded on the teacher's `utils.rs` (`read_json_file`,
//! `write_json_file`, `canonicalize`) — those file-level helpers live in [`crate::fs`] here;
//! this module holds the pieces with no filesystem dependency.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

/// A stable, process-independent fingerprint over anything `Hash`. Used for the environment
/// delta cache key (§4.C step 1) and the supported-flags cache key (§4.D step 4).
pub fn fingerprint<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

pub fn fingerprint_hex<T: Hash>(value: &T) -> String {
    format!("{:016x}", fingerprint(value))
}

/// Normalizes architecture aliases per §4.D step 5: `x86_64`<->`x64`, `i686`<->`x86`,
/// `aarch64`<->`arm64`. Canonical form is the left-hand side of each pair.
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x64" => "x86_64",
        "x86" => "i686",
        "arm64" => "aarch64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = ("gcc", "x86_64", "x86_64");
        let b = ("gcc", "x86_64", "x86_64");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_inputs() {
        let a = ("gcc", "x86_64");
        let b = ("llvm", "x86_64");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn arch_aliases_normalize() {
        assert_eq!(normalize_arch("x64"), "x86_64");
        assert_eq!(normalize_arch("x86"), "i686");
        assert_eq!(normalize_arch("arm64"), "aarch64");
        assert_eq!(normalize_arch("aarch64"), "aarch64");
    }
}
