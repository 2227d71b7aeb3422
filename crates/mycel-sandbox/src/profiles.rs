// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tracing::warn;

/// Resource budget applied to a sandboxed tool before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxProfile {
    pub name: &'static str,
    /// Address-space cap in MiB.
    pub rlimit_as_mb: u64,
    /// CPU seconds.
    pub rlimit_cpu_sec: u64,
    /// Largest file the tool may create, MiB.
    pub rlimit_fsize_mb: u64,
    /// Open file descriptors.
    pub rlimit_nofile: u64,
    /// Child processes/threads.
    pub rlimit_nproc: u64,
    /// Network namespace isolation (bwrap mode only).
    pub unshare_net: bool,
}

/// The three built-in profiles. Tools pick one by name; unknown names fall
/// back to `standard`.
pub const SANDBOX_PROFILES: [SandboxProfile; 3] = [
    SandboxProfile {
        name: "restrictive",
        rlimit_as_mb: 512,
        rlimit_cpu_sec: 60,
        rlimit_fsize_mb: 64,
        rlimit_nofile: 128,
        rlimit_nproc: 32,
        unshare_net: true,
    },
    SandboxProfile {
        name: "standard",
        rlimit_as_mb: 2048,
        rlimit_cpu_sec: 300,
        rlimit_fsize_mb: 512,
        rlimit_nofile: 256,
        rlimit_nproc: 128,
        unshare_net: false,
    },
    SandboxProfile {
        name: "permissive",
        rlimit_as_mb: 8192,
        rlimit_cpu_sec: 1800,
        rlimit_fsize_mb: 4096,
        rlimit_nofile: 1024,
        rlimit_nproc: 512,
        unshare_net: false,
    },
];

/// Resolve a profile by name. Unknown names warn and fall back to
/// `standard` so a config typo degrades safely instead of refusing to run.
pub fn get_profile(name: &str) -> &'static SandboxProfile {
    if let Some(profile) = SANDBOX_PROFILES.iter().find(|p| p.name == name) {
        return profile;
    }
    warn!(profile = name, "unknown sandbox profile, falling back to standard");
    SANDBOX_PROFILES
        .iter()
        .find(|p| p.name == "standard")
        .expect("standard profile is built in")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_profiles_resolve() {
        assert_eq!(get_profile("restrictive").rlimit_as_mb, 512);
        assert_eq!(get_profile("standard").rlimit_cpu_sec, 300);
        assert_eq!(get_profile("permissive").rlimit_nproc, 512);
    }

    #[test]
    fn unknown_falls_back_to_standard() {
        assert_eq!(get_profile("nonexistent"), get_profile("standard"));
    }

    #[test]
    fn every_profile_has_an_nproc_cap() {
        assert_eq!(get_profile("restrictive").rlimit_nproc, 32);
        assert_eq!(get_profile("standard").rlimit_nproc, 128);
        assert_eq!(get_profile("permissive").rlimit_nproc, 512);
    }

    #[test]
    fn only_restrictive_unshares_network() {
        assert!(get_profile("restrictive").unshare_net);
        assert!(!get_profile("standard").unshare_net);
        assert!(!get_profile("permissive").unshare_net);
    }
}
