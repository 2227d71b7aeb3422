// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Child command construction for both isolation modes.
//!
//! `direct` runs the tool-runner as a plain child process (rlimits only);
//! `bwrap` wraps it in bubblewrap with whitelist mounts. The mount set is
//! deliberately enumerated — never `--ro-bind / /` — so the sandbox sees
//! only the toolchain, TLS trust, DNS config, the read-only tools dir and
//! its own work directory.

use std::path::Path;

use crate::profiles::SandboxProfile;
use crate::invocation::INVOCATION_SPEC_FILENAME;

/// Subcommand of the host binary that runs a tool from an invocation spec.
pub const TOOL_RUNNER_SUBCOMMAND: &str = "tool-runner";

/// Plain child-process command: `{runner_bin} tool-runner --spec {spec}`.
/// Resource limits are applied by the spawner's pre-exec hook.
pub fn build_direct_command(runner_bin: &str, work_dir: &Path) -> Vec<String> {
    vec![
        runner_bin.to_string(),
        TOOL_RUNNER_SUBCOMMAND.to_string(),
        "--spec".to_string(),
        work_dir
            .join(INVOCATION_SPEC_FILENAME)
            .to_string_lossy()
            .into_owned(),
    ]
}

/// Whitelist filesystem mounts shared by every bwrap invocation.
///
/// `/lib`, `/lib64`, `/bin` and `/sbin` are preserved as symlinks when the
/// host expresses them that way (merged-usr distributions), bind-mounted
/// otherwise. Optional single files are included only when present.
pub fn build_filesystem_mounts(tools_dir: Option<&str>) -> Vec<String> {
    let mut mounts = vec!["--ro-bind".into(), "/usr".into(), "/usr".into()];

    for dir in ["/lib", "/lib64", "/bin", "/sbin"] {
        if std::path::Path::new(dir).is_symlink() {
            if let Ok(target) = std::fs::read_link(dir) {
                mounts.push("--symlink".into());
                mounts.push(target.to_string_lossy().into_owned());
                mounts.push(dir.into());
            }
        } else if std::path::Path::new(dir).exists() {
            mounts.push("--ro-bind".into());
            mounts.push(dir.into());
            mounts.push(dir.into());
        }
    }

    for file in [
        "/etc/resolv.conf",
        "/etc/ssl",
        "/etc/ld.so.cache",
        "/etc/localtime",
        "/etc/nsswitch.conf",
        "/etc/hosts",
    ] {
        if std::path::Path::new(file).exists() {
            mounts.push("--ro-bind".into());
            mounts.push(file.into());
            mounts.push(file.into());
        }
    }

    if let Some(tools_dir) = tools_dir {
        mounts.push("--ro-bind".into());
        mounts.push(tools_dir.into());
        mounts.push(tools_dir.into());
    }

    mounts
}

/// Full bubblewrap command line for one invocation.
pub fn build_bwrap_command(
    runner_bin: &str,
    work_dir: &Path,
    tools_dir: Option<&str>,
    profile: &SandboxProfile,
) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "bwrap".into(),
        "--die-with-parent".into(),
        "--unshare-pid".into(),
        "--unshare-user".into(),
        "--clearenv".into(),
        "--setenv".into(),
        "PATH".into(),
        "/usr/bin:/bin".into(),
        "--setenv".into(),
        "HOME".into(),
        work_dir.to_string_lossy().into_owned(),
        "--uid".into(),
        "65534".into(),
        "--gid".into(),
        "65534".into(),
        "--proc".into(),
        "/proc".into(),
        "--tmpfs".into(),
        "/tmp".into(),
    ];

    if profile.unshare_net {
        cmd.push("--unshare-net".into());
    }

    cmd.extend(build_filesystem_mounts(tools_dir));

    // The work directory is the only writable host path.
    let work = work_dir.to_string_lossy().into_owned();
    cmd.push("--bind".into());
    cmd.push(work.clone());
    cmd.push(work);

    // Never leak mounted service-account credentials into the sandbox.
    cmd.push("--tmpfs".into());
    cmd.push("/var/run/secrets".into());

    cmd.extend(build_direct_command(runner_bin, work_dir));
    cmd
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
