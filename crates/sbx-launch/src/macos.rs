use std::ffi::OsString;
use std::path::Path;

use crate::common::LaunchConfig;
use crate::error::LaunchError;

/// Always-writable paths macOS itself routes temp files through; without
/// these a confined process can't even create its own scratch files.
const SYSTEM_TMP_PATHS: &[&str] = &[
    "/tmp",
    "/private/tmp",
    "/private/var/tmp",
    "/var/folders",
    "/private/var/folders",
    "/dev",
];

/// Escapes a path for embedding in an SBPL string literal: SBPL strings use
/// the same `\`/`"` escaping as Scheme, so an unescaped path containing a
/// `"` could otherwise close the literal early and inject arbitrary profile
/// clauses.
fn escape_sbpl_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds the SBPL profile text for `sandbox-exec -p`. SBPL evaluates rules
/// in order and the last matching one wins, so deny rules must come after
/// `(allow default)` to take effect at all, and the credential denies here
/// are placed after every `allow` (work dir, extra binds, system tmp) so
/// that a `--dir`/`--bind` equal to (or an ancestor of) `$HOME` can't have
/// its `allow` shadow the `.ssh`/`.aws` deny underneath it.
///
/// If `$HOME` can't be resolved there is nothing to deny against, so this
/// falls back to a bare `(allow default)` profile and logs a warning rather
/// than failing the launch outright.
pub fn build_profile(config: &LaunchConfig) -> String {
    let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) else {
        tracing::warn!("HOME is unset; sandbox-exec profile will not deny credential reads");
        return "(version 1)\n(allow default)\n".to_string();
    };

    let mut profile = String::from("(version 1)\n(allow default)\n");

    // `config.work_dir`/`config.extra_binds` are expected already resolved
    // through symlinks (`prepare` does this before dispatching here), so a
    // single `subpath` rule per path is enough — no separate rule needed
    // for a pre-resolution alias of the same directory.
    let work_dir = escape_sbpl_string(&config.work_dir.display().to_string());
    profile.push_str(&format!("(allow file-write* (subpath \"{work_dir}\"))\n"));

    for bind in &config.extra_binds {
        let bind = escape_sbpl_string(&bind.display().to_string());
        profile.push_str(&format!("(allow file-write* (subpath \"{bind}\"))\n"));
    }

    for path in SYSTEM_TMP_PATHS {
        profile.push_str(&format!("(allow file-write* (subpath \"{path}\"))\n"));
    }

    let ssh = home.join(".ssh");
    let ssh = escape_sbpl_string(&ssh.display().to_string());
    profile.push_str(&format!("(deny file-read* (subpath \"{ssh}\"))\n"));
    profile.push_str(&format!("(deny file-write* (subpath \"{ssh}\"))\n"));

    if config.block_aws_credentials {
        let aws = home.join(".aws");
        let aws = escape_sbpl_string(&aws.display().to_string());
        profile.push_str(&format!("(deny file-read* (subpath \"{aws}\"))\n"));
        profile.push_str(&format!("(deny file-write* (subpath \"{aws}\"))\n"));
    }

    profile.push_str("(allow process-exec (subpath \"/\"))\n");
    profile.push_str("(allow process-fork)\n");
    profile.push_str("(allow network*)\n");
    profile.push_str("(allow mach-lookup)\n");
    profile.push_str("(allow signal)\n");
    profile.push_str("(allow sysctl-read)\n");
    profile
}

/// Builds the full `sandbox-exec` argv that runs `self_exe sandbox-worker`
/// confined by `profile`.
pub fn build_argv(profile: &str, self_exe: &Path) -> Result<Vec<OsString>, LaunchError> {
    let sandbox_exec = which::which("sandbox-exec").map_err(|_| LaunchError::BinaryNotFound {
        binary: "sandbox-exec".into(),
    })?;
    Ok(vec![
        sandbox_exec.into_os_string(),
        OsString::from("-p"),
        OsString::from(profile),
        self_exe.as_os_str().to_owned(),
        OsString::from("sandbox-worker"),
    ])
}
