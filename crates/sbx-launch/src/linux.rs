use std::ffi::OsString;
use std::path::Path;

use crate::common::{credential_dirs, LaunchConfig};
use crate::error::LaunchError;

/// Builds the full `bwrap` argv (binary path included at index 0) that
/// confines `self_exe sandbox-worker` to `config`'s work directory.
///
/// `config.work_dir` and `config.extra_binds` are expected already resolved
/// to absolute, existing paths (`prepare` does this before dispatching
/// here) — `bwrap --bind` requires absolute source/destination paths, and a
/// relative one would resolve against the host's cwd rather than the
/// caller's intended location.
///
/// Mount order matters: the `/tmp` tmpfs is overlaid before `work_dir`'s
/// writable bind, so a work directory nested under `/tmp` ends up writable
/// rather than shadowed by the tmpfs (`bwrap` applies mounts in argv order,
/// last one wins). The credential-hiding tmpfs mounts are emitted *last*,
/// after `work_dir`/`extra_binds`, for the same reason in reverse: a
/// `--dir`/`--bind` equal to (or an ancestor of) `$HOME` must not have its
/// bind shadow the tmpfs that's supposed to hide `.ssh`/`.aws` underneath it.
pub fn build_argv(config: &LaunchConfig, self_exe: &Path) -> Result<Vec<OsString>, LaunchError> {
    let bwrap = which::which("bwrap").map_err(|_| LaunchError::BinaryNotFound {
        binary: "bwrap".into(),
    })?;

    let mut argv: Vec<OsString> = vec![bwrap.into_os_string()];

    argv.push(OsString::from("--ro-bind"));
    argv.push(OsString::from("/"));
    argv.push(OsString::from("/"));

    argv.push(OsString::from("--tmpfs"));
    argv.push(OsString::from("/tmp"));

    for bind in &config.extra_binds {
        argv.push(OsString::from("--bind"));
        argv.push(bind.clone().into_os_string());
        argv.push(bind.clone().into_os_string());
    }

    argv.push(OsString::from("--bind"));
    argv.push(config.work_dir.clone().into_os_string());
    argv.push(config.work_dir.clone().into_os_string());

    if let Some(dirs) = credential_dirs(config.block_aws_credentials) {
        for dir in dirs {
            argv.push(OsString::from("--tmpfs"));
            argv.push(dir.into_os_string());
        }
    }

    argv.push(OsString::from("--dev"));
    argv.push(OsString::from("/dev"));
    argv.push(OsString::from("--proc"));
    argv.push(OsString::from("/proc"));

    argv.push(OsString::from("--unshare-all"));
    argv.push(OsString::from("--share-net"));
    argv.push(OsString::from("--die-with-parent"));

    argv.push(OsString::from("--chdir"));
    argv.push(config.work_dir.clone().into_os_string());

    argv.push(self_exe.as_os_str().to_owned());
    argv.push(OsString::from("sandbox-worker"));

    Ok(argv)
}
