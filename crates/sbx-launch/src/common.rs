use std::path::{Path, PathBuf};

use crate::error::LaunchError;

/// Inputs to a sandbox launch: the directory the confined command runs in,
/// any additional host paths it needs writable access to, and whether AWS
/// credential files should be hidden in addition to SSH ones.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub work_dir: PathBuf,
    pub extra_binds: Vec<PathBuf>,
    pub block_aws_credentials: bool,
}

/// Resolves `work_dir` through any symlinks to an absolute real path,
/// creating it with mode `0755` first if it does not exist.
pub fn prepare_work_dir(work_dir: &Path) -> Result<PathBuf, LaunchError> {
    if !work_dir.exists() {
        create_dir_0755(work_dir)?;
    }
    std::fs::canonicalize(work_dir).map_err(|source| LaunchError::WorkDirSetup {
        path: work_dir.to_path_buf(),
        source,
    })
}

/// Creates `path` (and its missing parents) if absent, then resolves it to
/// an absolute real path through any symlinks — both `bwrap --bind` and the
/// SBPL `subpath` clauses require absolute paths, and a bind given relative
/// to the host's cwd would otherwise bind (or allow) the wrong location, or
/// one inconsistent between the sandbox's two ends of the same `--bind` pair.
pub fn prepare_extra_bind(path: &Path) -> Result<PathBuf, LaunchError> {
    if !path.exists() {
        create_dir_0755(path)?;
    }
    std::fs::canonicalize(path).map_err(|source| LaunchError::ExtraBindSetup {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn create_dir_0755(path: &Path) -> Result<(), LaunchError> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|source| LaunchError::WorkDirSetup {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
fn create_dir_0755(path: &Path) -> Result<(), LaunchError> {
    std::fs::create_dir_all(path).map_err(|source| LaunchError::WorkDirSetup {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the path of the currently running executable. Test binaries
/// live under `target/<profile>/deps/<crate>-<hash>`; when the running
/// executable looks like one of those, search the current working directory
/// and two levels up for a sibling binary named `expected_name`, the way an
/// integration test invokes the real `sbx` binary it was built alongside.
pub fn resolve_self_exe(expected_name: &str) -> Result<PathBuf, LaunchError> {
    let current =
        std::env::current_exe().map_err(|e| LaunchError::SelfExeResolution(e.to_string()))?;

    if !looks_like_test_harness(&current) {
        return Ok(current);
    }

    let cwd = std::env::current_dir().map_err(|e| LaunchError::SelfExeResolution(e.to_string()))?;
    for base in [cwd.clone(), cwd.join(".."), cwd.join("../..")] {
        for profile_dir in ["target/debug", "target/release"] {
            let candidate = base.join(profile_dir).join(expected_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(LaunchError::SelfExeResolution(format!(
        "running inside a test harness ({}) but no sibling `{expected_name}` binary was found \
         in the working directory or its two parent directories",
        current.display()
    )))
}

fn looks_like_test_harness(exe: &Path) -> bool {
    let in_deps_dir = exe
        .parent()
        .map(|p| p.file_name() == Some(std::ffi::OsStr::new("deps")))
        .unwrap_or(false);
    let basename_has_hash_suffix = exe
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.rsplit_once('-').is_some_and(|(_, suffix)| {
            !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit())
        }))
        .unwrap_or(false);
    in_deps_dir && basename_has_hash_suffix
}

/// Locates the host's `$HOME/.ssh` and (optionally) `$HOME/.aws` directories,
/// returning only the ones that actually exist on disk. `None` if `HOME`
/// isn't set at all.
pub fn credential_dirs(block_aws_credentials: bool) -> Option<Vec<PathBuf>> {
    let Some(home) = std::env::var_os("HOME") else {
        tracing::warn!("HOME is unset; sandbox will not hide credential directories");
        return None;
    };
    let home = PathBuf::from(home);
    let mut dirs = Vec::new();

    let ssh = home.join(".ssh");
    if ssh.exists() {
        dirs.push(ssh);
    }
    if block_aws_credentials {
        let aws = home.join(".aws");
        if aws.exists() {
            dirs.push(aws);
        }
    }
    Some(dirs)
}
