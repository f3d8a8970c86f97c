//! Builds the platform-specific confinement invocation (a `bwrap` argv on
//! Linux, a `sandbox-exec` argv plus SBPL profile on macOS) that launches the
//! worker binary inside the OS sandbox.

mod common;
mod error;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

pub use common::LaunchConfig;
pub use error::LaunchError;

use std::ffi::OsString;
use std::path::PathBuf;

/// A ready-to-spawn command: `argv[0]` is the confinement binary itself
/// (`bwrap` or `sandbox-exec`), the rest is its arguments, ending in
/// `<self_exe> sandbox-worker`.
#[derive(Debug, Clone)]
pub struct LaunchRecipe {
    pub argv: Vec<OsString>,
    pub work_dir: PathBuf,
}

/// Resolves the common preconditions (work dir, self-exe) and dispatches to
/// the current platform's sandbox policy. Any OS other than Linux and macOS
/// fails with [`LaunchError::UnsupportedPlatform`].
pub fn prepare(config: &LaunchConfig) -> Result<LaunchRecipe, LaunchError> {
    let work_dir = common::prepare_work_dir(&config.work_dir)?;
    let extra_binds = config
        .extra_binds
        .iter()
        .map(|bind| common::prepare_extra_bind(bind))
        .collect::<Result<Vec<_>, _>>()?;
    let resolved_config = LaunchConfig {
        work_dir: work_dir.clone(),
        extra_binds,
        ..config.clone()
    };
    let self_exe = common::resolve_self_exe("sbx")?;

    let argv = build_argv_for_platform(&resolved_config, &self_exe)?;

    Ok(LaunchRecipe { argv, work_dir })
}

#[cfg(target_os = "linux")]
fn build_argv_for_platform(
    config: &LaunchConfig,
    self_exe: &std::path::Path,
) -> Result<Vec<OsString>, LaunchError> {
    linux::build_argv(config, self_exe)
}

#[cfg(target_os = "macos")]
fn build_argv_for_platform(
    config: &LaunchConfig,
    self_exe: &std::path::Path,
) -> Result<Vec<OsString>, LaunchError> {
    let profile = macos::build_profile(config);
    macos::build_argv(&profile, self_exe)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn build_argv_for_platform(
    _config: &LaunchConfig,
    _self_exe: &std::path::Path,
) -> Result<Vec<OsString>, LaunchError> {
    Err(LaunchError::UnsupportedPlatform)
}
