use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("sandboxing is not supported on this platform")]
    UnsupportedPlatform,

    #[error("failed to prepare work directory {path}: {source}")]
    WorkDirSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare extra bind path {path}: {source}")]
    ExtraBindSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve the current executable: {0}")]
    SelfExeResolution(String),

    #[error("`{binary}` not found on PATH")]
    BinaryNotFound { binary: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_platform_message() {
        assert_eq!(
            LaunchError::UnsupportedPlatform.to_string(),
            "sandboxing is not supported on this platform"
        );
    }

    #[test]
    fn binary_not_found_names_the_binary() {
        let err = LaunchError::BinaryNotFound {
            binary: "bwrap".into(),
        };
        assert_eq!(err.to_string(), "`bwrap` not found on PATH");
    }
}
