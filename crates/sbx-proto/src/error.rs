#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("I/O error decoding frame: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Corrupt(String),

    /// Clean end of stream between frames. On host→worker this is a clean
    /// worker shutdown signal; on worker→host it means the worker died.
    #[error("end of stream")]
    Eof,
}

impl DecodeError {
    /// A `serde_json` failure means the frame itself decoded but its
    /// contents didn't parse; frame-boundary EOF is detected separately by
    /// [`crate::Decoder::decode`] before this is ever called.
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_maps_to_corrupt_variant() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        assert!(matches!(DecodeError::from_json(err), DecodeError::Corrupt(_)));
    }

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(DecodeError::Eof.to_string(), "end of stream");
        assert_eq!(
            DecodeError::Corrupt("bad tag".into()).to_string(),
            "malformed frame: bad tag"
        );
    }
}
