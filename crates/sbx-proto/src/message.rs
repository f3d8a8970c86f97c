use std::collections::HashMap;

/// Execution identifier. Non-zero and unique per live execution on a given
/// worker. `0` is reserved for the worker's startup [`WorkerMessage::Ready`].
pub type ExecId = u64;

/// A message sent host → worker.
///
/// `Exec` must be followed, in some interleaving, by zero or more `Stdin`
/// frames for the same id and exactly one `StdinEof` for that id. The host
/// may send `StdinEof` before the worker has acknowledged `Exec`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HostMessage {
    /// Start a new execution. `argv[0]` is the program; `argv` must be
    /// non-empty for the worker to actually spawn anything (an empty argv
    /// is a valid frame that the worker turns into a failed `Done`).
    Exec {
        id: ExecId,
        argv: Vec<Vec<u8>>,
        dir: String,
        /// Full replacement of the environment when non-empty; inherit the
        /// worker's own environment when empty.
        env: HashMap<String, String>,
    },
    /// A chunk of the execution's stdin. Recommended length 1..=65536.
    Stdin { id: ExecId, data: Vec<u8> },
    /// No more stdin will be sent for this execution.
    StdinEof { id: ExecId },
}

impl HostMessage {
    pub fn id(&self) -> ExecId {
        match self {
            Self::Exec { id, .. } | Self::Stdin { id, .. } | Self::StdinEof { id } => *id,
        }
    }
}

/// A message sent worker → host.
///
/// The worker emits exactly one `Done(id)` per accepted `Exec(id)`, and it
/// is always the final message bearing that id. `Ready` is emitted exactly
/// once, before any other worker→host message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WorkerMessage {
    /// Emitted once at worker startup; the worker is now accepting `Exec`.
    Ready,
    Stdout { id: ExecId, data: Vec<u8> },
    Stderr { id: ExecId, data: Vec<u8> },
    /// Final message for `id`. `exit_code` is `0` on success, the child's
    /// exit code otherwise, or `1` for a protocol-level failure (no command
    /// specified, spawn failed) — in which case `error` is non-empty.
    Done {
        id: ExecId,
        exit_code: i32,
        error: String,
    },
}

impl WorkerMessage {
    /// `0` for `Ready`, matching the wire convention that id 0 is reserved
    /// for the single startup message.
    pub fn id(&self) -> ExecId {
        match self {
            Self::Ready => 0,
            Self::Stdout { id, .. } | Self::Stderr { id, .. } | Self::Done { id, .. } => *id,
        }
    }

    pub fn done_ok(id: ExecId, exit_code: i32) -> Self {
        Self::Done {
            id,
            exit_code,
            error: String::new(),
        }
    }

    pub fn done_failed(id: ExecId, error: impl Into<String>) -> Self {
        Self::Done {
            id,
            exit_code: 1,
            error: error.into(),
        }
    }
}
