//! Wire protocol between the host and an in-sandbox worker: the
//! `HostMessage`/`WorkerMessage` envelope types and the newline-delimited,
//! self-describing JSON codec that frames them over a pipe.

mod codec;
mod error;
mod message;

pub use codec::{Decoder, Encoder};
pub use error::DecodeError;
pub use message::{ExecId, HostMessage, WorkerMessage};
