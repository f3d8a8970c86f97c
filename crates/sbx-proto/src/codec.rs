use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::DecodeError;

/// Max single-frame length, newline included. A runaway peer that never
/// sends `\n` (corrupt or hostile) must not make a reader buffer
/// unboundedly while it waits for one.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Writes newline-delimited JSON frames to an async sink, flushing after
/// every message so a frame is never left sitting in a userspace buffer.
/// Each `HostMessage`/`WorkerMessage` is a self-describing tagged object
/// (serde's derived enum representation names the variant and its fields),
/// so the schema stays compatible as fields are added: an older decoder
/// ignores fields it doesn't recognize rather than misreading a positional
/// byte layout.
pub struct Encoder<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encodes and flushes one message. Returns the number of bytes written
    /// to the underlying sink, trailing newline included.
    pub async fn encode<M: Serialize>(&mut self, msg: &M) -> Result<usize, DecodeError> {
        let mut payload = serde_json::to_vec(msg).map_err(DecodeError::from_json)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(payload.len())
    }
}

/// Reads newline-delimited JSON frames from an async source. Internally
/// buffered so short reads off a pipe get coalesced into whole lines.
pub struct Decoder<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Decodes exactly one message. A clean EOF at a frame boundary (zero
    /// bytes read for the next line) surfaces as [`DecodeError::Eof`]; an
    /// EOF partway through a frame, or a line exceeding the max frame
    /// length, is a protocol violation and surfaces as
    /// [`DecodeError::Corrupt`].
    pub async fn decode<M: DeserializeOwned>(&mut self) -> Result<M, DecodeError> {
        let mut line = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_FRAME_LEN)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(DecodeError::Eof);
        }
        if line.last() != Some(&b'\n') {
            return Err(DecodeError::Corrupt(
                "stream ended mid-frame or frame exceeds max length".into(),
            ));
        }
        line.pop();
        serde_json::from_slice(&line).map_err(DecodeError::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HostMessage, WorkerMessage};
    use std::collections::HashMap;

    #[tokio::test]
    async fn round_trips_a_host_message() {
        let (client, server) = tokio::io::duplex(4096);
        let mut enc = Encoder::new(client);
        let mut dec = Decoder::new(server);

        let msg = HostMessage::Exec {
            id: 1,
            argv: vec![b"echo".to_vec(), b"hi".to_vec()],
            dir: "/work".into(),
            env: HashMap::new(),
        };
        enc.encode(&msg).await.unwrap();
        let decoded: HostMessage = dec.decode().await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn round_trips_several_worker_messages_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let mut enc = Encoder::new(client);
        let mut dec = Decoder::new(server);

        let msgs = vec![
            WorkerMessage::Ready,
            WorkerMessage::Stdout {
                id: 1,
                data: b"out".to_vec(),
            },
            WorkerMessage::Stderr {
                id: 1,
                data: b"err".to_vec(),
            },
            WorkerMessage::done_ok(1, 0),
        ];
        for msg in &msgs {
            enc.encode(msg).await.unwrap();
        }
        for expected in &msgs {
            let decoded: WorkerMessage = dec.decode().await.unwrap();
            assert_eq!(&decoded, expected);
        }
    }

    #[tokio::test]
    async fn decode_on_clean_close_is_eof() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);
        let mut dec = Decoder::new(server);
        let err = dec.decode::<WorkerMessage>().await.unwrap_err();
        assert!(matches!(err, DecodeError::Eof));
    }

    #[tokio::test]
    async fn decode_on_truncated_frame_is_corrupt() {
        let (mut client, server) = tokio::io::duplex(4096);
        // A partial frame with no closing newline, then the stream closes.
        client.write_all(br#"{"Ready":null"#).await.unwrap();
        client.flush().await.unwrap();
        drop(client);

        let mut dec = Decoder::new(server);
        let err = dec.decode::<WorkerMessage>().await.unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_buffering_it_all() {
        let (mut client, server) = tokio::io::duplex(1 << 20);
        // No newline anywhere in this much data; the reader must give up
        // once it crosses `MAX_FRAME_LEN` rather than buffer forever.
        let junk = vec![b'a'; (MAX_FRAME_LEN as usize) + 1024];
        tokio::spawn(async move {
            let _ = client.write_all(&junk).await;
        });

        let mut dec = Decoder::new(server);
        let err = dec.decode::<WorkerMessage>().await.unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_corrupt_not_a_panic() {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"not json at all\n").await.unwrap();
        client.flush().await.unwrap();

        let mut dec = Decoder::new(server);
        let err = dec.decode::<WorkerMessage>().await.unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));
    }
}
