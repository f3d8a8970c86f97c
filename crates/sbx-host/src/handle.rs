use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use sbx_launch::LaunchConfig;
use sbx_proto::{Decoder, Encoder, ExecId, HostMessage, WorkerMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::error::HostError;

/// One worker process and its I/O endpoints, owned exclusively by whoever
/// currently holds it (the pool between executions, the caller during one).
pub struct WorkerHandle {
    child: Child,
    encoder: Encoder<ChildStdin>,
    decoder: Decoder<ChildStdout>,
    work_dir: std::path::PathBuf,
    dead: bool,
    next_id: u64,
}

/// One execution to run on a handle, with the caller's I/O endpoints. A
/// `None` stdin means the child gets an immediate `StdinEOF`; a `None`
/// stdout/stderr sink means that stream is read and discarded.
pub struct ExecRequest {
    pub argv: Vec<Vec<u8>>,
    pub dir: String,
    pub env: HashMap<String, String>,
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub error: String,
}

impl WorkerHandle {
    /// Launches the sandbox recipe for `config`, wires its stdio as pipes
    /// (stderr passes through to the host's own stderr), and requires a
    /// `Ready` frame within `ready_deadline`.
    pub async fn spawn(config: &LaunchConfig, ready_deadline: Duration) -> Result<Self, HostError> {
        let recipe = sbx_launch::prepare(config)?;

        let mut cmd = Command::new(&recipe.argv[0]);
        cmd.args(&recipe.argv[1..]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| HostError::StartError(format!("failed to spawn sandbox: {e}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(HostError::StartError(
                "child was spawned without piped stdin/stdout".into(),
            ));
        };
        let encoder = Encoder::new(stdin);
        let mut decoder = Decoder::new(stdout);

        let first = tokio::time::timeout(ready_deadline, decoder.decode::<WorkerMessage>())
            .await
            .map_err(|_| HostError::StartError("worker did not send Ready before deadline".into()))?
            .map_err(|e| HostError::StartError(format!("failed to read startup frame: {e}")))?;

        if !matches!(first, WorkerMessage::Ready) {
            let _ = child.start_kill();
            return Err(HostError::StartError(format!(
                "expected Ready as the worker's first frame, got {first:?}"
            )));
        }

        Ok(Self {
            child,
            encoder,
            decoder,
            work_dir: recipe.work_dir,
            dead: false,
            next_id: 1,
        })
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// The sandbox's work directory after symlink resolution and
    /// auto-creation, i.e. the same absolute path bound read-write inside
    /// the sandbox — callers building an [`ExecRequest`] use this, not
    /// their own unresolved `--dir` input, since the worker's `chdir`
    /// target must match what was actually bound.
    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    /// Runs one execution to completion: writes the `Exec` frame, then runs
    /// the stdin pump and the output reader loop concurrently. Any failure
    /// along the way marks this handle dead so the pool replaces it on the
    /// next `acquire`. `cancellation` is honored up to the point `Exec` is
    /// written; once the execution is in flight, cancelling it closes the
    /// handle outright (per spec, a half-consumed stream cannot be
    /// resynchronized without a per-id abort protocol the wire format
    /// doesn't have) and returns [`HostError::Cancelled`].
    #[tracing::instrument(skip_all, fields(exec_id))]
    pub async fn exec(
        &mut self,
        req: ExecRequest,
        cancellation: CancellationToken,
    ) -> Result<ExecOutcome, HostError> {
        if self.dead {
            return Err(HostError::WorkerDead);
        }
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            self.dead = true;
            return Err(HostError::WorkerDead);
        }
        if cancellation.is_cancelled() {
            return Err(HostError::Cancelled);
        }

        let id = self.next_id;
        self.next_id += 1;
        tracing::Span::current().record("exec_id", id);

        let exec_msg = HostMessage::Exec {
            id,
            argv: req.argv,
            dir: req.dir,
            env: req.env,
        };
        if let Err(e) = self.encoder.encode(&exec_msg).await {
            self.dead = true;
            return Err(HostError::ProtocolError(e.to_string()));
        }

        // `demux_reader` alone decides when this call returns: a caller stdin
        // source that never hits EOF (e.g. an interactive terminal) must not
        // block `exec()` after the worker has already sent `Done`. `pump_fut`
        // races alongside and, if `demux_fut` wins first, is simply dropped —
        // cancelling whatever read it was blocked on. The worker already
        // tolerates this: it drops its own stdin route (and the detached
        // forwarding task riding on it) as soon as `Done` is sent, independent
        // of whether a `StdinEof` for this id ever arrives.
        let demux_fut = demux_reader(id, &mut self.decoder, req.stdout, req.stderr);
        tokio::pin!(demux_fut);
        let pump_fut = pump_stdin(id, req.stdin, &mut self.encoder);
        tokio::pin!(pump_fut);

        let mut pump_done = false;
        let mut pump_result: Result<(), HostError> = Ok(());

        let reader_result = loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    self.dead = true;
                    let _ = self.child.start_kill();
                    return Err(HostError::Cancelled);
                }
                result = &mut demux_fut => {
                    break result;
                }
                result = &mut pump_fut, if !pump_done => {
                    pump_done = true;
                    pump_result = result;
                }
            }
        };

        match (reader_result, pump_result) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => {
                // The reader saw a clean `Done`, but the stdin pump itself
                // failed (e.g. the caller's own stdin source errored) —
                // the handle's stdin half is in an unknown state, so treat
                // it as fatal per spec's "mark dead on any error" rule.
                self.dead = true;
                Err(e)
            }
            (Err(e), _) => {
                self.dead = true;
                Err(e)
            }
        }
    }

    /// Idempotent: kills the child if it's still alive and marks this
    /// handle dead. A handle already dead is a no-op.
    pub fn close(&mut self) {
        if self.dead {
            return;
        }
        self.dead = true;
        let _ = self.child.start_kill();
    }
}

/// Copies caller stdin into `HostMessage::Stdin` frames, always finishing
/// with `StdinEof` even if the copy itself failed partway through: the
/// worker's stdin-routing task only ends on `StdinEof` (or a decode error),
/// so skipping it after a read/encode failure would leave the worker's
/// `stdin_rx.recv()` loop — and the child's real stdin pipe — blocked
/// forever rather than surfacing the error.
async fn pump_stdin(
    id: ExecId,
    stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    encoder: &mut Encoder<ChildStdin>,
) -> Result<(), HostError> {
    let copy_result = copy_stdin(id, stdin, encoder).await;

    let eof_result = encoder
        .encode(&HostMessage::StdinEof { id })
        .await
        .map(|_| ())
        .map_err(|e| HostError::ProtocolError(e.to_string()));

    copy_result.and(eof_result)
}

async fn copy_stdin(
    id: ExecId,
    stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    encoder: &mut Encoder<ChildStdin>,
) -> Result<(), HostError> {
    let Some(mut reader) = stdin else {
        return Ok(());
    };
    let mut buf = vec![0u8; 4096];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| HostError::ProtocolError(format!("reading caller stdin: {e}")))?;
        if n == 0 {
            return Ok(());
        }
        encoder
            .encode(&HostMessage::Stdin {
                id,
                data: buf[..n].to_vec(),
            })
            .await
            .map_err(|e| HostError::ProtocolError(e.to_string()))?;
    }
}

async fn demux_reader(
    id: ExecId,
    decoder: &mut Decoder<ChildStdout>,
    mut stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    mut stderr: Option<Box<dyn AsyncWrite + Send + Unpin>>,
) -> Result<ExecOutcome, HostError> {
    loop {
        match decoder.decode::<WorkerMessage>().await {
            Ok(WorkerMessage::Stdout { id: fid, data }) if fid == id => {
                if !data.is_empty() {
                    if let Some(sink) = stdout.as_mut() {
                        // The consumer may have lost interest; a write
                        // failure here does not fail the execution.
                        let _ = sink.write_all(&data).await;
                    }
                }
            }
            Ok(WorkerMessage::Stderr { id: fid, data }) if fid == id => {
                if !data.is_empty() {
                    if let Some(sink) = stderr.as_mut() {
                        let _ = sink.write_all(&data).await;
                    }
                }
            }
            Ok(WorkerMessage::Done {
                id: fid,
                exit_code,
                error,
            }) if fid == id => {
                return Ok(ExecOutcome { exit_code, error });
            }
            // A frame tagged with a different id, or a stray `Ready`,
            // cannot happen on a handle that runs one execution at a time;
            // ignore rather than treat as fatal.
            Ok(_) => continue,
            Err(e) => return Err(HostError::ProtocolError(e.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
