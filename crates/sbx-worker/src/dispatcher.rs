use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::process::Stdio;
use std::sync::Arc;

use sbx_proto::{DecodeError, Decoder, Encoder, ExecId, HostMessage, WorkerMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

const OUTPUT_CHUNK_SIZE: usize = 4096;

type StdinSenders = Arc<Mutex<HashMap<ExecId, mpsc::UnboundedSender<Vec<u8>>>>>;

/// Runs the worker's stdin-dispatch loop to completion. Emits `Ready`, then
/// reads [`HostMessage`]s from `stdin` until the host closes its end, at
/// which point this returns `Ok(())`. Any other decode failure is a
/// protocol violation and is returned as an error so the caller can exit
/// non-zero.
pub async fn run<R, W>(stdin: R, stdout: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let encoder = Arc::new(Mutex::new(Encoder::new(stdout)));
    encoder.lock().await.encode(&WorkerMessage::Ready).await?;

    let mut decoder = Decoder::new(stdin);
    let stdin_senders: StdinSenders = Arc::new(Mutex::new(HashMap::new()));

    loop {
        match decoder.decode::<HostMessage>().await {
            Ok(HostMessage::Exec { id, argv, dir, env }) => {
                spawn_exec(id, argv, dir, env, stdin_senders.clone(), encoder.clone()).await;
            }
            Ok(HostMessage::Stdin { id, data }) => {
                if data.is_empty() {
                    continue;
                }
                let sender = stdin_senders.lock().await.get(&id).cloned();
                if let Some(sender) = sender {
                    let _ = sender.send(data);
                }
            }
            Ok(HostMessage::StdinEof { id }) => {
                // Dropping the sender closes the channel; the exec task's
                // receiver loop sees `None` and shuts down the child's stdin.
                stdin_senders.lock().await.remove(&id);
            }
            Err(DecodeError::Eof) => {
                tracing::info!("host closed stdin; shutting down");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "fatal protocol error on stdin");
                return Err(e.into());
            }
        }
    }
}

async fn spawn_exec<W>(
    id: ExecId,
    argv: Vec<Vec<u8>>,
    dir: String,
    env: HashMap<String, String>,
    stdin_senders: StdinSenders,
    encoder: Arc<Mutex<Encoder<W>>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    if argv.is_empty() {
        tokio::spawn(async move {
            send(&encoder, WorkerMessage::done_failed(id, "no command specified")).await;
        });
        return;
    }

    // Insert the stdin route before the exec task starts so a `Stdin(id)`
    // frame that arrives immediately after this `Exec` is never dropped.
    let (tx, rx) = mpsc::unbounded_channel();
    stdin_senders.lock().await.insert(id, tx);

    tokio::spawn(async move {
        run_one_exec(id, argv, dir, env, rx, encoder).await;
        stdin_senders.lock().await.remove(&id);
    });
}

async fn run_one_exec<W>(
    id: ExecId,
    argv: Vec<Vec<u8>>,
    dir: String,
    env: HashMap<String, String>,
    mut stdin_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    encoder: Arc<Mutex<Encoder<W>>>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut cmd = Command::new(OsString::from_vec(argv[0].clone()));
    for arg in &argv[1..] {
        cmd.arg(OsString::from_vec(arg.clone()));
    }
    cmd.current_dir(&dir);
    if !env.is_empty() {
        cmd.env_clear();
        cmd.envs(env);
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    // SAFETY: setsid() is async-signal-safe and runs before exec, isolating
    // the child in its own process group so it can be reaped independently.
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            send(
                &encoder,
                WorkerMessage::done_failed(id, format!("failed to spawn command: {e}")),
            )
            .await;
            return;
        }
    };

    let mut child_stdin = child.stdin.take();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        send(
            &encoder,
            WorkerMessage::done_failed(id, "child was spawned without piped stdout/stderr"),
        )
        .await;
        let _ = child.start_kill();
        return;
    };

    // Detached, not joined: per spec, `Done` follows as soon as both output
    // pumps reach EOF and the child is reaped, regardless of whether the
    // host has finished routing this id's stdin yet. This task ends itself
    // once `spawn_exec`'s wrapper removes `id` from `stdin_senders` after
    // `run_one_exec` returns, which drops the sender and closes `stdin_rx`.
    tokio::spawn(async move {
        while let Some(chunk) = stdin_rx.recv().await {
            let Some(stdin) = child_stdin.as_mut() else {
                break;
            };
            if stdin.write_all(&chunk).await.is_err() {
                // Child closed its stdin early; not a protocol error.
                break;
            }
        }
        if let Some(mut stdin) = child_stdin.take() {
            let _ = stdin.shutdown().await;
        }
    });

    tokio::join!(
        pump_output(stdout, id, OutputKind::Stdout, encoder.clone()),
        pump_output(stderr, id, OutputKind::Stderr, encoder.clone()),
    );

    let (exit_code, error) = match child.wait().await {
        Ok(status) => match status.code() {
            Some(code) => (code, String::new()),
            // No exit code means the child was killed by a signal; per spec
            // this counts as "status unavailable" and must populate `error`
            // rather than silently reporting a plain `exit 1`.
            None => {
                use std::os::unix::process::ExitStatusExt;
                (1, format!("terminated by signal {}", status.signal().unwrap_or(-1)))
            }
        },
        Err(e) => (1, format!("failed to wait for child: {e}")),
    };

    send(&encoder, WorkerMessage::Done { id, exit_code, error }).await;
}

enum OutputKind {
    Stdout,
    Stderr,
}

async fn pump_output<R, W>(mut reader: R, id: ExecId, kind: OutputKind, encoder: Arc<Mutex<Encoder<W>>>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let data = buf[..n].to_vec();
        let msg = match kind {
            OutputKind::Stdout => WorkerMessage::Stdout { id, data },
            OutputKind::Stderr => WorkerMessage::Stderr { id, data },
        };
        send(&encoder, msg).await;
    }
}

async fn send<W: AsyncWrite + Unpin>(encoder: &Arc<Mutex<Encoder<W>>>, msg: WorkerMessage) {
    if let Err(e) = encoder.lock().await.encode(&msg).await {
        tracing::warn!(error = %e, "failed to write frame to host");
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
