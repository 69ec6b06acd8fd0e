/// Child process plumbing for the external downloader.
///
/// LEARNING: tokio::process::Command is the async version of std::process::Command.
/// It spawns a child process without blocking the async runtime, so other
/// downloads can proceed concurrently.
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Everything needed to launch one download. Derived from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub executable: String,
    pub target_url: String,
    pub output_template: PathBuf,
    pub args: Vec<String>,
}

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub bytes: Vec<u8>,
}

/// A launched child plus the merged, ordered feed of its two pipes.
pub struct RunningProcess {
    child: Child,
    output: mpsc::Receiver<OutputChunk>,
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Launch the child. Fails only if the OS refuses to start it.
    pub fn spawn(invocation: &ProcessInvocation) -> io::Result<RunningProcess> {
        let mut child = Command::new(&invocation.executable)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, output) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, OutputStream::Stderr, tx));
        }

        Ok(RunningProcess { child, output })
    }
}

impl RunningProcess {
    /// Next chunk from either pipe; `None` once both pipes are closed.
    pub async fn next_output(&mut self) -> Option<OutputChunk> {
        self.output.recv().await
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Force the child down. Errors are logged, not returned: the child
    /// may already have exited on its own.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill downloader process: {}", e);
        }
    }
}

async fn pump<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Pipe {:?} read error: {}", stream, e);
                break;
            }
        }
    }
}
