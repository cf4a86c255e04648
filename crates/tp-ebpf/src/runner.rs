use crate::error::EbpfError;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A fully computed call of one external program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the inherited parent environment
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// The line echoed to the stdout sink before the program runs
    pub fn running_line(&self) -> String {
        let env: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        format!(
            "Running: {} {} {}\n",
            env.join(" "),
            self.command.display(),
            self.args.join(" ")
        )
    }
}

/// What a finished (or abandoned) invocation produced
#[derive(Debug)]
pub struct RunOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub result: Result<(), EbpfError>,
}

impl RunOutcome {
    pub fn failed(error: EbpfError) -> Self {
        Self {
            stdout: vec![],
            stderr: vec![],
            result: Err(error),
        }
    }
}

/// Executes invocations; the seam the loader is tested through
pub trait ProgramRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> impl Future<Output = RunOutcome> + Send;
}

/// Runs programs as child processes with a per-invocation timeout.
///
/// Cancelling the token kills the child in flight and makes every later
/// invocation fail with [`EbpfError::Cancelled`] without being spawned.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// How long to keep draining pipes once the child is gone. A grandchild that
/// inherited them can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

async fn capture(mut reader: impl AsyncRead + Unpin, buffer: Captured) {
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => lock(&buffer).extend_from_slice(&chunk[..n]),
        }
    }
}

fn lock(buffer: &Captured) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgramRunner for CommandRunner {
    async fn run(&self, invocation: &Invocation) -> RunOutcome {
        let command = invocation.command.display().to_string();

        if self.cancel.is_cancelled() {
            return RunOutcome::failed(EbpfError::Cancelled(command));
        }

        let child = Command::new(&invocation.command)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(source) => return RunOutcome::failed(EbpfError::Spawn { command, source }),
        };

        // read while the child runs so a killed child still leaves its output
        let stdout = Captured::default();
        let stderr = Captured::default();
        let mut readers = vec![];
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(capture(pipe, stdout.clone())));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(capture(pipe, stderr.clone())));
        }

        let waited = tokio::select! {
            _ = self.cancel.cancelled() => Err(EbpfError::Cancelled(command.clone())),
            waited = tokio::time::timeout(self.timeout, child.wait()) => match waited {
                Err(_) => Err(EbpfError::Timeout {
                    command: command.clone(),
                    timeout: self.timeout,
                }),
                Ok(Err(err)) => Err(EbpfError::Process {
                    code: -1,
                    message: err.to_string(),
                }),
                Ok(Ok(status)) => Ok(status),
            }
        };

        if waited.is_err() {
            debug!(command = %command, "Killing loader program");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        for mut reader in readers {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let result = match waited {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(EbpfError::Process {
                code: status.code().unwrap_or(-1),
                message: status.to_string(),
            }),
            Err(error) => Err(error),
        };

        RunOutcome {
            stdout: std::mem::take(&mut *lock(&stdout)),
            stderr: std::mem::take(&mut *lock(&stderr)),
            result,
        }
    }
}

/// Destinations for the forwarded output of loader programs
pub struct OutputSinks {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl OutputSinks {
    pub fn new(stdout: impl Write + Send + 'static, stderr: impl Write + Send + 'static) -> Self {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self::stdio()
    }
}
