use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type EbpfResult<T> = Result<T, EbpfError>;

#[derive(Debug, Error)]
pub enum EbpfError {
    // environment
    #[error("bpf fs path ({0:?}) is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to stat bpf fs path {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checking if BPF file system path is empty failed: {0}")]
    ReadDir(#[source] std::io::Error),

    #[error("mounting BPF file system failed: {0}")]
    Mount(#[source] std::io::Error),

    #[error("making directory for tc globals pinning failed: {0}")]
    CreateDir(#[source] std::io::Error),

    // external process
    #[error("computing flags for {program} failed: {message}")]
    Flags { program: String, message: String },

    #[error("unexpected exit code: {code}, err: {message}")]
    Process { code: i32, message: String },

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{0} was cancelled before it finished")]
    Cancelled(String),

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

/// One failing unit of a loader batch
#[derive(Debug)]
pub struct ProgramFailure {
    pub program: String,
    pub error: EbpfError,
}

/// Every failure of a batch, reported together once the batch has finished
#[derive(Debug)]
pub struct BatchFailure {
    pub failures: Vec<ProgramFailure>,
}

impl BatchFailure {
    pub fn programs(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.program.as_str()).collect()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.program, failure.error))
            .collect();

        write!(
            f,
            "loading and attaching bpf programs failed:\n\t{}",
            lines.join("\n\t")
        )
    }
}

impl std::error::Error for BatchFailure {}
