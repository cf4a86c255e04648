use crate::error::{BatchFailure, EbpfError, EbpfResult, ProgramFailure};
use crate::runner::{Invocation, OutputSinks, ProgramRunner, RunOutcome};
use futures::future::join_all;
use std::io::Write;
use std::path::PathBuf;
use tp_core::{Config, LoadPolicy};
use tracing::{debug, info, warn};

type FlagsFn = Box<dyn Fn(&Config) -> anyhow::Result<Vec<String>> + Send + Sync>;

/// One unit of redirection logic: an external loader binary plus the
/// arguments it needs for the current configuration
pub struct Program {
    pub name: String,
    flags: FlagsFn,
}

impl Program {
    pub fn new<F>(name: impl Into<String>, flags: F) -> Self
    where
        F: Fn(&Config) -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            flags: Box::new(flags),
        }
    }

    pub fn flags(&self, config: &Config) -> anyhow::Result<Vec<String>> {
        (self.flags)(config)
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program").field("name", &self.name).finish()
    }
}

/// Runs a batch of loader programs. Every program is attempted; failures are
/// collected and returned together once the batch is over.
pub struct Loader<R> {
    runner: R,
    policy: LoadPolicy,
    source_path: PathBuf,
    env: Vec<(String, String)>,
}

impl<R: ProgramRunner> Loader<R> {
    pub fn new(runner: R, source_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            policy: LoadPolicy::Sequential,
            source_path: source_path.into(),
            env: vec![],
        }
    }

    pub fn with_policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn prepare(&self, program: &Program, config: &Config) -> EbpfResult<Invocation> {
        let args = program.flags(config).map_err(|err| EbpfError::Flags {
            program: program.name.clone(),
            message: format!("{:#}", err),
        })?;

        Ok(Invocation {
            command: self.source_path.join(&program.name),
            args,
            env: self.env.clone(),
        })
    }

    pub async fn load_and_attach(
        &self,
        programs: &[Program],
        config: &Config,
        sinks: &mut OutputSinks,
    ) -> EbpfResult<()> {
        let units: Vec<(&str, EbpfResult<Invocation>)> = programs
            .iter()
            .map(|program| (program.name.as_str(), self.prepare(program, config)))
            .collect();

        let mut failures = vec![];

        match self.policy {
            LoadPolicy::Sequential => {
                for (name, prepared) in units {
                    let outcome = match &prepared {
                        Ok(invocation) => {
                            forward(&mut sinks.stdout, invocation.running_line().as_bytes());
                            debug!(program = %name, args = ?invocation.args, "Running loader program");
                            Some(self.runner.run(invocation).await)
                        }
                        Err(_) => None,
                    };
                    record(name, prepared, outcome, sinks, &mut failures);
                }
            }
            LoadPolicy::Concurrent => {
                let outcomes = join_all(units.iter().map(|(name, prepared)| async move {
                    match prepared {
                        Ok(invocation) => {
                            debug!(program = %name, args = ?invocation.args, "Running loader program");
                            Some(self.runner.run(invocation).await)
                        }
                        Err(_) => None,
                    }
                }))
                .await;

                for ((name, prepared), outcome) in units.into_iter().zip(outcomes) {
                    if let Ok(invocation) = &prepared {
                        forward(&mut sinks.stdout, invocation.running_line().as_bytes());
                    }
                    record(name, prepared, outcome, sinks, &mut failures);
                }
            }
        }

        for sink in [&mut sinks.stdout, &mut sinks.stderr] {
            if let Err(err) = sink.flush() {
                warn!(error = %err, "Failed to flush loader output");
            }
        }

        if failures.is_empty() {
            info!(count = programs.len(), "Loaded and attached bpf programs");
            Ok(())
        } else {
            Err(BatchFailure { failures }.into())
        }
    }
}

fn forward(sink: &mut dyn Write, bytes: &[u8]) {
    if let Err(err) = sink.write_all(bytes) {
        warn!(error = %err, "Failed to forward loader output");
    }
}

/// Forward a unit's output and remember it if it failed
fn record(
    name: &str,
    prepared: EbpfResult<Invocation>,
    outcome: Option<RunOutcome>,
    sinks: &mut OutputSinks,
    failures: &mut Vec<ProgramFailure>,
) {
    let error = match (prepared, outcome) {
        (Err(error), _) => Some(error),
        (Ok(_), None) => None,
        (Ok(_), Some(outcome)) => {
            forward(&mut sinks.stdout, &outcome.stdout);
            forward(&mut sinks.stderr, &outcome.stderr);

            match outcome.result {
                Ok(()) => {
                    forward(&mut sinks.stdout, b"\n");
                    None
                }
                Err(error) => Some(error),
            }
        }
    };

    if let Some(error) = error {
        warn!(program = %name, error = %error, "Loader program failed");
        failures.push(ProgramFailure {
            program: name.to_string(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Records every invocation; programs whose name is in `failing` exit 1
    #[derive(Default)]
    struct FakeRunner {
        failing: Vec<String>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ProgramRunner for FakeRunner {
        async fn run(&self, invocation: &Invocation) -> RunOutcome {
            self.calls.lock().unwrap().push(invocation.clone());
            let name = invocation
                .command
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string();

            if self.failing.contains(&name) {
                RunOutcome {
                    stdout: vec![],
                    stderr: format!("{} exploded\n", name).into_bytes(),
                    result: Err(EbpfError::Process {
                        code: 1,
                        message: "exit status: 1".into(),
                    }),
                }
            } else {
                RunOutcome {
                    stdout: format!("{} ok\n", name).into_bytes(),
                    stderr: vec![],
                    result: Ok(()),
                }
            }
        }
    }

    fn static_program(name: &str) -> Program {
        let arg = format!("--{}", name);
        Program::new(name, move |_| Ok(vec![arg.clone()]))
    }

    fn sinks() -> (OutputSinks, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        (OutputSinks::new(out.clone(), err.clone()), out, err)
    }

    #[tokio::test]
    async fn middle_failure_does_not_stop_the_batch() {
        for policy in [LoadPolicy::Sequential, LoadPolicy::Concurrent] {
            let runner = FakeRunner {
                failing: vec!["two".into()],
                ..Default::default()
            };
            let loader = Loader::new(runner, "/kuma/ebpf").with_policy(policy);
            let programs = vec![
                static_program("one"),
                static_program("two"),
                static_program("three"),
            ];
            let (mut sinks, out, err) = sinks();

            let result = loader
                .load_and_attach(&programs, &Config::default(), &mut sinks)
                .await;

            match result {
                Err(EbpfError::Batch(batch)) => assert_eq!(batch.programs(), vec!["two"]),
                other => panic!("unexpected result: {:?}", other),
            }

            assert_eq!(loader.runner().calls.lock().unwrap().len(), 3);
            let stdout = out.contents();
            assert!(stdout.contains("one ok\n"));
            assert!(stdout.contains("three ok\n"));
            assert!(stdout.find("one ok").unwrap() < stdout.find("three ok").unwrap());
            assert_eq!(err.contents(), "two exploded\n");
        }
    }

    #[tokio::test]
    async fn flag_errors_are_collected_and_program_skipped() {
        let loader = Loader::new(FakeRunner::default(), "/kuma/ebpf");
        let programs = vec![
            Program::new("broken", |_| anyhow::bail!("no interface")),
            static_program("fine"),
        ];
        let (mut sinks, out, _) = sinks();

        let err = loader
            .load_and_attach(&programs, &Config::default(), &mut sinks)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "loading and attaching bpf programs failed:\n\tbroken: computing flags for broken failed: no interface"
        );

        let calls = loader.runner().calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, PathBuf::from("/kuma/ebpf/fine"));
        assert_eq!(calls[0].args, vec!["--fine"]);
        assert!(out.contents().starts_with("Running:  /kuma/ebpf/fine --fine\n"));
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[tokio::test]
    async fn unwritable_sinks_do_not_fail_the_batch() {
        let loader = Loader::new(FakeRunner::default(), "/kuma/ebpf");
        let mut sinks = OutputSinks::new(BrokenSink, BrokenSink);

        loader
            .load_and_attach(
                &[static_program("mb_connect"), static_program("mb_tc")],
                &Config::default(),
                &mut sinks,
            )
            .await
            .unwrap();

        assert_eq!(loader.runner().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn every_failure_is_enumerated() {
        let runner = FakeRunner {
            failing: vec!["a".into(), "c".into()],
            ..Default::default()
        };
        let loader = Loader::new(runner, "/opt/ebpf");
        let programs = vec![static_program("a"), static_program("b"), static_program("c")];
        let (mut sinks, _, _) = sinks();

        let err = loader
            .load_and_attach(&programs, &Config::default(), &mut sinks)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("\n\ta: unexpected exit code: 1"));
        assert!(message.contains("\n\tc: unexpected exit code: 1"));
        assert!(!message.contains("\tb:"));
    }

    #[tokio::test]
    async fn success_writes_running_line_output_and_separator() {
        let loader = Loader::new(FakeRunner::default(), "/kuma/ebpf").with_env("LOG", "debug");
        let (mut sinks, out, _) = sinks();

        loader
            .load_and_attach(&[static_program("mb_redir")], &Config::default(), &mut sinks)
            .await
            .unwrap();

        assert_eq!(
            out.contents(),
            "Running: LOG=debug /kuma/ebpf/mb_redir --mb_redir\nmb_redir ok\n\n"
        );
    }
}
