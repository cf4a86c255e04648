use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tp_core::{Config, LoadPolicy};
use tp_ebpf::{CommandRunner, EbpfError, Loader, OutputSinks, Program};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn programs() -> Vec<Program> {
    vec![
        Program::new("echo", |_| Ok(vec!["first".to_string()])),
        Program::new("false", |_| Ok(vec![])),
        Program::new("echo", |_| Ok(vec!["third".to_string()])),
    ]
}

async fn run(policy: LoadPolicy) -> (Result<(), EbpfError>, String) {
    let loader = Loader::new(CommandRunner::new(Duration::from_secs(10)), "/bin").with_policy(policy);
    let out = Capture::default();
    let mut sinks = OutputSinks::new(out.clone(), Capture::default());

    let result = loader
        .load_and_attach(&programs(), &Config::default(), &mut sinks)
        .await;

    (result, out.text())
}

#[tokio::test]
async fn second_unit_failing_still_runs_the_third() {
    let (result, stdout) = run(LoadPolicy::Sequential).await;

    assert_eq!(
        stdout,
        "Running:  /bin/echo first\nfirst\n\nRunning:  /bin/false \nRunning:  /bin/echo third\nthird\n\n"
    );

    let err = result.unwrap_err();
    match &err {
        EbpfError::Batch(batch) => assert_eq!(batch.programs(), vec!["false"]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(
        err.to_string()
            .starts_with("loading and attaching bpf programs failed:\n\tfalse: unexpected exit code: 1")
    );
}

#[tokio::test]
async fn concurrent_policy_reports_the_same_outcome() {
    let (result, stdout) = run(LoadPolicy::Concurrent).await;

    assert_eq!(
        stdout,
        "Running:  /bin/echo first\nfirst\n\nRunning:  /bin/false \nRunning:  /bin/echo third\nthird\n\n"
    );
    assert!(matches!(result, Err(EbpfError::Batch(ref batch)) if batch.programs() == vec!["false"]));
}

#[tokio::test]
async fn cancelling_mid_batch_reports_every_unit() {
    let runner = CommandRunner::new(Duration::from_secs(30));
    let cancel = runner.cancellation();
    let loader = Loader::new(runner, "/bin");
    let programs = vec![
        Program::new("sleep", |_| Ok(vec!["30".to_string()])),
        Program::new("echo", |_| Ok(vec!["second".to_string()])),
        Program::new("echo", |_| Ok(vec!["third".to_string()])),
    ];
    let out = Capture::default();
    let mut sinks = OutputSinks::new(out.clone(), Capture::default());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let result = loader
        .load_and_attach(&programs, &Config::default(), &mut sinks)
        .await;
    trigger.await.unwrap();

    match result {
        Err(EbpfError::Batch(batch)) => {
            assert_eq!(batch.programs(), vec!["sleep", "echo", "echo"]);
            assert!(
                batch
                    .failures
                    .iter()
                    .all(|failure| matches!(failure.error, EbpfError::Cancelled(_)))
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!out.text().contains("second\n"));
}

#[tokio::test]
async fn timed_out_unit_still_forwards_its_output() {
    let loader = Loader::new(CommandRunner::new(Duration::from_millis(500)), "/bin");
    let programs = vec![Program::new("sh", |_| {
        Ok(vec![
            "-c".to_string(),
            "echo loading-map; echo attach-failed >&2; sleep 5".to_string(),
        ])
    })];
    let out = Capture::default();
    let err = Capture::default();
    let mut sinks = OutputSinks::new(out.clone(), err.clone());

    let result = loader
        .load_and_attach(&programs, &Config::default(), &mut sinks)
        .await;

    assert!(matches!(result, Err(EbpfError::Batch(_))));
    assert!(out.text().ends_with("loading-map\n"));
    assert_eq!(err.text(), "attach-failed\n");
}
