//! End-to-end batch runs through the public API

mod common;

use batch_lookup::{
    Batch, Config, Event, Fetcher, Orchestrator, RunState, RunStatus, SessionFetcher,
    SharedFetcher,
};
use common::{FakeBrowserLauncher, SessionLedger, TableFetcher, config_in, read_table};
use std::sync::Arc;
use std::time::Duration;

fn shared(fetcher: &Arc<TableFetcher>) -> SharedFetcher {
    let fetcher: Arc<dyn Fetcher> = fetcher.clone();
    SharedFetcher::new(fetcher)
}

#[tokio::test]
async fn test_batch_file_to_output_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 5);
    std::fs::write(&config.run.batch_path, "SN1\nSN2\n\nSN3\nSN4\n").unwrap();
    let fetcher = Arc::new(
        TableFetcher::new(&[
            ("SN1", Some("2025-01-01")),
            ("SN2", None),
            ("SN3", Some("2027-03-15")),
        ])
        .flaky("SN3", 2),
    );
    let orchestrator = Orchestrator::new(config, shared(&fetcher)).unwrap();

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed, 4);
    assert_eq!(report.not_found, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(fetcher.calls("SN3"), 3);
    assert_eq!(fetcher.calls("SN4"), 1);

    let content = std::fs::read_to_string(&report.output).unwrap();
    assert!(content.starts_with("Key,Outcome\n"));
    let mut rows = read_table(&report.output);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("SN1".to_string(), "2025-01-01".to_string()),
            ("SN2".to_string(), "Not Found".to_string()),
            ("SN3".to_string(), "2027-03-15".to_string()),
            ("SN4".to_string(), "Error: unknown serial number".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_consecutive_runs_keep_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(TableFetcher::new(&[("SN1", Some("a")), ("SN2", Some("b"))]));

    let first = Orchestrator::new(config_in(dir.path(), 2), shared(&fetcher))
        .unwrap()
        .run_batch(Batch::from_keys(["SN1"]))
        .await
        .unwrap();
    assert!(first.archived.is_none());

    let second = Orchestrator::new(config_in(dir.path(), 2), shared(&fetcher))
        .unwrap()
        .run_batch(Batch::from_keys(["SN2"]))
        .await
        .unwrap();

    let archived = second.archived.expect("first output should be archived");
    assert_eq!(
        read_table(&archived),
        vec![("SN1".to_string(), "a".to_string())]
    );
    assert_eq!(
        read_table(&second.output),
        vec![("SN2".to_string(), "b".to_string())]
    );
}

#[tokio::test]
async fn test_sessions_released_for_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(SessionLedger::default());
    let fetcher = SessionFetcher::new(FakeBrowserLauncher {
        ledger: ledger.clone(),
    });
    let mut config = config_in(dir.path(), 2);
    config.retry.attempt_timeout = Duration::from_millis(50);
    config.retry.max_retries = 1;
    let orchestrator =
        Orchestrator::new(config, SharedFetcher::new(Arc::new(fetcher))).unwrap();

    let report = orchestrator
        .run_batch(Batch::from_keys(["SN1", "HANG1", "SN2"]))
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.failures, 1);
    // SN1, SN2 once each, HANG1 twice (timeout + retry)
    assert_eq!(ledger.opened(), 4);
    assert_eq!(ledger.released(), 4);
}

#[tokio::test]
async fn test_sessions_released_when_run_is_abandoned() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(SessionLedger::default());
    let fetcher = SessionFetcher::new(FakeBrowserLauncher {
        ledger: ledger.clone(),
    });
    let orchestrator = Arc::new(
        Orchestrator::new(config_in(dir.path(), 2), SharedFetcher::new(Arc::new(fetcher)))
            .unwrap(),
    );
    let control = orchestrator.control();
    let mut events = orchestrator.subscribe();

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .run_batch(Batch::from_keys(["SN1", "HANG1", "HANG2", "SN2"]))
                .await
        }
    });

    // Both workers end up stuck on a HANG key
    tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.opened() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    control.stop_immediately();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.processed, 1);
    assert_eq!(ledger.opened(), ledger.released());

    let mut saw_discard = false;
    while let Ok(event) = events.try_recv() {
        if let Event::StateChanged {
            state: RunState::StoppingDiscard,
        } = event
        {
            saw_discard = true;
        }
    }
    assert!(saw_discard);
}

#[tokio::test]
async fn test_json_config_drives_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().display().to_string().replace('\\', "/");
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        format!(
            r#"{{
                "run": {{
                    "batch_path": "{root}/keys.txt",
                    "output_path": "{root}/out/warranty.csv",
                    "versions_dir": "{root}/old",
                    "max_workers": 2,
                    "key_header": "Serial Number",
                    "outcome_header": "End Date"
                }},
                "retry": {{ "max_retries": 0, "initial_delay": 0 }}
            }}"#
        ),
    )
    .unwrap();
    std::fs::write(dir.path().join("keys.txt"), "SN1\nSN2\n").unwrap();
    let fetcher = Arc::new(TableFetcher::new(&[("SN1", Some("2025-01-01")), ("SN2", None)]));

    let config = Config::load(&config_path).unwrap();
    let report = Orchestrator::new(config, shared(&fetcher))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.output, dir.path().join("out").join("warranty.csv"));
    let content = std::fs::read_to_string(&report.output).unwrap();
    assert!(content.starts_with("Serial Number,End Date\n"));
    assert_eq!(report.processed, 2);
}

#[tokio::test]
async fn test_events_serialize_for_forwarding() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(TableFetcher::new(&[("SN1", Some("2025-01-01"))]));
    let orchestrator = Orchestrator::new(config_in(dir.path(), 1), shared(&fetcher)).unwrap();
    let mut events = orchestrator.subscribe();

    orchestrator
        .run_batch(Batch::from_keys(["SN1"]))
        .await
        .unwrap();

    let mut types = Vec::new();
    while let Ok(event) = events.try_recv() {
        let json = serde_json::to_value(&event).unwrap();
        types.push(json["type"].as_str().unwrap().to_string());
    }
    assert_eq!(types.first().map(String::as_str), Some("run_started"));
    assert_eq!(types.last().map(String::as_str), Some("run_finished"));
    assert!(types.iter().any(|t| t == "key_resolved"));
    assert!(types.iter().any(|t| t == "progress"));
}
