use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// A config whose root matches no provider, so the crawl records one error
/// without touching the network.
fn create_offline_config(output_dir: &std::path::Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "crawl:\n  url: \"https://example.invalid/files/\"\noutput:\n  tree_json: {}\n  inventory: {}\n",
        output_dir.join("tree.json").display(),
        output_dir.join("inventory.jsonl").display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn crawl_cli_reports_failures_but_exits_successfully() {
    let out = tempdir().unwrap();
    let config = create_offline_config(out.path());

    let mut cmd = Command::cargo_bin("dircrawl").expect("Binary exists");
    cmd.arg("crawl").arg("--config").arg(config.path());

    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("Crawl finished")
                .and(predicate::str::contains("1 errors"))
                .and(predicate::str::contains("failed: https://example.invalid/files/")),
        );

    let tree = std::fs::read_to_string(out.path().join("tree.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&tree).unwrap();
    assert_eq!(snapshot["url"], "https://example.invalid/files/");
    assert_eq!(snapshot["failed"], true);
    assert!(!out.path().join("inventory.jsonl").exists());
}

#[test]
fn crawl_cli_url_flag_overrides_config() {
    let out = tempdir().unwrap();
    let config = create_offline_config(out.path());

    let mut cmd = Command::cargo_bin("dircrawl").expect("Binary exists");
    cmd.arg("crawl")
        .arg("--config")
        .arg(config.path())
        .arg("--url")
        .arg("https://example.invalid/other/");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("failed: https://example.invalid/other/"));
}

#[test]
fn crawl_cli_fails_on_missing_config() {
    let mut cmd = Command::cargo_bin("dircrawl").expect("Binary exists");
    cmd.arg("crawl").arg("--config").arg("does-not-exist.yaml");
    cmd.assert().failure();
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use dircrawl::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Crawl {
            config: std::path::PathBuf::from("dummy.yaml"),
            url: None,
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
