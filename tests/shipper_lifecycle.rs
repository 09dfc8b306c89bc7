//! End-to-end tests for the log shipper.
//!
//! Each test builds a scratch raw-log root and collector root in a temp
//! directory, drives `LogShipper` through discovery and stop passes, and
//! checks the structured output files and the worker registry.
//!
//! Tested in this file:
//! - appended raw lines arrive as ordered records, per instance
//! - obsolete workers stop while their neighbours keep shipping
//! - `stop_all_workers` waits for every worker to unregister
//! - instances come back after their raw log is recreated
//! - a raw log replaced by a larger file does not strand its worker

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use vmlog_shipper::shipper::{LogShipper, WorkerHandle};
use vmlog_shipper::ShipperConfig;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Host {
    _dir: tempfile::TempDir,
    config: ShipperConfig,
}

impl Host {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ShipperConfig::new(dir.path().join("vms"), dir.path().join("pods"));
        config.poll_interval_ms = 10;
        std::fs::create_dir_all(&config.raw_root).unwrap();
        std::fs::create_dir_all(&config.output_root).unwrap();
        Self { _dir: dir, config }
    }

    /// Instance with an empty raw log and a provisioned output directory.
    fn add_instance(&self, id: &str) {
        std::fs::create_dir_all(self.config.raw_root.join(id)).unwrap();
        std::fs::write(self.config.input_path(id), "").unwrap();
        std::fs::create_dir_all(self.config.output_dir(id)).unwrap();
    }

    fn console(&self, id: &str, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(self.config.input_path(id))
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }
}

fn records(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("record is json"))
        .collect()
}

async fn wait_for_records(path: &Path, count: usize) -> Vec<serde_json::Value> {
    tokio::time::timeout(WAIT, async {
        loop {
            let found = records(path);
            if found.len() >= count {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("records should arrive")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lines_arrive_in_order_per_instance() {
    let host = Host::new();
    host.add_instance("vm-a");
    host.add_instance("vm-b");

    let shipper = LogShipper::new(host.config.clone());
    let report = shipper.spawn_workers().await.unwrap();
    assert_eq!(report.started.len(), 2);

    for n in 0..50 {
        host.console("vm-a", &format!("a {n}: said \"boot\"   \n"));
        if n % 2 == 0 {
            host.console("vm-b", &format!("b {n}\r\n"));
        }
    }

    let a = wait_for_records(&host.config.output_path("vm-a"), 50).await;
    let b = wait_for_records(&host.config.output_path("vm-b"), 25).await;

    assert_eq!(a.len(), 50);
    for (n, record) in a.iter().enumerate() {
        assert_eq!(record["stream"], "stdout");
        assert_eq!(record["log"], format!("a {n}: said \"boot\"\n"));
        let time = record["time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok(), "{time}");
    }
    assert_eq!(b.len(), 25);
    for (i, record) in b.iter().enumerate() {
        assert_eq!(record["log"], format!("b {}\n", i * 2));
    }

    shipper.stop_all_workers().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn obsolete_worker_stops_and_neighbour_continues() {
    let host = Host::new();
    host.add_instance("vm-a");
    host.add_instance("vm-b");

    let shipper = LogShipper::new(host.config.clone());
    shipper.spawn_workers().await.unwrap();

    std::fs::remove_dir_all(host.config.output_dir("vm-b")).unwrap();
    assert_eq!(shipper.stop_obsolete_workers().await, vec!["vm-b".to_string()]);
    tokio::time::timeout(WAIT, shipper.registry().wait_unregistered("vm-b"))
        .await
        .unwrap();

    host.console("vm-a", "still here\n");
    let a = wait_for_records(&host.config.output_path("vm-a"), 1).await;
    assert_eq!(a[0]["log"], "still here\n");
    assert_eq!(shipper.registry().snapshot_ids().len(), 1);

    // vm-b is not ready any more, so the next pass leaves it alone.
    let report = shipper.spawn_workers().await.unwrap();
    assert!(report.started.is_empty());
    assert_eq!(report.not_ready, 1);

    shipper.stop_all_workers().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_all_waits_for_every_worker() {
    let host = Host::new();
    host.add_instance("A");
    host.add_instance("B");

    let shipper = std::sync::Arc::new(LogShipper::new(host.config.clone()));
    shipper.spawn_workers().await.unwrap();

    // A handle nobody services stands in for a worker that is slow to exit.
    let (slow, _slow_stop) = WorkerHandle::new("slow");
    shipper.registry().register(slow).unwrap();

    let stopping = {
        let shipper = shipper.clone();
        tokio::spawn(async move { shipper.stop_all_workers().await })
    };

    tokio::time::timeout(WAIT, async {
        while shipper.registry().contains("A") || shipper.registry().contains("B") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("real workers should unregister");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished(), "must not return before drain");

    shipper.registry().unregister("slow");
    tokio::time::timeout(Duration::from_secs(1), stopping)
        .await
        .expect("returns promptly after drain")
        .unwrap();
    assert!(shipper.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instance_restarts_after_raw_log_is_recreated() {
    let host = Host::new();
    host.add_instance("vm-a");

    let shipper = LogShipper::new(host.config.clone());
    shipper.spawn_workers().await.unwrap();

    std::fs::remove_file(host.config.input_path("vm-a")).unwrap();
    tokio::time::timeout(WAIT, shipper.registry().wait_unregistered("vm-a"))
        .await
        .unwrap();

    std::fs::write(host.config.input_path("vm-a"), "").unwrap();
    let report = shipper.spawn_workers().await.unwrap();
    assert_eq!(report.started, vec!["vm-a".to_string()]);

    host.console("vm-a", "second boot\n");
    let a = wait_for_records(&host.config.output_path("vm-a"), 1).await;
    assert_eq!(a[0]["log"], "second boot\n");

    shipper.stop_all_workers().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replaced_raw_log_is_picked_up_again() {
    let host = Host::new();
    host.add_instance("vm-a");
    host.console("vm-a", "0123456789\n");

    let shipper = LogShipper::new(host.config.clone());
    shipper.spawn_workers().await.unwrap();

    // Restart: the VM runtime recreates the console log, already longer
    // than the offset the old worker reached.
    std::fs::remove_file(host.config.input_path("vm-a")).unwrap();
    std::fs::write(
        host.config.input_path("vm-a"),
        "early output of the second boot\n",
    )
    .unwrap();
    tokio::time::timeout(WAIT, shipper.registry().wait_unregistered("vm-a"))
        .await
        .expect("worker on the replaced file should exit");

    let report = shipper.spawn_workers().await.unwrap();
    assert_eq!(report.started, vec!["vm-a".to_string()]);

    host.console("vm-a", "login prompt\n");
    let a = wait_for_records(&host.config.output_path("vm-a"), 1).await;
    assert_eq!(a.last().unwrap()["log"], "login prompt\n");

    shipper.stop_all_workers().await;
}
