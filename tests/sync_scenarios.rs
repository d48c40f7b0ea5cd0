//! Synchronizer Scenario Tests
//!
//! Drive the synchronizer step by step against a mockito-backed OWEN Cloud,
//! with the real CSV exporter and JSON config store in a temp directory.
//! Time is controlled through `ManualClock`, so no test sleeps.

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use owencloud_sync::config::CloudConfig;
use owencloud_sync::storage::{read_table, ConfigStore};
use owencloud_sync::sync::{Credentials, DeviceConfig, ManualClock, Step};
use owencloud_sync::{CloudClient, CsvExporter, JsonConfigStore, PollPolicy, Synchronizer};

type CloudSync = Synchronizer<CloudClient, CsvExporter, JsonConfigStore>;

const DEVICE: i64 = 11;

// ============================================================================
// Fixtures
// ============================================================================

fn build(server: &ServerGuard, dir: &Path, clock: &ManualClock) -> CloudSync {
    let cloud = CloudConfig {
        api_url: server.url(),
        ..CloudConfig::default()
    };
    Synchronizer::new(
        CloudClient::new(&cloud).unwrap(),
        CsvExporter::new(dir.join("owen_cloud_data.csv")),
        JsonConfigStore::new(dir.join("owen_config.json")),
        Credentials {
            login: "operator".into(),
            password: "secret".into(),
        },
        PollPolicy::default(),
        Duration::from_secs(60),
        Arc::new(clock.clone()),
    )
}

async fn mock_login(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/auth/open")
        .with_status(200)
        .with_body(r#"{"token": "tok-1"}"#)
        .create_async()
        .await
}

async fn mock_devices(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/device/index")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_body(json!([{"id": DEVICE, "name": "TRM-202"}]).to_string())
        .create_async()
        .await
}

/// Serve the device's parameter set with the given sync and indicator values.
async fn mock_parameters(server: &mut ServerGuard, sync: &str, indicator: u8) -> Mock {
    let body = json!({
        "id": DEVICE,
        "parameters": [
            {"id": 1, "name": "Synchronization", "code": "synchronization", "value": sync},
            {"id": 2, "name": "Indicator_of_new_cycle", "code": "indicator_of_new_cycle", "value": indicator},
            {"id": 3, "name": "Temperature", "value": 21.5}
        ]
    });
    server
        .mock("POST", format!("/device/{}", DEVICE).as_str())
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_write(server: &mut ServerGuard, value: &str, status: usize) -> Mock {
    server
        .mock("POST", "/parameters/write-data")
        .match_body(Matcher::PartialJson(json!({"sync": true, "data": [{"id": 2, "value": value}]})))
        .with_status(status)
        .with_body(r#"{"writeGroupId": 77}"#)
        .create_async()
        .await
}

/// Replace the served parameter set.
async fn reserve(server: &mut ServerGuard, current: Mock, sync: &str, indicator: u8) -> Mock {
    current.remove_async().await;
    mock_parameters(server, sync, indicator).await
}

fn rows(dir: &Path) -> Vec<Vec<String>> {
    read_table(&dir.join("owen_cloud_data.csv"))
        .unwrap()
        .map(|t| t.rows)
        .unwrap_or_default()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn first_run_resolves_persists_and_archives_cycles() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();

    let login = mock_login(&mut server).await;
    let devices = mock_devices(&mut server).await;
    let params = mock_parameters(&mut server, "5", 0).await;
    let write_one = mock_write(&mut server, "1", 200).await;
    let write_zero = mock_write(&mut server, "0", 200).await;

    let mut sync = build(&server, dir.path(), &clock);
    sync.bootstrap(&CancellationToken::new()).await.unwrap();

    // Resolved ids are persisted and the export header exists.
    let saved = JsonConfigStore::new(dir.path().join("owen_config.json"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(saved.device_id, Some(DEVICE));
    assert_eq!(saved.sync_param_id, Some(1));
    assert_eq!(saved.indicator_param_id, Some(2));
    assert_eq!(saved.parameter_ids, vec![1, 2, 3]);
    let table = read_table(&dir.path().join("owen_cloud_data.csv")).unwrap().unwrap();
    assert_eq!(
        table.columns,
        vec![
            "timestamp",
            "datetime",
            "Synchronization (ID:1)",
            "Indicator_of_new_cycle (ID:2)",
            "Temperature (ID:3)",
        ]
    );

    // Baseline only.
    assert!(matches!(sync.step().await.unwrap(), Step::Sleep(_)));
    assert!(rows(dir.path()).is_empty());

    // First change: accepted, indicator 0 -> 1.
    let params = reserve(&mut server, params, "6", 0).await;
    sync.step().await.unwrap();
    let archived = rows(dir.path());
    assert_eq!(archived.len(), 1);
    assert_eq!(&archived[0][2..], &["6", "1", "21.5"]);

    // Ten seconds later: too soon, ignored.
    clock.advance(Duration::from_secs(10));
    let params = reserve(&mut server, params, "7", 1).await;
    sync.step().await.unwrap();
    assert_eq!(rows(dir.path()).len(), 1);

    // Sixty seconds after the first cycle: accepted, indicator 1 -> 0.
    clock.advance(Duration::from_secs(50));
    let _params = reserve(&mut server, params, "8", 1).await;
    sync.step().await.unwrap();
    let archived = rows(dir.path());
    assert_eq!(archived.len(), 2);
    assert_eq!(&archived[1][2..], &["8", "0", "21.5"]);

    let summary = sync.summary();
    assert_eq!(summary.accepted_cycles, 2);
    assert_eq!(summary.rejected_changes, 1);
    assert_eq!(summary.write_failures, 0);
    assert_eq!(summary.token_renewals, 1);

    let status = sync.status();
    let status = status.read().await;
    assert_eq!(status.accepted_cycles, 2);
    assert_eq!(status.device_id, Some(DEVICE));

    login.assert_async().await;
    devices.assert_async().await;
    write_one.assert_async().await;
    write_zero.assert_async().await;
}

#[tokio::test]
async fn valid_persisted_config_skips_discovery() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();

    let mut prior = DeviceConfig {
        device_id: Some(DEVICE),
        sync_param_id: Some(1),
        indicator_param_id: Some(2),
        parameter_ids: vec![1, 2, 3],
        ..DeviceConfig::default()
    };
    prior.parameter_names.insert(1, "Synchronization".into());
    JsonConfigStore::new(dir.path().join("owen_config.json"))
        .save(&prior)
        .unwrap();

    let _login = mock_login(&mut server).await;
    let devices = server
        .mock("POST", "/device/index")
        .expect(0)
        .create_async()
        .await;
    let _params = mock_parameters(&mut server, "40", 1).await;

    let mut sync = build(&server, dir.path(), &clock);
    sync.bootstrap(&CancellationToken::new()).await.unwrap();

    assert_eq!(sync.device_config(), &prior);
    // Baseline read from the device, not assumed.
    assert_eq!(sync.cycle_state().indicator.as_u8(), 1);
    devices.assert_async().await;
}

#[tokio::test]
async fn failed_write_archives_pre_toggle_indicator() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();

    let _login = mock_login(&mut server).await;
    let _devices = mock_devices(&mut server).await;
    let params = mock_parameters(&mut server, "5", 0).await;
    let rejected = mock_write(&mut server, "1", 500).await;

    let mut sync = build(&server, dir.path(), &clock);
    sync.bootstrap(&CancellationToken::new()).await.unwrap();
    sync.step().await.unwrap();

    let _params = reserve(&mut server, params, "6", 0).await;
    sync.step().await.unwrap();

    let archived = rows(dir.path());
    assert_eq!(archived.len(), 1);
    assert_eq!(&archived[0][2..], &["6", "0", "21.5"]);
    assert_eq!(sync.summary().write_failures, 1);
    assert_eq!(sync.cycle_state().indicator.as_u8(), 0);
    assert!(sync.status().read().await.last_error.is_some());
    rejected.assert_async().await;
}

#[tokio::test]
async fn rejected_credentials_stop_bootstrap() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    let _login = server
        .mock("POST", "/auth/open")
        .with_status(401)
        .with_body("bad credentials")
        .create_async()
        .await;

    let mut sync = build(&server, dir.path(), &ManualClock::new());
    let err = sync.bootstrap(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_auth(), "got {err:?}");
    assert!(!dir.path().join("owen_config.json").exists());
}

#[tokio::test]
async fn unreachable_device_keeps_loop_alive() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    let _login = mock_login(&mut server).await;
    let _devices = server
        .mock("POST", "/device/index")
        .with_status(503)
        .create_async()
        .await;

    let mut sync = build(&server, dir.path(), &ManualClock::new());
    sync.bootstrap(&CancellationToken::new()).await.unwrap();
    assert!(sync.device_config().device_id.is_none());
    // No header is written before the parameter set is known.
    assert!(!dir.path().join("owen_cloud_data.csv").exists());

    // Each poll counts a miss instead of failing.
    for _ in 0..2 {
        assert!(matches!(sync.step().await.unwrap(), Step::Sleep(_)));
    }
    assert_eq!(sync.cycle_state().consecutive_missing_sync, 2);
    assert!(rows(dir.path()).is_empty());
}
