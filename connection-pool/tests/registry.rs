use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::EngineConfig;
use common::models::{HealthStatus, SourceConfig, SourceStatus};
use connection_pool::{ConnectionPoolRegistry, ShutdownReport, SourceLifecycle, SourceService};
use tempfile::TempDir;

fn engine() -> EngineConfig {
    EngineConfig {
        pool_close_timeout_secs: 1,
        ..Default::default()
    }
}

fn sqlite_config(dir: &TempDir, id: &str, max_pool_size: u32) -> SourceConfig {
    let path = dir.path().join(format!("{id}.db"));
    let mut config = SourceConfig::new(
        id,
        format!("{id} database"),
        "sqlite",
        format!("sqlite:{}?mode=rwc", path.display()),
        "app",
        "unused",
    );
    config.min_pool_size = Some(0);
    config.max_pool_size = Some(max_pool_size);
    config.connection_timeout_ms = Some(500);
    config
}

#[tokio::test]
async fn add_makes_source_queryable() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    registry.add(sqlite_config(&dir, "ds-1", 4)).await.unwrap();

    let info = registry.pool_info("ds-1").await.unwrap();
    assert!(!info.closed);
    assert_eq!(info.max_size, 4);
    assert_eq!(info.health_status, HealthStatus::Healthy);

    let config = registry.source_config("ds-1").await.unwrap();
    assert_eq!(config.driver.as_deref(), Some("sqlx-sqlite"));
    assert!(config.health.last_connected_at.is_some());
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("unused"));

    registry.shutdown().await;
}

#[tokio::test]
async fn failed_probe_caches_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    let mut config = sqlite_config(&dir, "ds-missing", 2);
    config.url = format!("sqlite:{}?mode=ro", dir.path().join("absent/none.db").display());

    let err = registry.add(config).await.unwrap_err();
    assert!(err.is_connectivity(), "{err}");
    assert_eq!(err.context().source_id.as_deref(), Some("ds-missing"));
    assert!(!registry.contains("ds-missing").await);
    assert!(registry.pool_info("ds-missing").await.unwrap_err().is_configuration());
}

#[tokio::test]
async fn invalid_config_caches_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    let mut config = sqlite_config(&dir, "ds-1", 2);
    config.username.clear();
    assert!(registry.add(config).await.unwrap_err().is_configuration());

    let mut config = sqlite_config(&dir, "ds-2", 2);
    config.db_type = "oracle".into();
    let err = registry.add(config).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no native driver"));

    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn duplicate_add_is_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap();
    let err = registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(registry.len().await, 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn removed_and_unknown_ids_fail_with_configuration_error() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap();
    assert!(registry.remove("ds-1").await);
    assert!(!registry.remove("ds-1").await);
    assert!(!registry.remove("never-registered").await);

    for id in ["ds-1", "never-registered"] {
        assert!(registry.acquire_connection(id).await.unwrap_err().is_configuration());
        assert!(registry.test_connection(id).await.unwrap_err().is_configuration());
        assert!(registry.pool_info(id).await.unwrap_err().is_configuration());
        assert!(registry.source_config(id).await.unwrap_err().is_configuration());
    }
}

#[tokio::test]
async fn update_replaces_the_source() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());

    registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap();

    let mut replacement = sqlite_config(&dir, "ds-1", 3);
    replacement.name = "renamed".into();
    registry.update("ds-1", replacement).await.unwrap();

    let info = registry.pool_info("ds-1").await.unwrap();
    assert_eq!(info.name, "renamed");
    assert_eq!(info.max_size, 3);

    let err = registry.update("ds-1", sqlite_config(&dir, "ds-2", 2)).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(registry.contains("ds-1").await);

    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_checkouts_succeed_with_capacity_two() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ConnectionPoolRegistry::new(engine()));
    registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap();

    let (a, b) = tokio::join!(registry.acquire_connection("ds-1"), registry.acquire_connection("ds-1"));
    let (a, b) = (a.unwrap(), b.unwrap());

    let info = registry.pool_info("ds-1").await.unwrap();
    assert_eq!(info.active, 2);
    assert_eq!(info.idle, 0);

    drop(a);
    drop(b);
    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkout_waits_for_release_with_capacity_one() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ConnectionPoolRegistry::new(engine()));
    let mut config = sqlite_config(&dir, "ds-1", 1);
    config.connection_timeout_ms = Some(5_000);
    registry.add(config).await.unwrap();

    let held = registry.acquire_connection("ds-1").await.unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.acquire_connection("ds-1").await.map(|c| c.held_for()) })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());
    assert_eq!(registry.pool_info("ds-1").await.unwrap().threads_waiting, 1);

    drop(held);
    waiter.await.unwrap().unwrap();
    assert_eq!(registry.pool_info("ds-1").await.unwrap().threads_waiting, 0);

    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkout_times_out_with_capacity_one() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());
    registry.add(sqlite_config(&dir, "ds-1", 1)).await.unwrap();

    let held = registry.acquire_connection("ds-1").await.unwrap();

    let start = Instant::now();
    let err = registry.acquire_connection("ds-1").await.unwrap_err();
    assert!(err.is_connectivity(), "{err}");
    assert!(start.elapsed() >= Duration::from_millis(400));

    drop(held);
    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_empties_registry_even_with_held_connection() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());
    registry.add(sqlite_config(&dir, "ds-1", 2)).await.unwrap();
    registry.add(sqlite_config(&dir, "ds-2", 2)).await.unwrap();

    // ds-1 cannot close cleanly while this is held.
    let held = registry.acquire_connection("ds-1").await.unwrap();

    let report = registry.shutdown().await;
    assert_eq!(report.closed, vec!["ds-2"]);
    assert_eq!(report.timed_out, vec!["ds-1"]);
    assert!(registry.is_empty().await);
    assert!(registry.all_pool_info().await.is_empty());

    drop(held);
    assert_eq!(registry.shutdown().await, ShutdownReport::default());
    assert!(registry.acquire_connection("ds-2").await.unwrap_err().is_configuration());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_health_check_degrades_but_keeps_source() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());
    registry.add(sqlite_config(&dir, "ds-1", 1)).await.unwrap();

    // The only connection is out, so the health check cannot check one out.
    let held = registry.acquire_connection("ds-1").await.unwrap();
    assert!(!registry.test_connection("ds-1").await.unwrap());

    let config = registry.source_config("ds-1").await.unwrap();
    assert_eq!(config.health.health_status, HealthStatus::Degraded);
    assert!(config.health.error_message.is_some());
    assert_eq!(registry.health_check_all().await.get("ds-1"), Some(&false));

    drop(held);
    assert!(registry.contains("ds-1").await);
    let mut conn = registry.acquire_connection("ds-1").await.unwrap();
    conn.ping().await.unwrap();
    drop(conn);

    assert!(registry.test_connection("ds-1").await.unwrap());
    let config = registry.source_config("ds-1").await.unwrap();
    assert_eq!(config.health.health_status, HealthStatus::Healthy);
    assert!(config.health.error_message.is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn health_checks_report_every_source() {
    let dir = TempDir::new().unwrap();
    let registry = ConnectionPoolRegistry::new(engine());
    registry.add(sqlite_config(&dir, "ds-a", 2)).await.unwrap();
    registry.add(sqlite_config(&dir, "ds-b", 2)).await.unwrap();

    assert!(registry.test_connection("ds-a").await.unwrap());

    let results = registry.health_check_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|healthy| *healthy));

    let config = registry.source_config("ds-b").await.unwrap();
    assert!(config.health.last_health_check_at.is_some());
    assert!(config.health.error_message.is_none());

    let ids: Vec<String> = registry.all_pool_info().await.into_iter().map(|i| i.source_id).collect();
    assert_eq!(ids, vec!["ds-a", "ds-b"]);

    registry.shutdown().await;
}

#[tokio::test]
async fn service_disable_and_enable() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ConnectionPoolRegistry::new(engine()));
    let service = SourceService::new(Arc::clone(&registry));

    let mut config = sqlite_config(&dir, "", 2);
    config.url = format!("sqlite:{}?mode=rwc", dir.path().join("generated.db").display());
    let registered = service.register(config).await.unwrap();
    let id = registered.id.clone();
    assert!(!id.is_empty());
    assert_eq!(registered.health.status, SourceStatus::Enabled);

    service.disable(&id).await.unwrap();
    assert!(!registry.contains(&id).await);
    assert_eq!(service.disabled_ids().await, vec![id.clone()]);

    let enabled = service.enable(&id).await.unwrap();
    assert_eq!(enabled.health.status, SourceStatus::Enabled);
    assert!(service.probe(&id).await.unwrap());

    service.unregister(&id).await.unwrap();
    assert!(registry.is_empty().await);
    assert!(service.enable(&id).await.unwrap_err().is_configuration());
}
