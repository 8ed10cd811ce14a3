mod support;

use std::time::Duration;

use common::config::EngineConfig;
use common::models::QueryParams;
use query_engine::QueryExecutor;
use serde_json::{json, Value};

use crate::support::{engine, params, registry_with, SOURCE_ID};

#[tokio::test]
async fn query_returns_rows_and_columns_in_order() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let result = executor
        .execute_query(SOURCE_ID, "SELECT id, name, email, score FROM users ORDER BY id", &QueryParams::new(), None)
        .await
        .unwrap();

    assert_eq!(result.row_count, 3);
    assert_eq!(result.rows.len(), 3);
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "email", "score"]);
    assert_eq!(result.columns[0].type_name, "INTEGER");
    assert_eq!(result.columns[0].type_code, 4);

    let first = &result.rows[0];
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, names);
    assert_eq!(first["id"], json!(1));
    assert_eq!(first["name"], json!("alice"));
    assert_eq!(first["score"], json!(9.5));
    assert_eq!(result.rows[1]["email"], Value::Null);

    assert_eq!(registry.pool_info(SOURCE_ID).await.unwrap().active, 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn positional_markers_bind_in_map_order() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let result = executor
        .execute_query(
            SOURCE_ID,
            "SELECT name FROM users WHERE id >= ? AND score > ? ORDER BY id",
            &params(json!({ "min_id": 2, "min_score": 5.0 })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("bob"));

    registry.shutdown().await;
}

#[tokio::test]
async fn too_few_values_bind_nothing() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    // SQLite reads unbound markers as NULL, so no row matches.
    let result = executor
        .execute_query(
            SOURCE_ID,
            "SELECT name FROM users WHERE id = ? OR id = ?",
            &params(json!({ "id": 1 })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn named_placeholders_render_literals() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let result = executor
        .execute_query(
            SOURCE_ID,
            "SELECT id FROM users WHERE name = #{name}",
            &params(json!({ "name": "O'Connor" })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["id"], json!(3));

    let err = executor
        .execute_query(SOURCE_ID, "SELECT id FROM users WHERE name = #{name}", &QueryParams::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("name"));

    registry.shutdown().await;
}

#[tokio::test]
async fn policy_violations_carry_context() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let err = executor
        .execute_query(SOURCE_ID, "SELECT * FROM users; DROP TABLE users", &QueryParams::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_policy_violation());
    assert_eq!(err.context().source_id.as_deref(), Some(SOURCE_ID));
    assert_eq!(err.context().sql.as_deref(), Some("SELECT * FROM users; DROP TABLE users"));
    assert!(err.context().elapsed.is_some());

    let err = executor
        .execute_update(SOURCE_ID, "UPDATE users SET name = 'x'", &QueryParams::new())
        .await
        .unwrap_err();
    assert!(err.is_policy_violation());

    let count = executor
        .execute_query(SOURCE_ID, "SELECT COUNT(*) AS n FROM users", &QueryParams::new(), None)
        .await
        .unwrap();
    assert_eq!(count.rows[0]["n"], json!(3));

    registry.shutdown().await;
}

#[tokio::test]
async fn unknown_source_is_a_configuration_error() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let err = executor
        .execute_query("missing", "SELECT 1", &QueryParams::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_configuration());

    registry.remove(SOURCE_ID).await;
    let err = executor
        .execute_update(SOURCE_ID, "INSERT INTO users (name) VALUES ('z')", &QueryParams::new())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn row_cap_and_limit_override() {
    let (_dir, registry) = registry_with(EngineConfig {
        max_rows: 2,
        ..engine()
    })
    .await;
    let executor = QueryExecutor::new(registry.clone());
    let sql = "SELECT id FROM users ORDER BY id";

    let capped = executor.execute_query(SOURCE_ID, sql, &QueryParams::new(), None).await.unwrap();
    assert_eq!(capped.row_count, 2);

    let lowered = executor.execute_query(SOURCE_ID, sql, &QueryParams::new(), Some(1)).await.unwrap();
    assert_eq!(lowered.row_count, 1);

    let raised = executor.execute_query(SOURCE_ID, sql, &QueryParams::new(), Some(50)).await.unwrap();
    assert_eq!(raised.row_count, 2);

    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_query_times_out() {
    let (_dir, registry) = registry_with(EngineConfig {
        query_timeout_ms: 20,
        ..engine()
    })
    .await;
    let executor = QueryExecutor::new(registry.clone());

    let err = executor
        .execute_query(SOURCE_ID, "SELECT COUNT(*) FROM big a, big b", &QueryParams::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(err.context().source_id.as_deref(), Some(SOURCE_ID));
    assert!(err.context().elapsed.unwrap() < Duration::from_secs(1));

    // The cancelled connection is closed, not parked back in the pool.
    assert_eq!(registry.pool_info(SOURCE_ID).await.unwrap().active, 0);

    let result = executor
        .execute_query(SOURCE_ID, "SELECT COUNT(*) AS n FROM big", &QueryParams::new(), None)
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(5000));

    registry.shutdown().await;
}

#[tokio::test]
async fn updates_return_affected_rows() {
    let (_dir, registry) = registry_with(engine()).await;
    let executor = QueryExecutor::new(registry.clone());

    let inserted = executor
        .execute_update(
            SOURCE_ID,
            "INSERT INTO users (id, name, email) VALUES (?, ?, ?)",
            &params(json!({ "id": 4, "name": "dora", "email": null })),
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    // The single marker takes the first value in map order, not `min_id`.
    let updated = executor
        .execute_update(
            SOURCE_ID,
            "UPDATE users SET score = #{score} WHERE id > ?",
            &params(json!({ "score": 1, "min_id": 2 })),
        )
        .await
        .unwrap();
    assert_eq!(updated, 3);

    let updated = executor
        .execute_update(
            SOURCE_ID,
            "UPDATE users SET score = 0 WHERE id > ?",
            &params(json!({ "min_id": 2 })),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);

    registry.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_queries_run_on_bounded_workers() {
    let (_dir, registry) = registry_with(EngineConfig {
        async_workers: 2,
        ..engine()
    })
    .await;
    let executor = QueryExecutor::new(registry.clone());

    let pending: Vec<_> = (1..=10)
        .map(|i| {
            executor.execute_query_async(
                SOURCE_ID,
                "SELECT id FROM users WHERE id <= #{n}",
                params(json!({ "n": i % 3 + 1 })),
                None,
            )
        })
        .collect();

    for (i, fut) in (1..=10).zip(pending) {
        let result = tokio::time::timeout(Duration::from_secs(10), fut).await.unwrap().unwrap();
        assert_eq!(result.row_count, i % 3 + 1);
    }

    let err = executor
        .execute_query_async(SOURCE_ID, "DELETE FROM users", QueryParams::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_policy_violation());

    registry.shutdown().await;
}
