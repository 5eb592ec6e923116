//! Integration tests against a real pgvector instance.
//!
//! One container is shared by the whole run; every test works in its own
//! schema so tests can run in parallel.

use std::sync::OnceLock;

use serde_json::json;
use sqlx::{Connection, PgConnection};
use testcontainers_modules::testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::sync::OnceCell;

use super::*;
use crate::{
    config::BenchConfig,
    filter::{Bounds, Filter, MetaConditions},
};

struct SharedPgvectorContainer {
    #[allow(dead_code)] // Test infrastructure: keeps container alive
    container: ContainerAsync<GenericImage>,
    host: String,
    port: u16,
}

static SHARED_CONTAINER: OnceLock<OnceCell<SharedPgvectorContainer>> = OnceLock::new();

async fn get_shared_container() -> &'static SharedPgvectorContainer {
    let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
    cell.get_or_init(|| async {
        let container = GenericImage::new("pgvector/pgvector", "pg17")
            .with_exposed_port(ContainerPort::Tcp(5432))
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .expect("Failed to start pgvector container");

        let host = container
            .get_host()
            .await
            .expect("Failed to get host")
            .to_string();
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Extensions live in public, visible from every test schema
        let mut admin = PgConnection::connect(&format!(
            "postgres://postgres:postgres@{host}:{port}/postgres"
        ))
        .await
        .expect("Failed to connect to PostgreSQL for extension setup");
        for ext in ["vector", "cube", "earthdistance"] {
            sqlx::query(&format!("CREATE EXTENSION IF NOT EXISTS {ext}"))
                .execute(&mut admin)
                .await
                .expect("Failed to create extension");
        }

        SharedPgvectorContainer {
            container,
            host,
            port,
        }
    })
    .await
}

/// Config for an isolated schema with a freshly created collection.
async fn create_test_collection(extra: &str) -> BenchConfig {
    let shared = get_shared_container().await;
    let schema = format!("test_{}", uuid::Uuid::new_v4().simple());
    let config = BenchConfig::from_str(&format!(
        r#"
        [connection]
        host = "{host}"
        port = {port}
        password = "postgres"
        ssl_mode = "disable"
        schema = "{schema}"

        {extra}
        "#,
        host = shared.host,
        port = shared.port,
    ))
    .expect("test config is valid");

    let mut configurator = Configurator::connect(&config)
        .await
        .expect("Failed to connect configurator");
    configurator.clean().await.expect("clean failed");
    configurator.recreate().await.expect("recreate failed");
    configurator.close().await;
    config
}

async fn count_rows(config: &BenchConfig) -> i64 {
    let mut conn = PgConnection::connect_with(&config.connection.connect_options())
        .await
        .expect("Failed to connect");
    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT count(*) FROM \"{}\"",
        config.collection.table_name
    ))
    .fetch_one(&mut conn)
    .await
    .expect("count failed");
    count
}

fn meta(value: serde_json::Value) -> Option<Metadata> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

const FLAT_L2: &str = r#"
    [engine]
    kind = "pgvector-flat"

    [collection]
    distance = "l2"
    vector_size = 3
"#;

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upload_then_search_returns_own_vector_first() {
    let config = create_test_collection(FLAT_L2).await;
    let vectors = vec![
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
    ];

    let mut uploader = UploadClient::new(&config);
    let written = uploader
        .upload_batch(&[1, 2, 3], &vectors, &[None, None, None])
        .await
        .unwrap();
    assert_eq!(written, 3);
    uploader.post_upload().await.unwrap();
    uploader.close().await;

    let mut searcher = SearchClient::connect(&config).await.unwrap();
    let hits = searcher.search(&vectors[0], None, 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, 1);
    // Exact match under L2 has distance 0, reported as similarity -0
    assert!(hits[0].1.abs() < 1e-6);

    let hits = searcher.search(&vectors[1], None, 3).await.unwrap();
    assert_eq!(hits[0].0, 2);
    assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    searcher.close().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_bulk_load_round_trip() {
    let mut config = create_test_collection(&format!(
        "{FLAT_L2}\n[[collection.schema]]\nname = \"name\"\ntype = \"text\"\n"
    ))
    .await;
    config.engine.bulk_load = crate::capabilities::BulkLoadMethod::Insert;

    let mut uploader = UploadClient::new(&config);
    uploader
        .upload_batch(
            &[10, 20],
            &[vec![1.0, 1.0, 1.0], vec![-1.0, -1.0, -1.0]],
            &[meta(json!({"name": "O'Brien\ttab"})), None],
        )
        .await
        .unwrap();
    uploader.close().await;

    assert_eq!(count_rows(&config).await, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_labels_containment_filter() {
    let config = create_test_collection(
        r#"
        [engine]
        kind = "pgvector-flat"

        [collection]
        vector_size = 2

        [[collection.schema]]
        name = "labels"
        type = "json"
        "#,
    )
    .await;

    let mut uploader = UploadClient::new(&config);
    uploader
        .upload_batch(
            &[1, 2, 3],
            &[vec![1.0, 0.0], vec![0.9, 0.1], vec![0.8, 0.2]],
            &[
                meta(json!({"labels": ["cs.AI", "cs.LG"]})),
                meta(json!({"labels": ["math.CO"]})),
                meta(json!({"labels": ["cs.AI"]})),
            ],
        )
        .await
        .unwrap();
    uploader.close().await;

    let conditions =
        MetaConditions::all(vec![Filter::exact_match("labels", vec!["cs.AI"]).unwrap()]);
    let mut searcher = SearchClient::connect(&config).await.unwrap();
    let hits = searcher
        .search(&[1.0, 0.0], Some(&conditions), 10)
        .await
        .unwrap();
    let mut ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
    searcher.close().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_labels_containment_requires_every_label() {
    let config = create_test_collection(
        r#"
        [engine]
        kind = "pgvector-flat"

        [collection]
        vector_size = 2

        [[collection.schema]]
        name = "labels"
        type = "json"
        "#,
    )
    .await;

    let mut uploader = UploadClient::new(&config);
    uploader
        .upload_batch(
            &[1, 2, 3],
            &[vec![1.0, 0.0], vec![0.9, 0.1], vec![0.8, 0.2]],
            &[
                meta(json!({"labels": ["ai", "nlp", "vision"]})),
                meta(json!({"labels": ["ai"]})),
                meta(json!({"labels": ["nlp", "speech"]})),
            ],
        )
        .await
        .unwrap();
    uploader.close().await;

    let mut searcher = SearchClient::connect(&config).await.unwrap();

    let both =
        MetaConditions::all(vec![Filter::exact_match("labels", vec!["ai", "nlp"]).unwrap()]);
    let hits = searcher
        .search(&[1.0, 0.0], Some(&both), 10)
        .await
        .unwrap();
    let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1]);

    let absent = MetaConditions::all(vec![Filter::exact_match("labels", vec!["quantum"]).unwrap()]);
    let hits = searcher
        .search(&[1.0, 0.0], Some(&absent), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    searcher.close().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_range_filter_half_open_interval() {
    let config = create_test_collection(
        r#"
        [collection]
        distance = "dot"
        vector_size = 2

        [[collection.schema]]
        name = "year"
        type = "int"
        "#,
    )
    .await;

    let years: Vec<i64> = (2010..2025).collect();
    let ids: Vec<i64> = (1..=years.len() as i64).collect();
    let vectors: Vec<Vec<f32>> = ids.iter().map(|i| vec![*i as f32, 1.0]).collect();
    let metadata: Vec<Option<Metadata>> = years.iter().map(|y| meta(json!({"year": y}))).collect();

    let mut uploader = UploadClient::new(&config);
    uploader.upload_batch(&ids, &vectors, &metadata).await.unwrap();
    uploader.close().await;

    let conditions = MetaConditions::all(vec![
        Filter::range("year", Bounds::new().gte(2015).lt(2020)).unwrap(),
    ]);
    let mut searcher = SearchClient::connect(&config).await.unwrap();
    let hits = searcher
        .search(&[1.0, 0.0], Some(&conditions), 100)
        .await
        .unwrap();
    searcher.close().await;

    // ids 6..=10 carry years 2015..=2019
    let mut found: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
    found.sort();
    assert_eq!(found, vec![6, 7, 8, 9, 10]);
    // Higher inner product ranks first
    assert_eq!(hits[0].0, 10);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_transform_writes_nothing() {
    let config = create_test_collection(FLAT_L2).await;
    let ids: Vec<i64> = (0..1000).collect();
    let vectors: Vec<Vec<f32>> = ids.iter().map(|i| vec![*i as f32, 0.0, 0.0]).collect();
    let metadata: Vec<Option<Metadata>> = ids
        .iter()
        .map(|i| meta(json!({"fail": *i == 500})))
        .collect();

    let mut uploader = UploadClient::new(&config).with_transform(
        |m: Option<&Metadata>| -> Result<Vec<ColumnValue>, TransformError> {
            match m.and_then(|m| m.get("fail")) {
                Some(serde_json::Value::Bool(true)) => {
                    Err(TransformError::Custom("corrupt record".into()))
                }
                _ => Ok(Vec::new()),
            }
        },
    );
    let err = uploader
        .upload_batch(&ids, &vectors, &metadata)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transform {
            batch: 0,
            record: 500,
            ..
        }
    ));
    uploader.close().await;

    assert_eq!(count_rows(&config).await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_database_failure_rolls_back_batch() {
    let config = create_test_collection(FLAT_L2).await;
    let ids: Vec<i64> = (0..1000).map(|i| if i == 500 { 0 } else { i }).collect();
    let vectors: Vec<Vec<f32>> = ids.iter().map(|_| vec![0.0, 0.0, 0.0]).collect();
    let metadata = vec![None; ids.len()];

    let mut uploader = UploadClient::new(&config);
    uploader
        .upload_batch(&[5000], &[vec![1.0, 1.0, 1.0]], &[None])
        .await
        .unwrap();
    let err = uploader
        .upload_batch(&ids, &vectors, &metadata)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Upload { batch: 1, .. }));

    // The connection is still usable after the rollback
    uploader
        .upload_batch(&[5001], &[vec![1.0, 1.0, 1.0]], &[None])
        .await
        .unwrap();
    uploader.close().await;

    assert_eq!(count_rows(&config).await, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_geo_filter_without_capability_is_incompatible() {
    let config = create_test_collection(
        r#"
        [collection]
        vector_size = 2

        [[collection.schema]]
        name = "location"
        type = "geo"
        "#,
    )
    .await;

    let conditions = MetaConditions::all(vec![
        Filter::geo("location", 52.52, 13.405, 1000.0).unwrap(),
    ]);
    let mut searcher = SearchClient::connect(&config).await.unwrap();
    let err = searcher
        .search(&[1.0, 0.0], Some(&conditions), 10)
        .await
        .unwrap_err();
    assert!(err.is_incompatible());
    searcher.close().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_geo_filter_with_capability() {
    let config = create_test_collection(
        r#"
        [engine]
        kind = "pgvector-flat"
        geo_filters = true

        [collection]
        vector_size = 2

        [[collection.schema]]
        name = "location"
        type = "geo"
        "#,
    )
    .await;

    let mut uploader = UploadClient::new(&config);
    uploader
        .upload_batch(
            &[1, 2],
            &[vec![1.0, 0.0], vec![1.0, 0.0]],
            &[
                meta(json!({"location": {"lat": 52.5200, "lon": 13.4050}})),
                meta(json!({"location": {"lat": 48.8566, "lon": 2.3522}})),
            ],
        )
        .await
        .unwrap();
    uploader.close().await;

    // 5 km around Berlin Mitte
    let conditions = MetaConditions::all(vec![
        Filter::geo("location", 52.52, 13.40, 5000.0).unwrap(),
    ]);
    let mut searcher = SearchClient::connect(&config).await.unwrap();
    let hits = searcher
        .search(&[1.0, 0.0], Some(&conditions), 10)
        .await
        .unwrap();
    searcher.close().await;
    assert_eq!(hits.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_recreate_rejects_oversized_vectors() {
    let shared = get_shared_container().await;
    let config = BenchConfig::from_str(&format!(
        r#"
        [connection]
        host = "{}"
        port = {}
        password = "postgres"
        ssl_mode = "disable"

        [collection]
        table_name = "too_wide"
        vector_size = 3072
        "#,
        shared.host, shared.port
    ))
    .unwrap();

    let mut configurator = Configurator::connect(&config).await.unwrap();
    let err = configurator.recreate().await.unwrap_err();
    assert!(err.is_incompatible());
    configurator.close().await;
}
