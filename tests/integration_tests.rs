//! Integration tests for trackr
//!
//! Fixtures are written to a temporary directory: a tabix-indexed BED file
//! and a BigWig file.

use axum_test::TestServer;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trackr::{
    formats::{NumericalRecord, TabixHeader, TabixWriter, bbi::writer::BbiWriter},
    handlers::{AppState, create_router},
    manager::TrackDataManager,
    model::{Genome, RegionExpander},
    sources::{DecodePool, SourceFactory},
};

fn write_fixtures(dir: &Path) -> (String, String) {
    let mut writer = TabixWriter::new(TabixHeader::bed());
    writer.write_meta("#chrom\tstart\tend\tname").unwrap();
    for i in 0..200u64 {
        let start = i * 100;
        let line = format!("chr1\t{}\t{}\tfeature{}", start, start + 50, i);
        writer.write_record("chr1", start, start + 50, &line).unwrap();
    }
    let (data, index) = writer.finish().unwrap();
    let bed = dir.join("features.bed.gz");
    std::fs::write(&bed, data).unwrap();
    std::fs::write(dir.join("features.bed.gz.tbi"), index).unwrap();

    let values: Vec<NumericalRecord> = (0..1_000u64)
        .map(|i| NumericalRecord {
            chr: "chr1".to_string(),
            start: i * 10,
            end: i * 10 + 10,
            value: (i % 5) as f32,
        })
        .collect();
    let bigwig = BbiWriter::new(vec![("chr1".into(), 100_000), ("chr2".into(), 50_000)])
        .zoom_levels(vec![100, 1_000])
        .write_bigwig(&values)
        .unwrap();
    let bw = dir.join("signal.bw");
    std::fs::write(&bw, bigwig).unwrap();

    assert!(bed.exists() && bw.exists());
    ("features.bed.gz".to_string(), "signal.bw".to_string())
}

fn create_test_server() -> (TestServer, TempDir, String, String) {
    let dir = tempfile::tempdir().unwrap();
    let (bed, bw) = write_fixtures(dir.path());

    let genome = Arc::new(Genome::new(
        "test",
        vec![("chr1".to_string(), 100_000), ("chr2".to_string(), 50_000)],
    ));
    let context = Arc::new(genome.make_context().unwrap());
    let factory = SourceFactory::new(dir.path().to_path_buf(), DecodePool::new(2), 16, 300_000);
    let manager = Arc::new(TrackDataManager::new(factory, RegionExpander::new(1.0)));

    let state = AppState {
        manager,
        genome,
        context,
        min_region_size: 10,
        width_px: 1_000.0,
        decode_workers: 2,
    };

    let app = create_router(state);
    (TestServer::new(app).unwrap(), dir, bed, bw)
}

#[tokio::test]
async fn test_service_info() {
    let (server, _dir, _, _) = create_test_server();

    let response = server.get("/service-info").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["name"], "trackr");
    assert_eq!(body["genome"]["name"], "test");
    assert_eq!(body["genome"]["total_length"], 150_000);
    assert_eq!(body["tracks"], 0);
}

#[tokio::test]
async fn test_view_and_bed_track() {
    let (server, _dir, bed, _) = create_test_server();

    let response = server.post("/view").json(&json!({"region": "chr1:1,001-2,000"})).await;
    response.assert_status_ok();
    let view: Value = response.json();
    assert_eq!(view["region"], "chr1:1001-2000");
    assert_eq!(view["bases_per_pixel"], 1.0);
    // One view width fetched on each side.
    assert_eq!(view["expanded_region"], "chr1:1-3000");

    let response = server.post("/tracks").json(&json!({"kind": "bed", "url": bed})).await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let track: Value = response.json();
    assert_eq!(track["status"], "ready");
    let records = track["records"].as_array().unwrap();
    assert_eq!(records.len(), 30);
    assert_eq!(records[0]["type"], "bed");
    assert_eq!(records[0]["rest"][0], "feature0");

    let id = track["id"].as_u64().unwrap();
    let response = server
        .get(&format!("/tracks/{}/query", id))
        .add_query_param("region", "chr1:101-250")
        .await;
    response.assert_status_ok();
    let query: Value = response.json();
    assert_eq!(query["count"], 2);

    // Moving the view refetches.
    let response = server.post("/view").json(&json!({"pan": 10_000})).await;
    response.assert_status_ok();
    let view: Value = response.json();
    assert_eq!(view["region"], "chr1:11001-12000");
    assert_eq!(view["tracks"][0]["outcome"], "published");

    let track: Value = server.get(&format!("/tracks/{}", id)).await.json();
    assert_eq!(track["records"][0]["start"], 10_000);
}

#[tokio::test]
async fn test_update_and_delete_track() {
    let (server, _dir, bed, _) = create_test_server();
    server
        .post("/view")
        .json(&json!({"region": "chr1:1-1000"}))
        .await
        .assert_status_ok();

    let track: Value = server
        .post("/tracks")
        .json(&json!({"kind": "bed", "url": bed}))
        .await
        .json();
    let id = track["id"].as_u64().unwrap();

    let response = server
        .put(&format!("/tracks/{}", id))
        .json(&json!({"kind": "bed", "url": bed, "options": {"color": "red"}}))
        .await;
    response.assert_status_ok();
    let updated: Value = response.json();
    assert_eq!(updated["update"], "none");
    assert_eq!(updated["spec"]["options"]["color"], "red");

    let response = server
        .put(&format!("/tracks/{}", id))
        .json(&json!({"kind": "bed", "url": bed, "options": {"data_limit": 3}}))
        .await;
    let updated: Value = response.json();
    assert_eq!(updated["update"], "refetch");
    assert_eq!(updated["records"].as_array().unwrap().len(), 3);

    server
        .delete(&format!("/tracks/{}", id))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);
    let response = server.get(&format!("/tracks/{}", id)).await;
    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["kind"], "NotFound");
}

#[tokio::test]
async fn test_bigwig_track_resolution() {
    let (server, _dir, _, bw) = create_test_server();
    server
        .post("/view")
        .json(&json!({"region": "chr1:1-1000"}))
        .await
        .assert_status_ok();

    let track: Value = server
        .post("/tracks")
        .json(&json!({"kind": "bigwig", "url": bw}))
        .await
        .json();
    assert_eq!(track["status"], "ready");
    assert_eq!(track["records"][0]["type"], "numerical");

    // Zoomed out to the whole chromosome: summaries.
    let id = track["id"].as_u64().unwrap();
    let response = server
        .get(&format!("/tracks/{}/query", id))
        .add_query_param("region", "chr1")
        .add_query_param("bpp", "5000")
        .await;
    let query: Value = response.json();
    assert_eq!(query["records"][0]["type"], "summary");
    assert_eq!(query["count"], 10);
}

#[tokio::test]
async fn test_errors() {
    let (server, _dir, _, _) = create_test_server();

    let response = server.post("/view").json(&json!({"region": "chr1:500-100"})).await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["kind"], "InvalidRange");
    assert_eq!(body["error"]["message"], "Start must be before end");

    server
        .post("/view")
        .json(&json!({"region": "chr2"}))
        .await
        .assert_status_ok();
    let response = server
        .post("/tracks")
        .json(&json!({"kind": "bed", "url": "missing.bed.gz"}))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let track: Value = response.json();
    assert_eq!(track["status"], "error");
    assert!(track["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_paths_outside_data_dir_are_refused() {
    let (server, dir, _, _) = create_test_server();
    server
        .post("/view")
        .json(&json!({"region": "chr1:1-1000"}))
        .await
        .assert_status_ok();

    let absolute = dir.path().join("signal.bw");
    for url in ["../signal.bw".to_string(), absolute.to_string_lossy().into_owned()] {
        let response = server
            .post("/tracks")
            .json(&json!({"kind": "bigwig", "url": url}))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let track: Value = response.json();
        assert_eq!(track["status"], "error", "{}", url);
        assert!(
            track["error"]
                .as_str()
                .unwrap()
                .contains("outside the data directory"),
            "{}",
            url
        );

        let id = track["id"].as_u64().unwrap();
        let response = server
            .get(&format!("/tracks/{}/query", id))
            .add_query_param("region", "chr1:1-100")
            .await;
        response.assert_status(axum::http::StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"]["kind"], "PermissionDenied");
    }
}
