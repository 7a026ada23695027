// Tests for the discovery ingest pipeline

use scopewalk_core::data::Database;
use scopewalk_core::ingest::{ingest_api_call, ingest_links, ingest_navigation};
use scopewalk_core::model::TargetPatch;
use scopewalk_engine::Kind;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

#[test]
fn scoped_batch_stores_only_in_scope_non_assets() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/docs/").unwrap();

    let created = ingest_links(
        &db,
        &target,
        "https://ex.com/docs/",
        &[
            "/docs/a".to_string(),
            "/docs/a.png".to_string(),
            "/other/".to_string(),
            "https://else.com/docs/x".to_string(),
            "not a url ::".to_string(),
        ],
        "dom",
        1_000,
    )
    .unwrap();

    assert_eq!(created, 1);
    let records = db.list_records(&target.id, None, None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].canonical_href, "https://ex.com/docs/a");
    assert_eq!(records[0].kind, Kind::Page);
    assert_eq!(records[0].discovered_via, "dom");
    assert_eq!(records[0].source.as_deref(), Some("https://ex.com/docs/"));
}

#[test]
fn assets_are_stored_when_not_excluded() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/docs/").unwrap();
    let target = db
        .update_target(
            &target.id,
            &TargetPatch {
                exclude_assets: Some(false),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

    ingest_links(
        &db,
        &target,
        "https://ex.com/docs/",
        &["/docs/a.png".to_string()],
        "dom",
        1_000,
    )
    .unwrap();

    let records = db
        .list_records(&target.id, Some(&[Kind::Asset]), None)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].canonical_href, "https://ex.com/docs/a.png");
}

#[test]
fn query_order_does_not_create_duplicates() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/").unwrap();

    ingest_links(
        &db,
        &target,
        "https://ex.com/",
        &["https://ex.com/p?b=2&a=1".to_string()],
        "dom",
        1_000,
    )
    .unwrap();
    ingest_links(
        &db,
        &target,
        "https://ex.com/",
        &["https://ex.com/p?a=1&b=2".to_string()],
        "dom",
        2_000,
    )
    .unwrap();

    let records = db.list_records(&target.id, None, None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].canonical_href, "https://ex.com/p?a=1&b=2");
    let counters = db.get_target(&target.id).unwrap().unwrap().counters;
    assert_eq!(counters.total, 1);
}

#[test]
fn navigation_sightings_record_the_page_itself() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/").unwrap();

    ingest_navigation(&db, &target, "https://ex.com/docs/", 1_000).unwrap();

    let records = db.list_records(&target.id, None, None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].discovered_via, "navigation");
    assert_eq!(records[0].kind, Kind::Page);
}

#[test]
fn api_observations_force_api_kind() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/").unwrap();

    // path heuristics alone would call this a page
    ingest_api_call(
        &db,
        &target,
        "/v2/users",
        "POST",
        Some(201),
        "https://ex.com/app",
        1_000,
    )
    .unwrap();

    let records = db.list_records(&target.id, None, None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, Kind::Api);
    assert_eq!(records[0].method.as_deref(), Some("POST"));
    assert_eq!(records[0].status, Some(201));
    assert_eq!(records[0].discovered_via, "api-hook");

    // out of scope observations contribute nothing
    let created = ingest_api_call(
        &db,
        &target,
        "https://else.com/v2/users",
        "GET",
        None,
        "https://ex.com/app",
        2_000,
    )
    .unwrap();
    assert_eq!(created, 0);
    assert_eq!(db.list_records(&target.id, None, None).unwrap().len(), 1);
}

#[test]
fn api_observation_promotes_an_existing_page_record() {
    let (_tmp, db) = create_test_db();
    let target = db.ensure_target("https://ex.com", "/").unwrap();

    ingest_links(
        &db,
        &target,
        "https://ex.com/",
        &["/search".to_string()],
        "dom",
        1_000,
    )
    .unwrap();
    ingest_api_call(
        &db,
        &target,
        "/search",
        "GET",
        Some(200),
        "https://ex.com/",
        2_000,
    )
    .unwrap();

    let records = db.list_records(&target.id, None, None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, Kind::Api);
    let counters = db.get_target(&target.id).unwrap().unwrap().counters;
    assert_eq!(counters.total, 1);
    assert_eq!(counters.page, 0);
    assert_eq!(counters.api, 1);
}
