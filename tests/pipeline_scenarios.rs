//! End-to-end scenarios: config-built collaborators driving the pipeline

use fleet_ingest::domain::{AssetId, StatusCode, TelemetryEvent};
use fleet_ingest::infra::{Metrics, PipelineConfig};
use fleet_ingest::io::{
    create_outbox, ConfigRecipients, ConfigRuleEngine, MemoryStore, StaticGeozoneDirectory,
};
use fleet_ingest::services::{Collaborators, IngestOutcome, Pipeline};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000;

const CONFIG: &str = r#"
[validation]
future_action = "ignore"
future_max_sec = 3600

[contacts.accounts]
acme = "dispatch@acme.test"

[[groups]]
id = "north"
assets = ["truck-1"]
notify_email = "SMS:5550100"

[[assets]]
id = "truck-1"
account = "acme"
notify_selector = "IGN.ON"

[[geozones]]
id = "depot"
description = "Main Depot"
auto_notify = true
shape = { type = "point_radius", radius_m = 300.0, centers = [{ lat = 39.7392, lon = -104.9903 }] }

[[geozones]]
id = "north-only"
group_id = "north"
shape = { type = "bounded_rect", corners = [{ lat = 40.60, lon = -105.10 }, { lat = 40.50, lon = -105.00 }] }
"#;

fn event(ts: i64, code: StatusCode, lat: f64, lon: f64) -> TelemetryEvent {
    TelemetryEvent::new(AssetId::new("truck-1"), ts, code).with_point(lat, lon)
}

fn build(config: PipelineConfig, outbox: &str) -> (Pipeline, Arc<MemoryStore>, fleet_ingest::io::OutboxWriter) {
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryStore::with_assets(config.assets()));
    let (notifier, writer) = create_outbox(outbox, metrics.clone(), 16);
    let collaborators = Collaborators::new(store.clone())
        .with_rules(Arc::new(ConfigRuleEngine::new(config.rules()).unwrap()))
        .with_notifier(Arc::new(notifier))
        .with_recipients(Arc::new(ConfigRecipients::new(&config)))
        .with_geozones(Arc::new(StaticGeozoneDirectory::new(config.geozones(), config.groups())));
    (Pipeline::new(config, collaborators, metrics), store, writer)
}

#[tokio::test]
async fn test_depot_round_trip_notifies_account_and_group() {
    let dir = tempdir().unwrap();
    let outbox = dir.path().join("outbox.jsonl");
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let (mut pipeline, store, writer) = build(config, outbox.to_str().unwrap());
    let writer_handle = tokio::spawn(writer.run());

    // outside -> depot -> outside
    pipeline.ingest_at(event(NOW - 300, StatusCode::LOCATION, 39.80, -104.99), NOW).unwrap();
    let arrive = pipeline.ingest_at(event(NOW - 200, StatusCode::LOCATION, 39.7392, -104.9903), NOW).unwrap();
    let depart = pipeline.ingest_at(event(NOW - 100, StatusCode::LOCATION, 39.80, -104.99), NOW).unwrap();

    let IngestOutcome::Stored { synthesized, .. } = arrive else { panic!("expected stored") };
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].status_code, StatusCode::GEOFENCE_ARRIVE);
    let IngestOutcome::Stored { synthesized, .. } = depart else { panic!("expected stored") };
    assert_eq!(synthesized[0].status_code, StatusCode::GEOFENCE_DEPART);
    assert_eq!(synthesized[0].timestamp, NOW - 102);

    assert_eq!(store.events_for(&AssetId::new("truck-1")).len(), 5);

    drop(pipeline);
    writer_handle.await.unwrap();

    let content = fs::read_to_string(&outbox).unwrap();
    let records: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    // email + sms per transition
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["kind"], "email");
    assert_eq!(records[0]["to"][0], "dispatch@acme.test");
    assert_eq!(records[0]["subject"], "truck-1 Arrive: Main Depot");
    assert_eq!(records[1]["kind"], "sms");
    assert_eq!(records[1]["to"][0], "5550100");
    assert_eq!(records[2]["subject"], "truck-1 Depart: Main Depot");
}

#[test]
fn test_group_zone_applies_only_to_members() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let (mut pipeline, store, _writer) = build(config, dir.path().join("o.jsonl").to_str().unwrap());

    pipeline.ingest_at(event(NOW - 100, StatusCode::LOCATION, 40.55, -105.05), NOW).unwrap();
    let other = TelemetryEvent::new(AssetId::new("van-9"), NOW - 100, StatusCode::LOCATION).with_point(40.55, -105.05);
    let outcome = pipeline.ingest_at(other, NOW).unwrap();

    assert!(matches!(outcome, IngestOutcome::Stored { ref synthesized, .. } if synthesized.is_empty()));
    let member = store.events_for(&AssetId::new("truck-1"));
    assert_eq!(member.len(), 2);
    assert!(member.iter().all(|e| e.geozone_id.as_deref() == Some("north-only")));
    assert!(store.events_for(&AssetId::new("van-9"))[0].geozone_id.is_none());
}

#[test]
fn test_selector_records_last_notification() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let (mut pipeline, store, _writer) = build(config, dir.path().join("o.jsonl").to_str().unwrap());

    pipeline.ingest_at(event(NOW - 100, StatusCode::IGNITION_ON, 45.0, -100.0), NOW).unwrap();
    pipeline.ingest_at(event(NOW - 50, StatusCode::IGNITION_OFF, 45.0, -100.0), NOW).unwrap();

    let state = store.asset(&AssetId::new("truck-1")).unwrap();
    assert_eq!(state.last_notify_time, NOW - 100);
    assert_eq!(state.last_notify_rule.as_deref(), Some("selector:IGN.ON"));
    assert!(state.ignition.off_time > 0);
}

#[test]
fn test_future_event_ignored_and_state_unchanged() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let (mut pipeline, store, _writer) = build(config, dir.path().join("o.jsonl").to_str().unwrap());

    pipeline.ingest_at(event(NOW - 100, StatusCode::LOCATION, 45.0, -100.0), NOW).unwrap();
    let before = pipeline.asset_state(&AssetId::new("truck-1")).cloned();

    assert!(pipeline.ingest_at(event(NOW + 7200, StatusCode::LOCATION, 45.1, -100.0), NOW).is_err());
    assert_eq!(pipeline.asset_state(&AssetId::new("truck-1")).cloned(), before);
    assert_eq!(store.event_count(), 1);
    assert_eq!(pipeline.metrics().events_rejected(), 1);
}
