//! Tests for the Pipeline module

use super::*;
use crate::domain::asset::AssetField;
use crate::domain::error::{IngestError, LookupError, NotifyError, RuleError, StoreError};
use crate::domain::geo::GeoPoint;
use crate::domain::geozone::{Geozone, ZoneShape};
use crate::domain::status::StatusCode;
use crate::domain::types::{CellTower, EventField};
use crate::infra::config::{AssetSeed, DateAction, RuleConfig, SpeedAction};
use crate::io::geocoder::Lookup;
use crate::io::geozones::StaticGeozoneDirectory;
use crate::io::notifier::{Delivery, EmailMessage, SmsMessage};
use crate::io::rules::{ActionMask, ConfigRuleEngine, RuleOutcome};
use crate::io::store::MemoryStore;
use crate::services::enrichment::EnrichmentMask;
use async_trait::async_trait;
use parking_lot::Mutex;

const NOW: i64 = 1_700_000_000;
const ASSET: &str = "truck-1";

/// Notifier that keeps every delivery for inspection
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Delivery>>,
}

impl Notifier for RecordingNotifier {
    fn send_email(&self, from: &str, to: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent.lock().push(Delivery::Email(EmailMessage {
            from: from.to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        }));
        Ok(())
    }

    fn send_sms(&self, gateway: &str, to: &[String], message: &str) -> Result<(), NotifyError> {
        self.sent.lock().push(Delivery::Sms(SmsMessage {
            gateway: gateway.to_string(),
            to: to.to_vec(),
            message: message.to_string(),
        }));
        Ok(())
    }
}

/// Geocoder that answers from "cache" or defers to the workers
struct FakeGeocoder {
    cached: bool,
}

#[async_trait]
impl ReverseGeocoder for FakeGeocoder {
    fn try_address(&self, _point: &GeoPoint) -> Lookup<String> {
        if self.cached {
            Lookup::Ready("1 Main St".to_string())
        } else {
            Lookup::Slow
        }
    }

    async fn address(&self, _point: &GeoPoint) -> Result<Option<String>, LookupError> {
        Ok(Some("2 Slow St".to_string()))
    }
}

struct SlowCellLocator;

#[async_trait]
impl CellLocator for SlowCellLocator {
    fn try_locate(&self, _cell: &CellTower) -> Lookup<GeoPoint> {
        Lookup::Slow
    }

    async fn locate(&self, _cell: &CellTower) -> Result<Option<GeoPoint>, LookupError> {
        Ok(Some(GeoPoint::new(40.5, -105.0)))
    }
}

/// Store that refuses synthesized events and passes everything else through
struct RejectSynthesized {
    inner: Arc<MemoryStore>,
}

impl EventStore for RejectSynthesized {
    fn save_event(&self, event: &TelemetryEvent) -> Result<(), StoreError> {
        if event.synthesized {
            return Err(StoreError::Unavailable("synthesized insert refused".to_string()));
        }
        self.inner.save_event(event)
    }

    fn update_event(&self, event: &TelemetryEvent, fields: &[EventField]) -> Result<(), StoreError> {
        self.inner.update_event(event, fields)
    }

    fn load_asset(&self, asset_id: &AssetId) -> Result<Option<AssetState>, StoreError> {
        self.inner.load_asset(asset_id)
    }

    fn update_asset(&self, state: &AssetState, fields: &[AssetField]) -> Result<(), StoreError> {
        self.inner.update_asset(state, fields)
    }
}

/// Rule engine whose every evaluation fails
struct FailingRules;

impl RuleEngine for FailingRules {
    fn execute_selector(&self, _selector: &str, _event: &TelemetryEvent) -> Result<ActionMask, RuleError> {
        Err(RuleError::Evaluation("engine offline".to_string()))
    }

    fn execute_rules(&self, _event: &TelemetryEvent) -> Result<RuleOutcome, RuleError> {
        Err(RuleError::Evaluation("engine offline".to_string()))
    }

    fn check_selector_syntax(&self, _selector: &str) -> bool {
        true
    }
}

/// Test harness keeping handles on the collaborators the pipeline writes to
struct TestPipeline {
    pipeline: Pipeline,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;
    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl std::ops::DerefMut for TestPipeline {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pipeline
    }
}

impl TestPipeline {
    fn state(&self) -> &AssetState {
        self.pipeline.asset_state(&AssetId::new(ASSET)).expect("asset state")
    }

    fn stored(&self) -> Vec<TelemetryEvent> {
        self.store.events_for(&AssetId::new(ASSET))
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.notifier.sent.lock().clone()
    }
}

fn zone(id: &str, lat: f64) -> Geozone {
    Geozone {
        id: id.to_string(),
        description: String::new(),
        shape: ZoneShape::PointRadius { centers: vec![GeoPoint::new(lat, -105.0)], radius_m: 300.0 },
        priority: 0,
        active: true,
        group_id: None,
        arrival: true,
        departure: true,
        auto_notify: false,
        reverse_geocode: false,
        client_upload: false,
        corridor_id: None,
        corridor_start: false,
        corridor_end: false,
    }
}

/// depot (40.0), yard (40.1), corridor origin (41.0) and destination (41.1)
fn zones() -> Vec<Geozone> {
    let mut depot = zone("depot", 40.0);
    depot.description = "Depot".to_string();
    depot.auto_notify = true;
    depot.reverse_geocode = true;

    let mut origin = zone("origin", 41.0);
    origin.corridor_id = Some("route-9".to_string());
    origin.corridor_start = true;

    let mut destination = zone("destination", 41.1);
    destination.corridor_end = true;

    vec![depot, zone("yard", 40.1), origin, destination]
}

fn seed() -> AssetSeed {
    AssetSeed {
        id: ASSET.to_string(),
        account: "acme".to_string(),
        notify_email: Some("ops@example.com, SMS:5551234".to_string()),
        notify_selector: None,
    }
}

fn create_test_pipeline() -> TestPipeline {
    create_test_pipeline_with(PipelineConfig::default(), |c| c)
}

fn create_test_pipeline_with_config(config: PipelineConfig) -> TestPipeline {
    create_test_pipeline_with(config, |c| c)
}

fn create_test_pipeline_with(
    config: PipelineConfig,
    extra: impl FnOnce(Collaborators) -> Collaborators,
) -> TestPipeline {
    let store = Arc::new(MemoryStore::with_assets(&[seed()]));
    let notifier = Arc::new(RecordingNotifier::default());
    let rules = ConfigRuleEngine::new(&[RuleConfig {
        id: "ignition".to_string(),
        status_codes: vec!["IGN.ON".to_string()],
        record_last: true,
        actions: 0,
    }])
    .expect("valid rules");
    let collaborators = Collaborators::new(store.clone())
        .with_rules(Arc::new(rules))
        .with_notifier(notifier.clone())
        .with_geozones(Arc::new(StaticGeozoneDirectory::new(&zones(), &[])));
    let pipeline = Pipeline::new(config, extra(collaborators), Arc::new(Metrics::new()));
    TestPipeline { pipeline, store, notifier }
}

/// Builder for creating test TelemetryEvent instances
struct EventBuilder {
    event: TelemetryEvent,
}

impl EventBuilder {
    fn new(ts: i64, code: StatusCode) -> Self {
        Self { event: TelemetryEvent::new(AssetId::new(ASSET), ts, code) }
    }

    fn at(ts: i64, lat: f64) -> Self {
        Self::new(ts, StatusCode::LOCATION).with_point(lat, -105.0)
    }

    fn with_point(mut self, lat: f64, lon: f64) -> Self {
        self.event.point = Some(GeoPoint::new(lat, lon));
        self
    }

    fn with_speed(mut self, kph: f64) -> Self {
        self.event.speed_kph = kph;
        self
    }

    fn with_fuel(mut self, level: f64) -> Self {
        self.event.fuel_level = Some(level);
        self
    }

    fn with_cell(self) -> Self {
        self.with_cell_id(1234)
    }

    fn with_cell_id(mut self, cid: u32) -> Self {
        self.event.cell_tower = Some(CellTower { mcc: 310, mnc: 410, lac: 7, cid });
        self
    }

    fn build(self) -> TelemetryEvent {
        self.event
    }
}

fn synthesized_codes(outcome: &IngestOutcome) -> Vec<(i64, StatusCode)> {
    match outcome {
        IngestOutcome::Stored { synthesized, .. } => {
            synthesized.iter().map(|k| (k.timestamp, k.status_code)).collect()
        }
        IngestOutcome::Heartbeat => Vec::new(),
    }
}

// ============================================================================
// Validation and heartbeats
// ============================================================================

#[test]
fn test_heartbeat_changes_nothing() {
    let mut p = create_test_pipeline();
    let outcome = p.ingest_at(EventBuilder::new(NOW - 10, StatusCode::NONE).build(), NOW).unwrap();

    assert_eq!(outcome, IngestOutcome::Heartbeat);
    assert_eq!(p.store.event_count(), 0);
    assert!(p.asset_state(&AssetId::new(ASSET)).is_none());
    assert_eq!(p.metrics().heartbeats(), 1);
}

#[test]
fn test_first_event_stored_and_state_created() {
    let mut p = create_test_pipeline();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();

    let IngestOutcome::Stored { key, synthesized } = outcome else {
        panic!("expected stored event");
    };
    assert!(synthesized.is_empty());
    assert_eq!(key.account_id, "acme");
    assert!(p.store.event(&key).is_some());
    assert_eq!(p.state().last_event_time, NOW - 100);

    let persisted = p.store.asset(&AssetId::new(ASSET)).unwrap();
    assert_eq!(persisted.last_event_time, NOW - 100);
    assert_eq!(p.metrics().events_accepted(), 1);
}

#[test]
fn test_future_timestamp_truncated_to_now() {
    let config = PipelineConfig::default().with_future_policy(DateAction::Truncate, 86_400);
    let mut p = create_test_pipeline_with_config(config);
    p.ingest_at(EventBuilder::at(NOW + 200_000, 45.0).build(), NOW).unwrap();

    let stored = p.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].timestamp, NOW);
}

#[test]
fn test_rejected_event_leaves_no_trace() {
    let config = PipelineConfig::default().with_future_policy(DateAction::Ignore, 86_400);
    let mut p = create_test_pipeline_with_config(config);
    let result = p.ingest_at(EventBuilder::at(NOW + 200_000, 45.0).build(), NOW);

    assert!(matches!(result, Err(IngestError::Rejected(_))));
    assert_eq!(p.store.event_count(), 0);
    assert!(p.asset_state(&AssetId::new(ASSET)).is_none());
    assert_eq!(p.metrics().events_rejected(), 1);
}

#[test]
fn test_excessive_speed_zeroed() {
    let config = PipelineConfig::default().with_speed_policy(SpeedAction::Zero, 200.0);
    let mut p = create_test_pipeline_with_config(config);
    p.ingest_at(EventBuilder::at(NOW - 100, 45.0).with_speed(250.0).build(), NOW).unwrap();

    assert_eq!(p.stored()[0].speed_kph, 0.0);
}

// ============================================================================
// Motion and accumulators
// ============================================================================

#[test]
fn test_motion_starts_after_displacement() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();
    assert!(!p.state().is_moving());

    // ~500 m north
    p.ingest_at(EventBuilder::at(NOW - 100, 45.0045).build(), NOW).unwrap();
    assert!(p.state().is_moving());
    assert_eq!(p.state().last_start_time, NOW - 100);
}

#[test]
fn test_out_of_order_event_stored_without_touching_position() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();
    let before = p.state().clone();

    // older event inside a zone: stored, but no transition and no position change
    let outcome = p.ingest_at(EventBuilder::at(NOW - 500, 40.0).build(), NOW).unwrap();

    assert!(synthesized_codes(&outcome).is_empty());
    assert_eq!(p.stored().len(), 2);
    assert_eq!(p.state().last_event_time, before.last_event_time);
    assert_eq!(p.state().last_fix, before.last_fix);
}

#[test]
fn test_fuel_refill_synthesized() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 45.0).with_fuel(0.1).build(), NOW).unwrap();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 45.0).with_fuel(0.6).build(), NOW).unwrap();

    assert_eq!(synthesized_codes(&outcome), vec![(NOW - 100, StatusCode::FUEL_REFILL)]);
    assert_eq!(p.state().last_fuel_level, Some(0.6));
}

#[test]
fn test_ignition_counter_never_holds_both_times() {
    let mut p = create_test_pipeline();
    let codes = [
        StatusCode::IGNITION_ON,
        StatusCode::LOCATION,
        StatusCode::IGNITION_OFF,
        StatusCode::IGNITION_OFF,
        StatusCode::IGNITION_ON,
    ];
    for (i, code) in codes.into_iter().enumerate() {
        let ts = NOW - 1000 + i as i64 * 100;
        p.ingest_at(EventBuilder::new(ts, code).build(), NOW).unwrap();
        let ignition = p.state().ignition;
        assert!(ignition.on_time == 0 || ignition.off_time == 0, "{:?}", ignition);
    }
    assert!(p.state().ignition.is_on());
}

#[test]
fn test_event_rate_ages_between_reads() {
    let mut p = create_test_pipeline();
    for i in 0..3 {
        p.ingest_at(EventBuilder::at(NOW - 30 + i, 45.0).build(), NOW).unwrap();
    }
    let id = AssetId::new(ASSET);
    let fresh = p.events_per_second_at(&id, NOW * 1000).unwrap();
    let aged = p.events_per_second_at(&id, (NOW + 600) * 1000).unwrap();
    assert!(fresh > 0.0);
    assert!(aged < fresh);
}

// ============================================================================
// Geozones and corridors
// ============================================================================

#[test]
fn test_leaving_zone_synthesizes_single_depart() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 40.1).build(), NOW).unwrap();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();

    assert_eq!(synthesized_codes(&outcome), vec![(NOW - 102, StatusCode::GEOFENCE_DEPART)]);
    let depart = p.stored().into_iter().find(|e| e.status_code == StatusCode::GEOFENCE_DEPART).unwrap();
    assert_eq!(depart.geozone_id.as_deref(), Some("yard"));
    assert!(depart.synthesized);
}

#[test]
fn test_zone_to_zone_departs_before_arriving() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 40.1).build(), NOW).unwrap();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 40.0).build(), NOW).unwrap();

    assert_eq!(
        synthesized_codes(&outcome),
        vec![(NOW - 102, StatusCode::GEOFENCE_DEPART), (NOW - 101, StatusCode::GEOFENCE_ARRIVE)]
    );
    assert_eq!(p.metrics().synthesized(), 3); // first fix arrived in the yard
}

#[test]
fn test_arrival_auto_notifies_email_and_sms() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();
    p.ingest_at(EventBuilder::at(NOW - 100, 40.0).build(), NOW).unwrap();

    let deliveries = p.deliveries();
    assert_eq!(deliveries.len(), 2);
    match &deliveries[0] {
        Delivery::Email(email) => {
            assert_eq!(email.subject, "truck-1 Arrive: Depot");
            assert_eq!(email.to, vec!["ops@example.com".to_string()]);
        }
        other => panic!("expected email, got {:?}", other),
    }
    match &deliveries[1] {
        Delivery::Sms(sms) => assert_eq!(sms.to, vec!["5551234".to_string()]),
        other => panic!("expected sms, got {:?}", other),
    }
}

#[test]
fn test_zone_description_used_as_address() {
    let config = PipelineConfig::default().with_address_from_geozone(true);
    let mut p = create_test_pipeline_with_config(config);
    p.ingest_at(EventBuilder::at(NOW - 100, 40.0).build(), NOW).unwrap();

    let primary = p.stored().into_iter().find(|e| e.status_code == StatusCode::LOCATION).unwrap();
    assert_eq!(primary.address.as_deref(), Some("Depot"));
    assert_eq!(primary.geozone_id.as_deref(), Some("depot"));
}

#[test]
fn test_corridor_activated_and_cleared() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 300, 41.0).build(), NOW).unwrap();

    let outcome = p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();
    assert_eq!(
        synthesized_codes(&outcome),
        vec![(NOW - 202, StatusCode::GEOFENCE_DEPART), (NOW - 202, StatusCode::CORRIDOR_ACTIVE)]
    );
    assert_eq!(p.state().active_corridor.as_deref(), Some("route-9"));

    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 41.1).build(), NOW).unwrap();
    assert_eq!(
        synthesized_codes(&outcome),
        vec![(NOW - 101, StatusCode::GEOFENCE_ARRIVE), (NOW - 101, StatusCode::CORRIDOR_INACTIVE)]
    );
    assert!(p.state().active_corridor.is_none());
}

#[test]
fn test_synthesis_depth_bounded() {
    let config = PipelineConfig::default().with_max_synth_depth(1);
    let mut p = create_test_pipeline_with_config(config);
    p.ingest_at(EventBuilder::at(NOW - 300, 41.0).build(), NOW).unwrap();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();

    assert_eq!(synthesized_codes(&outcome), vec![(NOW - 202, StatusCode::GEOFENCE_DEPART)]);
    assert_eq!(p.metrics().synth_dropped(), 1);
    assert_eq!(p.state().active_corridor.as_deref(), Some("route-9"));
}

// ============================================================================
// Rules and persistence failures
// ============================================================================

#[test]
fn test_matching_rule_records_last_notification() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::new(NOW - 100, StatusCode::IGNITION_ON).build(), NOW).unwrap();

    let state = p.state();
    assert_eq!(state.last_notify_time, NOW - 100);
    assert_eq!(state.last_notify_code, Some(StatusCode::IGNITION_ON.0));
    assert_eq!(state.last_notify_rule.as_deref(), Some("ignition"));

    let persisted = p.store.asset(&AssetId::new(ASSET)).unwrap();
    assert_eq!(persisted.last_notify_rule.as_deref(), Some("ignition"));
}

#[test]
fn test_store_failure_leaves_state_untouched() {
    let mut p = create_test_pipeline();
    p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();
    let before = p.state().clone();

    p.store.set_fail_writes(true);
    let result = p.ingest_at(EventBuilder::at(NOW - 100, 46.0).build(), NOW);

    assert!(matches!(result, Err(IngestError::Store(_))));
    assert_eq!(p.state(), &before);
    assert_eq!(p.metrics().store_failures(), 1);
}

#[test]
fn test_failed_synthesized_insert_keeps_primary() {
    let mut p = create_test_pipeline();
    p.pipeline.collaborators.store = Arc::new(RejectSynthesized { inner: p.store.clone() });
    p.ingest_at(EventBuilder::at(NOW - 200, 45.0).build(), NOW).unwrap();
    let outcome = p.ingest_at(EventBuilder::at(NOW - 100, 40.0).build(), NOW).unwrap();

    // the depot arrival could not be stored
    assert!(matches!(outcome, IngestOutcome::Stored { ref synthesized, .. } if synthesized.is_empty()));
    assert_eq!(p.metrics().synth_dropped(), 1);
    assert_eq!(p.stored().len(), 2);
    assert!(p.deliveries().is_empty());

    assert_eq!(p.state().last_event_time, NOW - 100);
    let persisted = p.store.asset(&AssetId::new(ASSET)).unwrap();
    assert_eq!(persisted.last_fix.map(|f| f.point), Some(GeoPoint::new(40.0, -105.0)));
}

#[test]
fn test_rule_engine_failure_still_commits_state() {
    let mut p = create_test_pipeline_with(PipelineConfig::default(), |c| c.with_rules(Arc::new(FailingRules)));
    let outcome = p.ingest_at(EventBuilder::new(NOW - 100, StatusCode::IGNITION_ON).build(), NOW);

    assert!(matches!(outcome, Ok(IngestOutcome::Stored { .. })));
    assert_eq!(p.metrics().rule_failures(), 1);
    assert_eq!(p.state().last_event_time, NOW - 100);
    assert!(p.state().ignition.is_on());
    assert_eq!(p.state().last_notify_time, 0);

    let persisted = p.store.asset(&AssetId::new(ASSET)).unwrap();
    assert!(persisted.ignition.is_on());
}

#[test]
fn test_duplicate_event_rejected_by_store() {
    let mut p = create_test_pipeline();
    let event = EventBuilder::at(NOW - 100, 45.0).build();
    p.ingest_at(event.clone(), NOW).unwrap();

    assert!(matches!(p.ingest_at(event, NOW), Err(IngestError::Store(_))));
    assert_eq!(p.stored().len(), 1);
}

// ============================================================================
// Enrichment
// ============================================================================

#[test]
fn test_cached_address_applied_before_storing() {
    let mut p = create_test_pipeline_with(PipelineConfig::default(), |c| {
        c.with_geocoder(Arc::new(FakeGeocoder { cached: true }))
    });
    let _dispatcher = p.start_enrichment().expect("geocoder configured");
    p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();

    assert_eq!(p.stored()[0].address.as_deref(), Some("1 Main St"));
    assert_eq!(p.metrics().enrichment_queued(), 0);
}

#[test]
fn test_slow_address_deferred_to_workers() {
    let mut p = create_test_pipeline_with(PipelineConfig::default(), |c| {
        c.with_geocoder(Arc::new(FakeGeocoder { cached: false }))
    });
    let _dispatcher = p.start_enrichment().expect("geocoder configured");
    p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();

    assert!(p.stored()[0].address.is_none());
    assert_eq!(p.metrics().enrichment_queued(), 1);
}

#[test]
fn test_no_enrichment_without_providers() {
    let mut p = create_test_pipeline();
    assert!(p.start_enrichment().is_none());
    assert!(!p.requeue_enrichment(EventBuilder::at(NOW, 45.0).build(), EnrichmentMask::ADDRESS));
}

#[tokio::test]
async fn test_workers_amend_stored_event() {
    let mut p = create_test_pipeline_with(PipelineConfig::default(), |c| {
        c.with_geocoder(Arc::new(FakeGeocoder { cached: false }))
    });
    let dispatcher = p.start_enrichment().expect("geocoder configured");
    let handle = tokio::spawn(dispatcher.run());

    p.ingest_at(EventBuilder::at(NOW - 100, 45.0).build(), NOW).unwrap();
    p.close_enrichment();
    handle.await.unwrap();

    assert_eq!(p.stored()[0].address.as_deref(), Some("2 Slow St"));
    assert_eq!(p.metrics().enrichment_completed(), 1);
}

#[tokio::test]
async fn test_cell_location_updates_serving_cell_and_requeues_address() {
    let mut p = create_test_pipeline_with(PipelineConfig::default(), |c| {
        c.with_geocoder(Arc::new(FakeGeocoder { cached: false }))
            .with_cell_locator(Arc::new(SlowCellLocator))
    });
    let dispatcher = p.start_enrichment().expect("providers configured");
    let handle = tokio::spawn(dispatcher.run());

    // no GPS fix: only the cell can be located now
    p.ingest_at(EventBuilder::new(NOW - 100, StatusCode::LOCATION).with_cell().build(), NOW).unwrap();
    assert_eq!(p.metrics().enrichment_queued(), 1);

    let update = p.updates.as_mut().unwrap().recv().await.expect("serving cell update");
    p.apply_update(update);

    let cell = CellTower { mcc: 310, mnc: 410, lac: 7, cid: 1234 };
    assert_eq!(p.state().serving_cell.as_ref(), Some(&cell));
    assert_eq!(p.store.asset(&AssetId::new(ASSET)).unwrap().serving_cell, Some(cell));
    assert_eq!(p.metrics().enrichment_queued(), 2);

    p.close_enrichment();
    handle.await.unwrap();

    let stored = &p.stored()[0];
    assert_eq!(stored.cell_point, Some(GeoPoint::new(40.5, -105.0)));
    assert_eq!(stored.address.as_deref(), Some("2 Slow St"));
}

#[test]
fn test_update_for_unknown_asset_ignored() {
    let mut p = create_test_pipeline();
    let event = EventBuilder::new(NOW, StatusCode::LOCATION).build();
    p.apply_update(AssetUpdate::ServingCell {
        asset_id: AssetId::new("ghost"),
        cell: CellTower { mcc: 1, mnc: 1, lac: 1, cid: 1 },
        event,
        needs_address: true,
    });
    assert_eq!(p.tracked_assets(), 0);
}

#[test]
fn test_serving_cell_ignores_older_events() {
    let mut p = create_test_pipeline();
    let newest = EventBuilder::at(NOW - 10, 45.0).with_cell_id(1234).build();
    let older = EventBuilder::at(NOW - 500, 45.0).with_cell_id(42).build();
    p.ingest_at(newest.clone(), NOW).unwrap();
    p.ingest_at(older.clone(), NOW).unwrap();

    let cell_of = |e: &TelemetryEvent| e.cell_tower.clone().unwrap();
    p.apply_update(AssetUpdate::ServingCell {
        asset_id: AssetId::new(ASSET),
        cell: cell_of(&newest),
        event: newest,
        needs_address: false,
    });
    // the older lookup finishes last
    p.apply_update(AssetUpdate::ServingCell {
        asset_id: AssetId::new(ASSET),
        cell: cell_of(&older),
        event: older,
        needs_address: false,
    });

    assert_eq!(p.state().serving_cell.as_ref().map(|c| c.cid), Some(1234));
    assert_eq!(p.store.asset(&AssetId::new(ASSET)).unwrap().serving_cell.map(|c| c.cid), Some(1234));
}

#[tokio::test]
async fn test_finish_enrichment_applies_more_updates_than_channel_holds() {
    let config = PipelineConfig::default().with_enrichment(1, 2);
    let mut p = create_test_pipeline_with(config, |c| c.with_cell_locator(Arc::new(SlowCellLocator)));
    let dispatcher = p.start_enrichment().expect("cell locator configured");
    let handle = tokio::spawn(dispatcher.run());

    // nothing drains the update channel while events arrive
    for i in 0..6 {
        let event = EventBuilder::new(NOW - 600 + i * 100, StatusCode::LOCATION).with_cell_id(100 + i as u32).build();
        p.ingest_at(event, NOW).unwrap();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }
    let queued = p.metrics().enrichment_queued();
    assert!(queued > 2, "queued {}", queued);

    let applied = tokio::time::timeout(Duration::from_secs(2), p.finish_enrichment(handle))
        .await
        .expect("dispatcher finished");

    assert_eq!(applied as u64, queued);
    assert_eq!(p.metrics().enrichment_completed(), queued);
    assert!(p.state().serving_cell.is_some());
}

// ============================================================================
// Channel-driven run loop
// ============================================================================

#[tokio::test]
async fn test_run_consumes_until_channel_closed() {
    let mut p = create_test_pipeline();
    let (tx, rx) = mpsc::channel(8);
    let now = epoch_sec();
    tx.send(EventBuilder::at(now - 20, 45.0).build()).await.unwrap();
    tx.send(EventBuilder::new(now - 10, StatusCode::NONE).build()).await.unwrap();
    drop(tx);

    p.run(rx).await;

    assert_eq!(p.stored().len(), 1);
    assert_eq!(p.metrics().heartbeats(), 1);
    assert_eq!(p.tracked_assets(), 1);
}
