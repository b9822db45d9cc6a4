//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::geozone::Geozone;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Policy for out-of-range timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateAction {
    Disabled,
    Ignore,
    Truncate,
}

/// Policy for out-of-range speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedAction {
    Disabled,
    Ignore,
    Truncate,
    Zero,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_past_action")]
    pub past_action: DateAction,
    #[serde(default)]
    pub past_max_sec: i64,
    #[serde(default = "default_future_action")]
    pub future_action: DateAction,
    #[serde(default = "default_future_max_sec")]
    pub future_max_sec: i64,
    #[serde(default = "default_speed_action")]
    pub speed_action: SpeedAction,
    #[serde(default)]
    pub speed_max_kph: f64,
    /// Speeds below this are reported as stationary (0 disables)
    #[serde(default)]
    pub min_speed_kph: f64,
}

fn default_past_action() -> DateAction {
    DateAction::Disabled
}

fn default_future_action() -> DateAction {
    DateAction::Truncate
}

fn default_future_max_sec() -> i64 {
    86_400
}

fn default_speed_action() -> SpeedAction {
    SpeedAction::Disabled
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            past_action: default_past_action(),
            past_max_sec: 0,
            future_action: default_future_action(),
            future_max_sec: default_future_max_sec(),
            speed_action: default_speed_action(),
            speed_max_kph: 0.0,
            min_speed_kph: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_start_radius_m")]
    pub start_radius_m: f64,
}

fn default_start_radius_m() -> f64 {
    150.0
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self { start_radius_m: default_start_radius_m() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OdometerConfig {
    #[serde(default = "default_max_odometer_km")]
    pub max_km: f64,
    #[serde(default = "default_true")]
    pub never_decrease: bool,
    /// Estimate from GPS displacement when the device reports no odometer
    #[serde(default = "default_true")]
    pub estimate: bool,
}

fn default_max_odometer_km() -> f64 {
    1_000_000.0
}

fn default_true() -> bool {
    true
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self { max_km: default_max_odometer_km(), never_decrease: true, estimate: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_engine_hours")]
    pub max_hours: f64,
    /// Treat ignition on/off as engine start/stop
    #[serde(default)]
    pub simulate_from_ignition: bool,
}

fn default_max_engine_hours() -> f64 {
    500_000.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_hours: default_max_engine_hours(), simulate_from_ignition: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpsConfig {
    /// Window over which an event's weight decays by `weight`
    #[serde(default = "default_eps_range_sec")]
    pub range_sec: u64,
    #[serde(default = "default_eps_weight")]
    pub weight: f64,
}

fn default_eps_range_sec() -> u64 {
    60
}

fn default_eps_weight() -> f64 {
    0.5
}

impl Default for EpsConfig {
    fn default() -> Self {
        Self { range_sec: default_eps_range_sec(), weight: default_eps_weight() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeozoneConfig {
    /// Use the zone description as the event address for reverse-geocode zones
    #[serde(default)]
    pub address_from_geozone: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuelConfig {
    /// Minimum rise (fraction of tank) reported as a refill (0 disables)
    #[serde(default = "default_fuel_delta")]
    pub refill_delta: f64,
    /// Minimum drop (fraction of tank) reported as theft (0 disables)
    #[serde(default = "default_fuel_delta")]
    pub theft_delta: f64,
}

fn default_fuel_delta() -> f64 {
    0.2
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self { refill_delta: default_fuel_delta(), theft_delta: default_fuel_delta() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_workers")]
    pub workers: usize,
    #[serde(default = "default_enrichment_queue")]
    pub queue_depth: usize,
    #[serde(default = "default_true")]
    pub reverse_geocode: bool,
    #[serde(default = "default_true")]
    pub cell_location: bool,
    #[serde(default)]
    pub geocoder_url: Option<String>,
    #[serde(default)]
    pub cell_locator_url: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_enrichment_workers() -> usize {
    3
}

fn default_enrichment_queue() -> usize {
    50
}

fn default_provider_timeout_ms() -> u64 {
    5000
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_enrichment_workers(),
            queue_depth: default_enrichment_queue(),
            reverse_geocode: true,
            cell_location: true,
            geocoder_url: None,
            cell_locator_url: None,
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Maximum chain length of pipeline-generated events
    #[serde(default = "default_max_synth_depth")]
    pub max_synth_depth: u32,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_max_synth_depth() -> u32 {
    2
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_synth_depth: default_max_synth_depth(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_sms_gateway")]
    pub sms_gateway: String,
    #[serde(default = "default_outbox_file")]
    pub outbox_file: String,
    #[serde(default = "default_outbox_queue")]
    pub queue_depth: usize,
}

fn default_from_email() -> String {
    "alerts@localhost".to_string()
}

fn default_sms_gateway() -> String {
    "default".to_string()
}

fn default_outbox_file() -> String {
    "outbox.jsonl".to_string()
}

fn default_outbox_queue() -> usize {
    256
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            sms_gateway: default_sms_gateway(),
            outbox_file: default_outbox_file(),
            queue_depth: default_outbox_queue(),
        }
    }
}

/// Membership of a device group referenced by geozones and contacts
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub assets: Vec<String>,
    /// Comma separated notification recipients for the group
    #[serde(default)]
    pub notify_email: Option<String>,
}

/// A general rule: matching status codes produce the configured actions
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    /// Hex, decimal or mnemonic status codes
    pub status_codes: Vec<String>,
    #[serde(default)]
    pub record_last: bool,
    #[serde(default)]
    pub actions: u32,
}

/// Initial per-asset settings applied when an asset is first seen
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSeed {
    pub id: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub notify_email: Option<String>,
    #[serde(default)]
    pub notify_selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContactsConfig {
    /// Account ID to comma separated recipients
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub odometer: OdometerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub eps: EpsConfig,
    #[serde(default)]
    pub geozone: GeozoneConfig,
    #[serde(default)]
    pub fuel: FuelConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub contacts: ContactsConfig,
    #[serde(default)]
    pub geozones: Vec<Geozone>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub assets: Vec<AssetSeed>,
}

/// Main configuration struct, passed to the pipeline at construction
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    past_action: DateAction,
    past_max_sec: i64,
    future_action: DateAction,
    future_max_sec: i64,
    speed_action: SpeedAction,
    speed_max_kph: f64,
    min_speed_kph: f64,
    motion_start_radius_m: f64,
    max_odometer_km: f64,
    odometer_never_decrease: bool,
    estimate_odometer: bool,
    max_engine_hours: f64,
    simulate_engine_from_ignition: bool,
    eps_range_sec: u64,
    eps_weight: f64,
    address_from_geozone: bool,
    fuel_refill_delta: f64,
    fuel_theft_delta: f64,
    enrichment_workers: usize,
    enrichment_queue_depth: usize,
    reverse_geocode_enabled: bool,
    cell_location_enabled: bool,
    geocoder_url: Option<String>,
    cell_locator_url: Option<String>,
    provider_timeout_ms: u64,
    max_synth_depth: u32,
    metrics_interval_secs: u64,
    notify_from_email: String,
    sms_gateway: String,
    outbox_file: String,
    outbox_queue_depth: usize,
    account_contacts: HashMap<String, String>,
    geozones: Vec<Geozone>,
    groups: Vec<GroupConfig>,
    rules: Vec<RuleConfig>,
    assets: Vec<AssetSeed>,
    config_file: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl PipelineConfig {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).context("Failed to parse config text")?;
        Ok(Self::from_toml(toml_config, "inline"))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from args/environment with default fallback
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        let TomlConfig {
            validation,
            motion,
            odometer,
            engine,
            eps,
            geozone,
            fuel,
            enrichment,
            pipeline,
            notify,
            contacts,
            geozones,
            groups,
            rules,
            assets,
        } = toml_config;

        Self {
            past_action: validation.past_action,
            past_max_sec: validation.past_max_sec,
            future_action: validation.future_action,
            future_max_sec: validation.future_max_sec,
            speed_action: validation.speed_action,
            speed_max_kph: validation.speed_max_kph,
            min_speed_kph: validation.min_speed_kph,
            motion_start_radius_m: motion.start_radius_m,
            max_odometer_km: odometer.max_km,
            odometer_never_decrease: odometer.never_decrease,
            estimate_odometer: odometer.estimate,
            max_engine_hours: engine.max_hours,
            simulate_engine_from_ignition: engine.simulate_from_ignition,
            eps_range_sec: eps.range_sec,
            eps_weight: eps.weight,
            address_from_geozone: geozone.address_from_geozone,
            fuel_refill_delta: fuel.refill_delta,
            fuel_theft_delta: fuel.theft_delta,
            enrichment_workers: enrichment.workers.max(1),
            enrichment_queue_depth: enrichment.queue_depth.max(1),
            reverse_geocode_enabled: enrichment.reverse_geocode,
            cell_location_enabled: enrichment.cell_location,
            geocoder_url: enrichment.geocoder_url,
            cell_locator_url: enrichment.cell_locator_url,
            provider_timeout_ms: enrichment.timeout_ms,
            max_synth_depth: pipeline.max_synth_depth,
            metrics_interval_secs: pipeline.metrics_interval_secs,
            notify_from_email: notify.from_email,
            sms_gateway: notify.sms_gateway,
            outbox_file: notify.outbox_file,
            outbox_queue_depth: notify.queue_depth.max(1),
            account_contacts: contacts.accounts,
            geozones,
            groups,
            rules,
            assets,
            config_file: config_file.to_string(),
        }
    }

    // Getters for all config fields
    pub fn past_action(&self) -> DateAction {
        self.past_action
    }

    pub fn past_max_sec(&self) -> i64 {
        self.past_max_sec
    }

    pub fn future_action(&self) -> DateAction {
        self.future_action
    }

    pub fn future_max_sec(&self) -> i64 {
        self.future_max_sec
    }

    pub fn speed_action(&self) -> SpeedAction {
        self.speed_action
    }

    pub fn speed_max_kph(&self) -> f64 {
        self.speed_max_kph
    }

    pub fn min_speed_kph(&self) -> f64 {
        self.min_speed_kph
    }

    pub fn motion_start_radius_m(&self) -> f64 {
        self.motion_start_radius_m
    }

    pub fn max_odometer_km(&self) -> f64 {
        self.max_odometer_km
    }

    pub fn odometer_never_decrease(&self) -> bool {
        self.odometer_never_decrease
    }

    pub fn estimate_odometer(&self) -> bool {
        self.estimate_odometer
    }

    pub fn max_engine_hours(&self) -> f64 {
        self.max_engine_hours
    }

    pub fn simulate_engine_from_ignition(&self) -> bool {
        self.simulate_engine_from_ignition
    }

    pub fn eps_range_sec(&self) -> u64 {
        self.eps_range_sec
    }

    pub fn eps_weight(&self) -> f64 {
        self.eps_weight
    }

    pub fn address_from_geozone(&self) -> bool {
        self.address_from_geozone
    }

    pub fn fuel_refill_delta(&self) -> f64 {
        self.fuel_refill_delta
    }

    pub fn fuel_theft_delta(&self) -> f64 {
        self.fuel_theft_delta
    }

    pub fn enrichment_workers(&self) -> usize {
        self.enrichment_workers
    }

    pub fn enrichment_queue_depth(&self) -> usize {
        self.enrichment_queue_depth
    }

    pub fn reverse_geocode_enabled(&self) -> bool {
        self.reverse_geocode_enabled
    }

    pub fn cell_location_enabled(&self) -> bool {
        self.cell_location_enabled
    }

    pub fn geocoder_url(&self) -> Option<&str> {
        self.geocoder_url.as_deref()
    }

    pub fn cell_locator_url(&self) -> Option<&str> {
        self.cell_locator_url.as_deref()
    }

    pub fn provider_timeout_ms(&self) -> u64 {
        self.provider_timeout_ms
    }

    pub fn max_synth_depth(&self) -> u32 {
        self.max_synth_depth
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn notify_from_email(&self) -> &str {
        &self.notify_from_email
    }

    pub fn sms_gateway(&self) -> &str {
        &self.sms_gateway
    }

    pub fn outbox_file(&self) -> &str {
        &self.outbox_file
    }

    pub fn outbox_queue_depth(&self) -> usize {
        self.outbox_queue_depth
    }

    pub fn account_contacts(&self) -> &HashMap<String, String> {
        &self.account_contacts
    }

    pub fn geozones(&self) -> &[Geozone] {
        &self.geozones
    }

    pub fn groups(&self) -> &[GroupConfig] {
        &self.groups
    }

    pub fn rules(&self) -> &[RuleConfig] {
        &self.rules
    }

    pub fn assets(&self) -> &[AssetSeed] {
        &self.assets
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    #[cfg(test)]
    pub fn with_future_policy(mut self, action: DateAction, max_sec: i64) -> Self {
        self.future_action = action;
        self.future_max_sec = max_sec;
        self
    }

    #[cfg(test)]
    pub fn with_past_policy(mut self, action: DateAction, max_sec: i64) -> Self {
        self.past_action = action;
        self.past_max_sec = max_sec;
        self
    }

    #[cfg(test)]
    pub fn with_speed_policy(mut self, action: SpeedAction, max_kph: f64) -> Self {
        self.speed_action = action;
        self.speed_max_kph = max_kph;
        self
    }

    #[cfg(test)]
    pub fn with_min_speed_kph(mut self, kph: f64) -> Self {
        self.min_speed_kph = kph;
        self
    }

    #[cfg(test)]
    pub fn with_never_decrease(mut self, enabled: bool) -> Self {
        self.odometer_never_decrease = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_simulate_engine_from_ignition(mut self, enabled: bool) -> Self {
        self.simulate_engine_from_ignition = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_address_from_geozone(mut self, enabled: bool) -> Self {
        self.address_from_geozone = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_max_synth_depth(mut self, depth: u32) -> Self {
        self.max_synth_depth = depth;
        self
    }

    #[cfg(test)]
    pub fn with_enrichment(mut self, workers: usize, queue_depth: usize) -> Self {
        self.enrichment_workers = workers.max(1);
        self.enrichment_queue_depth = queue_depth.max(1);
        self
    }

    #[cfg(test)]
    pub fn with_fuel_deltas(mut self, refill: f64, theft: f64) -> Self {
        self.fuel_refill_delta = refill;
        self.fuel_theft_delta = theft;
        self
    }
}
