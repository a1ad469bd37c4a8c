//! Configuration types for the coordination engine
//!
//! All sections deserialize from TOML with per-field defaults, so a config
//! file only needs to name the values it overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Network listener settings
    pub server: ServerSection,

    /// Per-modality latency targets
    pub latency: LatencyTargets,

    /// Stream limits and buffer sizes
    pub streams: StreamLimits,

    /// Audio/visual synchronization defaults
    pub sync: SyncSettings,

    /// Adaptive performance controller tuning
    pub controller: ControllerSettings,

    /// External recognition/detection services
    pub collaborators: CollaboratorSettings,

    /// Publish intervals and session liveness
    pub broadcast: BroadcastSettings,
}

/// Network listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind the WebSocket listener to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_connections: usize,
}

/// Maximum acceptable end-to-end latency per modality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyTargets {
    /// Audio chunk latency target (default: 300ms)
    pub audio_ms: u64,

    /// Visual frame latency target (default: 100ms)
    pub visual_ms: u64,
}

/// Stream limits and buffer sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamLimits {
    /// Results kept in each stream's history ring
    pub history_capacity: usize,

    /// Samples kept in each stream's rolling performance window
    pub performance_window: usize,

    /// Maximum streams a single session may own
    pub max_streams_per_session: usize,

    /// Lowest accepted audio sample rate (Hz)
    pub min_sample_rate: u32,

    /// Highest accepted audio sample rate (Hz)
    pub max_sample_rate: u32,

    /// Accepted visual pixel/container formats
    pub visual_formats: Vec<String>,

    /// Largest accepted frame width
    pub max_width: u32,

    /// Largest accepted frame height
    pub max_height: u32,
}

/// Audio/visual synchronization defaults (applied when a link request omits them)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Target maximum residual skew for a synced pair (ms)
    pub precision_ms: f64,

    /// Skew band above precision in which the clock offset is corrected (ms)
    pub drift_tolerance_ms: f64,

    /// EWMA weight given to each newly observed skew (0.0-1.0)
    pub ewma_alpha: f64,

    /// How long a result waits for a partner before it is discarded (ms)
    pub buffer_horizon_ms: u64,

    /// Maximum buffered results per modality per link
    pub max_buffered: usize,

    /// Drift corrections remembered per link
    pub drift_history: usize,

    /// Interval of the unmatched-result sweep (ms)
    pub sweep_interval_ms: u64,
}

/// Adaptive performance controller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Reactive evaluation interval (ms)
    pub tick_interval_ms: u64,

    /// Dial change applied by a reactive adjustment
    pub adjustment_step: f64,

    /// Maximum absolute random perturbation per evaluation
    pub jitter_amplitude: f64,

    /// Average confidence above which pattern recognition is boosted
    pub confidence_target: f64,

    /// Observations kept for the recent averages
    pub observation_window: usize,

    /// Initial dial values
    pub initial: InitialDials,

    /// Fixed RNG seed for reproducible perturbations (None = entropy)
    pub seed: Option<u64>,
}

/// Initial dial values for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialDials {
    pub sensitivity: f64,
    pub analysis_depth: f64,
    pub processing_speed: f64,
    pub pattern_recognition: f64,
}

/// External recognition/detection services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorSettings {
    /// Deadline for each external call (ms)
    pub call_timeout_ms: u64,

    /// Speech recognition service base URL
    pub speech_url: String,

    /// Object/pose detection service base URL
    pub detection_url: String,
}

/// Publish intervals and session liveness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Outbound queue capacity per session
    pub session_queue_capacity: usize,

    /// `performance` topic interval (ms)
    pub performance_interval_ms: u64,

    /// `parameters` topic interval (ms)
    pub parameters_interval_ms: u64,

    /// `compliance` topic interval (ms)
    pub compliance_interval_ms: u64,

    /// Heartbeat interval to every session (ms)
    pub heartbeat_interval_ms: u64,

    /// Sessions idle longer than this are closed (ms)
    pub idle_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            max_connections: 0,
        }
    }
}

impl Default for LatencyTargets {
    fn default() -> Self {
        Self {
            audio_ms: 300,
            visual_ms: 100,
        }
    }
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            history_capacity: 256,
            performance_window: 50,
            max_streams_per_session: 8,
            min_sample_rate: 8_000,
            max_sample_rate: 96_000,
            visual_formats: ["rgb24", "rgba", "i420", "nv12", "jpeg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_width: 7680,
            max_height: 4320,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            precision_ms: 20.0,
            drift_tolerance_ms: 250.0,
            ewma_alpha: 0.2,
            buffer_horizon_ms: 2_000,
            max_buffered: 128,
            drift_history: 32,
            sweep_interval_ms: 500,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            adjustment_step: 2.0,
            jitter_amplitude: 0.5,
            confidence_target: 0.85,
            observation_window: 20,
            initial: InitialDials::default(),
            seed: None,
        }
    }
}

impl Default for InitialDials {
    fn default() -> Self {
        Self {
            sensitivity: 50.0,
            analysis_depth: 50.0,
            processing_speed: 50.0,
            pattern_recognition: 50.0,
        }
    }
}

impl Default for CollaboratorSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 2_000,
            speech_url: "http://127.0.0.1:9001".to_string(),
            detection_url: "http://127.0.0.1:9002".to_string(),
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            session_queue_capacity: 256,
            performance_interval_ms: 1_000,
            parameters_interval_ms: 2_000,
            compliance_interval_ms: 5_000,
            heartbeat_interval_ms: 15_000,
            idle_timeout_ms: 60_000,
        }
    }
}

impl SyncSettings {
    pub fn buffer_horizon(&self) -> Duration {
        Duration::from_millis(self.buffer_horizon_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl CollaboratorSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl CoordinatorConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CoordinatorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if:
    /// - a latency target is zero
    /// - history or performance window sizes are zero
    /// - the sample rate bounds are inverted
    /// - sync precision is not below the drift tolerance band
    /// - `ewma_alpha` is outside (0, 1]
    /// - an initial dial is outside [0, 100]
    pub fn validate(&self) -> Result<()> {
        if self.latency.audio_ms == 0 || self.latency.visual_ms == 0 {
            return Err(Error::InvalidConfig(
                "latency targets must be greater than zero".to_string(),
            ));
        }

        if self.streams.history_capacity == 0 || self.streams.performance_window == 0 {
            return Err(Error::InvalidConfig(
                "history_capacity and performance_window must be greater than zero".to_string(),
            ));
        }

        if self.streams.max_streams_per_session == 0 {
            return Err(Error::InvalidConfig(
                "max_streams_per_session must be greater than zero".to_string(),
            ));
        }

        if self.streams.min_sample_rate > self.streams.max_sample_rate {
            return Err(Error::InvalidConfig(format!(
                "min_sample_rate ({}) exceeds max_sample_rate ({})",
                self.streams.min_sample_rate, self.streams.max_sample_rate
            )));
        }

        if self.sync.precision_ms <= 0.0 || self.sync.precision_ms >= self.sync.drift_tolerance_ms {
            return Err(Error::InvalidConfig(format!(
                "sync precision ({}ms) must be positive and below drift tolerance ({}ms)",
                self.sync.precision_ms, self.sync.drift_tolerance_ms
            )));
        }

        if !(self.sync.ewma_alpha > 0.0 && self.sync.ewma_alpha <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.sync.ewma_alpha
            )));
        }

        if self.sync.max_buffered == 0 || self.sync.buffer_horizon_ms == 0 {
            return Err(Error::InvalidConfig(
                "sync buffer size and horizon must be greater than zero".to_string(),
            ));
        }

        if self.controller.observation_window == 0 || self.controller.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "controller observation_window and tick_interval_ms must be greater than zero"
                    .to_string(),
            ));
        }

        let dials = &self.controller.initial;
        for (name, value) in [
            ("sensitivity", dials.sensitivity),
            ("analysis_depth", dials.analysis_depth),
            ("processing_speed", dials.processing_speed),
            ("pattern_recognition", dials.pattern_recognition),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "initial {} must be in range 0-100, got {}",
                    name, value
                )));
            }
        }

        if self.collaborators.call_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "collaborator call_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.broadcast.session_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "session_queue_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Preset tuned for live commentary where response time matters most
    ///
    /// Settings:
    /// - Latency targets: audio 200ms, visual 66ms
    /// - Sync precision: 15ms with a short 1s horizon
    /// - Collaborator timeout: 800ms
    /// - Faster controller feedback (500ms ticks, larger steps)
    pub fn low_latency() -> Self {
        let mut config = Self::default();
        config.latency = LatencyTargets {
            audio_ms: 200,
            visual_ms: 66,
        };
        config.sync.precision_ms = 15.0;
        config.sync.buffer_horizon_ms = 1_000;
        config.sync.sweep_interval_ms = 250;
        config.collaborators.call_timeout_ms = 800;
        config.controller.tick_interval_ms = 500;
        config.controller.adjustment_step = 3.0;
        config.controller.initial.processing_speed = 70.0;
        config
    }

    /// Preset tuned for post-match analysis where accuracy matters most
    ///
    /// Settings:
    /// - Latency targets: audio 800ms, visual 300ms
    /// - Larger history (1024) and horizon (5s)
    /// - Deeper analysis and pattern recognition dials
    pub fn high_accuracy() -> Self {
        let mut config = Self::default();
        config.latency = LatencyTargets {
            audio_ms: 800,
            visual_ms: 300,
        };
        config.streams.history_capacity = 1_024;
        config.sync.buffer_horizon_ms = 5_000;
        config.sync.max_buffered = 512;
        config.collaborators.call_timeout_ms = 5_000;
        config.controller.initial.analysis_depth = 80.0;
        config.controller.initial.pattern_recognition = 70.0;
        config.controller.initial.processing_speed = 35.0;
        config
    }

    /// Set the bind address
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.server.bind_addr = addr;
        self
    }

    /// Set the maximum number of concurrent sessions
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.server.max_connections = max;
        self
    }

    /// Fix the controller RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.controller.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.latency.audio_ms, 300);
        assert_eq!(config.latency.visual_ms, 100);
        assert_eq!(config.sync.precision_ms, 20.0);
        assert_eq!(config.server.bind_addr.port(), 8765);
    }

    #[test]
    fn test_presets_are_valid() {
        let low = CoordinatorConfig::low_latency();
        assert!(low.validate().is_ok());
        assert_eq!(low.latency.visual_ms, 66);
        assert_eq!(low.collaborators.call_timeout_ms, 800);

        let accurate = CoordinatorConfig::high_accuracy();
        assert!(accurate.validate().is_ok());
        assert_eq!(accurate.streams.history_capacity, 1_024);
        assert_eq!(accurate.controller.initial.analysis_depth, 80.0);
    }

    #[test]
    fn test_zero_latency_target_fails() {
        let mut config = CoordinatorConfig::default();
        config.latency.visual_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_precision_must_be_below_tolerance() {
        let mut config = CoordinatorConfig::default();
        config.sync.precision_ms = 300.0;
        assert!(config.validate().is_err());

        config.sync.precision_ms = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ewma_alpha_fails() {
        let mut config = CoordinatorConfig::default();
        config.sync.ewma_alpha = 0.0;
        assert!(config.validate().is_err());

        config.sync.ewma_alpha = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_dial_out_of_range_fails() {
        let mut config = CoordinatorConfig::default();
        config.controller.initial.sensitivity = 101.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sensitivity"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            [latency]
            audio_ms = 250

            [sync]
            precision_ms = 10.0

            [controller]
            seed = 7
        "#;
        let config = CoordinatorConfig::from_toml_str(text).unwrap();
        assert_eq!(config.latency.audio_ms, 250);
        assert_eq!(config.latency.visual_ms, 100);
        assert_eq!(config.sync.precision_ms, 10.0);
        assert_eq!(config.sync.buffer_horizon_ms, 2_000);
        assert_eq!(config.controller.seed, Some(7));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = CoordinatorConfig::from_toml_str("[latency]\naudio_ms = \"fast\"");
        assert!(matches!(result, Err(Error::ConfigParse(_))));

        let result = CoordinatorConfig::from_toml_str("[latency]\naudio_ms = 0");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_chain() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = CoordinatorConfig::default()
            .with_bind_addr(addr)
            .with_max_connections(32)
            .with_seed(42);
        assert_eq!(config.server.bind_addr, addr);
        assert_eq!(config.server.max_connections, 32);
        assert_eq!(config.controller.seed, Some(42));
    }
}
