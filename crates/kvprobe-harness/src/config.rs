//! Harness configuration.
//!
//! Loaded from an optional TOML file; every key has a default, so an empty
//! file (or no file) yields the stock run. CLI flags are applied on top by
//! the binary.
//!
//! ```toml
//! suite_deadline_secs = 900
//!
//! [client]
//! timeout_ms = 500
//!
//! [codes]
//! put = 1
//! bad_value = 7
//!
//! [multi_node]
//! keys_per_node = 50
//! ```

use crate::HarnessError;
use kvprobe_client::ClientConfig;
use kvprobe_core::frame::MAX_DATAGRAM_SIZE;
use kvprobe_core::{MAX_VALUE_LEN, WireCodes};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Room left in a datagram for the envelope around an oversized value.
const ENVELOPE_HEADROOM: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientSection,
    pub codes: WireCodes,
    pub single_node: SingleNodeConfig,
    pub throughput: ThroughputConfig,
    pub multi_node: MultiNodeConfig,
    /// Wall-clock budget per suite. Unset means no limit.
    pub suite_deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// How long each request waits for its reply.
    pub timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleNodeConfig {
    /// Membership count a lone server must report.
    pub expected_membership_count: i32,
    /// Liveness scenarios allowed to miss before the suite gives up.
    pub abort_after_failures: usize,
    /// 8 KiB entries a fresh store must accept (4096 = 32 MiB).
    pub capacity_entries: u32,
    /// Upper bound on PUTs while looking for the out-of-space point.
    pub overflow_attempts: u32,
    pub stress_iterations: u32,
    /// Upper bound on PUTs per fill cycle of the stress scenario.
    pub stress_fill_limit: u32,
    /// GETs issued by the memory stress scenario.
    pub get_storm: u32,
    /// Pause before the stress scenarios hammer the server.
    pub cooldown_ms: u64,
    /// Heartbeats tried before a server is declared dead.
    pub liveness_retries: u32,
    /// Times a corrupted datagram is sent while expecting silence.
    pub silence_attempts: u32,
    pub silence_wait_ms: u64,
    /// Length of the clearly oversized value probe.
    pub oversized_value_len: usize,
}

impl Default for SingleNodeConfig {
    fn default() -> Self {
        Self {
            expected_membership_count: 1,
            abort_after_failures: 2,
            capacity_entries: 4096,
            overflow_attempts: 10_000,
            stress_iterations: 100,
            stress_fill_limit: 10_000,
            get_storm: 8192,
            cooldown_ms: 5000,
            liveness_retries: 5,
            silence_attempts: 3,
            silence_wait_ms: 500,
            oversized_value_len: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Concurrency levels, run in order.
    pub levels: Vec<usize>,
    /// Extra level run only when every level above succeeded.
    pub stress_level: Option<usize>,
    /// PUT-then-GET pairs each client issues.
    pub pairs_per_client: u32,
    /// Share of requests that must succeed for a level to pass.
    pub success_fraction: f64,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            levels: vec![1, 4, 10],
            stress_level: Some(100),
            pairs_per_client: 100,
            success_fraction: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiNodeConfig {
    /// Key lifecycles in flight at once.
    pub workers: usize,
    pub keys_per_node: usize,
    /// Share of undecided lifecycles tolerated in a passing run.
    pub undecided_tolerance: f64,
}

impl Default for MultiNodeConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            keys_per_node: 10,
            undecided_tolerance: 0.05,
        }
    }
}

impl Config {
    /// Read and parse a TOML file. Missing sections and keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no suite can run with.
    pub fn validate(&self) -> Result<(), HarnessError> {
        self.codes.validate()?;

        if self.client.timeout_ms == 0 {
            return Err(HarnessError::Config("client.timeout_ms must be positive".into()));
        }
        if self.single_node.capacity_entries == 0 {
            return Err(HarnessError::Config(
                "single_node.capacity_entries must be positive".into(),
            ));
        }
        let oversized = self.single_node.oversized_value_len;
        if oversized <= MAX_VALUE_LEN || oversized > MAX_DATAGRAM_SIZE - ENVELOPE_HEADROOM {
            return Err(HarnessError::Config(format!(
                "single_node.oversized_value_len must be in {}..={}",
                MAX_VALUE_LEN + 1,
                MAX_DATAGRAM_SIZE - ENVELOPE_HEADROOM
            )));
        }
        if self.throughput.levels.iter().any(|l| *l == 0) || self.throughput.stress_level == Some(0)
        {
            return Err(HarnessError::Config(
                "throughput levels must be positive".into(),
            ));
        }
        if !(self.throughput.success_fraction > 0.0 && self.throughput.success_fraction <= 1.0) {
            return Err(HarnessError::Config(
                "throughput.success_fraction must be in (0, 1]".into(),
            ));
        }
        if self.multi_node.workers == 0 {
            return Err(HarnessError::Config("multi_node.workers must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.multi_node.undecided_tolerance) {
            return Err(HarnessError::Config(
                "multi_node.undecided_tolerance must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Settings for every client a suite opens.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.client.timeout_ms),
            codes: self.codes.clone(),
        }
    }

    /// Time budget per suite, if one is set.
    pub fn suite_deadline(&self) -> Option<Duration> {
        self.suite_deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_stock_config() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.single_node.capacity_entries, 4096);
        assert_eq!(config.throughput.levels, vec![1, 4, 10]);
        assert_eq!(config.multi_node.workers, 8);
        assert_eq!(config.suite_deadline(), None);
    }

    #[test]
    fn sections_override_individual_keys() {
        let config = Config::from_toml_str(
            r#"
            suite_deadline_secs = 60

            [client]
            timeout_ms = 250

            [codes]
            put = 16
            get = 17

            [throughput]
            levels = [2, 8]
            stress_level = 32

            [multi_node]
            keys_per_node = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.client_config().timeout, Duration::from_millis(250));
        assert_eq!(config.client_config().codes.put, 16);
        assert_eq!(config.codes.remove, WireCodes::default().remove);
        assert_eq!(config.throughput.levels, vec![2, 8]);
        assert_eq!(config.throughput.stress_level, Some(32));
        assert_eq!(config.throughput.pairs_per_client, 100);
        assert_eq!(config.multi_node.keys_per_node, 3);
        assert_eq!(config.suite_deadline(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn colliding_codes_are_rejected() {
        let err = Config::from_toml_str("[codes]\nget = 1\n").unwrap_err();
        assert!(matches!(err, HarnessError::Codes(_)));
    }

    #[test]
    fn nonsense_values_are_rejected() {
        for text in [
            "[client]\ntimeout_ms = 0\n",
            "[throughput]\nsuccess_fraction = 1.5\n",
            "[throughput]\nlevels = [0]\n",
            "[multi_node]\nworkers = 0\n",
            "[multi_node]\nundecided_tolerance = -0.1\n",
            "[single_node]\noversized_value_len = 10000\n",
            "[single_node]\noversized_value_len = 65507\n",
        ] {
            assert!(
                matches!(Config::from_toml_str(text), Err(HarnessError::Config(_))),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\ntimeout_ms = 42").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.client.timeout_ms, 42);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::load(Path::new("/nonexistent/kvprobe.toml")).unwrap_err();
        assert!(matches!(err, HarnessError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/kvprobe.toml"));
    }

    #[test]
    fn malformed_toml_is_reported() {
        assert!(matches!(
            Config::from_toml_str("[client\ntimeout_ms = 1"),
            Err(HarnessError::Toml(_))
        ));
    }
}
