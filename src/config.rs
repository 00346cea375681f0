//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const WEB_SERVER_PORT: &str = "WEB_SERVER_PORT";
const MAX_MEMORY_USAGE_PCT: &str = "MAX_MEMORY_USAGE_PCT";
const LOG_DIR: &str = "LOG_DIR";
const REDIS_IP: &str = "REDIS_IP";
const REDIS_PORT: &str = "REDIS_PORT";
const REDIS_TIMEOUT: &str = "REDIS_TIMEOUT";
const REDIS_AUTH: &str = "REDIS_AUTH";
const REDIS_INDEX_SET: &str = "REDIS_INDEX_SET";
const REDIS_INDEX_PUB: &str = "REDIS_INDEX_PUB";
const REDIS_DATA_TTL: &str = "REDIS_DATA_TTL";
const AWS_REGION: &str = "AWS_REGION";
const AWS_S3_BUCKET_NAME: &str = "AWS_S3_BUCKET_NAME";
const AWS_S3_ENDPOINT: &str = "AWS_S3_ENDPOINT";
const ARTIFACT_ROOT: &str = "ARTIFACT_ROOT";
const STAGING_DIR: &str = "STAGING_DIR";
const SCHEDULER_TICK_MS: &str = "SCHEDULER_TICK_MS";
const MAX_CONCURRENT_TASKS: &str = "MAX_CONCURRENT_TASKS";
const ALGORITHM_COMMAND: &str = "ALGORITHM_COMMAND";
const ALGORITHM_MEMORY_ESTIMATE: &str = "ALGORITHM_MEMORY_ESTIMATE";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub web_server_port: u16,
    /// Fraction of total host memory admission will not knowingly exceed.
    /// Negative disables the memory check.
    pub max_memory_usage_pct: f64,
    /// Directory for rolling log files, if any.
    pub log_dir: Option<PathBuf>,
    pub redis: RedisConfig,
    pub artifacts: ArtifactConfig,
    /// Scheduler scan interval.
    pub scheduler_tick: Duration,
    /// Upper bound on concurrently running task handlers.
    pub max_concurrent_tasks: usize,
    /// Executable run as the algorithm kernel.
    pub algorithm_command: String,
    /// Declared peak memory of one algorithm task, in bytes.
    pub algorithm_memory_estimate: i64,
}

/// Status store (Redis) settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub ip: String,
    pub port: u16,
    pub timeout: Duration,
    pub auth: Option<SecretString>,
    /// Index used for `<taskId>:status|error` keys.
    pub index_set: u32,
    /// Index used for pub/sub notifications.
    pub index_pub: u32,
    /// Expiry applied to every status key.
    pub data_ttl: Duration,
}

/// Artifact store settings.
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub region: Option<String>,
    pub bucket: String,
    /// Custom S3-compatible endpoint.
    pub endpoint: Option<String>,
    /// When set, artifacts are kept on local disk under this root instead of S3.
    pub local_root: Option<PathBuf>,
    /// Per-task staging root for persisted artifacts.
    pub staging_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            web_server_port: 4210,
            max_memory_usage_pct: 0.8,
            log_dir: None,
            redis: RedisConfig {
                ip: "127.0.0.1".to_string(),
                port: 6379,
                timeout: Duration::from_secs(3),
                auth: None,
                index_set: 0,
                index_pub: 0,
                data_ttl: Duration::from_secs(10_800), // 3 hours
            },
            artifacts: ArtifactConfig {
                region: None,
                bucket: "airouting-dev".to_string(),
                endpoint: None,
                local_root: None,
                staging_dir: PathBuf::from("/tmp/aws_s3"),
            },
            scheduler_tick: Duration::from_secs(1),
            max_concurrent_tasks: 16,
            algorithm_command: "air_algorithm".to_string(),
            algorithm_memory_estimate: 0,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// Never fails: each missing or invalid variable keeps its default and is
    /// returned as a warning.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut env = EnvReader {
            lookup: &lookup,
            warnings: Vec::new(),
        };

        if let Some(port) = env.required_parse::<u16>(WEB_SERVER_PORT) {
            config.web_server_port = port;
        }
        if let Some(pct) = env.required_parse::<f64>(MAX_MEMORY_USAGE_PCT) {
            if !pct.is_finite() || (pct >= 0.0 && !(0.2..=0.8).contains(&pct)) {
                env.invalid(MAX_MEMORY_USAGE_PCT, "The value range is -1 or 0.2 to 0.8.");
            } else {
                config.max_memory_usage_pct = pct;
            }
        }
        config.log_dir = env.optional(LOG_DIR).map(PathBuf::from);

        if let Some(ip) = env.required(REDIS_IP) {
            config.redis.ip = ip;
        }
        if let Some(port) = env.required_parse::<u16>(REDIS_PORT) {
            config.redis.port = port;
        }
        if let Some(secs) = env.required_parse::<f64>(REDIS_TIMEOUT) {
            if secs < 0.1 || !secs.is_finite() {
                env.invalid(
                    REDIS_TIMEOUT,
                    "The value range is greater than or equal to 0.1.",
                );
            } else {
                config.redis.timeout = Duration::from_secs_f64(secs);
            }
        }
        if let Some(auth) = env.required(REDIS_AUTH) {
            config.redis.auth = Some(SecretString::from(auth));
        }
        if let Some(index) = env.required_parse::<u32>(REDIS_INDEX_SET) {
            config.redis.index_set = index;
        }
        if let Some(index) = env.required_parse::<u32>(REDIS_INDEX_PUB) {
            config.redis.index_pub = index;
        }
        if let Some(ttl) = env.required_parse::<u64>(REDIS_DATA_TTL) {
            config.redis.data_ttl = Duration::from_secs(ttl);
        }

        config.artifacts.region = env.optional(AWS_REGION);
        if let Some(bucket) = env.required(AWS_S3_BUCKET_NAME) {
            config.artifacts.bucket = bucket;
        }
        config.artifacts.endpoint = env.optional(AWS_S3_ENDPOINT);
        config.artifacts.local_root = env.optional(ARTIFACT_ROOT).map(PathBuf::from);
        if let Some(dir) = env.optional(STAGING_DIR) {
            config.artifacts.staging_dir = PathBuf::from(dir);
        }

        if let Some(ms) = env.optional_parse::<u64>(SCHEDULER_TICK_MS) {
            if ms == 0 {
                env.invalid(SCHEDULER_TICK_MS, "The value must be greater than 0.");
            } else {
                config.scheduler_tick = Duration::from_millis(ms);
            }
        }
        if let Some(max) = env.optional_parse::<usize>(MAX_CONCURRENT_TASKS) {
            if max == 0 {
                env.invalid(MAX_CONCURRENT_TASKS, "The value must be greater than 0.");
            } else {
                config.max_concurrent_tasks = max;
            }
        }
        if let Some(command) = env.optional(ALGORITHM_COMMAND) {
            config.algorithm_command = command;
        }
        if let Some(bytes) = env.optional_parse::<i64>(ALGORITHM_MEMORY_ESTIMATE) {
            config.algorithm_memory_estimate = bytes;
        }

        (config, env.warnings)
    }

    /// Whether admission samples host memory at all.
    pub fn memory_check_enabled(&self) -> bool {
        self.max_memory_usage_pct >= 0.0
    }

    /// JSON rendering of the non-secret settings.
    pub fn dump(&self) -> serde_json::Value {
        serde_json::json!({
            WEB_SERVER_PORT: self.web_server_port,
            MAX_MEMORY_USAGE_PCT: self.max_memory_usage_pct,
            LOG_DIR: self.log_dir.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            REDIS_PORT: self.redis.port,
            REDIS_TIMEOUT: self.redis.timeout.as_secs_f64(),
            REDIS_INDEX_SET: self.redis.index_set,
            REDIS_INDEX_PUB: self.redis.index_pub,
            REDIS_DATA_TTL: self.redis.data_ttl.as_secs(),
            SCHEDULER_TICK_MS: self.scheduler_tick.as_millis() as u64,
            MAX_CONCURRENT_TASKS: self.max_concurrent_tasks,
            ALGORITHM_MEMORY_ESTIMATE: self.algorithm_memory_estimate,
        })
    }
}

/// Collects warnings while reading variables.
struct EnvReader<'a, F> {
    lookup: &'a F,
    warnings: Vec<ConfigError>,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&mut self, key: &str) -> Option<String> {
        let value = (self.lookup)(key);
        if value.is_none() {
            self.warnings.push(ConfigError::Missing {
                key: key.to_string(),
            });
        }
        value
    }

    fn required_parse<T>(&mut self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        self.parse(key, &raw)
    }

    fn optional_parse<T>(&mut self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.optional(key)?;
        self.parse(key, &raw)
    }

    fn parse<T>(&mut self, key: &str, raw: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.invalid(key, e.to_string());
                None
            }
        }
    }

    fn invalid(&mut self, key: &str, message: impl Into<String>) {
        self.warnings.push(ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (WEB_SERVER_PORT, "8000"),
            (MAX_MEMORY_USAGE_PCT, "0.5"),
            (REDIS_IP, "10.0.0.2"),
            (REDIS_PORT, "6380"),
            (REDIS_TIMEOUT, "1.5"),
            (REDIS_AUTH, "hunter2"),
            (REDIS_INDEX_SET, "2"),
            (REDIS_INDEX_PUB, "3"),
            (REDIS_DATA_TTL, "60"),
            (AWS_S3_BUCKET_NAME, "jobs"),
        ]
    }

    #[test]
    fn reads_all_values() {
        let (config, warnings) = ServerConfig::from_lookup(lookup(&full_env()));
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.web_server_port, 8000);
        assert_eq!(config.max_memory_usage_pct, 0.5);
        assert_eq!(config.redis.ip, "10.0.0.2");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.timeout, Duration::from_millis(1500));
        assert_eq!(
            config.redis.auth.as_ref().map(|s| s.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
        assert_eq!(config.redis.index_set, 2);
        assert_eq!(config.redis.index_pub, 3);
        assert_eq!(config.redis.data_ttl, Duration::from_secs(60));
        assert_eq!(config.artifacts.bucket, "jobs");
    }

    #[test]
    fn missing_required_values_warn_and_keep_defaults() {
        let (config, warnings) = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.web_server_port, 4210);
        assert_eq!(config.max_memory_usage_pct, 0.8);
        assert!(warnings.iter().any(|w| w.key() == WEB_SERVER_PORT));
        assert!(warnings.iter().any(|w| w.key() == REDIS_AUTH));
        // Optional values never warn.
        assert!(!warnings.iter().any(|w| w.key() == LOG_DIR));
    }

    #[test]
    fn memory_pct_rejects_non_finite() {
        for raw in ["NaN", "inf", "-inf"] {
            let mut env = full_env();
            env.push((MAX_MEMORY_USAGE_PCT, raw));
            let (config, warnings) = ServerConfig::from_lookup(lookup(&env));
            assert_eq!(config.max_memory_usage_pct, 0.8, "{raw}");
            assert!(config.memory_check_enabled(), "{raw}");
            assert!(
                warnings.iter().any(|w| w.key() == MAX_MEMORY_USAGE_PCT),
                "{raw}"
            );
        }
    }

    #[test]
    fn memory_pct_range() {
        let mut env = full_env();
        env.push((MAX_MEMORY_USAGE_PCT, "0.9"));
        let (config, warnings) = ServerConfig::from_lookup(lookup(&env));
        assert_eq!(config.max_memory_usage_pct, 0.8);
        assert!(matches!(
            &warnings[..],
            [ConfigError::InvalidValue { key, .. }] if key == MAX_MEMORY_USAGE_PCT
        ));

        let mut env = full_env();
        env.push((MAX_MEMORY_USAGE_PCT, "-1"));
        let (config, warnings) = ServerConfig::from_lookup(lookup(&env));
        assert!(warnings.is_empty());
        assert!(!config.memory_check_enabled());
    }

    #[test]
    fn redis_timeout_floor() {
        let mut env = full_env();
        env.push((REDIS_TIMEOUT, "0.05"));
        let (config, warnings) = ServerConfig::from_lookup(lookup(&env));
        assert_eq!(config.redis.timeout, Duration::from_secs(3));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn zero_worker_bound_rejected() {
        let mut env = full_env();
        env.push((MAX_CONCURRENT_TASKS, "0"));
        env.push((SCHEDULER_TICK_MS, "250"));
        let (config, warnings) = ServerConfig::from_lookup(lookup(&env));
        assert_eq!(config.max_concurrent_tasks, 16);
        assert_eq!(config.scheduler_tick, Duration::from_millis(250));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn dump_hides_secrets() {
        let (config, _) = ServerConfig::from_lookup(lookup(&full_env()));
        let dumped = config.dump().to_string();
        assert!(dumped.contains("\"WEB_SERVER_PORT\":8000"));
        assert!(!dumped.contains("hunter2"));
        assert!(!dumped.contains("10.0.0.2"));
    }
}
