//! Configuration management for muxlog.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use crate::constants::{
    COLLECTOR_GRACE_PERIOD, DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILE, FLOAT_FIFO_NAME,
    INT_FIFO_NAME, MAX_COLOR_INDEX, SOCKET_NAME, STOP_TIMEOUT,
};
use crate::error::ConfigError;

/// Well-known filesystem locations of the three channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    pub int_fifo: PathBuf,
    pub float_fifo: PathBuf,
    pub socket: PathBuf,
}

impl ChannelPaths {
    /// Lays the channels out inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            int_fifo: dir.join(INT_FIFO_NAME),
            float_fifo: dir.join(FLOAT_FIFO_NAME),
            socket: dir.join(SOCKET_NAME),
        }
    }

    /// All three paths, in the order the collector creates them.
    pub fn all(&self) -> [&Path; 3] {
        [&self.int_fifo, &self.float_fifo, &self.socket]
    }

    /// Whether every channel path currently exists.
    pub fn all_present(&self) -> bool {
        self.all().iter().all(|path| path.exists())
    }
}

impl Default for ChannelPaths {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

/// Startup parameters shared by every worker: a color pair and an inter-cycle delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub foreground: u8,
    pub background: u8,
    pub delay: Duration,
}

impl WorkerSettings {
    /// Validates raw operator input. Colors must be `0..=7`, the delay a non-negative
    /// number of milliseconds.
    pub fn parse(foreground: &str, background: &str, delay_ms: &str) -> Result<Self, ConfigError> {
        let foreground = parse_color("foreground", foreground)?;
        let background = parse_color("background", background)?;
        let delay_ms: u64 = delay_ms
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDelay(delay_ms.trim().to_string()))?;

        Ok(Self {
            foreground,
            background,
            delay: Duration::from_millis(delay_ms),
        })
    }

    /// The settings as positional worker arguments.
    pub fn to_args(&self) -> [String; 3] {
        [
            self.foreground.to_string(),
            self.background.to_string(),
            self.delay.as_millis().to_string(),
        ]
    }
}

fn parse_color(which: &'static str, raw: &str) -> Result<u8, ConfigError> {
    match raw.trim().parse::<u8>() {
        Ok(index) if index <= MAX_COLOR_INDEX => Ok(index),
        _ => Err(ConfigError::InvalidColor {
            which,
            value: raw.trim().to_string(),
        }),
    }
}

/// On-disk supervisor configuration. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    runtime_dir: Option<String>,
    bin_dir: Option<String>,
    collector: RawCollectorConfig,
    workers: RawWorkersConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCollectorConfig {
    log_file: Option<String>,
    grace_period: Option<String>,
    stop_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawWorkersConfig {
    stop_timeout: Option<String>,
}

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Directory holding the channel paths.
    pub runtime_dir: PathBuf,
    /// Directory holding the collector and worker binaries. `None` means next to the
    /// running executable.
    pub bin_dir: Option<PathBuf>,
    /// Log file handed to the collector.
    pub log_file: PathBuf,
    /// How long a fresh collector gets to create its channels.
    pub grace_period: Duration,
    /// Graceful stop budget for the collector before it is killed.
    pub collector_stop_timeout: Duration,
    /// Graceful stop budget for workers before they are killed.
    pub worker_stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("."),
            bin_dir: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            grace_period: COLLECTOR_GRACE_PERIOD,
            collector_stop_timeout: STOP_TIMEOUT,
            worker_stop_timeout: STOP_TIMEOUT,
        }
    }
}

impl SupervisorConfig {
    pub fn channel_paths(&self) -> ChannelPaths {
        ChannelPaths::in_dir(&self.runtime_dir)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let path = |value: Option<String>| -> Result<Option<PathBuf>, ConfigError> {
            value.map(|v| expand_env_vars(&v).map(PathBuf::from)).transpose()
        };
        let duration = |value: Option<String>, fallback: Duration| match value {
            Some(raw) => parse_duration(&raw),
            None => Ok(fallback),
        };

        Ok(Self {
            runtime_dir: path(raw.runtime_dir)?.unwrap_or(defaults.runtime_dir),
            bin_dir: path(raw.bin_dir)?,
            log_file: path(raw.collector.log_file)?.unwrap_or(defaults.log_file),
            grace_period: duration(raw.collector.grace_period, defaults.grace_period)?,
            collector_stop_timeout: duration(
                raw.collector.stop_timeout,
                defaults.collector_stop_timeout,
            )?,
            worker_stop_timeout: duration(
                raw.workers.stop_timeout,
                defaults.worker_stop_timeout,
            )?,
        })
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static pattern compiles")
    });

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnv(var)),
        None => Ok(result.into_owned()),
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Loads the supervisor configuration.
///
/// An explicit path must exist. Without one, `muxlog.yaml` in the working directory is
/// used when present, and built-in defaults otherwise.
pub fn load_config(config_path: Option<&Path>) -> Result<SupervisorConfig, ConfigError> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.exists() {
                return Ok(SupervisorConfig::default());
            }
            fallback
        }
    };

    let content = fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parses supervisor configuration from YAML text.
pub fn parse_config(content: &str) -> Result<SupervisorConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(SupervisorConfig::default());
    }
    let raw: RawConfig = serde_yaml::from_str(content)?;
    SupervisorConfig::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::env_lock;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn channel_paths_live_in_runtime_dir() {
        let paths = ChannelPaths::in_dir("/tmp/mux");
        assert_eq!(paths.int_fifo, PathBuf::from("/tmp/mux/muxlog_int.fifo"));
        assert_eq!(paths.float_fifo, PathBuf::from("/tmp/mux/muxlog_float.fifo"));
        assert_eq!(paths.socket, PathBuf::from("/tmp/mux/muxlog.sock"));
    }

    #[test]
    fn worker_settings_accept_valid_input() {
        let settings = WorkerSettings::parse("1", " 7 ", "250").unwrap();
        assert_eq!(settings.foreground, 1);
        assert_eq!(settings.background, 7);
        assert_eq!(settings.delay, Duration::from_millis(250));
        assert_eq!(settings.to_args(), ["1", "7", "250"]);
    }

    #[test]
    fn worker_settings_reject_out_of_range_colors() {
        assert!(matches!(
            WorkerSettings::parse("8", "0", "0"),
            Err(ConfigError::InvalidColor {
                which: "foreground",
                ..
            })
        ));
        assert!(matches!(
            WorkerSettings::parse("0", "-1", "0"),
            Err(ConfigError::InvalidColor {
                which: "background",
                ..
            })
        ));
    }

    #[test]
    fn worker_settings_reject_bad_delay() {
        assert!(matches!(
            WorkerSettings::parse("0", "0", "-5"),
            Err(ConfigError::InvalidDelay(_))
        ));
        assert!(matches!(
            WorkerSettings::parse("0", "0", "soon"),
            Err(ConfigError::InvalidDelay(_))
        ));
    }

    #[test]
    fn parse_duration_supports_common_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn parse_duration_rejects_invalid_strings() {
        assert!(matches!(
            parse_duration(""),
            Err(ConfigError::InvalidDuration(_))
        ));
        assert!(matches!(
            parse_duration("abc"),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(parse_config("").unwrap(), SupervisorConfig::default());
    }

    #[test]
    fn config_overrides_defaults_and_expands_env() {
        let _guard = env_lock();
        unsafe {
            env::set_var("MUXLOG_TEST_RUNTIME", "/tmp/muxlog-test");
        }

        let config = parse_config(
            r#"
runtime_dir: "${MUXLOG_TEST_RUNTIME}/run"
collector:
  log_file: "$MUXLOG_TEST_RUNTIME/collector.log"
  grace_period: "500ms"
workers:
  stop_timeout: "3s"
"#,
        )
        .unwrap();

        unsafe {
            env::remove_var("MUXLOG_TEST_RUNTIME");
        }

        assert_eq!(config.runtime_dir, PathBuf::from("/tmp/muxlog-test/run"));
        assert_eq!(
            config.log_file,
            PathBuf::from("/tmp/muxlog-test/collector.log")
        );
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.collector_stop_timeout, STOP_TIMEOUT);
        assert_eq!(config.worker_stop_timeout, Duration::from_secs(3));
        assert_eq!(
            config.channel_paths().socket,
            PathBuf::from("/tmp/muxlog-test/run/muxlog.sock")
        );
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let _guard = env_lock();
        unsafe {
            env::remove_var("MUXLOG_DEFINITELY_UNSET");
        }
        let err = parse_config("runtime_dir: \"${MUXLOG_DEFINITELY_UNSET}\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(var) if var == "MUXLOG_DEFINITELY_UNSET"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            parse_config("colector:\n  log_file: x\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_config_reads_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("muxlog.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "bin_dir: \"/opt/muxlog/bin\"").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.bin_dir, Some(PathBuf::from("/opt/muxlog/bin")));
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn load_config_fails_for_missing_explicit_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_config(Some(&dir.path().join("absent.yaml"))),
            Err(ConfigError::Read(_))
        ));
    }
}
