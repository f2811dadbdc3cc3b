use std::{
    error::Error,
    fmt,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{
    runtime::{
        cli::Cli,
        conf::conf_serde::{duration, level},
    },
    sink::LogFormat,
    source::{mode::DeliveryPreference, perf::PerfOptions},
};

/// Prefix of environment variables overriding configuration keys.
/// Nested keys are separated by a double underscore, e.g. `XDPSCOPE_API__PORT`.
const ENV_PREFIX: &str = "XDPSCOPE_";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConf {
    /// Enable the API server.
    pub enabled: bool,
    /// The network address the API server will listen on.
    pub listen_address: String,
    /// The port the API server will listen on.
    pub port: u16,
}

impl Default for ApiConf {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 80,
        }
    }
}

/// Application configuration.
///
/// Sources are layered with the following priority:
/// Defaults < Configuration File < Environment Variables < CLI Arguments.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Network interface the XDP program is attached to.
    pub interface: String,

    /// Compiled eBPF object containing both XDP programs and both buffer maps.
    pub object_path: PathBuf,

    /// Delivery mechanism. `auto` probes the kernel once at startup.
    pub delivery: DeliveryPreference,

    /// Pages mapped for each per-CPU perf buffer. Must be a power of two.
    /// - Default: 8
    pub perf_pages_per_cpu: usize,

    /// Records buffered per CPU between a perf buffer and the reader.
    /// - Default: 1024
    pub perf_queue_capacity: usize,

    #[serde(with = "level")]
    pub log_level: Level,

    /// How each observed packet is rendered in the log.
    pub log_format: LogFormat,

    /// Configuration for the API server (health and metrics endpoints).
    #[serde(default)]
    pub api: ApiConf,

    /// Maximum time to wait for the ingestion loop to stop after shutdown is requested
    /// - Default: 5s
    #[serde(default = "defaults::shutdown_timeout", with = "duration")]
    pub shutdown_timeout: Duration,

    /// Path of the file this configuration was loaded from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Conf {
    fn default() -> Self {
        let perf = PerfOptions::default();
        Self {
            interface: "eth0".to_string(),
            object_path: PathBuf::from(defaults::OBJECT_PATH),
            delivery: DeliveryPreference::Auto,
            perf_pages_per_cpu: perf.pages_per_cpu,
            perf_queue_capacity: perf.queue_capacity,
            log_level: Level::INFO,
            log_format: LogFormat::Text,
            api: ApiConf::default(),
            shutdown_timeout: defaults::shutdown_timeout(),
            config_path: None,
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub const OBJECT_PATH: &str = "/usr/lib/xdpscope/probe.o";

    pub fn shutdown_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

impl Conf {
    /// Builds the configuration from defaults, the optional YAML file named by
    /// `cli.config`, `XDPSCOPE_*` environment variables and finally the CLI flags
    /// that were actually given.
    ///
    /// # Errors
    /// * `ConfError::NoConfigFile` - The configured file does not exist.
    /// * `ConfError::InvalidConfigPath` - The configured path is a directory.
    /// * `ConfError::InvalidExtension` - The file is not `yaml` or `yml`.
    /// * `ConfError::InvalidValue` - A value is outside its accepted range.
    /// * `ConfError::Extraction` - A source could not be parsed.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;
        conf.validate()?;

        conf.config_path = config_path_to_store;
        Ok((conf, cli))
    }

    pub fn perf_options(&self) -> PerfOptions {
        PerfOptions {
            pages_per_cpu: self.perf_pages_per_cpu,
            queue_capacity: self.perf_queue_capacity,
        }
    }

    fn validate(&self) -> Result<(), ConfError> {
        if !self.perf_pages_per_cpu.is_power_of_two() {
            return Err(ConfError::InvalidValue {
                field: "perf_pages_per_cpu",
                reason: format!("{} is not a power of two", self.perf_pages_per_cpu),
            });
        }
        if self.perf_queue_capacity == 0 {
            return Err(ConfError::InvalidValue {
                field: "perf_queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.interface.is_empty() {
            return Err(ConfError::InvalidValue {
                field: "interface",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Validates that the given path points to an existing file with a supported extension.
///
/// # Errors
///
/// * `ConfError::NoConfigFile` - If the path does not exist.
/// * `ConfError::InvalidConfigPath` - If the path points to a directory.
/// * `ConfError::InvalidExtension` - If the file extension is not `yaml` or `yml`.
fn validate_config_path(path: &Path) -> Result<(), ConfError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            return Err(ConfError::NoConfigFile);
        }
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfError::InvalidExtension(ext.to_string())),
        None => Err(ConfError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug)]
pub enum ConfError {
    /// The specified configuration file does not exist.
    NoConfigFile,
    /// The path exists but is not a file (e.g., it's a directory).
    InvalidConfigPath(String),
    /// The file has an unsupported extension.
    InvalidExtension(String),
    /// A value parsed but is not usable.
    InvalidValue { field: &'static str, reason: String },
    /// Failed to extract configuration data.
    Extraction(Box<figment::Error>),
}

impl fmt::Display for ConfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfError::NoConfigFile => write!(f, "no config file provided"),
            ConfError::InvalidConfigPath(p) => write!(f, "path '{p}' is not a valid file"),
            ConfError::InvalidExtension(ext) => {
                write!(
                    f,
                    "invalid file extension '.{ext}', expected 'yaml' or 'yml'"
                )
            }
            ConfError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
            ConfError::Extraction(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl Error for ConfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfError::Extraction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfError {
    fn from(e: figment::Error) -> Self {
        ConfError::Extraction(Box::from(e))
    }
}

pub mod conf_serde {
    pub mod level {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use tracing::Level;

        pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(level.as_str())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse::<Level>().map_err(serde::de::Error::custom)
        }

        pub mod option {
            use super::*;

            pub fn serialize<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                match level {
                    Some(l) => serializer.serialize_str(l.as_str()),
                    None => serializer.serialize_none(),
                }
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
            where
                D: Deserializer<'de>,
            {
                Option::<String>::deserialize(deserializer)?
                    .map(|s| s.parse::<Level>().map_err(serde::de::Error::custom))
                    .transpose()
            }
        }
    }

    pub mod duration {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            humantime::parse_duration(&s).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::Parser;
    use figment::Jail;
    use tracing::Level;

    use super::{Conf, ConfError};
    use crate::{runtime::cli::Cli, sink::LogFormat, source::mode::DeliveryPreference};

    #[test]
    fn default_impl_has_eth0_interface() {
        let cfg = Conf::default();
        assert_eq!(cfg.interface, "eth0");
        assert_eq!(cfg.object_path, PathBuf::from("/usr/lib/xdpscope/probe.o"));
        assert_eq!(cfg.delivery, DeliveryPreference::Auto);
        assert_eq!(cfg.perf_pages_per_cpu, 8);
        assert_eq!(cfg.perf_queue_capacity, 1024);
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.api.port, 80);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.config_path, None);
    }

    #[test]
    fn test_conf_serialization() {
        let cfg = Conf::default();

        let serialized = serde_yaml::to_string(&cfg).expect("should serialize");
        let deserialized: Conf = serde_yaml::from_str(&serialized).expect("should deserialize");

        assert_eq!(cfg.shutdown_timeout, deserialized.shutdown_timeout);
        assert_eq!(cfg.delivery, deserialized.delivery);
    }

    #[test]
    fn new_succeeds_without_config_path() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["xdpscope"]);
            let (cfg, _cli) = Conf::new(cli).expect("config should load without path");
            assert_eq!(cfg.config_path, None);
            assert_eq!(cfg.interface, "eth0");

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_nonexistent_config_file() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from(["xdpscope", "--config", "nonexistent.yaml"]);
            let err = Conf::new(cli).expect_err("expected error with nonexistent file");
            assert!(matches!(err, ConfError::NoConfigFile), "unexpected error: {err}");

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_directory_as_config_path() {
        Jail::expect_with(|jail| {
            let path = "a_directory";
            jail.create_dir(path)?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let err = Conf::new(cli).expect_err("expected error with directory path");
            let msg = err.to_string();
            assert!(msg.contains("is not a valid file"), "unexpected error: {msg}");

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_invalid_config_extension() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.toml";
            jail.create_file(path, "")?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let err = Conf::new(cli).expect_err("expected error with invalid extension");
            let msg = err.to_string();
            assert!(
                msg.contains("invalid file extension '.toml'"),
                "unexpected error: {msg}"
            );

            Ok(())
        })
    }

    #[test]
    fn loads_from_yaml_file() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.yaml";
            jail.create_file(
                path,
                r#"
interface: ens5
object_path: /opt/xdpscope/probe.o
delivery: perf_buffer
perf_pages_per_cpu: 64
log_format: json
shutdown_timeout: 250ms
api:
  listen_address: "127.0.0.1"
  port: 9090
                "#,
            )?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let (cfg, _cli) = Conf::new(cli).expect("config loads from yaml file");
            assert_eq!(cfg.interface, "ens5");
            assert_eq!(cfg.object_path, PathBuf::from("/opt/xdpscope/probe.o"));
            assert_eq!(cfg.delivery, DeliveryPreference::PerfBuffer);
            assert_eq!(cfg.perf_options().pages_per_cpu, 64);
            assert_eq!(cfg.perf_options().queue_capacity, 1024);
            assert_eq!(cfg.log_format, LogFormat::Json);
            assert_eq!(cfg.shutdown_timeout, Duration::from_millis(250));
            assert_eq!(cfg.api.listen_address, "127.0.0.1");
            assert_eq!(cfg.api.port, 9090);
            assert!(cfg.api.enabled);
            assert_eq!(cfg.config_path, Some(PathBuf::from(path)));

            Ok(())
        });
    }

    #[test]
    fn env_overrides_file_and_cli_overrides_env() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.yml";
            jail.create_file(
                path,
                r#"
interface: ens5
log_level: warn
perf_queue_capacity: 16
api:
  port: 9090
                "#,
            )?;
            jail.set_env("XDPSCOPE_INTERFACE", "ens6");
            jail.set_env("XDPSCOPE_PERF_QUEUE_CAPACITY", "32");
            jail.set_env("XDPSCOPE_API__PORT", "9191");

            let cli = Cli::parse_from([
                "xdpscope",
                "--config",
                path,
                "--interface",
                "ens7",
                "--log-level",
                "debug",
            ]);
            let (cfg, _cli) = Conf::new(cli).expect("config loads");
            assert_eq!(cfg.interface, "ens7");
            assert_eq!(cfg.log_level, Level::DEBUG);
            assert_eq!(cfg.perf_queue_capacity, 32);
            assert_eq!(cfg.api.port, 9191);

            Ok(())
        });
    }

    #[test]
    fn unset_cli_flags_do_not_override_file() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.yaml";
            jail.create_file(path, "log_level: error\ndelivery: ring_buffer\n")?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let (cfg, _cli) = Conf::new(cli).expect("config loads");
            assert_eq!(cfg.log_level, Level::ERROR);
            assert_eq!(cfg.delivery, DeliveryPreference::RingBuffer);

            Ok(())
        });
    }

    #[test]
    fn rejects_non_power_of_two_perf_pages() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.yaml";
            jail.create_file(path, "perf_pages_per_cpu: 6\n")?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let err = Conf::new(cli).expect_err("6 pages must be rejected");
            assert!(
                matches!(
                    err,
                    ConfError::InvalidValue {
                        field: "perf_pages_per_cpu",
                        ..
                    }
                ),
                "unexpected error: {err}"
            );

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_delivery_in_file() {
        Jail::expect_with(|jail| {
            let path = "xdpscope.yaml";
            jail.create_file(path, "delivery: shared_memory\n")?;

            let cli = Cli::parse_from(["xdpscope", "--config", path]);
            let err = Conf::new(cli).expect_err("unknown delivery must be rejected");
            assert!(matches!(err, ConfError::Extraction(_)), "unexpected error: {err}");

            Ok(())
        });
    }
}
