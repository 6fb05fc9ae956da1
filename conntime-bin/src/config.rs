use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use conntime_net::framing::DEFAULT_MAX_REQUEST;
use conntime_net::handler::DEFAULT_READ_TIMEOUT;
use conntime_net::{BurstSchedule, Target};
use serde::Deserialize;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "etc/conntime.toml";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9099;
const DEFAULT_LIVE_PORT: u16 = 9098;
const DEFAULT_RESULT_FILE: &str = "result-%Y%m%d-%H%M%S.xml";

#[derive(Debug, Deserialize, Default)]
pub struct FileClientConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub min_threads: Option<u64>,
    pub max_threads: Option<u64>,
    pub burst_period_seconds: Option<u64>,
    pub burst_duration_minutes: Option<u64>,
    pub result_file: Option<String>,
    pub payload_size: Option<usize>,
    pub live_server_host: Option<String>,
    pub live_server_port: Option<u16>,
    pub drain_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileServerConfig {
    pub port: Option<u16>,
    pub payload_size: Option<usize>,
    pub max_request_bytes: Option<usize>,
    pub read_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileReportConfig {
    pub live_port: Option<u16>,
    pub aggregate_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub client: Option<FileClientConfig>,
    pub server: Option<FileServerConfig>,
    pub report: Option<FileReportConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    client: Option<ClientConfig>,
    pub server: ServerConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub min_threads: u64,
    pub max_threads: u64,
    pub burst_period: Duration,
    pub burst_duration: Duration,
    pub result_file: String,
    pub payload_size: Option<usize>,
    pub live_server: Option<(String, u16)>,
    pub drain_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub payload_size: Option<usize>,
    pub max_request_bytes: usize,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub live_port: u16,
    pub aggregate_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Missing { path: PathBuf, source: io::Error },
    #[error("could not parse config file: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit status for a startup failure caused by this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Missing { .. } => 2,
            ConfigError::Malformed(_) | ConfigError::Invalid(_) => 3,
        }
    }
}

fn invalid<T: Display>(msg: T) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

impl ClientConfig {
    fn fill_defaults(unresolved: FileClientConfig) -> Result<ClientConfig, ConfigError> {
        let min_threads = unresolved
            .min_threads
            .ok_or_else(|| invalid("client.min_threads is required"))?;
        let max_threads = unresolved
            .max_threads
            .ok_or_else(|| invalid("client.max_threads is required"))?;
        if min_threads == 0 {
            return Err(invalid("client.min_threads must be at least 1"));
        }
        if max_threads < min_threads {
            return Err(invalid(format!(
                "client.max_threads ({}) is below client.min_threads ({})",
                max_threads, min_threads
            )));
        }

        let burst_period = Duration::from_secs(unresolved.burst_period_seconds.unwrap_or(1));
        let burst_duration = Duration::from_secs(unresolved.burst_duration_minutes.unwrap_or(5) * 60);
        if burst_period.as_secs() == 0 || burst_duration.as_secs() == 0 {
            return Err(invalid("client burst period and duration must be positive"));
        }

        let result_file = unresolved
            .result_file
            .unwrap_or_else(|| DEFAULT_RESULT_FILE.into());
        if StrftimeItems::new(&result_file).any(|i| i == Item::Error) {
            return Err(invalid(format!("bad result file template '{}'", result_file)));
        }

        let live_server = match (unresolved.live_server_host, unresolved.live_server_port) {
            (host, Some(port)) => Some((host.unwrap_or_else(|| DEFAULT_HOST.into()), port)),
            (Some(_), None) => {
                return Err(invalid("client.live_server_host is set without live_server_port"))
            }
            (None, None) => None,
        };

        Ok(ClientConfig {
            server_host: unresolved.server_host.unwrap_or_else(|| DEFAULT_HOST.into()),
            server_port: unresolved.server_port.unwrap_or(DEFAULT_PORT),
            min_threads,
            max_threads,
            burst_period,
            burst_duration,
            result_file,
            payload_size: unresolved.payload_size,
            live_server,
            drain_timeout: Duration::from_secs(unresolved.drain_timeout_seconds.unwrap_or(30)),
        })
    }

    pub fn target(&self) -> Target {
        Target {
            host: self.server_host.clone(),
            port: self.server_port,
            payload_size: self.payload_size,
        }
    }

    pub fn schedule(&self) -> BurstSchedule {
        BurstSchedule {
            floor_threads: self.min_threads,
            ceiling_threads: self.max_threads,
            period: self.burst_period,
            budget: self.burst_duration,
        }
    }

    /// Expand the result file template for a run started at `now`.
    pub fn result_path<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> PathBuf
    where
        Tz::Offset: Display,
    {
        PathBuf::from(now.format(&self.result_file).to_string())
    }
}

impl Config {
    fn fill_defaults(unresolved: FileConfig) -> Result<Config, ConfigError> {
        let client = unresolved.client.map(ClientConfig::fill_defaults).transpose()?;
        let server = unresolved.server.unwrap_or_default();
        let report = unresolved.report.unwrap_or_default();
        let aggregate_seconds = report.aggregate_seconds.unwrap_or(10);
        if aggregate_seconds == 0 {
            return Err(invalid("report.aggregate_seconds must be positive"));
        }
        let read_timeout = server
            .read_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_READ_TIMEOUT);
        if read_timeout.as_secs() == 0 {
            return Err(invalid("server.read_timeout_seconds must be positive"));
        }
        Ok(Config {
            client,
            server: ServerConfig {
                port: server.port.unwrap_or(DEFAULT_PORT),
                payload_size: server.payload_size,
                max_request_bytes: server.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST),
                read_timeout,
            },
            report: ReportConfig {
                live_port: report.live_port.unwrap_or(DEFAULT_LIVE_PORT),
                aggregate_interval: Duration::from_secs(aggregate_seconds),
            },
        })
    }

    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let config: FileConfig = toml::from_str(contents)?;
        Config::fill_defaults(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Missing {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Config::parse(&contents)
    }

    pub fn client(&self) -> Result<&ClientConfig, ConfigError> {
        self.client
            .as_ref()
            .ok_or_else(|| invalid("the client needs a [client] section"))
    }
}
