use crate::adapter::ObjectStorageConfig;
use crate::error::LogflowError;
use clap::{Parser, Subcommand, ValueEnum};
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    Stdout,
    File,
    S3,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "UDP log ingestion with batched delivery", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the ingestion server (default)
    Serve,
    /// Probe the local health endpoint; exit code 0 when healthy
    Healthcheck,
    /// Stream live lines from a running server's tail socket
    Tail,
    /// Read lines from stdin and send them as JSON log records over UDP
    Forward {
        /// Destination IP
        #[arg(long, env = "UDP_LOG_FORWARD_IP", default_value = "127.0.0.1")]
        ip: IpAddr,

        /// Destination port
        #[arg(long, env = "UDP_LOG_FORWARD_PORT", default_value = "9999")]
        port: u16,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct Settings {
    /// IP to bind the UDP listener to
    #[arg(long, env = "UDP_LOG_LISTEN_IP", default_value = "0.0.0.0")]
    pub listen_ip: IpAddr,

    /// UDP port to receive log datagrams on
    #[arg(long, env = "UDP_LOG_LISTEN_PORT", default_value = "9999")]
    pub listen_port: u16,

    /// Flush once buffered lines reach this many bytes
    #[arg(long, env = "UDP_BATCH_SIZE_BYTES", default_value = "1048576")]
    pub batch_size_bytes: usize,

    /// Flush once this many seconds passed since the last flush
    #[arg(long, env = "UDP_BATCH_INTERVAL", default_value = "60")]
    pub batch_interval_secs: f64,

    /// IP to bind the health endpoint to
    #[arg(long, env = "HEALTH_IP", default_value = "0.0.0.0")]
    pub health_ip: IpAddr,

    /// Port of the HTTP health endpoint
    #[arg(long, env = "HEALTH_PORT", default_value = "8080")]
    pub health_port: u16,

    /// Sinks receiving every batch
    #[arg(
        long,
        env = "LOGFLOW_SINKS",
        value_enum,
        value_delimiter = ',',
        default_value = "stdout"
    )]
    pub sinks: Vec<SinkKind>,

    /// Output directory of the file sink
    #[arg(long, env = "DISK_SINK_DIR", default_value = "./logs")]
    pub disk_sink_dir: PathBuf,

    /// S3-compatible endpoint URL
    #[arg(long, env = "S3_ENDPOINT", default_value = "http://localhost:9000")]
    pub s3_endpoint: String,

    #[arg(long, env = "S3_ACCESS_KEY", default_value = "minioadmin")]
    pub s3_access_key: String,

    /// Also read from S3_SECRET_KEY_FILE when set
    #[arg(
        long,
        env = "S3_SECRET_KEY",
        default_value = "minioadmin",
        hide_env_values = true
    )]
    pub s3_secret_key: String,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    #[arg(long, env = "S3_BUCKET", default_value = "logflow-ingest")]
    pub s3_bucket: String,

    /// Key prefix for uploaded batch objects
    #[arg(long, env = "S3_PREFIX", default_value = "logs")]
    pub s3_prefix: String,

    /// Serve the live tail socket
    #[arg(
        long,
        env = "LOGFLOW_TAIL_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub tail_enabled: bool,

    /// Unix socket path of the live tail
    #[arg(long, env = "LOGFLOW_IPC_SOCKET", default_value = crate::tail::DEFAULT_SOCKET_PATH)]
    pub tail_socket: PathBuf,

    /// Maximum concurrent tail observers
    #[arg(long, env = "LOGFLOW_MAX_TAIL_CLIENTS", default_value = "5")]
    pub max_tail_clients: usize,

    /// Upper bound for a single sink write, in seconds
    #[arg(long, env = "SINK_TIMEOUT_SECS", default_value = "30")]
    pub sink_timeout_secs: u64,

    /// Interval of background sink probes in seconds (0 disables)
    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value = "30")]
    pub probe_interval_secs: u64,

    /// Time allowed for tasks to stop on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,
}

impl Settings {
    /// Validates the settings and returns an error if invalid.
    pub fn validate(&self) -> Result<(), LogflowError> {
        validate_port(self.listen_port)?;
        validate_port(self.health_port)?;
        if self.batch_size_bytes == 0 {
            return Err(LogflowError::Config("Batch size must be at least 1 byte".into()));
        }
        self.batch_interval()?;
        if self.max_tail_clients == 0 {
            return Err(LogflowError::Config("Max tail clients must be at least 1".into()));
        }
        if self.sinks.is_empty() {
            return Err(LogflowError::Config("At least one sink is required".into()));
        }
        if self.sinks.contains(&SinkKind::S3) {
            validate_non_empty("S3 endpoint", &self.s3_endpoint)?;
            validate_non_empty("S3 bucket", &self.s3_bucket)?;
        }
        if self.sinks.contains(&SinkKind::File) {
            validate_non_empty("Disk sink directory", &self.disk_sink_dir.to_string_lossy())?;
        }
        Ok(())
    }

    /// Batch interval as a `Duration`; rejects zero, negative, non-finite and
    /// out-of-range values.
    pub fn batch_interval(&self) -> Result<Duration, LogflowError> {
        match Duration::try_from_secs_f64(self.batch_interval_secs) {
            Ok(interval) if !interval.is_zero() => Ok(interval),
            _ => Err(LogflowError::Config(format!(
                "Batch interval must be a positive number of seconds, got {}",
                self.batch_interval_secs
            ))),
        }
    }

    pub fn object_storage(&self) -> ObjectStorageConfig {
        ObjectStorageConfig {
            endpoint: self.s3_endpoint.clone(),
            bucket: self.s3_bucket.clone(),
            region: self.s3_region.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            prefix: self.s3_prefix.clone(),
            request_timeout: Duration::from_secs(self.sink_timeout_secs.max(1)),
        }
    }

    /// Apply `S3_SECRET_KEY_FILE` (Docker secrets) over the plain value.
    fn apply_secret_files(&mut self) -> Result<(), LogflowError> {
        if let Some(secret) = read_secret_file("S3_SECRET_KEY")? {
            self.s3_secret_key = secret;
        }
        Ok(())
    }
}

/// Validates that the port is in valid range (1-65535).
fn validate_port(port: u16) -> Result<(), LogflowError> {
    if port == 0 {
        return Err(LogflowError::Config("Port cannot be 0".into()));
    }
    Ok(())
}

fn validate_non_empty(what: &str, value: &str) -> Result<(), LogflowError> {
    if value.trim().is_empty() {
        return Err(LogflowError::Config(format!("{what} cannot be empty")));
    }
    Ok(())
}

/// Read `<env_name>_FILE` if set (Docker Secrets support).
fn read_secret_file(env_name: &str) -> Result<Option<String>, LogflowError> {
    let file_env = format!("{env_name}_FILE");
    match env::var(&file_env) {
        Ok(file_path) => fs::read_to_string(&file_path)
            .map(|content| Some(content.trim().to_string()))
            .map_err(|e| LogflowError::Config(format!("Failed to read {file_env}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse the command line (with environment fallbacks) and validate the result.
pub fn get_configuration() -> Result<Cli, LogflowError> {
    let mut cli = Cli::parse();
    cli.settings.apply_secret_files()?;
    if matches!(cli.command, None | Some(Command::Serve)) {
        cli.settings.validate()?;
    }
    Ok(cli)
}
