//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "veduta";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_DUMP_DIR: &str = "tmp/veduta";
const DEFAULT_GENERATE_TTL_SECS: u64 = 30;
const DEFAULT_SERVE_TTL_SECS: u64 = 1;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;
const SECRET_KEY_LEN: usize = 32;
const DEFAULT_SECRET_KEY: &str = "veduta-development-secret-key-01";

/// Command-line arguments for the veduta binary.
#[derive(Debug, Parser)]
#[command(name = "veduta", version, about = "Veduta rendering server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VEDUTA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base URL used when building artifact links.
    #[arg(long = "server-public-url", value_name = "URL")]
    pub public_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the artifact dump directory.
    #[arg(long = "store-dump-dir", value_name = "PATH")]
    pub dump_dir: Option<PathBuf>,

    /// Override how long a freshly generated artifact is retained.
    #[arg(long = "store-generate-ttl-seconds", value_name = "SECONDS")]
    pub generate_ttl_seconds: Option<u64>,

    /// Override how long an artifact is retained after being served.
    #[arg(long = "store-serve-ttl-seconds", value_name = "SECONDS")]
    pub serve_ttl_seconds: Option<u64>,

    /// Override the browser executable path.
    #[arg(long = "rendering-browser-path", value_name = "PATH")]
    pub browser_path: Option<PathBuf>,

    /// Toggle the browser sandbox.
    #[arg(
        long = "rendering-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub sandbox: Option<bool>,

    /// Override the page load timeout.
    #[arg(long = "rendering-navigation-timeout-seconds", value_name = "SECONDS")]
    pub navigation_timeout_seconds: Option<u64>,

    /// Override the capture timeout.
    #[arg(long = "rendering-capture-timeout-seconds", value_name = "SECONDS")]
    pub capture_timeout_seconds: Option<u64>,

    /// Override the token encryption key (exactly 32 bytes).
    #[arg(long = "security-secret-key", value_name = "KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub rendering: RenderingSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub dump_dir: PathBuf,
    pub generate_ttl: Duration,
    pub serve_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderingSettings {
    pub browser_path: Option<PathBuf>,
    pub sandbox: bool,
    pub navigation_timeout: Duration,
    pub capture_timeout: Duration,
}

#[derive(Clone)]
pub struct SecuritySettings {
    pub secret_key: [u8; SECRET_KEY_LEN],
}

impl std::fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("secret_key", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VEDUTA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_serve_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    rendering: RawRenderingSettings,
    security: RawSecuritySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.public_url.as_ref() {
            self.server.public_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.dump_dir.as_ref() {
            self.store.dump_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.generate_ttl_seconds {
            self.store.generate_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.serve_ttl_seconds {
            self.store.serve_ttl_seconds = Some(seconds);
        }
        if let Some(path) = overrides.browser_path.as_ref() {
            self.rendering.browser_path = Some(path.clone());
        }
        if let Some(sandbox) = overrides.sandbox {
            self.rendering.sandbox = Some(sandbox);
        }
        if let Some(seconds) = overrides.navigation_timeout_seconds {
            self.rendering.navigation_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.capture_timeout_seconds {
            self.rendering.capture_timeout_seconds = Some(seconds);
        }
        if let Some(key) = overrides.secret_key.as_ref() {
            self.security.secret_key = Some(key.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            rendering,
            security,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let rendering = build_rendering_settings(rendering)?;
        let security = build_security_settings(security)?;

        Ok(Self {
            server,
            logging,
            store,
            rendering,
            security,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let public_url = match server.public_url {
        Some(url) => {
            let trimmed = url.trim().trim_end_matches('/').to_string();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(
                    "server.public_url",
                    "url must not be empty",
                ));
            }
            trimmed
        }
        None => format!("http://{host}:{port}"),
    };

    Ok(ServerSettings { addr, public_url })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let dump_dir = store
        .dump_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_DIR));
    if dump_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "store.dump_dir",
            "path must not be empty",
        ));
    }

    let generate_secs = store
        .generate_ttl_seconds
        .unwrap_or(DEFAULT_GENERATE_TTL_SECS);
    if generate_secs == 0 {
        return Err(LoadError::invalid(
            "store.generate_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let serve_secs = store.serve_ttl_seconds.unwrap_or(DEFAULT_SERVE_TTL_SECS);
    if serve_secs == 0 {
        return Err(LoadError::invalid(
            "store.serve_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(StoreSettings {
        dump_dir,
        generate_ttl: Duration::from_secs(generate_secs),
        serve_ttl: Duration::from_secs(serve_secs),
    })
}

fn build_rendering_settings(
    rendering: RawRenderingSettings,
) -> Result<RenderingSettings, LoadError> {
    let browser_path = rendering
        .browser_path
        .filter(|path| !path.as_os_str().is_empty());

    let navigation_secs = rendering
        .navigation_timeout_seconds
        .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS);
    if navigation_secs == 0 {
        return Err(LoadError::invalid(
            "rendering.navigation_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let capture_secs = rendering
        .capture_timeout_seconds
        .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS);
    if capture_secs == 0 {
        return Err(LoadError::invalid(
            "rendering.capture_timeout_seconds",
            "must be greater than zero",
        ));
    }

    // Containerized deployments usually lack the kernel facilities the
    // sandbox needs; it stays opt-in.
    Ok(RenderingSettings {
        browser_path,
        sandbox: rendering.sandbox.unwrap_or(false),
        navigation_timeout: Duration::from_secs(navigation_secs),
        capture_timeout: Duration::from_secs(capture_secs),
    })
}

fn build_security_settings(security: RawSecuritySettings) -> Result<SecuritySettings, LoadError> {
    let key = security
        .secret_key
        .unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string());

    let bytes = key.into_bytes();
    let secret_key: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        LoadError::invalid(
            "security.secret_key",
            format!(
                "key must be exactly {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            ),
        )
    })?;

    Ok(SecuritySettings { secret_key })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    dump_dir: Option<PathBuf>,
    generate_ttl_seconds: Option<u64>,
    serve_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderingSettings {
    browser_path: Option<PathBuf>,
    sandbox: Option<bool>,
    navigation_timeout_seconds: Option<u64>,
    capture_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSecuritySettings {
    secret_key: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
