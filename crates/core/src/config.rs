use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub line: LineConfig,
    pub profile: ProfileConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LineConfig {
    pub channel_secret: SecretString,
    pub channel_access_token: SecretString,
    pub api_base_url: String,
    pub data_api_base_url: String,
    pub timeout_secs: u64,
    /// Pre-created rich menu to link instead of creating one at runtime.
    pub rich_menu_id: Option<String>,
    pub rich_menu_image_path: Option<PathBuf>,
    /// Spend the reply token on a short acknowledgement before handler work runs.
    pub immediate_ack: bool,
}

#[derive(Clone, Debug)]
pub struct ProfileConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub fallback_display_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub line_channel_secret: Option<String>,
    pub line_channel_access_token: Option<String>,
    pub line_api_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub profile_max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_LINE_API_BASE_URL: &str = "https://api.line.me";
pub const DEFAULT_LINE_DATA_API_BASE_URL: &str = "https://api-data.line.me";
pub const DEFAULT_FALLBACK_DISPLAY_NAME: &str = "ゲストユーザー";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://shiftbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 10,
            },
            line: LineConfig {
                channel_secret: String::new().into(),
                channel_access_token: String::new().into(),
                api_base_url: DEFAULT_LINE_API_BASE_URL.to_string(),
                data_api_base_url: DEFAULT_LINE_DATA_API_BASE_URL.to_string(),
                timeout_secs: 10,
                rich_menu_id: None,
                rich_menu_image_path: None,
                immediate_ack: false,
            },
            profile: ProfileConfig {
                max_attempts: 3,
                base_delay_ms: 2_000,
                attempt_timeout_ms: 8_000,
                fallback_display_name: DEFAULT_FALLBACK_DISPLAY_NAME.to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shiftbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(line) = patch.line {
            if let Some(channel_secret) = line.channel_secret {
                self.line.channel_secret = secret_value(channel_secret);
            }
            if let Some(channel_access_token) = line.channel_access_token {
                self.line.channel_access_token = secret_value(channel_access_token);
            }
            if let Some(api_base_url) = line.api_base_url {
                self.line.api_base_url = api_base_url;
            }
            if let Some(data_api_base_url) = line.data_api_base_url {
                self.line.data_api_base_url = data_api_base_url;
            }
            if let Some(timeout_secs) = line.timeout_secs {
                self.line.timeout_secs = timeout_secs;
            }
            if let Some(rich_menu_id) = line.rich_menu_id {
                self.line.rich_menu_id = Some(rich_menu_id);
            }
            if let Some(rich_menu_image_path) = line.rich_menu_image_path {
                self.line.rich_menu_image_path = Some(rich_menu_image_path);
            }
            if let Some(immediate_ack) = line.immediate_ack {
                self.line.immediate_ack = immediate_ack;
            }
        }

        if let Some(profile) = patch.profile {
            if let Some(max_attempts) = profile.max_attempts {
                self.profile.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = profile.base_delay_ms {
                self.profile.base_delay_ms = base_delay_ms;
            }
            if let Some(attempt_timeout_ms) = profile.attempt_timeout_ms {
                self.profile.attempt_timeout_ms = attempt_timeout_ms;
            }
            if let Some(fallback_display_name) = profile.fallback_display_name {
                self.profile.fallback_display_name = fallback_display_name;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHIFTBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHIFTBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SHIFTBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SHIFTBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let channel_secret =
            read_env("SHIFTBOT_LINE_CHANNEL_SECRET").or_else(|| read_env("LINE_CHANNEL_SECRET"));
        if let Some(value) = channel_secret {
            self.line.channel_secret = secret_value(value);
        }
        let channel_access_token = read_env("SHIFTBOT_LINE_CHANNEL_ACCESS_TOKEN")
            .or_else(|| read_env("LINE_CHANNEL_ACCESS_TOKEN"));
        if let Some(value) = channel_access_token {
            self.line.channel_access_token = secret_value(value);
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_API_BASE_URL") {
            self.line.api_base_url = value;
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_DATA_API_BASE_URL") {
            self.line.data_api_base_url = value;
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_TIMEOUT_SECS") {
            self.line.timeout_secs = parse_u64("SHIFTBOT_LINE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_RICH_MENU_ID") {
            self.line.rich_menu_id = Some(value);
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_RICH_MENU_IMAGE_PATH") {
            self.line.rich_menu_image_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("SHIFTBOT_LINE_IMMEDIATE_ACK") {
            self.line.immediate_ack = parse_bool("SHIFTBOT_LINE_IMMEDIATE_ACK", &value)?;
        }

        if let Some(value) = read_env("SHIFTBOT_PROFILE_MAX_ATTEMPTS") {
            self.profile.max_attempts = parse_u32("SHIFTBOT_PROFILE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_PROFILE_BASE_DELAY_MS") {
            self.profile.base_delay_ms = parse_u64("SHIFTBOT_PROFILE_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_PROFILE_ATTEMPT_TIMEOUT_MS") {
            self.profile.attempt_timeout_ms =
                parse_u64("SHIFTBOT_PROFILE_ATTEMPT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_PROFILE_FALLBACK_DISPLAY_NAME") {
            self.profile.fallback_display_name = value;
        }

        if let Some(value) = read_env("SHIFTBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SHIFTBOT_SERVER_PORT") {
            self.server.port = parse_u16("SHIFTBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SHIFTBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SHIFTBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SHIFTBOT_LOGGING_LEVEL").or_else(|| read_env("SHIFTBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHIFTBOT_LOGGING_FORMAT").or_else(|| read_env("SHIFTBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(channel_secret) = overrides.line_channel_secret {
            self.line.channel_secret = secret_value(channel_secret);
        }
        if let Some(channel_access_token) = overrides.line_channel_access_token {
            self.line.channel_access_token = secret_value(channel_access_token);
        }
        if let Some(api_base_url) = overrides.line_api_base_url {
            self.line.api_base_url = api_base_url;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(max_attempts) = overrides.profile_max_attempts {
            self.profile.max_attempts = max_attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_line(&self.line)?;
        validate_profile(&self.profile)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shiftbot.toml"), PathBuf::from("config/shiftbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_line(line: &LineConfig) -> Result<(), ConfigError> {
    if line.channel_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "line.channel_secret is required. Get it from the LINE Developers console > your channel > Basic settings > Channel secret".to_string(),
        ));
    }

    if line.channel_access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "line.channel_access_token is required. Issue a long-lived token under Messaging API > Channel access token".to_string(),
        ));
    }

    for (key, value) in
        [("line.api_base_url", &line.api_base_url), ("line.data_api_base_url", &line.data_api_base_url)]
    {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if line.timeout_secs == 0 || line.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "line.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if let Some(rich_menu_id) = &line.rich_menu_id {
        if rich_menu_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "line.rich_menu_id must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_profile(profile: &ProfileConfig) -> Result<(), ConfigError> {
    if profile.max_attempts == 0 || profile.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "profile.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if profile.attempt_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "profile.attempt_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if profile.fallback_display_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "profile.fallback_display_name must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    line: Option<LinePatch>,
    profile: Option<ProfilePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LinePatch {
    channel_secret: Option<String>,
    channel_access_token: Option<String>,
    api_base_url: Option<String>,
    data_api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    rich_menu_id: Option<String>,
    rich_menu_image_path: Option<PathBuf>,
    immediate_ack: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ProfilePatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    attempt_timeout_ms: Option<u64>,
    fallback_display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const LINE_VARS: &[&str] = &[
        "SHIFTBOT_LINE_CHANNEL_SECRET",
        "SHIFTBOT_LINE_CHANNEL_ACCESS_TOKEN",
        "LINE_CHANNEL_SECRET",
        "LINE_CHANNEL_ACCESS_TOKEN",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("TEST_LINE_SECRET", "secret-from-env");
        env::set_var("TEST_LINE_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("shiftbot.toml");
            fs::write(
                &path,
                r#"
[line]
channel_secret = "${TEST_LINE_SECRET}"
channel_access_token = "${TEST_LINE_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.line.channel_secret.expose_secret() == "secret-from-env",
                "channel secret should be interpolated from environment",
            )?;
            ensure(
                config.line.channel_access_token.expose_secret() == "token-from-env",
                "access token should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_LINE_SECRET", "TEST_LINE_TOKEN"]);
        result
    }

    #[test]
    fn bare_line_env_names_are_accepted() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("LINE_CHANNEL_SECRET", "bare-secret");
        env::set_var("LINE_CHANNEL_ACCESS_TOKEN", "bare-token");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.line.channel_secret.expose_secret() == "bare-secret",
                "LINE_CHANNEL_SECRET should populate line.channel_secret",
            )?;
            ensure(
                config.profile.max_attempts == 3,
                "profile retries should default to three attempts",
            )?;
            Ok(())
        })();

        clear_vars(LINE_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("SHIFTBOT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SHIFTBOT_LINE_CHANNEL_SECRET", "secret-from-env");
        env::set_var("SHIFTBOT_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("shiftbot.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[line]
channel_secret = "secret-from-file"
channel_access_token = "token-from-file"

[profile]
max_attempts = 5

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "log format alias should be read from env",
            )?;
            ensure(
                config.line.channel_secret.expose_secret() == "secret-from-env",
                "env channel secret should win over file",
            )?;
            ensure(
                config.line.channel_access_token.expose_secret() == "token-from-file",
                "file access token should win over default",
            )?;
            ensure(config.profile.max_attempts == 5, "file retry budget should apply")?;
            Ok(())
        })();

        clear_vars(&["SHIFTBOT_DATABASE_URL", "SHIFTBOT_LOG_FORMAT"]);
        clear_vars(LINE_VARS);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("SHIFTBOT_LINE_CHANNEL_ACCESS_TOKEN", "token-only");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("line.channel_secret")
            );
            ensure(has_message, "validation failure should mention line.channel_secret")
        })();

        clear_vars(LINE_VARS);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("SHIFTBOT_PROFILE_MAX_ATTEMPTS", "three");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::InvalidEnvOverride { ref key, .. })
                        if key == "SHIFTBOT_PROFILE_MAX_ATTEMPTS"
                ),
                "non-numeric retry budget should be rejected",
            )
        })();

        clear_vars(&["SHIFTBOT_PROFILE_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(LINE_VARS);

        env::set_var("SHIFTBOT_LINE_CHANNEL_SECRET", "super-secret-value");
        env::set_var("SHIFTBOT_LINE_CHANNEL_ACCESS_TOKEN", "super-token-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("super-secret-value"), "debug output leaked channel secret")?;
            ensure(!debug.contains("super-token-value"), "debug output leaked access token")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(LINE_VARS);
        result
    }
}
