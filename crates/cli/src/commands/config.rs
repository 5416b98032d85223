use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use shiftbot_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let line = &config.line;
    vec![
        entry("database.url", config.database.url.clone(), &["SHIFTBOT_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SHIFTBOT_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SHIFTBOT_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "line.channel_secret",
            redact_secret(&line.channel_secret),
            &["SHIFTBOT_LINE_CHANNEL_SECRET", "LINE_CHANNEL_SECRET"],
        ),
        entry(
            "line.channel_access_token",
            redact_secret(&line.channel_access_token),
            &["SHIFTBOT_LINE_CHANNEL_ACCESS_TOKEN", "LINE_CHANNEL_ACCESS_TOKEN"],
        ),
        entry("line.api_base_url", line.api_base_url.clone(), &["SHIFTBOT_LINE_API_BASE_URL"]),
        entry(
            "line.data_api_base_url",
            line.data_api_base_url.clone(),
            &["SHIFTBOT_LINE_DATA_API_BASE_URL"],
        ),
        entry("line.timeout_secs", line.timeout_secs.to_string(), &["SHIFTBOT_LINE_TIMEOUT_SECS"]),
        entry(
            "line.rich_menu_id",
            line.rich_menu_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["SHIFTBOT_LINE_RICH_MENU_ID"],
        ),
        entry(
            "line.rich_menu_image_path",
            line.rich_menu_image_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            &["SHIFTBOT_LINE_RICH_MENU_IMAGE_PATH"],
        ),
        entry(
            "line.immediate_ack",
            line.immediate_ack.to_string(),
            &["SHIFTBOT_LINE_IMMEDIATE_ACK"],
        ),
        entry(
            "profile.max_attempts",
            config.profile.max_attempts.to_string(),
            &["SHIFTBOT_PROFILE_MAX_ATTEMPTS"],
        ),
        entry(
            "profile.base_delay_ms",
            config.profile.base_delay_ms.to_string(),
            &["SHIFTBOT_PROFILE_BASE_DELAY_MS"],
        ),
        entry(
            "profile.attempt_timeout_ms",
            config.profile.attempt_timeout_ms.to_string(),
            &["SHIFTBOT_PROFILE_ATTEMPT_TIMEOUT_MS"],
        ),
        entry(
            "profile.fallback_display_name",
            config.profile.fallback_display_name.clone(),
            &["SHIFTBOT_PROFILE_FALLBACK_DISPLAY_NAME"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["SHIFTBOT_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["SHIFTBOT_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SHIFTBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["SHIFTBOT_LOGGING_LEVEL", "SHIFTBOT_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SHIFTBOT_LOGGING_FORMAT", "SHIFTBOT_LOG_FORMAT"],
        ),
    ]
}

type Entry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("shiftbot.toml"), PathBuf::from("config/shiftbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the last four characters so operators can tell credentials apart.
fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= 8 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        let secret: SecretString = "0123456789abcdef0123456789abcdef".to_string().into();
        assert_eq!(redact_secret(&secret), "***cdef");

        let short: SecretString = "abc".to_string().into();
        assert_eq!(redact_secret(&short), "<redacted>");

        let empty: SecretString = "  ".to_string().into();
        assert_eq!(redact_secret(&empty), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_file_docs() {
        let doc: Value = "[line]\nimmediate_ack = true\n".parse().expect("toml");

        assert!(contains_path(&doc, "line.immediate_ack"));
        assert!(!contains_path(&doc, "line.rich_menu_id"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
