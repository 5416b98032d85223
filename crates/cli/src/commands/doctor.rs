use secrecy::ExposeSecret;
use serde::Serialize;
use shiftbot_core::config::{AppConfig, LineConfig, LoadOptions};
use shiftbot_db::{connect_from_config, ping};
use shiftbot_line::RichMenuImage;

use crate::commands::{block_on, CommandFailure, CommandResult, FailureClass};

/// LINE issues channel secrets as 32 hex characters.
const CHANNEL_SECRET_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ),
            check_channel_credentials(&config.line),
            check_rich_menu(&config.line),
            check_database_connectivity(&config),
        ],
        Err(error) => {
            let skipped = "skipped because configuration did not load";
            vec![
                DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()),
                DoctorCheck::new("channel_credentials", CheckStatus::Skipped, skipped),
                DoctorCheck::new("rich_menu", CheckStatus::Skipped, skipped),
                DoctorCheck::new("database_connectivity", CheckStatus::Skipped, skipped),
            ]
        }
    };

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if warned {
        (CheckStatus::Warn, "doctor: ready, with warnings")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_channel_credentials(line: &LineConfig) -> DoctorCheck {
    let secret = line.channel_secret.expose_secret().trim();
    let shaped_like_secret =
        secret.len() == CHANNEL_SECRET_LEN && secret.chars().all(|ch| ch.is_ascii_hexdigit());

    if shaped_like_secret {
        DoctorCheck::new(
            "channel_credentials",
            CheckStatus::Pass,
            "channel secret and access token present",
        )
    } else {
        DoctorCheck::new(
            "channel_credentials",
            CheckStatus::Warn,
            format!(
                "channel secret is not {CHANNEL_SECRET_LEN} hex characters; signatures from LINE will not verify"
            ),
        )
    }
}

fn check_rich_menu(line: &LineConfig) -> DoctorCheck {
    if let Some(rich_menu_id) = &line.rich_menu_id {
        return DoctorCheck::new(
            "rich_menu",
            CheckStatus::Pass,
            format!("linking pre-created menu `{rich_menu_id}`"),
        );
    }

    let Some(path) = &line.rich_menu_image_path else {
        return DoctorCheck::new(
            "rich_menu",
            CheckStatus::Warn,
            "no rich_menu_id or rich_menu_image_path; followers get no rich menu",
        );
    };

    match RichMenuImage::content_type_for(path) {
        Ok(_) if path.is_file() => DoctorCheck::new(
            "rich_menu",
            CheckStatus::Pass,
            format!("menu image `{}` will be uploaded on first follow", path.display()),
        ),
        Ok(_) => DoctorCheck::new(
            "rich_menu",
            CheckStatus::Fail,
            format!("menu image `{}` does not exist", path.display()),
        ),
        Err(error) => DoctorCheck::new("rich_menu", CheckStatus::Fail, error.to_string()),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let result = block_on(async {
        let pool = connect_from_config(&config.database).await.map_err(|error| {
            CommandFailure::new(
                FailureClass::DbConnectivity,
                format!("failed to connect to database: {error}"),
            )
        })?;
        let pinged = ping(&pool).await.map_err(|error| {
            CommandFailure::new(FailureClass::DbConnectivity, format!("database query failed: {error}"))
        });
        pool.close().await;
        pinged
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(failure) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, failure.message),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
