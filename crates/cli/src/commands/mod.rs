pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod sign;

use std::future::Future;

use serde::Serialize;
use shiftbot_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Why a command stopped. Each class has a fixed exit code so scripts can
/// branch on it without parsing the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    ConfigValidation,
    RuntimeInit,
    ReadBody,
    DbConnectivity,
    Migration,
    SeedExecution,
    SeedVerification,
}

impl FailureClass {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation => 2,
            Self::RuntimeInit | Self::ReadBody => 3,
            Self::DbConnectivity => 4,
            Self::Migration | Self::SeedExecution => 5,
            Self::SeedVerification => 6,
        }
    }
}

#[derive(Debug)]
pub struct CommandFailure {
    pub class: FailureClass,
    pub message: String,
}

impl CommandFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<FailureClass>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let outcome =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() };
        Self { exit_code: 0, output: render(&outcome) }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let outcome = CommandOutcome {
            command,
            status: "error",
            error_class: Some(failure.class),
            message: failure.message,
        };
        Self { exit_code: failure.class.exit_code(), output: render(&outcome) }
    }

    pub fn from_result(command: &str, result: Result<String, CommandFailure>) -> Self {
        match result {
            Ok(message) => Self::success(command, message),
            Err(failure) => Self::failure(command, failure),
        }
    }
}

pub(crate) fn load_config() -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new(FailureClass::ConfigValidation, format!("configuration issue: {error}"))
    })
}

/// Commands are synchronous entry points; database work runs on a
/// throwaway current-thread runtime.
pub(crate) fn block_on<T>(
    work: impl Future<Output = Result<T, CommandFailure>>,
) -> Result<T, CommandFailure> {
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandFailure::new(
                FailureClass::RuntimeInit,
                format!("failed to initialize async runtime: {error}"),
            )
        })?;
    runtime.block_on(work)
}

fn render(outcome: &CommandOutcome<'_>) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"status\":\"error\",\"message\":\"serialization failed: {}\"}}",
            outcome.command,
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
