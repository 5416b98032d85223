use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use shiftbot_line::sign_body;

use crate::commands::{load_config, CommandFailure, CommandResult, FailureClass};

/// Signs a body file the way LINE signs webhook deliveries. The message is
/// the bare header value, ready for `curl -H "x-line-signature: ..."`.
pub fn run(body_path: &Path, secret: Option<String>) -> CommandResult {
    CommandResult::from_result("sign", sign(body_path, secret))
}

fn sign(body_path: &Path, secret: Option<String>) -> Result<String, CommandFailure> {
    let secret = match secret {
        Some(secret) => secret,
        None => load_config()
            .map_err(|failure| {
                CommandFailure::new(failure.class, format!("{} (or pass --secret)", failure.message))
            })?
            .line
            .channel_secret
            .expose_secret()
            .to_owned(),
    };

    if secret.trim().is_empty() {
        return Err(CommandFailure::new(FailureClass::ConfigValidation, "channel secret is empty"));
    }

    let body = fs::read(body_path).map_err(|error| {
        CommandFailure::new(
            FailureClass::ReadBody,
            format!("could not read `{}`: {error}", body_path.display()),
        )
    })?;
    Ok(sign_body(&body, &secret))
}
