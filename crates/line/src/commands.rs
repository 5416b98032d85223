use std::collections::HashMap;

use thiserror::Error;
use url::form_urlencoded;

use shiftbot_core::domain::preference::{PreferenceStatus, ShiftDate};
use shiftbot_core::domain::store::{StoreCode, StoreId};
use shiftbot_core::errors::DomainError;

/// Substrings that open the shift menu. Matched case-insensitively.
pub const SHIFT_KEYWORDS: [&str; 3] = ["シフト", "希望", "shift"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextCommand {
    /// `input` is the trimmed text as typed, echoed back when the code is unknown.
    StoreCode { input: String, code: StoreCode },
    ShiftMenu,
    Help,
}

/// Store-code shape wins over keywords, so `shift` alone is looked up as a code.
pub fn classify_text(text: &str) -> TextCommand {
    let trimmed = text.trim();
    if let Ok(code) = StoreCode::parse(trimmed) {
        return TextCommand::StoreCode { input: trimmed.to_owned(), code };
    }

    let lowered = trimmed.to_lowercase();
    if SHIFT_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        TextCommand::ShiftMenu
    } else {
        TextCommand::Help
    }
}

/// Postback `data` decoded as ordered `key=value` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostbackData {
    pairs: Vec<(String, String)>,
}

impl PostbackData {
    pub fn parse(raw: &str) -> Self {
        let pairs = form_urlencoded::parse(raw.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// First non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, value)| candidate == key && !value.trim().is_empty())
            .map(|(_, value)| value.as_str())
    }

    pub fn submit_preference(date: Option<ShiftDate>, status: PreferenceStatus) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("action", ACTION_SUBMIT_PREFERENCE);
        if let Some(date) = date {
            serializer.append_pair("date", &date.to_string());
        }
        serializer.append_pair("status", status.as_str());
        serializer.finish()
    }

    pub fn submit_all() -> String {
        Self::action_only(ACTION_SUBMIT_ALL)
    }

    pub fn change_store() -> String {
        Self::action_only(ACTION_CHANGE_STORE)
    }

    pub fn view_preferences() -> String {
        Self::action_only(ACTION_VIEW_PREFERENCES)
    }

    /// `switch_store` without a target, answered with the store picker.
    pub fn switch_store_picker() -> String {
        Self::action_only(ACTION_SWITCH_STORE)
    }

    pub fn switch_store(store_id: &StoreId) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("action", ACTION_SWITCH_STORE)
            .append_pair("store_id", store_id.as_str())
            .finish()
    }

    fn action_only(action: &str) -> String {
        form_urlencoded::Serializer::new(String::new()).append_pair("action", action).finish()
    }
}

const ACTION_SUBMIT_PREFERENCE: &str = "submit_preference";
const ACTION_SUBMIT_ALL: &str = "submit_all";
const ACTION_CHANGE_STORE: &str = "change_store";
const ACTION_VIEW_PREFERENCES: &str = "view_preferences";
const ACTION_SWITCH_STORE: &str = "switch_store";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferenceSubmission {
    pub date: ShiftDate,
    pub status: PreferenceStatus,
    pub time_slot: Option<String>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostbackCommand {
    SubmitPreference(PreferenceSubmission),
    SubmitAll,
    ChangeStore,
    ViewPreferences,
    /// `None` asks for the store picker.
    SwitchStore { store_id: Option<StoreId> },
}

/// Reasons a postback is dropped without a reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostbackParseError {
    #[error("postback has no action")]
    MissingAction,
    #[error("unknown postback action `{0}`")]
    UnknownAction(String),
    #[error("postback `{action}` is missing `{field}`")]
    MissingField { action: &'static str, field: &'static str },
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// `params` carries picker results; a picked `date` fills in for a missing one.
pub fn parse_postback(
    data: &str,
    params: &HashMap<String, String>,
) -> Result<PostbackCommand, PostbackParseError> {
    let data = PostbackData::parse(data);
    let action = data.get("action").ok_or(PostbackParseError::MissingAction)?;

    match action {
        ACTION_SUBMIT_PREFERENCE => {
            let date = data
                .get("date")
                .or_else(|| params.get("date").map(String::as_str).filter(|value| !value.is_empty()))
                .ok_or(PostbackParseError::MissingField {
                    action: ACTION_SUBMIT_PREFERENCE,
                    field: "date",
                })?;
            let status = data.get("status").ok_or(PostbackParseError::MissingField {
                action: ACTION_SUBMIT_PREFERENCE,
                field: "status",
            })?;

            Ok(PostbackCommand::SubmitPreference(PreferenceSubmission {
                date: ShiftDate::parse(date)?,
                status: PreferenceStatus::parse(status)?,
                time_slot: data.get("time_slot").map(str::to_owned),
                note: data.get("note").map(str::to_owned),
            }))
        }
        ACTION_SUBMIT_ALL => Ok(PostbackCommand::SubmitAll),
        ACTION_CHANGE_STORE => Ok(PostbackCommand::ChangeStore),
        ACTION_VIEW_PREFERENCES => Ok(PostbackCommand::ViewPreferences),
        ACTION_SWITCH_STORE => Ok(PostbackCommand::SwitchStore {
            store_id: data.get("store_id").map(StoreId::new),
        }),
        other => Err(PostbackParseError::UnknownAction(other.to_owned())),
    }
}
