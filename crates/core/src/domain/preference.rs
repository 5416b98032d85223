use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::profile::LineUserId;
use crate::domain::store::StoreId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShiftDate(pub NaiveDate);

impl ShiftDate {
    pub const FORMAT: &'static str = "%Y-%m-%d";

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        NaiveDate::parse_from_str(raw.trim(), Self::FORMAT)
            .map(Self)
            .map_err(|_| DomainError::InvalidShiftDate(raw.to_owned()))
    }
}

impl std::fmt::Display for ShiftDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceStatus {
    Ok,
    Maybe,
    No,
}

impl PreferenceStatus {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim() {
            "ok" => Ok(Self::Ok),
            "maybe" => Ok(Self::Maybe),
            "no" => Ok(Self::No),
            other => Err(DomainError::InvalidPreferenceStatus(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Maybe => "maybe",
            Self::No => "no",
        }
    }

    /// Button label shown in the submission menu.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Ok => "◯",
            Self::Maybe => "△",
            Self::No => "×",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftPreference {
    pub user_id: LineUserId,
    pub store_id: StoreId,
    pub shift_date: ShiftDate,
    pub status: PreferenceStatus,
    pub time_slot: Option<String>,
    pub note: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{PreferenceStatus, ShiftDate};
    use crate::errors::DomainError;

    #[test]
    fn shift_date_accepts_calendar_dates_only() {
        let date = ShiftDate::parse("2026-02-10").expect("valid date");
        assert_eq!(date.to_string(), "2026-02-10");

        for raw in ["2026-02-30", "2026/02/10", "tomorrow", ""] {
            assert!(matches!(ShiftDate::parse(raw), Err(DomainError::InvalidShiftDate(_))));
        }
    }

    #[test]
    fn status_parses_the_three_known_values() {
        assert_eq!(PreferenceStatus::parse("ok"), Ok(PreferenceStatus::Ok));
        assert_eq!(PreferenceStatus::parse("maybe"), Ok(PreferenceStatus::Maybe));
        assert_eq!(PreferenceStatus::parse("no"), Ok(PreferenceStatus::No));
        assert!(PreferenceStatus::parse("OK").is_err());
    }

    #[test]
    fn status_serializes_as_storage_text() {
        let json = serde_json::to_string(&PreferenceStatus::Maybe).expect("serialize");
        assert_eq!(json, "\"maybe\"");
    }
}
