use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::profile::LineUserId;
use crate::errors::DomainError;

pub const STORE_CODE_MIN_LEN: usize = 4;
pub const STORE_CODE_MAX_LEN: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store join code, normalized to uppercase. Codes are 4 to 10 ASCII
/// alphanumerics or hyphens.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreCode(String);

impl StoreCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if !Self::matches_format(trimmed) {
            return Err(DomainError::InvalidStoreCode(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// True when `text`, once trimmed, has the shape of a store code.
    pub fn looks_like(text: &str) -> bool {
        Self::matches_format(text.trim())
    }

    fn matches_format(candidate: &str) -> bool {
        (STORE_CODE_MIN_LEN..=STORE_CODE_MAX_LEN).contains(&candidate.len())
            && candidate.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    pub code: StoreCode,
    pub owner_user_id: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Staff,
    Manager,
    Admin,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "staff" => Some(Self::Staff),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Link between a chat user and a store. The scheduling constraint fields
/// stay `None` (store policy) until a manager edits them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMembership {
    pub user_id: LineUserId,
    pub store_id: StoreId,
    pub role: MembershipRole,
    pub max_consecutive_days: Option<u32>,
    pub max_weekly_days: Option<u32>,
    pub unavailable_days: Option<Vec<String>>,
    pub preferred_time_slots: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoreMembership {
    pub fn staff(user_id: LineUserId, store_id: StoreId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            store_id,
            role: MembershipRole::Staff,
            max_consecutive_days: None,
            max_weekly_days: None,
            unavailable_days: None,
            preferred_time_slots: None,
            created_at: now,
            updated_at: now,
        }
    }
}
