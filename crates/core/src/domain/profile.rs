use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name persisted when the platform reports an empty display name.
pub const UNSET_DISPLAY_NAME: &str = "未設定";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineUserId(pub String);

impl LineUserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LineUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Profile as reported by the chat platform. Never stored as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: LineUserId,
    pub display_name: String,
}

impl Profile {
    pub fn fallback(user_id: LineUserId, display_name: impl Into<String>) -> Self {
        Self { user_id, display_name: display_name.into() }
    }

    pub fn persisted_name(&self) -> String {
        let trimmed = self.display_name.trim();
        if trimmed.is_empty() {
            UNSET_DISPLAY_NAME.to_owned()
        } else {
            trimmed.to_owned()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub line_user_id: LineUserId,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{LineUserId, Profile, UNSET_DISPLAY_NAME};

    #[test]
    fn blank_display_name_is_persisted_as_unset() {
        let profile = Profile { user_id: LineUserId::new("U1"), display_name: "  ".to_owned() };
        assert_eq!(profile.persisted_name(), UNSET_DISPLAY_NAME);
    }

    #[test]
    fn display_name_is_trimmed_before_persisting() {
        let profile = Profile { user_id: LineUserId::new("U1"), display_name: " Taro ".to_owned() };
        assert_eq!(profile.persisted_name(), "Taro");
    }
}
