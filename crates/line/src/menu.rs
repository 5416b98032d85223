use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use shiftbot_core::config::LineConfig;
use shiftbot_core::domain::profile::LineUserId;

use crate::client::{LineApiError, MessagingApi};
use crate::commands::PostbackData;
use crate::messages::Action;

pub const RICH_MENU_WIDTH: u32 = 2500;
pub const RICH_MENU_HEIGHT: u32 = 843;
/// Text that the "submit" area sends; it routes through the shift keyword match.
pub const SUBMIT_AREA_TEXT: &str = "シフト希望提出";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MenuSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MenuArea {
    pub bounds: Bounds,
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RichMenu {
    pub size: MenuSize,
    pub selected: bool,
    pub name: String,
    pub chat_bar_text: String,
    pub areas: Vec<MenuArea>,
}

impl RichMenu {
    /// Three equal columns: submit preferences, view preferences, change store.
    pub fn shift_menu() -> Self {
        let widths = [833, 833, RICH_MENU_WIDTH - 833 * 2];
        let actions = [
            Action::message("希望を提出", SUBMIT_AREA_TEXT),
            Action::postback("提出済みを見る", PostbackData::view_preferences()),
            Action::postback("店舗を変更", PostbackData::switch_store_picker()),
        ];

        let mut x = 0;
        let areas = widths
            .into_iter()
            .zip(actions)
            .map(|(width, action)| {
                let area =
                    MenuArea { bounds: Bounds { x, y: 0, width, height: RICH_MENU_HEIGHT }, action };
                x += width;
                area
            })
            .collect();

        Self {
            size: MenuSize { width: RICH_MENU_WIDTH, height: RICH_MENU_HEIGHT },
            selected: true,
            name: "shiftbot-main".to_string(),
            chat_bar_text: "メニュー".to_string(),
            areas,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RichMenuImage {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum MenuImageError {
    #[error("rich menu image `{0}` must be .png, .jpg or .jpeg")]
    UnsupportedExtension(String),
    #[error("could not read rich menu image `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
}

impl RichMenuImage {
    pub fn content_type_for(path: &Path) -> Result<&'static str, MenuImageError> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "png" => Ok("image/png"),
            "jpg" | "jpeg" => Ok("image/jpeg"),
            _ => Err(MenuImageError::UnsupportedExtension(path.display().to_string())),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, MenuImageError> {
        let content_type = Self::content_type_for(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| MenuImageError::Read { path: path.display().to_string(), source })?;
        Ok(Self { content_type, bytes })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MenuOutcome {
    Linked { rich_menu_id: String },
    Skipped { reason: String },
    Failed { reason: String },
}

/// Creates the rich menu at most once per process and links it per user.
/// Every failure is logged and reported as an outcome, never raised.
pub struct MenuProvisioner {
    api: Arc<dyn MessagingApi>,
    configured_menu_id: Option<String>,
    image: Option<RichMenuImage>,
    created_menu_id: OnceCell<String>,
    /// Kept apart from creation so a failed upload retries against the same menu.
    image_uploaded: OnceCell<()>,
}

impl MenuProvisioner {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        configured_menu_id: Option<String>,
        image: Option<RichMenuImage>,
    ) -> Self {
        Self {
            api,
            configured_menu_id,
            image,
            created_menu_id: OnceCell::new(),
            image_uploaded: OnceCell::new(),
        }
    }

    /// An unreadable image disables runtime creation; a configured menu id
    /// still gets linked.
    pub async fn from_config(api: Arc<dyn MessagingApi>, config: &LineConfig) -> Self {
        let image = match config.rich_menu_image_path.as_deref() {
            Some(path) => match RichMenuImage::load(path).await {
                Ok(image) => Some(image),
                Err(error) => {
                    warn!(error = %error, "rich menu image unavailable; runtime menu creation disabled");
                    None
                }
            },
            None => None,
        };
        Self::new(api, config.rich_menu_id.clone(), image)
    }

    pub async fn provision_for(&self, user_id: &LineUserId) -> MenuOutcome {
        let rich_menu_id = match self.menu_id().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                let reason = "no rich menu id configured and no image to create one".to_string();
                info!(user_id = %user_id, %reason, "rich menu provisioning skipped");
                return MenuOutcome::Skipped { reason };
            }
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "rich menu creation failed");
                return MenuOutcome::Failed { reason: error.to_string() };
            }
        };

        match self.api.link_rich_menu(user_id, &rich_menu_id).await {
            Ok(()) => {
                info!(user_id = %user_id, rich_menu_id = %rich_menu_id, "rich menu linked");
                MenuOutcome::Linked { rich_menu_id }
            }
            Err(error) => {
                warn!(
                    user_id = %user_id,
                    rich_menu_id = %rich_menu_id,
                    error = %error,
                    "rich menu link failed"
                );
                MenuOutcome::Failed { reason: error.to_string() }
            }
        }
    }

    async fn menu_id(&self) -> Result<Option<String>, LineApiError> {
        if let Some(id) = self.configured_menu_id.as_ref() {
            return Ok(Some(id.clone()));
        }
        let Some(image) = self.image.as_ref() else {
            return Ok(None);
        };

        let id = self
            .created_menu_id
            .get_or_try_init(|| async {
                let id = self.api.create_rich_menu(&RichMenu::shift_menu()).await?;
                info!(rich_menu_id = %id, "rich menu created");
                Ok::<_, LineApiError>(id)
            })
            .await?;
        self.image_uploaded
            .get_or_try_init(|| async {
                self.api.upload_rich_menu_image(id, image).await?;
                info!(rich_menu_id = %id, "rich menu image uploaded");
                Ok::<_, LineApiError>(())
            })
            .await?;
        Ok(Some(id.clone()))
    }
}
