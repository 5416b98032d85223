use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use shiftbot_core::domain::profile::{LineUserId, Profile};
use shiftbot_core::domain::store::{Store, StoreCode, StoreId};
use shiftbot_db::repositories::{InMemoryDatastore, Repositories, StoreRepository};

use crate::client::{LineApiError, MessagingApi};
use crate::events::ReplyToken;
use crate::menu::{MenuProvisioner, RichMenu, RichMenuImage};
use crate::messages::Message;
use crate::profile::{ProfileFetcher, RetryPolicy};
use crate::reply::Responder;
use crate::workflow::RegistrationWorkflow;

/// Workflow wired to in-memory tables holding two stores, `S1` (code `AB12`)
/// and `S2` (code `UMEDA-01`). "Today" is Monday 2026-02-09.
pub struct Harness {
    pub api: Arc<FakeMessagingApi>,
    pub datastore: Arc<InMemoryDatastore>,
    pub workflow: Arc<RegistrationWorkflow>,
}

pub fn test_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 9).expect("valid date")
}

impl Harness {
    pub async fn new() -> Self {
        let api = Arc::new(FakeMessagingApi::default());
        let datastore = Arc::new(InMemoryDatastore::new());
        for (id, name, code) in [("S1", "渋谷店", "AB12"), ("S2", "梅田店", "UMEDA-01")] {
            let store = Store {
                id: StoreId::new(id),
                name: name.to_string(),
                code: StoreCode::parse(code).expect("code"),
                owner_user_id: None,
                address: None,
            };
            StoreRepository::upsert(datastore.as_ref(), &store).await.expect("seed store");
        }

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            attempt_timeout: Duration::from_millis(200),
        };
        let workflow = RegistrationWorkflow::new(
            Repositories::in_memory(datastore.clone()),
            ProfileFetcher::new(api.clone(), policy, "ゲストユーザー"),
            MenuProvisioner::new(api.clone(), Some("richmenu-fixed".to_string()), None),
            Duration::from_secs(1),
        )
        .with_today(test_today);

        Self { api, datastore, workflow: Arc::new(workflow) }
    }

    pub fn responder(&self, token: &str) -> Responder {
        Responder::new(
            self.api.clone(),
            Some(LineUserId::new("U1")),
            Some(ReplyToken::new(token)),
            false,
            format!("evt-{token}"),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundCall {
    GetProfile { user_id: String },
    Reply { token: String, messages: Vec<Message> },
    Push { to: String, messages: Vec<Message> },
    CreateRichMenu,
    UploadImage { rich_menu_id: String },
    LinkRichMenu { user_id: String, rich_menu_id: String },
}

/// Records every call; results come from per-endpoint scripts, then defaults.
#[derive(Default)]
pub struct FakeMessagingApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    profile_results: VecDeque<Result<Profile, LineApiError>>,
    profile_delay: Option<Duration>,
    reply_results: VecDeque<Result<(), LineApiError>>,
    fail_menu_calls: bool,
    fail_uploads: bool,
    menus_created: usize,
    calls: Vec<OutboundCall>,
}

pub fn unavailable(endpoint: &str) -> LineApiError {
    LineApiError::Status { endpoint: endpoint.to_owned(), status: 503, body: String::new() }
}

impl FakeMessagingApi {
    pub async fn script_profiles(&self, results: Vec<Result<Profile, LineApiError>>) {
        self.state.lock().await.profile_results = results.into();
    }

    pub async fn delay_profiles(&self, delay: Duration) {
        self.state.lock().await.profile_delay = Some(delay);
    }

    pub async fn script_replies(&self, results: Vec<Result<(), LineApiError>>) {
        self.state.lock().await.reply_results = results.into();
    }

    pub async fn fail_menu_calls(&self, fail: bool) {
        self.state.lock().await.fail_menu_calls = fail;
    }

    pub async fn fail_uploads(&self, fail: bool) {
        self.state.lock().await.fail_uploads = fail;
    }

    pub async fn calls(&self) -> Vec<OutboundCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn profile_attempts(&self) -> usize {
        self.calls().await.iter().filter(|call| matches!(call, OutboundCall::GetProfile { .. })).count()
    }

    pub async fn replies(&self) -> Vec<(String, Vec<Message>)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                OutboundCall::Reply { token, messages } => Some((token, messages)),
                _ => None,
            })
            .collect()
    }

    pub async fn pushes(&self) -> Vec<(String, Vec<Message>)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                OutboundCall::Push { to, messages } => Some((to, messages)),
                _ => None,
            })
            .collect()
    }

    /// Text bodies of every reply and push, in call order.
    pub async fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .flat_map(|call| match call {
                OutboundCall::Reply { messages, .. } | OutboundCall::Push { messages, .. } => {
                    messages
                }
                _ => Vec::new(),
            })
            .filter_map(|message| message.as_text().map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl MessagingApi for FakeMessagingApi {
    async fn get_profile(&self, user_id: &LineUserId) -> Result<Profile, LineApiError> {
        let (result, delay) = {
            let mut state = self.state.lock().await;
            state.calls.push(OutboundCall::GetProfile { user_id: user_id.to_string() });
            let result = state.profile_results.pop_front().unwrap_or_else(|| {
                Ok(Profile { user_id: user_id.clone(), display_name: "Taro".to_string() })
            });
            (result, state.profile_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn reply(&self, token: ReplyToken, messages: Vec<Message>) -> Result<(), LineApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(OutboundCall::Reply { token: token.as_str().to_owned(), messages });
        state.reply_results.pop_front().unwrap_or(Ok(()))
    }

    async fn push(&self, to: &LineUserId, messages: Vec<Message>) -> Result<(), LineApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(OutboundCall::Push { to: to.to_string(), messages });
        Ok(())
    }

    async fn create_rich_menu(&self, _menu: &RichMenu) -> Result<String, LineApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(OutboundCall::CreateRichMenu);
        if state.fail_menu_calls {
            return Err(unavailable("POST /v2/bot/richmenu"));
        }
        state.menus_created += 1;
        Ok(format!("richmenu-{}", state.menus_created))
    }

    async fn upload_rich_menu_image(
        &self,
        rich_menu_id: &str,
        _image: &RichMenuImage,
    ) -> Result<(), LineApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(OutboundCall::UploadImage { rich_menu_id: rich_menu_id.to_owned() });
        if state.fail_uploads {
            return Err(unavailable("POST /v2/bot/richmenu/{id}/content"));
        }
        Ok(())
    }

    async fn link_rich_menu(
        &self,
        user_id: &LineUserId,
        rich_menu_id: &str,
    ) -> Result<(), LineApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(OutboundCall::LinkRichMenu {
            user_id: user_id.to_string(),
            rich_menu_id: rich_menu_id.to_owned(),
        });
        if state.fail_menu_calls {
            return Err(unavailable("POST /v2/bot/user/{id}/richmenu/{id}"));
        }
        Ok(())
    }
}
