use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use shiftbot_core::config::DEFAULT_FALLBACK_DISPLAY_NAME;
use shiftbot_core::domain::preference::{ShiftDate, ShiftPreference};
use shiftbot_core::domain::profile::{LineUserId, Profile};
use shiftbot_core::domain::store::{Store, StoreCode, StoreId, StoreMembership};
use shiftbot_core::errors::ApplicationError;
use shiftbot_core::flows::{
    FlowTransitionError, RegistrationAction, RegistrationEvent, RegistrationFlow,
    RegistrationState,
};
use shiftbot_db::repositories::{bounded, Repositories, RepositoryError};

use crate::commands::PreferenceSubmission;
use crate::menu::MenuProvisioner;
use crate::messages::{self, Message};
use crate::profile::ProfileFetcher;
use crate::reply::Responder;

/// Preferences listed by `view_preferences`.
pub const PREFERENCE_LIST_LIMIT: u32 = 10;
const JST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error("{action:?} ran without {missing}")]
    MissingContext { action: RegistrationAction, missing: &'static str },
}

impl From<WorkflowError> for ApplicationError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::Persistence { source: RepositoryError::Unavailable(message), .. } => {
                Self::UpstreamUnavailable(message)
            }
            WorkflowError::Persistence { operation, source } => {
                Self::Persistence(format!("{operation}: {source}"))
            }
            WorkflowError::Flow(error) => Self::Domain(error.into()),
            other => Self::MalformedEvent(other.to_string()),
        }
    }
}

fn persistence(operation: &'static str) -> impl FnOnce(RepositoryError) -> WorkflowError {
    move |source| WorkflowError::Persistence { operation, source }
}

/// Registration state as read back from the datastore.
struct Snapshot {
    state: RegistrationState,
    store: Option<Store>,
}

impl Snapshot {
    fn unknown() -> Self {
        Self { state: RegistrationState::Unregistered, store: None }
    }
}

/// Working set for one run of flow actions.
struct Step<'a> {
    user_id: &'a LineUserId,
    from: RegistrationState,
    event: RegistrationEvent,
    profile: Option<Profile>,
    store: Option<Store>,
    code_input: Option<String>,
    submission: Option<PreferenceSubmission>,
    outbox: Vec<Message>,
}

impl<'a> Step<'a> {
    fn new(user_id: &'a LineUserId, from: RegistrationState, event: RegistrationEvent) -> Self {
        Self {
            user_id,
            from,
            event,
            profile: None,
            store: None,
            code_input: None,
            submission: None,
            outbox: Vec::new(),
        }
    }

    fn store(&self, action: &RegistrationAction) -> Result<&Store, WorkflowError> {
        self.store
            .as_ref()
            .ok_or(WorkflowError::MissingContext { action: action.clone(), missing: "store" })
    }
}

/// Executes onboarding and preference operations. Decisions come from
/// [`RegistrationFlow`]; this type performs the resulting actions in order.
pub struct RegistrationWorkflow {
    repositories: Repositories,
    profiles: ProfileFetcher,
    menu: MenuProvisioner,
    flow: RegistrationFlow,
    datastore_timeout: Duration,
    today: fn() -> NaiveDate,
}

pub fn today_in_japan() -> NaiveDate {
    match FixedOffset::east_opt(JST_OFFSET_SECS) {
        Some(offset) => Utc::now().with_timezone(&offset).date_naive(),
        None => Utc::now().date_naive(),
    }
}

impl RegistrationWorkflow {
    pub fn new(
        repositories: Repositories,
        profiles: ProfileFetcher,
        menu: MenuProvisioner,
        datastore_timeout: Duration,
    ) -> Self {
        Self {
            repositories,
            profiles,
            menu,
            flow: RegistrationFlow,
            datastore_timeout,
            today: today_in_japan,
        }
    }

    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Greets a new follower. Only the flow itself can fail this; datastore
    /// trouble is logged and the greeting still goes out.
    pub async fn on_follow(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let snapshot = match self.snapshot(user_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "could not read registration state");
                Snapshot::unknown()
            }
        };

        let mut step = Step::new(user_id, snapshot.state, RegistrationEvent::Followed);
        step.store = snapshot.store;
        self.drive(responder, step).await
    }

    pub async fn on_store_code(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
        input: &str,
        code: &StoreCode,
    ) -> Result<(), WorkflowError> {
        let lookup = async {
            let store = self
                .bounded(self.repositories.stores.find_by_code(code))
                .await
                .map_err(persistence("store lookup"))?;
            let snapshot = self.snapshot(user_id).await?;
            Ok::<_, WorkflowError>((store, snapshot))
        };
        let (store, snapshot) = match lookup.await {
            Ok(found) => found,
            Err(error) => {
                responder.send_one(messages::registration_failed()).await;
                return Err(error);
            }
        };

        let event = match store.as_ref() {
            Some(store) => {
                info!(user_id = %user_id, store_id = %store.id, code = %code, "store code matched");
                RegistrationEvent::StoreCodeMatched { store_id: store.id.clone() }
            }
            None => {
                info!(user_id = %user_id, code = %code, "store code not found");
                RegistrationEvent::StoreCodeNotFound
            }
        };

        let mut step = Step::new(user_id, snapshot.state, event);
        step.store = store;
        step.code_input = Some(input.to_owned());
        self.drive(responder, step).await
    }

    pub async fn show_shift_menu(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let snapshot = self.snapshot_or_apologize(responder, user_id).await?;
        let message = match snapshot.store.as_ref() {
            Some(store) => messages::shift_menu(&store.name, (self.today)()),
            None => messages::store_code_prompt(),
        };
        responder.send_one(message).await;
        Ok(())
    }

    pub async fn help(&self, responder: &mut Responder) {
        responder.send_one(messages::help()).await;
    }

    /// The store comes from the user's memberships, never from the payload.
    pub async fn submit_preference(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
        submission: PreferenceSubmission,
    ) -> Result<(), WorkflowError> {
        let snapshot = self.snapshot_or_apologize(responder, user_id).await?;
        let mut step = Step::new(user_id, snapshot.state, RegistrationEvent::PreferenceSubmitted);
        step.store = snapshot.store;
        step.submission = Some(submission);
        self.drive(responder, step).await
    }

    pub async fn submit_all(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let snapshot = self.snapshot_or_apologize(responder, user_id).await?;
        let message = match snapshot.store {
            Some(store) => {
                info!(user_id = %user_id, store_id = %store.id, "preferences marked as submitted");
                messages::submission_complete()
            }
            None => messages::store_code_prompt(),
        };
        responder.send_one(message).await;
        Ok(())
    }

    pub async fn change_store(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let snapshot = self.snapshot_or_apologize(responder, user_id).await?;
        let step = Step::new(user_id, snapshot.state, RegistrationEvent::ChangeStoreRequested);
        self.drive(responder, step).await
    }

    pub async fn view_preferences(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let snapshot = self.snapshot_or_apologize(responder, user_id).await?;
        let Some(store) = snapshot.store else {
            responder.send_one(messages::store_code_prompt()).await;
            return Ok(());
        };

        let from = ShiftDate((self.today)());
        let listed = self
            .bounded(self.repositories.preferences.list_upcoming(
                user_id,
                &store.id,
                from,
                PREFERENCE_LIST_LIMIT,
            ))
            .await
            .map_err(persistence("preference listing"));
        match listed {
            Ok(preferences) => {
                responder.send_one(messages::preference_list(&store.name, &preferences)).await;
                Ok(())
            }
            Err(error) => {
                responder.send_one(messages::save_failed()).await;
                Err(error)
            }
        }
    }

    /// Without a target, replies with a picker of the user's stores.
    pub async fn switch_store(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
        store_id: Option<StoreId>,
    ) -> Result<(), WorkflowError> {
        let Some(store_id) = store_id else {
            return self.offer_store_picker(responder, user_id).await;
        };

        let target = async {
            let membership = self
                .bounded(self.repositories.memberships.find(user_id, &store_id))
                .await
                .map_err(persistence("membership lookup"))?;
            let store = match membership {
                Some(_) => self
                    .bounded(self.repositories.stores.find_by_id(&store_id))
                    .await
                    .map_err(persistence("store lookup"))?,
                None => None,
            };
            let snapshot = self.snapshot(user_id).await?;
            Ok::<_, WorkflowError>((store, snapshot))
        };
        let (store, snapshot) = match target.await {
            Ok(found) => found,
            Err(error) => {
                responder.send_one(messages::save_failed()).await;
                return Err(error);
            }
        };

        let Some(store) = store else {
            info!(user_id = %user_id, store_id = %store_id, "switch to a store without membership");
            responder.send_one(messages::not_a_member()).await;
            return Ok(());
        };

        let mut step = Step::new(
            user_id,
            snapshot.state,
            RegistrationEvent::StoreSwitched { store_id: store.id.clone() },
        );
        step.store = Some(store);
        self.drive(responder, step).await
    }

    async fn offer_store_picker(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<(), WorkflowError> {
        let stores = async {
            let memberships = self
                .bounded(self.repositories.memberships.list_for_user(user_id))
                .await
                .map_err(persistence("membership listing"))?;
            let mut stores = Vec::with_capacity(memberships.len());
            for membership in memberships {
                if let Some(store) = self
                    .bounded(self.repositories.stores.find_by_id(&membership.store_id))
                    .await
                    .map_err(persistence("store lookup"))?
                {
                    stores.push(store);
                }
            }
            Ok::<_, WorkflowError>(stores)
        };

        match stores.await {
            Ok(stores) if stores.is_empty() => {
                responder.send_one(messages::store_code_prompt()).await;
                Ok(())
            }
            Ok(stores) => {
                responder.send_one(messages::store_picker(&stores)).await;
                Ok(())
            }
            Err(error) => {
                responder.send_one(messages::save_failed()).await;
                Err(error)
            }
        }
    }

    /// Applies the step's event, runs the resulting actions and sends whatever
    /// replies they queued, including failure replies.
    async fn drive(&self, responder: &mut Responder, mut step: Step<'_>) -> Result<(), WorkflowError> {
        let outcome = self.flow.apply(&step.from, &step.event)?;
        info!(
            correlation_id = %responder.correlation_id(),
            user_id = %step.user_id,
            from = ?outcome.from,
            to = ?outcome.to,
            "registration transition"
        );

        let result = self.run(responder, &mut step, outcome.actions).await;
        Self::flush(responder, &mut step).await;
        result
    }

    async fn run(
        &self,
        responder: &mut Responder,
        step: &mut Step<'_>,
        actions: Vec<RegistrationAction>,
    ) -> Result<(), WorkflowError> {
        use RegistrationAction::*;

        let mut queue: VecDeque<RegistrationAction> = actions.into();
        let mut failure = None;

        while let Some(action) = queue.pop_front() {
            match action {
                FetchProfile => {
                    step.profile = Some(self.profiles.fetch_profile_or_fallback(step.user_id).await);
                }
                UpsertProfile => {
                    let name = step.profile.as_ref().map(Profile::persisted_name);
                    if let Err(error) = self
                        .bounded(self.repositories.profiles.upsert(step.user_id, name.as_deref()))
                        .await
                    {
                        warn!(user_id = %step.user_id, error = %error, "profile upsert failed");
                    }
                }
                SendOnboardingPrompt => {
                    let name = step
                        .profile
                        .as_ref()
                        .map(Profile::persisted_name)
                        .unwrap_or_else(|| DEFAULT_FALLBACK_DISPLAY_NAME.to_owned());
                    step.outbox.push(messages::onboarding(&name));
                }
                ProvisionRichMenu => {
                    // Replies go out before the slower menu calls.
                    Self::flush(responder, step).await;
                    self.menu.provision_for(step.user_id).await;
                }
                ReplyStoreCodeNotFound => {
                    let input = step.code_input.as_deref().unwrap_or_default();
                    step.outbox.push(messages::store_code_not_found(input));
                }
                UpsertMembership => {
                    let store = step.store(&action)?;
                    let membership =
                        StoreMembership::staff(step.user_id.clone(), store.id.clone(), Utc::now());
                    if let Err(error) =
                        self.bounded(self.repositories.memberships.upsert(&membership)).await
                    {
                        warn!(
                            user_id = %step.user_id,
                            store_id = %store.id,
                            error = %error,
                            "membership upsert failed"
                        );
                        let rejected =
                            self.flow.apply(&step.from, &RegistrationEvent::MembershipRejected)?;
                        queue = rejected.actions.into();
                        failure = Some(persistence("membership upsert")(error));
                    }
                }
                SetActiveStore => {
                    let store_id = step.store(&action)?.id.clone();
                    let result = self
                        .bounded(self.repositories.active_stores.set(step.user_id, &store_id))
                        .await;
                    match (result, &step.event) {
                        (Ok(()), _) => {}
                        (Err(error), RegistrationEvent::StoreSwitched { .. }) => {
                            step.outbox.push(messages::save_failed());
                            return Err(persistence("active store update")(error));
                        }
                        // Falls back to the most recent membership on the next read.
                        (Err(error), _) => {
                            warn!(user_id = %step.user_id, error = %error, "active store update failed");
                        }
                    }
                }
                SendRegistrationConfirmation => {
                    step.outbox.extend(messages::registration_complete());
                }
                SendShiftMenu => {
                    let menu = messages::shift_menu(&step.store(&action)?.name, (self.today)());
                    step.outbox.push(menu);
                }
                ReplyRegistrationFailed => step.outbox.push(messages::registration_failed()),
                UpsertPreference => {
                    let store_id = step.store(&action)?.id.clone();
                    let submission = step.submission.clone().ok_or(
                        WorkflowError::MissingContext { action: action.clone(), missing: "submission" },
                    )?;
                    let now = Utc::now();
                    let preference = ShiftPreference {
                        user_id: step.user_id.clone(),
                        store_id: store_id.clone(),
                        shift_date: submission.date,
                        status: submission.status,
                        time_slot: submission.time_slot,
                        note: submission.note,
                        submitted_at: now,
                        updated_at: now,
                    };

                    match self.bounded(self.repositories.preferences.upsert(&preference)).await {
                        Ok(()) => {
                            info!(
                                user_id = %step.user_id,
                                store_id = %store_id,
                                shift_date = %preference.shift_date,
                                status = preference.status.as_str(),
                                "preference saved"
                            );
                            step.outbox
                                .push(messages::preference_saved(preference.shift_date, preference.status));
                        }
                        Err(error) => {
                            step.outbox.push(messages::save_failed());
                            return Err(persistence("preference upsert")(error));
                        }
                    }
                }
                PromptForStoreCode => {
                    let prompt = match step.event {
                        RegistrationEvent::ChangeStoreRequested => messages::change_store_prompt(),
                        _ => messages::store_code_prompt(),
                    };
                    step.outbox.push(prompt);
                }
                ConfirmStoreSwitch => {
                    let confirmation = messages::store_switched(&step.store(&action)?.name);
                    step.outbox.push(confirmation);
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn flush(responder: &mut Responder, step: &mut Step<'_>) {
        if !step.outbox.is_empty() {
            responder.send(std::mem::take(&mut step.outbox)).await;
        }
    }

    async fn snapshot_or_apologize(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
    ) -> Result<Snapshot, WorkflowError> {
        match self.snapshot(user_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => {
                responder.send_one(messages::save_failed()).await;
                Err(error)
            }
        }
    }

    async fn snapshot(&self, user_id: &LineUserId) -> Result<Snapshot, WorkflowError> {
        let profile_known = self
            .bounded(self.repositories.profiles.find(user_id))
            .await
            .map_err(persistence("profile lookup"))?
            .is_some();
        let store = self.acting_store(user_id).await?;
        let state = RegistrationState::derive(profile_known, store.as_ref().map(|s| s.id.clone()));
        Ok(Snapshot { state, store })
    }

    /// The active store while its membership lasts, else the most recently
    /// touched membership.
    async fn acting_store(&self, user_id: &LineUserId) -> Result<Option<Store>, WorkflowError> {
        let memberships = self
            .bounded(self.repositories.memberships.list_for_user(user_id))
            .await
            .map_err(persistence("membership listing"))?;
        let Some(latest) = memberships.first() else {
            return Ok(None);
        };

        let active = self
            .bounded(self.repositories.active_stores.get(user_id))
            .await
            .map_err(persistence("active store lookup"))?;
        let store_id = active
            .filter(|active| memberships.iter().any(|membership| &membership.store_id == active))
            .unwrap_or_else(|| latest.store_id.clone());

        self.bounded(self.repositories.stores.find_by_id(&store_id))
            .await
            .map_err(persistence("store lookup"))
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        bounded(self.datastore_timeout, operation).await
    }
}
