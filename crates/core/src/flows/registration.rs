use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::store::StoreId;

/// Where a chat user stands in onboarding. Derived from persisted records,
/// never kept in process memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    Unregistered,
    AwaitingStoreCode,
    Registered(StoreId),
}

impl RegistrationState {
    pub fn derive(profile_known: bool, acting_store: Option<StoreId>) -> Self {
        match (profile_known, acting_store) {
            (_, Some(store_id)) => Self::Registered(store_id),
            (true, None) => Self::AwaitingStoreCode,
            (false, None) => Self::Unregistered,
        }
    }

    pub fn acting_store(&self) -> Option<&StoreId> {
        match self {
            Self::Registered(store_id) => Some(store_id),
            Self::Unregistered | Self::AwaitingStoreCode => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationEvent {
    Followed,
    Unfollowed,
    StoreCodeMatched { store_id: StoreId },
    StoreCodeNotFound,
    MembershipRejected,
    PreferenceSubmitted,
    ChangeStoreRequested,
    StoreSwitched { store_id: StoreId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationAction {
    FetchProfile,
    UpsertProfile,
    SendOnboardingPrompt,
    ProvisionRichMenu,
    ReplyStoreCodeNotFound,
    UpsertMembership,
    SetActiveStore,
    SendRegistrationConfirmation,
    SendShiftMenu,
    ReplyRegistrationFailed,
    UpsertPreference,
    PromptForStoreCode,
    ConfirmStoreSwitch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RegistrationState,
    pub to: RegistrationState,
    pub event: RegistrationEvent,
    pub actions: Vec<RegistrationAction>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RegistrationState, event: RegistrationEvent },
}

/// Pure transition table for onboarding. Callers execute the returned
/// actions in order and stop at the first failing persistence step.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationFlow;

impl RegistrationFlow {
    pub fn initial_state(&self) -> RegistrationState {
        RegistrationState::Unregistered
    }

    pub fn apply(
        &self,
        current: &RegistrationState,
        event: &RegistrationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use RegistrationAction::{
            ConfirmStoreSwitch, FetchProfile, PromptForStoreCode, ProvisionRichMenu,
            ReplyRegistrationFailed, ReplyStoreCodeNotFound, SendOnboardingPrompt,
            SendRegistrationConfirmation, SendShiftMenu, SetActiveStore, UpsertMembership,
            UpsertPreference, UpsertProfile,
        };
        use RegistrationEvent::{
            ChangeStoreRequested, Followed, MembershipRejected, PreferenceSubmitted,
            StoreCodeMatched, StoreCodeNotFound, StoreSwitched, Unfollowed,
        };
        use RegistrationState::{AwaitingStoreCode, Registered, Unregistered};

        let (to, actions) = match (current, event) {
            (Unregistered, Followed) | (AwaitingStoreCode, Followed) => (
                AwaitingStoreCode,
                vec![FetchProfile, UpsertProfile, SendOnboardingPrompt, ProvisionRichMenu],
            ),
            // A returning follower keeps their memberships; greet again anyway.
            (Registered(store_id), Followed) => (
                Registered(store_id.clone()),
                vec![FetchProfile, UpsertProfile, SendOnboardingPrompt, ProvisionRichMenu],
            ),
            (state, Unfollowed) => (state.clone(), Vec::new()),
            (_, StoreCodeMatched { store_id }) => (
                Registered(store_id.clone()),
                vec![
                    UpsertProfile,
                    UpsertMembership,
                    SetActiveStore,
                    SendRegistrationConfirmation,
                    SendShiftMenu,
                ],
            ),
            (state, StoreCodeNotFound) => (state.clone(), vec![ReplyStoreCodeNotFound]),
            (state, MembershipRejected) => (state.clone(), vec![ReplyRegistrationFailed]),
            (Registered(store_id), PreferenceSubmitted) => {
                (Registered(store_id.clone()), vec![UpsertPreference])
            }
            (Unregistered, PreferenceSubmitted) | (AwaitingStoreCode, PreferenceSubmitted) => {
                (AwaitingStoreCode, vec![PromptForStoreCode])
            }
            (state, ChangeStoreRequested) => (state.clone(), vec![PromptForStoreCode]),
            (Registered(_), StoreSwitched { store_id }) => {
                (Registered(store_id.clone()), vec![SetActiveStore, ConfirmStoreSwitch])
            }
            (Unregistered, StoreSwitched { .. }) | (AwaitingStoreCode, StoreSwitched { .. }) => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: current.clone(),
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::store::StoreId;
    use crate::flows::registration::{
        FlowTransitionError, RegistrationAction, RegistrationEvent, RegistrationFlow,
        RegistrationState,
    };

    #[test]
    fn follow_then_store_code_registers_the_user() {
        let flow = RegistrationFlow;
        let followed = flow
            .apply(&flow.initial_state(), &RegistrationEvent::Followed)
            .expect("unregistered -> awaiting store code");
        assert_eq!(followed.to, RegistrationState::AwaitingStoreCode);
        assert_eq!(
            followed.actions,
            vec![
                RegistrationAction::FetchProfile,
                RegistrationAction::UpsertProfile,
                RegistrationAction::SendOnboardingPrompt,
                RegistrationAction::ProvisionRichMenu,
            ]
        );

        let registered = flow
            .apply(
                &followed.to,
                &RegistrationEvent::StoreCodeMatched { store_id: StoreId::new("S1") },
            )
            .expect("awaiting -> registered");
        assert_eq!(registered.to, RegistrationState::Registered(StoreId::new("S1")));
    }

    #[test]
    fn profile_upsert_precedes_membership_upsert() {
        let outcome = RegistrationFlow
            .apply(
                &RegistrationState::AwaitingStoreCode,
                &RegistrationEvent::StoreCodeMatched { store_id: StoreId::new("S1") },
            )
            .expect("store code accepted");

        let position = |action: &RegistrationAction| {
            outcome.actions.iter().position(|candidate| candidate == action)
        };
        let profile = position(&RegistrationAction::UpsertProfile).expect("profile upsert");
        let membership = position(&RegistrationAction::UpsertMembership).expect("membership");
        assert!(profile < membership);
        assert_eq!(outcome.actions.last(), Some(&RegistrationAction::SendShiftMenu));
    }

    #[test]
    fn unknown_code_leaves_state_untouched() {
        let outcome = RegistrationFlow
            .apply(&RegistrationState::AwaitingStoreCode, &RegistrationEvent::StoreCodeNotFound)
            .expect("not-found is a valid event");
        assert_eq!(outcome.to, RegistrationState::AwaitingStoreCode);
        assert_eq!(outcome.actions, vec![RegistrationAction::ReplyStoreCodeNotFound]);
    }

    #[test]
    fn preference_without_membership_prompts_for_code() {
        let outcome = RegistrationFlow
            .apply(&RegistrationState::Unregistered, &RegistrationEvent::PreferenceSubmitted)
            .expect("valid transition");
        assert_eq!(outcome.actions, vec![RegistrationAction::PromptForStoreCode]);

        let registered = RegistrationState::Registered(StoreId::new("S1"));
        let outcome = RegistrationFlow
            .apply(&registered, &RegistrationEvent::PreferenceSubmitted)
            .expect("valid transition");
        assert_eq!(outcome.to, registered);
        assert_eq!(outcome.actions, vec![RegistrationAction::UpsertPreference]);
    }

    #[test]
    fn switching_store_requires_registration() {
        let error = RegistrationFlow
            .apply(
                &RegistrationState::AwaitingStoreCode,
                &RegistrationEvent::StoreSwitched { store_id: StoreId::new("S2") },
            )
            .expect_err("cannot switch before registering");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));

        let outcome = RegistrationFlow
            .apply(
                &RegistrationState::Registered(StoreId::new("S1")),
                &RegistrationEvent::StoreSwitched { store_id: StoreId::new("S2") },
            )
            .expect("registered users can switch");
        assert_eq!(outcome.to, RegistrationState::Registered(StoreId::new("S2")));
    }

    #[test]
    fn state_is_derived_from_persisted_facts() {
        assert_eq!(RegistrationState::derive(false, None), RegistrationState::Unregistered);
        assert_eq!(RegistrationState::derive(true, None), RegistrationState::AwaitingStoreCode);
        assert_eq!(
            RegistrationState::derive(true, Some(StoreId::new("S1"))).acting_store(),
            Some(&StoreId::new("S1"))
        );
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let events = [
            RegistrationEvent::Followed,
            RegistrationEvent::StoreCodeNotFound,
            RegistrationEvent::StoreCodeMatched { store_id: StoreId::new("S1") },
            RegistrationEvent::PreferenceSubmitted,
            RegistrationEvent::Unfollowed,
        ];

        let run = || {
            let mut state = RegistrationFlow.initial_state();
            let mut actions = Vec::new();
            for event in &events {
                let outcome = RegistrationFlow.apply(&state, event).expect("deterministic run");
                actions.push(outcome.actions);
                state = outcome.to;
            }
            (state, actions)
        };

        assert_eq!(run(), run());
    }
}
