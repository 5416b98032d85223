pub mod registration;

pub use registration::{
    FlowTransitionError, RegistrationAction, RegistrationEvent, RegistrationFlow,
    RegistrationState, TransitionOutcome,
};
