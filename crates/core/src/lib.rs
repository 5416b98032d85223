pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::preference::{PreferenceStatus, ShiftDate, ShiftPreference};
pub use domain::profile::{LineUserId, Profile, ProfileRecord};
pub use domain::store::{MembershipRole, Store, StoreCode, StoreId, StoreMembership};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{RegistrationAction, RegistrationEvent, RegistrationFlow, RegistrationState};
