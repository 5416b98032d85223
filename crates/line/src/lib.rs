//! LINE Messaging API integration for shiftbot
//!
//! This crate turns webhook deliveries into registration and shift-preference
//! effects:
//! - **Signature** (`signature`) - `x-line-signature` HMAC check over the raw body
//! - **Events** (`events`) - typed webhook payload with move-only reply tokens
//! - **Client** (`client`) - outbound Messaging API calls over `reqwest`
//! - **Messages** (`messages`) - text and Flex message builders
//! - **Workflow** (`workflow`) - store-code onboarding and preference submission
//! - **Router** (`router`) - per-event dispatch of a webhook batch
//!
//! # Architecture
//!
//! ```text
//! POST /webhook → verify_signature → parse_webhook → EventRouter::process_batch
//!                                                      ↓ (one task per event)
//!                                   Responder ← RegistrationWorkflow → Repositories
//!                                                      ↓
//!                                               MenuProvisioner
//! ```
//!
//! # Key Types
//!
//! - `EventRouter` - fans a batch out to tasks and matches every event kind
//! - `Responder` - spends the reply token once, then falls back to push
//! - `ProfileFetcher` - bounded retries with a placeholder display name
//! - `MessagingApi` - trait seam over the Messaging API for tests

pub mod client;
pub mod commands;
pub mod events;
pub mod menu;
pub mod messages;
pub mod profile;
pub mod reply;
pub mod router;
pub mod signature;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use client::{LineApiError, LineMessagingClient, MessagingApi};
pub use events::{parse_webhook, InboundEvent, ReplyToken, WebhookPayload};
pub use menu::{MenuOutcome, MenuProvisioner, RichMenuImage};
pub use profile::{ProfileFetcher, ProfileUnavailable, RetryPolicy};
pub use reply::{Delivery, Responder};
pub use router::{BatchReport, EventRouter};
pub use signature::{sign_body, verify_signature, SIGNATURE_HEADER};
pub use workflow::{RegistrationWorkflow, WorkflowError};
