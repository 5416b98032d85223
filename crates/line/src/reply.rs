use std::sync::Arc;

use tracing::{debug, warn};

use shiftbot_core::domain::profile::LineUserId;

use crate::client::MessagingApi;
use crate::events::{InboundEvent, ReplyToken};
use crate::messages::{Message, MAX_MESSAGES_PER_CALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Reply,
    Push,
    Dropped,
}

/// Outbound channel for one event. The reply token is spent by the first
/// send; everything after goes out as push messages to the user.
pub struct Responder {
    api: Arc<dyn MessagingApi>,
    user_id: Option<LineUserId>,
    reply_token: Option<ReplyToken>,
    redelivery: bool,
    /// Set once a redelivered event's reply fails; later sends are dropped.
    suppressed: bool,
    correlation_id: String,
}

impl Responder {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        user_id: Option<LineUserId>,
        reply_token: Option<ReplyToken>,
        redelivery: bool,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            user_id,
            reply_token,
            redelivery,
            suppressed: false,
            correlation_id: correlation_id.into(),
        }
    }

    /// Takes the event's reply token.
    pub fn for_event(api: Arc<dyn MessagingApi>, event: &mut InboundEvent) -> Self {
        let reply_token = event.take_reply_token();
        Self::new(api, event.user_id(), reply_token, event.is_redelivery(), event.correlation_id())
    }

    pub fn has_reply_token(&self) -> bool {
        self.reply_token.is_some()
    }

    pub fn user_id(&self) -> Option<&LineUserId> {
        self.user_id.as_ref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Sends in chunks of five. Returns how the first chunk went out.
    pub async fn send(&mut self, messages: Vec<Message>) -> Delivery {
        let mut first = None;
        let mut remaining = messages;

        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(MAX_MESSAGES_PER_CALL));
            let delivery = self.send_chunk(remaining).await;
            first.get_or_insert(delivery);
            if delivery == Delivery::Dropped && self.redelivery {
                break;
            }
            remaining = rest;
        }

        first.unwrap_or(Delivery::Dropped)
    }

    pub async fn send_one(&mut self, message: Message) -> Delivery {
        self.send(vec![message]).await
    }

    async fn send_chunk(&mut self, chunk: Vec<Message>) -> Delivery {
        if self.suppressed {
            debug!(correlation_id = %self.correlation_id, "redelivered event already failed; dropped");
            return Delivery::Dropped;
        }

        let Some(token) = self.reply_token.take() else {
            return self.push(chunk).await;
        };

        // Replies take ownership, so keep a copy for the push fallback.
        let fallback = (!self.redelivery).then(|| chunk.clone());
        match self.api.reply(token, chunk).await {
            Ok(()) => {
                debug!(correlation_id = %self.correlation_id, "reply sent");
                Delivery::Reply
            }
            Err(error) => match fallback {
                Some(chunk) => {
                    warn!(
                        correlation_id = %self.correlation_id,
                        error = %error,
                        "reply failed; falling back to push"
                    );
                    self.push(chunk).await
                }
                None => {
                    self.suppressed = true;
                    warn!(
                        correlation_id = %self.correlation_id,
                        error = %error,
                        "reply failed on a redelivered event; not pushing"
                    );
                    Delivery::Dropped
                }
            },
        }
    }

    async fn push(&self, chunk: Vec<Message>) -> Delivery {
        let Some(user_id) = self.user_id.as_ref() else {
            warn!(correlation_id = %self.correlation_id, "no user id to push to; message dropped");
            return Delivery::Dropped;
        };

        match self.api.push(user_id, chunk).await {
            Ok(()) => Delivery::Push,
            Err(error) => {
                warn!(
                    correlation_id = %self.correlation_id,
                    user_id = %user_id,
                    error = %error,
                    "push failed; message dropped"
                );
                Delivery::Dropped
            }
        }
    }
}
