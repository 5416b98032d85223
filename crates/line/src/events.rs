use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use shiftbot_core::domain::profile::LineUserId;

/// Single-use handle for the reply API. Deliberately not `Clone`: spending it
/// moves it, so a second reply with the same token does not compile.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ReplyToken(String);

impl ReplyToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug)]
pub struct ParsedBatch {
    pub destination: Option<String>,
    pub events: Vec<InboundEvent>,
    pub rejected: Vec<RejectedEvent>,
}

#[derive(Debug)]
pub struct RejectedEvent {
    pub index: usize,
    pub event_type: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("event `{event_type}` is malformed: {source}")]
    Malformed { event_type: String, source: serde_json::Error },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub webhook_event_id: String,
    #[serde(default)]
    pub delivery_context: DeliveryContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub reply_token: Option<ReplyToken>,
}

#[derive(Debug, Deserialize)]
pub struct UnfollowEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub reply_token: Option<ReplyToken>,
    pub message: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// Text body, only for `text` messages.
    pub fn text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostbackEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub reply_token: Option<ReplyToken>,
    pub postback: PostbackContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PostbackContent {
    pub data: String,
    /// Picker results, e.g. `{"date": "2026-02-10"}` from a datetime picker.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug)]
pub enum InboundEvent {
    Follow(FollowEvent),
    Unfollow(UnfollowEvent),
    Message(MessageEvent),
    Postback(PostbackEvent),
    Unsupported { event_type: String, meta: EventMeta },
}

impl InboundEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::Follow(_) => "follow",
            Self::Unfollow(_) => "unfollow",
            Self::Message(_) => "message",
            Self::Postback(_) => "postback",
            Self::Unsupported { event_type, .. } => event_type,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::Follow(event) => &event.meta,
            Self::Unfollow(event) => &event.meta,
            Self::Message(event) => &event.meta,
            Self::Postback(event) => &event.meta,
            Self::Unsupported { meta, .. } => meta,
        }
    }

    pub fn user_id(&self) -> Option<LineUserId> {
        self.meta().source.user_id.clone().map(LineUserId)
    }

    /// `webhookEventId`, or a placeholder for hand-written payloads.
    pub fn correlation_id(&self) -> String {
        let id = &self.meta().webhook_event_id;
        if id.is_empty() {
            "unknown-correlation-id".to_owned()
        } else {
            id.clone()
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.meta().delivery_context.is_redelivery
    }

    /// Moves the reply token out. Later calls return `None`.
    pub fn take_reply_token(&mut self) -> Option<ReplyToken> {
        match self {
            Self::Follow(event) => event.reply_token.take(),
            Self::Message(event) => event.reply_token.take(),
            Self::Postback(event) => event.reply_token.take(),
            Self::Unfollow(_) | Self::Unsupported { .. } => None,
        }
    }
}

pub fn decode_event(value: Value) -> Result<InboundEvent, EventDecodeError> {
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
    let malformed = |source| EventDecodeError::Malformed { event_type: event_type.clone(), source };

    match event_type.as_str() {
        "follow" => serde_json::from_value(value).map(InboundEvent::Follow).map_err(malformed),
        "unfollow" => serde_json::from_value(value).map(InboundEvent::Unfollow).map_err(malformed),
        "message" => serde_json::from_value(value).map(InboundEvent::Message).map_err(malformed),
        "postback" => serde_json::from_value(value).map(InboundEvent::Postback).map_err(malformed),
        _ => {
            let meta = serde_json::from_value::<EventMeta>(value).unwrap_or_default();
            Ok(InboundEvent::Unsupported { event_type, meta })
        }
    }
}

/// Decodes a webhook body. Only a body that is not a JSON object fails as a
/// whole; individual malformed events are collected in `rejected`.
pub fn parse_webhook(raw_body: &[u8]) -> Result<ParsedBatch, serde_json::Error> {
    let payload: WebhookPayload = serde_json::from_slice(raw_body)?;
    let mut events = Vec::with_capacity(payload.events.len());
    let mut rejected = Vec::new();

    for (index, value) in payload.events.into_iter().enumerate() {
        match decode_event(value) {
            Ok(event) => events.push(event),
            Err(EventDecodeError::Malformed { event_type, source }) => {
                rejected.push(RejectedEvent { index, event_type, reason: source.to_string() });
            }
        }
    }

    Ok(ParsedBatch { destination: payload.destination, events, rejected })
}
