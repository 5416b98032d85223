use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use shiftbot_core::domain::profile::LineUserId;
use shiftbot_core::domain::store::StoreCode;
use shiftbot_core::errors::ApplicationError;

use crate::client::MessagingApi;
use crate::commands::{classify_text, parse_postback, PostbackCommand, TextCommand};
use crate::events::InboundEvent;
use crate::messages;
use crate::reply::Responder;
use crate::workflow::{RegistrationWorkflow, WorkflowError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    /// Event kinds or sources with nothing to do.
    Ignored,
    /// Malformed postbacks, dropped without a reply.
    Discarded,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub ignored: usize,
    pub discarded: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl BatchReport {
    fn record(&mut self, result: HandlerResult) {
        match result {
            HandlerResult::Processed => self.processed += 1,
            HandlerResult::Ignored => self.ignored += 1,
            HandlerResult::Discarded => self.discarded += 1,
            HandlerResult::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.ignored + self.discarded + self.failed + self.panicked
    }
}

enum Route {
    Follow,
    Unfollow,
    StoreCode { input: String, code: StoreCode },
    ShiftMenu,
    Help,
    Postback(PostbackCommand),
    Discard(String),
    Ignore,
}

impl Route {
    fn classify(event: &InboundEvent) -> Self {
        match event {
            InboundEvent::Follow(_) => Self::Follow,
            InboundEvent::Unfollow(_) => Self::Unfollow,
            InboundEvent::Message(message) => match message.message.text() {
                Some(text) => match classify_text(text) {
                    TextCommand::StoreCode { input, code } => Self::StoreCode { input, code },
                    TextCommand::ShiftMenu => Self::ShiftMenu,
                    TextCommand::Help => Self::Help,
                },
                None => Self::Help,
            },
            InboundEvent::Postback(postback) => {
                match parse_postback(&postback.postback.data, &postback.postback.params) {
                    Ok(command) => Self::Postback(command),
                    Err(error) => Self::Discard(error.to_string()),
                }
            }
            InboundEvent::Unsupported { .. } => Self::Ignore,
        }
    }

    fn replies(&self) -> bool {
        !matches!(self, Self::Unfollow | Self::Discard(_) | Self::Ignore)
    }
}

/// Fans a webhook batch out to one task per event.
pub struct EventRouter {
    api: Arc<dyn MessagingApi>,
    workflow: Arc<RegistrationWorkflow>,
    immediate_ack: bool,
}

impl EventRouter {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        workflow: Arc<RegistrationWorkflow>,
        immediate_ack: bool,
    ) -> Self {
        Self { api, workflow, immediate_ack }
    }

    /// Events run concurrently; effects of one event stay ordered inside its task.
    pub async fn process_batch(self: &Arc<Self>, events: Vec<InboundEvent>) -> BatchReport {
        let mut tasks = JoinSet::new();
        for event in events {
            let router = Arc::clone(self);
            tasks.spawn(async move { router.process_event(event).await });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.record(result),
                Err(join_error) => {
                    error!(error = %join_error, "event task aborted");
                    report.panicked += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            ignored = report.ignored,
            discarded = report.discarded,
            failed = report.failed,
            panicked = report.panicked,
            "webhook batch finished"
        );
        report
    }

    pub async fn process_event(&self, mut event: InboundEvent) -> HandlerResult {
        let correlation_id = event.correlation_id();
        let user_id = event.user_id();
        let span = info_span!(
            "line_event",
            event_name = %event.event_type(),
            correlation_id = %correlation_id,
            user_id = user_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            redelivery = event.is_redelivery(),
        );

        async move {
            let route = Route::classify(&event);
            let mut responder = Responder::for_event(self.api.clone(), &mut event);

            let Some(user_id) = user_id else {
                debug!("event has no user source");
                return HandlerResult::Ignored;
            };

            if self.immediate_ack && route.replies() && responder.has_reply_token() {
                responder.send_one(messages::processing_ack()).await;
            }

            let outcome = match route {
                Route::Follow => self.workflow.on_follow(&mut responder, &user_id).await,
                Route::Unfollow => {
                    info!("user unfollowed; records are kept");
                    return HandlerResult::Processed;
                }
                Route::StoreCode { input, code } => {
                    self.workflow.on_store_code(&mut responder, &user_id, &input, &code).await
                }
                Route::ShiftMenu => self.workflow.show_shift_menu(&mut responder, &user_id).await,
                Route::Help => {
                    self.workflow.help(&mut responder).await;
                    Ok(())
                }
                Route::Postback(command) => {
                    self.handle_postback(&mut responder, &user_id, command).await
                }
                Route::Discard(reason) => {
                    debug!(%reason, "postback discarded");
                    return HandlerResult::Discarded;
                }
                Route::Ignore => {
                    debug!("unsupported event ignored");
                    return HandlerResult::Ignored;
                }
            };

            match outcome {
                Ok(()) => HandlerResult::Processed,
                Err(error) => {
                    log_failure(error);
                    HandlerResult::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_postback(
        &self,
        responder: &mut Responder,
        user_id: &LineUserId,
        command: PostbackCommand,
    ) -> Result<(), WorkflowError> {
        match command {
            PostbackCommand::SubmitPreference(submission) => {
                self.workflow.submit_preference(responder, user_id, submission).await
            }
            PostbackCommand::SubmitAll => self.workflow.submit_all(responder, user_id).await,
            PostbackCommand::ChangeStore => self.workflow.change_store(responder, user_id).await,
            PostbackCommand::ViewPreferences => {
                self.workflow.view_preferences(responder, user_id).await
            }
            PostbackCommand::SwitchStore { store_id } => {
                self.workflow.switch_store(responder, user_id, store_id).await
            }
        }
    }
}

fn log_failure(error: WorkflowError) {
    let detail = error.to_string();
    let classified = ApplicationError::from(error);
    if classified.is_user_facing() {
        warn!(error = %detail, kind = %classified, "event handling failed; user was told");
    } else {
        error!(error = %detail, kind = %classified, "event handling failed");
    }
}
