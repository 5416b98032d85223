use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use shiftbot_core::errors::ApplicationError;
use shiftbot_line::{parse_webhook, verify_signature, EventRouter, SIGNATURE_HEADER};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Batches still running after their delivery was acknowledged.
#[derive(Clone, Default)]
pub struct InFlight {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl InFlight {
    async fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(work);
    }

    /// Waits up to `grace` for running batches, then aborts the rest.
    /// Returns how many were still running when the drain began. The lock
    /// is only held to swap the set out, so late deliveries can still be
    /// acknowledged; their batches are picked up by the next sweep.
    pub async fn drain(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut pending = None;

        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
            while tasks.try_join_next().is_some() {}
            let running = tasks.len();
            pending.get_or_insert(running);
            if running == 0 {
                break;
            }

            let finished = tokio::time::timeout_at(deadline, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if finished.is_err() {
                tasks.abort_all();
                let mut late = std::mem::take(&mut *self.tasks.lock().await);
                late.abort_all();
                warn!(
                    event_name = "webhook.drain_timeout",
                    aborted = running + late.len(),
                    "aborting unfinished batches"
                );
                break;
            }
        }

        pending.unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct WebhookState {
    channel_secret: SecretString,
    router: Arc<EventRouter>,
    in_flight: InFlight,
}

impl WebhookState {
    pub fn new(channel_secret: SecretString, router: Arc<EventRouter>, in_flight: InFlight) -> Self {
        Self { channel_secret, router, in_flight }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive))
        .route("/api/line/webhook", post(receive))
        .with_state(state)
}

/// Acknowledges a delivery once its signature checks out. Event work runs
/// after the response on a detached task.
pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let delivery_id = Uuid::new_v4().to_string();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    let verified = signature.is_some_and(|signature| {
        verify_signature(&body, signature, state.channel_secret.expose_secret())
    });

    if !verified {
        let error = ApplicationError::Authentication(match signature {
            Some(_) => "signature mismatch".to_owned(),
            None => "signature header missing".to_owned(),
        })
        .into_interface(delivery_id.as_str());
        warn!(
            event_name = "webhook.signature_rejected",
            delivery_id = %delivery_id,
            body_bytes = body.len(),
            error = %error,
            "rejected webhook delivery"
        );
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": error.user_message() })));
    }

    let batch = match parse_webhook(&body) {
        Ok(batch) => batch,
        Err(error) => {
            warn!(
                event_name = "webhook.body_unparseable",
                delivery_id = %delivery_id,
                error = %error,
                "signed webhook body is not a webhook payload; acknowledged anyway"
            );
            return accepted();
        }
    };

    for rejected in &batch.rejected {
        warn!(
            event_name = "webhook.event_rejected",
            delivery_id = %delivery_id,
            index = rejected.index,
            event_type = %rejected.event_type,
            reason = %rejected.reason,
            "skipping malformed event"
        );
    }

    if batch.events.is_empty() {
        debug!(event_name = "webhook.empty_batch", delivery_id = %delivery_id, "no events");
        return accepted();
    }

    info!(
        event_name = "webhook.accepted",
        delivery_id = %delivery_id,
        destination = batch.destination.as_deref().unwrap_or("-"),
        events = batch.events.len(),
        "webhook batch accepted"
    );
    let router = Arc::clone(&state.router);
    let span = info_span!("webhook_batch", delivery_id = %delivery_id);
    state
        .in_flight
        .spawn(
            async move {
                router.process_batch(batch.events).await;
            }
            .instrument(span),
        )
        .await;

    accepted()
}

fn accepted() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "OK" })))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use shiftbot_core::domain::profile::{LineUserId, Profile};
    use shiftbot_core::domain::store::{Store, StoreCode, StoreId};
    use shiftbot_db::repositories::{
        InMemoryDatastore, InMemoryTable, Repositories, StoreRepository,
    };
    use shiftbot_line::menu::{MenuProvisioner, RichMenu, RichMenuImage};
    use shiftbot_line::messages::Message;
    use shiftbot_line::{
        sign_body, EventRouter, LineApiError, MessagingApi, ProfileFetcher, RegistrationWorkflow,
        ReplyToken, RetryPolicy,
    };
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use super::{router, InFlight, WebhookState};

    const SECRET: &str = "test-channel-secret";

    #[derive(Default)]
    struct RecordingApi {
        replies: Mutex<Vec<(String, Vec<Message>)>>,
    }

    #[async_trait]
    impl MessagingApi for RecordingApi {
        async fn get_profile(&self, user_id: &LineUserId) -> Result<Profile, LineApiError> {
            Ok(Profile { user_id: user_id.clone(), display_name: "Taro".to_owned() })
        }

        async fn reply(&self, token: ReplyToken, messages: Vec<Message>) -> Result<(), LineApiError> {
            self.replies.lock().await.push((token.as_str().to_owned(), messages));
            Ok(())
        }

        async fn push(&self, _to: &LineUserId, _messages: Vec<Message>) -> Result<(), LineApiError> {
            Ok(())
        }

        async fn create_rich_menu(&self, _menu: &RichMenu) -> Result<String, LineApiError> {
            Ok("richmenu-test".to_owned())
        }

        async fn upload_rich_menu_image(
            &self,
            _rich_menu_id: &str,
            _image: &RichMenuImage,
        ) -> Result<(), LineApiError> {
            Ok(())
        }

        async fn link_rich_menu(
            &self,
            _user_id: &LineUserId,
            _rich_menu_id: &str,
        ) -> Result<(), LineApiError> {
            Ok(())
        }
    }

    struct Fixture {
        app: axum::Router,
        api: Arc<RecordingApi>,
        datastore: Arc<InMemoryDatastore>,
        in_flight: InFlight,
    }

    async fn fixture() -> Fixture {
        let api = Arc::new(RecordingApi::default());
        let datastore = Arc::new(InMemoryDatastore::new());
        let store = Store {
            id: StoreId::new("S1"),
            name: "渋谷店".to_owned(),
            code: StoreCode::parse("AB12").expect("code"),
            owner_user_id: None,
            address: None,
        };
        StoreRepository::upsert(datastore.as_ref(), &store).await.expect("seed store");

        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            attempt_timeout: Duration::from_millis(200),
        };
        let workflow = RegistrationWorkflow::new(
            Repositories::in_memory(datastore.clone()),
            ProfileFetcher::new(api.clone(), policy, "ゲストユーザー"),
            MenuProvisioner::new(api.clone(), Some("richmenu-fixed".to_owned()), None),
            Duration::from_secs(1),
        );
        let events = Arc::new(EventRouter::new(api.clone(), Arc::new(workflow), false));
        let in_flight = InFlight::default();
        let app = router(WebhookState::new(SECRET.to_owned().into(), events, in_flight.clone()));

        Fixture { app, api, datastore, in_flight }
    }

    fn request(path: &str, body: &[u8], signature: Option<&str>) -> Request<Body> {
        let mut builder =
            Request::builder().method("POST").uri(path).header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-line-signature", signature);
        }
        builder.body(Body::from(body.to_vec())).expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn store_code_delivery(text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "destination": "Ubot",
            "events": [{
                "type": "message",
                "timestamp": 1_767_225_600_000_i64,
                "source": {"type": "user", "userId": "U1"},
                "webhookEventId": "evt-1",
                "deliveryContext": {"isRedelivery": false},
                "replyToken": "rt-1",
                "message": {"type": "text", "id": "m1", "text": text}
            }]
        }))
        .expect("encode")
    }

    #[tokio::test]
    async fn signed_delivery_is_acknowledged_and_processed() {
        let fixture = fixture().await;
        let body = store_code_delivery("AB12");
        let signature = sign_body(&body, SECRET);

        let response =
            fixture.app.oneshot(request("/webhook", &body, Some(&signature))).await.expect("call");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "OK"}));
        fixture.in_flight.drain(Duration::from_secs(2)).await;
        assert_eq!(fixture.datastore.memberships().await.len(), 1);
        assert_eq!(fixture.api.replies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_side_effects() {
        let fixture = fixture().await;
        let body = store_code_delivery("AB12");
        let forged = sign_body(&body, "some-other-secret");

        let response = fixture
            .app
            .clone()
            .oneshot(request("/api/line/webhook", &body, Some(&forged)))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({"error": "Invalid signature"}));

        let response =
            fixture.app.oneshot(request("/webhook", &body, None)).await.expect("call");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(fixture.in_flight.drain(Duration::from_secs(1)).await, 0);
        assert_eq!(fixture.datastore.write_count(InMemoryTable::Memberships).await, 0);
        assert!(fixture.api.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn signature_covers_raw_bytes_not_reserialized_json() {
        let fixture = fixture().await;
        let compact = store_code_delivery("AB12");
        let signature = sign_body(&compact, SECRET);
        let pretty = serde_json::to_vec_pretty(
            &serde_json::from_slice::<Value>(&compact).expect("json"),
        )
        .expect("encode");

        let response =
            fixture.app.oneshot(request("/webhook", &pretty, Some(&signature))).await.expect("call");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_garbage_and_empty_batches_are_acknowledged() {
        let fixture = fixture().await;

        for body in [b"not json".to_vec(), br#"{"destination":"Ubot","events":[]}"#.to_vec()] {
            let signature = sign_body(&body, SECRET);
            let response = fixture
                .app
                .clone()
                .oneshot(request("/webhook", &body, Some(&signature)))
                .await
                .expect("call");
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(fixture.in_flight.drain(Duration::from_secs(1)).await, 0);
        assert!(fixture.api.replies.lock().await.is_empty());
    }

    async fn finishes_after(delay: Duration, done: Arc<AtomicBool>) {
        tokio::time::sleep(delay).await;
        done.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn batches_accepted_during_drain_are_not_blocked_and_are_awaited() {
        let in_flight = InFlight::default();
        let first = Arc::new(AtomicBool::new(false));
        let late = Arc::new(AtomicBool::new(false));
        in_flight.spawn(finishes_after(Duration::from_millis(150), first.clone())).await;

        let draining = {
            let in_flight = in_flight.clone();
            tokio::spawn(async move { in_flight.drain(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(
            Duration::from_millis(50),
            in_flight.spawn(finishes_after(Duration::from_millis(50), late.clone())),
        )
        .await
        .expect("spawn should not wait for the drain");

        assert_eq!(draining.await.expect("drain task"), 1);
        assert!(first.load(Ordering::SeqCst));
        assert!(late.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drain_aborts_batches_past_the_grace_period() {
        let in_flight = InFlight::default();
        let done = Arc::new(AtomicBool::new(false));
        in_flight.spawn(finishes_after(Duration::from_secs(30), done.clone())).await;

        let started = std::time::Instant::now();
        assert_eq!(in_flight.drain(Duration::from_millis(50)).await, 1);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(in_flight.drain(Duration::from_millis(10)).await, 0);
    }
}
