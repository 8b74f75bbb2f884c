//! Scripted backend for client tests
//!
//! Accepts `Bearer <valid access>` on every path, answers 401 otherwise.
//! `/public` ignores authorization, `/boom` always returns 500, `/always-401`
//! rejects every credential. The refresh endpoint can be held open on a
//! `Notify` so tests control exactly when the exchange resolves.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use transport::{HttpRequest, HttpResponse, StatusCode, Transport, TransportError};

pub(crate) const API_BASE: &str = "http://backend.test";

pub(crate) struct FakeBackend {
    valid_access: String,
    refresh_reply: Mutex<(u16, String)>,
    refresh_hold: Mutex<Option<Arc<Notify>>>,
    unreachable: Mutex<bool>,
    pub calls: Mutex<Vec<HttpRequest>>,
    pub refresh_calls: AtomicUsize,
}

impl FakeBackend {
    /// Backend that accepts `valid_access` and refreshes to it.
    pub fn new(valid_access: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_access: valid_access.to_string(),
            refresh_reply: Mutex::new((
                200,
                serde_json::json!({ "access_token": valid_access }).to_string(),
            )),
            refresh_hold: Mutex::new(None),
            unreachable: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
        })
    }

    pub fn refresh_replies(&self, status: u16, body: &str) {
        *self.refresh_reply.lock().unwrap() = (status, body.to_string());
    }

    /// Hold every refresh exchange until the returned `Notify` fires.
    pub fn hold_refresh(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.refresh_hold.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Fail every non-refresh call with a connect error.
    pub fn go_offline(&self) {
        *self.unreachable.lock().unwrap() = true;
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Authorization headers seen for `path`, in call order.
    pub fn authorizations_for(&self, path: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == format!("{API_BASE}{path}"))
            .map(|r| {
                r.headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }
}

impl Transport for FakeBackend {
    fn id(&self) -> &str {
        "fake"
    }

    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.clone());
            let path = request.url.trim_start_matches(API_BASE).to_string();

            if path == "/auth/refresh" {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let hold = self.refresh_hold.lock().unwrap().clone();
                if let Some(notify) = hold {
                    notify.notified().await;
                }
                let (status, body) = self.refresh_reply.lock().unwrap().clone();
                return Ok(HttpResponse::new(StatusCode::from_u16(status).unwrap()).with_body(body));
            }

            if *self.unreachable.lock().unwrap() {
                return Err(TransportError::Connect("connection refused".into()));
            }

            let auth = request
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let expected = format!("Bearer {}", self.valid_access);

            let status = match path.as_str() {
                "/public" => StatusCode::OK,
                "/boom" => StatusCode::INTERNAL_SERVER_ERROR,
                "/always-401" => StatusCode::UNAUTHORIZED,
                _ if auth.as_deref() == Some(expected.as_str()) => StatusCode::OK,
                _ => StatusCode::UNAUTHORIZED,
            };
            let body = serde_json::json!({ "path": path, "authorization": auth }).to_string();
            Ok(HttpResponse::new(status).with_body(body))
        })
    }
}
