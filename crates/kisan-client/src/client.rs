//! Authenticated client: bearer attachment, 401 recovery, replay
//!
//! One refresh exchange per expiry, no matter how many requests hit 401 at
//! the same time. The first one leads; the rest queue on the refresh gate
//! and replay with whatever the leader obtains. Each request is recovered at
//! most once.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use kisan_auth::{TokenStore, refresh_access_token, refresh_url};
use tracing::{debug, error, info, instrument, warn};
use transport::{HeaderValue, HttpRequest, HttpResponse, StatusCode, Transport, header};

use crate::error::{Error, Result};
use crate::reauth::ReauthHandler;
use crate::refresh::{Broadcast, RefreshGate, RefreshStatus, Ticket};
use crate::request::{Attempt, RequestSpec};

/// Where the client sends calls and how long waiters may queue.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL that request paths are joined onto
    pub api_base: String,
    /// Base URL of the auth backend hosting `/auth/refresh`
    pub auth_base: String,
    /// `None` waits for an in-flight refresh indefinitely
    pub refresh_wait_timeout: Option<Duration>,
}

impl ClientConfig {
    /// API and auth served from the same base, no waiter timeout.
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        Self {
            auth_base: api_base.clone(),
            api_base,
            refresh_wait_timeout: None,
        }
    }

    pub fn with_auth_base(mut self, auth_base: impl Into<String>) -> Self {
        self.auth_base = auth_base.into();
        self
    }

    pub fn with_refresh_wait_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_wait_timeout = Some(timeout);
        self
    }
}

/// HTTP client that owns the session's bearer credential.
///
/// Refresh state is per instance; two clients never share a gate.
pub struct AuthenticatedHttpClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    reauth: Arc<dyn ReauthHandler>,
    api_base: String,
    refresh_url: String,
    refresh_wait_timeout: Option<Duration>,
    gate: RefreshGate,
}

impl AuthenticatedHttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        reauth: Arc<dyn ReauthHandler>,
        config: ClientConfig,
    ) -> Self {
        let refresh_url = refresh_url(&config.auth_base);
        info!(
            api_base = %config.api_base,
            refresh_url = %refresh_url,
            transport = transport.id(),
            "authenticated client initialized"
        );
        Self {
            transport,
            store,
            reauth,
            api_base: config.api_base,
            refresh_url,
            refresh_wait_timeout: config.refresh_wait_timeout,
            gate: RefreshGate::new(),
        }
    }

    /// Issue `spec` with the stored bearer credential.
    ///
    /// Returns the backend response for any status other than 401. A 401 is
    /// recovered once through the refresh gate; see the module docs.
    #[instrument(skip_all, fields(method = %spec.method, path = %spec.path))]
    pub async fn request(&self, spec: RequestSpec) -> Result<HttpResponse> {
        let attempt = Attempt::first(spec);
        let access = self.store.access().await;
        let response = self.send(&attempt, access.as_ref()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!("backend answered 401");
        self.recover(attempt).await
    }

    /// Current refresh gate state.
    pub fn refresh_status(&self) -> RefreshStatus {
        self.gate.status()
    }

    /// The credential store (for session management).
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    async fn recover(&self, attempt: Attempt) -> Result<HttpResponse> {
        if attempt.retried {
            return Err(self.retry_exhausted(&attempt));
        }

        let Some(refresh) = self.store.refresh().await else {
            crate::metrics::record_refresh("skipped");
            let reason = "no refresh credential stored";
            if !self.sign_out(None, reason).await {
                if let Some(current) = self.store.access().await {
                    debug!("session stored since the 401, replaying with it");
                    return self.replay(attempt.into_retry(), &current).await;
                }
            }
            return Err(Error::AuthenticationRequired(reason.into()));
        };

        let attempt = attempt.into_retry();
        match self.gate.enter() {
            Ticket::Leader(guard) => {
                let outcome = self.exchange(refresh).await;
                let released = guard.resolve(outcome.clone());
                match outcome {
                    Ok(access) => {
                        info!(waiters = released, "access credential refreshed");
                        self.replay(attempt, &access).await
                    }
                    Err(reason) => {
                        if released > 0 {
                            warn!(waiters = released, "rejected queued requests");
                        }
                        Err(Error::AuthenticationRequired(reason))
                    }
                }
            }
            Ticket::Waiter(receiver) => {
                crate::metrics::record_waiter();
                debug!("refresh in flight, queued behind it");
                let outcome = match self.refresh_wait_timeout {
                    Some(limit) => tokio::time::timeout(limit, receiver)
                        .await
                        .map_err(|_| Error::RefreshWaitTimeout(limit))?,
                    None => receiver.await,
                };
                match outcome {
                    Ok(Ok(access)) => self.replay(attempt, &access).await,
                    Ok(Err(reason)) => Err(Error::AuthenticationRequired(reason)),
                    Err(_) => Err(Error::RefreshInterrupted),
                }
            }
        }
    }

    /// Run the refresh exchange and settle the stored session.
    ///
    /// Store writes are conditional on the session still holding `refresh`:
    /// a sign-in or sign-out that lands mid-exchange wins over the result.
    async fn exchange(&self, refresh: Secret<String>) -> Broadcast {
        debug!(url = %self.refresh_url, "starting refresh exchange");
        match refresh_access_token(self.transport.as_ref(), &self.refresh_url, &refresh).await {
            Ok(response) => {
                let access = Secret::new(response.access_token);
                match self.store.replace_access_if(refresh, access.clone()).await {
                    Ok(true) => {}
                    Ok(false) => return self.superseded_session().await,
                    Err(e) => {
                        warn!(error = %e, "failed to persist refreshed access credential");
                    }
                }
                crate::metrics::record_refresh("success");
                Ok(access)
            }
            Err(e) => {
                let reason = e.to_string();
                if !self.sign_out(Some(refresh), &reason).await {
                    return self.superseded_session().await;
                }
                crate::metrics::record_refresh("failure");
                warn!(error = %reason, "refresh exchange failed, session cleared");
                Err(reason)
            }
        }
    }

    /// The session was replaced or ended while the exchange ran.
    async fn superseded_session(&self) -> Broadcast {
        crate::metrics::record_refresh("superseded");
        match self.store.access().await {
            Some(current) => {
                info!("session replaced during refresh, using the stored credential");
                Ok(current)
            }
            None => {
                info!("session ended during refresh");
                Err("session ended while the credential refresh was in flight".into())
            }
        }
    }

    async fn replay(&self, attempt: Attempt, access: &Secret<String>) -> Result<HttpResponse> {
        crate::metrics::record_replay();
        let response = self.send(&attempt, Some(access)).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!("replay rejected with 401, giving up");
            return Err(self.retry_exhausted(&attempt));
        }
        Ok(response)
    }

    async fn send(
        &self,
        attempt: &Attempt,
        access: Option<&Secret<String>>,
    ) -> Result<HttpResponse> {
        let spec = &attempt.spec;
        let mut headers = spec.headers.clone();
        headers.remove(header::AUTHORIZATION);
        if let Some(access) = access {
            let mut value = HeaderValue::from_str(&access.bearer()).map_err(|e| {
                Error::InvalidRequest(format!("access credential is not a valid header value: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let request = HttpRequest {
            method: spec.method.clone(),
            url: spec.url(&self.api_base),
            headers,
            body: spec.body.clone(),
        };
        Ok(self.transport.send(request).await?)
    }

    /// Clear the session and point the user at the login screen, unless a
    /// different session was stored since `refresh` was read.
    ///
    /// Returns `false` when the stored session was left alone.
    async fn sign_out(&self, refresh: Option<Secret<String>>, reason: &str) -> bool {
        match self.store.clear_if(refresh).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("session replaced since the 401, not signing out");
                return false;
            }
            Err(e) => error!(error = %e, "failed to clear stored credentials"),
        }
        self.reauth.reauthentication_required(reason);
        true
    }

    fn retry_exhausted(&self, attempt: &Attempt) -> Error {
        Error::RetryExhausted {
            method: attempt.spec.method.to_string(),
            url: attempt.spec.url(&self.api_base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{API_BASE, FakeBackend};
    use kisan_auth::MemoryTokenStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        backend: Arc<FakeBackend>,
        store: Arc<MemoryTokenStore>,
        reauth_calls: Arc<AtomicUsize>,
        client: AuthenticatedHttpClient,
    }

    fn harness(access: Option<&str>, refresh: Option<&str>, config: ClientConfig) -> Harness {
        harness_for(FakeBackend::new("new-access"), access, refresh, config)
    }

    fn harness_for(
        backend: Arc<FakeBackend>,
        access: Option<&str>,
        refresh: Option<&str>,
        config: ClientConfig,
    ) -> Harness {
        let store = Arc::new(MemoryTokenStore::with_tokens(access, refresh));
        let reauth_calls = Arc::new(AtomicUsize::new(0));
        let counter = reauth_calls.clone();
        let client = AuthenticatedHttpClient::new(
            backend.clone(),
            store.clone(),
            Arc::new(move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            config,
        );
        Harness {
            backend,
            store,
            reauth_calls,
            client,
        }
    }

    fn default_harness(access: Option<&str>, refresh: Option<&str>) -> Harness {
        harness(access, refresh, ClientConfig::new(API_BASE))
    }

    /// Yield until `n` requests are queued behind the in-flight refresh.
    async fn until_waiters(client: &AuthenticatedHttpClient, n: usize) {
        while client.refresh_status().waiters < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn attaches_bearer_when_access_present() {
        let h = default_harness(Some("new-access"), Some("valid-refresh"));

        let response = h.client.request(RequestSpec::get("/market")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            h.backend.authorizations_for("/market"),
            vec![Some("Bearer new-access".to_string())]
        );
    }

    #[tokio::test]
    async fn no_authorization_without_access() {
        let h = default_harness(None, None);

        let response = h.client.request(RequestSpec::get("/public")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.backend.authorizations_for("/public"), vec![None]);
    }

    #[tokio::test]
    async fn caller_authorization_is_replaced() {
        let h = default_harness(Some("new-access"), None);
        let spec = RequestSpec::get("/market")
            .with_header("authorization", "Bearer smuggled")
            .unwrap();

        h.client.request(spec).await.unwrap();
        assert_eq!(
            h.backend.authorizations_for("/market"),
            vec![Some("Bearer new-access".to_string())]
        );
    }

    #[tokio::test]
    async fn success_never_refreshes() {
        let h = default_harness(Some("new-access"), Some("valid-refresh"));

        for _ in 0..3 {
            h.client.request(RequestSpec::get("/schemes")).await.unwrap();
        }
        assert_eq!(h.backend.refresh_count(), 0);
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_access_is_refreshed_and_replayed() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));

        let response = h.client.request(RequestSpec::get("/resource")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["authorization"], "Bearer new-access");

        assert_eq!(h.backend.refresh_count(), 1);
        let refresh_body: serde_json::Value = {
            let calls = h.backend.calls.lock().unwrap();
            let call = calls
                .iter()
                .find(|c| c.url.ends_with("/auth/refresh"))
                .unwrap();
            assert!(call.headers.get("authorization").is_none());
            serde_json::from_slice(&call.body).unwrap()
        };
        assert_eq!(refresh_body, serde_json::json!({"refresh_token": "valid-refresh"}));

        assert_eq!(h.store.access().await.unwrap().expose(), "new-access");
        assert_eq!(h.store.refresh().await.unwrap().expose(), "valid-refresh");
        assert_eq!(
            h.backend.authorizations_for("/resource"),
            vec![
                Some("Bearer expired".to_string()),
                Some("Bearer new-access".to_string())
            ]
        );
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.client.refresh_status().label(), "idle");
    }

    #[tokio::test]
    async fn failed_refresh_clears_session_and_signals_login() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        h.backend
            .refresh_replies(400, r#"{"detail":"invalid refresh token"}"#);

        let err = h
            .client
            .request(RequestSpec::get("/resource"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)), "got: {err}");

        assert!(h.store.access().await.is_none());
        assert!(h.store.refresh().await.is_none());
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.refresh_count(), 1);
        // Not replayed
        assert_eq!(h.backend.authorizations_for("/resource").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        let release = h.backend.hold_refresh();

        let (a, b, ()) = tokio::join!(
            h.client.request(RequestSpec::get("/a")),
            h.client.request(RequestSpec::get("/b")),
            async {
                until_waiters(&h.client, 1).await;
                assert!(h.client.refresh_status().refreshing);
                release.notify_one();
            }
        );

        assert_eq!(a.unwrap().status, StatusCode::OK);
        assert_eq!(b.unwrap().status, StatusCode::OK);
        assert_eq!(h.backend.refresh_count(), 1);
        for path in ["/a", "/b"] {
            assert_eq!(
                h.backend.authorizations_for(path).last().unwrap().as_deref(),
                Some("Bearer new-access"),
                "{path} must be replayed with the refreshed credential"
            );
        }
    }

    #[tokio::test]
    async fn many_concurrent_401s_issue_exactly_one_refresh() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        let release = h.backend.hold_refresh();
        let paths: Vec<String> = (0..8).map(|i| format!("/item/{i}")).collect();

        let requests = paths
            .iter()
            .map(|p| h.client.request(RequestSpec::get(p.as_str())));
        let (results, ()) = tokio::join!(futures_util::future::join_all(requests), async {
            until_waiters(&h.client, paths.len() - 1).await;
            release.notify_one();
        });

        assert_eq!(h.backend.refresh_count(), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().status == StatusCode::OK));
    }

    #[tokio::test]
    async fn queued_requests_fail_with_the_refresh() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        h.backend.refresh_replies(400, "bad refresh");
        let release = h.backend.hold_refresh();

        let (a, b, ()) = tokio::join!(
            h.client.request(RequestSpec::get("/a")),
            h.client.request(RequestSpec::get("/b")),
            async {
                until_waiters(&h.client, 1).await;
                release.notify_one();
            }
        );

        assert!(matches!(a, Err(Error::AuthenticationRequired(_))));
        assert!(matches!(b, Err(Error::AuthenticationRequired(_))));
        assert_eq!(h.backend.refresh_count(), 1);
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 1);
        assert!(h.store.access().await.is_none());
    }

    #[tokio::test]
    async fn sign_out_during_refresh_is_not_undone() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        let release = h.backend.hold_refresh();

        let (result, ()) = tokio::join!(h.client.request(RequestSpec::get("/resource")), async {
            while !h.client.refresh_status().refreshing {
                tokio::task::yield_now().await;
            }
            h.store.clear().await.unwrap();
            release.notify_one();
        });

        assert!(
            matches!(result, Err(Error::AuthenticationRequired(_))),
            "got: {result:?}"
        );
        assert!(h.store.access().await.is_none());
        assert!(h.store.refresh().await.is_none());
        // The user left on purpose; no login redirect
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.backend.authorizations_for("/resource").len(), 1);
    }

    #[tokio::test]
    async fn sign_in_during_failed_refresh_is_kept() {
        let backend = FakeBackend::new("fresh-login-access");
        backend.refresh_replies(400, "invalid refresh token");
        let h = harness_for(
            backend,
            Some("expired"),
            Some("valid-refresh"),
            ClientConfig::new(API_BASE),
        );
        let release = h.backend.hold_refresh();

        let (result, ()) = tokio::join!(h.client.request(RequestSpec::get("/resource")), async {
            while !h.client.refresh_status().refreshing {
                tokio::task::yield_now().await;
            }
            h.store
                .save(
                    Secret::from("fresh-login-access"),
                    Secret::from("fresh-login-refresh"),
                )
                .await
                .unwrap();
            release.notify_one();
        });

        assert_eq!(result.unwrap().status, StatusCode::OK);
        assert_eq!(h.store.access().await.unwrap().expose(), "fresh-login-access");
        assert_eq!(
            h.store.refresh().await.unwrap().expose(),
            "fresh-login-refresh"
        );
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.backend.authorizations_for("/resource").last().unwrap().as_deref(),
            Some("Bearer fresh-login-access")
        );
    }

    /// Store whose refresh credential is read as absent just before a new
    /// sign-in lands.
    struct SignInRace {
        inner: MemoryTokenStore,
        raced: std::sync::atomic::AtomicBool,
    }

    impl TokenStore for SignInRace {
        fn access(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
            self.inner.access()
        }

        fn refresh(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
            Box::pin(async move {
                let seen = self.inner.refresh().await;
                if !self.raced.swap(true, Ordering::SeqCst) {
                    self.inner
                        .save(Secret::from("new-access"), Secret::from("signed-in-refresh"))
                        .await
                        .unwrap();
                }
                seen
            })
        }

        fn save(
            &self,
            access: Secret<String>,
            refresh: Secret<String>,
        ) -> Pin<Box<dyn Future<Output = kisan_auth::Result<()>> + Send + '_>> {
            self.inner.save(access, refresh)
        }

        fn clear(&self) -> Pin<Box<dyn Future<Output = kisan_auth::Result<()>> + Send + '_>> {
            self.inner.clear()
        }

        fn replace_access_if(
            &self,
            refresh: Secret<String>,
            access: Secret<String>,
        ) -> Pin<Box<dyn Future<Output = kisan_auth::Result<bool>> + Send + '_>> {
            self.inner.replace_access_if(refresh, access)
        }

        fn clear_if(
            &self,
            refresh: Option<Secret<String>>,
        ) -> Pin<Box<dyn Future<Output = kisan_auth::Result<bool>> + Send + '_>> {
            self.inner.clear_if(refresh)
        }
    }

    #[tokio::test]
    async fn sign_in_racing_a_missing_refresh_is_kept() {
        let backend = FakeBackend::new("new-access");
        let store = Arc::new(SignInRace {
            inner: MemoryTokenStore::with_tokens(Some("expired"), None),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let reauth_calls = Arc::new(AtomicUsize::new(0));
        let counter = reauth_calls.clone();
        let client = AuthenticatedHttpClient::new(
            backend.clone(),
            store.clone(),
            Arc::new(move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            ClientConfig::new(API_BASE),
        );

        let response = client.request(RequestSpec::get("/resource")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            store.inner.refresh().await.unwrap().expose(),
            "signed-in-refresh"
        );
        assert_eq!(reauth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn queued_request_rejected_again_is_terminal() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        let release = h.backend.hold_refresh();

        let (leader, waiter, ()) = tokio::join!(
            h.client.request(RequestSpec::get("/a")),
            h.client.request(RequestSpec::get("/always-401")),
            async {
                until_waiters(&h.client, 1).await;
                release.notify_one();
            }
        );

        assert_eq!(leader.unwrap().status, StatusCode::OK);
        assert!(
            matches!(waiter, Err(Error::RetryExhausted { .. })),
            "got: {waiter:?}"
        );
        assert_eq!(h.backend.refresh_count(), 1);
        assert_eq!(
            h.backend.authorizations_for("/always-401"),
            vec![
                Some("Bearer expired".to_string()),
                Some("Bearer new-access".to_string())
            ]
        );
        assert_eq!(h.store.access().await.unwrap().expose(), "new-access");
    }

    #[tokio::test]
    async fn missing_refresh_credential_skips_exchange() {
        let h = default_harness(Some("expired"), None);

        let err = h
            .client
            .request(RequestSpec::get("/resource"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)), "got: {err}");
        assert_eq!(h.backend.refresh_count(), 0);
        assert!(h.store.access().await.is_none());
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_terminal() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));

        let err = h
            .client
            .request(RequestSpec::get("/always-401"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { .. }), "got: {err}");
        assert_eq!(h.backend.refresh_count(), 1);
        assert_eq!(h.backend.authorizations_for("/always-401").len(), 2);
        // The refreshed session is kept; only this request failed
        assert_eq!(h.store.access().await.unwrap().expose(), "new-access");
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_401_statuses_pass_through() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));

        let response = h.client.request(RequestSpec::get("/boom")).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn transport_failures_pass_through() {
        let h = default_harness(Some("new-access"), Some("valid-refresh"));
        h.backend.go_offline();

        let err = h
            .client
            .request(RequestSpec::get("/market"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err}");
        assert_eq!(err.kind(), "upstream_error");
        assert_eq!(h.backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn waiter_gives_up_after_configured_timeout() {
        let h = harness(
            Some("expired"),
            Some("valid-refresh"),
            ClientConfig::new(API_BASE).with_refresh_wait_timeout(Duration::from_millis(50)),
        );
        // Never released: the leader stays in flight
        let _release = h.backend.hold_refresh();

        let (leader, waiter) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(500),
                h.client.request(RequestSpec::get("/a"))
            ),
            async {
                while !h.client.refresh_status().refreshing {
                    tokio::task::yield_now().await;
                }
                h.client.request(RequestSpec::get("/b")).await
            }
        );

        assert!(leader.is_err(), "leader is still blocked on the refresh");
        assert!(
            matches!(waiter, Err(Error::RefreshWaitTimeout(_))),
            "got: {waiter:?}"
        );
    }

    #[tokio::test]
    async fn cancelled_leader_interrupts_waiters() {
        let h = default_harness(Some("expired"), Some("valid-refresh"));
        let _release = h.backend.hold_refresh();

        let (leader, waiter) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(50),
                h.client.request(RequestSpec::get("/a"))
            ),
            async {
                while !h.client.refresh_status().refreshing {
                    tokio::task::yield_now().await;
                }
                h.client.request(RequestSpec::get("/b")).await
            }
        );

        assert!(leader.is_err());
        assert!(matches!(waiter, Err(Error::RefreshInterrupted)), "got: {waiter:?}");
        assert!(!h.client.refresh_status().refreshing);
        // Credentials untouched: nothing was learned about them
        assert_eq!(h.store.refresh().await.unwrap().expose(), "valid-refresh");
        assert_eq!(h.reauth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn separate_auth_base_is_used_for_refresh() {
        let backend = FakeBackend::new("new-access");
        let client = AuthenticatedHttpClient::new(
            backend.clone(),
            Arc::new(MemoryTokenStore::with_tokens(Some("a"), Some("r"))),
            Arc::new(|_: &str| {}),
            ClientConfig::new(API_BASE).with_auth_base("http://auth.test/"),
        );
        // The fake only answers refresh on API_BASE, so the exchange against
        // the other host is a 401 and the session is cleared
        let err = client.request(RequestSpec::get("/x")).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired(_)));
        let calls = backend.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.url == "http://auth.test/auth/refresh"));
    }

    #[tokio::test]
    async fn refresh_outcomes_are_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let h = default_harness(Some("expired"), Some("valid-refresh"));
        h.client.request(RequestSpec::get("/resource")).await.unwrap();

        let output = handle.render();
        assert!(
            output.contains("auth_refresh_total{outcome=\"success\"} 1"),
            "got: {output}"
        );
        assert!(output.contains("auth_replays_total 1"), "got: {output}");
    }
}
