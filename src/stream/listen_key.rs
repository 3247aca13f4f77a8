//! Listen-key creation, renewal, and expiry tracking.
//!
//! A listen key is a server-issued opaque token authorizing a user data
//! stream. It expires unless renewed within a fixed window, so the lifecycle
//! arms a background task that renews the key in place on a fixed cadence
//! for as long as the session is open.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth::Params;
use crate::error::BinanceError;
use crate::rest::endpoints::listen_key_path;
use crate::rest::{AuthMode, RestClient};

/// Fixed listen-key validity window: 40 minutes.
pub const LISTEN_KEY_TTL: Duration = Duration::from_secs(40 * 60);

/// Renewal backoff after a failed tick: 1s, 2s, 4s, then give up until the
/// next regular tick.
const RENEWAL_RETRIES: u32 = 3;
const RENEWAL_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// A server-issued listen key with its expiry window.
///
/// Expiry is computed locally, never pushed by the server: each successful
/// renewal resets the issue timestamp while the value stays unchanged.
#[derive(Debug, Clone)]
pub struct ListenKey {
    value: String,
    issued_at: Instant,
    ttl: Duration,
}

impl ListenKey {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            issued_at: Instant::now(),
            ttl,
        }
    }

    /// The opaque key value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the expiry window has elapsed without a renewal.
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.ttl
    }

    fn refresh(&mut self) {
        self.issued_at = Instant::now();
    }
}

/// The REST operations a listen-key lifecycle needs.
///
/// Implemented by [`RestListenKeyEndpoint`] for real traffic; tests substitute
/// an in-process stub.
pub trait ListenKeyEndpoint: Send + Sync + 'static {
    /// Mint a new listen key.
    fn create(&self) -> impl Future<Output = Result<String, BinanceError>> + Send;
    /// Renew an existing listen key in place.
    fn renew(&self, key: &str) -> impl Future<Output = Result<(), BinanceError>> + Send;
}

/// Listen-key endpoint backed by a [`RestClient`] using key-only auth.
#[derive(Debug, Clone)]
pub struct RestListenKeyEndpoint {
    client: RestClient,
    path: &'static str,
}

impl RestListenKeyEndpoint {
    /// Resolve the listen-key path from the client's base URL.
    ///
    /// Fails with [`BinanceError::Config`] for base URLs outside the three
    /// known product lines.
    pub fn for_base_url(client: RestClient) -> Result<Self, BinanceError> {
        let path = listen_key_path(client.base_url())?;
        Ok(Self { client, path })
    }

    /// Use an explicit listen-key path (testnets, mock servers).
    pub fn with_path(client: RestClient, path: &'static str) -> Self {
        Self { client, path }
    }
}

impl ListenKeyEndpoint for RestListenKeyEndpoint {
    async fn create(&self) -> Result<String, BinanceError> {
        let response = self
            .client
            .request(Method::POST, self.path, Params::new(), None, AuthMode::KeyOnly)
            .await?;
        response
            .get("listenKey")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                BinanceError::InvalidResponse("response missing listenKey field".to_string())
            })
    }

    async fn renew(&self, key: &str) -> Result<(), BinanceError> {
        let params = Params::new().insert("listenKey", key);
        // Spot echoes the key, futures returns an empty body; either way only
        // HTTP success matters.
        self.client
            .request(Method::PUT, self.path, params, None, AuthMode::KeyOnly)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Uninitialized,
    Active,
    Closed,
}

/// Owns the creation, periodic renewal, and expiry tracking of a listen key.
///
/// `start()` mints the key and arms a renewal task on the fixed 40-minute
/// cadence; the task is armed only after a successful creation response.
/// `stop()` is idempotent and cancels the task through a flag the task checks
/// around its renewal call, so an in-flight renewal completing after `stop()`
/// never mutates state.
pub struct ListenKeyLifecycle<E: ListenKeyEndpoint> {
    endpoint: Arc<E>,
    ttl: Duration,
    key: Arc<Mutex<Option<ListenKey>>>,
    state: Mutex<LifecycleState>,
    shutdown: watch::Sender<bool>,
    renewal_task: Mutex<Option<JoinHandle<()>>>,
    on_degraded: Option<Arc<dyn Fn(BinanceError) + Send + Sync>>,
}

impl<E: ListenKeyEndpoint> ListenKeyLifecycle<E> {
    /// Create a lifecycle with the standard 40-minute TTL.
    pub fn new(endpoint: E) -> Self {
        Self::with_ttl(endpoint, LISTEN_KEY_TTL)
    }

    /// Create a lifecycle with a custom TTL.
    pub fn with_ttl(endpoint: E, ttl: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            endpoint: Arc::new(endpoint),
            ttl,
            key: Arc::new(Mutex::new(None)),
            state: Mutex::new(LifecycleState::Uninitialized),
            shutdown,
            renewal_task: Mutex::new(None),
            on_degraded: None,
        }
    }

    /// Set a hook invoked when a renewal tick fails all its retries.
    ///
    /// The cadence is unchanged afterwards; the next regular tick still runs.
    pub fn on_degraded(mut self, f: impl Fn(BinanceError) + Send + Sync + 'static) -> Self {
        self.on_degraded = Some(Arc::new(f));
        self
    }

    /// Mint a listen key and arm the renewal task.
    ///
    /// The key and timestamp are recorded, and the task armed, only after a
    /// successful creation response. Creation failures surface to the caller;
    /// no timer is armed on any failure path.
    pub async fn start(&self) -> Result<ListenKey, BinanceError> {
        if *lock(&self.state) != LifecycleState::Uninitialized {
            return Err(BinanceError::SessionClosed);
        }

        let value = self.endpoint.create().await?;

        // stop() may have raced the creation call; arming is atomic with the
        // state check so a closed lifecycle never ends up with a live task.
        let mut state = lock(&self.state);
        if *state == LifecycleState::Closed {
            return Err(BinanceError::SessionClosed);
        }

        let key = ListenKey::new(value, self.ttl);
        *lock(&self.key) = Some(key.clone());
        *state = LifecycleState::Active;

        let handle = self.spawn_renewal_task();
        *lock(&self.renewal_task) = Some(handle);
        tracing::debug!(ttl = ?self.ttl, "listen key issued, renewal armed");

        Ok(key)
    }

    /// The current listen key, if one was issued.
    pub fn listen_key(&self) -> Option<ListenKey> {
        lock(&self.key).clone()
    }

    /// Whether the current key's expiry window has elapsed.
    ///
    /// Returns `true` when no key was issued.
    pub fn is_expired(&self) -> bool {
        lock(&self.key).as_ref().is_none_or(ListenKey::is_expired)
    }

    /// Cancel the renewal task and close the lifecycle.
    ///
    /// Idempotent, synchronous, and safe to call before `start()` resolves or
    /// concurrently with an in-flight renewal. The key is not revoked
    /// server-side; it simply lapses.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == LifecycleState::Closed {
                return;
            }
            *state = LifecycleState::Closed;
        }
        let _ = self.shutdown.send(true);
        drop(lock(&self.renewal_task).take());
        tracing::debug!("listen key lifecycle closed");
    }

    fn spawn_renewal_task(&self) -> JoinHandle<()> {
        let endpoint = Arc::clone(&self.endpoint);
        let key_slot = Arc::clone(&self.key);
        let on_degraded = self.on_degraded.clone();
        let mut shutdown = self.shutdown.subscribe();
        let ttl = self.ttl;
        // Anchor the cadence at key issuance, not at the task's first poll.
        let first_tick = Instant::now() + ttl;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, ttl);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // Covers a stop() delivered before this task subscribed.
                if *shutdown.borrow() {
                    return;
                }

                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }

                let Some(current) = lock(&key_slot).as_ref().map(|k| k.value.clone()) else {
                    return;
                };

                match renew_with_backoff(endpoint.as_ref(), &current, &mut shutdown).await {
                    RenewOutcome::Renewed => {
                        if *shutdown.borrow() {
                            return;
                        }
                        if let Some(key) = lock(&key_slot).as_mut() {
                            key.refresh();
                        }
                        tracing::debug!("listen key renewed");
                    }
                    RenewOutcome::Cancelled => return,
                    RenewOutcome::Failed(err) => {
                        tracing::warn!(error = %err, "listen key renewal failed; session degraded");
                        if let Some(hook) = &on_degraded {
                            hook(err);
                        }
                    }
                }
            }
        })
    }
}

impl<E: ListenKeyEndpoint> Drop for ListenKeyLifecycle<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: ListenKeyEndpoint> std::fmt::Debug for ListenKeyLifecycle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenKeyLifecycle")
            .field("state", &*lock(&self.state))
            .field("ttl", &self.ttl)
            .finish()
    }
}

enum RenewOutcome {
    Renewed,
    Cancelled,
    Failed(BinanceError),
}

/// Renew once, retrying with bounded exponential backoff on failure.
async fn renew_with_backoff<E: ListenKeyEndpoint>(
    endpoint: &E,
    key: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> RenewOutcome {
    let mut last_err = None;

    for attempt in 0..=RENEWAL_RETRIES {
        if attempt > 0 {
            let backoff = RENEWAL_BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
            tokio::select! {
                _ = shutdown.changed() => return RenewOutcome::Cancelled,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        if *shutdown.borrow() {
            return RenewOutcome::Cancelled;
        }

        match endpoint.renew(key).await {
            Ok(()) => return RenewOutcome::Renewed,
            Err(err) => {
                tracing::warn!(error = %err, attempt, "listen key renewal attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => RenewOutcome::Failed(err),
        None => RenewOutcome::Renewed,
    }
}

/// Lock a mutex, recovering the guard if a callback panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
