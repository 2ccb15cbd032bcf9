use std::{future::Future, sync::Arc, time::Duration};

use shared::{domain::Member, error::AuthError};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, warn};

use crate::IdentityProvider;

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The process-wide authenticated-identity state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Identity unknown; a resolution check is in flight.
    Unresolved,
    Anonymous,
    Authenticated(Member),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn member(&self) -> Option<&Member> {
        match self {
            Self::Authenticated(member) => Some(member),
            _ => None,
        }
    }
}

/// Single source of truth for "who is currently authenticated".
///
/// Only this manager writes the session state; everything else reads it via
/// [`SessionManager::state`] or observes transitions via
/// [`SessionManager::subscribe`]. Each actual state change is broadcast
/// exactly once, in transition order. Sign-in, sign-up, sign-out and
/// resolution are serialized by an internal lock so concurrent attempts
/// never expose a torn intermediate state.
pub struct SessionManager<P: IdentityProvider> {
    provider: Arc<P>,
    state: RwLock<SessionState>,
    transition: Mutex<()>,
    events: broadcast::Sender<SessionState>,
    provider_timeout: Duration,
}

impl<P: IdentityProvider> SessionManager<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self::with_provider_timeout(provider, DEFAULT_PROVIDER_TIMEOUT)
    }

    /// Every provider call is bounded by `provider_timeout`; an elapsed
    /// deadline is reported as `ProviderUnavailable`, so the session never
    /// stays `Unresolved` indefinitely.
    pub fn with_provider_timeout(provider: Arc<P>, provider_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            state: RwLock::new(SessionState::Unresolved),
            transition: Mutex::new(()),
            events,
            provider_timeout,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Subscribes to state transitions. Each receiver buffers up to the
    /// channel capacity; one that falls further behind gets a `Lagged`
    /// error on its next receive instead of silently skipping events,
    /// and can re-sync from [`SessionManager::state`].
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    /// Restore-session check issued on process start. Resolves the initial
    /// `Unresolved` state to `Authenticated` or `Anonymous`; provider
    /// failures degrade to `Anonymous` rather than blocking the caller.
    pub async fn resolve(&self) -> SessionState {
        let _guard = self.transition.lock().await;
        let next = match timeout(self.provider_timeout, self.provider.current_identity()).await {
            Ok(Ok(Some(member))) => SessionState::Authenticated(member),
            Ok(Ok(None)) => SessionState::Anonymous,
            Ok(Err(err)) => {
                warn!(%err, "restore-session check failed");
                SessionState::Anonymous
            }
            Err(_) => {
                warn!("restore-session check timed out");
                SessionState::Anonymous
            }
        };
        self.set_state(next.clone()).await;
        next
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Member, AuthError> {
        // Local validation never reaches the provider boundary.
        validate_sign_up(email, password, full_name)?;

        let _guard = self.transition.lock().await;
        let member = self
            .bounded(self.provider.create_identity(email, password, full_name))
            .await?;
        self.set_state(SessionState::Authenticated(member.clone()))
            .await;
        Ok(member)
    }

    /// On failure the prior state is left untouched and a typed error is
    /// returned for the caller to render.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Member, AuthError> {
        let _guard = self.transition.lock().await;
        let member = self
            .bounded(self.provider.authenticate(email, password))
            .await?;
        self.set_state(SessionState::Authenticated(member.clone()))
            .await;
        Ok(member)
    }

    /// Always completes locally and transitions to `Anonymous`; a failing
    /// or timed-out revoke call is logged and ignored.
    pub async fn sign_out(&self) {
        let _guard = self.transition.lock().await;
        match timeout(self.provider_timeout, self.provider.revoke()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "credential revoke failed; signing out locally"),
            Err(_) => warn!("credential revoke timed out; signing out locally"),
        }
        self.set_state(SessionState::Anonymous).await;
    }

    /// Externally pushed credential expiry or revocation; forces
    /// `Authenticated` to `Anonymous` at any time.
    pub async fn handle_credential_revoked(&self) {
        let _guard = self.transition.lock().await;
        self.set_state(SessionState::Anonymous).await;
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        match timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::ProviderUnavailable(
                "identity provider call timed out".into(),
            )),
        }
    }

    async fn set_state(&self, next: SessionState) {
        let mut current = self.state.write().await;
        if *current == next {
            return;
        }
        *current = next.clone();
        // Send while holding the write lock so subscribers observe
        // transitions in the order they occurred. Send errors only mean
        // there are no subscribers right now.
        let _ = self.events.send(next);
    }
}

impl<P: IdentityProvider + 'static> SessionManager<P> {
    /// Adapts a provider-pushed revocation stream into forced sign-outs.
    /// The spawned task is aborted when the returned watch is dropped, so
    /// no task leaks across view transitions.
    pub fn watch_revocations(
        self: &Arc<Self>,
        mut revocations: broadcast::Receiver<()>,
    ) -> RevocationWatch {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match revocations.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        info!("credential revoked by provider; clearing session");
                        manager.handle_credential_revoked().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        RevocationWatch { handle }
    }
}

pub struct RevocationWatch {
    handle: JoinHandle<()>,
}

impl RevocationWatch {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for RevocationWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn validate_sign_up(email: &str, password: &str, full_name: &str) -> Result<(), AuthError> {
    if full_name.trim().is_empty() {
        return Err(AuthError::Validation("full name is required".into()));
    }
    if email.trim().is_empty() {
        return Err(AuthError::Validation("email is required".into()));
    }
    if !is_plausible_email(email) {
        return Err(AuthError::Validation(format!(
            "'{email}' is not a valid email address"
        )));
    }
    if password.is_empty() {
        return Err(AuthError::Validation("password is required".into()));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    if email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
#[path = "tests/session_manager_tests.rs"]
mod tests;
