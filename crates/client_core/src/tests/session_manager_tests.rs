use super::*;
use async_trait::async_trait;
use chrono::Utc;
use shared::domain::{AccountStatus, Member, MemberId, Role};
use tokio::sync::broadcast::error::TryRecvError;

const VALID_PASSWORD: &str = "correct horse";

fn member(email: &str, name: &str) -> Member {
    let now = Utc::now();
    Member {
        member_id: MemberId::generate(),
        email: email.into(),
        full_name: name.into(),
        phone: None,
        organization_id: None,
        role: Role::Member,
        status: AccountStatus::Active,
        bio: None,
        avatar_url: None,
        location: None,
        created_at: now,
        updated_at: now,
    }
}

struct TestIdentityProvider {
    member: Member,
    current: Option<Member>,
    fail_with: Option<AuthError>,
    delay: Option<Duration>,
    revoke_error: Option<AuthError>,
    boundary_calls: Arc<Mutex<u32>>,
}

impl TestIdentityProvider {
    fn ok(member: Member) -> Self {
        Self {
            member,
            current: None,
            fail_with: None,
            delay: None,
            revoke_error: None,
            boundary_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn failing(err: AuthError) -> Self {
        let mut provider = Self::ok(member("unused@example.com", "Unused"));
        provider.fail_with = Some(err);
        provider
    }

    fn with_current(mut self, member: Member) -> Self {
        self.current = Some(member);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_revoke_error(mut self, err: AuthError) -> Self {
        self.revoke_error = Some(err);
        self
    }

    async fn note_boundary_call(&self) {
        *self.boundary_calls.lock().await += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn boundary_calls(&self) -> u32 {
        *self.boundary_calls.lock().await
    }
}

#[async_trait]
impl IdentityProvider for TestIdentityProvider {
    async fn create_identity(
        &self,
        email: &str,
        _password: &str,
        full_name: &str,
    ) -> Result<Member, AuthError> {
        self.note_boundary_call().await;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let mut member = self.member.clone();
        member.email = email.into();
        member.full_name = full_name.into();
        Ok(member)
    }

    async fn authenticate(&self, _email: &str, password: &str) -> Result<Member, AuthError> {
        self.note_boundary_call().await;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        if password != VALID_PASSWORD {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.member.clone())
    }

    async fn current_identity(&self) -> Result<Option<Member>, AuthError> {
        self.note_boundary_call().await;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.current.clone())
    }

    async fn revoke(&self) -> Result<(), AuthError> {
        if let Some(err) = &self.revoke_error {
            return Err(err.clone());
        }
        Ok(())
    }
}

fn drain(rx: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(state) => seen.push(state),
            Err(TryRecvError::Empty) => break,
            Err(err) => panic!("unexpected receiver state: {err:?}"),
        }
    }
    seen
}

#[tokio::test]
async fn starts_unresolved_and_resolves_to_anonymous_without_identity() {
    let provider = Arc::new(TestIdentityProvider::ok(member("a@example.com", "A")));
    let manager = SessionManager::new(Arc::clone(&provider));
    assert_eq!(manager.state().await, SessionState::Unresolved);

    let mut events = manager.subscribe();
    let resolved = manager.resolve().await;
    assert_eq!(resolved, SessionState::Anonymous);
    assert_eq!(manager.state().await, SessionState::Anonymous);
    assert_eq!(drain(&mut events), vec![SessionState::Anonymous]);
}

#[tokio::test]
async fn resolves_to_authenticated_with_persisted_identity() {
    let restored = member("b@example.com", "B");
    let provider = Arc::new(
        TestIdentityProvider::ok(restored.clone()).with_current(restored.clone()),
    );
    let manager = SessionManager::new(provider);

    let resolved = manager.resolve().await;
    assert_eq!(resolved, SessionState::Authenticated(restored.clone()));
    assert_eq!(manager.state().await.member(), Some(&restored));
}

#[tokio::test]
async fn resolve_degrades_to_anonymous_on_provider_failure() {
    let provider = Arc::new(TestIdentityProvider::failing(AuthError::ProviderUnavailable(
        "offline".into(),
    )));
    let manager = SessionManager::new(provider);
    assert_eq!(manager.resolve().await, SessionState::Anonymous);
}

#[tokio::test]
async fn resolve_degrades_to_anonymous_on_timeout() {
    let slow = member("c@example.com", "C");
    let provider = Arc::new(
        TestIdentityProvider::ok(slow.clone())
            .with_current(slow)
            .with_delay(Duration::from_millis(200)),
    );
    let manager = SessionManager::with_provider_timeout(provider, Duration::from_millis(10));
    assert_eq!(manager.resolve().await, SessionState::Anonymous);
}

#[tokio::test]
async fn sign_up_validation_never_reaches_the_provider() {
    let provider = Arc::new(TestIdentityProvider::ok(member("d@example.com", "D")));
    let manager = SessionManager::new(Arc::clone(&provider));

    for (email, password, name) in [
        ("d@example.com", "pw", ""),
        ("", "pw", "Dora"),
        ("not-an-email", "pw", "Dora"),
        ("d@nodot", "pw", "Dora"),
        ("d @example.com", "pw", "Dora"),
        ("d@example.com", "", "Dora"),
    ] {
        let err = manager
            .sign_up(email, password, name)
            .await
            .expect_err("validation should fail");
        assert!(
            matches!(err, AuthError::Validation(_)),
            "expected validation error for {email:?}/{name:?}, got {err:?}"
        );
    }

    assert_eq!(provider.boundary_calls().await, 0);
    assert_eq!(manager.state().await, SessionState::Unresolved);
}

#[tokio::test]
async fn sign_up_success_authenticates_and_notifies_once() {
    let provider = Arc::new(TestIdentityProvider::ok(member("e@example.com", "E")));
    let manager = SessionManager::new(provider);
    let mut events = manager.subscribe();

    let created = manager
        .sign_up("eve@example.com", "long enough", "Eve")
        .await
        .expect("sign up");
    assert_eq!(created.email, "eve@example.com");
    assert_eq!(created.full_name, "Eve");

    let seen = drain(&mut events);
    assert_eq!(seen, vec![SessionState::Authenticated(created)]);
}

#[tokio::test]
async fn failed_sign_in_leaves_prior_state_untouched() {
    let provider = Arc::new(TestIdentityProvider::ok(member("f@example.com", "F")));
    let manager = SessionManager::new(provider);
    manager.resolve().await;

    let mut events = manager.subscribe();
    let err = manager
        .sign_in("f@example.com", "wrong password")
        .await
        .expect_err("invalid credentials");
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(manager.state().await, SessionState::Anonymous);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn sign_in_timeout_reports_provider_unavailable() {
    let provider = Arc::new(
        TestIdentityProvider::ok(member("g@example.com", "G"))
            .with_delay(Duration::from_millis(200)),
    );
    let manager = SessionManager::with_provider_timeout(provider, Duration::from_millis(10));
    manager.resolve().await;

    let err = manager
        .sign_in("g@example.com", VALID_PASSWORD)
        .await
        .expect_err("timeout");
    assert!(matches!(err, AuthError::ProviderUnavailable(_)));
    assert_eq!(manager.state().await, SessionState::Anonymous);
}

#[tokio::test]
async fn back_to_back_sign_ins_notify_once_per_actual_change() {
    let account = member("h@example.com", "H");
    let provider = Arc::new(TestIdentityProvider::ok(account.clone()));
    let manager = Arc::new(SessionManager::new(provider));
    let mut events = manager.subscribe();

    let valid = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.sign_in("h@example.com", VALID_PASSWORD).await })
    };
    let invalid = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.sign_in("h@example.com", "wrong password").await })
    };

    valid.await.expect("join").expect("valid sign in");
    invalid.await.expect("join").expect_err("invalid sign in");

    assert_eq!(
        manager.state().await,
        SessionState::Authenticated(account.clone())
    );
    assert_eq!(drain(&mut events), vec![SessionState::Authenticated(account)]);
}

#[tokio::test]
async fn sign_out_is_anonymous_even_when_revoke_fails() {
    let account = member("i@example.com", "I");
    let provider = Arc::new(
        TestIdentityProvider::ok(account.clone())
            .with_revoke_error(AuthError::ProviderUnavailable("offline".into())),
    );
    let manager = SessionManager::new(provider);
    manager
        .sign_in("i@example.com", VALID_PASSWORD)
        .await
        .expect("sign in");

    let mut events = manager.subscribe();
    manager.sign_out().await;
    assert_eq!(manager.state().await, SessionState::Anonymous);
    assert_eq!(drain(&mut events), vec![SessionState::Anonymous]);

    // Already anonymous: a second sign-out changes nothing and emits nothing.
    manager.sign_out().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn external_revocation_forces_anonymous_exactly_once() {
    let account = member("j@example.com", "J");
    let provider = Arc::new(TestIdentityProvider::ok(account.clone()));
    let manager = SessionManager::new(provider);
    manager
        .sign_in("j@example.com", VALID_PASSWORD)
        .await
        .expect("sign in");

    let mut events = manager.subscribe();
    manager.handle_credential_revoked().await;
    manager.handle_credential_revoked().await;

    assert_eq!(manager.state().await, SessionState::Anonymous);
    assert_eq!(drain(&mut events), vec![SessionState::Anonymous]);
}

#[tokio::test]
async fn revocation_watch_clears_the_session() {
    let account = member("k@example.com", "K");
    let provider = Arc::new(TestIdentityProvider::ok(account.clone()));
    let manager = Arc::new(SessionManager::new(provider));
    manager
        .sign_in("k@example.com", VALID_PASSWORD)
        .await
        .expect("sign in");

    let (revocations, _keepalive) = {
        let (tx, rx) = broadcast::channel(4);
        (rx, tx)
    };
    let watch = manager.watch_revocations(revocations);

    _keepalive.send(()).expect("push revocation");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while manager.state().await != SessionState::Anonymous {
        assert!(
            tokio::time::Instant::now() < deadline,
            "revocation was never observed"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    watch.abort();
}

#[tokio::test]
async fn slow_subscriber_sees_lag_instead_of_silent_loss() {
    let account = member("m@example.com", "M");
    let provider = Arc::new(TestIdentityProvider::ok(account));
    let manager = SessionManager::new(provider);
    let mut events = manager.subscribe();

    // Overrun the per-receiver buffer without ever receiving.
    for _ in 0..200 {
        manager
            .sign_in("m@example.com", VALID_PASSWORD)
            .await
            .expect("sign in");
        manager.sign_out().await;
    }

    assert!(matches!(events.try_recv(), Err(TryRecvError::Lagged(_))));
}

#[tokio::test]
async fn subscribers_observe_transitions_in_order() {
    let account = member("l@example.com", "L");
    let provider = Arc::new(TestIdentityProvider::ok(account.clone()));
    let manager = SessionManager::new(provider);
    let mut events = manager.subscribe();

    let created = manager
        .sign_up("lena@example.com", "long enough", "Lena")
        .await
        .expect("sign up");
    manager.sign_out().await;
    manager
        .sign_in("l@example.com", VALID_PASSWORD)
        .await
        .expect("sign in");

    assert_eq!(
        drain(&mut events),
        vec![
            SessionState::Authenticated(created),
            SessionState::Anonymous,
            SessionState::Authenticated(account),
        ]
    );
}
