//! Integration tests for the session store lifecycle: sign-in/out, action
//! serialization, idempotent initialization, and provider push events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use warden_core::prelude::*;
use warden_core::profile::ProfilePatch;
use warden_core::recovery::RecoveryCache;
use warden_core::UserId;
use warden_store::MemoryStore;

/// Scriptable identity provider double.
#[derive(Debug)]
struct TestProvider {
    session: Mutex<Option<Session>>,
    user: Mutex<Option<User>>,
    wrong_password: AtomicBool,
    get_session_delay: Mutex<Option<Duration>>,
    sign_in_delay: Mutex<Option<Duration>>,
    get_session_calls: AtomicU32,
    get_user_calls: AtomicU32,
    events: broadcast::Sender<AuthEvent>,
}

impl TestProvider {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(None),
            user: Mutex::new(None),
            wrong_password: AtomicBool::new(false),
            get_session_delay: Mutex::new(None),
            sign_in_delay: Mutex::new(None),
            get_session_calls: AtomicU32::new(0),
            get_user_calls: AtomicU32::new(0),
            events,
        })
    }

    fn with_user(email: &str) -> Arc<Self> {
        let provider = Self::new();
        *provider.session.lock() = Some(token("tok-existing"));
        *provider.user.lock() = Some(User::new(UserId::new(), email));
        provider
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

fn token(value: &str) -> Session {
    Session {
        access_token: value.to_string(),
        refresh_token: None,
        expires_at: None,
    }
}

#[async_trait]
impl IdentityProvider for TestProvider {
    async fn sign_in(&self, email: &str, _password: &str) -> warden_core::Result<Session> {
        let delay = *self.sign_in_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.wrong_password.load(Ordering::SeqCst) {
            return Err(WardenError::InvalidCredentials);
        }
        let session = token("tok-signin");
        *self.session.lock() = Some(session.clone());
        *self.user.lock() = Some(User::new(UserId::new(), email));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _metadata: Option<warden_core::SignupMetadata>,
    ) -> warden_core::Result<Option<Session>> {
        let session = token("tok-signup");
        *self.session.lock() = Some(session.clone());
        *self.user.lock() = Some(User::new(UserId::new(), email));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> warden_core::Result<()> {
        *self.session.lock() = None;
        *self.user.lock() = None;
        Ok(())
    }

    async fn get_session(&self) -> warden_core::Result<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_session_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.session.lock().clone())
    }

    async fn get_user(&self) -> warden_core::Result<Option<User>> {
        self.get_user_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.user.lock().clone())
    }

    async fn refresh_session(&self) -> warden_core::Result<Session> {
        let session = token("tok-refreshed");
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_oauth(&self, _provider: &str) -> warden_core::Result<()> {
        Ok(())
    }

    async fn reset_password(&self, _email: &str) -> warden_core::Result<()> {
        Ok(())
    }

    async fn update_password(&self, _new_password: &str) -> warden_core::Result<Session> {
        let session = token("tok-newpass");
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// In-memory profile repository double.
#[derive(Debug, Default)]
struct TestRepository {
    profiles: Mutex<HashMap<UserId, Profile>>,
    get_delay: Mutex<Option<Duration>>,
    get_calls: AtomicU32,
}

#[async_trait]
impl ProfileRepository for TestRepository {
    async fn get_by_id(&self, id: &UserId) -> warden_core::Result<Option<Profile>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.profiles.lock().get(id).cloned())
    }

    async fn insert(&self, profile: Profile) -> warden_core::Result<Profile> {
        self.profiles.lock().insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn update(&self, id: &UserId, patch: ProfilePatch) -> warden_core::Result<Profile> {
        let mut profiles = self.profiles.lock();
        let profile = profiles.get_mut(id).ok_or(WardenError::ProviderUnavailable {
            operation: "profiles.update".to_string(),
            details: "missing row".to_string(),
        })?;
        if let Some(role) = patch.role {
            profile.role = role;
        }
        Ok(profile.clone())
    }
}

fn engine(provider: Arc<TestProvider>, repo: Arc<TestRepository>) -> SessionHandle {
    SessionStoreBuilder::new(provider, repo, Arc::new(MemoryStore::new())).spawn()
}

async fn wait_for_state(handle: &SessionHandle, state: SessionState) -> SessionSnapshot {
    let mut rx = handle.subscribe();
    loop {
        if rx.borrow_and_update().state == state {
            return rx.borrow().clone();
        }
        rx.changed().await.expect("store closed while waiting");
    }
}

async fn wait_for_profile(handle: &SessionHandle) -> SessionSnapshot {
    let mut rx = handle.subscribe();
    loop {
        if rx.borrow_and_update().profile.is_some() {
            return rx.borrow().clone();
        }
        rx.changed().await.expect("store closed while waiting");
    }
}

#[tokio::test(start_paused = true)]
async fn sign_in_success_authenticates() {
    let provider = TestProvider::new();
    let handle = engine(provider, Arc::new(TestRepository::default()));

    let snapshot = handle.sign_in("a@x.com", "pw").await.unwrap();

    assert_eq!(snapshot.state, SessionState::Authenticated);
    assert_eq!(snapshot.user.as_ref().unwrap().email, "a@x.com");
    assert!(snapshot.session.is_some());

    // Profile arrives best-effort shortly after.
    let snapshot = wait_for_profile(&handle).await;
    assert_eq!(snapshot.profile.unwrap().email, "a@x.com");

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn wrong_password_keeps_state() {
    let provider = TestProvider::new();
    provider.wrong_password.store(true, Ordering::SeqCst);
    let handle = engine(provider.clone(), Arc::new(TestRepository::default()));

    let initial = handle.initialize().await.unwrap();
    assert_eq!(initial.state, SessionState::Unauthenticated);

    let err = handle.sign_in("a@x.com", "nope").await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidCredentials));
    assert_eq!(handle.current().state, SessionState::Unauthenticated);
    assert!(handle.current().user.is_none());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_initialize_collapses_to_one_fetch() {
    let provider = TestProvider::with_user("a@x.com");
    *provider.get_session_delay.lock() = Some(Duration::from_millis(100));
    let handle = engine(provider.clone(), Arc::new(TestRepository::default()));

    let (a, b, c) = tokio::join!(handle.initialize(), handle.initialize(), handle.initialize());
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(a.state, SessionState::Authenticated);
    assert_eq!(b.state, a.state);
    assert_eq!(c.state, a.state);
    // One network fetch sequence for all three callers.
    assert_eq!(provider.get_session_calls.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn initialize_after_settling_is_a_no_op() {
    let provider = TestProvider::with_user("a@x.com");
    let handle = engine(provider.clone(), Arc::new(TestRepository::default()));

    handle.initialize().await.unwrap();
    handle.initialize().await.unwrap();

    assert_eq!(provider.get_session_calls.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_action_rejected_busy() {
    let provider = TestProvider::new();
    *provider.sign_in_delay.lock() = Some(Duration::from_millis(500));
    let handle = engine(provider, Arc::new(TestRepository::default()));

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.sign_in("a@x.com", "pw").await })
    };
    // Let the first action reach the provider.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = handle.sign_in("b@x.com", "pw").await.unwrap_err();
    assert!(matches!(err, WardenError::Busy { action: "sign_in" }));

    // The first caller is unaffected by the rejection.
    let snapshot = first.await.unwrap().unwrap();
    assert_eq!(snapshot.state, SessionState::Authenticated);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_the_triple() {
    let provider = TestProvider::with_user("a@x.com");
    let handle = engine(provider, Arc::new(TestRepository::default()));

    handle.initialize().await.unwrap();
    let snapshot = handle.sign_out().await.unwrap();

    assert_eq!(snapshot.state, SessionState::Unauthenticated);
    assert!(snapshot.user.is_none());
    assert!(snapshot.profile.is_none());
    assert!(snapshot.session.is_none());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_returns_to_uninitialized_and_keeps_cache() {
    let provider = TestProvider::with_user("a@x.com");
    let recovery_store = Arc::new(MemoryStore::new());
    let handle = SessionStoreBuilder::new(
        provider.clone(),
        Arc::new(TestRepository::default()),
        recovery_store.clone(),
    )
    .spawn();

    let snapshot = handle.initialize().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Authenticated);
    let user_id = snapshot.user.unwrap().id;

    // Reconciliation wrote a recovery snapshot.
    let cache = RecoveryCache::new(recovery_store.clone(), None);
    assert!(cache.get(&user_id).await.unwrap().is_some());

    provider.emit(AuthEvent::Reset);
    let snapshot = wait_for_state(&handle, SessionState::Uninitialized).await;
    assert!(snapshot.user.is_none());
    assert!(snapshot.session.is_none());

    // The reset left the recovery cache untouched.
    assert!(cache.get(&user_id).await.unwrap().is_some());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_burst_reconciles_once() {
    let provider = TestProvider::with_user("a@x.com");
    let handle = engine(provider.clone(), Arc::new(TestRepository::default()));

    handle.initialize().await.unwrap();
    let calls_before = provider.get_user_calls.load(Ordering::SeqCst);

    provider.emit(AuthEvent::TokenRefreshed(token("tok-r1")));
    provider.emit(AuthEvent::TokenRefreshed(token("tok-r2")));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let calls_after = provider.get_user_calls.load(Ordering::SeqCst);
    assert_eq!(calls_after - calls_before, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_reconciliation_never_overwrites_newer_state() {
    let provider = TestProvider::new();
    let repo = Arc::new(TestRepository::default());
    // Make the profile fetch slow enough to interleave a sign-out.
    *repo.get_delay.lock() = Some(Duration::from_secs(5));
    let handle = engine(provider.clone(), repo);

    let snapshot = handle.sign_in("a@x.com", "pw").await.unwrap();
    assert_eq!(snapshot.state, SessionState::Authenticated);

    // Sign-out arrives while the profile reconciliation is still in flight.
    provider.emit(AuthEvent::SignedOut);
    wait_for_state(&handle, SessionState::Unauthenticated).await;

    // Even after the slow result would have landed, it is discarded.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = handle.current();
    assert_eq!(snapshot.state, SessionState::Unauthenticated);
    assert!(snapshot.profile.is_none());
    assert!(snapshot.user.is_none());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn break_glass_override_elevates_without_admin_role() {
    let provider = TestProvider::with_user("ops@x.com");
    let overrides = Arc::new(AdminOverrideManager::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
    ));
    overrides.enable("ops@x.com", 1).await.unwrap();

    let handle = SessionStoreBuilder::new(
        provider,
        Arc::new(TestRepository::default()),
        Arc::new(MemoryStore::new()),
    )
    .with_override_manager(overrides.clone())
    .spawn();

    let snapshot = handle.initialize().await.unwrap();

    // The profile role is plain user, the override carries the elevation.
    assert_eq!(snapshot.profile.unwrap().role, Role::User);
    assert!(snapshot.is_admin);

    // Disabling the override takes effect at the next published snapshot.
    overrides.disable("ops@x.com").await.unwrap();
    let snapshot = handle.refresh().await.unwrap();
    assert!(!snapshot.is_admin);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_updates_session_copy() {
    let provider = TestProvider::with_user("a@x.com");
    let handle = engine(provider, Arc::new(TestRepository::default()));

    handle.initialize().await.unwrap();
    let snapshot = handle.refresh().await.unwrap();

    assert_eq!(snapshot.session.unwrap().access_token, "tok-refreshed");
    assert_eq!(snapshot.state, SessionState::Authenticated);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn password_actions_pass_through() {
    let provider = TestProvider::with_user("a@x.com");
    let handle = engine(provider, Arc::new(TestRepository::default()));

    handle.initialize().await.unwrap();

    let snapshot = handle.reset_password("a@x.com").await.unwrap();
    assert_eq!(snapshot.state, SessionState::Authenticated);

    let snapshot = handle.update_password("hunter2!").await.unwrap();
    assert_eq!(snapshot.session.unwrap().access_token, "tok-newpass");

    let snapshot = handle.sign_in_with_oauth("github").await.unwrap();
    assert_eq!(snapshot.state, SessionState::Authenticated);

    handle.shutdown().await;
}
