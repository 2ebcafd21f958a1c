#![cfg(test)]

//! Configurable doubles for the engine's external collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Result, WardenError};
use crate::model::{Profile, Session, SignupMetadata, User, UserId};
use crate::profile::{ProfilePatch, ProfileRepository};
use crate::provider::{AuthEvent, IdentityProvider};

/// Scriptable identity provider.
#[derive(Debug)]
pub struct StubProvider {
    session: Mutex<Option<Session>>,
    user: Mutex<Option<User>>,
    reject_credentials: AtomicBool,
    fail_get_session: AtomicU32,
    get_session_calls: AtomicU32,
    sign_in_calls: AtomicU32,
    events: broadcast::Sender<AuthEvent>,
}

impl StubProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            user: Mutex::new(None),
            reject_credentials: AtomicBool::new(false),
            fail_get_session: AtomicU32::new(0),
            get_session_calls: AtomicU32::new(0),
            sign_in_calls: AtomicU32::new(0),
            events,
        }
    }

    pub fn session(token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    pub fn set_user(&self, user: Option<User>) {
        *self.user.lock() = user;
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Make the next `n` `get_session` calls fail as unavailable.
    pub fn fail_next_get_session(&self, n: u32) {
        self.fail_get_session.store(n, Ordering::SeqCst);
    }

    pub fn get_session_calls(&self) -> u32 {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> u32 {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<Session> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(WardenError::InvalidCredentials);
        }
        let session = Self::session("signed-in");
        *self.session.lock() = Some(session.clone());
        *self.user.lock() = Some(User::new(UserId::new(), email));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _metadata: Option<SignupMetadata>,
    ) -> Result<Option<Session>> {
        let session = Self::session("signed-up");
        *self.session.lock() = Some(session.clone());
        *self.user.lock() = Some(User::new(UserId::new(), email));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.lock() = None;
        *self.user.lock() = None;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.fail_get_session.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_get_session.store(failures - 1, Ordering::SeqCst);
            return Err(WardenError::provider_unavailable("get_session", "503"));
        }
        Ok(self.session.lock().clone())
    }

    async fn get_user(&self) -> Result<Option<User>> {
        Ok(self.user.lock().clone())
    }

    async fn refresh_session(&self) -> Result<Session> {
        match self.session.lock().clone() {
            Some(session) => Ok(session),
            None => Err(WardenError::provider_unavailable(
                "refresh_session",
                "no session to refresh",
            )),
        }
    }

    async fn sign_in_with_oauth(&self, _provider: &str) -> Result<()> {
        Ok(())
    }

    async fn reset_password(&self, _email: &str) -> Result<()> {
        Ok(())
    }

    async fn update_password(&self, _new_password: &str) -> Result<Session> {
        self.refresh_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Scriptable profile repository.
#[derive(Debug, Default)]
pub struct StubRepository {
    profiles: Mutex<HashMap<UserId, Profile>>,
    fail_gets: AtomicU32,
    fail_inserts: AtomicU32,
    get_calls: AtomicU32,
    insert_calls: AtomicU32,
}

impl StubRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, profile: Profile) {
        self.profiles.lock().insert(profile.id, profile);
    }

    /// Make the next `n` `get_by_id` calls fail as unavailable.
    pub fn fail_next_gets(&self, n: u32) {
        self.fail_gets.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `insert` calls fail as unavailable.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileRepository for StubRepository {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<Profile>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.fail_gets.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_gets
                .store(failures.saturating_sub(1), Ordering::SeqCst);
            return Err(WardenError::provider_unavailable("profiles.get", "timeout"));
        }
        Ok(self.profiles.lock().get(id).cloned())
    }

    async fn insert(&self, profile: Profile) -> Result<Profile> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.fail_inserts.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_inserts
                .store(failures.saturating_sub(1), Ordering::SeqCst);
            return Err(WardenError::provider_unavailable(
                "profiles.insert",
                "timeout",
            ));
        }
        self.profiles.lock().insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn update(&self, id: &UserId, patch: ProfilePatch) -> Result<Profile> {
        let mut profiles = self.profiles.lock();
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| WardenError::provider_unavailable("profiles.update", "missing row"))?;
        if let Some(email) = patch.email {
            profile.email = email;
        }
        if let Some(role) = patch.role {
            profile.role = role;
        }
        if let Some(status) = patch.status {
            profile.status = status;
        }
        profile.updated_at = chrono::Utc::now();
        Ok(profile.clone())
    }
}
