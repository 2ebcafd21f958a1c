//! The session actor: the event loop that owns all mutable state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admin::AdminOverrideManager;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::model::{Generation, Role, Session, SignupMetadata, User};
use crate::profile::{ProfileReconciler, ReconcileOutcome};
use crate::provider::{AuthEvent, IdentityProvider};
use crate::recovery::RecoveryCache;
use crate::session::{DegradedKind, SessionSnapshot, SessionState};

/// Serialized user-initiated operation.
pub(crate) enum UserAction {
    SignIn {
        email: String,
        password: String,
    },
    SignUp {
        email: String,
        password: String,
        metadata: Option<SignupMetadata>,
    },
    SignInWithOAuth {
        provider: String,
    },
    SignOut,
    ResetPassword {
        email: String,
    },
    UpdatePassword {
        new_password: String,
    },
    Refresh,
}

impl UserAction {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            UserAction::SignIn { .. } => "sign_in",
            UserAction::SignUp { .. } => "sign_up",
            UserAction::SignInWithOAuth { .. } => "sign_in_with_oauth",
            UserAction::SignOut => "sign_out",
            UserAction::ResetPassword { .. } => "reset_password",
            UserAction::UpdatePassword { .. } => "update_password",
            UserAction::Refresh => "refresh",
        }
    }
}

/// What a completed action did, as reported by the provider.
pub(crate) enum ActionOutcome {
    SignedIn { session: Session, user: User },
    SignedUp { session: Option<Session>, user: Option<User> },
    SignedOut,
    OAuthStarted,
    PasswordResetRequested,
    PasswordUpdated { session: Session },
    Refreshed { session: Session },
}

/// Mailbox message for the actor.
pub(crate) enum Msg {
    Initialize {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Action {
        action: UserAction,
        reply: oneshot::Sender<Result<SessionSnapshot>>,
    },
    ActionDone {
        result: Result<ActionOutcome>,
        reply: oneshot::Sender<Result<SessionSnapshot>>,
    },
    Provider(AuthEvent),
    TimerFired(Generation),
    BootstrapResolved {
        generation: Generation,
        result: Result<Option<(Session, User)>>,
    },
    ReconcileDone {
        generation: Generation,
        session: Option<Session>,
        user: User,
        outcome: ReconcileOutcome,
    },
    ReconcileAborted {
        generation: Generation,
    },
    Shutdown,
}

pub(crate) struct SessionActor {
    provider: Arc<dyn IdentityProvider>,
    reconciler: Arc<ProfileReconciler>,
    cache: RecoveryCache,
    overrides: Option<Arc<AdminOverrideManager>>,
    config: WardenConfig,
    mailbox: mpsc::Receiver<Msg>,
    self_tx: mpsc::Sender<Msg>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    reconciling_tx: watch::Sender<bool>,
    snapshot: SessionSnapshot,
    generation: Generation,
    action_in_flight: bool,
    init_waiters: Vec<oneshot::Sender<SessionSnapshot>>,
    timer: Option<JoinHandle<()>>,
    resolve_task: Option<JoinHandle<()>>,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        provider: Arc<dyn IdentityProvider>,
        reconciler: Arc<ProfileReconciler>,
        cache: RecoveryCache,
        overrides: Option<Arc<AdminOverrideManager>>,
        config: WardenConfig,
        mailbox: mpsc::Receiver<Msg>,
        self_tx: mpsc::Sender<Msg>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        reconciling_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            provider,
            reconciler,
            cache,
            overrides,
            config,
            mailbox,
            self_tx,
            snapshot_tx,
            reconciling_tx,
            snapshot: SessionSnapshot::default(),
            generation: Generation::default(),
            action_in_flight: false,
            init_waiters: Vec::new(),
            timer: None,
            resolve_task: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Session store started");
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                Msg::Initialize { reply } => self.handle_initialize(reply).await,
                Msg::Action { action, reply } => self.handle_action(action, reply),
                Msg::ActionDone { result, reply } => self.handle_action_done(result, reply).await,
                Msg::Provider(event) => self.handle_provider_event(event).await,
                Msg::TimerFired(generation) => self.handle_timer_fired(generation).await,
                Msg::BootstrapResolved { generation, result } => {
                    self.handle_bootstrap(generation, result).await
                }
                Msg::ReconcileDone {
                    generation,
                    session,
                    user,
                    outcome,
                } => self.handle_reconcile_done(generation, session, user, outcome).await,
                Msg::ReconcileAborted { generation } => self.handle_reconcile_aborted(generation),
                Msg::Shutdown => break,
            }
        }
        self.cancel_timer();
        self.abort_resolve();
        debug!("Session store stopped");
    }

    // === Initialization ===

    async fn handle_initialize(&mut self, reply: oneshot::Sender<SessionSnapshot>) {
        match self.snapshot.state {
            SessionState::Uninitialized => {
                self.init_waiters.push(reply);
                self.begin_initialization().await;
            }
            SessionState::Initializing | SessionState::Recovering => {
                // Collapse onto the in-flight attempt.
                self.init_waiters.push(reply);
            }
            _ => {
                let _ = reply.send(self.snapshot.clone());
            }
        }
    }

    async fn begin_initialization(&mut self) {
        self.generation = self.generation.next();
        let generation = self.generation;
        info!(%generation, "Session initialization started");

        self.snapshot.state = SessionState::Initializing;
        self.snapshot.error = None;
        self.publish().await;
        self.set_reconciling(true);
        self.arm_safety_timer(generation);

        let provider = Arc::clone(&self.provider);
        let tx = self.self_tx.clone();
        self.resolve_task = Some(tokio::spawn(async move {
            let result = async {
                match provider.get_session().await? {
                    None => Ok(None),
                    Some(session) => {
                        let user = provider.get_user().await?.ok_or_else(|| {
                            WardenError::provider_unavailable(
                                "get_user",
                                "provider has a session but no user",
                            )
                        })?;
                        Ok(Some((session, user)))
                    }
                }
            }
            .await;
            let _ = tx.send(Msg::BootstrapResolved { generation, result }).await;
        }));
    }

    async fn handle_bootstrap(
        &mut self,
        generation: Generation,
        result: Result<Option<(Session, User)>>,
    ) {
        if generation < self.generation {
            debug!(%generation, current = %self.generation, "Discarding stale bootstrap result");
            return;
        }
        if self.snapshot.state != SessionState::Initializing {
            return;
        }
        match result {
            Ok(None) => {
                info!("No active provider session");
                self.clear_identity();
                self.settle(SessionState::Unauthenticated).await;
            }
            Ok(Some((session, user))) => {
                debug!(user_id = %user.id, "Provider session resolved, reconciling profile");
                self.snapshot.session = Some(session.clone());
                self.snapshot.user = Some(user.clone());
                self.spawn_reconcile(generation, Some(session), user);
            }
            Err(e) => {
                warn!(error = %e, "Provider unavailable during initialization");
                self.enter_recovery(DegradedKind::ProviderUnavailable).await;
            }
        }
    }

    async fn handle_timer_fired(&mut self, generation: Generation) {
        if generation < self.generation {
            return;
        }
        if self.snapshot.state != SessionState::Initializing {
            return;
        }
        warn!(
            timeout_ms = self.config.safety_timeout_ms,
            "Safety timeout fired before initialization settled"
        );
        self.enter_recovery(DegradedKind::InitializationTimeout).await;
    }

    /// Force a terminal decision from the recovery cache.
    ///
    /// Advances the generation so a racing in-flight result cannot reopen
    /// the decision after it settles.
    async fn enter_recovery(&mut self, kind: DegradedKind) {
        self.generation = self.generation.next();
        self.abort_resolve();
        self.snapshot.state = SessionState::Recovering;
        self.publish().await;

        let lookup = match self.snapshot.user.as_ref() {
            Some(user) => self.cache.get(&user.id).await,
            None => self.cache.latest().await,
        };
        match lookup {
            Ok(Some(entry)) => {
                info!(
                    user_id = %entry.user_id,
                    cached_at = %entry.cached_at,
                    "Recovered last-known-good session state"
                );
                self.snapshot.user = Some(entry.user);
                self.snapshot.profile = entry.profile;
                self.snapshot.session = None;
                self.snapshot.degraded = true;
                self.snapshot.error = Some(kind.describe().to_string());
                self.settle(SessionState::Authenticated).await;
            }
            Ok(None) => {
                warn!("No recovery snapshot available");
                self.fail_recovery(kind).await;
            }
            Err(e) => {
                warn!(error = %e, "Recovery cache unreadable");
                self.fail_recovery(kind).await;
            }
        }
    }

    async fn fail_recovery(&mut self, kind: DegradedKind) {
        self.clear_identity();
        self.snapshot.degraded = true;
        self.snapshot.error = Some(kind.describe().to_string());
        self.settle(SessionState::Degraded(kind)).await;
    }

    // === Reconciliation ===

    fn spawn_reconcile(&mut self, generation: Generation, session: Option<Session>, user: User) {
        self.set_reconciling(true);
        let reconciler = Arc::clone(&self.reconciler);
        let tx = self.self_tx.clone();
        self.resolve_task = Some(tokio::spawn(async move {
            let outcome = reconciler.ensure_profile(&user).await;
            let _ = tx
                .send(Msg::ReconcileDone {
                    generation,
                    session,
                    user,
                    outcome,
                })
                .await;
        }));
    }

    async fn handle_reconcile_done(
        &mut self,
        generation: Generation,
        session: Option<Session>,
        user: User,
        outcome: ReconcileOutcome,
    ) {
        if generation < self.generation {
            debug!(%generation, current = %self.generation, "Discarding stale reconciliation result");
            return;
        }

        let error = match &outcome {
            ReconcileOutcome::Fallback { attempts, .. } => Some(
                WardenError::ProfileTimeout {
                    user_id: user.id,
                    attempts: *attempts,
                }
                .to_string(),
            ),
            ReconcileOutcome::Fresh(_) => None,
        };

        self.snapshot.user = Some(user);
        if session.is_some() {
            self.snapshot.session = session;
        }
        self.snapshot.profile = Some(outcome.profile().clone());
        self.snapshot.degraded = false;
        self.snapshot.error = error;
        self.settle(SessionState::Authenticated).await;
    }

    fn handle_reconcile_aborted(&mut self, generation: Generation) {
        if generation < self.generation {
            return;
        }
        warn!("Reconciliation aborted, user could not be resolved");
        self.set_reconciling(false);
    }

    // === User actions ===

    fn handle_action(&mut self, action: UserAction, reply: oneshot::Sender<Result<SessionSnapshot>>) {
        if self.action_in_flight {
            let _ = reply.send(Err(WardenError::Busy {
                action: action.name(),
            }));
            return;
        }
        self.action_in_flight = true;
        debug!(action = action.name(), "Action started");

        // Signup details must be stashed before the provider call so the
        // first profile insert can pick them up.
        if let UserAction::SignUp {
            metadata: Some(metadata),
            ..
        } = &action
        {
            self.reconciler.stash_signup_metadata(metadata.clone());
        }

        let provider = Arc::clone(&self.provider);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = perform_action(provider.as_ref(), action).await;
            let _ = tx.send(Msg::ActionDone { result, reply }).await;
        });
    }

    async fn handle_action_done(
        &mut self,
        result: Result<ActionOutcome>,
        reply: oneshot::Sender<Result<SessionSnapshot>>,
    ) {
        self.action_in_flight = false;
        match result {
            Err(e) => {
                // Fatal only to this call; existing state is untouched.
                debug!(error = %e, "Action failed");
                let _ = reply.send(Err(e));
            }
            Ok(outcome) => {
                self.apply_action_outcome(outcome).await;
                let _ = reply.send(Ok(self.snapshot.clone()));
            }
        }
    }

    async fn apply_action_outcome(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::SignedIn { session, user } => {
                self.apply_signed_in(session, user).await;
            }
            ActionOutcome::SignedUp {
                session: Some(session),
                user: Some(user),
            } => {
                self.apply_signed_in(session, user).await;
            }
            ActionOutcome::SignedUp { session: None, .. } => {
                info!("Signed up, awaiting confirmation before first sign-in");
            }
            ActionOutcome::SignedUp {
                session: Some(_),
                user: None,
            } => {
                warn!("Provider returned a signup session but no user, ignoring");
            }
            ActionOutcome::SignedOut => {
                self.apply_signed_out().await;
            }
            ActionOutcome::OAuthStarted => {
                info!("OAuth redirect issued, session will arrive as a provider event");
            }
            ActionOutcome::PasswordResetRequested => {}
            ActionOutcome::PasswordUpdated { session } | ActionOutcome::Refreshed { session } => {
                self.snapshot.session = Some(session);
                self.publish().await;
            }
        }
    }

    async fn apply_signed_in(&mut self, session: Session, user: User) {
        self.generation = self.generation.next();
        let generation = self.generation;
        info!(user_id = %user.id, "Signed in");

        self.cancel_timer();
        self.snapshot.session = Some(session.clone());
        self.snapshot.user = Some(user.clone());
        // A different user may have signed in; their profile arrives with
        // the reconciliation result.
        self.snapshot.profile = None;
        self.snapshot.degraded = false;
        self.snapshot.error = None;
        self.snapshot.state = SessionState::Authenticated;
        self.publish().await;
        self.notify_init_waiters();
        self.spawn_reconcile(generation, Some(session), user);
    }

    async fn apply_signed_out(&mut self) {
        info!("Signed out");
        self.generation = self.generation.next();
        self.abort_resolve();
        self.cancel_timer();
        self.set_reconciling(false);
        self.clear_identity();
        self.snapshot.degraded = false;
        self.snapshot.error = None;
        self.settle(SessionState::Unauthenticated).await;
    }

    // === Provider events ===

    async fn handle_provider_event(&mut self, event: AuthEvent) {
        debug!(event = event.name(), "Provider event");
        match event {
            AuthEvent::SignedOut => self.apply_signed_out().await,
            AuthEvent::Reset => self.apply_reset().await,
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                if self.is_reconciling() {
                    debug!("Ignoring trigger, reconciliation already in flight");
                    return;
                }
                self.generation = self.generation.next();
                let generation = self.generation;
                self.snapshot.session = Some(session.clone());
                self.publish().await;
                self.set_reconciling(true);

                let provider = Arc::clone(&self.provider);
                let reconciler = Arc::clone(&self.reconciler);
                let tx = self.self_tx.clone();
                self.resolve_task = Some(tokio::spawn(async move {
                    match provider.get_user().await {
                        Ok(Some(user)) => {
                            let outcome = reconciler.ensure_profile(&user).await;
                            let _ = tx
                                .send(Msg::ReconcileDone {
                                    generation,
                                    session: Some(session),
                                    user,
                                    outcome,
                                })
                                .await;
                        }
                        Ok(None) => {
                            let _ = tx.send(Msg::ReconcileAborted { generation }).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "User fetch failed after provider event");
                            let _ = tx.send(Msg::ReconcileAborted { generation }).await;
                        }
                    }
                }));
            }
        }
    }

    /// Hard reset: back to `Uninitialized`, cancelling every in-flight
    /// reconciliation and timer. The recovery cache is left untouched.
    async fn apply_reset(&mut self) {
        warn!("Auth reset received, returning to uninitialized");
        self.generation = self.generation.next();
        self.abort_resolve();
        self.cancel_timer();
        self.set_reconciling(false);
        self.snapshot = SessionSnapshot::default();
        self.publish().await;
        self.notify_init_waiters();
    }

    // === Plumbing ===

    async fn settle(&mut self, state: SessionState) {
        self.snapshot.state = state;
        self.cancel_timer();
        self.set_reconciling(false);
        self.publish().await;
        self.notify_init_waiters();
    }

    async fn publish(&mut self) {
        self.snapshot.generation = self.generation;
        self.snapshot.is_admin = self.compute_is_admin().await;
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    async fn compute_is_admin(&self) -> bool {
        let role_admin = self
            .snapshot
            .profile
            .as_ref()
            .is_some_and(|p| p.role == Role::Admin);
        if role_admin {
            return true;
        }
        match (&self.overrides, &self.snapshot.user) {
            (Some(overrides), Some(user)) => overrides.has_valid_override(&user.email).await,
            _ => false,
        }
    }

    fn notify_init_waiters(&mut self) {
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(self.snapshot.clone());
        }
    }

    fn clear_identity(&mut self) {
        self.snapshot.user = None;
        self.snapshot.profile = None;
        self.snapshot.session = None;
    }

    fn arm_safety_timer(&mut self, generation: Generation) {
        self.cancel_timer();
        let timeout = self.config.safety_timeout();
        let tx = self.self_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Msg::TimerFired(generation)).await;
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn abort_resolve(&mut self) {
        if let Some(task) = self.resolve_task.take() {
            task.abort();
        }
    }

    fn set_reconciling(&self, value: bool) {
        self.reconciling_tx.send_replace(value);
    }

    fn is_reconciling(&self) -> bool {
        *self.reconciling_tx.borrow()
    }
}

async fn perform_action(
    provider: &dyn IdentityProvider,
    action: UserAction,
) -> Result<ActionOutcome> {
    match action {
        UserAction::SignIn { email, password } => {
            let session = provider.sign_in(&email, &password).await?;
            let user = provider.get_user().await?.ok_or_else(|| {
                WardenError::provider_unavailable("get_user", "no user after sign-in")
            })?;
            Ok(ActionOutcome::SignedIn { session, user })
        }
        UserAction::SignUp {
            email,
            password,
            metadata,
        } => {
            let session = provider.sign_up(&email, &password, metadata).await?;
            let user = match &session {
                Some(_) => provider.get_user().await?,
                None => None,
            };
            Ok(ActionOutcome::SignedUp { session, user })
        }
        UserAction::SignInWithOAuth { provider: name } => {
            provider.sign_in_with_oauth(&name).await?;
            Ok(ActionOutcome::OAuthStarted)
        }
        UserAction::SignOut => {
            provider.sign_out().await?;
            Ok(ActionOutcome::SignedOut)
        }
        UserAction::ResetPassword { email } => {
            provider.reset_password(&email).await?;
            Ok(ActionOutcome::PasswordResetRequested)
        }
        UserAction::UpdatePassword { new_password } => {
            let session = provider.update_password(&new_password).await?;
            Ok(ActionOutcome::PasswordUpdated { session })
        }
        UserAction::Refresh => {
            let session = provider.refresh_session().await?;
            Ok(ActionOutcome::Refreshed { session })
        }
    }
}
