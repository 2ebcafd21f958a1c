//! Routing of provider push events into the session store mailbox.
//!
//! The router subscribes once to the provider stream and decides which
//! events are worth a reconciliation. Sign-out and reset always go through
//! immediately; sign-in and token-refresh triggers are dropped while a
//! reconciliation is already in flight and are debounced so a burst of
//! provider events costs at most one reconciliation per window.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::provider::AuthEvent;
use crate::session::Msg;

pub(crate) struct EventRouter {
    events: broadcast::Receiver<AuthEvent>,
    mailbox: mpsc::Sender<Msg>,
    reconciling: watch::Receiver<bool>,
    debounce_window: Duration,
}

impl EventRouter {
    pub(crate) fn new(
        events: broadcast::Receiver<AuthEvent>,
        mailbox: mpsc::Sender<Msg>,
        reconciling: watch::Receiver<bool>,
        debounce_window: Duration,
    ) -> Self {
        Self {
            events,
            mailbox,
            reconciling,
            debounce_window,
        }
    }

    /// Start the router, returning a join handle.
    ///
    /// The task ends when the provider stream closes or the store mailbox
    /// is gone.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        let mut last_trigger: Option<tokio::time::Instant> = None;

        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if !self.should_forward(&event, &mut last_trigger) {
                        continue;
                    }
                    if self.mailbox.send(Msg::Provider(event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event router stopped");
    }

    fn should_forward(
        &self,
        event: &AuthEvent,
        last_trigger: &mut Option<tokio::time::Instant>,
    ) -> bool {
        match event {
            // These short-circuit any in-flight work and always apply.
            AuthEvent::SignedOut | AuthEvent::Reset => true,
            AuthEvent::SignedIn(_) | AuthEvent::TokenRefreshed(_) => {
                if *self.reconciling.borrow() {
                    debug!(event = event.name(), "Dropping trigger, reconciliation in flight");
                    return false;
                }
                if let Some(at) = *last_trigger {
                    if at.elapsed() < self.debounce_window {
                        debug!(event = event.name(), "Dropping trigger within debounce window");
                        return false;
                    }
                }
                *last_trigger = Some(tokio::time::Instant::now());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;

    fn session() -> Session {
        Session {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    fn router_fixture(
        reconciling: bool,
    ) -> (
        broadcast::Sender<AuthEvent>,
        mpsc::Receiver<Msg>,
        watch::Sender<bool>,
        JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(16);
        let (flag_tx, flag_rx) = watch::channel(reconciling);
        let router = EventRouter::new(
            event_rx,
            mailbox_tx,
            flag_rx,
            Duration::from_secs(1),
        );
        let handle = router.spawn();
        (event_tx, mailbox_rx, flag_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_burst_debounced_to_one() {
        let (event_tx, mut mailbox_rx, _flag, handle) = router_fixture(false);

        event_tx.send(AuthEvent::TokenRefreshed(session())).unwrap();
        event_tx.send(AuthEvent::TokenRefreshed(session())).unwrap();
        drop(event_tx);
        handle.await.unwrap();

        let mut forwarded = 0;
        while mailbox_rx.recv().await.is_some() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_allowed_after_window() {
        let (event_tx, mut mailbox_rx, _flag, _handle) = router_fixture(false);

        event_tx.send(AuthEvent::SignedIn(session())).unwrap();
        assert!(matches!(mailbox_rx.recv().await, Some(Msg::Provider(_))));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        event_tx.send(AuthEvent::SignedIn(session())).unwrap();
        assert!(matches!(mailbox_rx.recv().await, Some(Msg::Provider(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_always_forwards() {
        let (event_tx, mut mailbox_rx, _flag, handle) = router_fixture(true);

        // Reconciling is set and both events land inside one window, but
        // sign-out and reset are never filtered.
        event_tx.send(AuthEvent::SignedOut).unwrap();
        event_tx.send(AuthEvent::Reset).unwrap();
        drop(event_tx);
        handle.await.unwrap();

        let mut forwarded = 0;
        while mailbox_rx.recv().await.is_some() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_dropped_while_reconciling() {
        let (event_tx, mut mailbox_rx, _flag, handle) = router_fixture(true);

        event_tx.send(AuthEvent::SignedIn(session())).unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert!(mailbox_rx.recv().await.is_none());
    }
}
