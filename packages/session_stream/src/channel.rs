//! Transport channel manager.
//!
//! Keeps at most one live subscription, to the active session's private
//! channel. Switching sessions is the only cancellation mechanism: the old
//! channel is unbound and unsubscribed (awaited) before the new one opens.
//!
//! State machine: `Idle -> Subscribing(id) -> Active(id)`. A failed subscribe
//! falls back to `Idle`; there is no retry.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bus::{EventBus, EventName, Handler};
use crate::config::ChannelConfig;
use crate::error::Error;
use crate::router::EventRouter;
use crate::transport::{ChannelHandle, Transport, TransportError, WireCallback};
use crate::types::SessionId;
use crate::wire::{ROUTED_EVENTS, WireEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribing(SessionId),
    Active(SessionId),
}

/// Outcome of [`SessionChannelManager::activate_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Activated,
    /// The session was already active; nothing was resubscribed.
    AlreadyActive,
    /// Subscribe failed. The manager is idle.
    Failed(TransportError),
}

impl Activation {
    pub fn is_active(&self) -> bool {
        !matches!(self, Activation::Failed(_))
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Activation::Failed(err) => Err(Error::Transport(err)),
            Activation::Activated | Activation::AlreadyActive => Ok(()),
        }
    }
}

/// One Active period.
struct Subscription {
    session: SessionId,
    channel: Box<dyn ChannelHandle>,
    cancel: CancellationToken,
    bound: Vec<String>,
}

pub struct SessionChannelManager {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    router: Arc<EventRouter>,
    config: ChannelConfig,
    /// Serializes transitions. Held across transport awaits.
    current: Mutex<Option<Subscription>>,
    state: RwLock<ChannelState>,
}

impl SessionChannelManager {
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, config: ChannelConfig) -> Self {
        let router = Arc::new(EventRouter::new(bus.clone()));
        Self {
            transport,
            bus,
            router,
            config,
            current: Mutex::new(None),
            state: RwLock::new(ChannelState::Idle),
        }
    }

    /// Make `session` the one live subscription.
    ///
    /// A no-op when it is already active. Any other active session is torn
    /// down first, and its unsubscribe completes before the new subscribe
    /// starts. Subscribe failures are logged and reported in the returned
    /// [`Activation`]; the manager is left idle.
    pub async fn activate_session(&self, session: impl Into<SessionId>) -> Activation {
        let session = session.into();
        let mut current = self.current.lock().await;

        if current.as_ref().is_some_and(|active| active.session == session) {
            debug!(session = %session, "session already active; skipping resubscribe");
            return Activation::AlreadyActive;
        }

        if let Some(previous) = current.take() {
            info!(from = %previous.session, to = %session, "switching session channel");
            self.close(previous).await;
        }

        self.set_state(ChannelState::Subscribing(session.clone()));
        let channel_name = self.config.channel_name(&session);

        let channel = match self.transport.subscribe(&channel_name).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(session = %session, channel = %channel_name, error = %err, "subscribe failed");
                self.set_state(ChannelState::Idle);
                return Activation::Failed(err);
            }
        };

        let cancel = CancellationToken::new();
        let bound = self.bind_events(channel.as_ref(), &cancel);
        debug!(session = %session, channel = %channel_name, events = bound.len(), "session channel bound");

        self.set_state(ChannelState::Active(session.clone()));
        *current = Some(Subscription {
            session,
            channel,
            cancel,
            bound,
        });
        Activation::Activated
    }

    /// Tear down `session` if it is the active one. Returns whether anything
    /// was torn down; a stale id is a no-op.
    pub async fn deactivate_session(&self, session: &SessionId) -> bool {
        let mut current = self.current.lock().await;
        match current.as_ref() {
            Some(active) if &active.session == session => {}
            Some(active) => {
                debug!(requested = %session, active = %active.session, "deactivate for inactive session ignored");
                return false;
            }
            None => {
                debug!(requested = %session, "deactivate with no active session ignored");
                return false;
            }
        }
        match current.take() {
            Some(subscription) => {
                self.close(subscription).await;
                true
            }
            None => false,
        }
    }

    /// Drop whatever subscription is live. Safe to call repeatedly.
    pub async fn teardown(&self) -> bool {
        match self.current.lock().await.take() {
            Some(subscription) => {
                self.close(subscription).await;
                true
            }
            None => false,
        }
    }

    async fn close(&self, subscription: Subscription) {
        let Subscription {
            session,
            channel,
            cancel,
            bound,
        } = subscription;

        cancel.cancel();
        channel.unbind_all();
        if let Err(err) = self.transport.unsubscribe(channel.name()).await {
            warn!(session = %session, channel = %channel.name(), error = %err, "unsubscribe failed");
        }
        debug!(session = %session, events = bound.len(), "session channel closed");
        self.set_state(ChannelState::Idle);
    }

    fn bind_events(&self, channel: &dyn ChannelHandle, cancel: &CancellationToken) -> Vec<String> {
        let mut bound: Vec<String> = Vec::new();
        let names = ROUTED_EVENTS
            .iter()
            .map(|name| name.to_string())
            .chain(self.config.notification_events.iter().cloned());

        for name in names {
            if bound.contains(&name) {
                continue;
            }
            channel.bind(&name, self.callback(name.clone(), cancel.clone()));
            bound.push(name);
        }
        bound
    }

    fn callback(&self, event: String, cancel: CancellationToken) -> WireCallback {
        let router = self.router.clone();
        Arc::new(move |payload| {
            if cancel.is_cancelled() {
                trace!(event = %event, "event for closed subscription dropped");
                return;
            }
            router.route(WireEvent::new(event.clone(), payload), &cancel);
        })
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn state(&self) -> ChannelState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        match self.state() {
            ChannelState::Active(session) => Some(session),
            ChannelState::Idle | ChannelState::Subscribing(_) => None,
        }
    }

    /// Wire event names bound for the active session, in bind order.
    pub async fn bound_events(&self) -> Vec<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|subscription| subscription.bound.clone())
            .unwrap_or_default()
    }

    pub fn on(&self, name: EventName, handler: Handler) {
        self.bus.on(name, handler);
    }

    pub fn off(&self, name: EventName, handler: &Handler) -> bool {
        self.bus.off(name, handler)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }
}

impl Drop for SessionChannelManager {
    fn drop(&mut self) {
        let Some(subscription) = self.current.get_mut().take() else {
            return;
        };
        subscription.cancel.cancel();
        subscription.channel.unbind_all();

        let channel = subscription.channel.name().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    if let Err(err) = transport.unsubscribe(&channel).await {
                        warn!(channel = %channel, error = %err, "unsubscribe on drop failed");
                    }
                });
            }
            Err(_) => {
                debug!(channel = %channel, "manager dropped outside a runtime; channel left to the transport");
            }
        }
    }
}
