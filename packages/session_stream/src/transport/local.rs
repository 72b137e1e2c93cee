//! In-process transport.
//!
//! Delivers published events straight to bound callbacks on the caller's
//! thread. Used for offline/local runs and as the test double for the channel
//! manager, so it also keeps counters and the callbacks that were unbound.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{ChannelHandle, Transport, TransportError, WireCallback};

type Bindings = Vec<(String, WireCallback)>;

#[derive(Default)]
struct LocalState {
    open: HashMap<String, Bindings>,
    /// Callbacks removed by unbind/unsubscribe, kept to simulate in-flight
    /// deliveries that race a teardown.
    retired: HashMap<String, Bindings>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    peak_open: usize,
    reject_next: Option<String>,
}

impl LocalState {
    fn retire(&mut self, channel: &str) {
        if let Some(bindings) = self.open.get_mut(channel) {
            let drained: Bindings = bindings.drain(..).collect();
            self.retired
                .entry(channel.to_string())
                .or_default()
                .extend(drained);
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalTransport {
    state: Arc<Mutex<LocalState>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `event` on `channel`. Returns how many callbacks ran; zero when
    /// the channel is not open.
    pub fn publish(&self, channel: &str, event: &str, payload: Value) -> usize {
        let callbacks = matching(self.lock().open.get(channel), event);
        invoke(callbacks, payload)
    }

    /// Deliver `event` to callbacks that were already unbound from `channel`,
    /// as a transport with an in-flight frame would.
    pub fn deliver_late(&self, channel: &str, event: &str, payload: Value) -> usize {
        let callbacks = matching(self.lock().retired.get(channel), event);
        invoke(callbacks, payload)
    }

    /// Make the next `subscribe` fail with `reason`.
    pub fn reject_next_subscribe(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }

    /// Currently open channels, sorted.
    pub fn open_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.lock().open.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Highest number of simultaneously open channels seen so far.
    pub fn peak_open_channels(&self) -> usize {
        self.lock().peak_open
    }

    /// Event names with at least one live callback on `channel`, sorted.
    pub fn bound_events(&self, channel: &str) -> Vec<String> {
        let state = self.lock();
        let mut events: Vec<String> = state
            .open
            .get(channel)
            .map(|bindings| bindings.iter().map(|(event, _)| event.clone()).collect())
            .unwrap_or_default();
        events.sort();
        events.dedup();
        events
    }

    pub fn binding_count(&self, channel: &str) -> usize {
        self.lock().open.get(channel).map_or(0, Vec::len)
    }
}

fn matching(bindings: Option<&Bindings>, event: &str) -> Vec<WireCallback> {
    bindings
        .map(|bindings| {
            bindings
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, callback)| callback.clone())
                .collect()
        })
        .unwrap_or_default()
}

// Runs outside the state lock so callbacks may call back into the transport.
fn invoke(callbacks: Vec<WireCallback>, payload: Value) -> usize {
    let count = callbacks.len();
    for callback in callbacks {
        callback(payload.clone());
    }
    count
}

struct LocalChannel {
    name: String,
    state: Arc<Mutex<LocalState>>,
}

impl ChannelHandle for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, event: &str, callback: WireCallback) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.open.get_mut(&self.name) {
            Some(bindings) => bindings.push((event.to_string(), callback)),
            None => debug!(channel = %self.name, event = %event, "bind on closed channel ignored"),
        }
    }

    fn unbind_all(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retire(&self.name);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChannelHandle>, TransportError> {
        let mut state = self.lock();
        state.subscribe_calls += 1;
        if let Some(reason) = state.reject_next.take() {
            return Err(TransportError::Rejected {
                channel: channel.to_string(),
                reason,
            });
        }
        state.open.entry(channel.to_string()).or_default();
        state.peak_open = state.peak_open.max(state.open.len());
        debug!(channel = %channel, "local channel opened");

        Ok(Box::new(LocalChannel {
            name: channel.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.unsubscribe_calls += 1;
        state.retire(channel);
        state.open.remove(channel);
        debug!(channel = %channel, "local channel closed");
        Ok(())
    }
}
