//! Connectivity observation
//!
//! The host platform pushes connectivity snapshots into a [`NetworkObserver`];
//! subscribers receive every change classified by [`classify`].

use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Link tier reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionClass {
    #[default]
    None,
    #[serde(rename = "cellular-2g")]
    Cellular2g,
    #[serde(rename = "cellular-3g")]
    Cellular3g,
    #[serde(rename = "cellular-4g")]
    Cellular4g,
    Wifi,
    Unknown,
}

impl ConnectionClass {
    /// Relative link quality. `Unknown` ranks with 3G.
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Cellular2g => 1,
            Self::Cellular3g | Self::Unknown => 2,
            Self::Cellular4g => 3,
            Self::Wifi => 4,
        }
    }

    /// 2G and 3G links.
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Cellular2g | Self::Cellular3g)
    }
}

/// Point-in-time connectivity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub connection_class: ConnectionClass,
    pub is_metered: bool,
}

impl ConnectivityState {
    pub const fn offline() -> Self {
        Self {
            is_connected: false,
            connection_class: ConnectionClass::None,
            is_metered: false,
        }
    }

    pub const fn online(connection_class: ConnectionClass, is_metered: bool) -> Self {
        Self {
            is_connected: true,
            connection_class,
            is_metered,
        }
    }

    /// Metered or degraded link; forwarded to fetches as a bandwidth hint.
    pub const fn is_constrained(&self) -> bool {
        self.is_metered || self.connection_class.is_degraded()
    }
}

/// Sync-relevant kind of a connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// First callback after subscribing
    Initial,
    /// Offline to online
    Reconnected,
    /// Online to a better connection class
    Upgraded,
    /// Online to offline
    WentOffline,
    /// Same or worse class, or offline to offline
    NoAction,
}

/// Classify a change from `previous` to `next`.
pub const fn classify(previous: &ConnectivityState, next: &ConnectivityState) -> Transition {
    match (previous.is_connected, next.is_connected) {
        (false, true) => Transition::Reconnected,
        (true, false) => Transition::WentOffline,
        (false, false) => Transition::NoAction,
        (true, true) => {
            if next.connection_class.rank() > previous.connection_class.rank() {
                Transition::Upgraded
            } else {
                Transition::NoAction
            }
        }
    }
}

/// Delivered to subscribers on every observer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub previous: ConnectivityState,
    pub current: ConnectivityState,
    pub transition: Transition,
}

type Callback = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Shared {
    state: watch::Sender<ConnectivityState>,
    subscribers: Mutex<Subscribers>,
}

/// Live connectivity snapshot plus transition subscriptions.
#[derive(Clone)]
pub struct NetworkObserver {
    shared: Arc<Shared>,
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new(ConnectivityState::offline())
    }
}

impl NetworkObserver {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                state,
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Last-known state. Never waits on I/O.
    pub fn current_state(&self) -> ConnectivityState {
        *self.shared.state.borrow()
    }

    /// Receiver that tracks every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.state.subscribe()
    }

    /// Record a platform callback and notify subscribers.
    pub fn update(&self, next: ConnectivityState) -> Transition {
        let previous = self.shared.state.send_replace(next);
        let transition = classify(&previous, &next);
        if previous != next {
            tracing::debug!(
                "Connectivity {:?} -> {:?} ({transition:?})",
                previous.connection_class,
                next.connection_class
            );
        }

        let event = ConnectivityEvent {
            previous,
            current: next,
            transition,
        };
        for callback in self.snapshot_callbacks() {
            callback(event);
        }
        transition
    }

    /// Register `callback`. It is invoked immediately with the current state
    /// (`Transition::Initial`) and then on every update until the returned
    /// handle is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let id = self.shared.subscribers.lock().ok().map(|mut subscribers| {
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.callbacks.push((id, Arc::clone(&callback)));
            id
        });

        let current = self.current_state();
        callback(ConnectivityEvent {
            previous: current,
            current,
            transition: Transition::Initial,
        });

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .map_or(0, |subscribers| subscribers.callbacks.len())
    }

    fn snapshot_callbacks(&self) -> Vec<Callback> {
        self.shared
            .subscribers
            .lock()
            .map(|subscribers| {
                subscribers
                    .callbacks
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Handle returned by [`NetworkObserver::subscribe`]. Unsubscribes on drop.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: Option<u64>,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(shared) = self.shared.upgrade() {
            if let Ok(mut subscribers) = shared.subscribers.lock() {
                subscribers.callbacks.retain(|(existing, _)| *existing != id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wifi() -> ConnectivityState {
        ConnectivityState::online(ConnectionClass::Wifi, false)
    }

    fn cellular(class: ConnectionClass) -> ConnectivityState {
        ConnectivityState::online(class, true)
    }

    #[test]
    fn classify_covers_every_transition_kind() {
        let offline = ConnectivityState::offline();
        assert_eq!(classify(&offline, &wifi()), Transition::Reconnected);
        assert_eq!(classify(&wifi(), &offline), Transition::WentOffline);
        assert_eq!(classify(&offline, &offline), Transition::NoAction);
        assert_eq!(
            classify(&cellular(ConnectionClass::Cellular3g), &wifi()),
            Transition::Upgraded
        );
        assert_eq!(
            classify(
                &cellular(ConnectionClass::Cellular2g),
                &cellular(ConnectionClass::Cellular4g)
            ),
            Transition::Upgraded
        );
        assert_eq!(
            classify(&wifi(), &cellular(ConnectionClass::Cellular4g)),
            Transition::NoAction
        );
        assert_eq!(classify(&wifi(), &wifi()), Transition::NoAction);
    }

    #[test]
    fn unknown_class_does_not_count_as_upgrade_from_3g() {
        assert_eq!(
            classify(
                &cellular(ConnectionClass::Cellular3g),
                &cellular(ConnectionClass::Unknown)
            ),
            Transition::NoAction
        );
    }

    #[test]
    fn constrained_links() {
        assert!(cellular(ConnectionClass::Cellular4g).is_constrained());
        assert!(ConnectivityState::online(ConnectionClass::Cellular2g, false).is_constrained());
        assert!(!wifi().is_constrained());
    }

    #[test]
    fn subscribe_delivers_current_state_immediately() {
        let observer = NetworkObserver::new(wifi());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = observer.subscribe(move |event| {
            sink.lock().unwrap().push(event.transition);
        });

        observer.update(ConnectivityState::offline());
        observer.update(wifi());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Transition::Initial,
                Transition::WentOffline,
                Transition::Reconnected
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let observer = NetworkObserver::default();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let subscription = observer.subscribe(move |_| {
            *sink.lock().unwrap() += 1;
        });
        assert_eq!(observer.subscriber_count(), 1);

        subscription.unsubscribe();
        observer.update(wifi());

        assert_eq!(observer.subscriber_count(), 0);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn current_state_tracks_updates() {
        let observer = NetworkObserver::default();
        assert!(!observer.current_state().is_connected);

        let mut receiver = observer.watch();
        observer.update(wifi());
        assert_eq!(observer.current_state(), wifi());
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), wifi());
    }
}
