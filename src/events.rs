//! The event stream emitted while rendering.
//!
//! Listeners are invoked synchronously on the rendering thread, in registration order. UI layers
//! subscribe to mirror pipeline progress; nothing in the pipeline depends on listeners being
//! present.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::engine::Voice;
use crate::keys::{PhraseKey, PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::Query;
use crate::score::TrackId;

/// The outcome of one rendering stage for one phrase.
#[derive(Debug, Clone)]
pub enum StageOutcome<K, A> {
    Success { key: K, artifact: A },
    Error { cause: Arc<anyhow::Error> },
}

impl<K, A> StageOutcome<K, A> {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }
}

pub type QueryOutcome = StageOutcome<QueryKey, Arc<Query>>;
pub type PitchOutcome = StageOutcome<PitchKey, Arc<Vec<f64>>>;
pub type VolumeOutcome = StageOutcome<VolumeKey, Arc<Vec<f64>>>;
pub type VoiceOutcome = StageOutcome<VoiceKey, Arc<Voice>>;

/// Progress events emitted during a render, in the order the work happens.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    RenderingStarted,
    /// Emitted once per render, when the first task that wasn't served from cache starts (or when
    /// the run finishes without one). `phrase_keys` lists every phrase that had artifacts loaded
    /// from cache up to that point.
    CacheLoadFinished { phrase_keys: HashSet<PhraseKey> },
    /// Query generation began for the first phrase of this track.
    TrackQueryGenerationStarted { track_id: TrackId },
    /// Query generation finished for every phrase of this track. The per-phrase results are
    /// delivered together, before any of the track's downstream pitch events.
    TrackQueryGenerationFinished {
        track_id: TrackId,
        results: Vec<(PhraseKey, QueryOutcome)>,
    },
    PitchGenerationStarted {
        phrase_key: PhraseKey,
    },
    PitchGenerationFinished {
        phrase_key: PhraseKey,
        result: PitchOutcome,
    },
    VolumeGenerationStarted {
        phrase_key: PhraseKey,
    },
    VolumeGenerationFinished {
        phrase_key: PhraseKey,
        result: VolumeOutcome,
    },
    VoiceSynthesisStarted {
        phrase_key: PhraseKey,
    },
    VoiceSynthesisFinished {
        phrase_key: PhraseKey,
        result: VoiceOutcome,
    },
    RenderingCompleted,
}

/// Handle returned by [`EventBus::add_listener()`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("no listener is registered under this id")]
    UnknownListener,
}

/// Synchronous fan-out to registered listeners. Dispatch happens on the thread that emits, with
/// listeners invoked in registration order.
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Box<dyn Fn(&RenderEvent) + Send>)>>,
    next_listener_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus {
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }
}

impl EventBus {
    pub fn add_listener(&self, listener: impl Fn(&RenderEvent) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), EventBusError> {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|(listener_id, _)| *listener_id == id) {
            Some(index) => {
                listeners.remove(index);
                Ok(())
            }
            None => Err(EventBusError::UnknownListener),
        }
    }

    pub fn emit(&self, event: &RenderEvent) {
        for (_, listener) in self.listeners.lock().iter() {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = order.clone();
            bus.add_listener(move |_| order.lock().push(tag));
        }
        bus.emit(&RenderEvent::RenderingStarted);

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_removed_listener_no_longer_fires() {
        let bus = EventBus::default();
        let fired = Arc::new(Mutex::new(0));

        let fired_in_listener = fired.clone();
        let id = bus.add_listener(move |_| *fired_in_listener.lock() += 1);
        bus.emit(&RenderEvent::RenderingStarted);
        bus.remove_listener(id).unwrap();
        bus.emit(&RenderEvent::RenderingStarted);

        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn test_removing_absent_listener_errors() {
        let bus = EventBus::default();
        let id = bus.add_listener(|_| ());
        bus.remove_listener(id).unwrap();

        assert_eq!(bus.remove_listener(id), Err(EventBusError::UnknownListener));
    }
}
