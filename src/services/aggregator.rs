// src/services/aggregator.rs
use crate::errors::InferenceError;
use crate::models::{
    AnalysisResult, GenerationOutcome, SessionEvent, SessionId, SessionPhase, SessionSnapshot,
};
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Read model of the active session.
///
/// Every mutation is tagged with the session it belongs to; writes for any other
/// session are dropped, so late results from a cancelled session never leak into
/// the current one. Each outcome slot is written at most once.
pub struct ResultAggregator {
    state: Mutex<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SessionSnapshot::idle()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.lock().session_id
    }

    pub fn is_active(&self, session_id: SessionId) -> bool {
        self.active_session() == Some(session_id)
    }

    /// Discards whatever the previous session left behind and enters `Analyzing`.
    pub fn begin(&self, session_id: SessionId) {
        let mut state = self.lock();
        *state = SessionSnapshot {
            session_id: Some(session_id),
            phase: SessionPhase::Analyzing,
            ..SessionSnapshot::idle()
        };
        self.emit(SessionEvent::Started { session_id });
    }

    /// Drops the active session entirely; later writes tagged with it are ignored.
    pub fn reset(&self) {
        let mut state = self.lock();
        if let Some(session_id) = state.session_id {
            debug!("Resetting read model, abandoning session {}", session_id);
        }
        *state = SessionSnapshot::idle();
    }

    pub fn fail_analysis(&self, session_id: SessionId, error: &InferenceError) -> bool {
        let mut state = self.lock();
        if state.session_id != Some(session_id) || state.phase != SessionPhase::Analyzing {
            debug!("Ignoring analysis failure for inactive session {}", session_id);
            return false;
        }

        state.phase = SessionPhase::AnalysisFailed {
            kind: error.kind(),
            status: error.status(),
            message: error.to_string(),
        };
        self.emit(SessionEvent::AnalysisFailed {
            session_id,
            kind: error.kind(),
        });
        self.emit(SessionEvent::Finished {
            session_id,
            phase: state.phase.clone(),
        });
        true
    }

    /// Stores the analysis and one `Pending` outcome per item.
    pub fn seed(&self, session_id: SessionId, analysis: AnalysisResult) -> bool {
        let mut state = self.lock();
        if state.session_id != Some(session_id) || state.phase != SessionPhase::Analyzing {
            debug!("Ignoring seed for inactive session {}", session_id);
            return false;
        }

        let items = analysis.items.len();
        state.outcomes = vec![GenerationOutcome::Pending; items];
        state.analysis = Some(analysis);
        state.phase = if items == 0 {
            SessionPhase::Completed
        } else {
            SessionPhase::Synthesizing
        };

        self.emit(SessionEvent::Seeded { session_id, items });
        if items == 0 {
            info!("Session {} completed with no recommended items", session_id);
            self.emit(SessionEvent::Finished {
                session_id,
                phase: SessionPhase::Completed,
            });
        }
        true
    }

    /// Resolves one item. Returns `false` (and changes nothing) for a stale session,
    /// an out-of-range index, a `Pending` outcome, or an already resolved slot.
    pub fn record(&self, session_id: SessionId, index: usize, outcome: GenerationOutcome) -> bool {
        let mut state = self.lock();

        if state.session_id != Some(session_id) {
            debug!(
                "Dropping item {} result from superseded session {}",
                index, session_id
            );
            return false;
        }
        if outcome.is_pending() {
            warn!("Refusing to record Pending for item {}", index);
            return false;
        }
        let Some(slot) = state.outcomes.get_mut(index) else {
            warn!(
                "Item index {} outside seeded range for session {}",
                index, session_id
            );
            return false;
        };
        if !slot.is_pending() {
            debug!("Item {} of session {} already resolved", index, session_id);
            return false;
        }

        *slot = outcome.clone();
        match &outcome {
            GenerationOutcome::Failed { .. } => state.failed += 1,
            _ => state.completed += 1,
        }
        self.emit(SessionEvent::ItemResolved {
            session_id,
            index,
            outcome,
        });

        if state.completed + state.failed == state.outcomes.len() {
            state.phase = if state.failed > 0 {
                SessionPhase::PartiallyCompleted
            } else {
                SessionPhase::Completed
            };
            info!("Session {} finished: {:?}", session_id, state.phase);
            self.emit(SessionEvent::Finished {
                session_id,
                phase: state.phase.clone(),
            });
        }
        true
    }
}
