use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use base64::Engine as _;

use crate::models::Turn;

/// Bounded tail kept per session: 5 exchanges of user + assistant turns.
pub const MAX_HISTORY_TURNS: usize = 10;

/// Per-session conversation window. Injectable so a multi-instance
/// deployment can swap in an external store behind the same seam.
pub trait HistoryStore: Send + Sync {
    /// Returns the recorded tail for the key, oldest first. Unknown keys
    /// read as empty history.
    fn get(&self, session_key: &str) -> Vec<Turn>;

    /// Records one completed exchange. Eviction of the oldest turns and the
    /// insertion happen in one critical section, so the bound holds at
    /// every observable point and concurrent appends for one key cannot
    /// lose or duplicate an exchange.
    fn append(&self, session_key: &str, user_turn: Turn, assistant_turn: Turn);
}

/// Process-lifetime history table. Contents are lost on restart; that is
/// acceptable, there is no durability guarantee.
#[derive(Default)]
pub struct InMemoryHistory {
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Vec<Turn>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl HistoryStore for InMemoryHistory {
    fn get(&self, session_key: &str) -> Vec<Turn> {
        self.lock_sessions()
            .get(session_key)
            .cloned()
            .unwrap_or_default()
    }

    fn append(&self, session_key: &str, user_turn: Turn, assistant_turn: Turn) {
        let mut sessions = self.lock_sessions();
        let turns = sessions.entry(session_key.to_string()).or_default();
        turns.push(user_turn);
        turns.push(assistant_turn);
        if turns.len() > MAX_HISTORY_TURNS {
            let excess = turns.len() - MAX_HISTORY_TURNS;
            turns.drain(..excess);
        }
    }
}

/// Normalizes an opaque device/session token into a stable map key. A fixed
/// reversible encoding only; this has no security purpose.
pub fn session_key(raw: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
}
