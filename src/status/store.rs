//! Session store backends

use dashmap::DashMap;

use super::{AnalysisSession, SessionStore, SessionUpdate};

/// Process-lifetime store. Sessions are lost on restart.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, AnalysisSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, analysis_id: &str) -> Option<AnalysisSession> {
        self.sessions.get(analysis_id).map(|s| s.clone())
    }

    fn update(&self, analysis_id: &str, update: SessionUpdate) -> AnalysisSession {
        // The entry guard holds the shard lock, so concurrent updates to one
        // session apply one at a time
        let mut entry = self
            .sessions
            .entry(analysis_id.to_string())
            .or_insert_with(|| AnalysisSession::new(analysis_id));
        entry.apply(update);
        entry.clone()
    }
}
