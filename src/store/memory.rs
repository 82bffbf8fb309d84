use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::model::{
    session::{is_stale, SessionToken, VerifiedSession},
    voter::{VoterKey, VoterProfile},
};

use super::{SessionStore, SweepReport};

/// A process-local [`SessionStore`] for single-instance deployments.
///
/// All state sits behind one mutex that is never held across an `.await`, so
/// each operation is atomic with respect to every other.
pub struct MemorySessionStore {
    ttl: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionToken, VerifiedSession>,
    /// Index from voter to their live session.
    tokens: HashMap<VoterKey, SessionToken>,
    /// Voting locks, with the time they were taken.
    locks: HashMap<VoterKey, DateTime<Utc>>,
}

impl State {
    fn remove_session(&mut self, token: &SessionToken) -> Option<VerifiedSession> {
        let session = self.sessions.remove(token)?;
        if self.tokens.get(&session.voter_key) == Some(token) {
            self.tokens.remove(&session.voter_key);
        }
        Some(session)
    }
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the maps half-updated
        // beyond a single insert/remove, so carry on with the data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[rocket::async_trait]
impl SessionStore for MemorySessionStore {
    async fn begin_verified_session(
        &self,
        key: &VoterKey,
        profile: &VoterProfile,
        now: DateTime<Utc>,
    ) -> Result<SessionToken> {
        let mut state = self.state();

        if let Some(locked_at) = state.locks.get(key) {
            if !is_stale(*locked_at, now, self.ttl) {
                return Err(Error::SessionInProgress);
            }
        }
        if let Some(token) = state.tokens.get(key).cloned() {
            let live = state
                .sessions
                .get(&token)
                .map_or(false, |session| !session.is_expired(now, self.ttl));
            if live {
                return Err(Error::SessionInProgress);
            }
            state.remove_session(&token);
        }

        let session = VerifiedSession::new(key.clone(), profile.clone(), now);
        let token = session.token.clone();
        state.tokens.insert(key.clone(), token.clone());
        state.sessions.insert(token.clone(), session);
        Ok(token)
    }

    async fn verified_session(&self, token: &SessionToken) -> Result<Option<VerifiedSession>> {
        Ok(self.state().sessions.get(token).cloned())
    }

    async fn end_session(&self, token: &SessionToken) -> Result<()> {
        self.state().remove_session(token);
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &VoterKey, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        match state.locks.get(key) {
            Some(locked_at) if !is_stale(*locked_at, now, self.ttl) => Ok(false),
            _ => {
                state.locks.insert(key.clone(), now);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &VoterKey, acquired_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        if state.locks.get(key) == Some(&acquired_at) {
            state.locks.remove(key);
        }
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut state = self.state();
        let ttl = self.ttl;

        let expired = state
            .sessions
            .values()
            .filter(|session| session.is_expired(now, ttl))
            .map(|session| session.token.clone())
            .collect::<Vec<_>>();
        for token in &expired {
            state.remove_session(token);
        }

        let locks_before = state.locks.len();
        state
            .locks
            .retain(|_, locked_at| !is_stale(*locked_at, now, ttl));

        Ok(SweepReport {
            sessions: expired.len() as u64,
            locks: (locks_before - state.locks.len()) as u64,
        })
    }

    async fn clear(&self) -> Result<()> {
        *self.state() = State::default();
        Ok(())
    }
}
