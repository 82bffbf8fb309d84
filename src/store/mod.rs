//! Ephemeral voting state: verified sessions and voting locks.
//!
//! Every mutation is a single atomic operation on the store, so two requests
//! for the same voter can never both observe "free" and both proceed.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    session::{SessionToken, VerifiedSession},
    voter::{VoterKey, VoterProfile},
};

mod memory;
mod mongo;

pub use memory::MemorySessionStore;
pub use mongo::MongoSessionStore;

/// Storage for verified sessions and voting locks.
///
/// Sessions and locks older than the store's time-to-live are treated as
/// absent by every operation, whether or not they have been swept yet.
#[rocket::async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically create a verified session for `key`, returning its token.
    ///
    /// Fails with [`crate::error::Error::SessionInProgress`] if the voter
    /// already holds a live session or voting lock.
    async fn begin_verified_session(
        &self,
        key: &VoterKey,
        profile: &VoterProfile,
        now: DateTime<Utc>,
    ) -> Result<SessionToken>;

    /// Look up a session by token. Does not check expiry.
    async fn verified_session(&self, token: &SessionToken) -> Result<Option<VerifiedSession>>;

    /// Remove a session. Removing an unknown session is not an error.
    async fn end_session(&self, token: &SessionToken) -> Result<()>;

    /// Test-and-set the voting lock for `key`, stamping it with `now`. Returns
    /// false if it is held.
    async fn try_acquire_lock(&self, key: &VoterKey, now: DateTime<Utc>) -> Result<bool>;

    /// Release the lock for `key` taken at `acquired_at`. A lock that has since
    /// been taken over by another holder is left alone.
    async fn release_lock(&self, key: &VoterKey, acquired_at: DateTime<Utc>) -> Result<()>;

    /// Remove every session and lock that has expired by `now`.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport>;

    /// Remove everything.
    async fn clear(&self) -> Result<()>;
}

/// Counts of items reclaimed by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub locks: u64,
}

/// Proof of holding the voting lock for one voter.
///
/// Obtained only from [`VotingLock::acquire`], and the only way into the
/// commit step. Call [`VotingLock::release`] when done; a lock dropped without
/// being released is released in the background instead.
#[must_use = "the voting lock is released as soon as it is dropped"]
pub struct VotingLock {
    store: Arc<dyn SessionStore>,
    key: VoterKey,
    acquired_at: DateTime<Utc>,
    held: bool,
}

impl VotingLock {
    /// Try to take the voting lock for `key`. Returns `None` if another
    /// submission holds it.
    pub async fn acquire(
        store: &Arc<dyn SessionStore>,
        key: &VoterKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>> {
        if !store.try_acquire_lock(key, now).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            store: store.clone(),
            key: key.clone(),
            acquired_at: now,
            held: true,
        }))
    }

    pub fn key(&self) -> &VoterKey {
        &self.key
    }

    /// Release the lock.
    pub async fn release(mut self) -> Result<()> {
        self.held = false;
        self.store.release_lock(&self.key, self.acquired_at).await
    }
}

impl Drop for VotingLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let key = self.key.clone();
        let acquired_at = self.acquired_at;
        warn!("Voting lock for {} dropped without release", key.short());
        let store = self.store.clone();
        match rocket::tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(&key, acquired_at).await {
                        error!("Failed to release voting lock for {}: {e}", key.short());
                    }
                });
            }
            // The sweeper reclaims it once it expires.
            Err(_) => error!("No runtime to release voting lock for {}", key.short()),
        }
    }
}
