use chrono::{DateTime, Duration, Utc};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    Database,
};

use crate::error::{Error, Result};
use crate::model::{
    db::{LockDoc, SessionDoc},
    mongodb::{is_duplicate_key, Coll},
    session::{SessionToken, VerifiedSession},
    voter::{VoterKey, VoterProfile},
};

use super::{SessionStore, SweepReport};

/// A [`SessionStore`] shared between server instances through MongoDB.
///
/// Test-and-set is an insert against a unique index: the `voter_key` index on
/// sessions and the `_id` of locks. Whichever insert lands first wins.
pub struct MongoSessionStore {
    sessions: Coll<SessionDoc>,
    locks: Coll<LockDoc>,
    ttl: Duration,
}

impl MongoSessionStore {
    pub fn new(db: &Database, ttl: Duration) -> Self {
        Self {
            sessions: Coll::from_db(db),
            locks: Coll::from_db(db),
            ttl,
        }
    }

    /// Anything created at or before this instant has expired by `now`.
    fn cutoff(&self, now: DateTime<Utc>) -> BsonDateTime {
        BsonDateTime::from_chrono(now - self.ttl)
    }
}

#[rocket::async_trait]
impl SessionStore for MongoSessionStore {
    async fn begin_verified_session(
        &self,
        key: &VoterKey,
        profile: &VoterProfile,
        now: DateTime<Utc>,
    ) -> Result<SessionToken> {
        let cutoff = self.cutoff(now);

        // Clear out this voter's expired session, if any, so it cannot block
        // the unique index.
        let stale = doc! {
            "voter_key": key.to_string(),
            "created_at": { "$lte": cutoff },
        };
        self.sessions.delete_many(stale, None).await?;

        // A live lock means a commit is in flight.
        let live_lock = doc! {
            "_id": key.to_string(),
            "acquired_at": { "$gt": cutoff },
        };
        if self.locks.find_one(live_lock, None).await?.is_some() {
            return Err(Error::SessionInProgress);
        }

        let session = VerifiedSession::new(key.clone(), profile.clone(), now);
        let token = session.token.clone();
        match self.sessions.insert_one(SessionDoc::from(session), None).await {
            Ok(_) => Ok(token),
            Err(e) if is_duplicate_key(&e) => Err(Error::SessionInProgress),
            Err(e) => Err(e.into()),
        }
    }

    async fn verified_session(&self, token: &SessionToken) -> Result<Option<VerifiedSession>> {
        let session = self
            .sessions
            .find_one(doc! { "_id": token.to_string() }, None)
            .await?;
        Ok(session.map(Into::into))
    }

    async fn end_session(&self, token: &SessionToken) -> Result<()> {
        self.sessions
            .delete_one(doc! { "_id": token.to_string() }, None)
            .await?;
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &VoterKey, now: DateTime<Utc>) -> Result<bool> {
        // Reclaim an abandoned lock first.
        let stale = doc! {
            "_id": key.to_string(),
            "acquired_at": { "$lte": self.cutoff(now) },
        };
        self.locks.delete_one(stale, None).await?;

        let lock = LockDoc {
            voter_key: key.clone(),
            acquired_at: now,
        };
        match self.locks.insert_one(lock, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self, key: &VoterKey, acquired_at: DateTime<Utc>) -> Result<()> {
        let held = doc! {
            "_id": key.to_string(),
            "acquired_at": BsonDateTime::from_chrono(acquired_at),
        };
        self.locks.delete_one(held, None).await?;
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = self.cutoff(now);
        let sessions = self
            .sessions
            .delete_many(doc! { "created_at": { "$lte": cutoff } }, None)
            .await?;
        let locks = self
            .locks
            .delete_many(doc! { "acquired_at": { "$lte": cutoff } }, None)
            .await?;
        Ok(SweepReport {
            sessions: sessions.deleted_count,
            locks: locks.deleted_count,
        })
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.delete_many(doc! {}, None).await?;
        self.locks.delete_many(doc! {}, None).await?;
        Ok(())
    }
}
