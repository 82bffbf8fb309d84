use std::time::{Duration, Instant};

use mongodb::{
    bson::doc,
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, SessionOptions, UpdateOptions},
    Client, ClientSession, Database,
};
use rocket::tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{LedgerSnapshot, RollEntry, VoteTally},
    db::{RollDoc, TallyDoc},
    mongodb::{is_duplicate_key, Coll},
    voter::VoterKey,
};

use super::VoteLedger;

/// A [`VoteLedger`] stored in MongoDB.
///
/// Each commit is one multi-document transaction covering the roll insert and
/// every tally increment, so readers see both or neither. The roll's `_id` is
/// the voter key, so a second commit for the same voter fails on insert and
/// aborts before touching the tally. Commits by different voters for the same
/// candidate contend on one tally row; the loser of such a write conflict runs
/// its transaction again.
pub struct MongoVoteLedger {
    client: Client,
    roll: Coll<RollDoc>,
    tallies: Coll<TallyDoc>,
    /// Commits hold this shared, resets hold it exclusively.
    gate: RwLock<()>,
}

impl MongoVoteLedger {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            roll: Coll::from_db(db),
            tallies: Coll::from_db(db),
            gate: RwLock::new(()),
        }
    }

    /// One attempt at the vote transaction, committed on success.
    async fn write_vote(
        &self,
        session: &mut ClientSession,
        roll_doc: &RollDoc,
        entry: &RollEntry,
        deadline: Instant,
    ) -> std::result::Result<(), Aborted> {
        // The roll insert doubles as the "already voted" check.
        if let Err(e) = self
            .roll
            .insert_one_with_session(roll_doc, None, session)
            .await
        {
            return Err(if is_duplicate_key(&e) {
                Aborted::AlreadyVoted
            } else {
                Aborted::from(e)
            });
        }

        let upsert = UpdateOptions::builder().upsert(true).build();
        for (position, candidate) in entry.chosen() {
            let filter = doc! {
                "position": position,
                "candidate": candidate,
            };
            let update = doc! {
                "$inc": { "count": 1_i64 }
            };
            if let Err(e) = self
                .tallies
                .update_one_with_session(filter, update, upsert.clone(), session)
                .await
            {
                // Another commit created the same tally row first.
                return Err(if is_duplicate_key(&e) {
                    Aborted::Retry(e)
                } else {
                    Aborted::from(e)
                });
            }
        }

        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && Instant::now() < deadline => {}
                Err(e) => return Err(Aborted::from(e)),
            }
        }
    }
}

/// How long a vote transaction keeps being retried before giving up.
const COMMIT_RETRY_LIMIT: Duration = Duration::from_secs(30);

/// Why a vote transaction did not commit.
enum Aborted {
    /// The voter is already on the roll.
    AlreadyVoted,
    /// Lost a race with a concurrent commit; running it again may succeed.
    Retry(DbError),
    Failed(DbError),
}

impl From<DbError> for Aborted {
    fn from(e: DbError) -> Self {
        if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            Self::Retry(e)
        } else {
            Self::Failed(e)
        }
    }
}

#[rocket::async_trait]
impl VoteLedger for MongoVoteLedger {
    async fn has_voted(&self, key: &VoterKey) -> Result<bool> {
        let entry = self
            .roll
            .find_one(doc! { "_id": key.to_string() }, None)
            .await?;
        Ok(entry.is_some())
    }

    async fn commit_vote(&self, entry: &RollEntry) -> Result<()> {
        let _gate = self.gate.read().await;

        let roll_doc = RollDoc::from(entry.clone());
        let mut session = self.client.start_session(None).await?;
        let deadline = Instant::now() + COMMIT_RETRY_LIMIT;
        let mut attempt = 1;
        loop {
            session.start_transaction(None).await?;
            let result = self
                .write_vote(&mut session, &roll_doc, entry, deadline)
                .await;
            let aborted = match result {
                Ok(()) => return Ok(()),
                Err(aborted) => aborted,
            };
            // The server has usually aborted already; this is just tidying up.
            let _ = session.abort_transaction().await;

            match aborted {
                Aborted::AlreadyVoted => return Err(Error::AlreadyVoted),
                Aborted::Retry(e) if Instant::now() < deadline => {
                    debug!(
                        "Retrying vote for {} after attempt {attempt}: {e}",
                        entry.voter_key.short()
                    );
                    attempt += 1;
                }
                Aborted::Retry(e) | Aborted::Failed(e) => return Err(e.into()),
            }
        }
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let _gate = self.gate.read().await;

        // Ensure we read a consistent snapshot of both collections.
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let mut tally = VoteTally::default();
        let mut tally_cursor = self
            .tallies
            .find_with_session(None, None, &mut session)
            .await?;
        while let Some(total) = tally_cursor.next(&mut session).await {
            let total = total?;
            tally.add(&total.position, &total.candidate, total.count.max(0) as u64);
        }

        let oldest_first = FindOptions::builder().sort(doc! {"voted_at": 1}).build();
        let mut roll = Vec::new();
        let mut roll_cursor = self
            .roll
            .find_with_session(None, oldest_first, &mut session)
            .await?;
        while let Some(entry) = roll_cursor.next(&mut session).await {
            roll.push(entry?.into());
        }

        Ok(LedgerSnapshot { tally, roll })
    }

    async fn reset(&self) -> Result<()> {
        let _gate = self.gate.write().await;

        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        self.roll
            .delete_many_with_session(doc! {}, None, &mut session)
            .await?;
        self.tallies
            .delete_many_with_session(doc! {}, None, &mut session)
            .await?;
        session.commit_transaction().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use mongodb::Client as MongoClient;

    use super::*;
    use crate::model::{
        ballot::Selections,
        mongodb::ensure_indexes_exist,
        voter::{VoterIdentity, VoterProfile},
    };

    fn entry(profile: VoterProfile, selections: Selections) -> RollEntry {
        let key = VoterIdentity::example().compute_key(&profile).unwrap();
        RollEntry::new(key, profile, &selections, Utc::now())
    }

    #[backend_test]
    async fn commit_is_all_or_nothing(db_client: MongoClient, db: Database) {
        ensure_indexes_exist(&db).await.unwrap();
        let ledger = MongoVoteLedger::new(db_client, &db);

        let vote = entry(
            VoterProfile::example(),
            Selections::new()
                .with("headBoy", Some("Alice"))
                .with("headGirl", Some("Carol"))
                .with("sportsCaptain", None),
        );
        ledger.commit_vote(&vote).await.unwrap();
        assert!(ledger.has_voted(&vote.voter_key).await.unwrap());

        // A second vote for the same voter is refused and credits nobody.
        let again = entry(
            VoterProfile::example(),
            Selections::new().with("headBoy", Some("Bob")),
        );
        assert!(matches!(
            ledger.commit_vote(&again).await,
            Err(Error::AlreadyVoted)
        ));

        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(snapshot.tally.count("headBoy", "Alice"), 1);
        assert_eq!(snapshot.tally.count("headBoy", "Bob"), 0);
        assert_eq!(snapshot.tally.count("headGirl", "Carol"), 1);
        assert_eq!(snapshot.roll.len(), 1);
        assert_eq!(snapshot.roll[0].voter_key, vote.voter_key);
        assert_eq!(snapshot.roll[0].selections["sportsCaptain"], "none");
    }

    #[backend_test]
    async fn concurrent_voters_for_one_candidate(db_client: MongoClient, db: Database) {
        ensure_indexes_exist(&db).await.unwrap();
        let ledger = Arc::new(MongoVoteLedger::new(db_client, &db));
        const VOTERS: usize = 8;

        let handles = (0..VOTERS)
            .map(|i| {
                let ledger = ledger.clone();
                let vote = entry(
                    VoterProfile {
                        name: format!("Student {i}"),
                        ..VoterProfile::example()
                    },
                    Selections::new()
                        .with("headBoy", Some("Alice"))
                        .with("headGirl", Some("Carol")),
                );
                rocket::tokio::spawn(async move { ledger.commit_vote(&vote).await })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(snapshot.roll.len(), VOTERS);
        assert_eq!(snapshot.tally.count("headBoy", "Alice"), VOTERS as u64);
        assert_eq!(snapshot.tally.count("headGirl", "Carol"), VOTERS as u64);
    }

    #[backend_test]
    async fn reset_and_commit_do_not_interleave(db_client: MongoClient, db: Database) {
        ensure_indexes_exist(&db).await.unwrap();
        let ledger = Arc::new(MongoVoteLedger::new(db_client, &db));

        let first = entry(
            VoterProfile::example2(),
            Selections::new().with("headBoy", Some("Alice")),
        );
        ledger.commit_vote(&first).await.unwrap();

        let vote = entry(
            VoterProfile::example(),
            Selections::new().with("headBoy", Some("Alice")),
        );
        let committer = {
            let ledger = ledger.clone();
            let vote = vote.clone();
            rocket::tokio::spawn(async move { ledger.commit_vote(&vote).await })
        };
        let resetter = {
            let ledger = ledger.clone();
            rocket::tokio::spawn(async move { ledger.reset().await })
        };
        resetter.await.unwrap().unwrap();
        let committed = committer.await.unwrap().is_ok();

        // Either "reset only" or "reset, then the commit": never a mix.
        let snapshot = ledger.snapshot().await.unwrap();
        assert!(!ledger.has_voted(&first.voter_key).await.unwrap());
        if committed && !snapshot.roll.is_empty() {
            assert_eq!(snapshot.roll.len(), 1);
            assert_eq!(snapshot.tally.count("headBoy", "Alice"), 1);
        } else {
            assert!(snapshot.roll.is_empty());
            assert!(snapshot.tally.is_empty());
        }
    }
}
