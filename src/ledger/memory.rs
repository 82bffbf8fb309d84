use std::collections::BTreeMap;

use rocket::tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{LedgerSnapshot, RollEntry, VoteTally},
    voter::VoterKey,
};

use super::VoteLedger;

/// A process-local [`VoteLedger`]. Tally and roll share one lock, so every
/// operation sees and leaves them consistent.
#[derive(Default)]
pub struct MemoryVoteLedger {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    tally: VoteTally,
    roll: BTreeMap<VoterKey, RollEntry>,
}

impl MemoryVoteLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl VoteLedger for MemoryVoteLedger {
    async fn has_voted(&self, key: &VoterKey) -> Result<bool> {
        Ok(self.state.lock().await.roll.contains_key(key))
    }

    async fn commit_vote(&self, entry: &RollEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.roll.contains_key(&entry.voter_key) {
            return Err(Error::AlreadyVoted);
        }
        for (position, candidate) in entry.chosen() {
            state.tally.add(position, candidate, 1);
        }
        state.roll.insert(entry.voter_key.clone(), entry.clone());
        Ok(())
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let state = self.state.lock().await;
        let mut roll = state.roll.values().cloned().collect::<Vec<_>>();
        roll.sort_by_key(|entry| entry.voted_at);
        Ok(LedgerSnapshot {
            tally: state.tally.clone(),
            roll,
        })
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = State::default();
        Ok(())
    }
}
