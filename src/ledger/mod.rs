//! The durable vote tally and voter roll.

use crate::error::Result;
use crate::model::{
    ballot::{LedgerSnapshot, RollEntry},
    voter::VoterKey,
};

mod memory;
mod mongo;

pub use memory::MemoryVoteLedger;
pub use mongo::MongoVoteLedger;

/// The single source of truth for who has voted and what the counts are.
///
/// A roll entry and its tally increments become visible together or not at
/// all. [`VoteLedger::commit_vote`] and [`VoteLedger::reset`] never interleave.
#[rocket::async_trait]
pub trait VoteLedger: Send + Sync {
    /// Does the roll hold an entry for this voter?
    async fn has_voted(&self, key: &VoterKey) -> Result<bool>;

    /// Append `entry` to the roll and credit each of its chosen candidates.
    ///
    /// Fails with [`crate::error::Error::AlreadyVoted`], changing nothing, if
    /// the roll already holds an entry for the voter.
    async fn commit_vote(&self, entry: &RollEntry) -> Result<()>;

    /// Read the tally and the roll as of a single instant.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;

    /// Clear both the tally and the roll.
    async fn reset(&self) -> Result<()>;
}
