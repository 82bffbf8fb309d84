use serde::{Deserialize, Serialize};

use crate::model::ballot::{LedgerSnapshot, RollEntry, VoteTally};

/// The whole ledger, for reporting.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub tally: VoteTally,
    pub roll: Vec<RollEntry>,
    pub total_voters: usize,
}

impl From<LedgerSnapshot> for StatsResponse {
    fn from(snapshot: LedgerSnapshot) -> Self {
        Self {
            total_voters: snapshot.roll.len(),
            tally: snapshot.tally,
            roll: snapshot.roll,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

impl ResetResponse {
    pub fn done() -> Self {
        Self {
            success: true,
            message: "All votes and sessions have been cleared".to_string(),
        }
    }
}
