use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::voter::{VoterKey, VoterProfile};

/// What the roll records for a position the voter left blank.
pub const NO_SELECTION: &str = "none";

/// A voter's choices, by position. Every position is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selections(BTreeMap<String, Option<String>>);

impl Selections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a choice for a position. Blank candidates count as no choice.
    pub fn insert(&mut self, position: impl Into<String>, candidate: Option<&str>) {
        let candidate = candidate
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(NO_SELECTION))
            .map(str::to_string);
        self.0.insert(position.into().trim().to_string(), candidate);
    }

    /// Builder-style [`Self::insert`].
    pub fn with(mut self, position: impl Into<String>, candidate: Option<&str>) -> Self {
        self.insert(position, candidate);
        self
    }

    /// Does this submission pick nobody at all?
    pub fn is_blank(&self) -> bool {
        self.chosen().next().is_none()
    }

    /// The (position, candidate) pairs that were actually chosen.
    pub fn chosen(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(pos, cand)| cand.as_deref().map(|cand| (pos.as_str(), cand)))
    }

    /// Check these selections against the contested positions, filling in any
    /// the voter skipped. An empty position list accepts anything.
    pub fn for_positions(mut self, positions: &[String]) -> Result<Self> {
        if positions.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = self.0.keys().find(|pos| !positions.contains(*pos)) {
            return Err(Error::bad_request(format!("Unknown position '{unknown}'")));
        }
        for position in positions {
            self.0.entry(position.clone()).or_insert(None);
        }
        Ok(self)
    }

    /// The form stored in the voter roll, with skipped positions as "none".
    pub fn recorded(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(pos, cand)| {
                let cand = cand.clone().unwrap_or_else(|| NO_SELECTION.to_string());
                (pos.clone(), cand)
            })
            .collect()
    }
}

/// Vote counts, by position then candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteTally(BTreeMap<String, BTreeMap<String, u64>>);

impl VoteTally {
    /// Credit one vote to every chosen candidate.
    pub fn record(&mut self, selections: &Selections) {
        for (position, candidate) in selections.chosen() {
            self.add(position, candidate, 1);
        }
    }

    pub fn add(&mut self, position: &str, candidate: &str, count: u64) {
        *self
            .0
            .entry(position.to_string())
            .or_default()
            .entry(candidate.to_string())
            .or_default() += count;
    }

    pub fn count(&self, position: &str, candidate: &str) -> u64 {
        self.0
            .get(position)
            .and_then(|candidates| candidates.get(candidate))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all counts for one position.
    pub fn position_total(&self, position: &str) -> u64 {
        self.0
            .get(position)
            .map(|candidates| candidates.values().sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable proof that a voter has voted, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollEntry {
    pub voter_key: VoterKey,
    pub profile: VoterProfile,
    pub voted_at: DateTime<Utc>,
    pub selections: BTreeMap<String, String>,
}

impl RollEntry {
    pub fn new(
        voter_key: VoterKey,
        profile: VoterProfile,
        selections: &Selections,
        voted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            voter_key,
            profile,
            voted_at,
            selections: selections.recorded(),
        }
    }

    /// The tally contribution of this entry.
    pub fn chosen(&self) -> impl Iterator<Item = (&str, &str)> {
        self.selections
            .iter()
            .filter(|(_, cand)| cand.as_str() != NO_SELECTION)
            .map(|(pos, cand)| (pos.as_str(), cand.as_str()))
    }
}

/// A consistent view of the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub tally: VoteTally,
    pub roll: Vec<RollEntry>,
}
