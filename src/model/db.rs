//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in a DB-friendly way, e.g.:
//!
//! - Datetimes are serialised in MongoDB's own format.
//! - Natural keys (tokens, voter keys) are used as `_id`, so uniqueness is
//!   enforced by the primary index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use super::{
    ballot::RollEntry,
    session::{SessionToken, VerifiedSession},
    voter::{VoterKey, VoterProfile},
};

/// A verified session. `voter_key` carries a unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    #[serde(rename = "_id")]
    pub token: SessionToken,
    pub voter_key: VoterKey,
    pub profile: VoterProfile,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<VerifiedSession> for SessionDoc {
    fn from(session: VerifiedSession) -> Self {
        Self {
            token: session.token,
            voter_key: session.voter_key,
            profile: session.profile,
            created_at: session.created_at,
        }
    }
}

impl From<SessionDoc> for VerifiedSession {
    fn from(doc: SessionDoc) -> Self {
        Self {
            token: doc.token,
            voter_key: doc.voter_key,
            profile: doc.profile,
            created_at: doc.created_at,
        }
    }
}

/// A held voting lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDoc {
    #[serde(rename = "_id")]
    pub voter_key: VoterKey,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub acquired_at: DateTime<Utc>,
}

/// A voter roll entry. Its existence is the durable record of having voted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollDoc {
    #[serde(rename = "_id")]
    pub voter_key: VoterKey,
    pub profile: VoterProfile,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voted_at: DateTime<Utc>,
    pub selections: BTreeMap<String, String>,
}

impl From<RollEntry> for RollDoc {
    fn from(entry: RollEntry) -> Self {
        Self {
            voter_key: entry.voter_key,
            profile: entry.profile,
            voted_at: entry.voted_at,
            selections: entry.selections,
        }
    }
}

impl From<RollDoc> for RollEntry {
    fn from(doc: RollDoc) -> Self {
        Self {
            voter_key: doc.voter_key,
            profile: doc.profile,
            voted_at: doc.voted_at,
            selections: doc.selections,
        }
    }
}

/// The running count for one candidate. `(position, candidate)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyDoc {
    pub position: String,
    pub candidate: String,
    pub count: i64,
}

/// The single settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub voting_enabled: bool,
}

pub const SETTINGS_ID: &str = "settings";
