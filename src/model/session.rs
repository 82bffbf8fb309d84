use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::voter::{VoterKey, VoterProfile};

/// Number of random bytes in a session token.
pub const TOKEN_BYTES: usize = 32;

/// An unguessable bearer token proving that a voter passed verification.
///
/// Tokens are pure randomness and carry no information about the voter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken([u8; TOKEN_BYTES]);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn random() -> Self {
        let mut bytes = [0; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", BASE64URL_NOPAD.encode(&self.0))
    }
}

impl FromStr for SessionToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64URL_NOPAD
            .decode(s.trim().as_bytes())
            .map_err(|_| InvalidToken)?;
        <[u8; TOKEN_BYTES]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| InvalidToken)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = InvalidToken;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.to_string()
    }
}

/// The given string is not a well-formed session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed session token")]
pub struct InvalidToken;

/// A voter who has passed verification and may now cast one vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub token: SessionToken,
    pub voter_key: VoterKey,
    pub profile: VoterProfile,
    pub created_at: DateTime<Utc>,
}

impl VerifiedSession {
    pub fn new(voter_key: VoterKey, profile: VoterProfile, now: DateTime<Utc>) -> Self {
        Self {
            token: SessionToken::random(),
            voter_key,
            profile,
            created_at: now,
        }
    }

    /// Has this session outlived the given time-to-live?
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_stale(self.created_at, now, ttl)
    }
}

/// Was something created at `created_at` already dead at `now`?
pub fn is_stale(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    created_at + ttl <= now
}
