//! The voting state machine: verify, hold a session, submit, commit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::ledger::VoteLedger;
use crate::model::{
    ballot::{LedgerSnapshot, RollEntry, Selections},
    session::SessionToken,
    settings::Settings,
    voter::{VoterIdentity, VoterProfile},
};
use crate::settings::SettingsStore;
use crate::store::{SessionStore, SweepReport, VotingLock};

/// Owns the lifecycle of verified sessions and voting locks, and is the only
/// writer to the ledger.
#[derive(Clone)]
pub struct VotingService {
    identity: VoterIdentity,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn VoteLedger>,
    settings: Arc<dyn SettingsStore>,
    session_ttl: Duration,
    positions: Arc<[String]>,
}

impl VotingService {
    pub fn new(
        identity: VoterIdentity,
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn VoteLedger>,
        settings: Arc<dyn SettingsStore>,
        session_ttl: Duration,
        positions: Vec<String>,
    ) -> Self {
        Self {
            identity,
            sessions,
            ledger,
            settings,
            session_ttl,
            positions: positions.into(),
        }
    }

    /// Verify a voter and open a session for them, returning its token.
    pub async fn verify(&self, profile: &VoterProfile) -> Result<SessionToken> {
        self.ensure_voting_enabled().await?;
        let key = self.identity.compute_key(profile)?;

        if self.ledger.has_voted(&key).await? {
            info!("Verification refused for {}: already voted", key.short());
            return Err(Error::AlreadyVoted);
        }

        let token = match self
            .sessions
            .begin_verified_session(&key, &profile.trimmed(), Utc::now())
            .await
        {
            Ok(token) => token,
            Err(e) => {
                info!("Verification refused for {}: {e}", key.short());
                return Err(e);
            }
        };

        // A vote may have landed between the roll check and the session insert.
        // On failure the token is never handed out, so the session goes too.
        match self.ledger.has_voted(&key).await {
            Ok(false) => {}
            Ok(true) => {
                self.end_session_quietly(&token).await;
                info!("Verification refused for {}: already voted", key.short());
                return Err(Error::AlreadyVoted);
            }
            Err(e) => {
                self.end_session_quietly(&token).await;
                error!("Verification failed for {}: {e}", key.short());
                return Err(e);
            }
        }

        info!("Verified voter {}", key.short());
        Ok(token)
    }

    /// Cast the vote for the session identified by `token`.
    ///
    /// At most one submission per voter gets past the voting lock; any other
    /// concurrent attempt fails fast with [`Error::SubmissionInProgress`].
    pub async fn submit_vote(&self, token: &str, selections: Selections) -> Result<RollEntry> {
        self.submit_ballot(token, || Ok(selections)).await
    }

    /// [`Self::submit_vote`] for a ballot that still has to be parsed. Parsing
    /// happens only once the session is known to be live and voting is open,
    /// so a dead session is reported as such whatever the ballot holds.
    pub async fn submit_ballot<F>(&self, token: &str, ballot: F) -> Result<RollEntry>
    where
        F: FnOnce() -> Result<Selections> + Send,
    {
        let now = Utc::now();

        // Malformed and unknown tokens look the same to the voter.
        let token: SessionToken = token.parse().map_err(|_| Error::SessionExpired)?;
        let session = match self.sessions.verified_session(&token).await? {
            Some(session) if !session.is_expired(now, self.session_ttl) => session,
            Some(_) => {
                self.sessions.end_session(&token).await?;
                return Err(Error::SessionExpired);
            }
            None => return Err(Error::SessionExpired),
        };
        let key = &session.voter_key;

        self.ensure_voting_enabled().await?;

        if self.ledger.has_voted(key).await? {
            self.sessions.end_session(&token).await?;
            return Err(Error::AlreadyVoted);
        }

        let selections = ballot()?.for_positions(&self.positions)?;
        if selections.is_blank() {
            return Err(Error::NoSelection);
        }

        let Some(lock) = VotingLock::acquire(&self.sessions, key, now).await? else {
            warn!("Concurrent submission refused for {}", key.short());
            return Err(Error::SubmissionInProgress);
        };

        let entry = RollEntry::new(lock.key().clone(), session.profile, &selections, now);
        let result = match self.ledger.commit_vote(&entry).await {
            Ok(()) => {
                info!("Vote recorded for {}", key.short());
                self.end_session_quietly(&token).await;
                Ok(entry)
            }
            Err(Error::AlreadyVoted) => {
                warn!("Commit refused for {}: already voted", key.short());
                self.end_session_quietly(&token).await;
                Err(Error::AlreadyVoted)
            }
            Err(e) => {
                error!("Failed to record vote for {}: {e}", key.short());
                Err(Error::CommitFailed(
                    "the vote store is unavailable, please try again".to_string(),
                ))
            }
        };

        if let Err(e) = lock.release().await {
            // The sweeper reclaims it once it expires.
            error!("Failed to release voting lock for {}: {e}", key.short());
        }
        result
    }

    /// Abandon a verified session. Unknown or malformed tokens are ignored.
    pub async fn cancel(&self, token: &str) -> Result<()> {
        let Ok(token) = token.parse::<SessionToken>() else {
            return Ok(());
        };
        if let Some(session) = self.sessions.verified_session(&token).await? {
            info!("Session cancelled for {}", session.voter_key.short());
            self.sessions.end_session(&token).await?;
        }
        Ok(())
    }

    pub async fn settings(&self) -> Result<Settings> {
        self.settings.get().await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<Settings> {
        self.settings.set(settings).await?;
        info!("Voting enabled: {}", settings.voting_enabled);
        Ok(settings)
    }

    /// The tally and the roll, as of one instant.
    pub async fn stats(&self) -> Result<LedgerSnapshot> {
        self.ledger.snapshot().await
    }

    /// Clear the ledger, then every session and lock.
    pub async fn reset(&self) -> Result<()> {
        self.ledger.reset().await?;
        self.sessions.clear().await?;
        warn!("Election data reset");
        Ok(())
    }

    /// Reclaim sessions and locks that have expired by `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sessions.sweep(now).await
    }

    async fn ensure_voting_enabled(&self) -> Result<()> {
        if self.settings.get().await?.voting_enabled {
            Ok(())
        } else {
            Err(Error::VotingDisabled)
        }
    }

    /// End a session, logging rather than returning any failure. A leftover
    /// session expires and is reclaimed by the sweeper.
    async fn end_session_quietly(&self, token: &SessionToken) {
        if let Err(e) = self.sessions.end_session(token).await {
            error!("Failed to end session: {e}");
        }
    }
}
