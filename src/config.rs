use std::sync::Arc;

use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    ledger::{MemoryVoteLedger, MongoVoteLedger, VoteLedger},
    model::{mongodb::ensure_indexes_exist, voter::VoterIdentity},
    rate_limit::RateLimiter,
    service::VotingService,
    settings::{MemorySettingsStore, MongoSettingsStore, SettingsStore},
    store::{MemorySessionStore, MongoSessionStore, SessionStore},
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "defaults::session_ttl")]
    session_ttl: u32,
    #[serde(default = "defaults::sweep_interval")]
    sweep_interval: u32,
    #[serde(default = "defaults::rate_limit_window")]
    rate_limit_window: u32,
    #[serde(default = "defaults::rate_limit_max")]
    rate_limit_max: u32,
    #[serde(default = "defaults::voting_enabled")]
    voting_enabled: bool,
    #[serde(default)]
    require_date_of_birth: bool,
    #[serde(default)]
    positions: Vec<String>,
    #[serde(default)]
    storage: Storage,
    #[serde(default = "defaults::db_name")]
    db_name: String,
    // secrets
    db_uri: Option<String>,
    jwt_secret: String,
    hmac_secret: String,
}

mod defaults {
    pub fn session_ttl() -> u32 {
        600
    }

    pub fn sweep_interval() -> u32 {
        300
    }

    pub fn rate_limit_window() -> u32 {
        60
    }

    pub fn rate_limit_max() -> u32 {
        30
    }

    pub fn voting_enabled() -> bool {
        true
    }

    pub fn db_name() -> String {
        "school_election".to_string()
    }
}

/// Where sessions, locks, settings and the ledger live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    /// Durable and shareable between several server instances.
    #[default]
    Mongodb,
    /// Process-local, lost on restart. Intended for development and tests.
    Memory,
}

impl Config {
    /// Lifetime of verified sessions and voting locks.
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl.into())
    }

    /// Period of the expiry sweeper.
    pub fn sweep_interval(&self) -> Duration {
        Duration::seconds(self.sweep_interval.into())
    }

    /// Length of a rate-limit window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::seconds(self.rate_limit_window.into())
    }

    /// Requests admitted per client per window.
    pub fn rate_limit_max(&self) -> u32 {
        self.rate_limit_max
    }

    /// Initial state of the voting gate, used until an administrator changes it.
    pub fn voting_enabled(&self) -> bool {
        self.voting_enabled
    }

    /// Whether voters must supply a date of birth.
    pub fn require_date_of_birth(&self) -> bool {
        self.require_date_of_birth
    }

    /// The contested positions. Empty means any position is accepted.
    pub fn positions(&self) -> &[String] {
        &self.positions
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    /// Secret key used to verify administrator JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key used to derive voter keys.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.hmac_secret.is_empty() {
            error!("`hmac_secret` must not be empty");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// A fairing that builds the configured storage backends, wires them into a
/// [`VotingService`], and places the service and the [`RateLimiter`] into
/// managed state. Must be attached after [`ConfigFairing`].
pub struct StorageFairing;

#[rocket::async_trait]
impl Fairing for StorageFairing {
    fn info(&self) -> Info {
        Info {
            name: "Storage",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Storage requires the application config to be loaded first");
            return Err(rocket);
        };

        let backends = match config.storage {
            Storage::Memory => {
                warn!("Using in-memory storage: votes will be lost on restart");
                Some(Backends::memory(config))
            }
            Storage::Mongodb => match &config.db_uri {
                Some(db_uri) => {
                    info!("Loaded database config, connecting...");
                    Backends::mongodb(db_uri, &config.db_name, config).await
                }
                None => {
                    error!("`db_uri` must be set when `storage = \"mongodb\"`");
                    None
                }
            },
        };
        let Some(backends) = backends else {
            return Err(rocket);
        };

        let identity = VoterIdentity::new(config.hmac_secret(), config.require_date_of_birth());
        let service = VotingService::new(
            identity,
            backends.sessions,
            backends.ledger,
            backends.settings,
            config.session_ttl(),
            config.positions().to_vec(),
        );
        let limiter = RateLimiter::new(config.rate_limit_window(), config.rate_limit_max());

        rocket = rocket.manage(service).manage(limiter);
        Ok(rocket)
    }
}

/// The three storage seams of the service, all backed by the same store.
struct Backends {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn VoteLedger>,
    settings: Arc<dyn SettingsStore>,
}

impl Backends {
    fn memory(config: &Config) -> Self {
        Self {
            sessions: Arc::new(MemorySessionStore::new(config.session_ttl())),
            ledger: Arc::new(MemoryVoteLedger::new()),
            settings: Arc::new(MemorySettingsStore::new(config.voting_enabled())),
        }
    }

    async fn mongodb(db_uri: &str, db_name: &str, config: &Config) -> Option<Self> {
        // Construct the connection.
        let client = match MongoClient::with_uri_str(db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return None;
            }
        };
        let db = client.database(db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return None;
        }
        info!("...database connection online!");

        Some(Self {
            sessions: Arc::new(MongoSessionStore::new(&db, config.session_ttl())),
            ledger: Arc::new(MongoVoteLedger::new(client, &db)),
            settings: Arc::new(MongoSettingsStore::new(&db, config.voting_enabled())),
        })
    }
}
