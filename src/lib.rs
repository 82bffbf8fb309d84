#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{ConfigFairing, StorageFairing};
use crate::logging::LoggerFairing;
use crate::sweeper::SweeperFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod rate_limit;
pub mod service;
pub mod settings;
pub mod store;
pub mod sweeper;

/// Build the server from `Rocket.toml` and `ROCKET_*` environment variables.
pub fn build() -> Rocket<Build> {
    rocket_from(rocket::Config::figment())
}

/// Build the server from the given configuration.
pub fn rocket_from(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(ConfigFairing)
        .attach(StorageFairing)
        .attach(SweeperFairing::new())
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Support for `#[backend_test]`.
#[cfg(test)]
pub(crate) mod test_support {
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    use chrono::Duration;
    use mongodb::{Client as MongoClient, Database};
    use rocket::{figment::Figment, http::Header, local::asynchronous::Client};

    use crate::config::Config;
    use crate::model::api::auth::AdminToken;

    /// Names the MongoDB deployment used by database tests.
    pub const TEST_DB_URI: &str = "TEST_DB_URI";

    /// Where local test requests claim to come from.
    pub const CLIENT_ADDR: SocketAddr =
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000));

    /// Everything a test can ask to have injected.
    pub struct TestContext {
        pub client: Option<Client>,
        pub db_client: Option<MongoClient>,
        pub db: Option<Database>,
    }

    impl TestContext {
        /// Set up a test. With `with_db`, a fresh database is created and used
        /// as the server's storage; returns `None` if no test deployment is
        /// configured.
        pub async fn new(with_client: bool, with_db: bool) -> Option<Self> {
            let mut figment = figment();
            let mut db_client = None;
            let mut db = None;

            if with_db {
                let db_uri = std::env::var(TEST_DB_URI).ok()?;
                let db_name = format!("test{}", rand::random::<u32>());
                let client = MongoClient::with_uri_str(&db_uri).await.unwrap();
                db = Some(client.database(&db_name));
                db_client = Some(client);
                figment = figment
                    .merge(("storage", "mongodb"))
                    .merge(("db_uri", db_uri))
                    .merge(("db_name", db_name));
            }

            let client = if with_client {
                let rocket = crate::rocket_from(figment);
                Some(Client::tracked(rocket).await.unwrap())
            } else {
                None
            };

            Some(Self {
                client,
                db_client,
                db,
            })
        }
    }

    /// Test configuration over the in-memory backend.
    pub fn figment() -> Figment {
        rocket::Config::figment()
            .merge(("hmac_secret", "test hmac secret"))
            .merge(("jwt_secret", "test jwt secret"))
            .merge(("storage", "memory"))
            .merge(("rate_limit_max", 20))
            .merge(("positions", ["headBoy", "headGirl", "sportsCaptain"]))
    }

    /// A valid administrator token for the client's server.
    pub fn admin_jwt(client: &Client) -> String {
        let config = client.rocket().state::<Config>().unwrap();
        AdminToken::example().sign(config.jwt_secret(), Duration::minutes(5))
    }

    /// [`admin_jwt`] as an `Authorization` header.
    pub fn admin_bearer(client: &Client) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", admin_jwt(client)))
    }
}
