//! Persistence for the administrator-controlled [`Settings`].

use mongodb::{bson::doc, options::UpdateOptions, Database};
use rocket::tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{
    db::{SettingsDoc, SETTINGS_ID},
    mongodb::Coll,
    settings::Settings,
};

#[rocket::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> Result<Settings>;

    async fn set(&self, settings: Settings) -> Result<()>;
}

/// Settings held in memory, reverting to the configured defaults on restart.
pub struct MemorySettingsStore {
    settings: RwLock<Settings>,
}

impl MemorySettingsStore {
    pub fn new(voting_enabled: bool) -> Self {
        Self {
            settings: RwLock::new(Settings { voting_enabled }),
        }
    }
}

#[rocket::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self) -> Result<Settings> {
        Ok(*self.settings.read().await)
    }

    async fn set(&self, settings: Settings) -> Result<()> {
        *self.settings.write().await = settings;
        Ok(())
    }
}

/// Settings stored as a single document, so every instance sees the same gate.
/// Until an administrator first saves settings, the configured defaults apply.
pub struct MongoSettingsStore {
    settings: Coll<SettingsDoc>,
    defaults: Settings,
}

impl MongoSettingsStore {
    pub fn new(db: &Database, voting_enabled: bool) -> Self {
        Self {
            settings: Coll::from_db(db),
            defaults: Settings { voting_enabled },
        }
    }
}

#[rocket::async_trait]
impl SettingsStore for MongoSettingsStore {
    async fn get(&self) -> Result<Settings> {
        let stored = self
            .settings
            .find_one(doc! { "_id": SETTINGS_ID }, None)
            .await?;
        Ok(stored.map_or(self.defaults, |doc| Settings {
            voting_enabled: doc.voting_enabled,
        }))
    }

    async fn set(&self, settings: Settings) -> Result<()> {
        let update = doc! {
            "$set": { "voting_enabled": settings.voting_enabled }
        };
        let upsert = UpdateOptions::builder().upsert(true).build();
        self.settings
            .update_one(doc! { "_id": SETTINGS_ID }, update, upsert)
            .await?;
        Ok(())
    }
}
