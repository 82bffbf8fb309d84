use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{LockDoc, RollDoc, SessionDoc, SettingsDoc, TallyDoc};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for SessionDoc {
    const NAME: &'static str = "verified_sessions";
}

impl MongoCollection for LockDoc {
    const NAME: &'static str = "voting_locks";
}

impl MongoCollection for RollDoc {
    const NAME: &'static str = "voter_roll";
}

impl MongoCollection for TallyDoc {
    const NAME: &'static str = "tallies";
}

impl MongoCollection for SettingsDoc {
    const NAME: &'static str = "settings";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // At most one session per voter.
    let session_index = IndexModel::builder()
        .keys(doc! {"voter_key": 1})
        .options(unique.clone())
        .build();
    Coll::<SessionDoc>::from_db(db)
        .create_index(session_index, None)
        .await?;

    // Expiry scans.
    let session_age_index = IndexModel::builder()
        .keys(doc! {"created_at": 1})
        .build();
    Coll::<SessionDoc>::from_db(db)
        .create_index(session_age_index, None)
        .await?;
    let lock_age_index = IndexModel::builder()
        .keys(doc! {"acquired_at": 1})
        .build();
    Coll::<LockDoc>::from_db(db)
        .create_index(lock_age_index, None)
        .await?;

    // Roll listing order. This also creates the collection ahead of the
    // first commit transaction.
    let roll_index = IndexModel::builder().keys(doc! {"voted_at": 1}).build();
    Coll::<RollDoc>::from_db(db)
        .create_index(roll_index, None)
        .await?;

    // One running count per candidate.
    let tally_index = IndexModel::builder()
        .keys(doc! {"position": 1, "candidate": 1})
        .options(unique)
        .build();
    Coll::<TallyDoc>::from_db(db)
        .create_index(tally_index, None)
        .await?;

    Ok(())
}
