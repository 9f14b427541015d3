use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use crate::model::{Assembly, Ticket, Vote};
use crate::store::RecordKey;

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

/// A record as stored in the database, keyed by its record name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub key: String,
    #[serde(flatten)]
    pub record: T,
}

impl<T> Document<T> {
    pub fn new(key: RecordKey, record: T) -> Self {
        Self {
            key: key.name(),
            record,
        }
    }
}

const ASSEMBLIES: &str = "assemblies";
impl MongoCollection for Document<Assembly> {
    const NAME: &'static str = ASSEMBLIES;
}

const TICKETS: &str = "tickets";
impl MongoCollection for Document<Ticket> {
    const NAME: &'static str = TICKETS;
}

const VOTES: &str = "votes";
impl MongoCollection for Document<Vote> {
    const NAME: &'static str = VOTES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Assembly collection.
    let assembly_index = IndexModel::builder()
        .keys(doc! {"id": 1})
        .options(unique.clone())
        .build();
    Coll::<Document<Assembly>>::from_db(db)
        .create_index(assembly_index, None)
        .await?;

    // Ticket collection.
    let ticket_index = IndexModel::builder()
        .keys(doc! {"assembly_id": 1, "id": 1})
        .options(unique.clone())
        .build();
    Coll::<Document<Ticket>>::from_db(db)
        .create_index(ticket_index, None)
        .await?;

    // Vote collection. At most one vote per ticket.
    let vote_index = IndexModel::builder()
        .keys(doc! {"assembly_id": 1, "ticket_id": 1})
        .options(unique)
        .build();
    Coll::<Document<Vote>>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    Ok(())
}
