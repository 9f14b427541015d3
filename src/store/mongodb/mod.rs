//! Record storage in MongoDB, one collection per record kind.
//!
//! Every document is keyed by its record name in `_id`, so inserting a vote
//! is an atomic create-if-absent enforced by the server.

use log::{debug, error, info, warn};
use ::mongodb::{bson::doc, error::Error as DbError, options::ReplaceOptions, Client, Database};
use rocket::futures::TryStreamExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::model::{Assembly, Id, Ticket, Vote};

use super::{RecordKey, RecordStore};

mod collection;
mod errors;

pub use collection::{ensure_indexes_exist, Coll, Document, MongoCollection};
pub use errors::{is_decode_error, is_duplicate_key_error, DUPLICATE_KEY};

/// A record store backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to the database and make sure the required indexes exist.
    pub async fn connect(db_uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(db_uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        info!("Connected to database {db_name}");
        Ok(Self { db })
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn find<T>(&self, key: RecordKey) -> Result<T>
    where
        Document<T>: MongoCollection + DeserializeOwned + Unpin + Send + Sync,
    {
        match Coll::<Document<T>>::from_db(&self.db)
            .find_one(doc! {"_id": key.name()}, None)
            .await
        {
            Ok(Some(document)) => Ok(document.record),
            Ok(None) => Err(Error::NotFound(key)),
            Err(e) => Err(decode_failure(key, e)),
        }
    }

    /// Insert a record only if none exists under the key.
    ///
    /// Returns `false`, leaving the existing record untouched, if the key is taken.
    async fn insert_new<T>(&self, key: RecordKey, record: &T) -> Result<bool>
    where
        T: Clone,
        Document<T>: MongoCollection + Serialize,
    {
        let result = Coll::<Document<T>>::from_db(&self.db)
            .insert_one(Document::new(key, record.clone()), None)
            .await;
        match result {
            Ok(_) => {
                debug!("Created {key}");
                Ok(true)
            }
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blame the record for errors decoding it; pass anything else through.
fn decode_failure(key: RecordKey, err: DbError) -> Error {
    if is_decode_error(&err) {
        error!("Failed to decode {key}: {err}");
        Error::Corrupt {
            key,
            reason: err.to_string(),
        }
    } else {
        err.into()
    }
}

/// Filter matching every record stored under the assembly.
fn assembly_filter(assembly_id: Id) -> ::mongodb::bson::Document {
    doc! {"assembly_id": assembly_id.to_string()}
}

#[rocket::async_trait]
impl RecordStore for MongoStore {
    async fn put_assembly(&self, assembly: &Assembly) -> Result<()> {
        let key = RecordKey::assembly(assembly.id);
        let options = ReplaceOptions::builder().upsert(true).build();
        Coll::<Document<Assembly>>::from_db(&self.db)
            .replace_one(
                doc! {"_id": key.name()},
                Document::new(key, assembly.clone()),
                options,
            )
            .await?;
        debug!("Wrote {key}");
        Ok(())
    }

    async fn get_assembly(&self, id: Id) -> Result<Assembly> {
        self.find(RecordKey::assembly(id)).await
    }

    async fn create_ticket(&self, assembly_id: Id) -> Result<Ticket> {
        let ticket = Ticket::new(assembly_id);
        let key = RecordKey::ticket(assembly_id, ticket.id);
        if !self.insert_new(key, &ticket).await? {
            error!("Generated ticket ID collides with existing {key}");
            return Err(Error::Conflict(key));
        }
        Ok(ticket)
    }

    async fn get_ticket(&self, assembly_id: Id, ticket_id: Id) -> Result<Ticket> {
        self.find(RecordKey::ticket(assembly_id, ticket_id)).await
    }

    async fn count_tickets(&self, assembly_id: Id) -> Result<usize> {
        let count = Coll::<Document<Ticket>>::from_db(&self.db)
            .count_documents(assembly_filter(assembly_id), None)
            .await?;
        Ok(count as usize)
    }

    async fn vote_exists(&self, assembly_id: Id, ticket_id: Id) -> Result<bool> {
        let key = RecordKey::vote(assembly_id, ticket_id);
        let count = Coll::<Document<Vote>>::from_db(&self.db)
            .count_documents(doc! {"_id": key.name()}, None)
            .await?;
        Ok(count > 0)
    }

    async fn put_vote(&self, vote: &Vote) -> Result<()> {
        let key = RecordKey::vote(vote.assembly_id, vote.ticket_id);
        if self.insert_new(key, vote).await? {
            Ok(())
        } else {
            warn!("Rejected second vote for {key}");
            Err(Error::AlreadyExists(key))
        }
    }

    async fn get_vote(&self, assembly_id: Id, ticket_id: Id) -> Result<Vote> {
        self.find(RecordKey::vote(assembly_id, ticket_id)).await
    }

    async fn collect_votes(&self, assembly_id: Id) -> Result<Vec<Vote>> {
        let documents: Vec<Document<Vote>> = Coll::<Document<Vote>>::from_db(&self.db)
            .find(assembly_filter(assembly_id), None)
            .await?
            .try_collect()
            .await
            .map_err(|e| decode_failure(RecordKey::assembly(assembly_id), e))?;
        Ok(documents.into_iter().map(|d| d.record).collect())
    }
}
