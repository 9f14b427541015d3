//! Durable storage for assemblies, tickets and votes.

use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::error::Result;
use crate::model::{Assembly, Id, Ticket, Vote};

mod file;
#[cfg(feature = "mongo")]
pub mod mongodb;

pub use file::FileStore;

/// Record storage shared by every request handler.
///
/// No operation assumes single-threaded access, and several processes may
/// share the same storage. Errors are returned as-is and never retried.
#[rocket::async_trait]
pub trait RecordStore: Send + Sync {
    /// Write an assembly, replacing any previous version.
    async fn put_assembly(&self, assembly: &Assembly) -> Result<()>;

    async fn get_assembly(&self, id: Id) -> Result<Assembly>;

    /// Issue and store a new ticket for the assembly.
    ///
    /// An existing ticket is never overwritten: an ID collision fails with `Conflict`.
    async fn create_ticket(&self, assembly_id: Id) -> Result<Ticket>;

    async fn get_ticket(&self, assembly_id: Id, ticket_id: Id) -> Result<Ticket>;

    /// Number of tickets issued for the assembly.
    async fn count_tickets(&self, assembly_id: Id) -> Result<usize>;

    /// Whether a vote has been stored for the ticket.
    ///
    /// The answer may be stale by the time it is used; only `put_vote` is
    /// authoritative.
    async fn vote_exists(&self, assembly_id: Id, ticket_id: Id) -> Result<bool>;

    /// Store a vote if and only if none exists yet for its ticket.
    ///
    /// This is a single atomic create-if-absent. When several callers race on
    /// the same ticket exactly one succeeds; the rest fail with `AlreadyExists`
    /// and the stored vote is left untouched.
    async fn put_vote(&self, vote: &Vote) -> Result<()>;

    async fn get_vote(&self, assembly_id: Id, ticket_id: Id) -> Result<Vote>;

    /// All votes stored for the assembly, in no particular order.
    async fn collect_votes(&self, assembly_id: Id) -> Result<Vec<Vote>>;
}

/// A shareable handle on the configured record store.
pub type Store = Arc<dyn RecordStore>;

/// The kinds of stored record.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum RecordKind {
    Assembly,
    Ticket,
    Vote,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assembly => "assembly",
            Self::Ticket => "ticket",
            Self::Vote => "vote",
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The storage address of a single record: `(kind, assembly_id, [ticket_id])`.
///
/// Tickets and votes are keyed under their assembly, so scanning for
/// [`RecordKey::scan_prefix`] finds exactly one assembly's records of a kind.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub assembly_id: Id,
    pub ticket_id: Option<Id>,
}

impl RecordKey {
    pub fn assembly(assembly_id: Id) -> Self {
        Self {
            kind: RecordKind::Assembly,
            assembly_id,
            ticket_id: None,
        }
    }

    pub fn ticket(assembly_id: Id, ticket_id: Id) -> Self {
        Self {
            kind: RecordKind::Ticket,
            assembly_id,
            ticket_id: Some(ticket_id),
        }
    }

    pub fn vote(assembly_id: Id, ticket_id: Id) -> Self {
        Self {
            kind: RecordKind::Vote,
            assembly_id,
            ticket_id: Some(ticket_id),
        }
    }

    /// The common prefix of all stored names of this kind under the assembly.
    pub fn scan_prefix(kind: RecordKind, assembly_id: Id) -> String {
        format!("{kind}_{assembly_id}_")
    }

    /// Stable textual name of the record, e.g. `vote_<assembly>_<ticket>`.
    pub fn name(&self) -> String {
        match self.ticket_id {
            Some(ticket_id) => format!("{}{ticket_id}", Self::scan_prefix(self.kind, self.assembly_id)),
            None => format!("{}_{}", self.kind, self.assembly_id),
        }
    }

    /// Parse a name produced by [`RecordKey::name`].
    ///
    /// Only canonical names are accepted, so parsing and naming round-trip exactly.
    pub fn from_name(name: &str) -> Option<Self> {
        let (kind, ids) = name.split_once('_')?;
        let key = match kind {
            "assembly" => Self::assembly(ids.parse().ok()?),
            "ticket" | "vote" => {
                let (assembly_id, ticket_id) = ids.split_once('_')?;
                let (assembly_id, ticket_id) = (assembly_id.parse().ok()?, ticket_id.parse().ok()?);
                if kind == "ticket" {
                    Self::ticket(assembly_id, ticket_id)
                } else {
                    Self::vote(assembly_id, ticket_id)
                }
            }
            _ => return None,
        };
        (key.name() == name).then_some(key)
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.ticket_id {
            Some(ticket_id) => write!(f, "{} {}/{ticket_id}", self.kind, self.assembly_id),
            None => write!(f, "{} {}", self.kind, self.assembly_id),
        }
    }
}

/// Request guard giving a route access to the managed [`Store`].
#[derive(Clone)]
pub struct StoreHandle(Store);

impl Deref for StoreHandle {
    type Target = dyn RecordStore;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StoreHandle {
    type Error = ();

    /// Get the store from the managed state.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        req.guard::<&State<Store>>()
            .await
            .map(|store| StoreHandle(Arc::clone(store)))
    }
}
