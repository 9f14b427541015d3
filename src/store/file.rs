use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn};
use rocket::tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::model::{Assembly, Id, Ticket, Vote};

use super::{RecordKey, RecordKind, RecordStore};

/// Records are staged here before being published under their final name.
const STAGING_DIR: &str = ".tmp";
const EXTENSION: &str = ".json";
/// Staged files older than this were left by a writer that died.
const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// A record store keeping one JSON file per record in a single directory.
///
/// Files only ever appear under their final name fully written and synced:
/// replaceable records are published by rename, and write-once records by
/// hard link, which fails atomically if the name is taken. This holds across
/// processes sharing the directory. The directory is synced after every
/// publication, so a write that returned survives a crash.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store rooted at `dir`, creating the directory if necessary.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(STAGING_DIR)).await?;
        let store = Self { dir };
        store.sweep_staging().await?;
        info!("Opened file store at {}", store.dir.display());
        Ok(store)
    }

    /// Remove staged files abandoned by writers that crashed. Recent ones may
    /// belong to another process still writing, so they are left alone.
    async fn sweep_staging(&self) -> io::Result<()> {
        let now = SystemTime::now();
        let mut entries = fs::read_dir(self.dir.join(STAGING_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            // The writer may have removed it in the meantime.
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            let stale = now
                .duration_since(modified)
                .map_or(false, |age| age >= STALE_AFTER);
            if stale {
                info!("Removing abandoned staged file {}", entry.path().display());
                self.discard(&entry.path()).await;
            }
        }
        Ok(())
    }

    /// Make a newly published directory entry durable.
    async fn sync_dir(&self) -> io::Result<()> {
        fs::File::open(&self.dir).await?.sync_all().await
    }

    /// The directory this store lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a record is stored in.
    pub fn path_of(&self, key: &RecordKey) -> PathBuf {
        self.dir.join(format!("{}{EXTENSION}", key.name()))
    }

    async fn read<T: DeserializeOwned>(&self, key: RecordKey) -> Result<T> {
        let bytes = match fs::read(self.path_of(&key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::NotFound(key)),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            error!("Failed to decode {key}: {e}");
            Error::Corrupt {
                key,
                reason: e.to_string(),
            }
        })
    }

    /// Write the bytes to a fresh, fully synced file in the staging directory.
    async fn stage(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.join(STAGING_DIR).join(Id::new().to_string());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(e) = written {
            self.discard(&path).await;
            return Err(e);
        }
        Ok(path)
    }

    /// Remove a staged file that is no longer needed.
    async fn discard(&self, staged: &Path) {
        if let Err(e) = fs::remove_file(staged).await {
            warn!("Failed to remove staged file {}: {e}", staged.display());
        }
    }

    /// Write a record, atomically replacing any previous version.
    async fn write_replace<T: Serialize>(&self, key: RecordKey, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(io::Error::from)?;
        let staged = self.stage(&bytes).await?;
        if let Err(e) = fs::rename(&staged, self.path_of(&key)).await {
            self.discard(&staged).await;
            return Err(e.into());
        }
        self.sync_dir().await?;
        debug!("Wrote {key}");
        Ok(())
    }

    /// Write a record only if none exists under the key.
    ///
    /// Returns `false`, leaving the existing record untouched, if the key is taken.
    async fn write_new<T: Serialize>(&self, key: RecordKey, record: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(record).map_err(io::Error::from)?;
        let staged = self.stage(&bytes).await?;
        let linked = fs::hard_link(&staged, self.path_of(&key)).await;
        self.discard(&staged).await;
        match linked {
            Ok(()) => {
                self.sync_dir().await?;
                debug!("Created {key}");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of all records of the kind stored under the assembly.
    async fn scan(&self, kind: RecordKind, assembly_id: Id) -> Result<Vec<RecordKey>> {
        let prefix = RecordKey::scan_prefix(kind, assembly_id);
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(name) if name.starts_with(&prefix) => name,
                _ => continue,
            };
            match name
                .strip_suffix(EXTENSION)
                .and_then(RecordKey::from_name)
            {
                Some(key) if key.kind == kind && key.assembly_id == assembly_id => keys.push(key),
                _ => warn!("Ignoring unexpected file {name} in {}", self.dir.display()),
            }
        }
        Ok(keys)
    }
}

#[rocket::async_trait]
impl RecordStore for FileStore {
    async fn put_assembly(&self, assembly: &Assembly) -> Result<()> {
        self.write_replace(RecordKey::assembly(assembly.id), assembly)
            .await
    }

    async fn get_assembly(&self, id: Id) -> Result<Assembly> {
        self.read(RecordKey::assembly(id)).await
    }

    async fn create_ticket(&self, assembly_id: Id) -> Result<Ticket> {
        let ticket = Ticket::new(assembly_id);
        let key = RecordKey::ticket(assembly_id, ticket.id);
        if !self.write_new(key, &ticket).await? {
            error!("Generated ticket ID collides with existing {key}");
            return Err(Error::Conflict(key));
        }
        Ok(ticket)
    }

    async fn get_ticket(&self, assembly_id: Id, ticket_id: Id) -> Result<Ticket> {
        self.read(RecordKey::ticket(assembly_id, ticket_id)).await
    }

    async fn count_tickets(&self, assembly_id: Id) -> Result<usize> {
        Ok(self.scan(RecordKind::Ticket, assembly_id).await?.len())
    }

    async fn vote_exists(&self, assembly_id: Id, ticket_id: Id) -> Result<bool> {
        let path = self.path_of(&RecordKey::vote(assembly_id, ticket_id));
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_vote(&self, vote: &Vote) -> Result<()> {
        let key = RecordKey::vote(vote.assembly_id, vote.ticket_id);
        if self.write_new(key, vote).await? {
            Ok(())
        } else {
            warn!("Rejected second vote for {key}");
            Err(Error::AlreadyExists(key))
        }
    }

    async fn get_vote(&self, assembly_id: Id, ticket_id: Id) -> Result<Vote> {
        self.read(RecordKey::vote(assembly_id, ticket_id)).await
    }

    async fn collect_votes(&self, assembly_id: Id) -> Result<Vec<Vote>> {
        let keys = self.scan(RecordKind::Vote, assembly_id).await?;
        let mut votes = Vec::with_capacity(keys.len());
        for key in keys {
            votes.push(self.read(key).await?);
        }
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rocket::futures::future::join_all;

    use crate::model::{Choices, VoteOption};

    use super::*;

    fn vote_for(assembly: &Assembly, ticket: &Ticket, option: VoteOption) -> Vote {
        Vote {
            assembly_id: assembly.id,
            ticket_id: ticket.id,
            token: ticket.token.clone(),
            proposals: assembly
                .proposals
                .iter()
                .map(|p| (p.id.clone(), option))
                .collect(),
        }
    }

    #[store_test]
    async fn assembly_round_trip(store: FileStore) {
        let mut assembly = Assembly::example();
        store.put_assembly(&assembly).await.unwrap();
        assert_eq!(store.get_assembly(assembly.id).await.unwrap(), assembly);

        // Assemblies may be edited in place.
        assembly.name = "Extraordinary General Meeting".to_string();
        store.put_assembly(&assembly).await.unwrap();
        assert_eq!(store.get_assembly(assembly.id).await.unwrap(), assembly);
    }

    #[store_test]
    async fn missing_records(store: FileStore) {
        let (assembly_id, ticket_id) = (Id::new(), Id::new());

        assert!(matches!(
            store.get_assembly(assembly_id).await,
            Err(Error::NotFound(key)) if key == RecordKey::assembly(assembly_id)
        ));
        assert!(matches!(
            store.get_ticket(assembly_id, ticket_id).await,
            Err(Error::NotFound(key)) if key == RecordKey::ticket(assembly_id, ticket_id)
        ));
        assert!(matches!(
            store.get_vote(assembly_id, ticket_id).await,
            Err(Error::NotFound(key)) if key == RecordKey::vote(assembly_id, ticket_id)
        ));
        assert!(!store.vote_exists(assembly_id, ticket_id).await.unwrap());
        assert_eq!(store.count_tickets(assembly_id).await.unwrap(), 0);
        assert!(store.collect_votes(assembly_id).await.unwrap().is_empty());
    }

    #[store_test]
    async fn corrupt_record(store: FileStore, assembly: Assembly) {
        let key = RecordKey::assembly(assembly.id);
        std::fs::write(store.path_of(&key), b"{\"id\": \"trunc").unwrap();

        assert!(matches!(
            store.get_assembly(assembly.id).await,
            Err(Error::Corrupt { key: k, .. }) if k == key
        ));

        // Only that read fails; the store is still usable.
        let other = Assembly::example();
        store.put_assembly(&other).await.unwrap();
        assert_eq!(store.get_assembly(other.id).await.unwrap(), other);
    }

    #[store_test]
    async fn tickets(store: FileStore, assembly: Assembly, ticket: Ticket) {
        assert_eq!(
            store.get_ticket(assembly.id, ticket.id).await.unwrap(),
            ticket
        );

        let mut ids = HashSet::from([ticket.id]);
        for _ in 0..9 {
            let issued = store.create_ticket(assembly.id).await.unwrap();
            assert_eq!(issued.assembly_id, assembly.id);
            assert_eq!(store.get_ticket(assembly.id, issued.id).await.unwrap(), issued);
            ids.insert(issued.id);
        }
        assert_eq!(ids.len(), 10);
        assert_eq!(store.count_tickets(assembly.id).await.unwrap(), 10);

        // Tickets of another assembly are not counted.
        let other = Id::new();
        store.create_ticket(other).await.unwrap();
        assert_eq!(store.count_tickets(assembly.id).await.unwrap(), 10);
        assert_eq!(store.count_tickets(other).await.unwrap(), 1);
    }

    #[store_test]
    async fn write_new_never_overwrites(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let key = RecordKey::ticket(assembly.id, ticket.id);
        let impostor = Ticket {
            token: "impostor".into(),
            ..ticket.clone()
        };

        assert!(!store.write_new(key, &impostor).await.unwrap());
        assert_eq!(store.get_ticket(assembly.id, ticket.id).await.unwrap(), ticket);
    }

    #[store_test]
    async fn second_vote_is_rejected(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let first = vote_for(&assembly, &ticket, VoteOption::Yes);
        let second = vote_for(&assembly, &ticket, VoteOption::No);

        assert!(!store.vote_exists(assembly.id, ticket.id).await.unwrap());
        store.put_vote(&first).await.unwrap();
        assert!(store.vote_exists(assembly.id, ticket.id).await.unwrap());
        assert_eq!(store.get_vote(assembly.id, ticket.id).await.unwrap(), first);

        assert!(matches!(
            store.put_vote(&second).await,
            Err(Error::AlreadyExists(key)) if key == RecordKey::vote(assembly.id, ticket.id)
        ));
        assert_eq!(store.get_vote(assembly.id, ticket.id).await.unwrap(), first);
    }

    #[store_test]
    async fn racing_votes_store_exactly_one(store: FileStore, assembly: Assembly, ticket: Ticket) {
        const RACERS: usize = 32;

        // Every racer carries a distinct ballot.
        let ballots = (0..RACERS)
            .map(|i| {
                let mut vote = vote_for(&assembly, &ticket, VoteOption::Abstain);
                vote.proposals = assembly
                    .proposals
                    .iter()
                    .enumerate()
                    .map(|(j, p)| (p.id.clone(), VoteOption::ALL[(i >> j) % 3]))
                    .collect::<Choices>();
                vote
            })
            .collect::<Vec<_>>();

        let tasks = ballots.iter().cloned().map(|vote| {
            let store = store.clone();
            rocket::tokio::spawn(async move { store.put_vote(&vote).await })
        });
        let results = join_all(tasks).await;

        let mut stored = 0;
        let mut rejected = 0;
        for result in results {
            match result.unwrap() {
                Ok(()) => stored += 1,
                Err(Error::AlreadyExists(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(rejected, RACERS - 1);

        // The stored vote is intact and is one of the submitted ballots.
        let votes = store.collect_votes(assembly.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert!(ballots.contains(&votes[0]));

        // Nothing is left behind in the staging directory.
        let staged = std::fs::read_dir(store.dir().join(STAGING_DIR))
            .unwrap()
            .count();
        assert_eq!(staged, 0);
    }

    #[store_test]
    async fn collect_votes_is_scoped_to_assembly(store: FileStore, assembly: Assembly) {
        let mut expected = Vec::new();
        for option in VoteOption::ALL {
            let ticket = store.create_ticket(assembly.id).await.unwrap();
            let vote = vote_for(&assembly, &ticket, option);
            store.put_vote(&vote).await.unwrap();
            expected.push(vote);
        }

        let other = Assembly::example();
        store.put_assembly(&other).await.unwrap();
        let other_ticket = store.create_ticket(other.id).await.unwrap();
        store
            .put_vote(&vote_for(&other, &other_ticket, VoteOption::Yes))
            .await
            .unwrap();

        // A stray file matching the prefix is skipped.
        let stray = store
            .dir()
            .join(format!("{}notes.txt", RecordKey::scan_prefix(RecordKind::Vote, assembly.id)));
        std::fs::write(stray, b"hello").unwrap();

        let mut votes = store.collect_votes(assembly.id).await.unwrap();
        votes.sort_by_key(|v| v.ticket_id);
        expected.sort_by_key(|v| v.ticket_id);
        assert_eq!(votes, expected);
        assert_eq!(store.collect_votes(other.id).await.unwrap().len(), 1);
    }

    #[store_test]
    async fn corrupt_vote_fails_collection(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let key = RecordKey::vote(assembly.id, ticket.id);
        std::fs::write(
            store.path_of(&key),
            br#"{"assembly_id": "x", "ticket_id": "y", "token": "z", "proposals": {}}"#,
        )
        .unwrap();

        assert!(matches!(
            store.collect_votes(assembly.id).await,
            Err(Error::Corrupt { key: k, .. }) if k == key
        ));
    }

    #[store_test]
    async fn reopening_keeps_records(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let reopened = FileStore::open(store.dir()).await.unwrap();
        assert_eq!(reopened.get_assembly(assembly.id).await.unwrap(), assembly);
        assert_eq!(
            reopened.get_ticket(assembly.id, ticket.id).await.unwrap(),
            ticket
        );
    }

    #[store_test]
    async fn directory_sync(store: FileStore, assembly: Assembly, ticket: Ticket) {
        store.sync_dir().await.unwrap();

        // Every publishing path syncs the directory before reporting success.
        store.put_assembly(&assembly).await.unwrap();
        store
            .put_vote(&vote_for(&assembly, &ticket, VoteOption::Yes))
            .await
            .unwrap();

        // A directory that cannot be synced fails the write.
        let gone = FileStore {
            dir: store.dir().join("missing"),
        };
        assert!(matches!(gone.sync_dir().await, Err(e) if e.kind() == ErrorKind::NotFound));
    }

    #[store_test]
    async fn abandoned_staged_files_are_swept(store: FileStore) {
        let staging = store.dir().join(STAGING_DIR);
        let abandoned = staging.join("abandoned");
        let in_flight = staging.join("in-flight");
        std::fs::write(&abandoned, b"{").unwrap();
        std::fs::write(&in_flight, b"{").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&abandoned)
            .unwrap()
            .set_modified(SystemTime::now() - STALE_AFTER - Duration::from_secs(60))
            .unwrap();

        FileStore::open(store.dir()).await.unwrap();

        assert!(!abandoned.exists());
        assert!(in_flight.exists());
    }
}
