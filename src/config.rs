use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    figment::Figment,
    Build, Rocket,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::Ticket;
use crate::store::{FileStore, Store};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    server_url: String,
    data_dir: PathBuf,
    #[serde(default)]
    store: StoreBackend,
}

/// Which record store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per record under `data_dir`.
    #[default]
    File,
    /// A MongoDB database, configured by `db_uri` and `db_name`.
    Mongodb,
}

impl Config {
    /// Load the config from the same sources the server uses.
    pub fn load(figment: &Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// The public base URL of the server, without a trailing slash.
    pub fn server_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Root directory of the file store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store(&self) -> StoreBackend {
        self.store
    }

    /// The link handed to a ticket holder: `<server_url>/ticket/<assembly>/<ticket>/<token>`.
    pub fn ticket_url(&self, ticket: &Ticket) -> String {
        format!(
            "{}/ticket/{}/{}/{}",
            self.server_url(),
            ticket.assembly_id,
            ticket.id,
            ticket.token.as_str()
        )
    }

    /// A file-store config rooted at the given directory.
    #[cfg(test)]
    pub fn example(data_dir: &Path) -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            data_dir: data_dir.to_path_buf(),
            store: StoreBackend::File,
        }
    }
}

/// Configuration for the database.
#[cfg(feature = "mongo")]
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
    // non-secrets
    #[serde(default = "default_db_name")]
    db_name: String,
}

#[cfg(feature = "mongo")]
fn default_db_name() -> String {
    "assembly_vote".to_string()
}

/// Open the record store selected by the config.
pub async fn open_store(figment: &Figment, config: &Config) -> Result<Store> {
    match config.store() {
        StoreBackend::File => Ok(Arc::new(FileStore::open(config.data_dir()).await?)),
        #[cfg(feature = "mongo")]
        StoreBackend::Mongodb => {
            let db = figment
                .extract::<DbConfig>()
                .map_err(|e| Error::Config(e.to_string()))?;
            let store = crate::store::mongodb::MongoStore::connect(&db.db_uri, &db.db_name).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo"))]
        StoreBackend::Mongodb => {
            let _ = figment;
            Err(Error::Config(
                "the MongoDB store requires building with the `mongo` feature".to_string(),
            ))
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the store fairing and control over error
/// messages.
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

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// A fairing that opens the configured record store and places it into
/// managed state. Must be attached after [`ConfigFairing`].
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Record store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let opened = match rocket.state::<Config>() {
            Some(config) => {
                info!("Opening {:?} record store...", config.store());
                open_store(rocket.figment(), config).await
            }
            None => Err(Error::Config("application config not loaded".to_string())),
        };
        let store = match opened {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open record store: {e}");
                return Err(rocket);
            }
        };
        info!("...record store online!");

        // Manage the state.
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}
