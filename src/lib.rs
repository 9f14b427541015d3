#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate store_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

pub use config::Config;

use config::{ConfigFairing, StoreFairing};
use logging::LoggerFairing;
use store::Store;

/// Build the server, taking its config and record store from `Rocket.toml`
/// and `ROCKET_*` environment variables.
pub fn build() -> Rocket<Build> {
    with_routes(rocket::build())
        .attach(ConfigFairing)
        .attach(StoreFairing)
}

/// Build the server around an already opened record store.
pub fn rocket_for_store(store: Store, config: Config) -> Rocket<Build> {
    with_routes(rocket::build()).manage(store).manage(config)
}

fn with_routes(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(LoggerFairing)
}
