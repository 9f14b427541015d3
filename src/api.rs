use rocket::{Catcher, Route};

mod ballot;
mod fallback;

pub fn routes() -> Vec<Route> {
    ballot::routes()
}

pub fn catchers() -> Vec<Catcher> {
    fallback::catchers()
}
