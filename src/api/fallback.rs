use rocket::{http::Status, serde::json::Json, Catcher, Request};

use crate::error::ErrorBody;

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render every unhandled failure (unknown route, unparsable path parameter,
/// panic) in the same shape as route errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> (Status, Json<ErrorBody>) {
    (status, Json(ErrorBody::new(status.reason_lossy())))
}
