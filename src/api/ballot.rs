use log::debug;
use rocket::{
    serde::json::{self, Json},
    Route,
};

use crate::error::{Error, Result};
use crate::model::{cast_vote, open_ballot, BallotForm, BallotSubmission, Id, VoteReceipt};
use crate::store::StoreHandle;

pub fn routes() -> Vec<Route> {
    routes![ballot_form, submit_vote]
}

/// Open the ballot behind a ticket link.
#[get("/ticket/<assembly_id>/<ticket_id>/<token>")]
async fn ballot_form(
    assembly_id: Id,
    ticket_id: Id,
    token: &str,
    store: StoreHandle,
) -> Result<Json<BallotForm>> {
    let form = open_ballot(&*store, assembly_id, ticket_id, token).await?;
    Ok(Json(form))
}

/// Redeem a ticket by casting its vote.
#[post("/vote", data = "<submission>")]
async fn submit_vote(
    submission: std::result::Result<Json<BallotSubmission>, json::Error<'_>>,
    store: StoreHandle,
) -> Result<Json<VoteReceipt>> {
    let submission = submission.map_err(malformed_submission)?;
    let vote = cast_vote(&*store, &submission).await?;
    debug!("Recorded vote for assembly {}", vote.assembly_id);
    Ok(Json(vote.into()))
}

/// Describe an unreadable submission by position only: the body holds the
/// ticket token, so neither it nor serde's message quoting it may be echoed.
fn malformed_submission(error: json::Error<'_>) -> Error {
    match error {
        json::Error::Parse(_, e) => Error::Malformed(format!(
            "unexpected input at line {} column {}",
            e.line(),
            e.column()
        )),
        json::Error::Io(e) => Error::Malformed(format!("unreadable body ({})", e.kind())),
    }
}
