use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ForbiddenReason, Result};
use crate::store::RecordStore;

use super::{Assembly, Choices, Id, Ticket, Token, Vote};

/// Everything needed to present a ballot to a ticket holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotForm {
    pub assembly: Assembly,
    pub ticket_id: Id,
}

/// A ballot as submitted by a ticket holder. Option values are raw JSON,
/// checked against the assembly before anything is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSubmission {
    pub assembly_id: Id,
    pub ticket_id: Id,
    pub token: Token,
    pub proposals: HashMap<String, Value>,
}

/// Acknowledgement of a stored vote. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub assembly_id: Id,
    pub ticket_id: Id,
    pub proposals: Choices,
}

impl From<Vote> for VoteReceipt {
    fn from(vote: Vote) -> Self {
        Self {
            assembly_id: vote.assembly_id,
            ticket_id: vote.ticket_id,
            proposals: vote.proposals,
        }
    }
}

/// Fetch a ticket and check that the presented token may still vote with it.
///
/// The token is checked first, so a caller without it learns nothing about
/// whether the ticket has been used. The redemption check here is only a fast
/// path; the store's atomic vote insertion has the final say.
async fn redeemable_ticket(
    store: &dyn RecordStore,
    assembly_id: Id,
    ticket_id: Id,
    token: &str,
) -> Result<Ticket> {
    let ticket = store.get_ticket(assembly_id, ticket_id).await?;
    ticket.authorize(token)?;
    if store.vote_exists(assembly_id, ticket_id).await? {
        return Err(Error::Forbidden(ForbiddenReason::AlreadyRedeemed));
    }
    Ok(ticket)
}

/// Open the ballot for a ticket that has not been used yet.
pub async fn open_ballot(
    store: &dyn RecordStore,
    assembly_id: Id,
    ticket_id: Id,
    token: &str,
) -> Result<BallotForm> {
    redeemable_ticket(store, assembly_id, ticket_id, token).await?;
    let assembly = store.get_assembly(assembly_id).await?;
    Ok(BallotForm {
        assembly,
        ticket_id,
    })
}

/// Redeem a ticket: validate the submitted ballot and store the resulting vote.
///
/// Fails with `AlreadyExists` if another submission for the same ticket won a
/// concurrent race; in that case nothing is written.
pub async fn cast_vote(store: &dyn RecordStore, submission: &BallotSubmission) -> Result<Vote> {
    let ticket = redeemable_ticket(
        store,
        submission.assembly_id,
        submission.ticket_id,
        submission.token.as_str(),
    )
    .await?;
    let assembly = store.get_assembly(submission.assembly_id).await?;
    let vote = Vote::from_submission(&assembly, &ticket, &submission.proposals)?;
    store.put_vote(&vote).await?;
    Ok(vote)
}

#[cfg(test)]
mod tests {
    use rocket::futures::future::join_all;

    use crate::model::{ValidationError, VoteOption};
    use crate::store::{FileStore, RecordKey};

    use super::*;

    impl BallotSubmission {
        /// A submission for the ticket with the same option for every proposal.
        pub fn example(assembly: &Assembly, ticket: &Ticket, option: VoteOption) -> Self {
            Self {
                assembly_id: assembly.id,
                ticket_id: ticket.id,
                token: ticket.token.clone(),
                proposals: assembly
                    .proposals
                    .iter()
                    .map(|p| (p.id.to_string(), Value::from(option.as_str())))
                    .collect(),
            }
        }
    }

    #[store_test]
    async fn open_ballot_for_fresh_ticket(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let form = open_ballot(&store, assembly.id, ticket.id, ticket.token.as_str())
            .await
            .unwrap();
        assert_eq!(form.assembly, assembly);
        assert_eq!(form.ticket_id, ticket.id);
    }

    #[store_test]
    async fn wrong_token_is_forbidden(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let result = open_ballot(&store, assembly.id, ticket.id, "not the token").await;
        assert!(matches!(
            result,
            Err(Error::Forbidden(ForbiddenReason::TokenMismatch))
        ));

        let mut submission = BallotSubmission::example(&assembly, &ticket, VoteOption::Yes);
        submission.token = Token::random();
        let result = cast_vote(&store, &submission).await;
        assert!(matches!(
            result,
            Err(Error::Forbidden(ForbiddenReason::TokenMismatch))
        ));
        assert!(!store.vote_exists(assembly.id, ticket.id).await.unwrap());
    }

    #[store_test]
    async fn unknown_ticket_is_not_found(store: FileStore, assembly: Assembly) {
        let ticket = Ticket::new(assembly.id);
        let result = open_ballot(&store, assembly.id, ticket.id, ticket.token.as_str()).await;
        match result {
            Err(Error::NotFound(key)) => assert_eq!(key, RecordKey::ticket(assembly.id, ticket.id)),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[store_test]
    async fn redeem_once(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let (p1, p2) = (
            assembly.proposals[0].id.clone(),
            assembly.proposals[1].id.clone(),
        );
        let mut submission = BallotSubmission::example(&assembly, &ticket, VoteOption::Yes);
        submission.proposals.insert(p2.to_string(), Value::from("no"));

        let vote = cast_vote(&store, &submission).await.unwrap();
        assert_eq!(
            vote.proposals,
            Choices::from([(p1, VoteOption::Yes), (p2, VoteOption::No)])
        );
        assert_eq!(store.get_vote(assembly.id, ticket.id).await.unwrap(), vote);

        // The ticket can neither be opened nor used again.
        let result = open_ballot(&store, assembly.id, ticket.id, ticket.token.as_str()).await;
        assert!(matches!(
            result,
            Err(Error::Forbidden(ForbiddenReason::AlreadyRedeemed))
        ));
        let again = BallotSubmission::example(&assembly, &ticket, VoteOption::Abstain);
        assert!(matches!(
            cast_vote(&store, &again).await,
            Err(Error::Forbidden(ForbiddenReason::AlreadyRedeemed))
        ));
        assert_eq!(store.get_vote(assembly.id, ticket.id).await.unwrap(), vote);
    }

    #[store_test]
    async fn invalid_ballot_stores_nothing(store: FileStore, assembly: Assembly, ticket: Ticket) {
        let (p1, p2) = (&assembly.proposals[0].id, &assembly.proposals[1].id);

        let mut missing = BallotSubmission::example(&assembly, &ticket, VoteOption::Yes);
        missing.proposals.remove(&p2.to_string());
        assert!(matches!(
            cast_vote(&store, &missing).await,
            Err(Error::Validation(ValidationError::MissingVoteOption { proposal_id })) if &proposal_id == p2
        ));

        let mut invalid = BallotSubmission::example(&assembly, &ticket, VoteOption::No);
        invalid.proposals.insert(p1.to_string(), Value::from(1));
        assert!(matches!(
            cast_vote(&store, &invalid).await,
            Err(Error::Validation(ValidationError::InvalidVoteOption { proposal_id, value })) if &proposal_id == p1 && value == "1"
        ));

        assert!(!store.vote_exists(assembly.id, ticket.id).await.unwrap());
        assert!(store.collect_votes(assembly.id).await.unwrap().is_empty());
    }

    #[store_test]
    async fn concurrent_redemption_stores_one_vote(
        store: FileStore,
        assembly: Assembly,
        ticket: Ticket,
    ) {
        const ATTEMPTS: usize = 16;

        let options = [VoteOption::Yes, VoteOption::No, VoteOption::Abstain];
        let tasks = (0..ATTEMPTS).map(|i| {
            let store = store.clone();
            let submission = BallotSubmission::example(&assembly, &ticket, options[i % 3]);
            rocket::tokio::spawn(async move { cast_vote(&store, &submission).await })
        });
        let results = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect::<Vec<_>>();

        // Losers are turned away either by the fast path or by the atomic insert.
        let stored = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(Error::AlreadyExists(_))
                        | Err(Error::Forbidden(ForbiddenReason::AlreadyRedeemed))
                )
            })
            .count();
        assert_eq!(stored, 1);
        assert_eq!(rejected, ATTEMPTS - 1);

        let winner = results.into_iter().find_map(|r| r.ok()).unwrap();
        assert_eq!(store.collect_votes(assembly.id).await.unwrap(), vec![winner]);
    }
}
