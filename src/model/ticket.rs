use serde::{Deserialize, Serialize};

use crate::error::{Error, ForbiddenReason, Result};
use crate::store::RecordStore;

use super::{Id, Token};

/// A single-use voting credential.
///
/// The `id` is public and appears in URLs; the `token` is secret and known
/// only to the ticket holder. Tokens are drawn independently per ticket, so
/// nothing about one can be learned from the `id` or from other tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Id,
    pub assembly_id: Id,
    pub token: Token,
}

impl Ticket {
    /// Create a new ticket for the given assembly, with a fresh ID and token.
    pub fn new(assembly_id: Id) -> Self {
        Self {
            id: Id::new(),
            assembly_id,
            token: Token::random(),
        }
    }

    /// Check that the presented token belongs to this ticket.
    pub fn authorize(&self, presented: &str) -> Result<()> {
        if self.token.matches(presented) {
            Ok(())
        } else {
            Err(Error::Forbidden(ForbiddenReason::TokenMismatch))
        }
    }
}

/// States in the ticket lifecycle. The only transition is `Issued -> Redeemed`,
/// made by storing the ticket's vote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketState {
    /// No vote has been stored for the ticket.
    Issued,
    /// Exactly one vote has been stored for the ticket.
    Redeemed,
}

/// Determine the current state of an existing ticket.
pub async fn ticket_state(
    store: &dyn RecordStore,
    assembly_id: Id,
    ticket_id: Id,
) -> Result<TicketState> {
    // Fails with `NotFound` if the ticket was never issued.
    store.get_ticket(assembly_id, ticket_id).await?;
    if store.vote_exists(assembly_id, ticket_id).await? {
        Ok(TicketState::Redeemed)
    } else {
        Ok(TicketState::Issued)
    }
}
