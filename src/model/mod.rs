pub mod assembly;
pub mod ballot;
pub mod id;
pub mod tally;
pub mod ticket;
pub mod token;
pub mod vote;

pub use assembly::{Assembly, AssemblySpec, DuplicateProposal, Proposal, ProposalSpec};
pub use ballot::{cast_vote, open_ballot, BallotForm, BallotSubmission, VoteReceipt};
pub use id::{EmptyProposalId, Id, ProposalId};
pub use tally::{assembly_results, AssemblyResults, OptionCounts, ProposalResult, Tally};
pub use ticket::{ticket_state, Ticket, TicketState};
pub use token::Token;
pub use vote::{validate_choices, Choices, ValidationError, Vote, VoteOption};
