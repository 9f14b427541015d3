use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{Assembly, Id, ProposalId, Ticket, Token};

/// The closed set of answers to a proposal.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOption {
    Yes,
    No,
    Abstain,
}

impl VoteOption {
    pub const ALL: [VoteOption; 3] = [Self::Yes, Self::No, Self::Abstain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Abstain => "abstain",
        }
    }
}

impl Display for VoteOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteOption {
    type Err = UnknownVoteOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str() == s)
            .ok_or(UnknownVoteOption)
    }
}

#[derive(Debug, Error)]
#[error("vote option must be one of `yes`, `no` or `abstain`")]
pub struct UnknownVoteOption;

/// A complete, well-typed set of choices: one option per proposal.
pub type Choices = BTreeMap<ProposalId, VoteOption>;

/// The immutable record of one ticket's choices across every proposal in its assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub assembly_id: Id,
    pub ticket_id: Id,
    pub token: Token,
    pub proposals: Choices,
}

impl Vote {
    /// Validate a submitted ballot against the assembly and build the vote for
    /// the given ticket. Nothing is stored.
    pub fn from_submission(
        assembly: &Assembly,
        ticket: &Ticket,
        submitted: &HashMap<String, Value>,
    ) -> Result<Self, ValidationError> {
        let proposals = validate_choices(assembly, submitted)?;
        Ok(Self {
            assembly_id: assembly.id,
            ticket_id: ticket.id,
            token: ticket.token.clone(),
            proposals,
        })
    }
}

/// Reasons a submitted ballot is rejected. Each identifies the offending proposal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing vote option for proposal {proposal_id}")]
    MissingVoteOption { proposal_id: ProposalId },
    #[error("Invalid vote option {value:?} for proposal {proposal_id}")]
    InvalidVoteOption {
        proposal_id: ProposalId,
        value: String,
    },
}

/// Check a submitted `proposal id -> option` map against the assembly.
///
/// Proposals are checked in assembly order and the first missing or invalid
/// entry is reported. Values that are not strings are invalid options, not
/// malformed ballots. Submitted keys that are not proposals of the assembly
/// are ignored: the result is built from the assembly's own proposal list,
/// so it always has exactly one entry per proposal.
pub fn validate_choices(
    assembly: &Assembly,
    submitted: &HashMap<String, Value>,
) -> Result<Choices, ValidationError> {
    let mut choices = Choices::new();
    for proposal in assembly.proposals.iter() {
        let value = submitted.get(proposal.id.as_str()).ok_or_else(|| {
            ValidationError::MissingVoteOption {
                proposal_id: proposal.id.clone(),
            }
        })?;
        let option = match value {
            Value::String(text) => text.parse::<VoteOption>().ok(),
            _ => None,
        };
        let option = option.ok_or_else(|| ValidationError::InvalidVoteOption {
            proposal_id: proposal.id.clone(),
            value: match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        })?;
        choices.insert(proposal.id.clone(), option);
    }
    Ok(choices)
}
