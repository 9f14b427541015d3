use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Id, ProposalId};

/// A named set of proposals that are voted on together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedAssembly")]
pub struct Assembly {
    /// Assembly unique ID.
    pub id: Id,
    /// Human-readable name.
    pub name: String,
    /// Proposals in presentation order. This order is also the order in
    /// which ballots are validated.
    pub proposals: Vec<Proposal>,
}

impl Assembly {
    /// Build an assembly, checking that no proposal ID is used twice.
    pub fn new(
        id: Id,
        name: String,
        proposals: Vec<Proposal>,
    ) -> Result<Self, DuplicateProposal> {
        let mut seen = HashSet::new();
        for proposal in proposals.iter() {
            if !seen.insert(&proposal.id) {
                return Err(DuplicateProposal(proposal.id.clone()));
            }
        }
        Ok(Self {
            id,
            name,
            proposals,
        })
    }

    /// Get the proposal with the given ID, if it exists.
    pub fn proposal(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.iter().find(|p| &p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("proposal ID {0} is used more than once")]
pub struct DuplicateProposal(pub ProposalId);

/// An assembly as read from storage, before its proposal IDs are checked.
#[derive(Deserialize)]
struct UncheckedAssembly {
    id: Id,
    name: String,
    proposals: Vec<Proposal>,
}

impl TryFrom<UncheckedAssembly> for Assembly {
    type Error = DuplicateProposal;

    fn try_from(unchecked: UncheckedAssembly) -> Result<Self, Self::Error> {
        Self::new(unchecked.id, unchecked.name, unchecked.proposals)
    }
}

/// A single yes/no/abstain question within an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal ID, unique within its assembly.
    pub id: ProposalId,
    /// Short title.
    pub title: String,
    /// Full proposal text.
    pub text: String,
}

/// An assembly as specified by an administrator, before any IDs are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySpec {
    pub name: String,
    pub proposals: Vec<ProposalSpec>,
}

/// A proposal as specified by an administrator. Without an explicit ID it
/// gets a random one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProposalId>,
    pub title: String,
    pub text: String,
}

impl AssemblySpec {
    /// A placeholder assembly, to be edited by hand after creation.
    pub fn stub() -> Self {
        Self {
            name: "Stub Assembly".to_string(),
            proposals: vec![ProposalSpec {
                id: None,
                title: "Stub Proposal".to_string(),
                text: "This is a stub proposal".to_string(),
            }],
        }
    }
}

impl TryFrom<AssemblySpec> for Assembly {
    type Error = DuplicateProposal;

    /// Assign a fresh ID to the assembly, and to each proposal that lacks one.
    fn try_from(spec: AssemblySpec) -> Result<Self, Self::Error> {
        let proposals = spec
            .proposals
            .into_iter()
            .map(|p| Proposal {
                id: p.id.unwrap_or_else(ProposalId::new),
                title: p.title,
                text: p.text,
            })
            .collect();
        Self::new(Id::new(), spec.name, proposals)
    }
}
