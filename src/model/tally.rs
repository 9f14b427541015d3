use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::RecordStore;

use super::{Assembly, Id, ProposalId, Vote, VoteOption};

/// Option counts for a single proposal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionCounts {
    pub yes: u64,
    pub no: u64,
    pub abstain: u64,
}

impl OptionCounts {
    /// Count one more vote for the given option.
    pub fn record(&mut self, option: VoteOption) {
        match option {
            VoteOption::Yes => self.yes += 1,
            VoteOption::No => self.no += 1,
            VoteOption::Abstain => self.abstain += 1,
        }
    }

    /// Total votes counted for this proposal.
    pub fn total(&self) -> u64 {
        self.yes + self.no + self.abstain
    }
}

/// Per-proposal option counts for an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<ProposalId, OptionCounts>);

impl Tally {
    /// Count the given votes.
    ///
    /// Every proposal of the assembly starts at zero, whether or not any vote
    /// mentions it. A vote without an entry for some proposal adds nothing to
    /// that proposal, and entries for proposals outside the assembly are ignored.
    pub fn new<'a>(assembly: &Assembly, votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut counts = assembly
            .proposals
            .iter()
            .map(|p| (p.id.clone(), OptionCounts::default()))
            .collect::<BTreeMap<_, _>>();
        for vote in votes {
            for (proposal_id, option) in vote.proposals.iter() {
                if let Some(proposal_counts) = counts.get_mut(proposal_id) {
                    proposal_counts.record(*option);
                }
            }
        }
        Self(counts)
    }
}

impl Deref for Tally {
    type Target = BTreeMap<ProposalId, OptionCounts>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Turnout and tally for an assembly, with proposals in assembly order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyResults {
    pub assembly_id: Id,
    pub name: String,
    /// Number of tickets issued for the assembly.
    pub tickets_issued: usize,
    /// Number of votes stored for the assembly.
    pub votes_cast: usize,
    pub proposals: Vec<ProposalResult>,
}

/// Counts for a single proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResult {
    pub id: ProposalId,
    pub title: String,
    #[serde(flatten)]
    pub counts: OptionCounts,
}

impl AssemblyResults {
    pub fn new(assembly: &Assembly, votes: &[Vote], tickets_issued: usize) -> Self {
        let tally = Tally::new(assembly, votes);
        let proposals = assembly
            .proposals
            .iter()
            .map(|p| ProposalResult {
                id: p.id.clone(),
                title: p.title.clone(),
                counts: tally.get(&p.id).copied().unwrap_or_default(),
            })
            .collect();
        Self {
            assembly_id: assembly.id,
            name: assembly.name.clone(),
            tickets_issued,
            votes_cast: votes.len(),
            proposals,
        }
    }
}

/// Collect and count the votes of an assembly.
pub async fn assembly_results(store: &dyn RecordStore, assembly_id: Id) -> Result<AssemblyResults> {
    let assembly = store.get_assembly(assembly_id).await?;
    let votes = store.collect_votes(assembly_id).await?;
    let tickets_issued = store.count_tickets(assembly_id).await?;
    Ok(AssemblyResults::new(&assembly, &votes, tickets_issued))
}
