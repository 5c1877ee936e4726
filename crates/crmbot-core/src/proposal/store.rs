use dashmap::DashMap;

use crate::error::ProposalError;

use super::{ProposalStatus, UpdateProposal};

/// Injected proposal repository. Status transitions go through
/// [`ProposalStore::transition`] so no two concurrent callers can both
/// observe `approved` and both begin executing.
pub trait ProposalStore: Send + Sync {
    fn get(&self, id: &str) -> Option<UpdateProposal>;
    fn put(&self, proposal: UpdateProposal);
    fn delete(&self, id: &str) -> bool;

    /// Atomically verify the current status is `from` and move to `to`,
    /// returning the updated proposal.
    fn transition(
        &self,
        id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<UpdateProposal, ProposalError>;

    /// Atomically mutate a proposal under the store's entry lock.
    fn update(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut UpdateProposal) -> Result<(), ProposalError>,
    ) -> Result<UpdateProposal, ProposalError>;
}

/// In-memory proposal store. DashMap entry locks give per-proposal
/// atomicity for transitions and mutations.
#[derive(Default)]
pub struct MemoryProposalStore {
    proposals: DashMap<String, UpdateProposal>,
}

impl MemoryProposalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProposalStore for MemoryProposalStore {
    fn get(&self, id: &str) -> Option<UpdateProposal> {
        self.proposals.get(id).map(|e| e.value().clone())
    }

    fn put(&self, proposal: UpdateProposal) {
        self.proposals.insert(proposal.id.clone(), proposal);
    }

    fn delete(&self, id: &str) -> bool {
        self.proposals.remove(id).is_some()
    }

    fn transition(
        &self,
        id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<UpdateProposal, ProposalError> {
        let mut entry = self
            .proposals
            .get_mut(id)
            .ok_or_else(|| ProposalError::NotFound(id.to_string()))?;

        if entry.status != from {
            return Err(ProposalError::InvalidTransition {
                from: entry.status.to_string(),
                to: to.to_string(),
            });
        }
        entry.status = to;
        Ok(entry.clone())
    }

    fn update(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut UpdateProposal) -> Result<(), ProposalError>,
    ) -> Result<UpdateProposal, ProposalError> {
        let mut entry = self
            .proposals
            .get_mut(id)
            .ok_or_else(|| ProposalError::NotFound(id.to_string()))?;
        mutate(entry.value_mut())?;
        Ok(entry.clone())
    }
}
