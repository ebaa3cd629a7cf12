use std::collections::HashMap;

use super::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Edit { content: String },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Confirmed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub state: MutationState,
}

/// Tracks the latest edit/delete attempt per message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationLog {
    entries: HashMap<MessageId, Mutation>,
}

impl MutationLog {
    /// Starts a mutation. Returns false while another one is still pending
    /// for the same message.
    pub fn begin(&mut self, id: MessageId, kind: MutationKind) -> bool {
        if self.is_pending(id) {
            return false;
        }

        self.entries.insert(
            id,
            Mutation {
                kind,
                state: MutationState::Pending,
            },
        );
        true
    }

    pub fn confirm(&mut self, id: MessageId) -> Option<&Mutation> {
        self.settle(id, MutationState::Confirmed)
    }

    pub fn fail(&mut self, id: MessageId, reason: impl Into<String>) -> Option<&Mutation> {
        self.settle(
            id,
            MutationState::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn state(&self, id: MessageId) -> Option<&MutationState> {
        self.entries.get(&id).map(|mutation| &mutation.state)
    }

    pub fn get(&self, id: MessageId) -> Option<&Mutation> {
        self.entries.get(&id)
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        matches!(self.state(id), Some(MutationState::Pending))
    }

    fn settle(&mut self, id: MessageId, state: MutationState) -> Option<&Mutation> {
        let mutation = self
            .entries
            .get_mut(&id)
            .filter(|mutation| mutation.state == MutationState::Pending)?;
        mutation.state = state;
        Some(mutation)
    }
}
