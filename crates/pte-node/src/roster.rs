//! Host collaborators
//!
//! The accrual scheduler only needs two snapshots from its host: who is
//! online, and who is currently AFK-exempt. Both are traits so a game server
//! can plug in its own session and inactivity tracking; the in-memory
//! implementations here back the CLI console and the tests.

use parking_lot::RwLock;
use pte_core::ParticipantId;
use std::collections::{BTreeSet, HashSet};

/// Source of the online participant set
pub trait Roster: Send + Sync {
    /// Snapshot of participants online right now
    fn online(&self) -> Vec<ParticipantId>;
}

/// Source of the AFK-exempt participant set
pub trait AfkMonitor: Send + Sync {
    /// Snapshot of participants excluded from earning right now
    fn exempt(&self) -> HashSet<ParticipantId>;

    fn is_exempt(&self, participant: &ParticipantId) -> bool {
        self.exempt().contains(participant)
    }
}

/// Join/leave tracked roster
#[derive(Debug, Default)]
pub struct OnlineRoster {
    players: RwLock<BTreeSet<ParticipantId>>,
}

impl OnlineRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the participant was already online
    pub fn join(&self, participant: ParticipantId) -> bool {
        self.players.write().insert(participant)
    }

    /// Returns false if the participant was not online
    pub fn leave(&self, participant: &ParticipantId) -> bool {
        self.players.write().remove(participant)
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.players.read().contains(participant)
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }
}

impl Roster for OnlineRoster {
    fn online(&self) -> Vec<ParticipantId> {
        self.players.read().iter().cloned().collect()
    }
}

/// Manually maintained AFK set
#[derive(Debug, Default)]
pub struct AfkSet {
    exempt: RwLock<HashSet<ParticipantId>>,
}

impl AfkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_afk(&self, participant: ParticipantId) {
        self.exempt.write().insert(participant);
    }

    pub fn mark_active(&self, participant: &ParticipantId) {
        self.exempt.write().remove(participant);
    }
}

impl AfkMonitor for AfkSet {
    fn exempt(&self) -> HashSet<ParticipantId> {
        self.exempt.read().clone()
    }

    fn is_exempt(&self, participant: &ParticipantId) -> bool {
        self.exempt.read().contains(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_join_leave() {
        let roster = OnlineRoster::new();
        assert!(roster.join("alice".into()));
        assert!(!roster.join("alice".into()));
        assert!(roster.join("bob".into()));
        assert_eq!(roster.online().len(), 2);

        assert!(roster.leave(&"alice".into()));
        assert!(!roster.leave(&"alice".into()));
        assert_eq!(roster.online(), vec![ParticipantId::from("bob")]);
    }

    #[test]
    fn test_afk_set() {
        let afk = AfkSet::new();
        afk.mark_afk("alice".into());
        assert!(afk.is_exempt(&"alice".into()));
        assert!(!afk.is_exempt(&"bob".into()));

        afk.mark_active(&"alice".into());
        assert!(afk.exempt().is_empty());
    }
}
