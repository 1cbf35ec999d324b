// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of confab.
//
// confab is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// confab is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with confab.  If not,
// see <http://www.gnu.org/licenses/>.

//! The peer roster
//!
//! The set of peers this node currently believes to be alive. Peers are admitted when they ping
//! us or fork from us, and evicted the *first* time a call to them fails-- no grace period, no
//! backoff. That's deliberate: a falsely-evicted peer re-announces itself on its next gossip
//! tick & costs us one missed fan-out, whereas retrying a dead peer costs every future round a
//! timeout. Eviction here says nothing about any other node's roster; each node curates its own.
//!
//! The roster is shared by the ping & fork handlers, the gossip timer & every fan-out failure
//! callback, so it lives behind a [Mutex]; [Roster::snapshot] clones the membership under the
//! lock so a fan-out round always works against a consistent set.

use std::{
    collections::BTreeSet,
    sync::Mutex,
};

use tracing::{debug, info};

use crate::peer::PeerAddr;

#[derive(Debug, Default)]
pub struct Roster {
    members: Mutex<BTreeSet<PeerAddr>>,
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    /// Admit `peer`; returns true if it was not already a member.
    pub fn add(&self, peer: PeerAddr) -> bool {
        let added = self
            .members
            .lock()
            .expect("Poisoned mutex!")
            .insert(peer.clone());
        if added {
            info!("Admitted peer {}.", peer);
        }
        added
    }

    /// Evict `peer`; returns true if it was a member. A no-op for unknown peers.
    pub fn remove(&self, peer: &PeerAddr) -> bool {
        let removed = self.members.lock().expect("Poisoned mutex!").remove(peer);
        if removed {
            info!("Evicted peer {}.", peer);
        } else {
            debug!("Asked to evict unknown peer {}.", peer);
        }
        removed
    }

    /// The current membership, cloned atomically with respect to concurrent add/remove.
    pub fn snapshot(&self) -> Vec<PeerAddr> {
        self.members
            .lock()
            .expect("Poisoned mutex!")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().expect("Poisoned mutex!").is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.lock().expect("Poisoned mutex!").len()
    }

    pub fn contains(&self, peer: &PeerAddr) -> bool {
        self.members.lock().expect("Poisoned mutex!").contains(peer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(text: &str) -> PeerAddr {
        text.parse().unwrap()
    }

    #[test]
    fn add_is_canonical_set_insertion() {
        let roster = Roster::new();
        assert!(roster.add(addr("example.com")));
        // Same address, differently spelled:
        assert!(!roster.add(addr("http://example.com:1975")));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let roster = Roster::new();
        let peer = addr("10.0.0.1:2020");
        roster.add(peer.clone());
        assert!(roster.remove(&peer));
        assert!(!roster.remove(&peer));
        assert!(roster.is_empty());
    }

    #[test]
    fn pruned_peers_are_absent_until_readmitted() {
        let roster = Roster::new();
        let peer = addr("10.0.0.1:2020");
        roster.add(peer.clone());
        roster.remove(&peer);
        assert!(!roster.snapshot().contains(&peer));
        roster.add(peer.clone());
        assert!(roster.snapshot().contains(&peer));
    }
}
