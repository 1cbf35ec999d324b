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

//! The node
//!
//! [Node] is the shared state every request handler works against: the causal state (stamp &
//! journal), the roster, the fan-out engine & the outbound transport. Handlers receive it as an
//! `Arc<Node>`-- there are no ambient globals in confab, which keeps the mutation paths visible
//! & testable.
//!
//! # Locking
//!
//! The stamp & the journal live under *one* mutex. They could each have their own, but every
//! interesting operation touches both (mint-then-insert, merge-then-insert, fork-then-snapshot),
//! & two locks would mean either a lock ordering protocol or windows in which another handler
//! could observe a stamp that has advanced past the journal. One lock makes the whole receipt
//! path serial per node, which is exactly the guarantee the clock needs: concurrent `event` &
//! `merge` calls against the same stamp would corrupt causal history irrecoverably.
//!
//! # Receive semantics
//!
//! On peer receipt we *merge* the incoming history into the local stamp & do not record a local
//! event. The message is ordered by the stamp it arrived with; minting is reserved for the one
//! case this node actually originates an event, a client submission. (The alternative--
//! merge-then-event on every receipt-- orders the receipt itself after everything this node has
//! seen, at the cost of inflating the history with events no user produced.)

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{debug, info};

use confab_clock::Stamp;

use crate::{
    client::Transport,
    gossip::{Engine, Kind},
    journal::{self, Journal, Message},
    peer::PeerAddr,
    roster::Roster,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Invalid { source: journal::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           ForkGrant                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What a member hands a joining node: a stamp with a freshly-disjoint identity & the granting
/// member's history, plus a snapshot of its journal.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ForkGrant {
    pub stamp: Stamp,
    pub messages: Vec<Message>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Node                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

// The two pieces of causal state, deliberately under one lock.
#[derive(Debug)]
struct Causal {
    stamp: Stamp,
    journal: Journal,
}

/// Application state available to all handlers.
pub struct Node {
    /// The address at which peers can reach *this* node.
    origin: PeerAddr,
    causal: Mutex<Causal>,
    pub roster: Roster,
    pub engine: Engine,
    pub transport: Arc<dyn Transport>,
}

impl Node {
    pub fn new(origin: PeerAddr, transport: Arc<dyn Transport>, fanout: usize) -> Node {
        Node {
            origin,
            causal: Mutex::new(Causal {
                stamp: Stamp::seed(),
                journal: Journal::new(),
            }),
            roster: Roster::new(),
            engine: Engine::new(fanout),
            transport,
        }
    }

    pub fn origin(&self) -> &PeerAddr {
        &self.origin
    }

    /// Accept a message from a local client: validate, mint a stamp for it (this *is* a local
    /// event) & insert it. Validation happens before any state is touched-- a rejected
    /// submission leaves no trace on the clock.
    pub fn submit(&self, user: &str, content: &str) -> Result<Message> {
        Message::validate(user, content).context(InvalidSnafu)?;
        let mut causal = self.causal.lock().expect("Poisoned mutex!");
        let stamp = causal.stamp.event();
        causal.stamp = stamp.clone();
        let message = Message::new(user, content, stamp).context(InvalidSnafu)?;
        causal.journal.insert(message.clone());
        Ok(message)
    }

    /// Accept a message relayed by a peer: merge its history into the local stamp & insert.
    /// Returns whether the journal changed (false for an already-seen message), which is what
    /// makes replays & fork snapshots harmless.
    pub fn accept(&self, message: Message) -> bool {
        let mut causal = self.causal.lock().expect("Poisoned mutex!");
        causal.stamp = causal.stamp.merge(message.stamp());
        causal.journal.insert(message)
    }

    /// Respond to a fork request: split the local stamp, keep one half, & hand the other to
    /// `joiner` along with a snapshot of the journal. `joiner` is admitted to the roster.
    pub fn grant_fork(&self, joiner: PeerAddr) -> ForkGrant {
        let grant = {
            let mut causal = self.causal.lock().expect("Poisoned mutex!");
            let (keep, grant) = causal.stamp.fork();
            causal.stamp = keep;
            ForkGrant {
                stamp: grant,
                messages: causal.journal.snapshot(),
            }
        };
        info!(
            "Granted {} a forked identity & {} message(s) of history.",
            joiner,
            grant.messages.len()
        );
        self.roster.add(joiner);
        grant
    }

    /// Adopt a [ForkGrant] obtained from a seed: take on the granted stamp & replay the
    /// snapshot. Runs before this node serves traffic, so the seed identity being discarded
    /// has never recorded an event.
    pub fn adopt(&self, grant: ForkGrant) {
        let mut causal = self.causal.lock().expect("Poisoned mutex!");
        causal.stamp = grant.stamp;
        for message in grant.messages {
            causal.stamp = causal.stamp.merge(message.stamp());
            causal.journal.insert(message);
        }
    }

    /// An ordered snapshot of the journal.
    pub fn messages(&self) -> Vec<Message> {
        self.causal
            .lock()
            .expect("Poisoned mutex!")
            .journal
            .snapshot()
    }

    /// The current stamp, cloned under the lock.
    pub fn stamp(&self) -> Stamp {
        self.causal.lock().expect("Poisoned mutex!").stamp.clone()
    }
}

/// Fan `message` out to every known peer; unreachable peers are pruned. One broadcast at a
/// time-- if one is already in flight this becomes a no-op (the current fan-out will not carry
/// the new message, but its recipients received it from the same source we did, or will via
/// another peer's relay; gossip is eventually consistent, not reliable).
pub async fn broadcast_round(node: Arc<Node>, message: Message) {
    node.engine
        .start_round(
            Kind::Broadcast,
            &node.roster,
            |peer| {
                let transport = node.transport.clone();
                let message = message.clone();
                async move { transport.send_message(&peer, &message).await }
            },
            |peer, _| debug!("{} took delivery.", peer),
            |peer| {
                node.roster.remove(peer);
            },
        )
        .await;
}

/// One liveness gossip round: ping every known peer & prune the ones that don't answer. Driven
/// by the gossip timer; if the prior round hasn't drained the engine drops this one, which is
/// the timer's back-pressure.
pub async fn gossip_round(node: Arc<Node>) {
    node.engine
        .start_round(
            Kind::Liveness,
            &node.roster,
            |peer| {
                let transport = node.transport.clone();
                let origin = node.origin.clone();
                async move { transport.ping(&peer, &origin).await }
            },
            |_, _| (),
            |peer| {
                node.roster.remove(peer);
            },
        )
        .await;
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::client;

    use async_trait::async_trait;

    // A transport for nodes that must never talk to anyone.
    struct Hermit;

    #[async_trait]
    impl Transport for Hermit {
        async fn send_message(&self, peer: &PeerAddr, _message: &Message) -> client::Result<()> {
            unreachable!("unexpected send to {}", peer)
        }
        async fn ping(&self, peer: &PeerAddr, _origin: &PeerAddr) -> client::Result<()> {
            unreachable!("unexpected ping of {}", peer)
        }
        async fn fork(&self, peer: &PeerAddr, _origin: &PeerAddr) -> client::Result<ForkGrant> {
            unreachable!("unexpected fork of {}", peer)
        }
    }

    fn isolated(origin: &str) -> Node {
        Node::new(origin.parse().unwrap(), Arc::new(Hermit), 4)
    }

    #[test]
    fn submission_mints_and_stores() {
        let node = isolated("http://127.0.0.1:1975");
        let before = node.stamp();
        let message = node.submit("alice", "hi").unwrap();
        assert_eq!(message.user(), "alice");
        assert!(before.leq(message.stamp()));
        assert!(!message.stamp().leq(&before));
        assert_eq!(node.messages(), vec![message]);
    }

    #[test]
    fn rejected_submissions_leave_no_trace() {
        let node = isolated("http://127.0.0.1:1975");
        let before = node.stamp();
        assert!(node.submit("alice", "").is_err());
        assert!(node.submit("", "hi").is_err());
        assert_eq!(node.stamp(), before);
        assert!(node.messages().is_empty());
    }

    #[test]
    fn acceptance_merges_and_dedupes() {
        let node = isolated("http://127.0.0.1:1975");
        let (_, remote) = Stamp::seed().fork();
        let remote = remote.event();
        let message = Message::new("bob", "howdy", remote.clone()).unwrap();
        assert!(node.accept(message.clone()));
        assert!(!node.accept(message));
        assert_eq!(node.messages().len(), 1);
        // The remote history has been folded into our stamp...
        assert!(remote.leq(&node.stamp()));
        // ...but no local event was recorded for the relay.
        assert_eq!(node.stamp().history(), remote.history());
    }

    #[test]
    fn fork_grant_carries_history_and_admits_the_joiner() {
        let node = isolated("http://127.0.0.1:1975");
        node.submit("alice", "hi").unwrap();
        let joiner: PeerAddr = "http://127.0.0.1:2020".parse().unwrap();
        let grant = node.grant_fork(joiner.clone());
        assert_eq!(grant.messages, node.messages());
        assert!(node.roster.contains(&joiner));
        // Disjoint from here on out:
        let ours = node.stamp().event();
        let theirs = grant.stamp.event();
        assert!(!ours.leq(&theirs));
        assert!(!theirs.leq(&ours));
    }

    #[test]
    fn adoption_replays_the_snapshot() {
        let grantor = isolated("http://127.0.0.1:1975");
        grantor.submit("alice", "hi").unwrap();
        grantor.submit("alice", "anyone home?").unwrap();
        let joiner = isolated("http://127.0.0.1:2020");
        let grant = grantor.grant_fork(joiner.origin().clone());
        joiner.adopt(grant);
        assert_eq!(joiner.messages(), grantor.messages());
    }
}
