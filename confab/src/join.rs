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

//! The join protocol (requester side)
//!
//! A new node bootstraps by racing a fork request across its seed peers, one at a time--
//! *sequentially*, because forking two seeds at once would obtain two identity grants & leave
//! one dangling in its grantor's lineage. The first seed to answer supplies everything the
//! joiner needs: a stamp whose identity is disjoint from every other member's, & a snapshot of
//! the message history, replayed through the node's ordinary (idempotent) receipt path.
//!
//! The protocol is terminal either way: [Phase::Joined] on success, [Phase::Failed] on
//! exhaustion. Failure is *not* fatal-- the node starts isolated, serving local clients with its
//! unverified seed identity. The hazard (an isolated node that accepted writes & later rejoins
//! may collide identities) is accepted & logged; availability wins here.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::{gossip::Kind, node::Node, peer::PeerAddr};

/// Where the bootstrap ended up; both outcomes of `Requesting` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    NotJoined,
    Requesting,
    Joined,
    Failed,
}

/// Run the join protocol against `seeds`. Seeds are admitted to the roster unverified (gossip
/// will prune any that turn out to be dead); candidates that fail the fork call are pruned on
/// the spot.
#[instrument(skip(node, seeds), fields(origin = %node.origin()))]
pub async fn bootstrap(node: &Arc<Node>, seeds: &[PeerAddr]) -> Phase {
    let mut phase = Phase::NotJoined;
    if seeds.is_empty() {
        info!("No seeds supplied; starting as an isolated node.");
        return phase;
    }

    for seed in seeds {
        node.roster.add(seed.clone());
    }

    phase = Phase::Requesting;
    debug!("{:?}: racing a fork across {} seed(s).", phase, seeds.len());

    let won = node
        .engine
        .start_race_round(
            Kind::Fork,
            seeds.to_vec(),
            |peer| {
                let transport = node.transport.clone();
                let origin = node.origin().clone();
                async move { transport.fork(&peer, &origin).await }
            },
            |peer| {
                node.roster.remove(peer);
            },
        )
        .await;

    phase = match won {
        Some((seed, grant)) => {
            info!(
                "Forked from {}; adopting {} prior message(s).",
                seed,
                grant.messages.len()
            );
            node.adopt(grant);
            Phase::Joined
        }
        None => {
            warn!(
                "Exhausted every seed without obtaining a fork; starting isolated with an \
                 unverified identity. If this node accepts writes & later rejoins the cluster, \
                 stamps may collide."
            );
            Phase::Failed
        }
    };
    phase
}
