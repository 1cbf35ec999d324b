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

//! The fan-out engine
//!
//! # Introduction
//!
//! Everything confab sends to its peers goes out as a *round*: one request per roster member.
//! The interesting requirements are all about what a round must *not* do:
//!
//! - it must not overlap another round of the same kind (if a gossip round is still in flight
//!   when the timer next fires, the new round is dropped, not queued-- back-pressure by
//!   state-check);
//! - it must not spawn one task per peer without bound (the degree of parallelism is the
//!   engine's decision, not the roster's size);
//! - it must not let one peer's failure abort the round, nor conclude before every peer's call
//!   has settled.
//!
//! The original sketch of this code was a tree of per-peer success/failure callbacks hanging off
//! a shared state flag, which made the "round fully drains" invariant an exercise in counting.
//! Structured concurrency makes it free: a round is one future; the per-peer calls are a stream
//! driven [buffer_unordered]; when the future resolves, the round *has* drained.
//!
//! [buffer_unordered]: futures::stream::StreamExt::buffer_unordered
//!
//! # Lifecycle
//!
//! Each round kind owns a [RequestState] flag: `Idle` (rounds accepted) → `Init` (admission won,
//! membership being snapshotted) → `Busy` (per-peer calls outstanding) → `Idle`. Admission is a
//! test-and-set under the flag's lock, so of two near-simultaneous rounds exactly one proceeds.
//!
//! # The race round
//!
//! The fork bootstrap is the one caller that must *not* fan out: forking against two seeds at
//! once could obtain two distinct identity grants, of which the node may adopt only one (the
//! other would dangle, un-joinable, in its grantor's lineage). [Engine::start_race_round] tries
//! candidates strictly in sequence & short-circuits on the first success.

use std::{fmt::Display, future::Future, sync::Mutex};

use futures::{future, stream, StreamExt};
use tracing::{debug, warn};

use crate::{peer::PeerAddr, roster::Roster};

/// Where a round kind currently stands.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RequestState {
    #[default]
    Idle,
    Init,
    Busy,
}

/// The kinds of round confab issues; each gets an independent lifecycle flag so that, say, a
/// slow message broadcast never blocks liveness gossip.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Liveness,
    Broadcast,
    Fork,
}

#[derive(Debug, Default)]
struct Lane {
    state: Mutex<RequestState>,
}

impl Lane {
    /// Test-and-set admission: Idle → Init, or tell the caller to go away.
    fn try_begin(&self) -> bool {
        let mut state = self.state.lock().expect("Poisoned mutex!");
        if *state == RequestState::Idle {
            *state = RequestState::Init;
            true
        } else {
            false
        }
    }

    fn arm(&self) {
        *self.state.lock().expect("Poisoned mutex!") = RequestState::Busy;
    }

    fn settle(&self) {
        *self.state.lock().expect("Poisoned mutex!") = RequestState::Idle;
    }

    fn current(&self) -> RequestState {
        *self.state.lock().expect("Poisoned mutex!")
    }
}

#[derive(Debug)]
pub struct Engine {
    liveness: Lane,
    broadcast: Lane,
    fork: Lane,
    /// Upper bound on concurrently outstanding per-peer calls within one round.
    fanout: usize,
}

impl Engine {
    pub fn new(fanout: usize) -> Engine {
        Engine {
            liveness: Lane::default(),
            broadcast: Lane::default(),
            fork: Lane::default(),
            fanout: fanout.max(1),
        }
    }

    fn lane(&self, kind: Kind) -> &Lane {
        match kind {
            Kind::Liveness => &self.liveness,
            Kind::Broadcast => &self.broadcast,
            Kind::Fork => &self.fork,
        }
    }

    pub fn state(&self, kind: Kind) -> RequestState {
        self.lane(kind).current()
    }

    /// Fan one call out to every current roster member; returns whether a round actually ran.
    ///
    /// Rejected (false, no state change) if a round of this kind is in flight or the roster is
    /// empty. Otherwise: the roster is snapshotted, `call` is issued per member with at most
    /// `fanout` outstanding at once, `on_success`/`on_failure` run as each call settles, and the
    /// lane returns to Idle only once *all* of them have.
    pub async fn start_round<C, F, R, E, S, P>(
        &self,
        kind: Kind,
        roster: &Roster,
        call: C,
        on_success: S,
        on_failure: P,
    ) -> bool
    where
        C: Fn(PeerAddr) -> F,
        F: Future<Output = std::result::Result<R, E>>,
        E: Display,
        S: Fn(&PeerAddr, R),
        P: Fn(&PeerAddr),
    {
        if roster.is_empty() {
            debug!("No peers; skipping this {:?} round.", kind);
            return false;
        }
        let lane = self.lane(kind);
        if !lane.try_begin() {
            debug!("A {:?} round is still in flight; dropping this one.", kind);
            return false;
        }
        let members = roster.snapshot();
        lane.arm();
        debug!("Fanning a {:?} round out to {} peer(s).", kind, members.len());
        stream::iter(members)
            .map(|peer| {
                let outcome = call(peer.clone());
                async move { (peer, outcome.await) }
            })
            .buffer_unordered(self.fanout)
            .for_each(|(peer, outcome)| {
                match outcome {
                    Ok(value) => on_success(&peer, value),
                    Err(err) => {
                        warn!("{:?} call to {} failed: {}", kind, peer, err);
                        on_failure(&peer);
                    }
                }
                future::ready(())
            })
            .await;
        lane.settle();
        true
    }

    /// Try `call` against each candidate *in sequence*, stopping at the first success; returns
    /// the winning peer & its response, or None if every candidate failed (or the lane was
    /// busy). Failed candidates get `on_failure`, same as in a fan-out round.
    pub async fn start_race_round<C, F, R, E, P>(
        &self,
        kind: Kind,
        candidates: Vec<PeerAddr>,
        call: C,
        on_failure: P,
    ) -> Option<(PeerAddr, R)>
    where
        C: Fn(PeerAddr) -> F,
        F: Future<Output = std::result::Result<R, E>>,
        E: Display,
        P: Fn(&PeerAddr),
    {
        if candidates.is_empty() {
            return None;
        }
        let lane = self.lane(kind);
        if !lane.try_begin() {
            debug!("A {:?} round is still in flight; dropping this one.", kind);
            return None;
        }
        lane.arm();
        let mut winner = None;
        for peer in candidates {
            match call(peer.clone()).await {
                Ok(value) => {
                    winner = Some((peer, value));
                    break;
                }
                Err(err) => {
                    warn!("{:?} call to {} failed: {}", kind, peer, err);
                    on_failure(&peer);
                }
            }
        }
        lane.settle();
        winner
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn roster_of(addrs: &[&str]) -> Roster {
        let roster = Roster::new();
        for addr in addrs {
            roster.add(addr.parse().unwrap());
        }
        roster
    }

    #[tokio::test]
    async fn only_one_round_of_a_kind_at_a_time() {
        let engine = Engine::new(4);
        let roster = roster_of(&["a.test", "b.test", "c.test"]);
        let calls = AtomicUsize::new(0);

        let call = |_peer: PeerAddr| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), Infallible>(())
            }
        };
        let (first, second) = tokio::join!(
            engine.start_round(Kind::Broadcast, &roster, call, |_, _| (), |_| ()),
            engine.start_round(Kind::Broadcast, &roster, call, |_, _| (), |_| ()),
        );
        // Exactly one round ran, and it touched each member exactly once.
        assert!(first != second);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.state(Kind::Broadcast), RequestState::Idle);
    }

    #[tokio::test]
    async fn kinds_do_not_block_each_other() {
        let engine = Engine::new(4);
        let roster = roster_of(&["a.test"]);
        let slow = |_peer: PeerAddr| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), Infallible>(())
        };
        let quick = |_peer: PeerAddr| async move { Ok::<(), Infallible>(()) };
        let (broadcast, liveness) = tokio::join!(
            engine.start_round(Kind::Broadcast, &roster, slow, |_, _| (), |_| ()),
            engine.start_round(Kind::Liveness, &roster, quick, |_, _| (), |_| ()),
        );
        assert!(broadcast && liveness);
    }

    #[tokio::test]
    async fn empty_roster_is_rejected_without_a_state_change() {
        let engine = Engine::new(4);
        let roster = Roster::new();
        let ran = engine
            .start_round(
                Kind::Liveness,
                &roster,
                |_peer| async move { Ok::<(), Infallible>(()) },
                |_, _| (),
                |_| (),
            )
            .await;
        assert!(!ran);
        assert_eq!(engine.state(Kind::Liveness), RequestState::Idle);
    }

    #[tokio::test]
    async fn failures_prune_without_aborting_the_round() {
        let engine = Engine::new(4);
        let roster = roster_of(&["good.test", "bad.test"]);
        let bad: PeerAddr = "bad.test".parse().unwrap();
        let successes = AtomicUsize::new(0);
        let ran = engine
            .start_round(
                Kind::Broadcast,
                &roster,
                |peer| {
                    let bad = bad.clone();
                    async move {
                        if peer == bad {
                            Err("connection refused".to_owned())
                        } else {
                            Ok(())
                        }
                    }
                },
                |_, _| {
                    successes.fetch_add(1, Ordering::SeqCst);
                },
                |peer| {
                    roster.remove(peer);
                },
            )
            .await;
        assert!(ran);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(!roster.contains(&bad));
        assert!(roster.contains(&"good.test".parse().unwrap()));
    }

    #[tokio::test]
    async fn race_round_short_circuits() {
        let engine = Engine::new(4);
        let a: PeerAddr = "a.test".parse().unwrap();
        let b: PeerAddr = "b.test".parse().unwrap();
        let c: PeerAddr = "c.test".parse().unwrap();
        let attempts = AtomicUsize::new(0);
        let winner = engine
            .start_race_round(
                Kind::Fork,
                vec![a.clone(), b.clone(), c.clone()],
                |peer| {
                    let a = a.clone();
                    let attempts = &attempts;
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        if peer == a {
                            Err("no route to host".to_owned())
                        } else {
                            Ok(42u32)
                        }
                    }
                },
                |_| (),
            )
            .await;
        // The first candidate fails, the second wins, the third is never tried.
        assert_eq!(winner, Some((b, 42)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(engine.state(Kind::Fork), RequestState::Idle);
    }

    #[tokio::test]
    async fn race_round_exhaustion_yields_none() {
        let engine = Engine::new(4);
        let candidates: Vec<PeerAddr> = vec!["a.test".parse().unwrap(), "b.test".parse().unwrap()];
        let pruned = AtomicUsize::new(0);
        let winner = engine
            .start_race_round(
                Kind::Fork,
                candidates,
                |_peer| async move { Err::<(), _>("timed out".to_owned()) },
                |_peer| {
                    pruned.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert_eq!(winner, None);
        assert_eq!(pruned.load(Ordering::SeqCst), 2);
    }
}
