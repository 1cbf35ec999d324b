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

//! Event trees
//!
//! An event tree records how many logical events have been observed over each region of the
//! causal namespace; it is to an interval tree clock what the counter vector is to a vector
//! clock. A leaf `n` says "n events everywhere below here"; an interior node `(n, l, r)` says "n
//! events everywhere below here, plus whatever `l` & `r` record on top of that". The partial
//! order [Event::leq] and the least upper bound [Event::join] make the type a join-semilattice,
//! which is all the rest of confab needs to know about it.

use std::fmt::Display;

/// A variable-resolution event history over the causal namespace.
///
/// Kept normalized: an interior node's children never share a common surplus (it has been sunk
/// into the parent), and a node whose children are equal leaves collapses into a leaf. Construct
/// interior nodes through [Event::node] to preserve this; with it, structural equality is
/// semantic equality.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Event {
    Leaf(u64),
    Node(u64, Box<Event>, Box<Event>),
}

impl Event {
    pub fn zero() -> Event {
        Event::Leaf(0)
    }

    /// The count at the root; for a normalized tree this is also the minimum over the namespace.
    pub fn value(&self) -> u64 {
        match self {
            Event::Leaf(n) => *n,
            Event::Node(n, _, _) => *n,
        }
    }

    /// The maximum count anywhere in the tree.
    pub fn max(&self) -> u64 {
        match self {
            Event::Leaf(n) => *n,
            Event::Node(n, left, right) => n + left.max().max(right.max()),
        }
    }

    /// Normalizing constructor for interior nodes; `left` & `right` must themselves be normalized.
    pub fn node(n: u64, left: Event, right: Event) -> Event {
        match (left, right) {
            (Event::Leaf(a), Event::Leaf(b)) if a == b => Event::Leaf(n + a),
            (left, right) => {
                let m = left.value().min(right.value());
                Event::Node(n + m, Box::new(left.sink(m)), Box::new(right.sink(m)))
            }
        }
    }

    /// Add `m` to the root count.
    pub(crate) fn lift(&self, m: u64) -> Event {
        match self {
            Event::Leaf(n) => Event::Leaf(n + m),
            Event::Node(n, left, right) => Event::Node(n + m, left.clone(), right.clone()),
        }
    }

    /// Subtract `m` from the root count; `m` must not exceed [Event::value].
    fn sink(&self, m: u64) -> Event {
        match self {
            Event::Leaf(n) => Event::Leaf(n - m),
            Event::Node(n, left, right) => Event::Node(n - m, left.clone(), right.clone()),
        }
    }

    /// True iff `self` is causally dominated by `other`: every region of the namespace has seen
    /// at least as many events under `other` as under `self`.
    pub fn leq(&self, other: &Event) -> bool {
        match (self, other) {
            (Event::Leaf(n1), Event::Leaf(n2)) => n1 <= n2,
            (Event::Leaf(n1), Event::Node(n2, _, _)) => n1 <= n2,
            (Event::Node(n1, l1, r1), Event::Leaf(n2)) => {
                n1 <= n2 && l1.lift(*n1).leq(other) && r1.lift(*n1).leq(other)
            }
            (Event::Node(n1, l1, r1), Event::Node(n2, l2, r2)) => {
                n1 <= n2
                    && l1.lift(*n1).leq(&l2.lift(*n2))
                    && r1.lift(*n1).leq(&r2.lift(*n2))
            }
        }
    }

    /// The least upper bound of two histories. Idempotent, commutative & associative.
    pub fn join(a: &Event, b: &Event) -> Event {
        match (a, b) {
            (Event::Leaf(n1), Event::Leaf(n2)) => Event::Leaf(*n1.max(n2)),
            (Event::Leaf(n1), Event::Node(_, _, _)) => Event::join(
                &Event::Node(*n1, Box::new(Event::zero()), Box::new(Event::zero())),
                b,
            ),
            (Event::Node(_, _, _), Event::Leaf(n2)) => Event::join(
                a,
                &Event::Node(*n2, Box::new(Event::zero()), Box::new(Event::zero())),
            ),
            (Event::Node(n1, l1, r1), Event::Node(n2, l2, r2)) => {
                if n1 > n2 {
                    Event::join(b, a)
                } else {
                    Event::node(
                        *n1,
                        Event::join(l1, &l2.lift(n2 - n1)),
                        Event::join(r1, &r2.lift(n2 - n1)),
                    )
                }
            }
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Leaf(n) => write!(f, "{}", n),
            Event::Node(n, left, right) => write!(f, "({},{},{})", n, left, right),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Vec<Event> {
        vec![
            Event::zero(),
            Event::Leaf(3),
            Event::node(1, Event::Leaf(0), Event::Leaf(2)),
            Event::node(0, Event::node(0, Event::Leaf(1), Event::Leaf(0)), Event::Leaf(4)),
            Event::node(2, Event::Leaf(5), Event::node(0, Event::Leaf(0), Event::Leaf(7))),
        ]
    }

    #[test]
    fn node_normalizes() {
        // Equal leaves collapse...
        assert_eq!(Event::node(2, Event::Leaf(3), Event::Leaf(3)), Event::Leaf(5));
        // ...and a common surplus sinks into the parent.
        assert_eq!(
            Event::node(1, Event::Leaf(2), Event::Leaf(3)),
            Event::Node(3, Box::new(Event::Leaf(0)), Box::new(Event::Leaf(1)))
        );
    }

    #[test]
    fn join_is_idempotent() {
        for h in sample() {
            assert_eq!(Event::join(&h, &h), h);
        }
    }

    #[test]
    fn join_is_commutative() {
        for a in sample() {
            for b in sample() {
                assert_eq!(Event::join(&a, &b), Event::join(&b, &a));
            }
        }
    }

    #[test]
    fn join_is_associative() {
        for a in sample() {
            for b in sample() {
                for c in sample() {
                    assert_eq!(
                        Event::join(&Event::join(&a, &b), &c),
                        Event::join(&a, &Event::join(&b, &c))
                    );
                }
            }
        }
    }

    #[test]
    fn join_is_an_upper_bound() {
        for a in sample() {
            for b in sample() {
                let j = Event::join(&a, &b);
                assert!(a.leq(&j));
                assert!(b.leq(&j));
            }
        }
    }

    #[test]
    fn leq_is_reflexive_and_ordered() {
        for h in sample() {
            assert!(h.leq(&h));
            assert!(h.leq(&h.lift(1)));
            assert!(!h.lift(1).leq(&h));
        }
        // Concurrent histories: more on the left vs. more on the right.
        let a = Event::node(0, Event::Leaf(2), Event::Leaf(0));
        let b = Event::node(0, Event::Leaf(0), Event::Leaf(2));
        assert!(!a.leq(&b));
        assert!(!b.leq(&a));
    }
}
