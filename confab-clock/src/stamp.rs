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

//! Causal stamps
//!
//! A [Stamp] pairs an identity tree with an event tree: "who am I" & "what have I seen". The
//! seed stamp owns the whole causal namespace with an empty history; a cluster grows by
//! [Stamp::fork]-ing an existing member's stamp & shrinks by simply abandoning identities (an
//! abandoned identity costs nothing once its events have been joined into the survivors).
//!
//! The three operations:
//!
//! - [Stamp::event]: record one logical event attributable to this stamp's identity; the
//!   history strictly grows,
//! - [Stamp::fork]: split the identity into two disjoint identities sharing the history,
//! - [Stamp::merge]: fold another stamp's history into this one (least upper bound), keeping
//!   this stamp's identity. Merging alone does *not* record an event; callers that want the
//!   textbook "receive" (merge then advance) compose the two.
//!
//! A stamp serializes as a parenthesized text form, e.g. `((1,0),(0,1,2))`; [Display] &
//! [FromStr] round-trip losslessly, and the [serde] implementations delegate to them, so on the
//! wire a stamp is just a string.
//!
//! [Display]: std::fmt::Display
//! [FromStr]: std::str::FromStr

use std::{cmp::Ordering, fmt::Display, str::FromStr};

use snafu::{prelude::*, Backtrace};

use crate::{event::Event, id::Id};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("expected {expected} at offset {offset} of {text:?}"))]
    Syntax {
        text: String,
        offset: usize,
        expected: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("trailing characters at offset {offset} of {text:?}"))]
    Trailing {
        text: String,
        offset: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Stamp                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A causal stamp: an identity plus an event history.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Stamp {
    id: Id,
    history: Event,
}

impl Stamp {
    /// The stamp owning the entire causal namespace, with an empty history.
    ///
    /// Exactly one seed may ever exist un-forked in a cluster; every other stamp descends from
    /// it through [Stamp::fork].
    pub fn seed() -> Stamp {
        Stamp {
            id: Id::One,
            history: Event::zero(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn history(&self) -> &Event {
        &self.history
    }

    /// Split this stamp into two stamps with disjoint identities & this stamp's history.
    ///
    /// The caller conventionally keeps the first & grants the second to a joining node; from
    /// this point on, no event recorded under one identity can ever be mistaken for an event
    /// recorded under the other.
    pub fn fork(&self) -> (Stamp, Stamp) {
        let (keep, grant) = self.id.split();
        (
            Stamp {
                id: keep,
                history: self.history.clone(),
            },
            Stamp {
                id: grant,
                history: self.history.clone(),
            },
        )
    }

    /// Record one logical event attributable to this stamp's identity.
    ///
    /// The new history strictly dominates the old one. Prefers *filling*-- inflating regions
    /// this identity owns up to counts already reached elsewhere, which can simplify the tree--
    /// and only *grows* (adds resolution) when filling makes no progress.
    pub fn event(&self) -> Stamp {
        assert!(
            !self.id.is_zero(),
            "an anonymous stamp cannot record events"
        );
        let filled = fill(&self.id, &self.history);
        let history = if filled != self.history {
            filled
        } else {
            grow(&self.id, &self.history).0
        };
        Stamp {
            id: self.id.clone(),
            history,
        }
    }

    /// Fold `other`'s history into this stamp (pointwise least upper bound), keeping this
    /// stamp's identity. Idempotent; does not record an event.
    pub fn merge(&self, other: &Stamp) -> Stamp {
        Stamp {
            id: self.id.clone(),
            history: Event::join(&self.history, &other.history),
        }
    }

    /// True iff this stamp's history is causally dominated by `other`'s.
    pub fn leq(&self, other: &Stamp) -> bool {
        self.history.leq(&other.history)
    }

    /// A total order imposed on top of the (genuinely partial) causal order, for use as a sort
    /// key: [Ordering::Equal] iff the stamps are fully equal, else [Ordering::Less] iff
    /// `self.leq(other)`, else [Ordering::Greater]. Note that `Greater` covers the causally
    /// *concurrent* case; callers wanting a stable order between concurrent stamps must apply
    /// their own tie-break.
    pub fn compare(&self, other: &Stamp) -> Ordering {
        if self == other {
            Ordering::Equal
        } else if self.leq(other) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         fill & grow                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Inflate regions of `e` owned by `i` up to counts already reached by their siblings, without
/// ever raising any region past what `e` records elsewhere. Returns `e` unchanged when the
/// identity gives it no room to simplify.
fn fill(i: &Id, e: &Event) -> Event {
    match (i, e) {
        (Id::Zero, _) => e.clone(),
        (Id::One, _) => Event::Leaf(e.max()),
        (_, Event::Leaf(_)) => e.clone(),
        (Id::Node(il, ir), Event::Node(n, el, er)) => {
            if **il == Id::One {
                let er2 = fill(ir, er);
                let floor = el.max().max(er2.value());
                Event::node(*n, Event::Leaf(floor), er2)
            } else if **ir == Id::One {
                let el2 = fill(il, el);
                let floor = er.max().max(el2.value());
                Event::node(*n, el2, Event::Leaf(floor))
            } else {
                Event::node(*n, fill(il, el), fill(ir, er))
            }
        }
    }
}

// Cost charged for expanding a leaf into an interior node; chosen to dwarf any plausible tree
// depth so that grow always prefers adding one count over adding resolution.
const EXPAND_COST: u64 = 1 << 32;

/// Add one event somewhere in the region owned by `i`, growing the tree where necessary.
/// Returns the new history along with a cost used to pick the cheaper of two candidate growth
/// sites.
fn grow(i: &Id, e: &Event) -> (Event, u64) {
    match (i, e) {
        (Id::One, Event::Leaf(n)) => (Event::Leaf(n + 1), 0),
        (Id::Node(il, ir), Event::Node(n, el, er)) => {
            if il.is_zero() {
                let (er2, c) = grow(ir, er);
                (Event::node(*n, (**el).clone(), er2), c + 1)
            } else if ir.is_zero() {
                let (el2, c) = grow(il, el);
                (Event::node(*n, el2, (**er).clone()), c + 1)
            } else {
                let (el2, cl) = grow(il, el);
                let (er2, cr) = grow(ir, er);
                if cl <= cr {
                    (Event::node(*n, el2, (**er).clone()), cl + 1)
                } else {
                    (Event::node(*n, (**el).clone(), er2), cr + 1)
                }
            }
        }
        (_, Event::Leaf(n)) => {
            // The identity has structure the history lacks; expand the leaf & retry.
            let (e2, c) = grow(
                i,
                &Event::Node(*n, Box::new(Event::zero()), Box::new(Event::zero())),
            );
            (e2, c + EXPAND_COST)
        }
        (Id::Zero, Event::Node(_, _, _)) => {
            // Precluded by the assert in Stamp::event together with Id normalization.
            unreachable!("grow over an empty identity")
        }
        (Id::One, Event::Node(_, _, _)) => {
            // Precluded: fill would have collapsed the history first.
            unreachable!("grow of a whole identity over an interior node")
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         text encoding                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

impl Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.id, self.history)
    }
}

/// A hand-rolled cursor over the input text; the grammar is three productions deep & LL(1), so
/// anything fancier would be overkill.
struct Cursor<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Cursor<'a> {
        Cursor { text, offset: 0 }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.offset += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.offset..].chars().next()
    }

    fn eat(&mut self, want: char, expected: &'static str) -> Result<()> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == want => {
                self.offset += c.len_utf8();
                Ok(())
            }
            _ => SyntaxSnafu {
                text: self.text.to_owned(),
                offset: self.offset,
                expected,
            }
            .fail(),
        }
    }

    fn number(&mut self) -> Result<u64> {
        self.skip_whitespace();
        let start = self.offset;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.offset += 1;
        }
        self.text[start..self.offset].parse::<u64>().ok().context(SyntaxSnafu {
            text: self.text.to_owned(),
            offset: start,
            expected: "a number",
        })
    }

    fn id(&mut self) -> Result<Id> {
        self.skip_whitespace();
        match self.peek() {
            Some('0') => {
                self.offset += 1;
                Ok(Id::Zero)
            }
            Some('1') => {
                self.offset += 1;
                Ok(Id::One)
            }
            Some('(') => {
                self.offset += 1;
                let left = self.id()?;
                self.eat(',', "','")?;
                let right = self.id()?;
                self.eat(')', "')'")?;
                Ok(Id::node(left, right))
            }
            _ => SyntaxSnafu {
                text: self.text.to_owned(),
                offset: self.offset,
                expected: "'0', '1' or '('",
            }
            .fail(),
        }
    }

    fn event(&mut self) -> Result<Event> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.offset += 1;
                let n = self.number()?;
                self.eat(',', "','")?;
                let left = self.event()?;
                self.eat(',', "','")?;
                let right = self.event()?;
                self.eat(')', "')'")?;
                Ok(Event::node(n, left, right))
            }
            Some(c) if c.is_ascii_digit() => Ok(Event::Leaf(self.number()?)),
            _ => SyntaxSnafu {
                text: self.text.to_owned(),
                offset: self.offset,
                expected: "a number or '('",
            }
            .fail(),
        }
    }

    fn stamp(&mut self) -> Result<Stamp> {
        self.eat('(', "'('")?;
        let id = self.id()?;
        self.eat(',', "','")?;
        let history = self.event()?;
        self.eat(')', "')'")?;
        self.skip_whitespace();
        ensure!(
            self.offset == self.text.len(),
            TrailingSnafu {
                text: self.text.to_owned(),
                offset: self.offset,
            }
        );
        Ok(Stamp { id, history })
    }
}

impl FromStr for Stamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Stamp> {
        Cursor::new(s).stamp()
    }
}

// On the wire, a stamp is just its text form; histories received from peers are re-parsed (&
// hence re-validated & re-normalized) on the way in.
impl serde::Serialize for Stamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Stamp {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Stamp, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        text.parse::<Stamp>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Two heirs of a fork can never produce confusable histories, no matter how many events
    // each records on its own.
    #[test]
    fn fork_is_disjoint() {
        let (mut a, mut b) = Stamp::seed().fork();
        let fork_point = a.history().clone();
        for _ in 0..4 {
            a = a.event();
            b = b.event();
            assert!(!a.leq(&b));
            assert!(!b.leq(&a));
            assert!(fork_point.leq(a.history()));
            assert!(fork_point.leq(b.history()));
        }
    }

    #[test]
    fn event_is_monotone() {
        let (a, b) = Stamp::seed().fork();
        let (b, c) = b.fork();
        for mut s in [Stamp::seed(), a, b, c] {
            for _ in 0..8 {
                let next = s.event();
                assert!(s.leq(&next));
                assert!(!next.leq(&s));
                s = next;
            }
        }
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        let (a, b) = Stamp::seed().fork();
        let a = a.event().event();
        let b = b.event();
        assert_eq!(a.merge(&a).history(), a.history());
        assert_eq!(a.merge(&b).history(), b.merge(&a).history());
        // and merging dominates both inputs:
        let m = a.merge(&b);
        assert!(a.leq(&m));
        assert!(b.leq(&m));
    }

    #[test]
    fn merge_keeps_identity() {
        let (a, b) = Stamp::seed().fork();
        let merged = a.merge(&b.event());
        assert_eq!(merged.id(), a.id());
    }

    #[test]
    fn compare_orders_a_causal_chain() {
        let s0 = Stamp::seed();
        let s1 = s0.event();
        let s2 = s1.event();
        assert_eq!(s0.compare(&s1), Ordering::Less);
        assert_eq!(s2.compare(&s1), Ordering::Greater);
        assert_eq!(s1.compare(&s1), Ordering::Equal);
    }

    #[test]
    fn text_round_trips() {
        let (a, b) = Stamp::seed().fork();
        let (b, c) = b.fork();
        let mut stamps = vec![Stamp::seed(), a.event(), b.event().event(), c];
        // ...and something with real tree structure:
        let busy = stamps[1].merge(&stamps[2]).event();
        stamps.push(busy);
        for stamp in stamps {
            let text = stamp.to_string();
            assert_eq!(text.parse::<Stamp>().unwrap(), stamp, "{}", text);
        }
    }

    #[test]
    fn serde_delegates_to_the_text_form() {
        let stamp = Stamp::seed().event();
        let json = serde_json::to_string(&stamp).unwrap();
        assert_eq!(json, format!("\"{}\"", stamp));
        assert_eq!(serde_json::from_str::<Stamp>(&json).unwrap(), stamp);
    }

    #[test]
    fn malformed_text_is_rejected() {
        for text in ["", "bogus", "(1", "(1,)", "(1,0", "((1,0),0) trailing", "(2,0)"] {
            assert!(text.parse::<Stamp>().is_err(), "{:?}", text);
        }
    }

    // The seed's first few events stay leaves; a fork's events add resolution only when forced.
    #[test]
    fn histories_stay_small() {
        let s = Stamp::seed().event().event().event();
        assert_eq!(s.history(), &Event::Leaf(3));
        let (a, _b) = s.fork();
        let a = a.event();
        assert_eq!(a.history(), &Event::node(3, Event::Leaf(1), Event::Leaf(0)));
    }
}
