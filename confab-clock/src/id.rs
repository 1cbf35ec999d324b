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

//! Identity trees
//!
//! An identity is a binary tree describing which share of the causal namespace (think: which
//! sub-intervals of \[0, 1)) a stamp owns. [Id::Zero] owns nothing, [Id::One] owns everything
//! beneath this point, and an interior node owns whatever its two children own. The seed stamp
//! owns the whole interval; every other identity in a cluster descends from it by [Id::split].

use std::fmt::Display;

/// One stamp's share of the causal namespace.
///
/// Kept normalized: `(0, 0)` collapses to [Id::Zero] & `(1, 1)` to [Id::One], so structural
/// equality is semantic equality. Construct interior nodes through [Id::node] to preserve this.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Id {
    Zero,
    One,
    Node(Box<Id>, Box<Id>),
}

impl Id {
    /// Normalizing constructor for interior nodes.
    pub fn node(left: Id, right: Id) -> Id {
        match (left, right) {
            (Id::Zero, Id::Zero) => Id::Zero,
            (Id::One, Id::One) => Id::One,
            (left, right) => Id::Node(Box::new(left), Box::new(right)),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Id::Zero)
    }

    /// Split this identity into two identities owning disjoint halves of its namespace.
    ///
    /// The returned pair covers exactly what `self` covered; neither half overlaps the other. An
    /// owned leaf splits down the middle; an interior node with one empty side recurses into the
    /// occupied side; an interior node occupied on both sides simply hands one side to each heir.
    pub fn split(&self) -> (Id, Id) {
        match self {
            Id::Zero => (Id::Zero, Id::Zero),
            Id::One => (
                Id::Node(Box::new(Id::One), Box::new(Id::Zero)),
                Id::Node(Box::new(Id::Zero), Box::new(Id::One)),
            ),
            Id::Node(left, right) => {
                if left.is_zero() {
                    let (r1, r2) = right.split();
                    (Id::node(Id::Zero, r1), Id::node(Id::Zero, r2))
                } else if right.is_zero() {
                    let (l1, l2) = left.split();
                    (Id::node(l1, Id::Zero), Id::node(l2, Id::Zero))
                } else {
                    (
                        Id::node((**left).clone(), Id::Zero),
                        Id::node(Id::Zero, (**right).clone()),
                    )
                }
            }
        }
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Zero => write!(f, "0"),
            Id::One => write!(f, "1"),
            Id::Node(left, right) => write!(f, "({},{})", left, right),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_normalizes() {
        assert_eq!(Id::node(Id::Zero, Id::Zero), Id::Zero);
        assert_eq!(Id::node(Id::One, Id::One), Id::One);
        assert_eq!(
            Id::node(Id::One, Id::Zero),
            Id::Node(Box::new(Id::One), Box::new(Id::Zero))
        );
    }

    // Splitting, repeatedly & along every branch, never hands the same namespace to both heirs.
    #[test]
    fn split_is_disjoint() {
        fn overlaps(a: &Id, b: &Id) -> bool {
            match (a, b) {
                (Id::Zero, _) | (_, Id::Zero) => false,
                (Id::One, _) | (_, Id::One) => true,
                (Id::Node(al, ar), Id::Node(bl, br)) => overlaps(al, bl) || overlaps(ar, br),
            }
        }

        let (a, b) = Id::One.split();
        assert!(!overlaps(&a, &b));

        let (aa, ab) = a.split();
        assert!(!overlaps(&aa, &ab));
        assert!(!overlaps(&aa, &b));
        assert!(!overlaps(&ab, &b));

        let (ba, bb) = b.split();
        assert!(!overlaps(&ba, &bb));
        assert!(!overlaps(&aa, &ba));
        assert!(!overlaps(&ab, &bb));
    }

    #[test]
    fn display() {
        let (a, b) = Id::One.split();
        assert_eq!(format!("{}", a), "(1,0)");
        assert_eq!(format!("{}", b), "(0,1)");
        let (aa, _) = a.split();
        assert_eq!(format!("{}", aa), "((1,0),0)");
    }
}
