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

//! # confab-clock
//!
//! Interval tree clocks for [confab].
//!
//! [confab]: https://github.com/sp1ff/confab
//!
//! # Introduction
//!
//! confab nodes need to order chat messages causally, without wall-clock time and without central
//! coordination. The textbook answer is the vector clock, but vector clocks presume a fixed,
//! globally-known set of participants-- every clock carries one counter per node, and retiring a
//! node means garbage-collecting its entry everywhere. confab's membership is dynamic (nodes join
//! by forking an existing member & leave by simply being pruned), so I wanted a causality
//! mechanism whose *identities* can be created & retired as cheaply as its *counters* can be
//! incremented.
//!
//! Interval tree clocks (Almeida, Baquero & Fonte, "Interval Tree Clocks: A New Clock Mechanism
//! for Dynamic Systems", OPODIS 2008) are exactly that: a [Stamp] pairs an identity tree (a share
//! of the unit interval) with an event tree (a variable-resolution history over that interval).
//! `fork` splits an identity in two disjoint halves, `event` inflates the history over the
//! caller's own interval, and `join` takes the pointwise least upper bound of two histories.
//!
//! This crate is deliberately I/O-free: it defines the value types, the three operations, the
//! partial order, and a lossless text encoding ([std::fmt::Display]/[std::str::FromStr], with
//! [serde] delegating to the same form so a stamp travels as an ordinary JSON string). Everything
//! network-shaped lives in the `confab` crate proper.

pub mod event;
pub mod id;
pub mod stamp;

pub use event::Event;
pub use id::Id;
pub use stamp::{Error, Result, Stamp};
