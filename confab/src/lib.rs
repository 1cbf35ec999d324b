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

//! # confab
//!
//! A peer-to-peer replicated chat log.
//!
//! Every node accepts messages from local clients, stores them & disseminates them to every
//! other node it knows of; all nodes eventually converge on the same message set, ordered
//! causally (not by wall-clock) via the interval tree clocks in [confab_clock]. There is no
//! coordinator, no consensus & no fixed membership: nodes join by forking an existing member's
//! clock identity, discover each other by gossiped liveness pings, & are dropped from a peer's
//! roster the first time a call to them fails.
//!
//! The binary lives in `src/bin/confabd.rs`; this library crate holds everything it serves:
//!
//! - [peer] & [roster]: canonical peer addresses & the membership set,
//! - [journal]: validated messages & the causally-ordered, deduplicating log,
//! - [gossip]: the single-flight, bounded fan-out engine,
//! - [client]: the transport seam & its [reqwest] implementation,
//! - [node]: the shared state handlers work against, & the receipt paths,
//! - [join]: the fork bootstrap a new node runs against its seeds,
//! - [api]: the axum HTTP surface.

pub mod api;
pub mod client;
pub mod gossip;
pub mod join;
pub mod journal;
pub mod node;
pub mod peer;
pub mod roster;
