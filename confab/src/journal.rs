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

//! Messages & the journal
//!
//! A [Message] is a stamped (user, content) pair; both fields must be non-empty, enforced at
//! construction (& hence at deserialization-- a peer can't smuggle an invalid message past the
//! type). The [Journal] is the node's copy of the replicated log: ordered by the stamps' causal
//! order, unique by full equality. Insertion is idempotent, which is what makes re-broadcast &
//! fork snapshots safe to replay.
//!
//! Causally concurrent messages have no "right" order, but every node must pick the *same*
//! wrong one; the tie-break here is lexical, on the serialized stamp text & then on (user,
//! content).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use confab_clock::Stamp;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A message's {field} may not be empty"))]
    EmptyField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Message                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Deserialization funnels through this & then through `Message::new`, so the validity invariant
// holds for messages off the wire, too.
#[derive(Deserialize)]
struct RawMessage {
    user: String,
    content: String,
    stamp: Stamp,
}

/// One chat message: who said it, what they said & when-- "when" in the causal, not the
/// wall-clock, sense. Immutable once constructed.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    user: String,
    content: String,
    stamp: Stamp,
}

impl Message {
    pub fn new(user: &str, content: &str, stamp: Stamp) -> Result<Message> {
        Message::validate(user, content)?;
        Ok(Message {
            user: user.to_owned(),
            content: content.to_owned(),
            stamp,
        })
    }

    /// Check the validity invariant without constructing anything; lets callers reject bad
    /// input *before* touching any shared state.
    pub fn validate(user: &str, content: &str) -> Result<()> {
        ensure!(!user.is_empty(), EmptyFieldSnafu { field: "user" });
        ensure!(!content.is_empty(), EmptyFieldSnafu { field: "content" });
        Ok(())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Causal order, totalized: stamp order where the stamps are comparable, lexical tie-break
    /// where they're concurrent.
    pub fn causal_cmp(&self, other: &Message) -> Ordering {
        let fwd = self.stamp.leq(&other.stamp);
        let rev = other.stamp.leq(&self.stamp);
        match (fwd, rev) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            // Concurrent, or equal histories under different identities: fall back to text.
            _ => self
                .stamp
                .to_string()
                .cmp(&other.stamp.to_string())
                .then_with(|| self.user.cmp(&other.user))
                .then_with(|| self.content.cmp(&other.content)),
        }
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Message> {
        Message::new(&raw.user, &raw.content, raw.stamp)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Journal                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The node's copy of the replicated log.
#[derive(Debug, Default)]
pub struct Journal {
    messages: Vec<Message>,
}

impl Journal {
    pub fn new() -> Journal {
        Journal::default()
    }

    /// Insert `message` in causal-sort position; a no-op returning false if an equal message is
    /// already present. The check & the insertion are one operation-- callers serialize access
    /// to the journal, so the uniqueness invariant can't be raced away.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.messages.contains(&message) {
            return false;
        }
        let at = self
            .messages
            .iter()
            .position(|existing| message.causal_cmp(existing) == Ordering::Less)
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
        true
    }

    /// An owned, ordered copy, for the list endpoint & for fork snapshots; never the live
    /// container.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_fields_are_rejected() {
        let stamp = Stamp::seed().event();
        assert!(Message::new("", "hi", stamp.clone()).is_err());
        assert!(Message::new("alice", "", stamp.clone()).is_err());
        assert!(Message::new("alice", "hi", stamp).is_ok());
    }

    #[test]
    fn deserialization_enforces_validity() {
        let good = format!(
            r#"{{"user":"alice","content":"hi","stamp":"{}"}}"#,
            Stamp::seed().event()
        );
        assert!(serde_json::from_str::<Message>(&good).is_ok());
        let empty_user = format!(
            r#"{{"user":"","content":"hi","stamp":"{}"}}"#,
            Stamp::seed().event()
        );
        assert!(serde_json::from_str::<Message>(&empty_user).is_err());
        let bad_stamp = r#"{"user":"alice","content":"hi","stamp":"bogus"}"#;
        assert!(serde_json::from_str::<Message>(bad_stamp).is_err());
    }

    #[test]
    fn insertion_is_idempotent() {
        let mut journal = Journal::new();
        let message = Message::new("alice", "hi", Stamp::seed().event()).unwrap();
        assert!(journal.insert(message.clone()));
        assert!(!journal.insert(message));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn causal_order_is_respected() {
        let s1 = Stamp::seed().event();
        let s2 = s1.event();
        let s3 = s2.event();
        let mut journal = Journal::new();
        // Inserted out of order...
        journal.insert(Message::new("carol", "third", s3).unwrap());
        journal.insert(Message::new("alice", "first", s1).unwrap());
        journal.insert(Message::new("bob", "second", s2).unwrap());
        let contents = journal
            .snapshot()
            .iter()
            .map(|m| m.content().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn concurrent_messages_order_deterministically() {
        let (a, b) = Stamp::seed().fork();
        let a = a.event();
        let b = b.event();
        let m1 = Message::new("alice", "left", a).unwrap();
        let m2 = Message::new("bob", "right", b).unwrap();
        let mut fwd = Journal::new();
        fwd.insert(m1.clone());
        fwd.insert(m2.clone());
        let mut rev = Journal::new();
        rev.insert(m2);
        rev.insert(m1);
        assert_eq!(fwd.snapshot(), rev.snapshot());
    }

    #[test]
    fn equality_is_by_user_content_and_stamp() {
        let stamp = Stamp::seed().event();
        let m1 = Message::new("alice", "hi", stamp.clone()).unwrap();
        let m2 = Message::new("alice", "hi", stamp.clone()).unwrap();
        let m3 = Message::new("alice", "hi", stamp.event()).unwrap();
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }
}
