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

//! Client-side networking
//!
//! The fan-out engine doesn't care how bytes reach a peer; it is written against the [Transport]
//! trait, & the application supplies an implementation. In production that's [HttpTransport]--
//! [reqwest] with a bounded per-request timeout-- while tests script their own. Note what is
//! *not* here: no retries, no backoff, no connection babysitting. A failed call is a failed
//! call; the roster's prune-on-first-failure policy does the rest.
//!
//! Every outcome a caller could see is collapsed into success or [Error]; a non-2xx status is
//! just as much a transport failure as a refused connection, because either way the peer did
//! not take delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use snafu::{prelude::*, Backtrace};
use tap::Pipe;

use crate::{
    journal::Message,
    node::ForkGrant,
    peer::{Announce, PeerAddr},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to build the HTTP client: {source}"))]
    Build {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Call to {peer} failed: {source}"))]
    Call {
        peer: PeerAddr,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode {peer}'s response: {source}"))]
    Decode {
        peer: PeerAddr,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{peer} answered {status}"))]
    Status {
        peer: PeerAddr,
        status: reqwest::StatusCode,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Transport                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The point-to-point calls one confab node can make on another: a reliable, one-shot
/// request/response that can fail or time out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Relay a stamped message to `peer`.
    async fn send_message(&self, peer: &PeerAddr, message: &Message) -> Result<()>;
    /// Announce `origin`'s liveness to `peer`.
    async fn ping(&self, peer: &PeerAddr, origin: &PeerAddr) -> Result<()>;
    /// Ask `peer` to fork its stamp & hand `origin` a disjoint identity plus its history.
    async fn fork(&self, peer: &PeerAddr, origin: &PeerAddr) -> Result<ForkGrant>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          HttpTransport                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// [Transport] over plain HTTP.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<HttpTransport> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context(BuildSnafu)?
            .pipe(|client| Ok(HttpTransport { client }))
    }

    async fn post<B: Serialize + Sync>(
        &self,
        peer: &PeerAddr,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", peer.url(), path);
        let rsp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context(CallSnafu { peer: peer.clone() })?;
        ensure!(
            rsp.status().is_success(),
            StatusSnafu {
                peer: peer.clone(),
                status: rsp.status(),
            }
        );
        Ok(rsp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_message(&self, peer: &PeerAddr, message: &Message) -> Result<()> {
        self.post(peer, "/message/new/from/server", message)
            .await
            .map(|_| ())
    }

    async fn ping(&self, peer: &PeerAddr, origin: &PeerAddr) -> Result<()> {
        self.post(peer, "/ping", &Announce::from(origin))
            .await
            .map(|_| ())
    }

    async fn fork(&self, peer: &PeerAddr, origin: &PeerAddr) -> Result<ForkGrant> {
        self.post(peer, "/fork", &Announce::from(origin))
            .await?
            .json::<ForkGrant>()
            .await
            .context(DecodeSnafu { peer: peer.clone() })
    }
}
