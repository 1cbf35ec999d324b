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

//! # The confab HTTP surface
//!
//! Two audiences. Clients use `/message/new` & `/message/list`; peers use
//! `/message/new/from/server` (relayed messages carry a stamp & are *not* re-relayed), `/ping`
//! (liveness announcements) & `/fork` (the join protocol's responder side). There's no
//! authentication anywhere-- a peer is whoever says it's a peer-- which is an accepted property
//! of this design, not an oversight.
//!
//! Handlers follow the house pattern: an outer `async fn` that speaks axum, delegating anything
//! fallible to the type system ([Json] rejection for malformed bodies, including malformed
//! stamps) or to [Node], & mapping errors onto [ErrorResponseBody].

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
    journal::Message,
    node::{self, Node},
    peer::Announce,
};

/// A serializable struct for use in HTTP error responses; the standard error shape for every
/// handler in this API.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// Client submission: just the words; the node supplies the stamp.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewMessage {
    pub user: String,
    pub content: String,
}

pub fn make_router(state: Arc<Node>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/healthcheck", get(healthcheck))
        .route("/message/new", post(new_message))
        .route("/message/new/from/server", post(message_from_server))
        .route("/message/list", get(list_messages))
        .route("/ping", post(ping))
        .route("/fork", post(fork))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello, world!"
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

/// `POST /message/new`: a local client submits a message. On success the stamped message is
/// echoed back & fanned out to the roster off the request's hot path.
async fn new_message(
    State(node): State<Arc<Node>>,
    Json(req): Json<NewMessage>,
) -> axum::response::Response {
    match node.submit(&req.user, &req.content) {
        Ok(message) => {
            info!("Accepted a message from {}.", message.user());
            tokio::spawn(node::broadcast_round(node.clone(), message.clone()));
            Json(message).into_response()
        }
        Err(err) => {
            debug!("Rejected a message submission: {}", err);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponseBody {
                    error: format!("{}", err),
                },
            )
                .into_response()
        }
    }
}

/// `POST /message/new/from/server`: a peer relays a stamped message. Merge & store; do *not*
/// relay further (the originating node fanned it out to everyone we know of it from). Validity--
/// non-empty fields, parseable stamp-- is enforced by [Message]'s deserialization, so a bad body
/// bounces off the extractor without touching any state.
async fn message_from_server(
    State(node): State<Arc<Node>>,
    Json(message): Json<Message>,
) -> StatusCode {
    if node.accept(message) {
        debug!("Stored a relayed message.");
    } else {
        debug!("Ignored an already-seen relay.");
    }
    StatusCode::OK
}

/// `GET /message/list`: the journal, in causal order.
async fn list_messages(State(node): State<Arc<Node>>) -> Json<Vec<Message>> {
    Json(node.messages())
}

/// `POST /ping`: a peer announces it's alive; admit it (or re-admit it after a prune).
async fn ping(
    State(node): State<Arc<Node>>,
    Json(announce): Json<Announce>,
) -> axum::response::Response {
    match announce.to_peer() {
        Ok(peer) => {
            node.roster.add(peer);
            StatusCode::OK.into_response()
        }
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorResponseBody {
                error: format!("{}", err),
            },
        )
            .into_response(),
    }
}

/// `POST /fork`: the join protocol's responder side. Fork the local stamp, hand the joiner the
/// grant & a journal snapshot, & admit it to the roster.
async fn fork(
    State(node): State<Arc<Node>>,
    Json(announce): Json<Announce>,
) -> axum::response::Response {
    match announce.to_peer() {
        Ok(joiner) => Json(node.grant_fork(joiner)).into_response(),
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorResponseBody {
                error: format!("{}", err),
            },
        )
            .into_response(),
    }
}
