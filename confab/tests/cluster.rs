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

//! # cluster integration tests
//!
//! End-to-end exercises against real nodes: each test stands up one or more in-process confab
//! nodes on ephemeral ports & drives them over actual HTTP.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::net::TcpListener;

use confab::{
    api::make_router,
    client::HttpTransport,
    join::{self, Phase},
    node::Node,
    peer::PeerAddr,
};

/// Stand up a node on an ephemeral port; returns it along with its address.
async fn spawn_node() -> (Arc<Node>, PeerAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let origin: PeerAddr = format!("http://127.0.0.1:{}", port).parse().unwrap();
    let transport = HttpTransport::new(Duration::from_secs(2), "confab-test").unwrap();
    let node = Arc::new(Node::new(origin.clone(), Arc::new(transport), 4));
    let router = make_router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (node, origin)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Poll `check` for up to five seconds; panic if it never comes true.
async fn eventually<F: Fn() -> bool>(check: F, what: &str) {
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

// Scenario A: a seedless node mints a stamp for a client submission & lists it back.
#[tokio::test]
async fn isolated_node_accepts_and_lists() {
    let (_node, addr) = spawn_node().await;
    let client = client();

    let rsp = client
        .post(format!("{}/message/new", addr))
        .json(&json!({"user": "alice", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert!(rsp.status().is_success());
    let echoed: serde_json::Value = rsp.json().await.unwrap();
    assert!(echoed["stamp"].is_string());

    let listed: Vec<serde_json::Value> = client
        .get(format!("{}/message/list", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["user"], "alice");
    assert_eq!(listed[0]["content"], "hi");
    assert_eq!(listed[0]["stamp"], echoed["stamp"]);
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let (node, addr) = spawn_node().await;
    let client = client();

    for body in [
        json!({"user": "", "content": "hi"}),
        json!({"user": "alice", "content": ""}),
    ] {
        let rsp = client
            .post(format!("{}/message/new", addr))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    }
    assert!(node.messages().is_empty());

    // A peer relay with a mangled stamp bounces off deserialization:
    let rsp = client
        .post(format!("{}/message/new/from/server", addr))
        .json(&json!({"user": "mallory", "content": "hi", "stamp": "bogus"}))
        .send()
        .await
        .unwrap();
    assert!(!rsp.status().is_success());
    assert!(node.messages().is_empty());
}

// Scenario B: a node seeded with X's address copies X's history & obtains a disjoint identity.
#[tokio::test]
async fn joining_copies_history_and_forks_identity() {
    let (x, x_addr) = spawn_node().await;
    x.submit("alice", "hi").unwrap();
    x.submit("alice", "anyone home?").unwrap();

    let (y, y_addr) = spawn_node().await;
    assert_eq!(join::bootstrap(&y, &[x_addr.clone()]).await, Phase::Joined);

    assert_eq!(y.messages(), x.messages());
    assert!(x.roster.contains(&y_addr));
    assert!(y.roster.contains(&x_addr));

    // Identities are pairwise disjoint going forward:
    let ours = x.stamp().event();
    let theirs = y.stamp().event();
    assert!(!ours.leq(&theirs));
    assert!(!theirs.leq(&ours));
}

// Scenario C: once peered, a message posted to X shows up on Y with an equal stamp.
#[tokio::test]
async fn broadcast_reaches_peers() {
    let (x, x_addr) = spawn_node().await;
    let (y, _y_addr) = spawn_node().await;
    assert_eq!(join::bootstrap(&y, &[x_addr.clone()]).await, Phase::Joined);

    let rsp = client()
        .post(format!("{}/message/new", x_addr))
        .json(&json!({"user": "alice", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert!(rsp.status().is_success());

    eventually(|| y.messages().len() == 1, "the relay to reach Y").await;
    // Same message, same stamp:
    assert_eq!(y.messages(), x.messages());
}

// Scenario D: an unreachable peer is pruned by the first failed round & re-admitted on ping.
#[tokio::test]
async fn unreachable_peers_are_pruned_and_can_rejoin() {
    let (x, x_addr) = spawn_node().await;

    // An address that is definitely not listening: bind a port, then free it.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dead: PeerAddr = format!("http://127.0.0.1:{}", dead_port).parse().unwrap();
    x.roster.add(dead.clone());

    // The first dissemination round to touch the dead peer evicts it:
    let rsp = client()
        .post(format!("{}/message/new", x_addr))
        .json(&json!({"user": "alice", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert!(rsp.status().is_success());
    eventually(|| !x.roster.contains(&dead), "the dead peer to be pruned").await;

    // Until it announces itself again:
    let rsp = client()
        .post(format!("{}/ping", x_addr))
        .json(&json!({"ip": "127.0.0.1", "port": dead_port}))
        .send()
        .await
        .unwrap();
    assert!(rsp.status().is_success());
    assert!(x.roster.contains(&dead));
}
