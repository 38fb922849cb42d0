// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Integration tests for rendezvous membership and SRDI routing
//!
//! Covers:
//! - SRDI index upkeep on a rendezvous peer
//! - Query forwarding and index-directed queries
//! - Re-announcement to a (re)connected rendezvous
//! - Role-dependent membership views

use pipemesh::srdi::SRDI_PIPE_KEY;
use pipemesh::{
    Expiration, Listener, LoopbackNetwork, LoopbackResolver, NodeConfig, PIPE_RESOLVER_NAME, Peer,
    PeerGroup, PeerId, PipeAdvertisement, PipeError, PipeResolverMsg, PipeType, RdvEventKind,
    RendezvousError, ResolverQuery, ResolverService, SrdiEntry, SrdiMessage,
};
use std::sync::Arc;
use tokio::time::{Duration, sleep};

fn node(network: &LoopbackNetwork, name: &str, role: &str) -> (PeerGroup, Arc<LoopbackResolver>) {
    let mut config = NodeConfig::default();
    config.peer.name = name.to_string();
    config.rendezvous.config = role.to_string();
    let endpoint = network.join(config.peer.peer_id());
    let group = PeerGroup::new(&config, endpoint.clone()).unwrap();
    group.start().unwrap();
    (group, endpoint)
}

async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

fn indexed(group: &PeerGroup, pipe: &PipeAdvertisement) -> Vec<PeerId> {
    group
        .srdi_index()
        .search(PIPE_RESOLVER_NAME, pipe.pipe_type.tag(), "Id", pipe.id.as_str())
}

#[tokio::test]
async fn test_rendezvous_indexes_announcements() {
    println!("\n=== SRDI index on a rendezvous ===\n");
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let (edge, _) = node(&network, "edge", "client");
    let (other_edge, _) = node(&network, "other", "client");
    let pipe = PipeAdvertisement::new("pipe-idx", PipeType::Propagate);

    println!("1. Edge accepts on the pipe");
    let (listener, _inbox) = Listener::channel(1);
    edge.pipe_service().add_accept_listener(&pipe, listener.clone()).unwrap();
    settle().await;

    assert_eq!(indexed(&rdv, &pipe), vec![edge.peer_id().clone()]);
    assert_eq!(other_edge.srdi_index().count(), 0);

    println!("2. Edge withdraws");
    edge.pipe_service().remove_accept_listener(&pipe, &listener).unwrap();
    settle().await;
    assert!(indexed(&rdv, &pipe).is_empty());
}

#[tokio::test]
async fn test_rendezvous_forwards_query_to_indexed_peer() {
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let (server, _) = node(&network, "server", "client");
    let pipe = PipeAdvertisement::new("pipe-fwd", PipeType::Unicast);
    server
        .pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();
    settle().await;

    // A bare messaging endpoint asks the rendezvous only
    let probe = network.join("urn:jxta:probe");
    let (responses, mut answers) = Listener::channel(4);
    probe.register_response_listener(PIPE_RESOLVER_NAME, responses).unwrap();

    let msg = PipeResolverMsg::new_query(&pipe, Some(probe.local_peer_id().clone()), None);
    let query = ResolverQuery::new(PIPE_RESOLVER_NAME, probe.local_peer_id().clone(), msg.to_bytes().unwrap());
    probe.send_query(query, Some(rdv.peer_id())).unwrap();

    let response = answers.wait_for_event(Duration::from_secs(1)).await.unwrap();
    let answer = PipeResolverMsg::from_bytes(&response.payload).unwrap();
    assert!(answer.found);
    assert_eq!(answer.peer_id.as_ref(), Some(server.peer_id()));
}

#[tokio::test]
async fn test_edge_does_not_forward() {
    let network = LoopbackNetwork::new();
    let (edge, _) = node(&network, "edge", "client");
    let (server, _) = node(&network, "server", "client");
    let pipe = PipeAdvertisement::new("pipe-nofwd", PipeType::Unicast);
    server
        .pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();
    settle().await;

    let probe = network.join("urn:jxta:probe");
    let (responses, mut answers) = Listener::channel(4);
    probe.register_response_listener(PIPE_RESOLVER_NAME, responses).unwrap();

    let msg = PipeResolverMsg::new_query(&pipe, Some(probe.local_peer_id().clone()), None);
    let query = ResolverQuery::new(PIPE_RESOLVER_NAME, probe.local_peer_id().clone(), msg.to_bytes().unwrap());
    probe.send_query(query, Some(edge.peer_id())).unwrap();

    settle().await;
    assert!(answers.try_recv().is_none());
}

#[tokio::test]
async fn test_rendezvous_queries_indexed_peer_directly() {
    let network = LoopbackNetwork::new();
    let (rdv, rdv_endpoint) = node(&network, "rdv", "rendezvous");
    let (server, _) = node(&network, "server", "client");
    let (_e1, _) = node(&network, "e1", "client");
    let (_e2, _) = node(&network, "e2", "client");
    let pipe = PipeAdvertisement::new("pipe-direct", PipeType::Unicast);
    server
        .pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();
    settle().await;

    let before = rdv_endpoint.sent_messages();
    let peers = rdv
        .resolver()
        .timed_remote_resolve(&pipe, Duration::from_secs(2), None)
        .await
        .unwrap();

    assert_eq!(&peers[0].peer_id, server.peer_id());
    assert_eq!(rdv_endpoint.sent_messages() - before, 1);
}

/// Indexes `peer_id` as a listener of `pipe` without any traffic
fn index_listener(group: &PeerGroup, pipe: &PipeAdvertisement, peer_id: &str) {
    group.srdi_index().apply(
        PIPE_RESOLVER_NAME,
        &SrdiMessage::new(
            PeerId::from(peer_id),
            pipe.pipe_type.tag(),
            vec![SrdiEntry::new(SRDI_PIPE_KEY, pipe.id.as_str(), Expiration::Open)],
        ),
    );
}

#[tokio::test]
async fn test_stale_index_entry_does_not_block_resolution() {
    println!("\n=== Index-directed query with a vanished peer ===\n");
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let (server, _) = node(&network, "b", "client");
    let pipe = PipeAdvertisement::new("pipe-stale", PipeType::Unicast);

    println!("1. B accepts and a peer that never joined stays indexed");
    server
        .pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();
    settle().await;
    index_listener(&rdv, &pipe, "urn:jxta:gone");
    assert_eq!(indexed(&rdv, &pipe).len(), 2);

    println!("2. The rendezvous still reaches B");
    let peers = rdv
        .resolver()
        .timed_remote_resolve(&pipe, Duration::from_secs(2), None)
        .await
        .unwrap();
    assert_eq!(&peers[0].peer_id, server.peer_id());
    assert!(rdv.resolver().pending().is_empty());
}

#[tokio::test]
async fn test_all_indexed_peers_unreachable_fails() {
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let pipe = PipeAdvertisement::new("pipe-nobody", PipeType::Unicast);
    index_listener(&rdv, &pipe, "urn:jxta:gone");
    index_listener(&rdv, &pipe, "urn:jxta:also-gone");

    let (listener, _events) = Listener::channel(1);
    let err = rdv
        .resolver()
        .remote_resolve(&pipe, Duration::from_secs(2), None, listener)
        .unwrap_err();
    assert!(matches!(err, PipeError::Failed(_)));
    assert!(rdv.resolver().pending().is_empty());
}

#[tokio::test]
async fn test_pipes_reannounced_on_connect() {
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let (edge, _) = node(&network, "edge", "client");
    let pipe = PipeAdvertisement::new("pipe-again", PipeType::Unicast);
    edge.pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();
    settle().await;
    assert_eq!(rdv.srdi_index().count(), 1);

    rdv.srdi_index().clear();
    let kind = edge
        .rendezvous()
        .connect_peer(Peer::new(rdv.peer_id().clone()), None)
        .unwrap();
    assert_eq!(kind, RdvEventKind::Connected);
    settle().await;

    assert_eq!(indexed(&rdv, &pipe), vec![edge.peer_id().clone()]);
}

#[tokio::test]
async fn test_client_disconnect_purges_index() {
    let network = LoopbackNetwork::new();
    let (rdv, _) = node(&network, "rdv", "rendezvous");
    let (edge, _) = node(&network, "edge", "client");
    let pipe = PipeAdvertisement::new("pipe-gone", PipeType::Unicast);
    edge.pipe_service()
        .add_accept_listener(&pipe, Listener::channel(1).0)
        .unwrap();

    let kind = rdv
        .rendezvous()
        .connect_peer(Peer::new(edge.peer_id().clone()), None)
        .unwrap();
    assert_eq!(kind, RdvEventKind::ClientConnected);
    settle().await;
    assert_eq!(rdv.srdi_index().count(), 1);

    rdv.rendezvous().disconnect_peer(edge.peer_id());
    settle().await;
    assert_eq!(rdv.srdi_index().count(), 0);
}

#[tokio::test]
async fn test_membership_views_by_role() {
    let network = LoopbackNetwork::new();
    let (adhoc, _) = node(&network, "solo", "adhoc");
    let (rdv, _) = node(&network, "rdv", "rendezvous");

    assert!(adhoc.rendezvous().get_peerview().is_none());
    assert_eq!(adhoc.rendezvous().localview_size(), 0);
    assert_eq!(
        adhoc.rendezvous().connect_peer(Peer::new("urn:jxta:x"), None),
        Err(RendezvousError::AdHocMode)
    );

    rdv.rendezvous().add_neighbor(Peer::new("urn:jxta:n1")).unwrap();
    let local = rdv.rendezvous().get_localview().unwrap();
    assert_eq!(local.len(), 1);

    let global = rdv.rendezvous().get_globalview().unwrap();
    let ids: Vec<&str> = global.iter().map(|p| p.peer_id.as_str()).collect();
    assert_eq!(ids, vec!["urn:jxta:n1", "urn:jxta:rdv"]);

    rdv.stop();
    assert_eq!(
        rdv.rendezvous().get_localview(),
        Err(RendezvousError::NotRunning)
    );
}
