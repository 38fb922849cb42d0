// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

use clap::Parser;
use pipemesh::{
    CliArgs, Listener, LoopbackNetwork, MeshError, NodeConfig, PeerGroup, PipeAdvertisement,
    PipeMessage, PipeType,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), MeshError> {
    let args = CliArgs::parse();
    let config = NodeConfig::from_cli(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let network = LoopbackNetwork::new();
    let count = args.peers.max(2);
    let mut groups = Vec::with_capacity(count);
    for i in 0..count {
        let mut peer_config = config.clone();
        peer_config.peer.name = format!("{}-{}", config.peer.name, i);
        peer_config.peer.peer_id = None;

        let group = PeerGroup::new(&peer_config, network.join(peer_config.peer.peer_id()))?;
        group.start()?;
        info!(peer_id = %group.peer_id(), status = %group.rendezvous().status(), "peer up");
        groups.push(group);
    }

    let client = &groups[0];
    let server = &groups[count - 1];

    let pipe = PipeAdvertisement::new("urn:jxta:pipe:demo", PipeType::Unicast).with_name("demo");
    let (listener, mut inbox) = Listener::channel(8);
    server.pipe_service().add_accept_listener(&pipe, listener)?;
    info!(pipe_id = %pipe.id, peer_id = %server.peer_id(), "accepting on pipe");

    match client
        .pipe_service()
        .timed_resolve(&pipe, client.default_timeout(), None)
        .await
    {
        Ok(peers) => {
            for peer in &peers {
                info!(pipe_id = %pipe.id, peer_id = %peer.peer_id, "pipe resolved");
            }
            let message = PipeMessage {
                source: client.peer_id().clone(),
                payload: b"hello over the mesh".to_vec(),
            };
            server.pipe_service().deliver(&pipe, message)?;
            if let Some(received) = inbox.recv().await {
                info!(
                    from = %received.source,
                    payload = %String::from_utf8_lossy(&received.payload),
                    "message accepted"
                );
            }
        }
        Err(e) => error!(pipe_id = %pipe.id, error = %e, "pipe resolution failed"),
    }

    for group in &groups {
        group.stop();
    }
    Ok(())
}
