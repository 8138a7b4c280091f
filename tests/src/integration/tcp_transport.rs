//! # TCP End-to-End
//!
//! Peers talking over real loopback sockets with the JSON-lines transport.

#[cfg(test)]
mod tests {
    use crate::cluster::{wait_until, Occupancy, GUARD};
    use futures::future::join_all;
    use ra_mutual_exclusion::{
        ExclusionService, LocalState, PeerIdentity, TcpPeerConnector, TcpPermissionServer,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    type TcpService = ExclusionService<TcpPeerConnector>;

    struct TcpPeer {
        service: TcpService,
        server: JoinHandle<()>,
    }

    /// Start one peer on an ephemeral loopback port.
    async fn start_peer(name: &str) -> TcpPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let service = ExclusionService::new(
            PeerIdentity::new("127.0.0.1", port, name),
            TcpPeerConnector::new().with_connect_timeout(Duration::from_millis(500)),
        );
        let server = TcpPermissionServer::from_listener(listener, Arc::new(service.clone()));
        let server = tokio::spawn(async move {
            let _ = server.serve().await;
        });
        TcpPeer { service, server }
    }

    async fn start_mesh(size: usize) -> Vec<TcpPeer> {
        let mut peers = Vec::with_capacity(size);
        for i in 0..size {
            peers.push(start_peer(&format!("tcp-{i}")).await);
        }
        let identities: Vec<_> = peers.iter().map(|p| p.service.local().clone()).collect();
        for peer in &peers {
            peer.service.register_peers(identities.iter().cloned());
        }
        peers
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_over_tcp() {
        let peers = start_mesh(3).await;
        let occupancy = Occupancy::new();

        let rounds = peers.iter().map(|peer| {
            let service = peer.service.clone();
            let occupancy = occupancy.clone();
            tokio::spawn(async move {
                for _ in 0..2 {
                    let section = service.acquire().await.unwrap();
                    occupancy.enter(&service.local().name);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    occupancy.exit();
                    section.release().unwrap();
                }
            })
        });

        let results = timeout(GUARD, join_all(rounds)).await.expect("bids deadlocked");
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(occupancy.peak(), 1);
        assert_eq!(occupancy.entries().len(), 6);
    }

    #[tokio::test]
    async fn test_deferred_reply_waits_on_open_connection() {
        let peers = start_mesh(2).await;
        let (holder, bidder) = (&peers[0].service, &peers[1].service);

        let held = timeout(GUARD, holder.acquire()).await.unwrap().unwrap();

        let waiting = bidder.clone();
        let bid = tokio::spawn(async move { waiting.acquire().await.map(|s| s.bid_timestamp()) });

        wait_until(|| holder.status().deferred == 1).await;
        assert_eq!(bidder.status().state, LocalState::Wanted);
        assert!(!bid.is_finished());

        assert_eq!(held.release().unwrap(), 1);
        let bid_timestamp = timeout(GUARD, bid).await.unwrap().unwrap().unwrap();
        assert!(bid_timestamp > 1);
    }

    #[tokio::test]
    async fn test_stopped_peer_removed_from_quorum() {
        let peers = start_mesh(3).await;
        let stopped = peers[2].service.local().clone();
        peers[2].server.abort();
        wait_until(|| peers[2].server.is_finished()).await;

        let section = timeout(GUARD, peers[0].service.acquire()).await.unwrap().unwrap();
        assert!(!peers[0].service.registry().contains(&stopped));
        assert_eq!(peers[0].service.status().peers, 1);
        section.release().unwrap();
    }
}
