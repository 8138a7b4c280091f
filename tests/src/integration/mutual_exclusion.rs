//! # Safety and Liveness
//!
//! Many peers bidding at once over `LocalNetwork`:
//!
//! 1. At most one peer is inside the critical section at any instant
//! 2. Every bid eventually enters (no starvation, no deadlock)
//! 3. Clocks only move forward and absorb every timestamp they see

#[cfg(test)]
mod tests {
    use crate::cluster::{identity, Cluster, Occupancy, GUARD};
    use futures::future::join_all;
    use ra_mutual_exclusion::{
        invariant_clock_strictly_increasing, invariant_single_holder, LocalState, PermissionApi,
        Request,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    // =========================================================================
    // SAFETY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bids_never_overlap() {
        let cluster = Cluster::new(5);
        let occupancy = Occupancy::new();

        let rounds = cluster.peers.iter().cloned().map(|peer| {
            let occupancy = occupancy.clone();
            tokio::spawn(async move {
                for _ in 0..3 {
                    let section = peer.acquire().await.unwrap();
                    occupancy.enter(&peer.local().name);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    occupancy.exit();
                    section.release().unwrap();
                }
            })
        });

        let results = timeout(GUARD, join_all(rounds)).await.expect("bids deadlocked");
        assert!(results.iter().all(|r| r.is_ok()));

        assert_eq!(occupancy.peak(), 1);
        assert_eq!(occupancy.entries().len(), 15);
        assert!(invariant_single_holder(&cluster.states()));
        assert!(cluster.states().iter().all(|s| *s == LocalState::Released));
    }

    #[tokio::test]
    async fn test_every_peer_enters_once() {
        let cluster = Cluster::new(4);
        let occupancy = Occupancy::new();

        let bids = cluster.peers.iter().map(|peer| {
            let occupancy = occupancy.clone();
            async move {
                let section = peer.acquire().await.unwrap();
                occupancy.enter(&peer.local().name);
                tokio::task::yield_now().await;
                occupancy.exit();
                section.release().unwrap()
            }
        });

        timeout(GUARD, join_all(bids)).await.expect("a peer starved");

        let mut entered = occupancy.entries();
        entered.sort();
        let expected: Vec<_> = (0..4).map(|i| identity(i).name).collect();
        assert_eq!(entered, expected);
        assert_eq!(occupancy.peak(), 1);
        for peer in &cluster.peers {
            assert_eq!(peer.status().deferred, 0);
        }
    }

    // =========================================================================
    // CLOCKS
    // =========================================================================

    #[tokio::test]
    async fn test_bid_while_everyone_released() {
        let cluster = Cluster::new(3);

        let section = timeout(GUARD, cluster.peer(0).acquire()).await.unwrap().unwrap();
        let bid = section.bid_timestamp();
        assert_eq!(bid, 1);

        // Every other peer observed the bid and answered at once.
        for peer in &cluster.peers[1..] {
            let status = peer.status();
            assert_eq!(status.state, LocalState::Released);
            assert!(status.clock > bid);
            assert_eq!(status.deferred, 0);
        }
        assert!(cluster.peer(0).status().clock > bid);
        section.release().unwrap();
    }

    #[tokio::test]
    async fn test_clock_strictly_increases_across_events() {
        let cluster = Cluster::new(2);
        let peer = cluster.peer(0);
        let mut samples = vec![peer.status().clock];

        samples.push(peer.local_event());
        samples.push(peer.local_event());

        peer.ask_permission(Request::new(identity(1), 40)).await.unwrap();
        samples.push(peer.status().clock);
        assert_eq!(peer.status().clock, 41);

        let section = peer.acquire().await.unwrap();
        samples.push(section.bid_timestamp());
        samples.push(peer.status().clock);
        section.release().unwrap();

        samples.push(peer.local_event());
        assert!(invariant_clock_strictly_increasing(&samples), "{samples:?}");
    }
}
