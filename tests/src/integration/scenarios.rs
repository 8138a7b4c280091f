//! # Ordering Scenarios
//!
//! Hand-built interleavings with a known outcome:
//!
//! - Two bids with the same timestamp queue behind a holder in arrival order
//!   and enter in `(timestamp, address, port)` order
//! - Equal timestamps with nobody holding are broken by identity
//! - A peer that becomes unreachable during fan-out is dropped from the quorum
//! - A peer first heard from during a bid joins that bid's quorum

#[cfg(test)]
mod tests {
    use crate::cluster::{identity, wait_until, Cluster, Occupancy, GUARD};
    use ra_mutual_exclusion::{ExclusionService, LocalNetwork, LocalState, ServiceConfig};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const HOLD: Duration = Duration::from_millis(20);

    /// Acquire, record the entry, hold briefly, release.
    fn bid(peer: &ExclusionService<LocalNetwork>, occupancy: &Occupancy) -> JoinHandle<usize> {
        let peer = peer.clone();
        let occupancy = occupancy.clone();
        tokio::spawn(async move {
            let section = peer.acquire().await.unwrap();
            occupancy.enter(&peer.local().name);
            tokio::time::sleep(HOLD).await;
            occupancy.exit();
            section.release().unwrap()
        })
    }

    #[tokio::test]
    async fn test_equal_timestamps_queue_behind_holder() {
        // Both bids are stamped before either is seen. B's reaches C first
        // even though A wins the tie.
        let cluster = Cluster::with_configs(vec![
            ServiceConfig::default().with_fanout_delay(Duration::from_millis(60)),
            ServiceConfig::default().with_fanout_delay(Duration::from_millis(20)),
            ServiceConfig::default(),
        ]);
        let (a, b, c) = (cluster.peer(0), cluster.peer(1), cluster.peer(2));
        let occupancy = Occupancy::new();

        let held = timeout(GUARD, c.acquire()).await.unwrap().unwrap();

        // Bring A and B to clock 4 so both bids are stamped 5.
        while a.status().clock < 4 {
            a.local_event();
        }
        while b.status().clock < 4 {
            b.local_event();
        }
        assert_eq!(a.status().clock, 4);
        assert_eq!(b.status().clock, 4);

        let first = bid(a, &occupancy);
        let second = bid(b, &occupancy);

        wait_until(|| c.status().deferred == 2).await;
        assert_eq!(a.status().bid_timestamp, Some(5));
        assert_eq!(b.status().bid_timestamp, Some(5));

        // C queues in arrival order, not in priority order.
        let queued: Vec<_> = c
            .deferred_requests()
            .into_iter()
            .map(|r| (r.requester, r.timestamp))
            .collect();
        assert_eq!(queued, vec![(identity(1), 5), (identity(0), 5)]);

        // B granted A (A wins the tie); A deferred B.
        wait_until(|| a.status().deferred == 1).await;
        assert_eq!(a.deferred_requests()[0].requester, identity(1));
        assert_eq!(b.status().deferred, 0);
        assert_eq!(occupancy.entries(), Vec::<String>::new());

        assert_eq!(held.release().unwrap(), 2);
        assert_eq!(c.status().deferred, 0);

        assert_eq!(timeout(GUARD, first).await.unwrap().unwrap(), 1);
        assert_eq!(timeout(GUARD, second).await.unwrap().unwrap(), 0);
        assert_eq!(occupancy.entries(), vec!["peer-0", "peer-1"]);
        assert_eq!(occupancy.peak(), 1);
    }

    #[tokio::test]
    async fn test_tie_broken_by_identity() {
        let cluster = Cluster::with_config(
            2,
            ServiceConfig::default().with_fanout_delay(Duration::from_millis(30)),
        );
        let occupancy = Occupancy::new();

        // Higher port bids first in wall-clock time; lower port still wins.
        let late_winner = bid(cluster.peer(1), &occupancy);
        let early_loser = bid(cluster.peer(0), &occupancy);

        wait_until(|| cluster.peer(0).status().bid_timestamp.is_some()).await;
        assert_eq!(cluster.peer(0).status().bid_timestamp, Some(1));

        timeout(GUARD, late_winner).await.unwrap().unwrap();
        timeout(GUARD, early_loser).await.unwrap().unwrap();
        assert_eq!(occupancy.entries(), vec!["peer-0", "peer-1"]);
    }

    #[tokio::test]
    async fn test_unreachable_peer_dropped_during_fanout() {
        let cluster = Cluster::new(3);
        let crashed = identity(2);
        cluster.network.disconnect(&crashed);

        let section = timeout(GUARD, cluster.peer(0).acquire()).await.unwrap().unwrap();
        assert_eq!(cluster.peer(0).status().state, LocalState::Held);
        assert!(!cluster.peer(0).registry().contains(&crashed));
        assert!(cluster.peer(0).registry().contains(&identity(1)));
        section.release().unwrap();

        // The next bid does not wait for the crashed peer either.
        cluster.network.reconnect(&crashed);
        let again = timeout(GUARD, cluster.peer(0).acquire()).await.unwrap().unwrap();
        assert_eq!(cluster.peer(0).status().peers, 1);
        again.release().unwrap();
    }

    #[tokio::test]
    async fn test_late_joiner_waits_its_turn() {
        let cluster = Cluster::new(2);
        let (a, b) = (cluster.peer(0), cluster.peer(1));
        let occupancy = Occupancy::new();

        // B holds; A bids and waits on B.
        let held = timeout(GUARD, b.acquire()).await.unwrap().unwrap();
        let a_bid = bid(a, &occupancy);
        wait_until(|| b.status().deferred == 1).await;
        assert_eq!(a.status().state, LocalState::Wanted);

        // N knows A and B; neither knows N. N's first request reaches A
        // while A is Wanted.
        let newcomer = cluster.join(identity(7), &[identity(0), identity(1)]);
        assert!(!a.registry().contains(newcomer.local()));
        let n_bid = bid(&newcomer, &occupancy);

        // A learned about N and now waits for it too.
        wait_until(|| a.registry().contains(newcomer.local())).await;
        wait_until(|| a.status().pending_replies == 2).await;
        wait_until(|| newcomer.status().deferred == 1).await;

        held.release().unwrap();

        timeout(GUARD, n_bid).await.unwrap().unwrap();
        timeout(GUARD, a_bid).await.unwrap().unwrap();
        assert_eq!(occupancy.entries(), vec!["peer-7", "peer-0"]);
        assert_eq!(occupancy.peak(), 1);
    }
}
