//! Integration tests for route discovery and neighbor loss.
//!
//! Whole rovers run on a simulated multicast segment with tokio's clock
//! paused, so advertisement intervals and liveness timeouts elapse exactly.

mod common;

use std::time::Duration;

use rover_mesh::addr::private_addr;
use rover_mesh::config::Timing;
use rover_mesh::node::Rover;
use rover_mesh::simulator::{SimNetwork, SimSocket};
use rover_mesh::table::INFINITY;

use common::{ip, spawn_rover};

fn route(rover: &Rover<SimSocket>, to: u8) -> Option<(u8, std::net::Ipv4Addr)> {
    rover
        .table()
        .lookup(private_addr(to))
        .map(|e| (e.cost, e.next_hop))
}

#[tokio::test(start_paused = true)]
async fn three_rovers_converge_within_two_intervals() {
    let net = SimNetwork::perfect();
    let (a, _) = spawn_rover(&net, 1);
    let (b, _) = spawn_rover(&net, 2);
    let (c, _) = spawn_rover(&net, 3);

    tokio::time::sleep(Timing::default().advert_interval * 2).await;

    assert_eq!(route(&a, 2), Some((1, ip(2))));
    assert_eq!(route(&a, 3), Some((1, ip(3))));
    assert_eq!(route(&b, 1), Some((1, ip(1))));
    assert_eq!(route(&b, 3), Some((1, ip(3))));
    assert_eq!(route(&c, 1), Some((1, ip(1))));
    assert_eq!(route(&c, 2), Some((1, ip(2))));
    for rover in [&a, &b, &c] {
        assert_eq!(rover.table().len(), 2, "{}", rover.table());
    }
}

#[tokio::test(start_paused = true)]
async fn line_topology_routes_through_middle_rover() {
    let net = SimNetwork::perfect();
    net.sever(ip(1), ip(3));
    let (a, _) = spawn_rover(&net, 1);
    let (_b, _) = spawn_rover(&net, 2);
    let (c, _) = spawn_rover(&net, 3);

    tokio::time::sleep(Timing::default().advert_interval * 2).await;

    assert_eq!(route(&a, 3), Some((2, ip(2))));
    assert_eq!(route(&c, 1), Some((2, ip(2))));
}

#[tokio::test(start_paused = true)]
async fn isolated_rover_is_poisoned_at_timeout_never_before() {
    let timing = Timing::default();
    let net = SimNetwork::perfect();
    net.sever(ip(1), ip(3));
    let (a, _) = spawn_rover(&net, 1);
    let (_b, _) = spawn_rover(&net, 2);
    let (c, _) = spawn_rover(&net, 3);

    // B's last periodic advertisement gets out at 2 intervals.
    tokio::time::sleep(timing.advert_interval * 2 + timing.advert_interval / 2).await;
    net.isolate(ip(2));
    let last_heard = timing.advert_interval / 2;

    tokio::time::sleep(timing.neighbor_timeout - last_heard - Duration::from_millis(100)).await;
    assert_eq!(route(&a, 2), Some((1, ip(2))));
    assert_eq!(route(&a, 3), Some((2, ip(2))));

    tokio::time::sleep(Duration::from_millis(200)).await;
    for (rover, gone, behind) in [(&a, 2, 3), (&c, 2, 1)] {
        assert_eq!(route(rover, gone).map(|r| r.0), Some(INFINITY));
        assert_eq!(route(rover, behind).map(|r| r.0), Some(INFINITY));
    }
}

#[tokio::test(start_paused = true)]
async fn reconnected_rover_is_learned_again() {
    let timing = Timing::default();
    let net = SimNetwork::perfect();
    let (a, _) = spawn_rover(&net, 1);
    let (_b, _) = spawn_rover(&net, 2);

    tokio::time::sleep(timing.advert_interval).await;
    net.isolate(ip(2));
    tokio::time::sleep(timing.neighbor_timeout * 2).await;
    assert_eq!(route(&a, 2).map(|r| r.0), Some(INFINITY));

    net.reconnect(ip(2));
    tokio::time::sleep(timing.advert_interval + Duration::from_millis(10)).await;
    assert_eq!(route(&a, 2), Some((1, ip(2))));
}
