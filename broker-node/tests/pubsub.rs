//! Publishers, subscribers, and topic routing across endpoints.

mod common;

use broker_model::{Data, Timespan, Topic};
use broker_node::{BrokerOptions, Configuration, Endpoint, Overlay};
use common::eventually;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::BorrowedFd;
use std::time::Duration;

fn topic(s: &str) -> Topic {
    s.parse().expect("test topic")
}

fn endpoint(overlay: &Overlay) -> Endpoint {
    Endpoint::new(Configuration::default(), overlay.clone())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn published_data_reaches_matching_subscribers() {
    let ep = endpoint(&Overlay::new());
    let sub = ep.make_subscriber(vec![topic("zeek/events")]).await.unwrap();

    ep.publish(topic("zeek/events/http"), Data::from("hit")).await;
    ep.publish(topic("zeek/logs/http"), Data::from("miss")).await;

    let (t, v) = sub.get_timeout(Duration::from_secs(5)).expect("delivery");
    assert_eq!(t, topic("zeek/events/http"));
    assert_eq!(v, Data::from("hit"));
    // The non-matching topic never shows up.
    assert!(sub.get_timeout(Duration::from_millis(100)).is_none());
    ep.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publisher_queue_drains_in_order() {
    let ep = endpoint(&Overlay::new());
    let sub = ep.make_subscriber(vec![topic("data")]).await.unwrap();
    let publisher = ep.make_publisher(topic("data/stream")).unwrap();

    assert_eq!(publisher.capacity(), 64);
    let values: Vec<Data> = (0..20u64).map(Data::Count).collect();
    publisher.publish_batch(values.clone());

    let mut received = Vec::new();
    while received.len() < values.len() {
        match sub.get_timeout(Duration::from_secs(5)) {
            Some((_, v)) => received.push(v),
            None => panic!("stream dried up after {} items", received.len()),
        }
    }
    assert_eq!(received, values);
    assert_eq!(publisher.buffered(), 0);
    assert_eq!(publisher.free_capacity(), publisher.capacity());
    drop(publisher);
    ep.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropping_a_publisher_drains_cooperatively() {
    let ep = endpoint(&Overlay::new());
    let sub = ep.make_subscriber(vec![topic("data")]).await.unwrap();
    {
        let publisher = ep.make_publisher(topic("data/stream")).unwrap();
        publisher.publish_batch((0..10u64).map(Data::Count).collect());
        // Dropped immediately: the worker must still flush the queue.
    }
    let mut received = 0;
    while sub.get_timeout(Duration::from_secs(5)).is_some() {
        received += 1;
        if received == 10 {
            break;
        }
    }
    assert_eq!(received, 10);
    ep.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn poll_and_get_n_take_bounded_batches() {
    let ep = endpoint(&Overlay::new());
    let sub = ep.make_subscriber(vec![topic("data")]).await.unwrap();
    for i in 0..6u64 {
        ep.publish(topic("data/x"), Data::Count(i)).await;
    }
    eventually("all items to arrive", || async { sub.buffered() == 6 }).await;

    let first_two = sub.get_n(2);
    assert_eq!(first_two.len(), 2);
    assert_eq!(first_two[0].1, Data::Count(0));

    let rest = sub.poll();
    assert_eq!(rest.len(), 4);
    // Nothing left: poll never blocks.
    assert!(sub.poll().is_empty());
    ep.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscriber_fd_integrates_with_poll_loops() {
    let ep = endpoint(&Overlay::new());
    let sub = ep.make_subscriber(vec![topic("data")]).await.unwrap();

    let readable = |fd: i32, timeout_ms: u16| {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::from(timeout_ms)), Ok(n) if n > 0)
    };

    assert!(!readable(sub.fd(), 50));
    ep.publish(topic("data/x"), Data::Count(1)).await;
    eventually("the flare to fire", || async { sub.buffered() > 0 }).await;
    assert!(readable(sub.fd(), 1000));

    sub.poll();
    assert!(!readable(sub.fd(), 50));
    ep.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peered_endpoints_exchange_data() {
    let overlay = Overlay::new();
    let ep_a = endpoint(&overlay);
    let ep_b = endpoint(&overlay);
    let port = ep_a.listen("127.0.0.1", 0).await.unwrap();
    ep_b.peer("127.0.0.1", port, Timespan::from_millis(10)).await.unwrap();

    let sub_a = ep_a.make_subscriber(vec![topic("shared")]).await.unwrap();
    ep_b.publish(topic("shared/x"), Data::from("over the wire")).await;
    let (_, v) = sub_a.get_timeout(Duration::from_secs(5)).expect("cross-endpoint delivery");
    assert_eq!(v, Data::from("over the wire"));

    ep_b.shutdown().await;
    ep_a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relays_honor_the_hop_limit() {
    // a -- b -- c, with b inserting a hop budget of 1: b's own
    // subscribers see a's messages, c never does.
    let overlay = Overlay::new();
    let ep_a = endpoint(&overlay);
    let options = BrokerOptions { ttl: 1, ..Default::default() };
    let ep_b = Endpoint::new(Configuration::new(options), overlay.clone());
    let ep_c = endpoint(&overlay);

    let port_b = ep_b.listen("127.0.0.1", 0).await.unwrap();
    ep_a.peer("127.0.0.1", port_b, Timespan::from_millis(10)).await.unwrap();
    ep_c.peer("127.0.0.1", port_b, Timespan::from_millis(10)).await.unwrap();

    let sub_b = ep_b.make_subscriber(vec![topic("chain")]).await.unwrap();
    let sub_c = ep_c.make_subscriber(vec![topic("chain")]).await.unwrap();

    ep_a.publish(topic("chain/x"), Data::Count(1)).await;
    assert!(sub_b.get_timeout(Duration::from_secs(5)).is_some());
    assert!(sub_c.get_timeout(Duration::from_millis(300)).is_none());

    ep_c.shutdown().await;
    ep_b.shutdown().await;
    ep_a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forwarding_can_be_disabled() {
    let overlay = Overlay::new();
    let ep_a = endpoint(&overlay);
    let options = BrokerOptions { forward: false, ..Default::default() };
    let ep_b = Endpoint::new(Configuration::new(options), overlay.clone());
    let ep_c = endpoint(&overlay);

    let port_b = ep_b.listen("127.0.0.1", 0).await.unwrap();
    ep_a.peer("127.0.0.1", port_b, Timespan::from_millis(10)).await.unwrap();
    ep_c.peer("127.0.0.1", port_b, Timespan::from_millis(10)).await.unwrap();

    let sub_b = ep_b.make_subscriber(vec![topic("chain")]).await.unwrap();
    let sub_c = ep_c.make_subscriber(vec![topic("chain")]).await.unwrap();

    ep_a.publish(topic("chain/x"), Data::Count(1)).await;
    // Local delivery on the receiving endpoint still happens; relaying
    // to third parties does not.
    assert!(sub_b.get_timeout(Duration::from_secs(5)).is_some());
    assert!(sub_c.get_timeout(Duration::from_millis(300)).is_none());

    ep_c.shutdown().await;
    ep_b.shutdown().await;
    ep_a.shutdown().await;
}
