mod common;

use std::time::Duration;

use streamvault::{ExpectedVersion, StreamKey};

#[tokio::test]
async fn subscribers_only_see_events_committed_after_subscribing() {
    let (_dir, vault) = common::connected_vault().await;
    let s = common::stream("tenant1", &["Orders"], "A");

    vault
        .append(
            s.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&s, "E", b"before")],
        )
        .await
        .unwrap();

    let mut sub = vault.subscribe(s.clone()).await.unwrap();

    vault
        .append(
            s.clone(),
            ExpectedVersion::Exact(0),
            vec![common::event(&s, "E", b"after")],
        )
        .await
        .unwrap();

    // No catch-up: the pre-subscription event is never delivered.
    let record = sub.next().await.unwrap();
    assert_eq!(record.payload, b"after");
    assert!(sub.try_next().is_none());

    vault.disconnect().await;
}

#[tokio::test]
async fn hierarchical_keys_route_events_across_streams() {
    let (_dir, vault) = common::connected_vault().await;
    let a = common::stream("tenant1", &["Orders"], "A");
    let b = common::stream("tenant1", &["Orders"], "B");
    let other = common::stream("tenant2", &["Orders"], "C");

    let mut sub = vault
        .subscribe(StreamKey::new(["tenant1", "Orders", "*"]))
        .await
        .unwrap();

    vault
        .append(
            a.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&a, "E", b"a1")],
        )
        .await
        .unwrap();
    vault
        .append(
            other.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&other, "E", b"c1")],
        )
        .await
        .unwrap();
    vault
        .append(
            b.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&b, "E", b"b1")],
        )
        .await
        .unwrap();

    // Both tenant1 streams arrive in commit order; tenant2 never does.
    let first = sub.next().await.unwrap();
    let second = sub.next().await.unwrap();
    assert_eq!(first.payload, b"a1");
    assert_eq!(second.payload, b"b1");
    assert!(sub.try_next().is_none());

    vault.disconnect().await;
}

#[tokio::test]
async fn multi_event_appends_are_delivered_in_commit_order() {
    let (_dir, vault) = common::connected_vault().await;
    let s = common::stream("tenant1", &["Orders"], "A");

    let mut sub = vault.subscribe(StreamKey::all()).await.unwrap();

    vault
        .append(
            s.clone(),
            ExpectedVersion::NoStream,
            vec![
                common::event(&s, "E", b"e1"),
                common::event(&s, "E", b"e2"),
                common::event(&s, "E", b"e3"),
            ],
        )
        .await
        .unwrap();

    for expected_version in 0..3u64 {
        let record = sub.next().await.unwrap();
        assert_eq!(record.version.as_raw(), expected_version);
    }

    vault.disconnect().await;
}

#[tokio::test]
async fn dropping_a_subscription_stops_delivery() {
    let (_dir, vault) = common::connected_vault().await;
    let s = common::stream("tenant1", &["Orders"], "A");

    let sub = vault.subscribe(s.clone()).await.unwrap();
    drop(sub);

    // The writer prunes the dead subscriber on the next notify; the append
    // itself must be unaffected.
    vault
        .append(
            s.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&s, "E", b"e1")],
        )
        .await
        .unwrap();

    let mut live = vault.subscribe(s.clone()).await.unwrap();
    vault
        .append(
            s.clone(),
            ExpectedVersion::Exact(0),
            vec![common::event(&s, "E", b"e2")],
        )
        .await
        .unwrap();
    let record = common::eventually(
        Duration::from_secs(2),
        Duration::from_millis(10),
        || live.try_next(),
    )
    .await;
    assert_eq!(record.payload, b"e2");

    vault.disconnect().await;
}

#[tokio::test]
async fn failed_appends_notify_nobody() {
    let (_dir, vault) = common::connected_vault().await;
    let s = common::stream("tenant1", &["Orders"], "A");
    vault
        .append(
            s.clone(),
            ExpectedVersion::NoStream,
            vec![common::event(&s, "E", b"e1")],
        )
        .await
        .unwrap();

    let mut sub = vault.subscribe(s.clone()).await.unwrap();

    vault
        .append(
            s.clone(),
            ExpectedVersion::Exact(7),
            vec![common::event(&s, "E", b"stale")],
        )
        .await
        .unwrap_err();

    assert!(sub.try_next().is_none());

    vault.disconnect().await;
}

#[tokio::test]
async fn disconnect_ends_live_subscriptions() {
    let (_dir, vault) = common::connected_vault().await;
    let s = common::stream("tenant1", &["Orders"], "A");

    let mut sub = vault.subscribe(s.clone()).await.unwrap();
    vault.disconnect().await;

    // End-of-stream rather than hanging forever.
    assert!(sub.next().await.is_none());
}
