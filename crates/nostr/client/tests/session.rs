mod common;

use std::time::Duration;

use anyhow::{Result, anyhow};
use common::{
    FakeRelay, KIND, Observed, RECIPIENT, Recorder, Step, event_observed, message, message_at,
    now,
};
use nostr_client::{ClientError, Filter, MessageContent, SessionState, Subscription, SubscriptionConfig};
use serde_json::json;
use tokio::net::TcpListener;

fn recipient_filter() -> Filter {
    Filter::new().kind(KIND).tag('p', [RECIPIENT])
}

#[tokio::test]
async fn backlog_eose_and_live_events_dispatch_in_order() -> Result<()> {
    let opened_at = now();
    let backlog_first = message_at("0", r#"{"n":1}"#, opened_at - 20)?;
    let backlog_second = message_at("0", "plain text", opened_at - 10)?;
    let live = message("0", r#"{"n":3}"#)?;
    let mut relay = FakeRelay::start(vec![
        Step::Event(backlog_first.clone()),
        Step::Event(backlog_second.clone()),
        Step::Eose,
        Step::Event(live.clone()),
    ])
    .await?;

    let (handler, mut observed) = Recorder::new();
    let filter = recipient_filter().since(opened_at - 60);
    let subscription =
        Subscription::open(&relay.url, filter.clone(), handler, SubscriptionConfig::default())
            .await?;

    let request = relay.next_frame().await?;
    assert_eq!(request, json!(["REQ", subscription.id(), filter.to_value()]));

    assert_eq!(
        observed.take(4).await?,
        vec![
            event_observed(&backlog_first),
            event_observed(&backlog_second),
            Observed::Eose,
            event_observed(&live),
        ]
    );
    assert_eq!(subscription.state(), SessionState::Live);

    subscription.close().await?;
    assert_eq!(subscription.state(), SessionState::Closed);
    assert_eq!(relay.next_frame().await?, json!(["CLOSE", subscription.id()]));
    Ok(())
}

#[tokio::test]
async fn eose_fires_once() -> Result<()> {
    let relay = FakeRelay::start(vec![Step::Eose, Step::Eose]).await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    assert_eq!(observed.next().await?, Observed::Eose);
    observed.assert_quiet(Duration::from_millis(300)).await?;
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent() -> Result<()> {
    let mut relay = FakeRelay::start(vec![Step::Eose]).await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;
    assert_eq!(observed.next().await?, Observed::Eose);

    let other_handle = subscription.clone();
    subscription.close().await?;
    subscription.close().await?;
    other_handle.close().await?;
    assert_eq!(other_handle.state(), SessionState::Closed);

    let frames = relay.drain_frames(Duration::from_millis(300)).await;
    let close_frames = frames.iter().filter(|frame| frame[0] == "CLOSE").count();
    let req_frames = frames.iter().filter(|frame| frame[0] == "REQ").count();
    assert_eq!(req_frames, 1);
    assert_eq!(close_frames, 1);
    observed.assert_quiet(Duration::from_millis(100)).await?;
    Ok(())
}

#[tokio::test]
async fn close_unblocks_pending_receive_from_another_task() -> Result<()> {
    let relay = FakeRelay::start(vec![]).await?;
    let (handler, _observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;
    assert_eq!(subscription.state(), SessionState::Active);

    let closer = subscription.clone();
    let close_task = tokio::spawn(async move { closer.close().await });

    tokio::time::timeout(Duration::from_secs(3), subscription.closed())
        .await
        .map_err(|_| anyhow!("session did not close in time"))?;
    tokio::time::timeout(Duration::from_secs(3), close_task)
        .await
        .map_err(|_| anyhow!("close did not return in time"))???;
    Ok(())
}

#[tokio::test]
async fn malformed_content_is_delivered_verbatim() -> Result<()> {
    let broken = message("0", "not json{")?;
    let relay = FakeRelay::start(vec![Step::Event(broken.clone())]).await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    assert_eq!(
        observed.next().await?,
        Observed::Event {
            id: broken.id.clone(),
            content: MessageContent::Text("not json{".to_string()),
        }
    );
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn failing_handlers_do_not_stop_the_stream() -> Result<()> {
    let panics = message("0", "panic")?;
    let fails = message("0", "fail")?;
    let fine = message("0", r#"{"ok":true}"#)?;
    let relay = FakeRelay::start(vec![
        Step::Event(panics.clone()),
        Step::Event(fails.clone()),
        Step::Event(fine.clone()),
    ])
    .await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    let seen = observed.take(5).await?;
    assert_eq!(seen[0], event_observed(&panics));
    assert!(matches!(&seen[1], Observed::Error(message) if message.contains("handler exploded")));
    assert_eq!(seen[2], event_observed(&fails));
    assert!(matches!(&seen[3], Observed::Error(message) if message.contains("handler refused event")));
    assert_eq!(seen[4], event_observed(&fine));
    assert_eq!(subscription.state(), SessionState::Active);

    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn subject_filter_drops_other_subjects() -> Result<()> {
    let other = message("Y", "other topic")?;
    let wanted = message("X", "wanted topic")?;
    let mut relay = FakeRelay::start(vec![
        Step::Event(other),
        Step::Event(wanted.clone()),
        Step::Eose,
    ])
    .await?;
    let (handler, mut observed) = Recorder::new();
    let filter = recipient_filter().tag('s', ["X"]);
    let subscription =
        Subscription::open(&relay.url, filter, handler, SubscriptionConfig::default()).await?;

    let request = relay.next_frame().await?;
    assert_eq!(request[2]["#s"], json!(["X"]));
    assert_eq!(
        observed.take(2).await?,
        vec![event_observed(&wanted), Observed::Eose]
    );
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn tampered_events_are_dropped() -> Result<()> {
    let mut tampered = message("0", "original")?;
    tampered.content = "rewritten".to_string();
    let genuine = message("0", "genuine")?;
    let relay = FakeRelay::start(vec![Step::Event(tampered), Step::Event(genuine.clone())]).await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    assert_eq!(observed.next().await?, event_observed(&genuine));
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_reported_and_skipped() -> Result<()> {
    let after = message("0", "after garbage")?;
    let relay = FakeRelay::start(vec![
        Step::Raw("garbage".to_string()),
        Step::Raw(r#"["EVENT","sub"]"#.to_string()),
        Step::Event(after.clone()),
    ])
    .await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    let seen = observed.take(3).await?;
    assert!(matches!(&seen[0], Observed::Error(message) if message.contains("protocol error")));
    assert!(matches!(&seen[1], Observed::Error(message) if message.contains("invalid EVENT message")));
    assert_eq!(seen[2], event_observed(&after));
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn relay_disconnect_is_reported_and_closes_session() -> Result<()> {
    let relay = FakeRelay::start(vec![Step::Eose, Step::Disconnect]).await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    assert_eq!(observed.next().await?, Observed::Eose);
    assert!(matches!(observed.next().await?, Observed::Error(message) if message.contains("connection error")));
    tokio::time::timeout(Duration::from_secs(3), subscription.closed())
        .await
        .map_err(|_| anyhow!("session did not observe disconnect"))?;
    assert_eq!(subscription.state(), SessionState::Closed);

    subscription.close().await?;
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn relay_closed_subscription_ends_session() -> Result<()> {
    let relay =
        FakeRelay::start(vec![Step::ClosedSubscription("error: too many filters".to_string())])
            .await?;
    let (handler, mut observed) = Recorder::new();
    let subscription =
        Subscription::open(&relay.url, recipient_filter(), handler, SubscriptionConfig::default())
            .await?;

    assert!(matches!(
        observed.next().await?,
        Observed::Error(message) if message.contains("too many filters")
    ));
    tokio::time::timeout(Duration::from_secs(3), subscription.closed())
        .await
        .map_err(|_| anyhow!("session did not close"))?;
    subscription.close().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_relay_fails_open() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let (handler, _observed) = Recorder::new();
    let result = Subscription::open(
        &format!("ws://{addr}"),
        recipient_filter(),
        handler,
        SubscriptionConfig::default(),
    )
    .await;

    match result {
        Err(error @ ClientError::Connection(_)) => assert!(error.is_connection_error()),
        other => return Err(anyhow!("expected connection error, got {other:?}")),
    }
    Ok(())
}

#[tokio::test]
async fn invalid_relay_url_fails_open() -> Result<()> {
    let (handler, _observed) = Recorder::new();
    let result = Subscription::open(
        "ftp://relay.example.com",
        recipient_filter(),
        handler,
        SubscriptionConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    Ok(())
}

#[tokio::test]
async fn independent_sessions_do_not_cross_dispatch() -> Result<()> {
    let alpha = message("alpha", "for alpha")?;
    let beta = message("beta", "for beta")?;
    let relay = FakeRelay::start(vec![
        Step::Event(alpha.clone()),
        Step::Event(beta.clone()),
        Step::Eose,
    ])
    .await?;

    let (alpha_handler, mut alpha_seen) = Recorder::new();
    let (beta_handler, mut beta_seen) = Recorder::new();
    let (alpha_session, beta_session) = tokio::try_join!(
        Subscription::open(
            &relay.url,
            recipient_filter().tag('s', ["alpha"]),
            alpha_handler,
            SubscriptionConfig::default(),
        ),
        Subscription::open(
            &relay.url,
            recipient_filter().tag('s', ["beta"]),
            beta_handler,
            SubscriptionConfig::default(),
        ),
    )?;
    assert_ne!(alpha_session.id(), beta_session.id());

    assert_eq!(
        alpha_seen.take(2).await?,
        vec![event_observed(&alpha), Observed::Eose]
    );
    assert_eq!(
        beta_seen.take(2).await?,
        vec![event_observed(&beta), Observed::Eose]
    );

    alpha_session.close().await?;
    assert_eq!(beta_session.state(), SessionState::Live);
    beta_session.close().await?;
    Ok(())
}
