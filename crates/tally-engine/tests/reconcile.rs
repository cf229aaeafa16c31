mod common;

use common::{FakeSource, backlog, in_memory, message};
use tally_engine::EventOutcome;
use tally_types::events::LiveEvent;
use tally_types::models::{ChannelId, MessageId, UserId};

#[tokio::test]
async fn live_message_seen_again_by_backfill_counts_once() {
    let source = FakeSource::new();
    let mut history = backlog(1, 9, 1);
    history.push(message(42, 1, 1, 100));
    source.add_channel(ChannelId(1), true, history);
    let h = in_memory(source, 1000);

    let live = h
        .ingestor
        .apply(LiveEvent::MessageCreate(message(42, 1, 1, 100)))
        .await
        .unwrap();
    assert_eq!(live, EventOutcome::Counted { counter: 1 });

    let report = h.crawler.run_cycle().await.unwrap();
    assert_eq!(report.channels[0].fetched, 10);
    assert_eq!(report.channels[0].counted, 9);
    assert_eq!(h.counters.get_count(UserId(1), ChannelId(1)).await.unwrap(), 10);
}

#[tokio::test]
async fn backfilled_message_replayed_live_counts_once() {
    let source = FakeSource::new();
    source.add_channel(ChannelId(1), true, backlog(1, 5, 1));
    let h = in_memory(source, 1000);
    h.crawler.run_cycle().await.unwrap();

    let replay = h
        .ingestor
        .apply(LiveEvent::MessageCreate(message(1_000_003, 1, 1, 3)))
        .await
        .unwrap();

    assert_eq!(replay, EventOutcome::Duplicate);
    assert_eq!(h.counters.get_count(UserId(1), ChannelId(1)).await.unwrap(), 5);
}

#[tokio::test]
async fn message_deleted_before_backfill_is_not_recounted() {
    let source = FakeSource::new();
    source.add_channel(ChannelId(1), true, vec![message(7, 2, 1, 10)]);
    let h = in_memory(source, 1000);

    h.ingestor
        .apply(LiveEvent::MessageCreate(message(7, 2, 1, 10)))
        .await
        .unwrap();
    h.ingestor
        .apply(LiveEvent::MessageDelete {
            channel_id: ChannelId(1),
            message_id: MessageId(7),
        })
        .await
        .unwrap();

    let report = h.crawler.run_cycle().await.unwrap();
    assert_eq!(report.channels[0].counted, 0);
    assert_eq!(h.counters.get_count(UserId(2), ChannelId(1)).await.unwrap(), 1);
    // Stays deleted
    assert!(h.db.get_message(MessageId(7)).unwrap().is_none());
}

#[tokio::test]
async fn live_channel_joins_the_backfill() {
    let source = FakeSource::new();
    let h = in_memory(source.clone(), 1000);

    h.ingestor
        .apply(LiveEvent::MessageCreate(message(500, 3, 4, 500)))
        .await
        .unwrap();
    let cursor = h.cursors.get(ChannelId(4)).await.unwrap().unwrap();
    assert!(!cursor.fully_read);

    source.add_channel(ChannelId(4), true, vec![message(500, 3, 4, 500), message(499, 3, 4, 499)]);
    let report = h.crawler.run_cycle().await.unwrap();
    assert!(report.channels[0].fully_read);
    assert_eq!(h.counters.get_count(UserId(3), ChannelId(4)).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_live_and_backfill_count_each_id_once() {
    let source = FakeSource::new();
    let history = backlog(1, 400, 5);
    source.add_channel(ChannelId(1), true, history.clone());
    let h = in_memory(source, 100);

    let ingestor = h.ingestor.clone();
    let live = tokio::spawn(async move {
        let mut handles = Vec::new();
        for msg in history.into_iter().rev() {
            let ingestor = ingestor.clone();
            handles.push(tokio::spawn(async move {
                ingestor.apply(LiveEvent::MessageCreate(msg)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    });

    for _ in 0..5 {
        h.crawler.run_cycle().await.unwrap();
    }
    live.await.unwrap();

    assert_eq!(h.db.channel_total(ChannelId(1)).unwrap(), 400);
    let total: u64 = h
        .counters
        .top_users(ChannelId(1), 10)
        .await
        .unwrap()
        .iter()
        .map(|u| u.count)
        .sum();
    assert_eq!(total, 400);
    for user in 1..=5 {
        assert_eq!(h.counters.get_count(UserId(user), ChannelId(1)).await.unwrap(), 80);
    }
}

#[tokio::test]
async fn most_active_after_backfill() {
    let source = FakeSource::new();
    source.add_channel(ChannelId(1), true, (0..5).map(|i| message(100 + i, 7, 1, i)).collect());
    source.add_channel(ChannelId(2), true, (0..12).map(|i| message(200 + i, 7, 2, i)).collect());
    source.add_channel(ChannelId(3), true, (0..3).map(|i| message(300 + i, 7, 3, i)).collect());
    let h = in_memory(source, 1000);
    h.crawler.run_cycle().await.unwrap();

    let ranked = h
        .counters
        .most_active(UserId(7), &[ChannelId(1), ChannelId(2), ChannelId(3), ChannelId(4)], 2)
        .await
        .unwrap();
    let counts: Vec<(i64, u64)> = ranked.iter().map(|c| (c.channel_id.get(), c.count)).collect();
    assert_eq!(counts, vec![(1, 5), (2, 12)]);
}
