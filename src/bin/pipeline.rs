//! Runs a simulated workload through the in-memory pipeline:
//! domain transactions -> outbox -> relay -> stream -> consumer group ->
//! counters and trending.
//!
//! Usage: `interaction-pipeline [config.toml]`

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use interaction_pipeline::{
    ConsumerGroup, CounterStore, FlushTargets, InMemoryCounterStore, InMemoryOutboxStore,
    InMemoryStream, InMemoryTrending, InteractionEvent, InteractionReads, OutboxStore,
    PipelineConfig, Relay, RelayThread, SystemClock,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const POSTS: [&str; 4] = ["rust-ownership", "outbox-pattern", "kafka-tuning", "css-grid"];

fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(path.as_deref())?;
    info!(topic = %config.topic, partitions = config.partitions, "configuration loaded");

    let clock = Arc::new(SystemClock);
    let outbox = InMemoryOutboxStore::with_clock(clock.clone());
    let stream = InMemoryStream::new(config.partitions);
    let counters = Arc::new(InMemoryCounterStore::new());
    let trending = Arc::new(InMemoryTrending::with_clock(
        config.trending.window_retentions(),
        clock.clone(),
    ));

    let relay = Relay::from_config(outbox.clone(), stream.clone(), &config.relay, &config.dead_letter_topic)
        .with_clock(clock.clone());
    let relay_thread = RelayThread::spawn(relay, config.relay.poll_interval().min(Duration::from_millis(50)));

    let targets = FlushTargets::new(counters.clone(), trending.clone(), config.trending.weights);
    let group = ConsumerGroup::spawn(&stream, stream.clone(), targets, &config, clock.clone())?;

    let enqueued = simulate(&outbox, &counters, &config.topic)?;
    info!(enqueued, "workload committed");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !drained(&stream, &config, enqueued) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    let relay_stats = relay_thread.stop();
    let consumer_stats = group.stop();
    info!(
        relayed = relay_stats.published,
        applied = consumer_stats.applied,
        flushes = consumer_stats.flushes,
        "pipeline stopped"
    );

    let reads = InteractionReads::new(counters, trending);
    for window in config.trending.windows.keys() {
        let top = reads.get_trending(window, 3)?;
        info!(window = %window, top = ?top, "trending");
    }
    for post in POSTS {
        let snapshot = reads.get_counters(post)?;
        info!(
            post,
            likes = snapshot.like_count,
            views = snapshot.view_count,
            comments = snapshot.comment_count,
            "counters"
        );
    }
    Ok(())
}

/// Commit a burst of interactions, one domain transaction each. Returns the
/// number of outbox events written.
fn simulate(
    outbox: &InMemoryOutboxStore,
    counters: &Arc<InMemoryCounterStore>,
    topic: &str,
) -> Result<u64, Box<dyn Error>> {
    let mut enqueued = 0;

    for (rank, post) in POSTS.iter().enumerate() {
        let readers = (POSTS.len() - rank) * 5;
        for reader in 0..readers {
            let actor = format!("reader-{reader}");

            let mut uow = outbox.begin();
            uow.enqueue_interaction(topic, &InteractionEvent::view(*post, Some(actor.as_str())))?;
            if reader % 2 == 0 {
                uow.enqueue_interaction(topic, &InteractionEvent::like(*post, actor.as_str()))?;
            }
            enqueued += uow.pending_events() as u64;
            uow.commit()?;
        }

        // A comment is stored and counted in the same transaction as its event.
        let mut uow = outbox.begin();
        let comment_counter = Arc::clone(counters);
        let content_id = post.to_string();
        uow.write(move || comment_counter.record_comment(&content_id));
        uow.enqueue_interaction(topic, &InteractionEvent::comment(*post, "editor"))?;
        enqueued += uow.pending_events() as u64;
        uow.commit()?;
    }

    // Changed their mind before the consumer flushed.
    let mut uow = outbox.begin();
    uow.enqueue_interaction(topic, &InteractionEvent::unlike(POSTS[0], "reader-0"))?;
    enqueued += uow.pending_events() as u64;
    uow.commit()?;

    Ok(enqueued)
}

fn drained(stream: &InMemoryStream, config: &PipelineConfig, enqueued: u64) -> bool {
    let committed: u64 = (0..config.partitions)
        .map(|p| stream.committed_offset(&config.consumer_group, &config.topic, p).unwrap_or(0))
        .sum();
    committed >= enqueued
}
