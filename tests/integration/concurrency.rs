//! Integration tests for the actor runtime under concurrent load

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use telemetry_hub::{
    EngineError,
    actors::{Actor, ActorContext, ActorMessage, ActorSystem, OverflowPolicy},
    config::{ActorSystemConfig, Config, NotificationConfig},
    message::Message,
    rule::{RuleNode, RuleNodeContext},
};
use tokio::sync::{Mutex, oneshot};

use crate::helpers::*;

#[derive(Debug)]
enum LoadMsg {
    Record { sender: usize, seq: usize },
    Work(Duration),
    Fail,
    Panic,
    Gate {
        started: oneshot::Sender<()>,
        release: oneshot::Receiver<()>,
    },
    Ping(oneshot::Sender<()>),
}

impl ActorMessage for LoadMsg {
    fn kind(&self) -> &'static str {
        match self {
            LoadMsg::Record { .. } => "Record",
            LoadMsg::Work(_) => "Work",
            LoadMsg::Fail => "Fail",
            LoadMsg::Panic => "Panic",
            LoadMsg::Gate { .. } => "Gate",
            LoadMsg::Ping(_) => "Ping",
        }
    }
}

#[derive(Default, Clone)]
struct Recorder {
    seen: Arc<Mutex<Vec<(usize, usize)>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor<LoadMsg> for Recorder {
    async fn process(&mut self, msg: LoadMsg, _ctx: &ActorContext<LoadMsg>) -> anyhow::Result<()> {
        match msg {
            LoadMsg::Record { sender, seq } => self.seen.lock().await.push((sender, seq)),
            LoadMsg::Work(duration) => {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(duration).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            LoadMsg::Fail => anyhow::bail!("refusing to work"),
            LoadMsg::Panic => panic!("lost it"),
            LoadMsg::Gate { started, release } => {
                let _ = started.send(());
                let _ = release.await;
            }
            LoadMsg::Ping(tx) => {
                let _ = tx.send(());
            }
        }
        Ok(())
    }
}

fn system(workers: usize, mailbox_capacity: usize, overflow: OverflowPolicy) -> ActorSystem<LoadMsg> {
    ActorSystem::new(ActorSystemConfig {
        workers,
        mailbox_capacity,
        overflow,
        batch_size: 4,
    })
}

async fn ping(system: &ActorSystem<LoadMsg>, id: &str) {
    let (tx, rx) = oneshot::channel();
    system.tell(id, LoadMsg::Ping(tx)).await.unwrap();
    rx.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_sender_order_with_concurrent_senders() {
    let system = system(2, 8, OverflowPolicy::Block);
    let recorder = Recorder::default();
    system.create_actor("sink", recorder.clone()).await.unwrap();

    let senders = (0..6).map(|sender| {
        let system = system.clone();
        tokio::spawn(async move {
            for seq in 0..200 {
                system.tell("sink", LoadMsg::Record { sender, seq }).await.unwrap();
            }
        })
    });
    for handle in join_all(senders).await {
        handle.unwrap();
    }
    ping(&system, "sink").await;

    let seen = recorder.seen.lock().await;
    assert_eq!(seen.len(), 6 * 200);

    let mut per_sender: HashMap<usize, Vec<usize>> = HashMap::new();
    for (sender, seq) in seen.iter() {
        per_sender.entry(*sender).or_default().push(*seq);
    }
    for (sender, seqs) in per_sender {
        assert_eq!(seqs, (0..200).collect::<Vec<_>>(), "sender {sender} out of order");
    }

    system.shutdown().await;
}

#[tokio::test]
async fn test_failing_actor_does_not_affect_others() {
    let system = system(2, 16, OverflowPolicy::Block);
    let healthy = Recorder::default();
    system.create_actor("faulty", Recorder::default()).await.unwrap();
    system.create_actor("healthy", healthy.clone()).await.unwrap();

    for seq in 0..10 {
        system.tell("faulty", LoadMsg::Fail).await.unwrap();
        system.tell("faulty", LoadMsg::Panic).await.unwrap();
        system.tell("healthy", LoadMsg::Record { sender: 0, seq }).await.unwrap();
    }

    // both actors are still alive
    ping(&system, "faulty").await;
    ping(&system, "healthy").await;
    assert_eq!(healthy.seen.lock().await.len(), 10);

    system.shutdown().await;
    assert!(system.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bounded_by_workers() {
    let system = system(2, 16, OverflowPolicy::Block);
    let recorder = Recorder::default();

    for n in 0..8 {
        system.create_actor(format!("worker-{n}"), recorder.clone()).await.unwrap();
    }
    for _ in 0..3 {
        for n in 0..8 {
            system
                .tell(&format!("worker-{n}"), LoadMsg::Work(Duration::from_millis(10)))
                .await
                .unwrap();
        }
    }
    for n in 0..8 {
        ping(&system, &format!("worker-{n}")).await;
    }

    let peak = recorder.peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "{peak} actors processed at once");

    system.shutdown().await;
}

#[tokio::test]
async fn test_drop_newest_rejects_when_full() {
    let system = system(1, 2, OverflowPolicy::DropNewest);
    let recorder = Recorder::default();
    system.create_actor("slow", recorder.clone()).await.unwrap();

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    system
        .tell(
            "slow",
            LoadMsg::Gate {
                started: started_tx,
                release: release_rx,
            },
        )
        .await
        .unwrap();
    started_rx.await.unwrap();

    system.tell("slow", LoadMsg::Record { sender: 0, seq: 0 }).await.unwrap();
    system.tell("slow", LoadMsg::Record { sender: 0, seq: 1 }).await.unwrap();
    assert_matches!(
        system.tell("slow", LoadMsg::Record { sender: 0, seq: 2 }).await,
        Err(EngineError::MailboxFull(id)) if id == "slow"
    );

    release_tx.send(()).unwrap();
    let seen = &recorder.seen;
    eventually(|| async move { seen.lock().await.len() == 2 }).await;
    assert_eq!(*recorder.seen.lock().await, vec![(0, 0), (0, 1)]);

    system.shutdown().await;
}

/// Records `(device, counter)` for every message and passes it on
struct OrderNode {
    seen: Arc<Mutex<Vec<(String, i64)>>>,
}

#[async_trait]
impl RuleNode for OrderNode {
    fn name(&self) -> &str {
        "order"
    }

    async fn on_msg(&mut self, msg: Message, ctx: &mut RuleNodeContext) -> anyhow::Result<()> {
        let counter = msg
            .entry("counter")
            .and_then(|entry| entry.value().as_f64())
            .ok_or_else(|| anyhow::anyhow!("no counter"))?;
        self.seen
            .lock()
            .await
            .push((msg.originator_id().to_string(), counter as i64));
        ctx.tell_success(msg);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_devices_keep_their_order() {
    const DEVICES: usize = 20;
    const MESSAGES: i64 = 25;

    let config = Config {
        actors: ActorSystemConfig {
            workers: 3,
            mailbox_capacity: 4,
            overflow: OverflowPolicy::Block,
            batch_size: 2,
        },
        devices: (0..DEVICES).map(|n| device(&format!("dev-{n}"), None)).collect(),
        notifications: NotificationConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let TestHub { hub, .. } = start_hub(config).await;

    let seen = Arc::new(Mutex::new(vec![]));
    hub.rule_engine()
        .register_rule_chain("order", vec![Box::new(OrderNode { seen: Arc::clone(&seen) })])
        .await
        .unwrap();
    hub.rule_engine().set_root_chain("order").await.unwrap();

    let senders = (0..DEVICES).map(|n| {
        let transport = hub.transport().clone();
        tokio::spawn(async move {
            for counter in 0..MESSAGES {
                transport
                    .ingest(&token(&format!("dev-{n}")), &format!(r#"{{"counter": {counter}}}"#), 1)
                    .await
                    .unwrap();
            }
        })
    });
    for handle in join_all(senders).await {
        handle.unwrap();
    }
    wait_for_chain(&hub, "order", DEVICES as u64 * MESSAGES as u64).await;

    let seen = seen.lock().await;
    let mut per_device: HashMap<&str, Vec<i64>> = HashMap::new();
    for (device_id, counter) in seen.iter() {
        per_device.entry(device_id.as_str()).or_default().push(*counter);
    }
    assert_eq!(per_device.len(), DEVICES);
    for (device_id, counters) in per_device {
        assert_eq!(counters, (0..MESSAGES).collect::<Vec<_>>(), "{device_id} out of order");
    }

    drop(seen);
    hub.shutdown().await;
}
