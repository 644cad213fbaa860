//! Cross-component flows over the in-memory backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parley_core::{RequestId, UserId};
use parley_events::{Event, EventStream, InMemoryEventStream, Subscription};
use parley_infra::jobs::{self, JobDeps, JobError, send_client_message};
use parley_infra::manager::{ManagerLoad, ManagerPool, ManagerScheduler};
use parley_infra::outbox::{FailReason, JobHandler, Outbox, OutboxSettings};
use parley_infra::producer::InMemoryProducer;
use parley_infra::store::{InMemoryStore, JobRepository, ProblemRepository};
use parley_infra::usecases::{ClientUseCases, ManagerUseCases, Verdict, VerdictUseCase};
use tokio_util::sync::CancellationToken;

struct System {
    store: InMemoryStore,
    stream: InMemoryEventStream,
    producer: Arc<InMemoryProducer>,
    pool: Arc<ManagerPool>,
    outbox: Arc<Outbox>,
    cancel: CancellationToken,
}

/// Failed jobs become eligible again immediately.
fn settings() -> OutboxSettings {
    OutboxSettings {
        reserve_for: Duration::ZERO,
        ..OutboxSettings::default()
    }
}

impl System {
    fn new(extra: Vec<Arc<dyn JobHandler>>) -> Self {
        let store = InMemoryStore::new();
        let stream = InMemoryEventStream::default();
        let producer = Arc::new(InMemoryProducer::new());
        let load = ManagerLoad::new(Arc::new(store.clone()), 5);

        let mut outbox = Outbox::new(Arc::new(store.clone()), settings());
        let deps = JobDeps {
            store: Arc::new(store.clone()),
            stream: Arc::new(stream.clone()),
            producer: producer.clone(),
            load,
        };
        jobs::register_all(&mut outbox, &deps).unwrap();
        for handler in extra {
            outbox.register_job(handler).unwrap();
        }

        Self {
            store,
            stream,
            producer,
            pool: Arc::new(ManagerPool::default()),
            outbox: Arc::new(outbox),
            cancel: CancellationToken::new(),
        }
    }

    fn subscribe(&self, user: UserId) -> Subscription {
        self.stream.subscribe(user, self.cancel.child_token()).unwrap()
    }

    async fn drain_outbox(&self) -> usize {
        let mut processed = 0;
        while self.outbox.run_once().await.unwrap() {
            processed += 1;
        }
        processed
    }

    fn client(&self) -> ClientUseCases {
        ClientUseCases::new(Arc::new(self.store.clone()), Arc::clone(&self.outbox))
    }

    fn verdicts(&self) -> VerdictUseCase {
        VerdictUseCase::new(Arc::new(self.store.clone()), Arc::clone(&self.outbox))
    }

    fn managers(&self) -> ManagerUseCases {
        ManagerUseCases::new(
            Arc::new(self.store.clone()),
            Arc::clone(&self.outbox),
            Arc::clone(&self.pool),
            ManagerLoad::new(Arc::new(self.store.clone()), 5),
        )
    }

    fn scheduler(&self) -> ManagerScheduler {
        ManagerScheduler::new(
            Arc::new(self.store.clone()),
            Arc::clone(&self.pool),
            Arc::clone(&self.outbox),
            Duration::from_millis(100),
        )
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn drain(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn client_message_is_produced_and_echoed_once() {
    let sys = System::new(Vec::new());
    let client = UserId::new();
    let mut sub = sys.subscribe(client);

    let msg = sys
        .client()
        .send_message(client, RequestId::new(), "where is my order?")
        .await
        .unwrap();
    assert_eq!(sys.store.jobs().await[0].name, send_client_message::NAME);

    assert_eq!(sys.drain_outbox().await, 1);

    let produced = sys.producer.produced();
    assert_eq!(produced.len(), 1);
    assert!(produced[0].from_client);
    assert_eq!(produced[0].id, msg.id);

    match drain(&mut sub).as_slice() {
        [Event::NewMessage(e)] => assert_eq!(e.message_id, msg.id),
        other => panic!("unexpected events: {other:?}"),
    }
    assert!(sys.store.jobs().await.is_empty());
}

struct Spy(AtomicU32);

#[async_trait]
impl JobHandler for Spy {
    fn name(&self) -> &'static str {
        "spy"
    }

    async fn handle(&self, _payload: &str) -> Result<(), JobError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn unregistered_job_is_dead_lettered_without_running_anything() {
    let spy = Arc::new(Spy(AtomicU32::new(0)));
    let sys = System::new(vec![spy.clone() as Arc<dyn JobHandler>]);

    sys.store
        .create_job("no-such-job", "payload", Utc::now())
        .await
        .unwrap();
    assert_eq!(sys.drain_outbox().await, 1);

    assert_eq!(spy.0.load(Ordering::SeqCst), 0);
    assert!(sys.store.jobs().await.is_empty());
    let failed = sys.store.list_failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "no-such-job");
    assert_eq!(failed[0].reason, FailReason::NotFound);
}

struct AlwaysFails(AtomicU32);

#[async_trait]
impl JobHandler for AlwaysFails {
    fn name(&self) -> &'static str {
        "always-fails"
    }

    fn max_attempts(&self) -> u32 {
        4
    }

    async fn handle(&self, _payload: &str) -> Result<(), JobError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(JobError::Failed("downstream unavailable".into()))
    }
}

#[tokio::test]
async fn failing_job_runs_max_attempts_times_then_dead_letters() {
    let handler = Arc::new(AlwaysFails(AtomicU32::new(0)));
    let sys = System::new(vec![handler.clone() as Arc<dyn JobHandler>]);

    sys.store
        .create_job("always-fails", "x", Utc::now())
        .await
        .unwrap();

    for attempt in 1..=3u32 {
        assert!(sys.outbox.run_once().await.unwrap());
        assert_eq!(sys.store.jobs().await[0].attempts, attempt);
        assert!(sys.store.list_failed_jobs(10).await.unwrap().is_empty());
    }
    assert!(sys.outbox.run_once().await.unwrap());
    assert!(!sys.outbox.run_once().await.unwrap());

    assert_eq!(handler.0.load(Ordering::SeqCst), 4);
    assert!(sys.store.jobs().await.is_empty());
    let failed = sys.store.list_failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, FailReason::TooManyErrors);
}

#[tokio::test]
async fn one_free_manager_takes_only_the_oldest_problem() {
    let sys = System::new(Vec::new());
    let client_uc = sys.client();
    let verdicts = sys.verdicts();

    let mut messages = Vec::new();
    for body in ["first", "second", "third"] {
        let msg = client_uc
            .send_message(UserId::new(), RequestId::new(), body)
            .await
            .unwrap();
        verdicts.apply(msg.id, Verdict::Ok).await.unwrap();
        messages.push(msg);
    }

    let manager = UserId::new();
    sys.managers().free_hands(manager).await.unwrap();

    assert_eq!(sys.scheduler().tick().await.unwrap(), 1);

    let waiting: Vec<_> = sys
        .store
        .problems_without_manager()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(waiting, vec![messages[1].problem_id, messages[2].problem_id]);
    assert_eq!(
        sys.store.problem(messages[0].problem_id).await.unwrap().manager_id,
        Some(manager)
    );
    assert_eq!(sys.pool.size(), 0);
}

#[tokio::test]
async fn full_conversation_reaches_both_sides() {
    let sys = System::new(Vec::new());
    let client = UserId::new();
    let manager = UserId::new();
    let mut client_sub = sys.subscribe(client);
    let mut manager_sub = sys.subscribe(manager);

    let question = sys
        .client()
        .send_message(client, RequestId::new(), "hello?")
        .await
        .unwrap();
    sys.verdicts().apply(question.id, Verdict::Ok).await.unwrap();
    sys.managers().free_hands(manager).await.unwrap();
    sys.scheduler().tick().await.unwrap();
    sys.drain_outbox().await;

    let client_events = drain(&mut client_sub);
    let kinds: Vec<_> = client_events.iter().map(Event::event_type).collect();
    assert_eq!(
        kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        vec!["NewMessageEvent", "MessageSentEvent", "NewMessageEvent"]
    );

    let manager_events = drain(&mut manager_sub);
    assert!(manager_events.iter().any(|e| matches!(e, Event::NewChat(c) if c.client_id == client)));

    sys.managers()
        .send_message(manager, RequestId::new(), question.chat_id, "hi, how can I help?")
        .await
        .unwrap();
    sys.managers()
        .close_chat(manager, RequestId::new(), question.chat_id)
        .await
        .unwrap();
    sys.drain_outbox().await;

    let client_events = drain(&mut client_sub);
    assert_eq!(client_events.len(), 2);
    let manager_events = drain(&mut manager_sub);
    assert!(matches!(manager_events.last(), Some(Event::ChatClosed(c)) if c.can_take_more_problems));
    assert_eq!(sys.producer.produced().len(), 2);
}
