//! Infrastructure wiring: store, event stream, producer, outbox, manager
//! services, and the two websocket handlers.

use std::sync::Arc;

use parley_events::{EventStream, InMemoryEventStream};
use parley_infra::jobs::{self, JobDeps};
use parley_infra::manager::{ManagerLoad, ManagerPool, ManagerScheduler, SchedulerError};
use parley_infra::outbox::{Outbox, OutboxError};
use parley_infra::producer::{InMemoryProducer, MessageCipher, MessageProducer, ProducerError};
#[cfg(feature = "redis")]
use parley_infra::producer::RedisStreamsProducer;
use parley_infra::store::{InMemoryStore, PgStore, ProblemRepository, Store, StoreError};
use parley_infra::usecases::{ClientUseCases, ManagerUseCases, VerdictUseCase};
use parley_observability::LogHandle;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{ClientAdapter, ManagerAdapter};
use crate::config::Config;
use crate::middleware::{DevIdentityResolver, IdentityResolver};
use crate::transport::{StreamHandler, TransportSettings};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("producer: {0}")]
    Producer(#[from] ProducerError),

    #[error("outbox: {0}")]
    Outbox(#[from] OutboxError),

    #[error("msg_producer.redis_url is set but the binary was built without the `redis` feature")]
    RedisDisabled,

    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("manager scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Everything the routes and the background tasks share.
pub struct AppServices {
    pub store: Arc<dyn Store>,
    pub stream: InMemoryEventStream,
    pub pool: Arc<ManagerPool>,
    pub outbox: Arc<Outbox>,
    pub scheduler: Arc<ManagerScheduler>,
    pub client: ClientUseCases,
    pub managers: ManagerUseCases,
    pub verdicts: VerdictUseCase,
    pub client_stream: Arc<StreamHandler>,
    pub manager_stream: Arc<StreamHandler>,
    pub identity: Arc<dyn IdentityResolver>,
    pub log: LogHandle,
    pub shutdown: CancellationToken,
}

/// Handles of the long-running tasks started by [`AppServices::start`].
pub struct BackgroundTasks {
    outbox: JoinHandle<Result<(), OutboxError>>,
    scheduler: JoinHandle<Result<(), SchedulerError>>,
}

impl BackgroundTasks {
    /// Wait for both tasks. The first one to fail cancels `shutdown`, which
    /// stops the servers and the other task.
    pub async fn supervise(self, shutdown: CancellationToken) -> Result<(), ServicesError> {
        let outbox = watch("outbox", self.outbox, &shutdown);
        let scheduler = watch("manager scheduler", self.scheduler, &shutdown);
        let (outbox, scheduler) = tokio::join!(outbox, scheduler);
        outbox?;
        scheduler?;
        Ok(())
    }
}

async fn watch<E>(
    task: &'static str,
    handle: JoinHandle<Result<(), E>>,
    shutdown: &CancellationToken,
) -> Result<(), ServicesError>
where
    ServicesError: From<E>,
{
    let result = match handle.await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => ServicesError::from(e),
        Err(e) => <ServicesError as From<tokio::task::JoinError>>::from(e),
    };
    if !shutdown.is_cancelled() {
        error!(task, error = %result, "background task failed; shutting down");
        shutdown.cancel();
    }
    Err(result)
}

/// Build services from config.
///
/// No `db.postgres_url` selects the in-memory store; no
/// `msg_producer.redis_url` selects the in-memory producer.
pub async fn build_services(
    config: &Config,
    log: LogHandle,
    shutdown: CancellationToken,
) -> Result<AppServices, ServicesError> {
    let producer = build_producer(config)?;

    match &config.db.postgres_url {
        Some(url) => {
            let store = PgStore::connect(url, config.db.max_connections).await?;
            store.migrate().await?;
            info!("using postgres store");
            wire(config, store, producer, log, shutdown)
        }
        None => {
            warn!("db.postgres_url not set; using in-memory store");
            wire(config, InMemoryStore::new(), producer, log, shutdown)
        }
    }
}

fn build_producer(config: &Config) -> Result<Arc<dyn MessageProducer>, ServicesError> {
    let cipher = config
        .msg_producer
        .encrypt_key
        .as_deref()
        .map(MessageCipher::from_hex)
        .transpose()?;

    match &config.msg_producer.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            info!(encrypted = cipher.is_some(), "using redis streams producer");
            Ok(Arc::new(RedisStreamsProducer::new(
                url,
                config.msg_producer.stream_key.clone(),
                cipher,
            )?))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(ServicesError::RedisDisabled),
        None => {
            warn!("msg_producer.redis_url not set; outbound messages stay in memory");
            Ok(Arc::new(InMemoryProducer::new()))
        }
    }
}

/// Assemble the object graph over a concrete store.
pub fn wire<S>(
    config: &Config,
    store: S,
    producer: Arc<dyn MessageProducer>,
    log: LogHandle,
    shutdown: CancellationToken,
) -> Result<AppServices, ServicesError>
where
    S: Store + 'static,
{
    let store = Arc::new(store);
    let as_store: Arc<dyn Store> = store.clone();
    let as_problems: Arc<dyn ProblemRepository> = store;

    let stream = InMemoryEventStream::new(config.stream_settings());
    let as_stream: Arc<dyn EventStream> = Arc::new(stream.clone());
    let pool = Arc::new(ManagerPool::new(config.manager_pool.capacity));
    let load = ManagerLoad::new(
        as_problems,
        config.manager_load.max_problems_at_same_time,
    );

    let mut outbox = Outbox::new(Arc::clone(&as_store), config.outbox_settings());
    jobs::register_all(
        &mut outbox,
        &JobDeps {
            store: Arc::clone(&as_store),
            stream: Arc::clone(&as_stream),
            producer,
            load: load.clone(),
        },
    )?;
    let outbox = Arc::new(outbox);

    let scheduler = Arc::new(ManagerScheduler::new(
        Arc::clone(&as_store),
        Arc::clone(&pool),
        Arc::clone(&outbox),
        config.scheduler_period(),
    ));

    let transport = TransportSettings {
        ping_period: config.ping_period(),
    };
    let client_stream = Arc::new(StreamHandler::new(
        Arc::clone(&as_stream),
        Arc::new(ClientAdapter),
        transport,
        shutdown.clone(),
    ));
    let manager_stream = Arc::new(StreamHandler::new(
        as_stream,
        Arc::new(ManagerAdapter),
        transport,
        shutdown.clone(),
    ));

    Ok(AppServices {
        client: ClientUseCases::new(Arc::clone(&as_store), Arc::clone(&outbox)),
        managers: ManagerUseCases::new(
            Arc::clone(&as_store),
            Arc::clone(&outbox),
            Arc::clone(&pool),
            load,
        ),
        verdicts: VerdictUseCase::new(Arc::clone(&as_store), Arc::clone(&outbox)),
        store: as_store,
        stream,
        pool,
        outbox,
        scheduler,
        client_stream,
        manager_stream,
        identity: Arc::new(DevIdentityResolver),
        log,
        shutdown,
    })
}

impl AppServices {
    /// Replace the dev identity resolver.
    pub fn with_identity(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = resolver;
        self
    }

    /// Spawn the outbox workers and the manager scheduler.
    pub fn start(&self) -> BackgroundTasks {
        let outbox = Arc::clone(&self.outbox);
        let outbox_token = self.shutdown.child_token();
        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_token = self.shutdown.child_token();

        BackgroundTasks {
            outbox: tokio::spawn(async move { outbox.run(outbox_token).await }),
            scheduler: tokio::spawn(async move { scheduler.run(scheduler_token).await }),
        }
    }

    /// Drop every subscription and every waiting manager.
    pub fn close(&self) {
        if let Err(e) = self.stream.close() {
            warn!(error = %e, "closing event stream");
        }
        self.pool.close();
    }
}
