mod endpoint;
pub mod health;
pub mod ring_buffer;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::module::{ExtensionModule, ModuleContext};
use crate::publication::Publication;
use crate::queue::DispatchQueue;
use crate::store::{DurableStore, JsonLinesStore, TopicRecord};
use crate::BrokerStats;
use health::{HealthLevel, HealthMonitor};
use parking_lot::Mutex;
use ring_buffer::RingBufferLog;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Frames buffered per subscriber before a slow one starts losing them
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Statistics counters for the broker
#[derive(Default)]
struct Counters {
    records_in_memory: AtomicU64,
    records_persisted: AtomicU64,
}

/// State shared by the duties, the endpoints and status consumers
struct Shared {
    config: BrokerConfig,
    queue: DispatchQueue<Publication>,
    persist_queue: DispatchQueue<Publication>,
    ring: Option<Mutex<RingBufferLog>>,
    health: Arc<HealthMonitor>,
    store: Option<Arc<dyn DurableStore>>,
    topics: Mutex<HashMap<String, TopicRecord>>,
    frames: broadcast::Sender<Arc<str>>,
    counters: Counters,
    started: Instant,
}

impl Shared {
    /// Parse an ingestion request and queue it for dispatch
    fn ingest(&self, request: &str) {
        self.counters.records_in_memory.fetch_add(1, Ordering::Relaxed);
        let publication = Publication::parse_request(request, self.config.priority_enabled);
        let priority = publication.priority();
        self.queue.put(publication, priority);
    }

    /// Dispatch `first` and everything queued behind it as one write epoch.
    /// Returns the number of publications dispatched.
    fn dispatch_epoch(&self, first: Publication) -> usize {
        let mut ring = self.ring.as_ref().map(|ring| ring.lock());
        if let Some(ring) = ring.as_mut() {
            if let Err(e) = ring.begin_write_epoch(false) {
                error!("Failed to open ring buffer write epoch: {}", e);
            }
        }

        let mut dispatched = 0;
        let mut next = Some(first);
        while let Some(mut publication) = next {
            let _ = self.frames.send(Arc::from(publication.frame()));
            publication.acknowledge();

            if let Some(ring) = ring.as_mut() {
                match ring.append(&publication) {
                    Ok(()) if !self.config.persist_enabled && !ring.wrapped_this_epoch() => {
                        self.counters.records_persisted.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(()) => {}
                    Err(e) => warn!("Skipping ring buffer append on topic {}: {}", publication.topic(), e),
                }
            }
            if self.store.is_some() {
                let priority = publication.priority();
                self.persist_queue.put(publication, priority);
            }

            dispatched += 1;
            next = self.queue.try_pull();
        }

        if let Some(ring) = ring.as_mut() {
            let level = ring.end_write_epoch();
            debug!(
                dispatched,
                write_position = ring.write_position(),
                health = %level,
                "Closed write epoch"
            );
        }
        dispatched
    }

    /// Return the topic record for `name`, registering it on first use
    fn ensure_topic(&self, name: &str) -> TopicRecord {
        let record = {
            let mut topics = self.topics.lock();
            if let Some(record) = topics.get(name) {
                return record.clone();
            }
            let record = TopicRecord {
                id: topics.len() as u64 + 1,
                name: name.to_string(),
            };
            topics.insert(name.to_string(), record.clone());
            record
        };

        debug!("Registering topic {} ({})", record.name, record.id);
        if let Some(store) = &self.store {
            if let Err(e) = store.register_topic(&record) {
                error!("Failed to register topic {}: {}", record.name, e);
            }
        }
        record
    }

    fn stats(&self) -> BrokerStats {
        let (write_position, capacity) = match &self.ring {
            Some(ring) => {
                let ring = ring.lock();
                (Some(ring.write_position()), Some(ring.capacity()))
            }
            None => (None, None),
        };

        let mut sinks = Vec::new();
        if self.store.is_some() {
            sinks.push("store");
        }
        if self.ring.is_some() {
            sinks.push("mmap");
        }

        BrokerStats {
            health: self.health.level(),
            records_in_memory: self.counters.records_in_memory.load(Ordering::Relaxed),
            records_persisted: self.counters.records_persisted.load(Ordering::Relaxed),
            queue_depth: self.queue.len(),
            write_position,
            capacity,
            uptime: self.started.elapsed(),
            sinks,
        }
    }
}

/// Read-only view of a running broker, handed to collaborators that need one
#[derive(Clone)]
pub struct StatusHandle {
    shared: Arc<Shared>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> BrokerStats {
        self.shared.stats()
    }

    pub fn health(&self) -> HealthLevel {
        self.shared.health.level()
    }

    /// The monitor itself, for external reset or critical triggers
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.shared.health
    }
}

/// The broker owns both endpoints, the dispatch queue and the sinks
pub struct Broker {
    shared: Arc<Shared>,
    publish_listener: TcpListener,
    ingest_listener: TcpListener,
    modules: Vec<Box<dyn ExtensionModule>>,
}

impl Broker {
    /// Build a broker and bind both endpoints.
    ///
    /// With persistence enabled, publications go to a [`JsonLinesStore`] under
    /// `DB_PATH`. A bind failure is returned as [`Error::Bind`]; callers are
    /// expected to treat it as fatal.
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        let store: Option<Arc<dyn DurableStore>> = if config.persist_enabled {
            match JsonLinesStore::open(&config.db_path) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    error!("Unable to open durable store, persistence disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self::bind_with_store(config, store).await
    }

    /// Build a broker around an explicit durable store
    pub async fn bind_with_store(
        config: BrokerConfig,
        store: Option<Arc<dyn DurableStore>>,
    ) -> Result<Self> {
        info!("Creating new broker with config: {:?}", config);

        let health = Arc::new(HealthMonitor::new(config.mmap_capacity));
        let ring = if config.mmap_enabled {
            let mut ring = RingBufferLog::open(
                &config.mmap_path,
                &config.mmap_file,
                config.mmap_capacity,
                Arc::clone(&health),
            )?;
            ring.recover_on_startup();
            Some(Mutex::new(ring))
        } else {
            None
        };

        let store = if config.persist_enabled { store } else { None };

        let publish_addr = config.publish_addr();
        info!("Creating publish endpoint on {}", publish_addr);
        let publish_listener = TcpListener::bind(&publish_addr)
            .await
            .map_err(|source| Error::Bind {
                endpoint: "publish",
                addr: publish_addr.clone(),
                source,
            })?;

        let ingest_addr = config.ingest_addr();
        info!("Creating ingestion endpoint on {}", ingest_addr);
        let ingest_listener = TcpListener::bind(&ingest_addr)
            .await
            .map_err(|source| Error::Bind {
                endpoint: "ingestion",
                addr: ingest_addr.clone(),
                source,
            })?;

        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let queue = DispatchQueue::new(config.priority_enabled);

        let shared = Arc::new(Shared {
            config,
            queue,
            persist_queue: DispatchQueue::stack(),
            ring,
            health,
            store,
            topics: Mutex::new(HashMap::new()),
            frames,
            counters: Counters::default(),
            started: Instant::now(),
        });

        Ok(Self {
            shared,
            publish_listener,
            ingest_listener,
            modules: Vec::new(),
        })
    }

    /// Register an extension module, started after the core duties
    pub fn inject_module(&mut self, module: impl ExtensionModule + 'static) {
        debug!("Injecting module {}", module.name());
        self.modules.push(Box::new(module));
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    pub fn publish_addr(&self) -> Result<SocketAddr> {
        Ok(self.publish_listener.local_addr()?)
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr> {
        Ok(self.ingest_listener.local_addr()?)
    }

    /// Return the topic record for `name`, registering it on first use
    pub fn ensure_topic(&self, name: &str) -> TopicRecord {
        self.shared.ensure_topic(name)
    }

    /// Run the broker until the process is terminated
    pub async fn start(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the broker until `shutdown` resolves, then flush the ring buffer log
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Broker {
            shared,
            publish_listener,
            ingest_listener,
            modules,
        } = self;

        let mut duties = JoinSet::new();
        duties.spawn(endpoint::serve_publish(publish_listener, shared.frames.clone()));
        duties.spawn(endpoint::serve_ingest(ingest_listener, Arc::clone(&shared)));
        duties.spawn(dispatch(Arc::clone(&shared)));
        if let Some(store) = &shared.store {
            duties.spawn(persist(Arc::clone(&shared), Arc::clone(store)));
        }

        let context = ModuleContext::new(
            tokio::runtime::Handle::current(),
            StatusHandle {
                shared: Arc::clone(&shared),
            },
        );
        for module in &modules {
            info!("Loading module {}", module.name());
            match module.start(&context) {
                Ok(()) => info!("{}", module.init_message()),
                Err(e) => error!("Module {} failed to start: {}", module.name(), e),
            }
        }

        info!("Broker is ready");
        tokio::select! {
            _ = shutdown => info!("Shutting down broker"),
            Some(result) = duties.join_next() => match result {
                Ok(()) => error!("A broker duty exited unexpectedly"),
                Err(e) => error!("A broker duty failed: {}", e),
            },
        }
        duties.shutdown().await;

        if let Some(ring) = &shared.ring {
            ring.lock().flush()?;
        }
        Ok(())
    }
}

/// Dispatch duty: drain the queue to subscribers and sinks, one write epoch per wake
async fn dispatch(shared: Arc<Shared>) {
    if let Some(ring) = &shared.ring {
        let queue_empty = shared.queue.is_empty();
        if let Err(e) = ring.lock().begin_write_epoch(queue_empty) {
            error!("Failed to reset ring buffer log: {}", e);
        }
    }

    loop {
        let first = shared.queue.pull().await;
        shared.dispatch_epoch(first);
        tokio::task::yield_now().await;
    }
}

/// Persist duty: forward dispatched publications to the durable store
async fn persist(shared: Arc<Shared>, store: Arc<dyn DurableStore>) {
    loop {
        let publication = shared.persist_queue.pull().await;
        let task_shared = Arc::clone(&shared);
        let task_store = Arc::clone(&store);
        let result = tokio::task::spawn_blocking(move || {
            task_store.insert(&publication)?;
            task_shared.ensure_topic(publication.topic());
            Ok::<_, Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                shared.counters.records_persisted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => error!("Persistence failed: {}", e),
            Err(e) => error!("Persistence task failed: {}", e),
        }
    }
}
