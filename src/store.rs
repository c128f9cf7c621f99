//! Durable store collaborator fed by the persist duty.

use crate::error::{Error, Result};
use crate::publication::Publication;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// A registered topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicRecord {
    pub id: u64,
    pub name: String,
}

/// External store of publications and topics
pub trait DurableStore: Send + Sync {
    fn insert(&self, publication: &Publication) -> Result<()>;

    fn register_topic(&self, topic: &TopicRecord) -> Result<()>;
}

/// Appends publications and topics as JSON lines
pub struct JsonLinesStore {
    publications: Mutex<BufWriter<File>>,
    topics: Mutex<BufWriter<File>>,
}

impl JsonLinesStore {
    pub const PUBLICATIONS_FILE: &'static str = "publications.jsonl";
    pub const TOPICS_FILE: &'static str = "topics.jsonl";

    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            publications: Mutex::new(BufWriter::new(Self::append_file(&dir.join(Self::PUBLICATIONS_FILE))?)),
            topics: Mutex::new(BufWriter::new(Self::append_file(&dir.join(Self::TOPICS_FILE))?)),
        })
    }

    fn append_file(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Store(format!("cannot open {}: {}", path.display(), e)))
    }

    fn write_line<T: Serialize>(writer: &Mutex<BufWriter<File>>, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut writer = writer.lock();
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::Store(e.to_string()))
    }
}

impl DurableStore for JsonLinesStore {
    fn insert(&self, publication: &Publication) -> Result<()> {
        Self::write_line(&self.publications, publication)
    }

    fn register_topic(&self, topic: &TopicRecord) -> Result<()> {
        Self::write_line(&self.topics, topic)
    }
}

/// In-process store, mostly for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    publications: Mutex<Vec<Publication>>,
    topics: Mutex<Vec<TopicRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.publications.lock().clone()
    }

    pub fn topics(&self) -> Vec<TopicRecord> {
        self.topics.lock().clone()
    }
}

impl DurableStore for MemoryStore {
    fn insert(&self, publication: &Publication) -> Result<()> {
        self.publications.lock().push(publication.clone());
        Ok(())
    }

    fn register_topic(&self, topic: &TopicRecord) -> Result<()> {
        self.topics.lock().push(topic.clone());
        Ok(())
    }
}
