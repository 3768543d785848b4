//! Shared fixtures for the worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docpipe_cache::{CacheService, EvictionPolicy};
use docpipe_models::{DocumentId, DocumentRecord, JobId, JobRecord, JobState, JobStatusView};
use docpipe_queue::{
    JobClient, JobStore, MemoryBroker, MemoryJobStore, QueueResult, RouteTable,
};
use docpipe_store::DocumentDb;
use docpipe_worker::services::InMemoryChunkIndex;
use docpipe_worker::{
    default_registry, DocumentIntake, HandlerRegistry, QueueBackend, ShutdownHandle, WorkerConfig,
    WorkerPool, WorkerResult,
};
use lopdf::{dictionary, Document, Object, Stream};
use tokio::task::JoinHandle;

/// Job store that remembers every applied write.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    history: Mutex<HashMap<JobId, Vec<(JobState, Option<u8>)>>>,
}

impl RecordingStore {
    fn remember(&self, record: &JobRecord) {
        let percent = record.progress.as_ref().map(|p| p.percent);
        self.history
            .lock()
            .unwrap()
            .entry(record.id.clone())
            .or_default()
            .push((record.state, percent));
    }

    /// States and progress percents in write order.
    pub fn history(&self, id: &JobId) -> Vec<(JobState, Option<u8>)> {
        self.history.lock().unwrap().get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, record: &JobRecord) -> QueueResult<()> {
        self.inner.create(record).await?;
        self.remember(record);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn save(&self, record: &JobRecord) -> QueueResult<bool> {
        let applied = self.inner.save(record).await?;
        if applied {
            self.remember(record);
        }
        Ok(applied)
    }

    async fn remove(&self, id: &JobId) -> QueueResult<()> {
        self.inner.remove(id).await
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: DocumentDb,
    pub broker: Arc<MemoryBroker>,
    pub store: Arc<RecordingStore>,
    pub cache: CacheService,
    pub index: Arc<InMemoryChunkIndex>,
    pub client: JobClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_routes(RouteTable::default())
    }

    pub fn with_routes(routes: RouteTable) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DocumentDb::open(dir.path().join("data/documents.db")).unwrap();
        let broker = Arc::new(MemoryBroker::default());
        let store = Arc::new(RecordingStore::default());
        let client = JobClient::new(broker.clone(), store.clone(), routes);
        Self {
            dir,
            db,
            broker,
            store,
            cache: CacheService::local(64, EvictionPolicy::InsertionOrder),
            index: Arc::new(InMemoryChunkIndex::new()),
            client,
        }
    }

    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: 1,
            block_timeout: Duration::from_millis(50),
            claim_interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(5),
            queue_backend: QueueBackend::Memory,
            uploads_dir: self.dir.path().join("uploads"),
            database_path: self.dir.path().join("data/documents.db"),
            ..WorkerConfig::default()
        }
    }

    pub fn registry(&self) -> HandlerRegistry {
        default_registry(&self.config(), &self.db, &self.cache, self.index.clone())
    }

    pub fn intake(&self) -> DocumentIntake {
        let config = self.config();
        DocumentIntake::new(
            self.db.clone(),
            self.client.clone(),
            config.uploads_dir,
            config.max_upload_bytes,
        )
    }

    pub fn start(&self, config: WorkerConfig, registry: HandlerRegistry) -> RunningPool {
        let pool = Arc::new(WorkerPool::new(
            config,
            self.broker.clone(),
            self.store.clone(),
            registry,
        ));
        let handle = pool.shutdown_handle();
        let task = tokio::spawn(async move { pool.run().await });
        RunningPool { handle, task }
    }

    /// Poll until the job is terminal.
    pub async fn wait_for(&self, job_id: &JobId) -> JobStatusView {
        let poll = async {
            loop {
                let status = self.client.get_status(job_id).await.unwrap();
                if status.state.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(20), poll)
            .await
            .expect("job did not finish in time")
    }

    pub fn document(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.db.session().unwrap().get(id).unwrap()
    }
}

pub struct RunningPool {
    handle: ShutdownHandle,
    task: JoinHandle<WorkerResult<()>>,
}

impl RunningPool {
    pub async fn stop(self) {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("pool did not stop")
            .unwrap()
            .unwrap();
    }
}

/// A PDF with one line of text per page.
pub fn build_pdf(page_texts: &[String]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for text in page_texts {
        let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

pub fn pages(count: usize) -> Vec<String> {
    (1..=count)
        .map(|page| format!("Page {} explains how failed uploads are retained. ", page).repeat(3))
        .collect()
}
