#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::postgres::PgConnectOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::{Mutex, Notify, OnceCell};
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vivid_worker::collaborators::{
    CharacterStore, GeneratedImage, GenerationStatus, GenerationStore, ImageGenerator, Mailer,
    ModelTrainer, TrainedModel, TrainingStatus, WebhookTransport,
};
use vivid_worker::{
    no_shutdown_signal, EmailPayload, ImageGenerationPayload, InMemoryBackend, Job, JobKind,
    JobSystem, PgBackend, QueueBackend, QueueOptions, TrainingPayload, WebhookPayload,
};

pub const TEST_SCHEMA: &str = "vivid_worker";

#[derive(FromRow, Debug)]
pub struct Migration {
    pub id: i32,
    pub ts: DateTime<Utc>,
    pub breaking: bool,
}

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub async fn backend(&self) -> PgBackend {
        QueueOptions::default()
            .pg_pool(self.test_pool.clone())
            .schema(TEST_SCHEMA)
            .init()
            .await
            .expect("Failed to initialize queue store")
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        sqlx::query_as("select * from vivid_worker._private_jobs order by id asc")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get jobs")
    }

    pub async fn make_jobs_run_now(&self, kind: JobKind) {
        sqlx::query("update vivid_worker._private_jobs set run_at = now() where queue_name = $1")
            .bind(kind.queue_name())
            .execute(&self.test_pool)
            .await
            .expect("Failed to update jobs");
    }

    /// Ages every held lock of `kind` past the stale threshold, as if the
    /// owning worker had crashed.
    pub async fn abandon_locks(&self, kind: JobKind) {
        sqlx::query(
            "update vivid_worker._private_jobs set locked_at = now() - interval '5 hours' where queue_name = $1 and locked_at is not null",
        )
        .bind(kind.queue_name())
        .execute(&self.test_pool)
        .await
        .expect("Failed to age locks");
    }

    pub async fn get_migrations(&self) -> Vec<Migration> {
        sqlx::query_as("select * from vivid_worker.migrations order by id asc")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get migrations")
    }
}

pub async fn create_test_database(db_url: &str) -> TestDatabase {
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_vivid_worker");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_vivid_worker_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

/// Runs `test_fn` against a fresh database created from `DATABASE_URL`,
/// dropped afterwards. Skips the test when `DATABASE_URL` is not set.
pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping postgres test");
        return;
    };

    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database(&db_url).await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}
async fn init_job_count() -> Mutex<u32> {
    Mutex::new(0)
}
impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        *cell.lock().await
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

/// Ordered log of collaborator calls shared by every fake.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<StdMutex<Vec<String>>>,
}

impl Recorder {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Lets a test hold a collaborator call until it decides to release it.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Clone, Default)]
pub struct FakeGenerator {
    pub recorder: Recorder,
    pub gate: Option<Gate>,
    pub unavailable: bool,
}

impl ImageGenerator for FakeGenerator {
    async fn generate(&self, request: &ImageGenerationPayload) -> anyhow::Result<Vec<GeneratedImage>> {
        self.recorder.push(format!("generate:{}", request.session_id));
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.unavailable {
            anyhow::bail!("gpu pool exhausted");
        }
        Ok(vec![GeneratedImage {
            image_url: format!("https://cdn.test/{}.png", request.session_id),
            thumbnail_url: None,
            width: Some(512),
            height: Some(512),
            seed: Some(42),
            generation_model: Some("test-model".into()),
        }])
    }
}

#[derive(Clone, Default)]
pub struct FakeTrainer {
    pub recorder: Recorder,
    pub duration: Option<Duration>,
}

impl ModelTrainer for FakeTrainer {
    async fn train(&self, request: &TrainingPayload) -> anyhow::Result<TrainedModel> {
        self.recorder.push(format!("train:{}", request.character_id));
        if let Some(duration) = self.duration {
            tokio::time::sleep(duration).await;
        }
        Ok(TrainedModel {
            model_id: format!("model-{}", request.character_id),
        })
    }
}

#[derive(Clone, Default)]
pub struct FakeStore {
    pub recorder: Recorder,
}

impl GenerationStore for FakeStore {
    async fn save_images(&self, session_id: &str, images: &[GeneratedImage]) -> anyhow::Result<()> {
        self.recorder
            .push(format!("images:{session_id}:{}", images.len()));
        Ok(())
    }

    async fn set_session_status(&self, session_id: &str, status: GenerationStatus) -> anyhow::Result<()> {
        self.recorder.push(format!("session:{session_id}:{status:?}"));
        Ok(())
    }
}

impl CharacterStore for FakeStore {
    async fn set_training_status(&self, character_id: &str, status: TrainingStatus) -> anyhow::Result<()> {
        self.recorder
            .push(format!("character:{character_id}:{status:?}"));
        Ok(())
    }

    async fn set_trained_model(
        &self,
        character_id: &str,
        model_id: &str,
        _completed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.recorder
            .push(format!("model:{character_id}:{model_id}"));
        Ok(())
    }
}

/// Fails the first `failures` deliveries.
#[derive(Clone, Default)]
pub struct FakeMailer {
    pub recorder: Recorder,
    pub failures: Arc<AtomicUsize>,
}

impl FakeMailer {
    pub fn failing(self, failures: usize) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }
}

impl Mailer for FakeMailer {
    async fn send(&self, email: &EmailPayload) -> anyhow::Result<()> {
        self.recorder.push(format!("send:{}", email.to));
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("smtp server unavailable");
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub recorder: Recorder,
    pub unreachable: bool,
}

impl WebhookTransport for FakeTransport {
    async fn post(&self, webhook: &WebhookPayload) -> anyhow::Result<u16> {
        self.recorder.push(format!("post:{}", webhook.url));
        if self.unreachable {
            anyhow::bail!("error sending request for url ({}): connection refused", webhook.url);
        }
        Ok(200)
    }
}

/// Every fake sharing a single recorder.
#[derive(Clone)]
pub struct Fakes {
    pub recorder: Recorder,
    pub generator: FakeGenerator,
    pub trainer: FakeTrainer,
    pub store: FakeStore,
    pub mailer: FakeMailer,
    pub transport: FakeTransport,
}

impl Fakes {
    pub fn new() -> Self {
        let recorder = Recorder::default();
        Fakes {
            generator: FakeGenerator {
                recorder: recorder.clone(),
                gate: None,
                unavailable: false,
            },
            trainer: FakeTrainer {
                recorder: recorder.clone(),
                duration: None,
            },
            store: FakeStore {
                recorder: recorder.clone(),
            },
            mailer: FakeMailer {
                recorder: recorder.clone(),
                failures: Arc::default(),
            },
            transport: FakeTransport {
                recorder: recorder.clone(),
                unreachable: false,
            },
            recorder,
        }
    }

    pub fn job_system<B: QueueBackend>(&self, backend: B) -> JobSystem<B> {
        JobSystem::builder(backend)
            .shutdown_signal(no_shutdown_signal())
            .poll_interval(Duration::from_millis(50))
            .image_generation_processor(self.generator.clone(), self.store.clone())
            .training_processor(self.trainer.clone(), self.store.clone())
            .email_processor(self.mailer.clone())
            .webhook_processor(self.transport.clone())
            .build()
            .expect("Every queue has a processor")
    }
}

pub fn memory_system(fakes: &Fakes) -> (InMemoryBackend, JobSystem<InMemoryBackend>) {
    let backend = InMemoryBackend::new();
    let system = fakes.job_system(backend.clone());
    (backend, system)
}

pub fn image_payload(session_id: &str) -> ImageGenerationPayload {
    ImageGenerationPayload {
        session_id: session_id.into(),
        user_id: "user-1".into(),
        prompt: "a lighthouse at dusk, oil painting".into(),
        negative_prompt: Some("blurry".into()),
        character_id: None,
        settings: object(json!({ "width": 512, "height": 512 })),
    }
}

pub fn training_payload(character_id: &str) -> TrainingPayload {
    TrainingPayload {
        character_id: character_id.into(),
        user_id: "user-1".into(),
        image_urls: vec![
            "https://cdn.test/train/1.png".into(),
            "https://cdn.test/train/2.png".into(),
        ],
    }
}

pub fn email_payload(to: &str) -> EmailPayload {
    EmailPayload {
        to: to.into(),
        subject: "Welcome to Vivid".into(),
        template: "welcome".into(),
        data: object(json!({ "name": "Ada" })),
    }
}

pub fn webhook_payload(url: &str) -> WebhookPayload {
    WebhookPayload {
        url: url.into(),
        payload: object(json!({ "event": "x" })),
        headers: None,
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
