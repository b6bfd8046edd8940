//! End-to-end session lifecycle tests with in-process backends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout};

use docchat_embeddings::{Embedding, EmbeddingError};
use docchat_retrieval::{
    Document, Embedder, EmbeddingProvider, FALLBACK_ANSWER, GenerationError,
    GenerationProvider, HashingProvider, NO_DOCUMENT_SUMMARY, RetrievalEngine, RetrievalError,
    SessionId, SessionState,
};

/// Generation backend that records prompts and replies with a fixed text.
struct ScriptedGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| GenerationError::ApiRequest("backend down".to_string()))
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Hashing provider that blocks document embedding until released.
struct GatedProvider {
    inner: HashingProvider,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl EmbeddingProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_documents(&self, texts: &[String]) -> docchat_embeddings::Result<Vec<Embedding>> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> docchat_embeddings::Result<Embedding> {
        self.inner.embed_query(text).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Hashing provider whose document embedding fails while `fail` is set.
struct FlakyProvider {
    inner: HashingProvider,
    fail: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_documents(&self, texts: &[String]) -> docchat_embeddings::Result<Vec<Embedding>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::ApiRequest("quota exhausted".to_string()));
        }
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> docchat_embeddings::Result<Embedding> {
        self.inner.embed_query(text).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

async fn engine_with(
    dir: &Path,
    provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<ScriptedGenerator>,
) -> RetrievalEngine {
    RetrievalEngine::builder()
        .with_sessions_dir(dir)
        .with_embedder(Embedder::new(provider))
        .with_generator(generator)
        .build()
        .await
        .unwrap()
}

async fn hashing_engine(dir: &Path, generator: Arc<ScriptedGenerator>) -> RetrievalEngine {
    engine_with(dir, Arc::new(HashingProvider::new(128)), generator).await
}

/// An engine whose document embedding waits on the returned `release`
/// after signalling `started`. Questions are embedded without waiting.
async fn gated_engine(
    dir: &Path,
    generator: Arc<ScriptedGenerator>,
) -> (Arc<RetrievalEngine>, Arc<Notify>, Arc<Notify>) {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = GatedProvider {
        inner: HashingProvider::new(128),
        started: started.clone(),
        release: release.clone(),
    };
    let engine = engine_with(dir, Arc::new(provider), generator).await;
    (Arc::new(engine), started, release)
}

/// Create a session holding `text` using a separate, ungated engine.
async fn seeded_session(dir: &Path, filename: &str, text: &str) -> SessionId {
    let engine = hashing_engine(dir, ScriptedGenerator::replying("ok")).await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document(filename, text))
        .await
        .unwrap();
    id
}

/// The filename recorded on disk, as a freshly started process sees it.
async fn stored_filename(dir: &Path, id: &SessionId) -> Option<String> {
    let engine = hashing_engine(dir, ScriptedGenerator::replying("ok")).await;
    engine.store().describe(id).await.unwrap().filename
}

fn paragraph(sentence: &str) -> String {
    sentence.repeat(20).trim_end().to_string()
}

fn text_document(name: &str, text: &str) -> Document {
    Document::new(name, text.as_bytes().to_vec()).unwrap()
}

#[tokio::test]
async fn test_three_paragraph_document_is_ready_with_three_chunks() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::replying("A rehabilitation plan for an ankle sprain.");
    let engine = hashing_engine(dir.path(), generator.clone()).await;

    let para = paragraph("Rest the injured ankle and apply ice regularly. ");
    let text = format!("{para}\n\n{para}\n\n{para}");

    let id = engine.create_session().await.unwrap();
    let report = engine
        .ingest(id.as_str(), text_document("ankle.txt", &text))
        .await
        .unwrap();
    assert_eq!(report.chunk_count, 3);
    assert_eq!(report.filename, "ankle.txt");

    let info = engine.describe(id.as_str()).await.unwrap();
    assert!(info.exists);
    assert!(info.document_uploaded);
    assert!(info.processed);
    assert!(info.ready_for_chat);
    assert_eq!(info.document_chunks, 3);
    assert_eq!(
        info.document_summary.as_deref(),
        Some("A rehabilitation plan for an ankle sprain.")
    );
    assert!(generator.last_prompt().contains("Rest the injured ankle"));
}

#[tokio::test]
async fn test_answer_before_upload_is_document_not_loaded() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("unused")).await;
    let id = engine.create_session().await.unwrap();

    assert!(matches!(
        engine.answer(id.as_str(), "Can I run?", None).await,
        Err(RetrievalError::DocumentNotLoaded(_))
    ));
    assert_eq!(
        engine.summarize(id.as_str()).await.unwrap(),
        NO_DOCUMENT_SUMMARY
    );

    let info = engine.describe(id.as_str()).await.unwrap();
    assert!(info.exists);
    assert!(!info.document_uploaded);
    assert_eq!(info.document_summary, None);
}

#[tokio::test]
async fn test_unknown_and_malformed_sessions() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("unused")).await;
    let unknown = "0b7f5c9e-8a41-4c1e-9d0a-3f2b6c7d8e9f";

    assert!(matches!(
        engine.answer(unknown, "?", None).await,
        Err(RetrievalError::SessionNotFound(_))
    ));
    assert!(matches!(
        engine
            .ingest(unknown, text_document("a.txt", "Knee bends."))
            .await,
        Err(RetrievalError::SessionNotFound(_))
    ));
    assert!(!engine.describe(unknown).await.unwrap().exists);

    assert!(matches!(
        engine.answer("../../etc", "?", None).await,
        Err(RetrievalError::InvalidSessionId(_))
    ));
    assert!(matches!(
        engine.delete_session("not-a-session").await,
        Err(RetrievalError::InvalidSessionId(_))
    ));
}

#[tokio::test]
async fn test_answer_uses_all_chunks_when_fewer_than_top_k() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::replying("Ice for 15 minutes.");
    let engine = hashing_engine(dir.path(), generator.clone()).await;

    let first = paragraph("Apply ice to the swollen knee for fifteen minutes. ");
    let second = paragraph("Strengthen the hamstrings with slow bridges. ");
    let id = engine.create_session().await.unwrap();
    let report = engine
        .ingest(
            id.as_str(),
            text_document("knee.txt", &format!("{first}\n\n{second}")),
        )
        .await
        .unwrap();
    assert_eq!(report.chunk_count, 2);

    let answer = engine
        .answer(id.as_str(), "How long should I ice my knee?", None)
        .await
        .unwrap();
    assert_eq!(answer, "Ice for 15 minutes.");

    let prompt = generator.last_prompt();
    assert!(prompt.contains("Section 1:\nApply ice to the swollen knee"));
    assert!(prompt.contains("Section 2:\n"));
    assert!(!prompt.contains("Section 3:"));
    assert!(prompt.contains("Question: How long should I ice my knee?"));
}

#[tokio::test]
async fn test_search_is_complete_and_best_first() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;

    let first = paragraph("Apply ice to the swollen knee for fifteen minutes. ");
    let second = paragraph("Strengthen the hamstrings with slow bridges. ");
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(
            id.as_str(),
            text_document("knee.txt", &format!("{first}\n\n{second}")),
        )
        .await
        .unwrap();

    let hits = engine
        .retrieve(id.as_str(), "hamstrings bridges")
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].chunk.text.contains("hamstrings"));
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn test_empty_generation_returns_fallback() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("  \n")).await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document("a.txt", "Calf raises, three sets."))
        .await
        .unwrap();

    let answer = engine.answer(id.as_str(), "Sets?", None).await.unwrap();
    assert_eq!(answer, FALLBACK_ANSWER);
    assert_eq!(
        engine.summarize(id.as_str()).await.unwrap(),
        "Unable to generate summary"
    );
}

#[tokio::test]
async fn test_generation_failure_propagates_but_summary_degrades() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::failing()).await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document("a.txt", "Wall slides daily."))
        .await
        .unwrap();

    assert!(matches!(
        engine.answer(id.as_str(), "How often?", None).await,
        Err(RetrievalError::Generation(_))
    ));
    let summary = engine.summarize(id.as_str()).await.unwrap();
    assert!(summary.starts_with("Error generating summary: "));
    assert!(engine.describe(id.as_str()).await.unwrap().processed);
}

#[tokio::test]
async fn test_named_template_is_used() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::replying("Keep elbows tucked.");
    let engine = hashing_engine(dir.path(), generator.clone()).await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document("curl.txt", "Curl with a slow tempo."))
        .await
        .unwrap();

    engine
        .answer(id.as_str(), "Form tips?", Some("bicep_curl"))
        .await
        .unwrap();
    assert!(generator.last_prompt().contains("bicep curls"));

    assert!(matches!(
        engine.answer(id.as_str(), "Form tips?", Some("yoga")).await,
        Err(RetrievalError::Template(_))
    ));
}

#[tokio::test]
async fn test_concurrent_ingest_is_rejected() {
    let dir = TempDir::new().unwrap();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = GatedProvider {
        inner: HashingProvider::new(64),
        started: started.clone(),
        release: release.clone(),
    };
    let engine = Arc::new(
        engine_with(
            dir.path(),
            Arc::new(provider),
            ScriptedGenerator::replying("ok"),
        )
        .await,
    );
    let id = engine.create_session().await.unwrap();

    let first = tokio::spawn({
        let engine = engine.clone();
        let id = id.clone();
        async move {
            engine
                .ingest(id.as_str(), text_document("a.txt", "Hip hinge drills."))
                .await
        }
    });
    started.notified().await;

    let second = engine
        .ingest(id.as_str(), text_document("b.txt", "Plank holds."))
        .await;
    assert!(matches!(second, Err(RetrievalError::SessionBusy(_))));

    release.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.filename, "a.txt");
    assert_eq!(
        engine.store().state(&id).await.unwrap(),
        SessionState::Ready
    );
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document("a.txt", "Shoulder pendulums."))
        .await
        .unwrap();

    engine.delete_session(id.as_str()).await.unwrap();
    engine.delete_session(id.as_str()).await.unwrap();

    assert!(!dir.path().join(id.as_str()).exists());
    assert!(!engine.describe(id.as_str()).await.unwrap().exists);
    assert!(matches!(
        engine.answer(id.as_str(), "?", None).await,
        Err(RetrievalError::SessionNotFound(_))
    ));
    assert!(engine.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_reloads_after_restart_with_identical_results() {
    let dir = TempDir::new().unwrap();
    let first = paragraph("Apply ice to the swollen knee for fifteen minutes. ");
    let second = paragraph("Strengthen the hamstrings with slow bridges. ");
    let question = "What should I do for a swollen knee?";

    let (id, before) = {
        let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;
        let id = engine.create_session().await.unwrap();
        engine
            .ingest(
                id.as_str(),
                text_document("knee.txt", &format!("{first}\n\n{second}")),
            )
            .await
            .unwrap();
        let hits = engine.retrieve(id.as_str(), question).await.unwrap();
        (id, hits)
    };

    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;
    assert_eq!(engine.list_sessions().await.unwrap(), vec![id.clone()]);

    let info = engine.describe(id.as_str()).await.unwrap();
    assert_eq!(info.filename.as_deref(), Some("knee.txt"));
    assert_eq!(info.document_chunks, 2);
    assert_eq!(info.document_summary.as_deref(), Some("ok"));
    assert!(engine.store().registry().is_empty().await);

    let after = engine.retrieve(id.as_str(), question).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(engine.store().registry().len().await, 1);
}

#[tokio::test]
async fn test_dimension_change_reports_corrupt_index() {
    let dir = TempDir::new().unwrap();
    let id = {
        let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;
        let id = engine.create_session().await.unwrap();
        engine
            .ingest(id.as_str(), text_document("a.txt", "Thoracic rotations."))
            .await
            .unwrap();
        id
    };

    let engine = engine_with(
        dir.path(),
        Arc::new(HashingProvider::new(64)),
        ScriptedGenerator::replying("ok"),
    )
    .await;

    assert!(matches!(
        engine.answer(id.as_str(), "?", None).await,
        Err(RetrievalError::Index(docchat_embeddings::IndexError::Corrupt { .. }))
    ));
    let info = engine.describe(id.as_str()).await.unwrap();
    assert!(info.exists);
    assert!(info.document_uploaded);
    assert!(!info.processed);
    assert_eq!(info.document_summary, None);
}

#[tokio::test]
async fn test_failed_reingest_keeps_previous_index() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FlakyProvider {
        inner: HashingProvider::new(64),
        fail: AtomicBool::new(false),
    });
    let engine = engine_with(
        dir.path(),
        provider.clone(),
        ScriptedGenerator::replying("ok"),
    )
    .await;
    let id = engine.create_session().await.unwrap();
    engine
        .ingest(id.as_str(), text_document("first.txt", "Ankle alphabet."))
        .await
        .unwrap();

    provider.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        engine
            .ingest(id.as_str(), text_document("second.txt", "Step downs."))
            .await,
        Err(RetrievalError::Embedding(_))
    ));

    let hits = engine.retrieve(id.as_str(), "ankle").await.unwrap();
    assert_eq!(hits[0].chunk.text, "Ankle alphabet.");
    let info = engine.describe(id.as_str()).await.unwrap();
    assert_eq!(info.filename.as_deref(), Some("first.txt"));

    provider.fail.store(false, Ordering::SeqCst);
    engine
        .ingest(id.as_str(), text_document("second.txt", "Step downs."))
        .await
        .unwrap();
    let hits = engine.retrieve(id.as_str(), "step").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.text, "Step downs.");
}

#[tokio::test]
async fn test_failed_index_write_keeps_record_with_its_index() {
    let dir = TempDir::new().unwrap();
    let id = seeded_session(dir.path(), "first.txt", "Ankle alphabet.").await;
    let engine = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;

    // A directory where the index's temp file goes makes the save fail.
    let session_dir = dir.path().join(id.as_str());
    std::fs::create_dir(session_dir.join("index.json.tmp")).unwrap();
    assert!(matches!(
        engine
            .ingest(
                id.as_str(),
                text_document("second.txt", "Step downs on a low box."),
            )
            .await,
        Err(RetrievalError::Index(_))
    ));

    assert_eq!(
        std::fs::read_to_string(session_dir.join("document.txt")).unwrap(),
        "Ankle alphabet."
    );
    assert!(!session_dir.join("document.txt.staged").exists());

    let hits = engine.retrieve(id.as_str(), "ankle").await.unwrap();
    assert_eq!(hits[0].chunk.text, "Ankle alphabet.");
    assert_eq!(
        engine.describe(id.as_str()).await.unwrap().filename.as_deref(),
        Some("first.txt")
    );

    // After a restart the record still matches the chunks it is stored with.
    let restarted = hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await;
    let info = restarted.describe(id.as_str()).await.unwrap();
    assert_eq!(info.filename.as_deref(), Some("first.txt"));
    let hits = restarted.retrieve(id.as_str(), "ankle").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.text, "Ankle alphabet.");
}

#[tokio::test]
async fn test_cancelled_reingest_publishes_what_it_stored() {
    let dir = TempDir::new().unwrap();
    let id = seeded_session(dir.path(), "first.txt", "Ankle alphabet.").await;
    let engine = Arc::new(hashing_engine(dir.path(), ScriptedGenerator::replying("ok")).await);
    assert_eq!(engine.retrieve(id.as_str(), "ankle").await.unwrap().len(), 1);

    let text: String = (0..3000)
        .map(|i| format!("Step downs on a low box, set {i}.\n\n"))
        .collect();
    let reingest = tokio::spawn({
        let engine = engine.clone();
        let id = id.clone();
        async move {
            engine
                .ingest(id.as_str(), text_document("second.txt", &text))
                .await
        }
    });

    // Drop the ingest as soon as its index is visible on disk.
    let deadline = Instant::now() + Duration::from_secs(30);
    while stored_filename(dir.path(), &id).await.as_deref() != Some("second.txt") {
        assert!(Instant::now() < deadline, "re-ingest never reached disk");
        sleep(Duration::from_millis(1)).await;
    }
    reingest.abort();
    let _ = reingest.await;

    // The process must converge on the stored document, not keep the old one.
    loop {
        let hits = engine.retrieve(id.as_str(), "step downs").await.unwrap();
        if hits[0].chunk.text.contains("Step downs") {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "served index never caught up with the stored one"
        );
        sleep(Duration::from_millis(5)).await;
    }
    let info = engine.describe(id.as_str()).await.unwrap();
    assert_eq!(info.filename.as_deref(), Some("second.txt"));
    assert!(info.document_chunks > 1);
}

#[tokio::test]
async fn test_answers_during_reingest_see_previous_document() {
    let dir = TempDir::new().unwrap();
    let id = seeded_session(dir.path(), "first.txt", "Ankle alphabet.").await;
    let generator = ScriptedGenerator::replying("ok");
    let (engine, started, release) = gated_engine(dir.path(), generator.clone()).await;

    let reingest = tokio::spawn({
        let engine = engine.clone();
        let id = id.clone();
        async move {
            engine
                .ingest(id.as_str(), text_document("second.txt", "Step downs."))
                .await
        }
    });
    started.notified().await;

    engine
        .answer(id.as_str(), "Which exercise?", None)
        .await
        .unwrap();
    assert!(generator.last_prompt().contains("Section 1:\nAnkle alphabet.\n"));
    let hits = engine.retrieve(id.as_str(), "step").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.text, "Ankle alphabet.");

    release.notify_one();
    reingest.await.unwrap().unwrap();

    engine
        .answer(id.as_str(), "Which exercise?", None)
        .await
        .unwrap();
    assert!(generator.last_prompt().contains("Section 1:\nStep downs.\n"));
    assert!(!generator.last_prompt().contains("Ankle alphabet."));
}

#[tokio::test]
async fn test_ingest_on_one_session_does_not_block_another() {
    let dir = TempDir::new().unwrap();
    let busy = seeded_session(dir.path(), "a.txt", "Ankle alphabet.").await;
    let other = seeded_session(dir.path(), "b.txt", "Wall sits.").await;
    let generator = ScriptedGenerator::replying("Hold for thirty seconds.");
    let (engine, started, release) = gated_engine(dir.path(), generator).await;

    let reingest = tokio::spawn({
        let engine = engine.clone();
        let busy = busy.clone();
        async move {
            engine
                .ingest(busy.as_str(), text_document("c.txt", "Calf raises."))
                .await
        }
    });
    started.notified().await;

    let answer = timeout(
        Duration::from_secs(5),
        engine.answer(other.as_str(), "How long?", None),
    )
    .await
    .expect("answer on another session waited for the ingest")
    .unwrap();
    assert_eq!(answer, "Hold for thirty seconds.");

    let info = timeout(Duration::from_secs(5), engine.describe(other.as_str()))
        .await
        .expect("describe on another session waited for the ingest")
        .unwrap();
    assert!(info.ready_for_chat);
    assert!(
        timeout(Duration::from_secs(5), engine.create_session())
            .await
            .expect("create waited for the ingest")
            .is_ok()
    );

    release.notify_one();
    assert_eq!(reingest.await.unwrap().unwrap().filename, "c.txt");
}
