//! Session storage and the in-process session registry.
//!
//! Each session owns one directory under the sessions root:
//!
//! ```text
//! <sessions_dir>/<session id>/
//!     index.json       persisted VectorIndex<DocumentChunk>, DocumentRecord as metadata
//!     document.<ext>   raw upload
//! ```
//!
//! `index.json` is the commit point of an ingest: it is renamed into place in
//! one step and carries the record of the document it was built from. The raw
//! upload is staged beside it first and moved into place after the commit.
//!
//! The directory is the source of truth; the registry only caches the
//! published [`SessionEngine`] of each session and serializes ingests.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use docchat_documents::{DocumentChunk, DocumentKind, TextSplitter, extract_text};
use docchat_embeddings::{Embedder, SearchHit, VectorIndex};

use crate::error::{Result, RetrievalError};

const DOCUMENT_STEM: &str = "document";
const INDEX_FILE: &str = "index.json";
const STAGED_SUFFIX: &str = "staged";
const DOCUMENT_KINDS: [DocumentKind; 2] = [DocumentKind::Pdf, DocumentKind::Text];

/// Opaque session identifier, a UUID in canonical hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Validate an identifier supplied by a caller.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|_| RetrievalError::InvalidSessionId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session is in its lifecycle, as recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session directory.
    Unknown,
    /// Created, nothing uploaded.
    Empty,
    /// A document is stored but has no index.
    Uploaded,
    /// A persisted index exists.
    Ready,
}

impl SessionState {
    /// Derive the state of the session stored in `dir`.
    pub async fn probe(dir: &Path) -> Result<Self> {
        if !fs::try_exists(dir).await? {
            return Ok(Self::Unknown);
        }
        if fs::try_exists(dir.join(INDEX_FILE)).await? {
            return Ok(Self::Ready);
        }
        for kind in DOCUMENT_KINDS {
            if fs::try_exists(document_path(dir, kind)).await? {
                return Ok(Self::Uploaded);
            }
        }
        Ok(Self::Empty)
    }

    /// Whether a document has been stored.
    pub fn has_document(self) -> bool {
        matches!(self, Self::Uploaded | Self::Ready)
    }
}

/// An uploaded document awaiting ingest.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Wrap uploaded bytes, detecting the kind from the file name.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let filename = filename.into();
        let kind = DocumentKind::from_filename(&filename)?;
        Ok(Self {
            filename,
            kind,
            bytes,
        })
    }
}

/// What was indexed: stored as the metadata of the session's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub kind: DocumentKind,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub embedding_model: String,
    pub dimension: usize,
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub session_id: SessionId,
    pub filename: String,
    pub chunk_count: usize,
}

/// Read-only snapshot of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub exists: bool,
    pub document_uploaded: bool,
    pub processed: bool,
    pub ready_for_chat: bool,
    pub document_chunks: usize,
    pub filename: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub document_summary: Option<String>,
}

impl SessionInfo {
    fn missing(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            exists: false,
            document_uploaded: false,
            processed: false,
            ready_for_chat: false,
            document_chunks: 0,
            filename: None,
            uploaded_at: None,
            document_summary: None,
        }
    }
}

/// The searchable state of one session: its index and document metadata.
#[derive(Debug)]
pub struct SessionEngine {
    session_id: SessionId,
    index: VectorIndex<DocumentChunk>,
    record: Option<DocumentRecord>,
}

impl SessionEngine {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The document metadata, if the index carries a readable record.
    pub fn record(&self) -> Option<&DocumentRecord> {
        self.record.as_ref()
    }

    /// Number of indexed chunks.
    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    /// Chunks in document order.
    pub fn chunks(&self) -> &[DocumentChunk] {
        self.index.chunks()
    }

    /// The `k` chunks most similar to an embedded question.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_, DocumentChunk>>> {
        Ok(self.index.search(query, k)?)
    }
}

/// Per-session coordination state.
#[derive(Debug, Default)]
struct SessionSlot {
    /// Held for the whole of an ingest or delete.
    ingest: Arc<Mutex<()>>,
    /// The engine readers use; replaced wholesale on re-ingest.
    engine: RwLock<Option<Arc<SessionEngine>>>,
}

/// Process-wide map from session id to its slot.
///
/// The map lock is held only to look up or insert a slot, never across I/O.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    async fn get(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    async fn slot(&self, id: &SessionId) -> Arc<SessionSlot> {
        if let Some(slot) = self.get(id).await {
            return slot;
        }
        Arc::clone(self.slots.write().await.entry(id.clone()).or_default())
    }

    async fn evict(&self, id: &SessionId) {
        self.slots.write().await.remove(id);
    }

    /// Number of sessions with cached state.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

/// Durable session storage plus the registry of loaded sessions.
pub struct SessionStore {
    root: PathBuf,
    embedder: Embedder,
    splitter: TextSplitter,
    registry: SessionRegistry,
}

impl SessionStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub async fn open(
        root: impl Into<PathBuf>,
        embedder: Embedder,
        splitter: TextSplitter,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Session store opened at {}", root.display());
        Ok(Self {
            root,
            embedder,
            splitter,
            registry: SessionRegistry::default(),
        })
    }

    /// The embedder used for documents and questions.
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create a new, empty session.
    pub async fn create(&self) -> Result<SessionId> {
        let id = SessionId::generate();
        fs::create_dir(self.session_dir(&id)).await?;
        info!("Created session {id}");
        Ok(id)
    }

    /// Every stored session, sorted by id.
    pub async fn list(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| SessionId::parse(n).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Lifecycle state of a session.
    pub async fn state(&self, id: &SessionId) -> Result<SessionState> {
        SessionState::probe(&self.session_dir(id)).await
    }

    /// Store, chunk, embed and index a document, replacing any previous one.
    ///
    /// Everything is computed in memory before the first write, so a failed
    /// extraction or embedding leaves the session exactly as it was. The new
    /// engine is published only once the index file is in place, and a caller
    /// dropping this future after the first write does not stop the publish.
    pub async fn ingest(&self, id: &SessionId, document: Document) -> Result<IngestReport> {
        if self.state(id).await? == SessionState::Unknown {
            return Err(RetrievalError::SessionNotFound(id.to_string()));
        }

        let slot = self.registry.slot(id).await;
        let guard = Arc::clone(&slot.ingest)
            .try_lock_owned()
            .map_err(|_| RetrievalError::SessionBusy(id.to_string()))?;

        // A delete may have finished between the probe and the lock.
        let dir = self.session_dir(id);
        if SessionState::probe(&dir).await? == SessionState::Unknown {
            return Err(RetrievalError::SessionNotFound(id.to_string()));
        }

        info!(
            "Ingesting {} ({} bytes) into session {id}",
            document.filename,
            document.bytes.len()
        );

        let (text, document) = tokio::task::spawn_blocking(move || {
            let text = extract_text(&document.bytes, document.kind);
            (text, document)
        })
        .await
        .map_err(std::io::Error::other)?;
        let text = text?;

        let chunks = self.splitter.split(id.as_str(), &text);
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyDocument(document.filename));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let index = VectorIndex::build(chunks, vectors, self.embedder.model())?;
        debug!("Built index of {} chunks for session {id}", index.len());

        let record = DocumentRecord {
            filename: document.filename.clone(),
            kind: document.kind,
            size_bytes: document.bytes.len() as u64,
            uploaded_at: Utc::now(),
            chunk_count: index.len(),
            embedding_model: index.model().to_string(),
            dimension: index.dimension(),
        };
        let index = index.with_metadata(serde_json::to_value(&record)?);

        let commit = Commit {
            id: id.clone(),
            dir,
            slot,
            document,
            index,
            record,
        };
        tokio::spawn(commit.run(guard))
            .await
            .map_err(std::io::Error::other)?
    }

    /// The session's engine, loading the persisted index on first use.
    ///
    /// Returns `Ok(None)` while the session has no index and
    /// [`RetrievalError::SessionNotFound`] when the session does not exist.
    pub async fn get_engine(&self, id: &SessionId) -> Result<Option<Arc<SessionEngine>>> {
        if let Some(slot) = self.registry.get(id).await {
            if let Some(engine) = slot.engine.read().await.as_ref() {
                return Ok(Some(Arc::clone(engine)));
            }
        }

        let dir = self.session_dir(id);
        match SessionState::probe(&dir).await? {
            SessionState::Unknown => return Err(RetrievalError::SessionNotFound(id.to_string())),
            SessionState::Empty | SessionState::Uploaded => return Ok(None),
            SessionState::Ready => {}
        }

        let slot = self.registry.slot(id).await;
        let mut published = slot.engine.write().await;
        // Another reader or an ingest may have published while we waited.
        if let Some(engine) = published.as_ref() {
            return Ok(Some(Arc::clone(engine)));
        }

        let engine = Arc::new(self.load_engine(id, &dir).await?);
        info!(
            "Loaded session {id} from disk with {} chunks",
            engine.chunk_count()
        );
        *published = Some(Arc::clone(&engine));
        Ok(Some(engine))
    }

    async fn load_engine(&self, id: &SessionId, dir: &Path) -> Result<SessionEngine> {
        let index_path = dir.join(INDEX_FILE);
        let dimension = self.embedder.dimension();
        let index = tokio::task::spawn_blocking(move || {
            VectorIndex::<DocumentChunk>::load(&index_path, dimension)
        })
        .await
        .map_err(std::io::Error::other)??;

        let record = match index.metadata() {
            Value::Null => None,
            metadata => match serde_json::from_value(metadata.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Ignoring unreadable document record for session {id}: {e}");
                    None
                }
            },
        };

        Ok(SessionEngine {
            session_id: id.clone(),
            index,
            record,
        })
    }

    /// Remove a session and everything stored for it.
    ///
    /// Waits for an in-flight ingest of the same session. Deleting a session
    /// that does not exist succeeds.
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        let slot = self.registry.slot(id).await;
        let _guard = slot.ingest.lock().await;

        match fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => info!("Deleted session {id}"),
            Err(e) if e.kind() == ErrorKind::NotFound => debug!("Session {id} already absent"),
            Err(e) => return Err(e.into()),
        }

        *slot.engine.write().await = None;
        self.registry.evict(id).await;
        Ok(())
    }

    /// Describe a session without loading it into the registry.
    ///
    /// A persisted index that cannot be read is reported as not processed.
    pub async fn describe(&self, id: &SessionId) -> Result<SessionInfo> {
        self.inspect(id).await.map(|(info, _)| info)
    }

    /// Like [`SessionStore::describe`], also returning the engine the
    /// description was taken from. An engine read from disk here is not
    /// published.
    pub async fn inspect(
        &self,
        id: &SessionId,
    ) -> Result<(SessionInfo, Option<Arc<SessionEngine>>)> {
        let published = match self.registry.get(id).await {
            Some(slot) => slot.engine.read().await.clone(),
            None => None,
        };
        if let Some(engine) = published {
            return Ok((Self::info_from_engine(id, &engine), Some(engine)));
        }

        let dir = self.session_dir(id);
        let state = SessionState::probe(&dir).await?;
        if state == SessionState::Unknown {
            return Ok((SessionInfo::missing(id.as_str()), None));
        }

        let info = SessionInfo {
            exists: true,
            document_uploaded: state.has_document(),
            ..SessionInfo::missing(id.as_str())
        };
        if state != SessionState::Ready {
            return Ok((info, None));
        }

        match self.load_engine(id, &dir).await {
            Ok(engine) => Ok((Self::info_from_engine(id, &engine), Some(Arc::new(engine)))),
            Err(e) => {
                warn!("Session {id} has an unusable index: {e}");
                Ok((info, None))
            }
        }
    }

    fn info_from_engine(id: &SessionId, engine: &SessionEngine) -> SessionInfo {
        SessionInfo {
            exists: true,
            document_uploaded: true,
            processed: true,
            ready_for_chat: true,
            document_chunks: engine.chunk_count(),
            filename: engine.record().map(|r| r.filename.clone()),
            uploaded_at: engine.record().map(|r| r.uploaded_at),
            ..SessionInfo::missing(id.as_str())
        }
    }
}

/// The persist-then-publish tail of an ingest, run as its own task.
struct Commit {
    id: SessionId,
    dir: PathBuf,
    slot: Arc<SessionSlot>,
    document: Document,
    index: VectorIndex<DocumentChunk>,
    record: DocumentRecord,
}

impl Commit {
    async fn run(self, _guard: OwnedMutexGuard<()>) -> Result<IngestReport> {
        let Self {
            id,
            dir,
            slot,
            document,
            index,
            record,
        } = self;

        let target = document_path(&dir, document.kind);
        let mut staged = target.clone().into_os_string();
        staged.push(format!(".{STAGED_SUFFIX}"));
        let staged = PathBuf::from(staged);
        fs::write(&staged, &document.bytes).await?;

        let index_path = dir.join(INDEX_FILE);
        let saved = tokio::task::spawn_blocking(move || index.save(&index_path).map(|()| index))
            .await
            .map_err(std::io::Error::other);
        let index = match saved {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                discard(&staged).await;
                return Err(e.into());
            }
            Err(e) => {
                discard(&staged).await;
                return Err(e.into());
            }
        };

        let report = IngestReport {
            session_id: id.clone(),
            filename: record.filename.clone(),
            chunk_count: index.len(),
        };
        let engine = SessionEngine {
            session_id: id.clone(),
            index,
            record: Some(record),
        };
        *slot.engine.write().await = Some(Arc::new(engine));
        info!(
            "Session {id} ready with {} chunks from {}",
            report.chunk_count, report.filename
        );

        if let Err(e) = place_document(&dir, &staged, &target, document.kind).await {
            warn!("Session {id} is indexed but its raw document was not stored: {e}");
        }
        Ok(report)
    }
}

fn document_path(dir: &Path, kind: DocumentKind) -> PathBuf {
    dir.join(format!("{DOCUMENT_STEM}.{}", kind.extension()))
}

/// Move a staged upload into place and drop documents of the other kinds.
async fn place_document(dir: &Path, staged: &Path, target: &Path, kind: DocumentKind) -> Result<()> {
    fs::rename(staged, target).await?;
    for stale in DOCUMENT_KINDS {
        if stale != kind {
            remove_if_exists(&document_path(dir, stale)).await?;
        }
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        warn!("Failed to remove {}: {e}", path.display());
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
