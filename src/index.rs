//! Index build and load.
//!
//! [`ensure_index`] returns the index for a location, loading it from disk
//! when a compatible one exists and building it otherwise:
//!
//! ```text
//! index.path/index.sqlite exists?
//!   yes → read manifest → compatible? → load rows into InMemoryVectorStore
//!                                  no → IndexIncompatible
//!   no  → create_dir(index.path + ".building")   (AlreadyExists → IndexBusy)
//!         load corpus → chunk → embed in batches → write sqlite in staging
//!         rename staging → index.path
//! ```
//!
//! The staging directory doubles as the build claim: `create_dir` either
//! creates it or fails, so only one builder (in any process) proceeds per
//! location. Readers never see a half-written index because the finished
//! directory appears by rename. Within one process, [`IndexGate`] makes
//! concurrent first callers share a single build.
//!
//! The claim records its owner (`pid` and start time) in `owner.json`. A
//! process killed mid-build leaves the marker behind; the next builder
//! reclaims it when the owner is no longer running or the marker is older
//! than `stale_after`.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use tutor_rag_core::chunk::{self, ChunkParams};
use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::error::RagError;
use tutor_rag_core::models::{Document, IndexEntry, IndexManifest, INDEX_FORMAT_VERSION};
use tutor_rag_core::store::{InMemoryVectorStore, VectorStore};

use crate::config::{Config, CorpusConfig};
use crate::corpus;
use crate::db;
use crate::upstream::{self, Upstream, UpstreamPolicy};

/// Everything needed to build or load one index location.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub path: PathBuf,
    pub chunk_params: ChunkParams,
    pub batch_size: usize,
    pub embedding_policy: UpstreamPolicy,
    /// Discard any existing index (and stale build marker) and build anew.
    pub rebuild: bool,
    /// Build markers older than this are treated as abandoned.
    pub stale_after: Duration,
}

impl IndexSettings {
    pub fn from_config(config: &Config, rebuild: bool) -> Result<Self> {
        Ok(Self {
            path: config.index.path.clone(),
            chunk_params: config.chunking.params()?,
            batch_size: config.embedding.batch_size.max(1),
            embedding_policy: UpstreamPolicy::for_embedding(&config.embedding),
            rebuild,
            stale_after: Duration::from_secs(config.index.stale_build_secs),
        })
    }

    /// The manifest an index built with these settings and `embedder` carries.
    pub fn expected_manifest(&self, embedder: &dyn EmbeddingProvider) -> IndexManifest {
        IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            chunk_size: self.chunk_params.chunk_size(),
            chunk_overlap: self.chunk_params.chunk_overlap(),
            document_count: 0,
            chunk_count: 0,
            built_at: Utc::now(),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.path.join(db::DB_FILE)
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.as_os_str().to_owned();
        staging.push(".building");
        PathBuf::from(staging)
    }
}

/// A built or loaded index, immutable and shared behind an `Arc`.
#[derive(Debug)]
pub struct LoadedIndex {
    manifest: IndexManifest,
    store: InMemoryVectorStore,
}

impl LoadedIndex {
    pub fn new(manifest: IndexManifest, store: InMemoryVectorStore) -> Self {
        Self { manifest, store }
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn store(&self) -> &InMemoryVectorStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Load the index at `settings.path`, building it from `corpus` first when
/// there is none (or when `settings.rebuild` is set).
pub async fn ensure_index(
    settings: &IndexSettings,
    corpus: &CorpusConfig,
    embedder: &dyn EmbeddingProvider,
) -> Result<Arc<LoadedIndex>, RagError> {
    if settings.rebuild {
        clear_location(settings)?;
    } else if settings.db_path().exists() {
        return load_index(settings, embedder).await.map(Arc::new);
    }

    let staging = claim_staging(settings)?;

    // Another process may have finished between our existence check and
    // the claim.
    if settings.db_path().exists() {
        drop(staging);
        return load_index(settings, embedder).await.map(Arc::new);
    }

    let documents = corpus::load_documents(corpus).map_err(RagError::storage)?;
    if documents.is_empty() {
        return Err(RagError::EmptyCorpus {
            dir: corpus.dir.clone(),
        });
    }

    let index = build_index(settings, &documents, embedder).await?;
    persist(settings, staging, &index).await?;
    Ok(Arc::new(index))
}

/// Chunk and embed `documents` into a fresh in-memory index.
pub async fn build_index(
    settings: &IndexSettings,
    documents: &[Document],
    embedder: &dyn EmbeddingProvider,
) -> Result<LoadedIndex, RagError> {
    let chunks = chunk::split_all(documents, &settings.chunk_params);
    info!(
        documents = documents.len(),
        chunks = chunks.len(),
        model = embedder.model_name(),
        "building index"
    );

    let dims = embedder.dims();
    let mut store = InMemoryVectorStore::new();

    for batch in chunks.chunks(settings.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = upstream::call(
            "embed chunks",
            Upstream::Embedding,
            &settings.embedding_policy,
            || embedder.embed(&texts),
        )
        .await?;

        if vectors.len() != batch.len() {
            return Err(RagError::RetrievalFailure(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        for (chunk, embedding) in batch.iter().zip(vectors) {
            if embedding.len() != dims {
                return Err(RagError::IndexIncompatible(format!(
                    "embedding model '{}' returned {} dims, expected {}",
                    embedder.model_name(),
                    embedding.len(),
                    dims
                )));
            }
            store
                .upsert(IndexEntry {
                    chunk: chunk.clone(),
                    embedding,
                })
                .await?;
        }
    }

    let manifest = IndexManifest {
        document_count: documents.len(),
        chunk_count: store.len(),
        ..settings.expected_manifest(embedder)
    };
    Ok(LoadedIndex::new(manifest, store))
}

async fn load_index(
    settings: &IndexSettings,
    embedder: &dyn EmbeddingProvider,
) -> Result<LoadedIndex, RagError> {
    let pool = db::connect(&settings.db_path(), false)
        .await
        .map_err(RagError::storage)?;

    let manifest = db::read_manifest(&pool)
        .await
        .map_err(RagError::storage)?
        .ok_or_else(|| {
            RagError::IndexIncompatible(format!(
                "index at {} has no manifest; run `tutor index --rebuild`",
                settings.path.display()
            ))
        })?;

    let diffs = manifest.incompatibilities(&settings.expected_manifest(embedder));
    if !diffs.is_empty() {
        pool.close().await;
        return Err(RagError::IndexIncompatible(format!(
            "index at {} was built differently ({}); run `tutor index --rebuild`",
            settings.path.display(),
            diffs.join("; ")
        )));
    }

    let entries = db::load_entries(&pool).await.map_err(RagError::storage)?;
    pool.close().await;

    let mut store = InMemoryVectorStore::new();
    for entry in entries {
        store.upsert(entry).await?;
    }

    info!(
        path = %settings.path.display(),
        chunks = store.len(),
        model = %manifest.embedding_model,
        "loaded index"
    );
    Ok(LoadedIndex::new(manifest, store))
}

async fn persist(
    settings: &IndexSettings,
    mut staging: StagingDir,
    index: &LoadedIndex,
) -> Result<(), RagError> {
    let db_path = staging.path().join(db::DB_FILE);
    let pool = db::connect(&db_path, true)
        .await
        .map_err(RagError::storage)?;
    db::run_migrations(&pool).await.map_err(RagError::storage)?;
    db::write_manifest(&pool, index.manifest())
        .await
        .map_err(RagError::storage)?;
    db::insert_entries(&pool, index.store().entries())
        .await
        .map_err(RagError::storage)?;
    pool.close().await;
    let _ = std::fs::remove_file(staging.path().join(OWNER_FILE));

    // An empty leftover directory is replaced; anything else makes the
    // rename fail rather than deleting user files.
    if settings.path.is_dir() {
        let _ = std::fs::remove_dir(&settings.path);
    }
    std::fs::rename(staging.path(), &settings.path).map_err(|e| {
        RagError::Storage(format!(
            "failed to move {} into place: {}",
            staging.path().display(),
            e
        ))
    })?;
    staging.disarm();

    info!(
        path = %settings.path.display(),
        chunks = index.len(),
        "index persisted"
    );
    Ok(())
}

fn clear_location(settings: &IndexSettings) -> Result<(), RagError> {
    for path in [settings.staging_path(), settings.path.clone()] {
        if path.exists() {
            warn!(path = %path.display(), "removing existing index for rebuild");
            std::fs::remove_dir_all(&path).map_err(RagError::storage)?;
        }
    }
    Ok(())
}

fn claim_staging(settings: &IndexSettings) -> Result<StagingDir, RagError> {
    let staging = settings.staging_path();
    if let Some(parent) = staging.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(RagError::storage)?;
    }

    match try_claim(&staging)? {
        Some(claimed) => return Ok(claimed),
        None if !is_abandoned(&staging, settings.stale_after) => {
            return Err(RagError::IndexBusy {
                path: settings.path.clone(),
            })
        }
        None => {}
    }

    warn!(path = %staging.display(), "reclaiming abandoned index build");
    // Move the stale marker aside first so two reclaimers cannot both
    // delete a fresh claim.
    let mut aside = staging.as_os_str().to_owned();
    aside.push(format!(".stale-{}", std::process::id()));
    let aside = PathBuf::from(aside);
    match std::fs::rename(&staging, &aside) {
        Ok(()) => {
            let _ = std::fs::remove_dir_all(&aside);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(RagError::storage(e)),
    }

    try_claim(&staging)?.ok_or_else(|| RagError::IndexBusy {
        path: settings.path.clone(),
    })
}

/// `Ok(None)` when someone else holds the marker.
fn try_claim(staging: &Path) -> Result<Option<StagingDir>, RagError> {
    match std::fs::create_dir(staging) {
        Ok(()) => {
            let claimed = StagingDir::new(staging.to_path_buf());
            let owner = BuildOwner {
                pid: std::process::id(),
                started_at: Utc::now(),
            };
            let json = serde_json::to_string(&owner).map_err(RagError::storage)?;
            std::fs::write(staging.join(OWNER_FILE), json).map_err(RagError::storage)?;
            Ok(Some(claimed))
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(RagError::storage(e)),
    }
}

const OWNER_FILE: &str = "owner.json";

/// Contents of `owner.json` in a build marker.
#[derive(Debug, Serialize, Deserialize)]
struct BuildOwner {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Whether the marker at `staging` was left by a build that is no longer
/// running.
fn is_abandoned(staging: &Path, stale_after: Duration) -> bool {
    let owner = std::fs::read_to_string(staging.join(OWNER_FILE))
        .ok()
        .and_then(|raw| serde_json::from_str::<BuildOwner>(&raw).ok());

    let age = match &owner {
        Some(owner) => (Utc::now() - owner.started_at).to_std().unwrap_or_default(),
        // No readable owner: the claimant died before writing it, or is
        // about to. Fall back to the directory's age.
        None => std::fs::metadata(staging)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .unwrap_or_default(),
    };
    if age > stale_after {
        return true;
    }

    match owner {
        Some(owner) if owner.pid != std::process::id() => !process_running(owner.pid),
        _ => false,
    }
}

#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without a cheap liveness check, only the age bound applies.
#[cfg(not(target_os = "linux"))]
fn process_running(_pid: u32) -> bool {
    true
}

/// The claimed `.building` directory; removed on drop unless the build
/// completed and it was renamed into place.
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

/// Shares one build per index location among concurrent callers in this
/// process.
#[derive(Default)]
pub struct IndexGate {
    cells: Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<LoadedIndex>>>>>,
}

impl IndexGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`ensure_index`], but at most one build or load runs per
    /// location; later callers get the same `Arc`. A failed attempt is not
    /// cached, so the next caller tries again.
    pub async fn get_or_init(
        &self,
        settings: &IndexSettings,
        corpus: &CorpusConfig,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Arc<LoadedIndex>, RagError> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(cells.entry(location_key(&settings.path)).or_default())
        };

        cell.get_or_try_init(|| ensure_index(settings, corpus, embedder))
            .await
            .map(Arc::clone)
    }
}

/// One key per directory however it is spelled (`index`, `./index`, or
/// absolute), whether or not it exists yet.
fn location_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(canonical) = parent.canonicalize() {
            return canonical.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tutor_rag_core::error::ProviderError;

    struct LengthEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0; self.dims];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    fn settings(dir: &Path) -> IndexSettings {
        IndexSettings {
            path: dir.join("index"),
            chunk_params: ChunkParams::new(40, 5).unwrap(),
            batch_size: 2,
            embedding_policy: UpstreamPolicy {
                timeout: Duration::from_secs(5),
                max_retries: 0,
                backoff: Duration::from_millis(1),
            },
            rebuild: false,
            stale_after: Duration::from_secs(3600),
        }
    }

    fn corpus(dir: &Path) -> CorpusConfig {
        let data = dir.join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(
            data.join("a.txt"),
            "Python is a programming language. It is easy to read and widely used.",
        )
        .unwrap();
        CorpusConfig {
            dir: data,
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
            seed_samples: false,
        }
    }

    #[tokio::test]
    async fn test_build_then_reload() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        let embedder = LengthEmbedder { dims: 3 };

        let built = ensure_index(&settings, &corpus, &embedder).await.unwrap();
        assert!(built.len() > 1);
        assert!(settings.db_path().exists());
        assert!(!settings.staging_path().exists());

        // Remove the corpus: a reload must not need it.
        std::fs::remove_dir_all(&corpus.dir).unwrap();
        let loaded = ensure_index(&settings, &corpus, &embedder).await.unwrap();
        assert_eq!(loaded.len(), built.len());
        assert_eq!(loaded.manifest().chunk_count, built.len());
    }

    #[tokio::test]
    async fn test_incompatible_model_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap();

        let err = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 4 })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexIncompatible(_)));
    }

    #[tokio::test]
    async fn test_empty_corpus() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = CorpusConfig {
            dir: tmp.path().join("empty"),
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
            seed_samples: false,
        };
        std::fs::create_dir_all(&corpus.dir).unwrap();
        let err = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyCorpus { .. }));
        // A failed build releases its claim.
        assert!(!settings.staging_path().exists());
    }

    #[tokio::test]
    async fn test_existing_staging_dir_is_busy() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        std::fs::create_dir_all(settings.staging_path()).unwrap();

        let err = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexBusy { .. }));
        assert!(err.to_string().contains("--rebuild"));
        // The other builder's marker is left alone.
        assert!(settings.staging_path().exists());
    }

    fn write_owner(settings: &IndexSettings, pid: u32, started_at: DateTime<Utc>) {
        std::fs::create_dir_all(settings.staging_path()).unwrap();
        let owner = serde_json::to_string(&BuildOwner { pid, started_at }).unwrap();
        std::fs::write(settings.staging_path().join(OWNER_FILE), owner).unwrap();
    }

    #[tokio::test]
    async fn test_live_owner_keeps_claim() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        write_owner(&settings, std::process::id(), Utc::now());

        let err = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexBusy { .. }));
        assert!(settings.staging_path().join(OWNER_FILE).exists());
    }

    #[tokio::test]
    async fn test_expired_marker_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        write_owner(
            &settings,
            std::process::id(),
            Utc::now() - chrono::Duration::hours(2),
        );

        let index = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap();
        assert!(index.len() > 1);
        assert!(!settings.staging_path().exists());
        // The owner record does not travel into the finished index.
        assert!(!settings.path.join(OWNER_FILE).exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_marker_of_exited_process_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        write_owner(&settings, pid, Utc::now());

        ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap();
        assert!(settings.db_path().exists());
        assert!(!settings.staging_path().exists());
    }

    #[tokio::test]
    async fn test_rebuild_clears_stale_marker_and_model() {
        let tmp = TempDir::new().unwrap();
        let mut settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        ensure_index(&settings, &corpus, &LengthEmbedder { dims: 3 })
            .await
            .unwrap();
        std::fs::create_dir_all(settings.staging_path()).unwrap();

        settings.rebuild = true;
        let rebuilt = ensure_index(&settings, &corpus, &LengthEmbedder { dims: 4 })
            .await
            .unwrap();
        assert_eq!(rebuilt.manifest().dims, 4);
        assert!(!settings.staging_path().exists());
    }

    #[tokio::test]
    async fn test_wrong_dims_from_provider() {
        struct Liar;
        #[async_trait]
        impl EmbeddingProvider for Liar {
            fn model_name(&self) -> &str {
                "liar"
            }
            fn dims(&self) -> usize {
                8
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
                Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
            }
        }

        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let docs = vec![Document::new("a.txt", "hello")];
        let err = build_index(&settings, &docs, &Liar).await.unwrap_err();
        assert!(matches!(err, RagError::IndexIncompatible(_)));
    }

    #[tokio::test]
    async fn test_gate_shares_one_index() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let corpus = corpus(tmp.path());
        let embedder = LengthEmbedder { dims: 3 };
        let gate = IndexGate::new();

        let (a, b) = tokio::join!(
            gate.get_or_init(&settings, &corpus, &embedder),
            gate.get_or_init(&settings, &corpus, &embedder)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn test_gate_key_ignores_path_spelling() {
        let tmp = TempDir::new().unwrap();
        let plain = settings(tmp.path());
        let mut dotted = plain.clone();
        dotted.path = tmp.path().join(".").join("index");
        let corpus = corpus(tmp.path());
        let embedder = LengthEmbedder { dims: 3 };
        let gate = IndexGate::new();

        let a = gate.get_or_init(&plain, &corpus, &embedder).await.unwrap();
        let b = gate.get_or_init(&dotted, &corpus, &embedder).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(location_key(&plain.path), location_key(&dotted.path));
    }
}
