//! Blob import, dedup, compression, chunk and index registration

use crate::chunker::TextChunker;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use themis_core::{keys, now_ms, Error, Result};
use themis_index::{Edge, GraphIndexManager};
use themis_storage::{Cf, KvEngine, WriteBatch};
use themis_vector::{VectorConfig, VectorIndexManager};

/// Vector namespace chunk embeddings are registered under.
pub const CHUNK_NAMESPACE: &str = "chunks";

/// Pipeline policy knobs.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// zstd level for compressible blobs.
    pub compression_level: i32,
    /// Mime prefixes that skip compression (already-compressed formats).
    pub skip_mimes: Vec<String>,
    /// Blobs at or below this size are stored raw.
    pub min_compress_size: usize,
    /// Default chunk size for text content, clamped to 64 KiB–16 MiB.
    pub chunk_size_bytes: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            compression_level: 3,
            skip_mimes: vec![
                "image/".to_string(),
                "video/".to_string(),
                "application/zip".to_string(),
                "application/gzip".to_string(),
            ],
            min_compress_size: 4096,
            chunk_size_bytes: 256 * 1024,
        }
    }
}

impl ContentConfig {
    /// Clamp the chunk size into its legal range.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size_bytes.clamp(64 * 1024, 16 * 1024 * 1024)
    }
}

/// Import request: what the blob is and how to slice it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSpec {
    /// Explicit content id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Pre-chunked content; when absent, text mimes get default
    /// chunking.
    #[serde(default)]
    pub chunks: Option<Vec<ChunkSpec>>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Import as a fresh id even when an identical blob exists.
    #[serde(default)]
    pub force_new_id: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub text: String,
    #[serde(default = "default_chunk_type")]
    pub chunk_type: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

fn default_chunk_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub edge_pk: String,
    pub from_pk: String,
    pub to_pk: String,
    #[serde(default)]
    pub weight: f64,
}

/// Persisted content metadata (`content:<id>:meta`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub id: String,
    pub mime_type: String,
    /// Uncompressed payload size.
    pub size: u64,
    pub sha256: String,
    pub compressed: bool,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: u64,
    pub chunk_count: usize,
    /// Graph edges created for this content, removed with it.
    #[serde(default)]
    pub edge_pks: Vec<String>,
}

/// Persisted chunk record (`chunk:<chunk id>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub content_id: String,
    pub seq_num: u32,
    pub chunk_type: String,
    pub text: String,
    pub has_embedding: bool,
}

/// Outcome of `import_content`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    pub id: String,
    /// True when an identical blob already existed and its id was
    /// returned instead of storing a copy.
    pub deduplicated: bool,
    pub chunk_count: usize,
}

/// The content pipeline.
pub struct ContentPipeline {
    engine: Arc<dyn KvEngine>,
    vectors: Arc<VectorIndexManager>,
    graph: Arc<GraphIndexManager>,
    config: ContentConfig,
}

impl ContentPipeline {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        vectors: Arc<VectorIndexManager>,
        graph: Arc<GraphIndexManager>,
        config: ContentConfig,
    ) -> Self {
        ContentPipeline {
            engine,
            vectors,
            graph,
            config,
        }
    }

    fn should_compress(&self, mime_type: &str, size: usize) -> bool {
        if size <= self.config.min_compress_size {
            return false;
        }
        !self
            .config
            .skip_mimes
            .iter()
            .any(|skip| mime_type.starts_with(skip.as_str()))
    }

    /// Import a blob. Identical payloads (by SHA-256) dedupe to the
    /// existing id unless the spec forces a fresh one.
    pub fn import_content(&self, spec: &ContentSpec, blob: &[u8]) -> Result<ImportResult> {
        if spec.mime_type.is_empty() {
            return Err(Error::InvalidArgument("mime_type must be set".to_string()));
        }

        let sha256 = hex_digest(blob);
        let hash_key = keys::content_hash(&sha256)?;
        if let Some(existing) = self.engine.get(Cf::Content, &hash_key)? {
            if !spec.force_new_id {
                let id = String::from_utf8_lossy(&existing).into_owned();
                let meta = self.get_content_meta(&id)?;
                tracing::debug!(id, sha256, "content deduplicated");
                return Ok(ImportResult {
                    id,
                    deduplicated: true,
                    chunk_count: meta.chunk_count,
                });
            }
        }

        let id = match &spec.id {
            Some(id) => {
                keys::validate_component("content id", id)?;
                id.clone()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        if self.engine.get(Cf::Content, &keys::content_meta(&id)?)?.is_some() {
            return Err(Error::InvalidArgument(format!(
                "content id {id} already exists"
            )));
        }

        // Compression decision and payload.
        let compress = self.should_compress(&spec.mime_type, blob.len());
        let stored: Vec<u8> = if compress {
            zstd::encode_all(blob, self.config.compression_level)
                .map_err(|e| Error::Unavailable(format!("zstd encode failed: {e}")))?
        } else {
            blob.to_vec()
        };

        // Chunking: explicit chunks win; text mimes get the default
        // chunker; everything else stores unchunked.
        let chunk_specs: Vec<ChunkSpec> = match &spec.chunks {
            Some(chunks) => chunks.clone(),
            None if spec.mime_type.starts_with("text/") => {
                let text = String::from_utf8_lossy(blob);
                TextChunker::new(self.config.effective_chunk_size())
                    .chunk(&text)
                    .into_iter()
                    .map(|text| ChunkSpec {
                        text,
                        chunk_type: "text".to_string(),
                        embedding: None,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let meta = ContentMeta {
            id: id.clone(),
            mime_type: spec.mime_type.clone(),
            size: blob.len() as u64,
            sha256: sha256.clone(),
            compressed: compress,
            title: spec.title.clone(),
            created_at: now_ms(),
            chunk_count: chunk_specs.len(),
            edge_pks: spec.edges.iter().map(|e| e.edge_pk.clone()).collect(),
        };

        let mut batch = WriteBatch::new();
        batch.put(Cf::Content, keys::content_meta(&id)?, serde_json::to_vec(&meta)?);
        batch.put(Cf::Content, keys::content_blob(&id)?, stored);
        batch.put(Cf::Content, hash_key, id.clone().into_bytes());

        let mut chunk_ids = Vec::with_capacity(chunk_specs.len());
        let mut embeddings: Vec<(String, Vec<f32>)> = Vec::new();
        for (seq, chunk) in chunk_specs.iter().enumerate() {
            let chunk_id = format!("{id}-{seq}");
            let record = ChunkRecord {
                chunk_id: chunk_id.clone(),
                content_id: id.clone(),
                seq_num: seq as u32,
                chunk_type: chunk.chunk_type.clone(),
                text: chunk.text.clone(),
                has_embedding: chunk.embedding.is_some(),
            };
            batch.put(Cf::Content, keys::chunk(&chunk_id)?, serde_json::to_vec(&record)?);
            if let Some(embedding) = &chunk.embedding {
                embeddings.push((chunk_id.clone(), embedding.clone()));
            }
            chunk_ids.push(chunk_id);
        }
        batch.put(
            Cf::Content,
            keys::content_chunks(&id)?,
            serde_json::to_vec(&chunk_ids)?,
        );
        self.engine.batch_write(batch)?;

        // Chunk embeddings land in the shared `chunks` namespace,
        // created on first use with the dimension of the first
        // embedding seen.
        if !embeddings.is_empty() {
            if !self.vectors.has_namespace(CHUNK_NAMESPACE) {
                self.vectors
                    .init(CHUNK_NAMESPACE, VectorConfig::new(embeddings[0].1.len()))?;
            }
            for (chunk_id, embedding) in embeddings {
                self.vectors.add(CHUNK_NAMESPACE, &chunk_id, embedding)?;
            }
        }

        for edge in &spec.edges {
            self.graph.add_edge(&Edge {
                edge_pk: edge.edge_pk.clone(),
                from_pk: edge.from_pk.clone(),
                to_pk: edge.to_pk.clone(),
                weight: edge.weight,
                fields: Default::default(),
            })?;
        }

        tracing::info!(
            id,
            mime = spec.mime_type,
            size = blob.len(),
            compressed = compress,
            chunks = chunk_ids.len(),
            "content imported"
        );
        Ok(ImportResult {
            id,
            deduplicated: false,
            chunk_count: chunk_ids.len(),
        })
    }

    /// Content metadata.
    pub fn get_content_meta(&self, id: &str) -> Result<ContentMeta> {
        match self.engine.get(Cf::Content, &keys::content_meta(id)?)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(Error::NotFound(format!("content:{id}"))),
        }
    }

    /// The blob, transparently decompressed. A compressed-flagged blob
    /// that fails to decode is returned raw with a warning; a wrong
    /// flag must not make the payload unreachable.
    pub fn get_content_blob(&self, id: &str) -> Result<Vec<u8>> {
        let meta = self.get_content_meta(id)?;
        let stored = self
            .engine
            .get(Cf::Content, &keys::content_blob(id)?)?
            .ok_or_else(|| Error::Corruption(format!("content:{id} has meta but no blob")))?;
        if !meta.compressed {
            return Ok(stored);
        }
        match zstd::decode_all(stored.as_slice()) {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                tracing::warn!(id, error = %e, "compressed blob failed to decode; returning raw bytes");
                Ok(stored)
            }
        }
    }

    /// Chunk records of a content, ordered by `seq_num`.
    pub fn list_chunks(&self, id: &str) -> Result<Vec<ChunkRecord>> {
        let chunk_ids: Vec<String> = match self
            .engine
            .get(Cf::Content, &keys::content_chunks(id)?)?
        {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => return Ok(Vec::new()),
        };
        let mut records = Vec::with_capacity(chunk_ids.len());
        for chunk_id in chunk_ids {
            match self.engine.get(Cf::Content, &keys::chunk(&chunk_id)?)? {
                Some(bytes) => records.push(serde_json::from_slice::<ChunkRecord>(&bytes)?),
                None => {
                    return Err(Error::Corruption(format!(
                        "chunk list of {id} references missing chunk {chunk_id}"
                    )))
                }
            }
        }
        Ok(records)
    }

    /// Remove a content and everything derived from it: blob, meta,
    /// chunks, chunk list, hash reverse-lookup, vector entries, and
    /// the edges its import created.
    pub fn delete_content(&self, id: &str) -> Result<()> {
        let meta = self.get_content_meta(id)?;
        let chunks = self.list_chunks(id)?;

        let mut batch = WriteBatch::new();
        batch.delete(Cf::Content, keys::content_meta(id)?);
        batch.delete(Cf::Content, keys::content_blob(id)?);
        batch.delete(Cf::Content, keys::content_chunks(id)?);
        for chunk in &chunks {
            batch.delete(Cf::Content, keys::chunk(&chunk.chunk_id)?);
        }
        // Only drop the reverse lookup when it still points at us: a
        // forced re-import may own the hash by now.
        let hash_key = keys::content_hash(&meta.sha256)?;
        if let Some(owner) = self.engine.get(Cf::Content, &hash_key)? {
            if owner == id.as_bytes() {
                batch.delete(Cf::Content, hash_key);
            }
        }
        self.engine.batch_write(batch)?;

        if self.vectors.has_namespace(CHUNK_NAMESPACE) {
            for chunk in &chunks {
                if chunk.has_embedding {
                    self.vectors.remove(CHUNK_NAMESPACE, &chunk.chunk_id)?;
                }
            }
        }
        for edge_pk in &meta.edge_pks {
            match self.graph.delete_edge(edge_pk) {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(id, chunks = chunks.len(), "content deleted");
        Ok(())
    }
}

fn hex_digest(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use themis_storage::MemoryEngine;

    fn pipeline() -> (Arc<MemoryEngine>, Arc<VectorIndexManager>, ContentPipeline) {
        let engine: Arc<MemoryEngine> = Arc::new(MemoryEngine::new());
        let engine_dyn: Arc<dyn KvEngine> = engine.clone();
        let vectors = Arc::new(VectorIndexManager::new());
        let graph = Arc::new(GraphIndexManager::new(engine_dyn.clone()));
        let pipeline = ContentPipeline::new(
            engine_dyn,
            vectors.clone(),
            graph,
            ContentConfig::default(),
        );
        (engine, vectors, pipeline)
    }

    fn text_spec(id: &str) -> ContentSpec {
        ContentSpec {
            id: Some(id.to_string()),
            mime_type: "text/plain".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_import_and_read_back() {
        let (_engine, _vectors, pipeline) = pipeline();
        let blob = b"small text payload";
        let result = pipeline.import_content(&text_spec("c1"), blob).unwrap();
        assert_eq!(result.id, "c1");
        assert!(!result.deduplicated);

        assert_eq!(pipeline.get_content_blob("c1").unwrap(), blob);
        let meta = pipeline.get_content_meta("c1").unwrap();
        assert_eq!(meta.size, blob.len() as u64);
        assert!(!meta.compressed, "small blobs stay raw");
        assert_eq!(meta.sha256.len(), 64);
    }

    #[test]
    fn test_large_text_is_compressed_transparently() {
        let (engine, _vectors, pipeline) = pipeline();
        let blob = "compressible line of text\n".repeat(1000).into_bytes();
        pipeline.import_content(&text_spec("c1"), &blob).unwrap();

        let meta = pipeline.get_content_meta("c1").unwrap();
        assert!(meta.compressed);
        let stored = engine
            .get(Cf::Content, b"content:c1:blob")
            .unwrap()
            .unwrap();
        assert!(stored.len() < blob.len());
        assert_eq!(pipeline.get_content_blob("c1").unwrap(), blob);
    }

    #[test]
    fn test_skip_mimes_stay_raw() {
        let (_engine, _vectors, pipeline) = pipeline();
        let blob = vec![0u8; 10_000];
        let spec = ContentSpec {
            id: Some("img".to_string()),
            mime_type: "image/png".to_string(),
            ..Default::default()
        };
        pipeline.import_content(&spec, &blob).unwrap();
        assert!(!pipeline.get_content_meta("img").unwrap().compressed);
    }

    #[test]
    fn test_dedup_returns_existing_id() {
        let (engine, _vectors, pipeline) = pipeline();
        let blob = b"identical payload bytes";
        let first = pipeline.import_content(&text_spec("x"), blob).unwrap();
        let second = pipeline.import_content(&text_spec("y"), blob).unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.deduplicated);
        // Only one blob stored.
        assert!(engine.get(Cf::Content, b"content:x:blob").unwrap().is_some());
        assert!(engine.get(Cf::Content, b"content:y:blob").unwrap().is_none());
    }

    #[test]
    fn test_force_new_id_bypasses_dedup() {
        let (engine, _vectors, pipeline) = pipeline();
        let blob = b"identical payload bytes";
        pipeline.import_content(&text_spec("x"), blob).unwrap();
        let spec = ContentSpec {
            force_new_id: true,
            ..text_spec("y")
        };
        let second = pipeline.import_content(&spec, blob).unwrap();
        assert_eq!(second.id, "y");
        assert!(!second.deduplicated);
        assert!(engine.get(Cf::Content, b"content:y:blob").unwrap().is_some());
    }

    #[test]
    fn test_explicit_chunks_with_embeddings() {
        let (_engine, vectors, pipeline) = pipeline();
        let spec = ContentSpec {
            id: Some("doc".to_string()),
            mime_type: "text/markdown".to_string(),
            chunks: Some(vec![
                ChunkSpec {
                    text: "first chunk".to_string(),
                    chunk_type: "text".to_string(),
                    embedding: Some(vec![1.0, 0.0, 0.0]),
                },
                ChunkSpec {
                    text: "second chunk".to_string(),
                    chunk_type: "text".to_string(),
                    embedding: Some(vec![0.0, 1.0, 0.0]),
                },
            ]),
            ..Default::default()
        };
        let result = pipeline.import_content(&spec, b"full document").unwrap();
        assert_eq!(result.chunk_count, 2);

        let chunks = pipeline.list_chunks("doc").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq_num, 0);
        assert_eq!(chunks[1].seq_num, 1);
        assert_eq!(chunks[0].chunk_id, "doc-0");

        // Embeddings registered under the chunks namespace.
        assert_eq!(vectors.count(CHUNK_NAMESPACE).unwrap(), 2);
        let hits = vectors
            .search_knn(CHUNK_NAMESPACE, &[1.0, 0.0, 0.0], 1, None)
            .unwrap();
        assert_eq!(hits[0].pk, "doc-0");
    }

    #[test]
    fn test_default_chunking_for_text() {
        let (_engine, _vectors, pipeline) = pipeline();
        let blob = "word ".repeat(100_000).into_bytes(); // ~500 KB
        pipeline.import_content(&text_spec("big"), &blob).unwrap();
        let chunks = pipeline.list_chunks("big").unwrap();
        assert!(chunks.len() > 1);
        let seqs: Vec<u32> = chunks.iter().map(|c| c.seq_num).collect();
        let expected: Vec<u32> = (0..chunks.len() as u32).collect();
        assert_eq!(seqs, expected);
    }

    #[test]
    fn test_spec_edges_registered() {
        let (engine, _vectors, pipeline) = pipeline();
        let spec = ContentSpec {
            id: Some("linked".to_string()),
            mime_type: "text/plain".to_string(),
            edges: vec![EdgeSpec {
                edge_pk: "cites-1".to_string(),
                from_pk: "linked".to_string(),
                to_pk: "other-doc".to_string(),
                weight: 1.0,
            }],
            ..Default::default()
        };
        pipeline.import_content(&spec, b"cited text").unwrap();
        assert!(engine
            .get(Cf::Graph, b"graph:out:linked:cites-1")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_delete_content_removes_everything() {
        let (engine, vectors, pipeline) = pipeline();
        let spec = ContentSpec {
            id: Some("doc".to_string()),
            mime_type: "text/plain".to_string(),
            chunks: Some(vec![ChunkSpec {
                text: "chunk".to_string(),
                chunk_type: "text".to_string(),
                embedding: Some(vec![1.0, 0.0]),
            }]),
            edges: vec![EdgeSpec {
                edge_pk: "e1".to_string(),
                from_pk: "doc".to_string(),
                to_pk: "related".to_string(),
                weight: 1.0,
            }],
            ..Default::default()
        };
        pipeline.import_content(&spec, b"payload").unwrap();
        pipeline.delete_content("doc").unwrap();

        assert!(engine.get(Cf::Content, b"content:doc:meta").unwrap().is_none());
        assert!(engine.get(Cf::Content, b"content:doc:blob").unwrap().is_none());
        assert!(engine.get(Cf::Content, b"chunk:doc-0").unwrap().is_none());
        assert!(engine.get(Cf::Content, b"content_chunks:doc").unwrap().is_none());
        assert!(!vectors.contains(CHUNK_NAMESPACE, "doc-0").unwrap());
        assert!(engine.get(Cf::Graph, b"graph:edge:e1").unwrap().is_none());
        assert!(matches!(
            pipeline.get_content_meta("doc").unwrap_err(),
            Error::NotFound(_)
        ));

        // The blob can be imported again afterwards.
        let again = pipeline.import_content(&text_spec("doc2"), b"payload").unwrap();
        assert!(!again.deduplicated);
    }

    #[test]
    fn test_corrupt_compressed_blob_returns_raw() {
        let (engine, _vectors, pipeline) = pipeline();
        let blob = "text to compress ".repeat(1000).into_bytes();
        pipeline.import_content(&text_spec("c"), &blob).unwrap();

        // Clobber the stored payload with non-zstd bytes.
        engine
            .put(Cf::Content, b"content:c:blob", b"not zstd at all")
            .unwrap();
        let result = pipeline.get_content_blob("c").unwrap();
        assert_eq!(result, b"not zstd at all");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_engine, _vectors, pipeline) = pipeline();
        pipeline.import_content(&text_spec("c1"), b"one").unwrap();
        let err = pipeline.import_content(&text_spec("c1"), b"two").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
