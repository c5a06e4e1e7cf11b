//! Content pipeline for ThemisDB
//!
//! Ingests blobs: deduplicates by SHA-256, decides compression by mime
//! type and size, chunks text, registers chunk embeddings in the
//! vector index (`chunks` namespace) and spec edges in the graph.
//!
//! Key layout per content:
//!
//! ```text
//! content:<id>:meta       JSON metadata
//! content:<id>:blob       raw or zstd-compressed payload
//! content_hash:<sha256>   reverse lookup for dedup
//! chunk:<chunk id>        JSON chunk record
//! content_chunks:<id>     ordered chunk id list
//! ```

pub mod chunker;
pub mod pipeline;

pub use chunker::TextChunker;
pub use pipeline::{
    ChunkRecord, ChunkSpec, ContentConfig, ContentMeta, ContentPipeline, ContentSpec, EdgeSpec,
    ImportResult,
};
