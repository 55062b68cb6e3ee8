//! favrag - 좋아요 아카이브용 로컬 하이브리드 RAG 엔진
//!
//! 로컬 벡터 검색 + SQLite FTS5 키워드 검색을 결합해
//! 좋아요한 포스트/링크 아카이브에 자연어로 질문합니다.

pub mod app;
pub mod archive;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod retrieval;

// Re-exports
pub use app::AppContext;
pub use archive::{ArchiveStats, LexicalHit, LexicalSearch, NewPost, PostArchive};
pub use config::Settings;
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use generation::{AnswerGenerator, ClaudeGenerator, Generation, NullGenerator};
pub use ingest::{ImportReport, Ingestor};
pub use retrieval::{
    CollectionKind, CollectionManager, HybridRetriever, Metadata, MetadataValue, NewEntry,
    QueryResponse, RetrieverConfig, SearchResult, VectorIndex,
};

/// 환경변수를 건드리는 테스트 직렬화용 락
///
/// 테스트 스위트는 멀티스레드로 돌고 프로세스 환경은 전역이므로,
/// API 키 변수를 지우거나 읽는 테스트는 이 가드를 먼저 잡아야 합니다.
#[cfg(test)]
pub(crate) fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
