//! 검색 모듈 - 벡터 인덱스, 컬렉션 라우팅, 하이브리드 파이프라인
//!
//! 계층 구조:
//! - `store`: 단일 컬렉션의 정확(exact) 벡터 인덱스 + 디스크 영속화
//! - `manager`: 포스트/링크 두 컬렉션의 순수 디스패치
//! - `pipeline`: 임베딩 → 검색 → 컨텍스트 → 생성의 오케스트레이션
//! - `analytics`: append-only 쿼리 로그

pub mod analytics;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod pipeline;
pub mod store;

// Re-exports
pub use analytics::{JsonlQueryLog, QueryLog, QueryLogEntry};
pub use error::{Result, RetrievalError};
pub use manager::{CollectionKind, CollectionManager};
pub use metadata::{metadata_from_json, value_from_json, Metadata, MetadataValue};
pub use pipeline::{HybridRetriever, QueryResponse, QueryStats, RetrieverConfig, Sources};
pub use store::{NewEntry, SearchResult, VectorIndex};
