//! 검색 엔진 에러 타입

use thiserror::Error;

/// 벡터 인덱스/메타데이터 계층의 타입 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 쿼리 벡터 차원이 컬렉션 차원과 다름
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 지원하지 않는 메타데이터 형태 (중첩 객체 등)
    #[error("invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: String, reason: String },

    /// 영속 파일이 읽을 수 없거나 일관성이 깨짐
    ///
    /// 호출자에게 전파되지 않고 빈 스토어로 복구됩니다.
    /// (가용성 우선 - 데이터 손실 가능성은 에러 로그로 남김)
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
