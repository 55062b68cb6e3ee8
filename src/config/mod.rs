//! 설정 모듈 - 환경변수 기반 애플리케이션 설정
//!
//! 모든 튜닝 가능한 값은 환경변수로 오버라이드할 수 있으며,
//! 설정하지 않으면 기본값이 사용됩니다.

use std::env;
use std::path::PathBuf;

// ============================================================================
// Defaults
// ============================================================================

/// 기본 임베딩 차원
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// 컬렉션별 기본 top-k
pub const DEFAULT_TOP_K: usize = 20;

/// 기본 최소 유사도 임계값
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// 컨텍스트 토큰 예산 기본값 (1 토큰 ≈ 4 문자)
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 4000;

/// 응답에 포함할 최대 소스 개수
pub const DEFAULT_MAX_DISPLAY_RESULTS: usize = 5;

/// 키워드 폴백 검색 결과 제한
pub const DEFAULT_LEXICAL_LIMIT: usize = 50;

/// 기본 LLM 모델
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-5-20250929";

/// LLM 응답 최대 토큰
pub const DEFAULT_LLM_MAX_TOKENS: usize = 2000;

// ============================================================================
// Settings
// ============================================================================

/// 애플리케이션 설정
///
/// 프로세스 시작 시 한 번 생성하여 `AppContext`로 전달합니다.
/// (모듈 전역 싱글톤을 두지 않습니다)
#[derive(Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리 (~/.favrag/)
    pub data_dir: PathBuf,
    /// 임베딩/컬렉션 공유 차원
    pub embedding_dimension: usize,
    /// 컬렉션별 벡터 검색 top-k
    pub top_k: usize,
    /// 유사도 필터 임계값
    pub min_similarity: f32,
    /// 컨텍스트 토큰 예산
    pub max_context_tokens: usize,
    /// 응답에 노출할 소스 개수
    pub max_display_results: usize,
    /// 키워드 폴백 결과 제한
    pub lexical_limit: usize,
    /// 답변 생성 모델
    pub llm_model: String,
    /// 답변 생성 최대 토큰
    pub llm_max_tokens: usize,
}

impl Settings {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var("FAVRAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),
            embedding_dimension: env_usize("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION),
            top_k: env_usize("TOP_K_RESULTS", DEFAULT_TOP_K),
            min_similarity: env_f32("MIN_SIMILARITY_THRESHOLD", DEFAULT_MIN_SIMILARITY),
            max_context_tokens: env_usize("MAX_CONTEXT_TOKENS", DEFAULT_MAX_CONTEXT_TOKENS),
            max_display_results: env_usize("MAX_DISPLAY_RESULTS", DEFAULT_MAX_DISPLAY_RESULTS),
            lexical_limit: env_usize("LEXICAL_SEARCH_LIMIT", DEFAULT_LEXICAL_LIMIT),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            llm_max_tokens: env_usize("LLM_MAX_TOKENS", DEFAULT_LLM_MAX_TOKENS),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            max_display_results: DEFAULT_MAX_DISPLAY_RESULTS,
            lexical_limit: DEFAULT_LEXICAL_LIMIT,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_max_tokens: DEFAULT_LLM_MAX_TOKENS,
        }
    }
}

/// 기본 데이터 디렉토리 경로 (~/.favrag/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".favrag")
}

// ============================================================================
// Helpers
// ============================================================================

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================
