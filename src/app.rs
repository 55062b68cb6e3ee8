//! AppContext - 프로세스 단위 의존성 조립
//!
//! 전역 싱글톤 대신 시작 시 한 번 협력자들을 조립해 명시적으로
//! 전달합니다. API 키가 없어도 컨텍스트는 기동되며, 임베딩은 호출 시
//! 실패하여 파이프라인의 키워드 폴백으로, 답변 생성은 안내 문구로
//! 강등됩니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::archive::{LexicalSearch, PostArchive};
use crate::config::Settings;
use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedding};
use crate::generation::{AnswerGenerator, ClaudeGenerator, NullGenerator};
use crate::ingest::Ingestor;
use crate::retrieval::{
    CollectionManager, HybridRetriever, JsonlQueryLog, QueryLog, RetrieverConfig,
};

/// 조립된 애플리케이션 컨텍스트
pub struct AppContext {
    pub settings: Settings,
    pub manager: Arc<CollectionManager>,
    pub archive: Arc<PostArchive>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retriever: HybridRetriever,
}

impl AppContext {
    /// 설정으로부터 전체 의존성 그래프 조립
    pub fn initialize(settings: Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", settings.data_dir))?;

        let archive = Arc::new(
            PostArchive::open(&settings.data_dir.join("archive.db"))
                .context("Failed to open post archive")?,
        );

        let manager = Arc::new(
            CollectionManager::open(&settings.data_dir, settings.embedding_dimension)
                .context("Failed to open vector collections")?,
        );

        let embedder: Arc<dyn EmbeddingProvider> = if has_api_key() {
            Arc::new(
                GeminiEmbedding::from_env(settings.embedding_dimension)
                    .context("Failed to initialize embedding provider")?,
            )
        } else {
            tracing::warn!(
                "No embedding API key set, queries will use keyword search only"
            );
            Arc::new(UnavailableEmbedding {
                dimension: settings.embedding_dimension,
            })
        };

        let generator: Arc<dyn AnswerGenerator> =
            match ClaudeGenerator::from_env(settings.llm_model.clone(), settings.llm_max_tokens)? {
                Some(claude) => Arc::new(claude),
                None => {
                    tracing::warn!("ANTHROPIC_API_KEY not set, answers will be disabled");
                    Arc::new(NullGenerator)
                }
            };

        let query_log: Arc<dyn QueryLog> = Arc::new(JsonlQueryLog::new(&settings.data_dir));

        let retriever = HybridRetriever::new(
            Arc::clone(&manager),
            Arc::clone(&embedder),
            Arc::clone(&archive) as Arc<dyn LexicalSearch>,
            generator,
            query_log,
            RetrieverConfig {
                top_k: settings.top_k,
                min_similarity: settings.min_similarity,
                max_context_tokens: settings.max_context_tokens,
                max_display_results: settings.max_display_results,
                lexical_limit: settings.lexical_limit,
            },
        );

        Ok(Self {
            settings,
            manager,
            archive,
            embedder,
            retriever,
        })
    }

    /// 좋아요 내보내기 적재기
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.archive),
            Arc::clone(&self.embedder),
        )
    }
}

/// API 키 미설정 시의 임베딩 자리 채움
///
/// 모든 호출이 실패하므로 파이프라인은 키워드 폴백을 사용합니다.
struct UnavailableEmbedding {
    dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!(
            "Embedding provider not configured. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY."
        )
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ============================================================================
// Tests
// ============================================================================
