//! HybridRetriever - 하이브리드 검색 + 답변 생성 파이프라인
//!
//! 자연어 쿼리를 받아 임베딩 → 벡터 검색 → 유사도 필터 → 컨텍스트 조립 →
//! 답변 생성 → 분석 로그의 선형 파이프라인을 수행합니다.
//! 임베딩을 사용할 수 없으면 키워드 폴백으로 전환되며, 이것이 유일한
//! 분기점입니다. 증거가 전혀 없으면 생성기를 호출하지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::archive::LexicalSearch;
use crate::embedding::EmbeddingProvider;
use crate::generation::{AnswerGenerator, Generation};

use super::analytics::{QueryLog, QueryLogEntry};
use super::manager::{CollectionKind, CollectionManager};
use super::metadata::{Metadata, MetadataValue};
use super::store::SearchResult;

/// 증거가 전혀 없을 때의 고정 응답
const NO_RELEVANT_CONTENT: &str =
    "No relevant content found in your liked posts. Try a different query.";

/// 컨텍스트 절단 마커
const TRUNCATION_MARKER: &str = "\n\n[Context truncated due to length...]";

/// 섹션당 컨텍스트에 렌더링할 최대 엔트리 수
const MAX_CONTEXT_ENTRIES: usize = 10;

/// 분석 로그에 남길 상위 id 수
const MAX_LOGGED_IDS: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// 파이프라인 튜닝 설정
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// 컬렉션별 벡터 검색 top-k
    pub top_k: usize,
    /// 유사도 필터 임계값
    pub min_similarity: f32,
    /// 컨텍스트 토큰 예산 (1 토큰 ≈ 4 문자)
    pub max_context_tokens: usize,
    /// 응답에 노출할 소스 개수
    pub max_display_results: usize,
    /// 키워드 폴백 결과 제한
    pub lexical_limit: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            min_similarity: 0.5,
            max_context_tokens: 4000,
            max_display_results: 5,
            lexical_limit: 50,
        }
    }
}

/// 쿼리 응답의 소스 목록 (두 컬렉션은 끝까지 병합하지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct Sources {
    pub posts: Vec<SearchResult>,
    pub links: Vec<SearchResult>,
}

/// 쿼리 응답 메타데이터
#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub posts_found: usize,
    pub links_found: usize,
    pub search_time_ms: u64,
    pub llm_time_ms: u64,
    pub total_time_ms: u64,
    pub model: Option<String>,
    pub tokens: usize,
}

/// 쿼리 응답
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
    pub sources: Sources,
    pub metadata: QueryStats,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 모든 협력자는 트레이트 객체로 주입됩니다 - 전역 싱글톤 없이
/// 프로세스 시작 시 `AppContext`가 한 번 조립합니다.
pub struct HybridRetriever {
    manager: Arc<CollectionManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    lexical: Arc<dyn LexicalSearch>,
    generator: Arc<dyn AnswerGenerator>,
    query_log: Arc<dyn QueryLog>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        manager: Arc<CollectionManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        lexical: Arc<dyn LexicalSearch>,
        generator: Arc<dyn AnswerGenerator>,
        query_log: Arc<dyn QueryLog>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            manager,
            embedder,
            lexical,
            generator,
            query_log,
            config,
        }
    }

    /// 메인 쿼리 경로 - 검색하고 답변을 생성합니다
    pub async fn query(&self, query_text: &str) -> Result<QueryResponse> {
        tracing::info!("Processing query: {}", query_text);
        let started = Instant::now();

        // 1. 하이브리드 검색 (임베딩/생성은 컬렉션 락 밖에서 수행됨)
        let search_started = Instant::now();
        let (posts, links) = self.hybrid_search(query_text).await;
        let search_time_ms = search_started.elapsed().as_millis() as u64;

        // 증거가 전혀 없으면 생성기를 호출하지 않고 종료
        if posts.is_empty() && links.is_empty() {
            return Ok(QueryResponse {
                query: query_text.to_string(),
                answer: NO_RELEVANT_CONTENT.to_string(),
                sources: Sources {
                    posts: vec![],
                    links: vec![],
                },
                metadata: QueryStats {
                    posts_found: 0,
                    links_found: 0,
                    search_time_ms,
                    llm_time_ms: 0,
                    total_time_ms: started.elapsed().as_millis() as u64,
                    model: None,
                    tokens: 0,
                },
            });
        }

        // 2. 컨텍스트 조립
        let context = self.format_context(&posts, &links);

        // 3. 답변 생성 (실패는 에러 답변으로 강등)
        let generation = match self.generator.generate(query_text, &context).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::error!("Answer generation failed: {}", e);
                Generation {
                    answer: format!("Error generating answer: {}", e),
                    model: None,
                    tokens: 0,
                    latency_ms: 0,
                }
            }
        };

        // 4. 분석 로그 (실패는 삼키고 에러 로그만)
        self.record_query(query_text, &posts, &links, search_time_ms, generation.latency_ms);

        let total_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!("Query completed in {}ms", total_time_ms);

        let posts_found = posts.len();
        let links_found = links.len();
        let display = self.config.max_display_results;

        Ok(QueryResponse {
            query: query_text.to_string(),
            answer: generation.answer,
            sources: Sources {
                posts: posts.into_iter().take(display).collect(),
                links: links.into_iter().take(display).collect(),
            },
            metadata: QueryStats {
                posts_found,
                links_found,
                search_time_ms,
                llm_time_ms: generation.latency_ms,
                total_time_ms,
                model: generation.model,
                tokens: generation.tokens,
            },
        })
    }

    /// 하이브리드 검색
    ///
    /// 임베딩이 가능하면 두 컬렉션을 각각 벡터 검색하고 임계값 필터를
    /// 적용합니다. 임베딩이 불가능하면 포스트 컬렉션에 대한 키워드
    /// 폴백만 수행하며, 벡터 검색은 전혀 호출되지 않습니다.
    async fn hybrid_search(&self, query_text: &str) -> (Vec<SearchResult>, Vec<SearchResult>) {
        let query_embedding = match self.embedder.embed_query(query_text).await {
            Ok(v) if !v.is_empty() && v.iter().any(|x| *x != 0.0) => Some(v),
            Ok(_) => {
                tracing::warn!("Embedding provider returned no usable vector");
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Could not generate query embedding, falling back to keyword search: {}",
                    e
                );
                None
            }
        };

        let Some(embedding) = query_embedding else {
            return (self.lexical_fallback(query_text), vec![]);
        };

        let posts = self.vector_search(CollectionKind::Posts, &embedding, query_text);
        let links = self.vector_search(CollectionKind::Links, &embedding, query_text);
        tracing::info!("Found {} posts and {} links", posts.len(), links.len());

        (posts, links)
    }

    /// 한 컬렉션에 대한 벡터 검색 + 임계값 필터
    fn vector_search(
        &self,
        collection: CollectionKind,
        embedding: &[f32],
        query_text: &str,
    ) -> Vec<SearchResult> {
        let results = match self.manager.search(collection, embedding, self.config.top_k) {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Vector search failed on {:?}: {}", collection, e);
                return vec![];
            }
        };

        results
            .into_iter()
            .filter(|r| r.similarity >= self.config.min_similarity)
            .map(|mut r| {
                r.query = query_text.to_string();
                r
            })
            .collect()
    }

    /// 키워드 폴백 (포스트 컬렉션만, 임계값 없음)
    fn lexical_fallback(&self, query_text: &str) -> Vec<SearchResult> {
        let hits = match self.lexical.search(query_text, self.config.lexical_limit) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!("Keyword search failed: {}", e);
                return vec![];
            }
        };

        hits.into_iter()
            .map(|hit| SearchResult {
                similarity: hit.normalized_score(),
                metadata: hit.metadata,
                query: query_text.to_string(),
            })
            .collect()
    }

    /// 검색 결과를 LLM 컨텍스트 텍스트로 조립
    ///
    /// 비어 있지 않은 결과 집합마다 라벨 섹션 하나, 섹션당 최대 10개
    /// 엔트리를 렌더링합니다. 전체 텍스트를 먼저 만든 뒤 문자/4로 토큰을
    /// 추정하고, 예산을 넘으면 꼬리만 잘라 마커를 붙입니다 - 절단은
    /// 엔트리를 제거하거나 재배열하지 않습니다.
    pub fn format_context(&self, posts: &[SearchResult], links: &[SearchResult]) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !posts.is_empty() {
            parts.push("=== RELEVANT POSTS ===\n".to_string());
            for (i, post) in posts.iter().take(MAX_CONTEXT_ENTRIES).enumerate() {
                parts.push(format!(
                    "[{}] @{} ({})\n    {}\n    URL: {}\n    Similarity: {:.3}\n",
                    i + 1,
                    meta_str(&post.metadata, "author_username"),
                    meta_str(&post.metadata, "liked_at"),
                    meta_str(&post.metadata, "text"),
                    meta_str(&post.metadata, "url"),
                    post.similarity
                ));
            }
        }

        if !links.is_empty() {
            parts.push("\n=== RELEVANT ARTICLES/CONTENT ===\n".to_string());
            for (i, link) in links.iter().take(MAX_CONTEXT_ENTRIES).enumerate() {
                let summary = link
                    .metadata
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        meta_str(&link.metadata, "content_text")
                            .chars()
                            .take(500)
                            .collect()
                    });

                parts.push(format!(
                    "[{}] {}\n    URL: {}\n    Domain: {}\n    Summary: {}...\n    Similarity: {:.3}\n",
                    i + 1,
                    meta_str(&link.metadata, "title"),
                    meta_str(&link.metadata, "url"),
                    meta_str(&link.metadata, "domain"),
                    summary,
                    link.similarity
                ));
            }
        }

        let context: String = parts.concat();

        // 대략적 토큰 추정: 1 토큰 ≈ 4 문자
        let estimated_tokens = context.chars().count() / 4;
        if estimated_tokens > self.config.max_context_tokens {
            let char_limit = self.config.max_context_tokens * 4;
            let truncated: String = context.chars().take(char_limit).collect();
            return format!("{}{}", truncated, TRUNCATION_MARKER);
        }

        context
    }

    /// 쿼리 분석 로그 기록 (실패는 삼킴)
    fn record_query(
        &self,
        query_text: &str,
        posts: &[SearchResult],
        links: &[SearchResult],
        search_time_ms: u64,
        llm_time_ms: u64,
    ) {
        let entry = QueryLogEntry {
            query: query_text.to_string(),
            timestamp: Utc::now(),
            posts_found: posts.len(),
            links_found: links.len(),
            top_post_ids: top_ids(posts, CollectionKind::Posts.id_field()),
            top_link_ids: top_ids(links, CollectionKind::Links.id_field()),
            search_time_ms,
            llm_time_ms,
        };

        if let Err(e) = self.query_log.record(&entry) {
            tracing::error!("Failed to save query log: {}", e);
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 메타데이터 문자열 필드 조회 (없으면 "N/A")
fn meta_str<'a>(metadata: &'a Metadata, key: &str) -> &'a str {
    match metadata.get(key) {
        Some(MetadataValue::Str(s)) if !s.is_empty() => s.as_str(),
        _ => "N/A",
    }
}

/// 상위 결과 id 추출 (로그용)
fn top_ids(results: &[SearchResult], id_field: &str) -> Vec<String> {
    results
        .iter()
        .take(MAX_LOGGED_IDS)
        .filter_map(|r| r.id(id_field))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LexicalHit;
    use crate::retrieval::store::NewEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ------------------------------------------------------------------------
    // Mocks
    // ------------------------------------------------------------------------

    /// 고정 벡터 또는 실패를 돌려주는 임베더
    struct FixedEmbedder {
        vector: Option<Vec<f32>>,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            match &self.vector {
                Some(v) => Ok(v.clone()),
                None => anyhow::bail!("embedding backend unavailable"),
            }
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct MockLexical {
        hits: Vec<LexicalHit>,
        called: AtomicBool,
    }

    impl MockLexical {
        fn new(hits: Vec<LexicalHit>) -> Self {
            Self {
                hits,
                called: AtomicBool::new(false),
            }
        }
    }

    impl LexicalSearch for MockLexical {
        fn search(&self, _query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
            self.called.store(true, Ordering::SeqCst);
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    struct MockGenerator {
        fail: bool,
        called: AtomicBool,
        last_context: Mutex<String>,
    }

    impl MockGenerator {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                called: AtomicBool::new(false),
                last_context: Mutex::new(String::new()),
            }
        }
    }

    #[async_trait]
    impl AnswerGenerator for MockGenerator {
        async fn generate(&self, _query: &str, context: &str) -> Result<Generation> {
            self.called.store(true, Ordering::SeqCst);
            *self.last_context.lock().unwrap() = context.to_string();
            if self.fail {
                anyhow::bail!("generator backend down");
            }
            Ok(Generation {
                answer: "mock answer".to_string(),
                model: Some("mock-model".to_string()),
                tokens: 7,
                latency_ms: 1,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    struct MemoryQueryLog {
        entries: Mutex<Vec<QueryLogEntry>>,
    }

    impl MemoryQueryLog {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }
    }

    impl QueryLog for MemoryQueryLog {
        fn record(&self, entry: &QueryLogEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    fn post_entry(id: &str, text: &str, vector: Vec<f32>) -> NewEntry {
        let mut metadata = Metadata::new();
        metadata.insert("post_id".to_string(), MetadataValue::Str(id.to_string()));
        metadata.insert("text".to_string(), MetadataValue::Str(text.to_string()));
        metadata.insert(
            "author_username".to_string(),
            MetadataValue::Str("alice".to_string()),
        );
        NewEntry { vector, metadata }
    }

    fn lexical_hit(id: &str, text: &str) -> LexicalHit {
        let mut metadata = Metadata::new();
        metadata.insert("post_id".to_string(), MetadataValue::Str(id.to_string()));
        metadata.insert("text".to_string(), MetadataValue::Str(text.to_string()));
        LexicalHit {
            id: id.to_string(),
            metadata,
            rank: -1.5,
        }
    }

    struct Harness {
        _dir: TempDir,
        retriever: HybridRetriever,
        generator: Arc<MockGenerator>,
        lexical: Arc<MockLexical>,
        query_log: Arc<MemoryQueryLog>,
    }

    fn build_harness(
        entries: Vec<NewEntry>,
        embed: Option<Vec<f32>>,
        lexical_hits: Vec<LexicalHit>,
        generator_fails: bool,
        config: RetrieverConfig,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(CollectionManager::open(dir.path(), 3).unwrap());
        if !entries.is_empty() {
            manager.add(CollectionKind::Posts, entries).unwrap();
        }

        let generator = Arc::new(MockGenerator::new(generator_fails));
        let lexical = Arc::new(MockLexical::new(lexical_hits));
        let query_log = Arc::new(MemoryQueryLog::new());

        let retriever = HybridRetriever::new(
            manager,
            Arc::new(FixedEmbedder {
                vector: embed,
                dimension: 3,
            }),
            Arc::clone(&lexical) as Arc<dyn LexicalSearch>,
            Arc::clone(&generator) as Arc<dyn AnswerGenerator>,
            Arc::clone(&query_log) as Arc<dyn QueryLog>,
            config,
        );

        Harness {
            _dir: dir,
            retriever,
            generator,
            lexical,
            query_log,
        }
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_threshold_filtering() {
        // 차원 3, t1=[1,0,0], t2=[0,1,0], 쿼리 [1,0,0.01], 임계값 0.5
        // -> t1만 통과 (t2 유사도 ≈ 0)
        let harness = build_harness(
            vec![
                post_entry("t1", "rust post", vec![1.0, 0.0, 0.0]),
                post_entry("t2", "pasta post", vec![0.0, 1.0, 0.0]),
            ],
            Some(vec![1.0, 0.0, 0.01]),
            vec![],
            false,
            RetrieverConfig {
                top_k: 2,
                ..Default::default()
            },
        );

        let response = harness.retriever.query("rust").await.unwrap();

        assert_eq!(response.metadata.posts_found, 1);
        assert_eq!(response.sources.posts.len(), 1);
        assert_eq!(response.sources.posts[0].id("post_id").unwrap(), "t1");
        assert!((response.sources.posts[0].similarity - 1.0).abs() < 1e-3);
        assert_eq!(response.sources.posts[0].query, "rust");
        assert_eq!(response.answer, "mock answer");
        assert!(harness.generator.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_threshold_invariant_for_all_thresholds() {
        let entries = vec![
            post_entry("a", "a", vec![1.0, 0.0, 0.0]),
            post_entry("b", "b", vec![1.0, 1.0, 0.0]),
            post_entry("c", "c", vec![1.0, 2.0, 0.0]),
            post_entry("d", "d", vec![0.0, 1.0, 0.0]),
        ];

        for threshold in [0.0f32, 0.25, 0.5, 0.75, 1.0] {
            let harness = build_harness(
                entries.clone(),
                Some(vec![1.0, 0.0, 0.0]),
                vec![],
                false,
                RetrieverConfig {
                    min_similarity: threshold,
                    ..Default::default()
                },
            );

            let response = harness.retriever.query("q").await.unwrap();
            for result in &response.sources.posts {
                assert!(
                    result.similarity >= threshold,
                    "similarity {} below threshold {}",
                    result.similarity,
                    threshold
                );
            }
        }
    }

    #[tokio::test]
    async fn test_no_evidence_skips_generator() {
        let harness = build_harness(
            vec![],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            false,
            RetrieverConfig::default(),
        );

        let response = harness.retriever.query("anything").await.unwrap();

        assert_eq!(response.answer, NO_RELEVANT_CONTENT);
        assert!(response.sources.posts.is_empty());
        assert!(response.sources.links.is_empty());
        assert_eq!(response.metadata.tokens, 0);
        // 생성기는 빈 증거로 절대 호출되지 않음
        assert!(!harness.generator.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lexical_fallback_when_embedding_unavailable() {
        // 벡터 스토어에는 어떤 쿼리와도 매치될 레코드가 있지만,
        // 임베딩이 실패하면 벡터 검색은 전혀 호출되지 않아야 함
        let harness = build_harness(
            vec![post_entry("vec1", "vector post", vec![1.0, 0.0, 0.0])],
            None, // 임베딩 실패
            vec![lexical_hit("lex1", "keyword post")],
            false,
            RetrieverConfig::default(),
        );

        let response = harness.retriever.query("keyword").await.unwrap();

        assert!(harness.lexical.called.load(Ordering::SeqCst));
        assert_eq!(response.sources.posts.len(), 1);
        assert_eq!(response.sources.posts[0].id("post_id").unwrap(), "lex1");
        assert!(response.sources.links.is_empty());
        // 양수 키워드 매치는 임계값 없이 유지됨
        assert!(response.sources.posts[0].similarity > 0.0);
    }

    #[tokio::test]
    async fn test_zero_vector_treated_as_unavailable() {
        let harness = build_harness(
            vec![post_entry("vec1", "vector post", vec![1.0, 0.0, 0.0])],
            Some(vec![0.0, 0.0, 0.0]),
            vec![lexical_hit("lex1", "keyword post")],
            false,
            RetrieverConfig::default(),
        );

        let response = harness.retriever.query("q").await.unwrap();
        assert!(harness.lexical.called.load(Ordering::SeqCst));
        assert_eq!(response.sources.posts[0].id("post_id").unwrap(), "lex1");
    }

    #[tokio::test]
    async fn test_generator_failure_degrades_to_error_answer() {
        let harness = build_harness(
            vec![post_entry("t1", "rust post", vec![1.0, 0.0, 0.0])],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            true, // 생성기 실패
            RetrieverConfig::default(),
        );

        let response = harness.retriever.query("rust").await.unwrap();

        assert!(response.answer.starts_with("Error generating answer:"));
        assert_eq!(response.metadata.tokens, 0);
        assert_eq!(response.metadata.llm_time_ms, 0);
        // 소스는 그대로 반환됨 (부분 강등)
        assert_eq!(response.sources.posts.len(), 1);
    }

    #[tokio::test]
    async fn test_truncation_is_deterministic() {
        // max_tokens=10 -> 40 문자 한도, 200문자 이상 컨텍스트
        let long_text = "x".repeat(200);
        let harness = build_harness(
            vec![],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            false,
            RetrieverConfig {
                max_context_tokens: 10,
                ..Default::default()
            },
        );

        let posts = vec![SearchResult {
            metadata: {
                let mut m = Metadata::new();
                m.insert("post_id".to_string(), MetadataValue::Str("t1".to_string()));
                m.insert("text".to_string(), MetadataValue::Str(long_text));
                m
            },
            similarity: 0.9,
            query: "q".to_string(),
        }];

        let first = harness.retriever.format_context(&posts, &[]);
        let second = harness.retriever.format_context(&posts, &[]);
        assert_eq!(first, second);

        assert!(first.ends_with(TRUNCATION_MARKER));
        let body_chars = first.chars().count() - TRUNCATION_MARKER.chars().count();
        assert_eq!(body_chars, 40);
    }

    #[tokio::test]
    async fn test_context_sections_and_entry_cap() {
        let harness = build_harness(
            vec![],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            false,
            RetrieverConfig::default(),
        );

        // 15개 결과 중 10개만 렌더링됨
        let posts: Vec<SearchResult> = (0..15)
            .map(|i| SearchResult {
                metadata: {
                    let mut m = Metadata::new();
                    m.insert(
                        "post_id".to_string(),
                        MetadataValue::Str(format!("t{}", i)),
                    );
                    m.insert("text".to_string(), MetadataValue::Str(format!("post {}", i)));
                    m
                },
                similarity: 0.9,
                query: "q".to_string(),
            })
            .collect();

        let context = harness.retriever.format_context(&posts, &[]);
        assert!(context.starts_with("=== RELEVANT POSTS ==="));
        assert!(context.contains("[10]"));
        assert!(!context.contains("[11]"));
        // 링크 섹션은 비어 있으면 렌더링되지 않음
        assert!(!context.contains("RELEVANT ARTICLES"));
    }

    #[tokio::test]
    async fn test_query_log_recorded() {
        let harness = build_harness(
            vec![post_entry("t1", "rust post", vec![1.0, 0.0, 0.0])],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            false,
            RetrieverConfig::default(),
        );

        harness.retriever.query("rust").await.unwrap();

        let entries = harness.query_log.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query, "rust");
        assert_eq!(entries[0].posts_found, 1);
        assert_eq!(entries[0].top_post_ids, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_display_cap_does_not_affect_counts() {
        let harness = build_harness(
            vec![
                post_entry("t1", "a", vec![1.0, 0.0, 0.0]),
                post_entry("t2", "b", vec![1.0, 0.1, 0.0]),
                post_entry("t3", "c", vec![1.0, 0.2, 0.0]),
            ],
            Some(vec![1.0, 0.0, 0.0]),
            vec![],
            false,
            RetrieverConfig {
                max_display_results: 1,
                ..Default::default()
            },
        );

        let response = harness.retriever.query("q").await.unwrap();
        assert_eq!(response.metadata.posts_found, 3);
        assert_eq!(response.sources.posts.len(), 1);
    }
}
