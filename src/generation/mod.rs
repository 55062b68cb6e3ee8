//! 답변 생성 모듈 - 외부 LLM 프로바이더 경계
//!
//! 검색된 컨텍스트와 쿼리를 받아 답변을 생성합니다. 생성 실패는
//! 파이프라인을 중단시키지 않고 에러 문자열 답변으로 강등됩니다.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Anthropic Messages API 엔드포인트
/// ref: https://docs.anthropic.com/en/api/messages
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// Types
// ============================================================================

/// 생성 결과
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub answer: String,
    pub model: Option<String>,
    /// 입력 + 출력 토큰 합계
    pub tokens: usize,
    pub latency_ms: u64,
}

/// 답변 생성기 트레이트
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// 쿼리 + 컨텍스트로 답변 생성
    async fn generate(&self, query: &str, context: &str) -> Result<Generation>;

    /// 생성기 이름
    fn name(&self) -> &str;
}

// ============================================================================
// ClaudeGenerator
// ============================================================================

/// 좋아요 아카이브 분석용 시스템 프롬프트
const SYSTEM_PROMPT: &str = "\
You are an AI assistant helping analyze a personal archive of liked posts and articles.
Your task is to answer questions based on the provided context from the user's likes.

Guidelines:
1. Base your answers ONLY on the provided context
2. Be specific and cite relevant posts or articles when possible
3. If the context doesn't contain relevant information, say so honestly
4. Provide a balanced, nuanced view when multiple perspectives exist
5. Include post authors and article titles when referencing sources";

/// Anthropic Claude 기반 답변 생성기
#[derive(Debug)]
pub struct ClaudeGenerator {
    api_key: String,
    client: reqwest::Client,
    model: String,
    max_tokens: usize,
}

impl ClaudeGenerator {
    pub fn new(api_key: String, model: String, max_tokens: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model,
            max_tokens,
        })
    }

    /// ANTHROPIC_API_KEY 환경변수에서 생성 (미설정 시 None)
    pub fn from_env(model: String, max_tokens: usize) -> Result<Option<Self>> {
        match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Some(Self::new(key, model, max_tokens)?)),
            _ => Ok(None),
        }
    }

    fn build_user_message(query: &str, context: &str) -> String {
        format!(
            "Query: {query}\n\n\
             Context from liked posts and articles:\n\n\
             {context}\n\n\
             Please provide a comprehensive answer to the query based on the above context.\n\
             If you reference specific posts or articles, mention the author/source."
        )
    }
}

/// Messages API 요청 본문
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

#[async_trait]
impl AnswerGenerator for ClaudeGenerator {
    async fn generate(&self, query: &str, context: &str) -> Result<Generation> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::build_user_message(query, context),
            }],
        };

        let started = Instant::now();

        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send generation request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read generation response body")?;

        if !status.is_success() {
            anyhow::bail!("Anthropic API error ({}): {}", status, body);
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).context("Failed to parse generation response")?;

        let answer = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();

        Ok(Generation {
            answer,
            model: Some(self.model.clone()),
            tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// NullGenerator
// ============================================================================

/// API 키가 없을 때의 강등 모드 생성기
///
/// 검색은 정상 동작하고 답변만 안내 문구로 대체됩니다.
#[derive(Debug, Default)]
pub struct NullGenerator;

#[async_trait]
impl AnswerGenerator for NullGenerator {
    async fn generate(&self, _query: &str, _context: &str) -> Result<Generation> {
        Ok(Generation {
            answer: "LLM not available. Set ANTHROPIC_API_KEY to enable AI-powered answers."
                .to_string(),
            model: None,
            tokens: 0,
            latency_ms: 0,
        })
    }

    fn name(&self) -> &str {
        "null"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_contains_query_and_context() {
        let message = ClaudeGenerator::build_user_message("what about rust?", "CTX-BODY");
        assert!(message.contains("Query: what about rust?"));
        assert!(message.contains("CTX-BODY"));
    }

    #[tokio::test]
    async fn test_null_generator_is_degraded_not_fatal() {
        let generation = NullGenerator.generate("q", "ctx").await.unwrap();
        assert!(generation.answer.contains("LLM not available"));
        assert_eq!(generation.tokens, 0);
        assert_eq!(generation.latency_ms, 0);
        assert!(generation.model.is_none());
    }

    #[test]
    fn test_from_env_without_key() {
        let _env = crate::env_guard();
        std::env::remove_var("ANTHROPIC_API_KEY");
        let generator = ClaudeGenerator::from_env("claude-test".to_string(), 100).unwrap();
        assert!(generator.is_none());
    }
}
