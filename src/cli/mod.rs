//! CLI 모듈
//!
//! favrag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::app::AppContext;
use crate::config::Settings;
use crate::embedding::has_api_key;
use crate::retrieval::{CollectionKind, MetadataValue, SearchResult};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "favrag")]
#[command(version, about = "좋아요 아카이브용 로컬 하이브리드 RAG 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 좋아요 내보내기 JSON 파일을 적재
    Ingest {
        /// 내보내기 파일 경로 (JSON 배열)
        file: PathBuf,

        /// 포스트 대신 링크 컬렉션으로 적재
        #[arg(long)]
        links: bool,
    },

    /// 아카이브에 자연어로 질문
    Query {
        /// 질문 텍스트
        query: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { file, links } => cmd_ingest(file, links).await,
        Commands::Query { query } => cmd_query(&query).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 적재 명령어 (ingest)
///
/// 내보내기 파일을 임베딩하여 벡터 컬렉션(+포스트 아카이브)에 저장합니다.
async fn cmd_ingest(file: PathBuf, links: bool) -> Result<()> {
    // 적재는 임베딩이 필수
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    if !file.exists() {
        bail!("파일을 찾을 수 없습니다: {:?}", file);
    }

    let ctx = AppContext::initialize(Settings::from_env()).context("초기화 실패")?;
    let ingestor = ctx.ingestor();

    let target = if links { "링크" } else { "포스트" };
    println!("[*] {} 적재 중: {:?}", target, file);

    let report = if links {
        ingestor.import_links(&file).await.context("링크 적재 실패")?
    } else {
        ingestor.import_posts(&file).await.context("포스트 적재 실패")?
    };

    println!(
        "[OK] 완료: 추가 {}, 건너뜀 {}",
        report.imported, report.skipped
    );

    Ok(())
}

/// 질문 명령어 (query)
///
/// 하이브리드 검색 후 답변과 소스를 출력합니다.
async fn cmd_query(query: &str) -> Result<()> {
    let ctx = AppContext::initialize(Settings::from_env()).context("초기화 실패")?;

    println!("[*] 검색 중: \"{}\"", query);

    let response = ctx.retriever.query(query).await.context("쿼리 실패")?;

    println!();
    println!("{}", response.answer);
    println!();

    if !response.sources.posts.is_empty() {
        println!("[OK] 관련 포스트 ({} 건 중 상위 {}):", response.metadata.posts_found, response.sources.posts.len());
        for (i, result) in response.sources.posts.iter().enumerate() {
            print_source(i, result, "text");
        }
        println!();
    }

    if !response.sources.links.is_empty() {
        println!("[OK] 관련 링크 ({} 건 중 상위 {}):", response.metadata.links_found, response.sources.links.len());
        for (i, result) in response.sources.links.iter().enumerate() {
            print_source(i, result, "title");
        }
        println!();
    }

    println!(
        "    검색 {}ms | 생성 {}ms | 전체 {}ms",
        response.metadata.search_time_ms,
        response.metadata.llm_time_ms,
        response.metadata.total_time_ms
    );
    if let Some(model) = &response.metadata.model {
        println!("    모델: {} ({} 토큰)", model, response.metadata.tokens);
    }

    Ok(())
}

/// 소스 1건 출력
fn print_source(index: usize, result: &SearchResult, text_field: &str) {
    let text = result
        .metadata
        .get(text_field)
        .and_then(MetadataValue::as_str)
        .unwrap_or("-");
    let author = result
        .metadata
        .get("author_username")
        .and_then(MetadataValue::as_str);

    print!("  {}. [유사도: {:.3}]", index + 1, result.similarity);
    if let Some(author) = author {
        print!(" @{}", author);
    }
    println!();
    println!("     {}", truncate_text(text, 120));

    if let Some(url) = result.metadata.get("url").and_then(MetadataValue::as_str) {
        println!("     URL: {}", url);
    }
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status() -> Result<()> {
    println!("favrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let settings = Settings::from_env();
    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());

    // API 키 상태
    if has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정 (키워드 검색만 가능)");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    if std::env::var("ANTHROPIC_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
        println!("[OK] 답변 생성 API 키: 설정됨");
    } else {
        println!("[!] 답변 생성 API 키: 미설정 (답변 비활성화)");
        println!("    설정: export ANTHROPIC_API_KEY=your-key");
    }

    // 컬렉션 및 아카이브 통계
    match AppContext::initialize(settings) {
        Ok(ctx) => {
            println!(
                "[OK] 벡터 컬렉션: 포스트 {} 건, 링크 {} 건 (차원 {})",
                ctx.manager.count(CollectionKind::Posts),
                ctx.manager.count(CollectionKind::Links),
                ctx.manager.dimension()
            );

            match ctx.archive.stats() {
                Ok(stats) => {
                    println!("[OK] 포스트 아카이브: {} 건", stats.post_count);
                    println!(
                        "     총 텍스트: {}",
                        format_bytes(stats.total_text_bytes)
                    );
                }
                Err(e) => {
                    println!("[!] 아카이브 통계 조회 실패: {}", e);
                }
            }
        }
        Err(e) => {
            println!("[!] 초기화 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
