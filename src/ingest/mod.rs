//! 수집 모듈 - 좋아요 내보내기 JSON 파일을 컬렉션에 적재
//!
//! 내보내기 파일은 레코드 객체의 JSON 배열입니다. 레코드 단위로
//! 검증하며, 잘못된 레코드(중첩 객체, id 누락 등)는 경고 로그와 함께
//! 건너뛰고 나머지는 계속 적재합니다. 같은 파일을 다시 적재해도
//! 인덱스의 id 멱등성 덕분에 중복이 생기지 않습니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::archive::{NewPost, PostArchive};
use crate::embedding::EmbeddingProvider;
use crate::retrieval::{
    metadata_from_json, CollectionKind, CollectionManager, Metadata, NewEntry,
};

// ============================================================================
// Types
// ============================================================================

/// 적재 결과 요약
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// 새로 추가된 레코드 수
    pub imported: usize,
    /// 건너뛴 레코드 수 (검증 실패 + 중복)
    pub skipped: usize,
}

/// 좋아요 내보내기 적재기
pub struct Ingestor {
    manager: Arc<CollectionManager>,
    archive: Arc<PostArchive>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Ingestor {
    pub fn new(
        manager: Arc<CollectionManager>,
        archive: Arc<PostArchive>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            manager,
            archive,
            embedder,
        }
    }

    /// 포스트 내보내기 파일 적재
    ///
    /// 벡터 컬렉션과 키워드 아카이브 양쪽에 저장됩니다.
    pub async fn import_posts(&self, path: &Path) -> Result<ImportReport> {
        let records = read_export(path)?;
        let total = records.len();
        tracing::info!("Importing {} post records from {:?}", total, path);

        // 1. 레코드 검증
        let mut valid: Vec<(Metadata, String)> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            match validate_record(record, CollectionKind::Posts.id_field(), "text") {
                Ok(pair) => valid.push(pair),
                Err(reason) => {
                    tracing::warn!("Skipping post record {}: {}", i, reason);
                }
            }
        }

        // 2. 레코드별 임베딩 - 한 레코드의 실패가 배치를 중단시키지 않음
        let embedded = self
            .embed_records(valid, CollectionKind::Posts.id_field())
            .await;

        // 3. 벡터 컬렉션 + 아카이브 저장
        let entries: Vec<NewEntry> = embedded
            .iter()
            .map(|(metadata, _, vector)| NewEntry {
                vector: vector.clone(),
                metadata: metadata.clone(),
            })
            .collect();

        let imported = self.manager.add(CollectionKind::Posts, entries)?;

        for (metadata, text, _) in &embedded {
            if let Some(post) = new_post_from_metadata(metadata, text) {
                self.archive
                    .add_post(&post)
                    .context("Failed to archive post")?;
            }
        }

        let report = ImportReport {
            imported,
            skipped: total - imported,
        };
        tracing::info!(
            "Post import done: {} imported, {} skipped",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    /// 링크 내보내기 파일 적재 (벡터 컬렉션만)
    pub async fn import_links(&self, path: &Path) -> Result<ImportReport> {
        let records = read_export(path)?;
        let total = records.len();
        tracing::info!("Importing {} link records from {:?}", total, path);

        let mut valid: Vec<(Metadata, String)> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            match validate_record(record, CollectionKind::Links.id_field(), "title") {
                Ok((metadata, title)) => {
                    // 링크는 제목 + 본문/요약을 함께 임베딩
                    let body = get_str(&metadata, "summary")
                        .or_else(|| get_str(&metadata, "content_text"))
                        .unwrap_or_default();
                    let embed_text = if body.is_empty() {
                        title
                    } else {
                        format!("{}\n\n{}", title, body)
                    };
                    valid.push((metadata, embed_text));
                }
                Err(reason) => {
                    tracing::warn!("Skipping link record {}: {}", i, reason);
                }
            }
        }

        let embedded = self
            .embed_records(valid, CollectionKind::Links.id_field())
            .await;

        let entries: Vec<NewEntry> = embedded
            .into_iter()
            .map(|(metadata, _, vector)| NewEntry { vector, metadata })
            .collect();

        let imported = self.manager.add(CollectionKind::Links, entries)?;

        let report = ImportReport {
            imported,
            skipped: total - imported,
        };
        tracing::info!(
            "Link import done: {} imported, {} skipped",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    /// 검증 통과 레코드를 하나씩 임베딩
    ///
    /// 실패한 레코드는 경고 로그 후 건너뛰며, 성공한 레코드만 돌려줍니다.
    async fn embed_records(
        &self,
        records: Vec<(Metadata, String)>,
        id_field: &str,
    ) -> Vec<(Metadata, String, Vec<f32>)> {
        let mut embedded = Vec::with_capacity(records.len());

        for (metadata, text) in records {
            match self.embedder.embed(&text).await {
                Ok(vector) => embedded.push((metadata, text, vector)),
                Err(e) => {
                    let id = metadata
                        .get(id_field)
                        .and_then(|v| v.as_id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tracing::warn!("Skipping record {}: embedding failed: {}", id, e);
                }
            }
        }

        embedded
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 내보내기 파일 읽기 (최상위 JSON 배열)
fn read_export(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read export file {:?}", path))?;
    let value: Value =
        serde_json::from_str(&content).context("Export file is not valid JSON")?;

    match value {
        Value::Array(records) => Ok(records),
        _ => anyhow::bail!("Export file must contain a top-level JSON array"),
    }
}

/// 레코드 1건 검증: 평탄 메타데이터 + id + 본문 텍스트
fn validate_record(
    record: &Value,
    id_field: &str,
    text_field: &str,
) -> std::result::Result<(Metadata, String), String> {
    let metadata = metadata_from_json(record).map_err(|e| e.to_string())?;

    let has_id = metadata
        .get(id_field)
        .and_then(|v| v.as_id())
        .is_some();
    if !has_id {
        return Err(format!("missing or empty '{}' field", id_field));
    }

    let text = get_str(&metadata, text_field)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| format!("missing or empty '{}' field", text_field))?;

    Ok((metadata, text))
}

fn get_str(metadata: &Metadata, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// 아카이브 저장용 NewPost 변환
fn new_post_from_metadata(metadata: &Metadata, text: &str) -> Option<NewPost> {
    let post_id = metadata.get("post_id").and_then(|v| v.as_id())?;
    Some(NewPost {
        post_id,
        author_username: get_str(metadata, "author_username"),
        author_name: get_str(metadata, "author_name"),
        text: text.to_string(),
        url: get_str(metadata, "url"),
        liked_at: get_str(metadata, "liked_at"),
    })
}

// ============================================================================
// Tests
// ============================================================================
