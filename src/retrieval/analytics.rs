//! 쿼리 분석 로그 - append-only 텔레메트리
//!
//! 검색 경로는 이 로그를 절대 읽지 않습니다 (출력 전용).
//! 기록 실패는 파이프라인에서 삼켜지고 에러 로그만 남습니다.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

/// 쿼리 1건의 분석 레코드
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    /// 필터 통과한 포스트 결과 수
    pub posts_found: usize,
    /// 필터 통과한 링크 결과 수
    pub links_found: usize,
    /// 상위 반환 포스트 id (최대 10개)
    pub top_post_ids: Vec<String>,
    /// 상위 반환 링크 id (최대 10개)
    pub top_link_ids: Vec<String>,
    pub search_time_ms: u64,
    pub llm_time_ms: u64,
}

/// 쿼리 로그 싱크
pub trait QueryLog: Send + Sync {
    /// 엔트리 1건 기록 (write-once, append-only)
    fn record(&self, entry: &QueryLogEntry) -> Result<()>;
}

// ============================================================================
// JsonlQueryLog
// ============================================================================

/// JSON Lines 파일 기반 쿼리 로그
///
/// 한 줄에 한 엔트리씩 데이터 디렉토리의 `queries.jsonl`에 추가합니다.
pub struct JsonlQueryLog {
    path: PathBuf,
    // 같은 프로세스 내 동시 기록의 줄 섞임 방지
    lock: Mutex<()>,
}

impl JsonlQueryLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("queries.jsonl"),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueryLog for JsonlQueryLog {
    fn record(&self, entry: &QueryLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("Failed to serialize query log entry")?;

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open query log")?;
        writeln!(file, "{}", line).context("Failed to append query log entry")?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
