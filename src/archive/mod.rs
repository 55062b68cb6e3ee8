//! PostArchive - 포스트 원문 저장 + FTS5 키워드 검색
//!
//! 좋아요한 포스트의 원문 텍스트를 SQLite에 저장하고, 임베딩을 사용할 수
//! 없을 때의 키워드 폴백 검색(`LexicalSearch`)을 제공합니다.
//! 폴백은 primary 컬렉션(포스트)에만 적용됩니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};

use crate::retrieval::{Metadata, MetadataValue};

// ============================================================================
// Types
// ============================================================================

/// 새 포스트 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewPost {
    pub post_id: String,
    pub author_username: Option<String>,
    pub author_name: Option<String>,
    pub text: String,
    pub url: Option<String>,
    pub liked_at: Option<String>,
}

/// 키워드 검색 결과 1건
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub metadata: Metadata,
    /// BM25 랭크 (낮을수록 관련성 높음, 보통 음수)
    pub rank: f64,
}

impl LexicalHit {
    /// BM25 랭크를 양수 스코어로 정규화
    ///
    /// 매치된 결과는 항상 양수 스코어를 갖습니다.
    pub fn normalized_score(&self) -> f32 {
        (1.0 / (1.0 + self.rank.abs())) as f32
    }
}

/// 키워드 검색 프로바이더 트레이트
pub trait LexicalSearch: Send + Sync {
    /// 랭크순 키워드 검색
    fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>>;
}

/// 아카이브 통계
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    pub post_count: usize,
    pub total_text_bytes: usize,
}

// ============================================================================
// PostArchive
// ============================================================================

/// SQLite 기반 포스트 아카이브
pub struct PostArchive {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl PostArchive {
    /// 아카이브 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create archive directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let archive = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        archive.initialize()?;
        Ok(archive)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS posts (
                post_id TEXT NOT NULL UNIQUE,
                author_username TEXT,
                author_name TEXT,
                text TEXT NOT NULL,
                url TEXT,
                liked_at TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create posts table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_posts_post_id ON posts(post_id)",
            [],
        )
        .context("Failed to create post_id index")?;

        // FTS5 가상 테이블 (키워드 폴백 검색용)
        // ref: https://www.sqlite.org/fts5.html
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
                text,
                author_username,
                content=posts,
                content_rowid=rowid
            )",
            [],
        )
        .context("Failed to create FTS5 table")?;

        // FTS5 동기화 트리거
        conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS posts_ai AFTER INSERT ON posts BEGIN
                INSERT INTO posts_fts(rowid, text, author_username)
                VALUES (new.rowid, new.text, new.author_username);
            END;

            CREATE TRIGGER IF NOT EXISTS posts_ad AFTER DELETE ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, text, author_username)
                VALUES('delete', old.rowid, old.text, old.author_username);
            END;

            CREATE TRIGGER IF NOT EXISTS posts_au AFTER UPDATE ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, text, author_username)
                VALUES('delete', old.rowid, old.text, old.author_username);
                INSERT INTO posts_fts(rowid, text, author_username)
                VALUES (new.rowid, new.text, new.author_username);
            END;
            "#,
        )
        .context("Failed to create FTS5 triggers")?;

        tracing::debug!("Post archive initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 포스트 저장 (post_id가 같으면 교체)
    pub fn add_post(&self, post: &NewPost) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            "INSERT OR REPLACE INTO posts
                (post_id, author_username, author_name, text, url, liked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                post.post_id,
                post.author_username,
                post.author_name,
                post.text,
                post.url,
                post.liked_at
            ],
        )
        .context("Failed to insert post")?;

        Ok(())
    }

    /// 아카이브 통계
    pub fn stats(&self) -> Result<ArchiveStats> {
        let conn = self.lock_conn()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .unwrap_or(0);
        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(text)), 0) FROM posts",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(ArchiveStats {
            post_count: count as usize,
            total_text_bytes: total_size as usize,
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

impl LexicalSearch for PostArchive {
    /// FTS5 키워드 검색 (BM25 랭크순)
    fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let escaped_query = escape_fts5_query(query);
        if escaped_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT
                p.post_id,
                p.author_username,
                p.author_name,
                p.text,
                p.url,
                p.liked_at,
                bm25(posts_fts) as rank
            FROM posts_fts
            JOIN posts p ON p.rowid = posts_fts.rowid
            WHERE posts_fts MATCH ?1
            ORDER BY bm25(posts_fts)
            LIMIT ?2
            "#,
        )?;

        let hits = stmt
            .query_map(params![escaped_query, limit as i64], |row| {
                let post_id: String = row.get(0)?;
                let author_username: Option<String> = row.get(1)?;
                let author_name: Option<String> = row.get(2)?;
                let text: String = row.get(3)?;
                let url: Option<String> = row.get(4)?;
                let liked_at: Option<String> = row.get(5)?;
                let rank: f64 = row.get(6)?;

                let mut metadata = Metadata::new();
                metadata.insert(
                    "post_id".to_string(),
                    MetadataValue::Str(post_id.clone()),
                );
                metadata.insert("author_username".to_string(), opt_str(author_username));
                metadata.insert("author_name".to_string(), opt_str(author_name));
                metadata.insert("text".to_string(), MetadataValue::Str(text));
                metadata.insert("url".to_string(), opt_str(url));
                metadata.insert("liked_at".to_string(), opt_str(liked_at));

                Ok(LexicalHit {
                    id: post_id,
                    metadata,
                    rank,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(hits)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn opt_str(value: Option<String>) -> MetadataValue {
    value.map(MetadataValue::Str).unwrap_or(MetadataValue::Null)
}

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거하고 단어만 추출합니다.
/// ref: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================
