//! CollectionManager - 포스트/링크 두 벡터 컬렉션의 라우팅
//!
//! 정책 없는 순수 디스패치 계층입니다. 랭킹/필터링 정책은 전부
//! `HybridRetriever`에 있습니다.

use std::path::Path;
use std::sync::RwLock;

use super::error::Result;
use super::store::{NewEntry, SearchResult, VectorIndex};

// ============================================================================
// CollectionKind
// ============================================================================

/// 컬렉션 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// 좋아요한 포스트 본문
    Posts,
    /// 포스트에 연결된 외부 콘텐츠
    Links,
}

impl CollectionKind {
    /// 디스크 디렉토리 이름
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Links => "links",
        }
    }

    /// 레코드 id 메타데이터 필드
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Posts => "post_id",
            Self::Links => "link_id",
        }
    }
}

// ============================================================================
// CollectionManager
// ============================================================================

/// 두 개의 고정 컬렉션을 소유하는 매니저
///
/// 컬렉션당 reader-writer 락 하나 - `add`는 쓰기 락, `search`는 읽기 락을
/// 잡으므로 동시 검색끼리는 서로를 막지 않습니다. 임베딩 계산과 답변
/// 생성은 락 밖에서 일어납니다.
pub struct CollectionManager {
    dimension: usize,
    posts: RwLock<VectorIndex>,
    links: RwLock<VectorIndex>,
}

impl CollectionManager {
    /// 공유 차원으로 두 컬렉션 열기
    pub fn open(base_dir: &Path, dimension: usize) -> Result<Self> {
        let posts = VectorIndex::open(
            &base_dir.join(CollectionKind::Posts.dir_name()),
            dimension,
            CollectionKind::Posts.id_field(),
        )?;
        let links = VectorIndex::open(
            &base_dir.join(CollectionKind::Links.dir_name()),
            dimension,
            CollectionKind::Links.id_field(),
        )?;

        Ok(Self {
            dimension,
            posts: RwLock::new(posts),
            links: RwLock::new(links),
        })
    }

    /// 공유 컬렉션 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 배치 삽입 - 그대로 위임
    pub fn add(&self, collection: CollectionKind, entries: Vec<NewEntry>) -> Result<usize> {
        self.lock_for(collection)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(entries)
    }

    /// 유사도 검색 - 그대로 위임
    pub fn search(
        &self,
        collection: CollectionKind,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.lock_for(collection)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .search(query, top_k)
    }

    /// 컬렉션 레코드 수
    pub fn count(&self, collection: CollectionKind) -> usize {
        self.lock_for(collection)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn lock_for(&self, collection: CollectionKind) -> &RwLock<VectorIndex> {
        match collection {
            CollectionKind::Posts => &self.posts,
            CollectionKind::Links => &self.links,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
