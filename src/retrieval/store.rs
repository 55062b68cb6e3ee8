//! VectorIndex - 디스크 영속 정확 최근접 이웃 벡터 인덱스
//!
//! 고정 차원 벡터를 L2 정규화하여 저장하고, 내적으로 코사인 유사도
//! 검색을 수행합니다. 수만 개 규모의 단일 노드 정확 검색이 목표이며
//! 근사(ANN) 구조는 사용하지 않습니다.
//!
//! 영속 포맷:
//! - `index.fvi`: magic "FVRI" | u32 version | u32 dimension | u64 count |
//!   count*dimension f32 (LE) | u32 crc32 트레일러
//! - `metadata.json`: JSON 배열, i번째 원소가 인덱스 i행의 메타데이터

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::{Result, RetrievalError};
use super::metadata::Metadata;

/// 인덱스 파일 매직 넘버
const INDEX_MAGIC: &[u8; 4] = b"FVRI";
/// 인덱스 파일 포맷 버전
const INDEX_VERSION: u32 = 1;
/// 인덱스 파일 이름
const INDEX_FILE: &str = "index.fvi";
/// 메타데이터 사이드카 파일 이름
const METADATA_FILE: &str = "metadata.json";

// ============================================================================
// Types
// ============================================================================

/// 삽입용 엔트리 (임베딩 프로바이더 출력)
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// 검색 결과
///
/// 저장된 레코드 메타데이터의 복사본 + 유사도 스코어.
/// `query`는 인덱스가 아니라 파이프라인이 채웁니다 (인덱스는 벡터만 봅니다).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub metadata: Metadata,
    /// 코사인 유사도 (정규화 벡터의 내적)
    pub similarity: f32,
    /// 이 결과를 만든 쿼리 텍스트
    pub query: String,
}

impl SearchResult {
    /// 메타데이터에서 id 추출
    pub fn id(&self, id_field: &str) -> Option<String> {
        self.metadata.get(id_field).and_then(|v| v.as_id())
    }
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 디스크 영속 벡터 인덱스
///
/// 불변식:
/// - 저장된 모든 벡터의 차원 == 컬렉션 차원
/// - id는 컬렉션 내 유일, `id_lookup` 크기 == 레코드 수 == 행 수
/// - 삽입 순서 == 행 위치 (append-only)
pub struct VectorIndex {
    dimension: usize,
    id_field: String,
    index_path: PathBuf,
    metadata_path: PathBuf,
    /// 정규화된 벡터의 평탄화 저장 (len == count * dimension)
    vectors: Vec<f32>,
    metadata: Vec<Metadata>,
    id_lookup: HashMap<String, usize>,
}

impl VectorIndex {
    /// 인덱스 열기 (없으면 빈 인덱스 생성)
    ///
    /// 영속 파일이 존재하지만 읽을 수 없으면 에러 로그를 남기고
    /// 빈 스토어로 시작합니다. 프로세스 기동을 막지 않는
    /// 가용성 우선 선택입니다.
    pub fn open(store_dir: &Path, dimension: usize, id_field: &str) -> Result<Self> {
        fs::create_dir_all(store_dir)?;

        let mut index = Self {
            dimension,
            id_field: id_field.to_string(),
            index_path: store_dir.join(INDEX_FILE),
            metadata_path: store_dir.join(METADATA_FILE),
            vectors: Vec::new(),
            metadata: Vec::new(),
            id_lookup: HashMap::new(),
        };

        match index.load() {
            Ok(()) => {
                tracing::info!(
                    "Loaded vector store at {} (items={}, dimension={})",
                    store_dir.display(),
                    index.len(),
                    dimension
                );
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load vector store at {}: {} - starting empty",
                    store_dir.display(),
                    e
                );
                index.vectors.clear();
                index.metadata.clear();
                index.id_lookup.clear();
            }
        }

        Ok(index)
    }

    /// 레코드 수
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// 컬렉션 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// id가 이미 저장되어 있는지 확인
    pub fn contains_id(&self, id: &str) -> bool {
        self.id_lookup.contains_key(id)
    }

    /// 벡터 배치 삽입 (멱등)
    ///
    /// 엔트리별 거부 조건 - 배치를 중단하지 않고 해당 엔트리만 건너뜁니다:
    /// - `metadata[id_field]` 누락
    /// - 동일 id가 이미 존재 (재삽입은 조용한 no-op)
    /// - 벡터 차원 불일치
    /// - 정규화 불가능한 벡터 (영벡터, 비유한 값)
    ///
    /// 수락된 벡터는 저장 전에 L2 정규화되며, 호출이 반환되기 전에
    /// 인덱스와 사이드카 전체가 디스크에 다시 기록됩니다.
    /// 실제 저장된 엔트리 수를 반환합니다.
    pub fn add(&mut self, entries: Vec<NewEntry>) -> Result<usize> {
        let mut accepted = 0usize;

        for entry in entries {
            let id = match entry
                .metadata
                .get(&self.id_field)
                .and_then(|v| v.as_id())
            {
                Some(id) => id,
                None => {
                    tracing::warn!("Metadata missing {}, skipping vector", self.id_field);
                    continue;
                }
            };

            if self.id_lookup.contains_key(&id) {
                tracing::debug!("Duplicate id {}, skipping", id);
                continue;
            }

            if entry.vector.len() != self.dimension {
                tracing::warn!(
                    "Vector dimension {} != collection dimension {}, skipping id {}",
                    entry.vector.len(),
                    self.dimension,
                    id
                );
                continue;
            }

            let mut vector = entry.vector;
            if !l2_normalize(&mut vector) {
                tracing::warn!("Vector for id {} is not normalizable, skipping", id);
                continue;
            }

            let position = self.metadata.len();
            self.vectors.extend_from_slice(&vector);
            self.metadata.push(entry.metadata);
            self.id_lookup.insert(id, position);
            accepted += 1;
        }

        if accepted > 0 {
            self.persist()?;
            tracing::info!(
                "Added {} items to vector store {}",
                accepted,
                self.index_path.display()
            );
        }

        Ok(accepted)
    }

    /// 유사도 검색
    ///
    /// 쿼리를 정규화한 뒤 내적 기준 상위 `top_k`개를 반환합니다.
    /// 유사도 내림차순, 동점은 삽입 위치 오름차순 (재현 가능성 보장).
    /// 빈 컬렉션은 에러가 아니라 빈 목록을 반환합니다.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let top_k = top_k.min(self.len());

        let mut scored: Vec<(usize, f32)> = self
            .metadata
            .iter()
            .enumerate()
            .map(|(pos, _)| {
                let row = &self.vectors[pos * self.dimension..(pos + 1) * self.dimension];
                (pos, dot(&normalized, row))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(pos, similarity)| SearchResult {
                metadata: self.metadata[pos].clone(),
                similarity,
                query: String::new(),
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// 영속 파일 로드
    fn load(&mut self) -> Result<()> {
        let index_exists = self.index_path.exists();
        let metadata_exists = self.metadata_path.exists();

        if !index_exists && !metadata_exists {
            return Ok(());
        }
        if index_exists != metadata_exists {
            return Err(RetrievalError::CorruptStore(
                "index and metadata sidecar must exist together".to_string(),
            ));
        }

        let raw = fs::read(&self.index_path)?;
        let vectors = decode_index(&raw, self.dimension)?;

        let metadata_raw = fs::read(&self.metadata_path)?;
        let metadata: Vec<Metadata> = serde_json::from_slice(&metadata_raw)?;

        let count = vectors.len() / self.dimension;
        if metadata.len() != count {
            return Err(RetrievalError::CorruptStore(format!(
                "metadata sidecar has {} entries but index has {} rows",
                metadata.len(),
                count
            )));
        }

        let mut id_lookup = HashMap::with_capacity(count);
        for (position, item) in metadata.iter().enumerate() {
            let id = item
                .get(&self.id_field)
                .and_then(|v| v.as_id())
                .ok_or_else(|| {
                    RetrievalError::CorruptStore(format!(
                        "metadata row {} is missing {}",
                        position, self.id_field
                    ))
                })?;
            if id_lookup.insert(id.clone(), position).is_some() {
                return Err(RetrievalError::CorruptStore(format!(
                    "duplicate id {} in metadata sidecar",
                    id
                )));
            }
        }

        self.vectors = vectors;
        self.metadata = metadata;
        self.id_lookup = id_lookup;
        Ok(())
    }

    /// 인덱스 + 사이드카 전체 재기록
    ///
    /// 임시 파일에 쓴 뒤 rename으로 교체하여 부분 기록이
    /// 보이지 않도록 합니다.
    fn persist(&self) -> Result<()> {
        let encoded = encode_index(&self.vectors, self.dimension);
        write_atomic(&self.index_path, &encoded)?;

        let sidecar = serde_json::to_vec(&self.metadata)?;
        write_atomic(&self.metadata_path, &sidecar)?;
        Ok(())
    }
}

// ============================================================================
// Vector Math
// ============================================================================

/// 벡터를 제자리에서 L2 정규화
///
/// 영벡터이거나 비유한 값을 포함하면 false를 반환하고 변경하지 않습니다.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
    if !norm_sq.is_finite() || norm_sq == 0.0 {
        return false;
    }
    let norm = norm_sq.sqrt();
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}

/// 내적 (두 벡터는 같은 길이를 전제)
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ============================================================================
// Binary Index Format
// ============================================================================

/// 인덱스 파일 인코딩
fn encode_index(vectors: &[f32], dimension: usize) -> Vec<u8> {
    let count = if dimension == 0 {
        0u64
    } else {
        (vectors.len() / dimension) as u64
    };

    let mut buf = Vec::with_capacity(20 + vectors.len() * 4 + 4);
    buf.extend_from_slice(INDEX_MAGIC);
    buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    for value in vectors {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// 인덱스 파일 디코딩 및 검증
fn decode_index(raw: &[u8], expected_dimension: usize) -> Result<Vec<f32>> {
    const HEADER_LEN: usize = 4 + 4 + 4 + 8;
    const TRAILER_LEN: usize = 4;

    if raw.len() < HEADER_LEN + TRAILER_LEN {
        return Err(RetrievalError::CorruptStore(
            "index file too short".to_string(),
        ));
    }

    let (body, trailer) = raw.split_at(raw.len() - TRAILER_LEN);
    let stored_crc = u32::from_le_bytes(trailer.try_into().expect("trailer is 4 bytes"));
    if crc32fast::hash(body) != stored_crc {
        return Err(RetrievalError::CorruptStore(
            "index checksum mismatch".to_string(),
        ));
    }

    if &body[0..4] != INDEX_MAGIC {
        return Err(RetrievalError::CorruptStore("bad index magic".to_string()));
    }
    let version = u32::from_le_bytes(body[4..8].try_into().expect("4 bytes"));
    if version != INDEX_VERSION {
        return Err(RetrievalError::CorruptStore(format!(
            "unsupported index version {}",
            version
        )));
    }
    let dimension = u32::from_le_bytes(body[8..12].try_into().expect("4 bytes")) as usize;
    if dimension != expected_dimension {
        return Err(RetrievalError::CorruptStore(format!(
            "index dimension {} != configured dimension {}",
            dimension, expected_dimension
        )));
    }
    let count = u64::from_le_bytes(body[12..20].try_into().expect("8 bytes")) as usize;

    let payload = &body[HEADER_LEN..];
    // count는 파일에서 온 값 - 곱셈 오버플로도 훼손으로 취급
    let expected_len = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            RetrievalError::CorruptStore(format!("index row count {} overflows", count))
        })?;
    if payload.len() != expected_len {
        return Err(RetrievalError::CorruptStore(format!(
            "index payload length {} != {} rows * {} dims",
            payload.len(),
            count,
            dimension
        )));
    }

    let mut vectors = Vec::with_capacity(payload.len() / 4);
    for chunk in payload.chunks_exact(4) {
        vectors.push(f32::from_le_bytes(chunk.try_into().expect("4 bytes")));
    }
    Ok(vectors)
}

/// 임시 파일 + rename 원자적 쓰기
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::metadata::MetadataValue;
    use tempfile::TempDir;

    fn entry(id: &str, vector: Vec<f32>) -> NewEntry {
        let mut metadata = Metadata::new();
        metadata.insert("post_id".to_string(), MetadataValue::Str(id.to_string()));
        metadata.insert(
            "text".to_string(),
            MetadataValue::Str(format!("post {}", id)),
        );
        NewEntry { vector, metadata }
    }

    fn open_test_index(dir: &TempDir) -> VectorIndex {
        VectorIndex::open(dir.path(), 3, "post_id").unwrap()
    }

    #[test]
    fn test_empty_store_search_is_ok() {
        let dir = TempDir::new().unwrap();
        let index = open_test_index(&dir);
        let results = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_add_and_exact_match_ranking() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);

        let added = index
            .add(vec![
                entry("t1", vec![1.0, 0.0, 0.0]),
                entry("t2", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        assert_eq!(added, 2);

        let results = index.search(&[2.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id("post_id").unwrap(), "t1");
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_idempotent_add() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);

        assert_eq!(index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap(), 1);
        // 같은 id 재삽입은 조용한 no-op
        assert_eq!(index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap(), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_rejection_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);

        let added = index
            .add(vec![
                entry("bad", vec![1.0, 0.0]), // 차원 불일치
                entry("good", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(index.len(), 1);
        assert!(index.contains_id("good"));
        assert!(!index.contains_id("bad"));
    }

    #[test]
    fn test_missing_id_and_zero_vector_skipped() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);

        let mut no_id = Metadata::new();
        no_id.insert("text".to_string(), MetadataValue::Str("x".to_string()));

        let added = index
            .add(vec![
                NewEntry {
                    vector: vec![1.0, 0.0, 0.0],
                    metadata: no_id,
                },
                entry("zero", vec![0.0, 0.0, 0.0]),
                entry("ok", vec![1.0, 1.0, 0.0]),
            ])
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);
        index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap();

        let err = index.search(&[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_top_k_clamped_to_count() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);
        index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 100).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_tie_break_by_insertion_position() {
        let dir = TempDir::new().unwrap();
        let mut index = open_test_index(&dir);

        // 동일 방향 벡터 - 유사도 동점
        index
            .add(vec![
                entry("first", vec![1.0, 0.0, 0.0]),
                entry("second", vec![2.0, 0.0, 0.0]),
            ])
            .unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].id("post_id").unwrap(), "first");
        assert_eq!(results[1].id("post_id").unwrap(), "second");
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open_test_index(&dir);
            index
                .add(vec![
                    entry("t1", vec![1.0, 0.0, 0.0]),
                    entry("t2", vec![0.0, 1.0, 0.0]),
                ])
                .unwrap();
        }

        // 다시 열어도 데이터와 랭킹이 유지됨
        let index = open_test_index(&dir);
        assert_eq!(index.len(), 2);
        assert!(index.contains_id("t1"));

        let results = index.search(&[1.0, 0.0, 0.01], 2).unwrap();
        assert_eq!(results[0].id("post_id").unwrap(), "t1");
        assert!((results[0].similarity - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_corrupt_index_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open_test_index(&dir);
            index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap();
        }

        // 인덱스 파일 훼손
        std::fs::write(dir.path().join("index.fvi"), b"garbage").unwrap();

        let index = open_test_index(&dir);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_sidecar_mismatch_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open_test_index(&dir);
            index.add(vec![entry("t1", vec![1.0, 0.0, 0.0])]).unwrap();
        }

        // 사이드카만 비움 - 행 수 불일치
        std::fs::write(dir.path().join("metadata.json"), b"[]").unwrap();

        let index = open_test_index(&dir);
        assert!(index.is_empty());
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        assert!(!l2_normalize(&mut zero));
    }

    #[test]
    fn test_oversized_row_count_is_corrupt_not_panic() {
        // 체크섬은 유효하지만 count가 터무니없이 큰 파일
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        let err = decode_index(&buf, 3).unwrap_err();
        assert!(matches!(err, RetrievalError::CorruptStore(_)));
    }

    #[test]
    fn test_index_encode_decode() {
        let vectors = vec![1.0f32, 0.5, -0.25, 0.0, 1.0, 2.0];
        let encoded = encode_index(&vectors, 3);
        let decoded = decode_index(&encoded, 3).unwrap();
        assert_eq!(vectors, decoded);

        // 한 바이트라도 바뀌면 체크섬이 잡아냄
        let mut tampered = encoded.clone();
        tampered[24] ^= 0xff;
        assert!(decode_index(&tampered, 3).is_err());
    }
}
