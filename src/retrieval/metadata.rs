//! 메타데이터 모델 - 명시적 태그드 값 타입
//!
//! 레코드 메타데이터는 문자열/숫자/불리언/문자열 리스트/null 만 허용합니다.
//! 중첩 구조는 삽입 시점에 타입 에러로 거부됩니다 (암묵적 문자열화 없음).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RetrievalError;

// ============================================================================
// MetadataValue
// ============================================================================

/// 메타데이터 값
///
/// JSON 직렬화는 untagged - 사이드카 파일에는 평범한 JSON으로 기록됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// 문자열 값 참조
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 레코드 id로 사용할 수 있는 표현
    ///
    /// 외부 내보내기 파일은 id를 문자열 또는 숫자로 표기하므로
    /// 두 경우만 id로 인정합니다. 정수 값 숫자는 소수점 없이 렌더링합니다.
    pub fn as_id(&self) -> Option<String> {
        match self {
            Self::Str(s) if !s.is_empty() => Some(s.clone()),
            Self::Num(n) if n.fract() == 0.0 && n.is_finite() => Some(format!("{}", *n as i64)),
            Self::Num(n) if n.is_finite() => Some(n.to_string()),
            _ => None,
        }
    }
}

/// 레코드 메타데이터 (키 순서 고정을 위해 BTreeMap 사용)
pub type Metadata = BTreeMap<String, MetadataValue>;

// ============================================================================
// JSON Conversion
// ============================================================================

/// JSON 값 하나를 `MetadataValue`로 변환
///
/// 중첩 객체, 문자열이 아닌 원소를 가진 리스트는 거부합니다.
pub fn value_from_json(field: &str, value: &Value) -> Result<MetadataValue, RetrievalError> {
    match value {
        Value::Null => Ok(MetadataValue::Null),
        Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(MetadataValue::Num)
            .ok_or_else(|| RetrievalError::InvalidMetadata {
                field: field.to_string(),
                reason: "number out of f64 range".to_string(),
            }),
        Value::String(s) => Ok(MetadataValue::Str(s.clone())),
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => list.push(s.clone()),
                    other => {
                        return Err(RetrievalError::InvalidMetadata {
                            field: field.to_string(),
                            reason: format!("list element must be a string, got {}", kind_of(other)),
                        })
                    }
                }
            }
            Ok(MetadataValue::List(list))
        }
        Value::Object(_) => Err(RetrievalError::InvalidMetadata {
            field: field.to_string(),
            reason: "nested objects are not allowed".to_string(),
        }),
    }
}

/// JSON 객체를 `Metadata`로 변환
///
/// 한 필드라도 허용되지 않는 형태면 레코드 전체를 거부합니다.
pub fn metadata_from_json(value: &Value) -> Result<Metadata, RetrievalError> {
    let object = value
        .as_object()
        .ok_or_else(|| RetrievalError::InvalidMetadata {
            field: "<root>".to_string(),
            reason: format!("record must be an object, got {}", kind_of(value)),
        })?;

    let mut metadata = Metadata::new();
    for (key, val) in object {
        metadata.insert(key.clone(), value_from_json(key, val)?);
    }
    Ok(metadata)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
