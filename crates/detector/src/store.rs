//! 베이스라인 상태 저장소
//!
//! 탐지기는 샘플마다 [`StateStore::update`]로 이름 단위 상태를 읽고-계산하고-씁니다.
//! 같은 이름에 대한 동시 갱신이 서로의 결과를 덮어쓰지 않게 하는 것은 저장소 구현의 몫입니다.
//! 존재하지 않는 이름은 에러가 아니라 `Ok(None)`입니다.

use std::collections::HashMap;
use std::sync::RwLock;

use driftwatch_core::types::BaselineState;

/// 상태 저장소 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// 저장소에 접근할 수 없음
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// 저장된 값을 해석할 수 없음
    #[error("corrupt state for '{key}': {reason}")]
    Corrupt {
        /// 메트릭 이름
        key: String,
        /// 사유
        reason: String,
    },
}

/// 메트릭별 베이스라인 상태 저장소
///
/// 여러 연결 핸들러에서 동시에 호출됩니다.
pub trait StateStore: Send + Sync {
    /// 이름에 해당하는 상태를 조회합니다. 없으면 `Ok(None)`을 반환합니다.
    fn get(&self, name: &str) -> Result<Option<BaselineState>, StoreError>;

    /// 이름에 해당하는 상태를 저장합니다.
    fn put(&self, name: &str, state: BaselineState) -> Result<(), StoreError>;

    /// 이전 상태에 `apply`를 적용한 결과를 저장하고 반환합니다.
    ///
    /// `apply`가 실패하면 아무것도 쓰지 않습니다. 기본 구현은 `get` 후 `put`이라
    /// 같은 이름의 동시 갱신 하나가 유실될 수 있습니다. 원자적 갱신을 지원하는
    /// 저장소는 이 메서드를 재정의합니다.
    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(Option<BaselineState>) -> Result<BaselineState, StoreError>,
    ) -> Result<BaselineState, StoreError> {
        let next = apply(self.get(name)?)?;
        self.put(name, next)?;
        Ok(next)
    }
}

/// 인메모리 상태 저장소
///
/// `put`은 마지막 쓰기가 이기고, `update`는 쓰기 락 안에서 읽기-계산-쓰기를 하므로
/// 같은 이름의 동시 갱신이 유실되지 않습니다.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, BaselineState>>,
}

impl MemoryStateStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 메트릭 이름 수
    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or_default()
    }

    /// 저장소가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, name: &str) -> Result<Option<BaselineState>, StoreError> {
        let states = self
            .states
            .read()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_owned()))?;
        Ok(states.get(name).copied())
    }

    fn put(&self, name: &str, state: BaselineState) -> Result<(), StoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_owned()))?;
        states.insert(name.to_owned(), state);
        Ok(())
    }

    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(Option<BaselineState>) -> Result<BaselineState, StoreError>,
    ) -> Result<BaselineState, StoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_owned()))?;
        let next = apply(states.get(name).copied())?;
        states.insert(name.to_owned(), next);
        Ok(next)
    }
}
