//! 식별자 할당기
//!
//! 인터페이스 ID, 스트림 ID 같은 작은 정수 식별자를 유한한 범위 안에서
//! 할당/반납한다. 반납된 ID는 재활용 집합에 들어가고 다음 할당에서 우선 사용된다.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::{Error, Result};

/// ID 0 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroPolicy {
    /// 0은 예약값, 할당 불가
    Reserved,

    /// 0도 일반 ID로 할당 가능
    Allocatable,
}

#[derive(Debug, Default)]
struct IdSets {
    used: BTreeSet<u32>,
    recycled: BTreeSet<u32>,
}

/// 식별자 할당기
#[derive(Debug)]
pub struct IdManager {
    min: u32,
    max: u32,
    sets: Mutex<IdSets>,
}

impl IdManager {
    /// `[0 또는 1, max]` 범위의 할당기 생성
    pub fn new(max: u32, zero: ZeroPolicy) -> Self {
        let min = match zero {
            ZeroPolicy::Reserved => 1,
            ZeroPolicy::Allocatable => 0,
        };
        Self {
            min,
            max,
            sets: Mutex::new(IdSets::default()),
        }
    }

    /// 8비트 스트림 ID용 (0은 상태 슬롯으로 예약)
    pub fn for_streams() -> Self {
        Self::new(u8::MAX as u32, ZeroPolicy::Reserved)
    }

    /// 32비트 인터페이스 ID용
    pub fn for_interfaces(zero: ZeroPolicy) -> Self {
        Self::new(u32::MAX, zero)
    }

    pub fn in_domain(&self, id: u32) -> bool {
        id >= self.min && id <= self.max
    }

    /// ID 사용 등록. 범위 밖이거나 이미 사용 중이면 false
    pub fn add_id(&self, id: u32) -> bool {
        if !self.in_domain(id) {
            return false;
        }
        let mut sets = self.sets.lock();
        if !sets.used.insert(id) {
            return false;
        }
        sets.recycled.remove(&id);
        true
    }

    /// ID 반납. 사용 중이 아니었으면 false
    pub fn remove_id(&self, id: u32) -> bool {
        let mut sets = self.sets.lock();
        if !sets.used.remove(&id) {
            return false;
        }
        sets.recycled.insert(id);
        true
    }

    pub fn is_used(&self, id: u32) -> bool {
        self.sets.lock().used.contains(&id)
    }

    /// 다음에 할당될 ID
    ///
    /// 재활용 집합의 최솟값이 우선이고, 없으면 사용 집합의 첫 빈자리.
    /// 범위가 가득 차면 None.
    pub fn first_unused_id(&self) -> Option<u32> {
        let sets = self.sets.lock();
        Self::first_unused_locked(&sets, self.min, self.max)
    }

    fn first_unused_locked(sets: &IdSets, min: u32, max: u32) -> Option<u32> {
        if let Some(&id) = sets.recycled.iter().next() {
            return Some(id);
        }

        let mut candidate = min as u64;
        for &id in sets.used.range(min..) {
            let id = id as u64;
            if id > candidate {
                break;
            }
            if id == candidate {
                candidate += 1;
            }
        }

        if candidate > max as u64 {
            None
        } else {
            Some(candidate as u32)
        }
    }

    /// 빈 ID를 찾아 바로 등록 (조회와 등록 사이에 끼어드는 할당 없음)
    pub fn allocate(&self) -> Result<u32> {
        let mut sets = self.sets.lock();
        let id = Self::first_unused_locked(&sets, self.min, self.max).ok_or(Error::IdExhausted)?;
        sets.used.insert(id);
        sets.recycled.remove(&id);
        Ok(id)
    }

    /// 번호 변경: `new_id` 등록과 `old_id` 반납을 한 번에 수행
    pub fn replace_id(&self, old_id: u32, new_id: u32) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        if !self.in_domain(new_id) {
            return Err(Error::IdOutOfRange {
                id: new_id,
                min: self.min,
                max: self.max,
            });
        }
        let mut sets = self.sets.lock();
        if sets.used.contains(&new_id) {
            return Err(Error::IdInUse { id: new_id });
        }
        sets.used.insert(new_id);
        sets.recycled.remove(&new_id);
        if sets.used.remove(&old_id) {
            sets.recycled.insert(old_id);
        }
        Ok(())
    }

    pub fn used_ids(&self) -> Vec<u32> {
        self.sets.lock().used.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sets.lock().used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().used.is_empty()
    }

    pub fn clear(&self) {
        let mut sets = self.sets.lock();
        sets.used.clear();
        sets.recycled.clear();
    }
}
