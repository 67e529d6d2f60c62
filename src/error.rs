//! 에러 타입 정의

use thiserror::Error;

use crate::packet::PayloadType;

/// CMP 링크 에러 타입
///
/// 구조적 디코딩 오류는 여기로 올라오지 않는다.
/// 디코더는 대신 `is_valid() == false` 패킷을 만든다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(&'static str),

    #[error("유효하지 않은 프레임 제약: min={min}, max={max}")]
    InvalidFrameConstraints { min: usize, max: usize },

    #[error("페이로드 타입 불일치: slot={slot}, expected {expected:?}, got {got:?}")]
    PayloadTypeMismatch {
        slot: usize,
        expected: PayloadType,
        got: PayloadType,
    },

    #[error("유효하지 않은 페이로드: {payload_type:?}")]
    InvalidPayload { payload_type: PayloadType },

    #[error("인코더 슬롯 범위 초과: {slot} (최대 {max})")]
    SlotOutOfRange { slot: usize, max: usize },

    #[error("설정되지 않은 인코더 슬롯: {slot}")]
    SlotNotConfigured { slot: usize },

    #[error("사용 가능한 ID 없음")]
    IdExhausted,

    #[error("ID 범위 밖: {id} (허용 {min}..={max})")]
    IdOutOfRange { id: u32, min: u32, max: u32 },

    #[error("이미 사용 중인 ID: {id}")]
    IdInUse { id: u32 },

    #[error("알 수 없는 인터페이스: {interface_id}")]
    UnknownInterface { interface_id: u32 },

    #[error("알 수 없는 스트림: {stream_id}")]
    UnknownStream { stream_id: u8 },

    #[error("전송 채널 종료")]
    TransportClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
