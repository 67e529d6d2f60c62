//! 링크 설정

use crate::encoder::FrameConstraints;
use crate::{Error, Result, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MIN_FRAME_SIZE, JUMBO_MAX_FRAME_SIZE};

/// CMP 링크 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 최소 프레임 크기 (바이트, 짧으면 0으로 패딩)
    pub min_frame_size: usize,

    /// 최대 프레임 크기 (바이트, 이더넷 페이로드 기준)
    pub max_frame_size: usize,

    /// 점보 프레임 허용
    /// 활성화 시 최대 프레임 크기가 9000으로 올라감
    pub allow_jumbo_frames: bool,

    /// 상태 패킷 전송 주기 (밀리초)
    pub status_interval_ms: u64,

    /// 미완성 세그먼트 재조립 버퍼 유지 시간 (밀리초)
    pub reassembly_timeout_ms: u64,

    /// 인터페이스 ID 0 예약 여부
    pub reserve_zero_interface_id: bool,

    /// 송신 이더넷 프레임의 출발지 MAC
    pub source_mac: [u8; 6],

    /// 수신 스트림 출력 큐 크기
    pub output_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_frame_size: DEFAULT_MIN_FRAME_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            allow_jumbo_frames: false,
            status_interval_ms: 1000,           // 1초
            reassembly_timeout_ms: 2000,        // 2초
            reserve_zero_interface_id: true,
            source_mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01], // 로컬 관리 주소
            output_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 인코더에 넘길 프레임 제약
    pub fn frame_constraints(&self) -> FrameConstraints {
        let max = if self.allow_jumbo_frames {
            self.max_frame_size.max(JUMBO_MAX_FRAME_SIZE)
        } else {
            self.max_frame_size
        };
        FrameConstraints::new(self.min_frame_size, max)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.min_frame_size > self.max_frame_size {
            return Err(Error::InvalidFrameConstraints {
                min: self.min_frame_size,
                max: self.max_frame_size,
            });
        }
        if self.status_interval_ms == 0 {
            return Err(Error::InvalidConfig("status_interval_ms는 0보다 커야 함"));
        }
        if self.output_queue_capacity == 0 {
            return Err(Error::InvalidConfig("output_queue_capacity는 0보다 커야 함"));
        }
        self.frame_constraints().validate()
    }

    /// 점보 프레임 환경용 설정
    pub fn jumbo() -> Self {
        Self {
            allow_jumbo_frames: true,
            max_frame_size: JUMBO_MAX_FRAME_SIZE,
            output_queue_capacity: 4096,
            ..Self::default()
        }
    }

    /// 저지연 모니터링용 설정
    pub fn low_latency() -> Self {
        Self {
            status_interval_ms: 100,            // 100ms
            reassembly_timeout_ms: 500,
            output_queue_capacity: 256,
            ..Self::default()
        }
    }
}
