//! 송신 스트림 상태 머신
//!
//! 연결된 신호의 기술자를 스트림의 페이로드 타입과 대조하고,
//! 들어오는 데이터 묶음을 CMP 패킷으로 변환한다.
//!
//! ```text
//! Disconnected --(기술자 유효)--> Connected
//!      ^                             |
//!      |                        (기술자 무효)
//!      +------(연결 해제)------ Invalid
//! ```

use tracing::{debug, info, warn};

use crate::descriptor::{DataDescriptor, DomainDescriptor, SampleType};
use crate::packet::{Packet, PayloadType};
use crate::payload::{
    AnalogPayload, AnalogSampleType, CanPayload, Payload, CAN_FD_MAX_DATA_LEN, CAN_MAX_DATA_LEN,
};
use crate::units::UnitConverter;

/// 내부 재스케일 시 유효 분해능 (24비트)
const RESCALE_STEPS: f64 = (1u64 << 24) as f64;

/// 표준 CAN ID 최댓값. 넘으면 확장 프레임
const CAN_STANDARD_ID_MAX: u32 = 0x7FF;

/// 스트림 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Disconnected,
    Connected,
    Invalid,
}

/// 아날로그 인코딩 방식
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalogEncoding {
    /// 원시값을 그대로 정수로 실음
    Direct {
        sample_type: AnalogSampleType,
        scale: f64,
        offset: f64,
    },

    /// 송신 시 `round((v - offset) / scale)`로 int32 변환
    Rescaled { scale: f64, offset: f64 },
}

impl AnalogEncoding {
    pub fn scale(&self) -> f64 {
        match *self {
            AnalogEncoding::Direct { scale, .. } | AnalogEncoding::Rescaled { scale, .. } => scale,
        }
    }

    pub fn offset(&self) -> f64 {
        match *self {
            AnalogEncoding::Direct { offset, .. } | AnalogEncoding::Rescaled { offset, .. } => {
                offset
            }
        }
    }

    pub fn sample_type(&self) -> AnalogSampleType {
        match *self {
            AnalogEncoding::Direct { sample_type, .. } => sample_type,
            AnalogEncoding::Rescaled { .. } => AnalogSampleType::Int32,
        }
    }

    pub fn needs_rescale(&self) -> bool {
        matches!(self, AnalogEncoding::Rescaled { .. })
    }

    fn encode_sample(&self, value: f64) -> i32 {
        match *self {
            AnalogEncoding::Direct { sample_type, .. } => {
                let (low, high) = match sample_type {
                    AnalogSampleType::Int16 => (i16::MIN as f64, i16::MAX as f64),
                    AnalogSampleType::Int32 => (i32::MIN as f64, i32::MAX as f64),
                };
                value.round().clamp(low, high) as i32
            }
            AnalogEncoding::Rescaled { scale, offset } => ((value - offset) / scale)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        }
    }
}

/// CAN 샘플 (기술자 {ID, Length, Data[64]}와 같은 모양)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanSample {
    /// 도메인 틱
    pub tick: u64,
    pub arbitration_id: u32,
    pub length: u8,
    pub data: [u8; 64],
}

impl CanSample {
    pub fn new(tick: u64, arbitration_id: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 64];
        let len = bytes.len().min(data.len());
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            tick,
            arbitration_id,
            length: bytes.len().min(u8::MAX as usize) as u8,
            data,
        }
    }
}

/// 신호에서 들어오는 데이터 묶음
#[derive(Debug, Clone, PartialEq)]
pub enum DataBatch {
    Can(Vec<CanSample>),
    Analog { start_tick: u64, samples: Vec<f64> },
}

/// 스트림 상태 머신
#[derive(Debug)]
pub struct StreamStateMachine {
    payload_type: PayloadType,
    state: StreamState,
    data_descriptor: Option<DataDescriptor>,
    domain_descriptor: Option<DomainDescriptor>,
    analog: Option<AnalogEncoding>,
    unit_code: u8,
    /// 아날로그 스케일 값이 현재 신호에서 나온 것인지
    signal_connected: bool,
    units: UnitConverter,
}

impl StreamStateMachine {
    pub fn new(payload_type: PayloadType) -> Self {
        Self {
            payload_type,
            state: StreamState::Disconnected,
            data_descriptor: None,
            domain_descriptor: None,
            analog: None,
            unit_code: 0,
            signal_connected: false,
            units: UnitConverter::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn analog_encoding(&self) -> Option<AnalogEncoding> {
        self.analog
    }

    pub fn unit_code(&self) -> u8 {
        self.unit_code
    }

    pub fn is_signal_connected(&self) -> bool {
        self.signal_connected
    }

    pub fn domain_descriptor(&self) -> Option<&DomainDescriptor> {
        self.domain_descriptor.as_ref()
    }

    /// 기술자 변경 통지
    pub fn on_descriptor_changed(
        &mut self,
        data: Option<DataDescriptor>,
        domain: Option<DomainDescriptor>,
    ) -> StreamState {
        self.data_descriptor = data;
        self.domain_descriptor = domain;
        self.revalidate()
    }

    /// 연결 해제 통지
    pub fn on_disconnected(&mut self) {
        self.state = StreamState::Disconnected;
        self.data_descriptor = None;
        self.domain_descriptor = None;
        if self.payload_type == PayloadType::Analog {
            self.signal_connected = false;
            self.analog = None;
        }
        debug!("스트림 연결 해제: {:?}", self.payload_type);
    }

    /// 페이로드 타입 변경. 연결된 신호가 있으면 다시 검증
    pub fn set_payload_type(&mut self, payload_type: PayloadType) -> StreamState {
        self.payload_type = payload_type;
        self.analog = None;
        self.signal_connected = false;
        if self.data_descriptor.is_none() && self.domain_descriptor.is_none() {
            self.state = StreamState::Disconnected;
            return self.state;
        }
        self.revalidate()
    }

    fn revalidate(&mut self) -> StreamState {
        self.analog = None;
        self.signal_connected = false;

        let data = match (&self.data_descriptor, &self.domain_descriptor) {
            (Some(data), Some(_)) => data,
            _ => {
                warn!("기술자 없음, 스트림 무효: {:?}", self.payload_type);
                self.state = StreamState::Invalid;
                return self.state;
            }
        };

        let valid = match self.payload_type {
            PayloadType::Can | PayloadType::CanFd => data.is_can_message(),
            PayloadType::Analog if data.is_numeric_scalar() => match derive_analog_encoding(data) {
                Some(encoding) => {
                    self.unit_code = self.units.code_or_none(data.unit.as_deref());
                    self.analog = Some(encoding);
                    self.signal_connected = true;
                    true
                }
                None => false,
            },
            _ => false,
        };

        self.state = if valid {
            info!("스트림 연결: {:?}", self.payload_type);
            StreamState::Connected
        } else {
            warn!(
                "기술자 모양 불일치: payload_type={:?}, sample_type={:?}",
                self.payload_type, data.sample_type
            );
            StreamState::Invalid
        };
        self.state
    }

    /// 데이터 묶음 -> 패킷
    ///
    /// 연결 상태가 아니거나 묶음 종류가 페이로드 타입과 맞지 않으면 빈 목록.
    pub fn translate(&self, interface_id: u32, batch: &DataBatch) -> Vec<Packet> {
        if self.state != StreamState::Connected {
            debug!("연결되지 않은 스트림의 데이터 무시: {:?}", self.state);
            return Vec::new();
        }
        let Some(domain) = self.domain_descriptor else {
            return Vec::new();
        };

        match (self.payload_type, batch) {
            (PayloadType::Can | PayloadType::CanFd, DataBatch::Can(samples)) => {
                let fd = self.payload_type == PayloadType::CanFd;
                let max_len = if fd { CAN_FD_MAX_DATA_LEN } else { CAN_MAX_DATA_LEN };

                samples
                    .iter()
                    .filter_map(|sample| {
                        let len = sample.length as usize;
                        if len > max_len {
                            debug!(
                                "CAN 프레임 버림: id={:#x}, length={} (최대 {})",
                                sample.arbitration_id, len, max_len
                            );
                            return None;
                        }
                        let can = CanPayload::new(sample.arbitration_id, sample.data[..len].to_vec())
                            .with_extended(sample.arbitration_id > CAN_STANDARD_ID_MAX);
                        let payload = if fd { Payload::CanFd(can) } else { Payload::Can(can) };
                        Some(Packet::new(interface_id, domain.ticks_to_ns(sample.tick), payload))
                    })
                    .collect()
            }
            (PayloadType::Analog, DataBatch::Analog { start_tick, samples }) => {
                let Some(encoding) = self.analog else {
                    return Vec::new();
                };
                let analog = AnalogPayload {
                    sample_type: encoding.sample_type(),
                    unit: self.unit_code,
                    sample_interval: domain.sample_interval_secs() as f32,
                    offset: encoding.offset() as f32,
                    scale: encoding.scale() as f32,
                    samples: samples.iter().map(|&v| encoding.encode_sample(v)).collect(),
                    ..AnalogPayload::default()
                };
                vec![Packet::new(
                    interface_id,
                    domain.ticks_to_ns(*start_tick),
                    Payload::Analog(analog),
                )]
            }
            (payload_type, _) => {
                warn!("데이터 묶음 종류 불일치: {:?}", payload_type);
                Vec::new()
            }
        }
    }
}

/// f32 와이어 값과 같게 양자화
fn wire_f32(value: f64) -> f64 {
    value as f32 as f64
}

fn derive_analog_encoding(data: &DataDescriptor) -> Option<AnalogEncoding> {
    if let Some(post) = data.post_scaling {
        let sample_type = match post.raw_type {
            SampleType::Int8 | SampleType::Int16 => AnalogSampleType::Int16,
            SampleType::UInt8 | SampleType::UInt16 | SampleType::Int32 => AnalogSampleType::Int32,
            other => {
                warn!("지원하지 않는 후처리 원시 타입: {:?}", other);
                return None;
            }
        };
        return Some(AnalogEncoding::Direct {
            sample_type,
            scale: post.scale,
            offset: post.offset,
        });
    }

    let direct = |sample_type| AnalogEncoding::Direct {
        sample_type,
        scale: 1.0,
        offset: 0.0,
    };

    match data.sample_type {
        SampleType::Int8 | SampleType::Int16 => return Some(direct(AnalogSampleType::Int16)),
        SampleType::UInt8 | SampleType::UInt16 | SampleType::Int32 => {
            return Some(direct(AnalogSampleType::Int32))
        }
        _ => {}
    }

    let range = data.value_range.filter(|r| r.is_valid());

    if data.sample_type.is_integer() {
        if let Some(range) = range {
            if range.fits_within(i16::MIN as f64, i16::MAX as f64) {
                return Some(direct(AnalogSampleType::Int16));
            }
            if range.fits_within(i32::MIN as f64, i32::MAX as f64) {
                return Some(direct(AnalogSampleType::Int32));
            }
        }
    }

    match range {
        Some(range) => {
            let scale = wire_f32((range.high - range.low) / RESCALE_STEPS);
            if scale <= 0.0 || !scale.is_finite() {
                return None;
            }
            debug!(
                "아날로그 내부 재스케일: range=[{}, {}], scale={}",
                range.low, range.high, scale
            );
            Some(AnalogEncoding::Rescaled {
                scale,
                offset: wire_f32(range.low),
            })
        }
        None => {
            warn!("값 범위 없음, 아날로그 인코딩 불가: {:?}", data.sample_type);
            None
        }
    }
}
