//! CMP 페이로드 정의
//!
//! 페이로드는 닫힌 태그 유니온이다. 직렬화/역직렬화는 `Payload`의
//! match 하나에서 처리해 바이트 레이아웃을 한 곳에서 볼 수 있게 한다.
//!
//! - CAN / CAN-FD: 16바이트 헤더 + 데이터
//! - Analog: 17바이트 헤더 + 샘플 (int16 또는 int32)
//! - CaptureModuleStatus: 26바이트 헤더 + 길이 접두 문자열 4개 + 벤더 데이터
//! - InterfaceStatus: 34바이트 헤더 + 스트림 ID 목록 + 벤더 데이터
//!
//! 모든 필드는 빅엔디안.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::{MessageType, PayloadType};

/// CAN 최대 데이터 길이
pub const CAN_MAX_DATA_LEN: usize = 8;

/// CAN-FD 최대 데이터 길이
pub const CAN_FD_MAX_DATA_LEN: usize = 64;

pub const CAN_HEADER_LEN: usize = 16;
pub const ANALOG_HEADER_LEN: usize = 17;
pub const CM_STATUS_HEADER_LEN: usize = 26;
pub const IF_STATUS_HEADER_LEN: usize = 34;

/// CAN ID 필드의 식별자 비트 (29비트)
pub const CAN_ID_MASK: u32 = 0x1FFF_FFFF;
/// RTR/RRS 비트
pub const CAN_RTR_FLAG: u32 = 1 << 30;
/// IDE (확장 프레임) 비트
pub const CAN_IDE_FLAG: u32 = 1 << 31;

/// CAN / CAN-FD 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanPayload {
    /// 에러/상태 플래그
    pub flags: u16,

    /// ID 필드 (식별자 + RTR/IDE 비트)
    pub id: u32,

    /// 버스에서 읽은 CRC
    pub crc: u32,

    /// 에러 위치 (비트 단위)
    pub error_position: u16,

    /// 프레임 데이터
    pub data: Bytes,
}

impl CanPayload {
    pub fn new(arbitration_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            id: arbitration_id & CAN_ID_MASK,
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn arbitration_id(&self) -> u32 {
        self.id & CAN_ID_MASK
    }

    pub fn is_extended(&self) -> bool {
        self.id & CAN_IDE_FLAG != 0
    }

    pub fn is_remote(&self) -> bool {
        self.id & CAN_RTR_FLAG != 0
    }

    /// 확장 프레임 표시
    pub fn with_extended(mut self, extended: bool) -> Self {
        if extended {
            self.id |= CAN_IDE_FLAG;
        } else {
            self.id &= !CAN_IDE_FLAG;
        }
        self
    }

    pub fn data_length(&self) -> usize {
        self.data.len()
    }
}

/// 데이터 길이 -> DLC (CAN-FD 규칙, CAN은 길이 그대로)
pub fn length_to_dlc(len: usize) -> u8 {
    match len {
        0..=8 => len as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}

/// 아날로그 샘플의 전송 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalogSampleType {
    #[default]
    Int16,
    Int32,
}

impl AnalogSampleType {
    pub fn to_raw(self) -> u8 {
        match self {
            AnalogSampleType::Int16 => 0x00,
            AnalogSampleType::Int32 => 0x01,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(AnalogSampleType::Int16),
            0x01 => Some(AnalogSampleType::Int32),
            _ => None,
        }
    }

    /// 샘플당 바이트 수
    pub fn width(self) -> usize {
        match self {
            AnalogSampleType::Int16 => 2,
            AnalogSampleType::Int32 => 4,
        }
    }
}

/// 아날로그 페이로드
///
/// 물리값 = raw * scale + offset
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalogPayload {
    pub flags: u16,
    pub sample_type: AnalogSampleType,
    /// 단위 코드 (`UnitConverter` 참고)
    pub unit: u8,
    /// 샘플 간격 (초)
    pub sample_interval: f32,
    pub offset: f32,
    pub scale: f32,
    /// 원시 샘플. Int16이면 i16 범위 안이어야 함
    pub samples: Vec<i32>,
}

impl AnalogPayload {
    pub fn physical_values(&self) -> Vec<f64> {
        let scale = self.scale as f64;
        let offset = self.offset as f64;
        self.samples
            .iter()
            .map(|&raw| raw as f64 * scale + offset)
            .collect()
    }

    fn samples_fit(&self) -> bool {
        match self.sample_type {
            AnalogSampleType::Int32 => true,
            AnalogSampleType::Int16 => self
                .samples
                .iter()
                .all(|&s| s >= i16::MIN as i32 && s <= i16::MAX as i32),
        }
    }
}

/// 캡처 모듈 상태 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureModuleStatusPayload {
    /// 가동 시간 (ns)
    pub uptime_ns: u64,
    pub gm_identity: u64,
    pub gm_clock_quality: u32,
    pub current_utc_offset: u16,
    pub time_source: u8,
    pub domain_number: u8,
    pub gptp_flags: u8,
    pub device_description: String,
    pub serial_number: String,
    pub hardware_version: String,
    pub software_version: String,
    pub vendor_data: Bytes,
}

/// 링크 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Down,
    Up,
    Disabled,
    Other(u8),
}

impl LinkStatus {
    pub fn to_raw(self) -> u8 {
        match self {
            LinkStatus::Down => 0,
            LinkStatus::Up => 1,
            LinkStatus::Disabled => 2,
            LinkStatus::Other(raw) => raw,
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LinkStatus::Down,
            1 => LinkStatus::Up,
            2 => LinkStatus::Disabled,
            other => LinkStatus::Other(other),
        }
    }
}

/// 인터페이스 상태 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceStatusPayload {
    pub interface_id: u32,
    pub msg_total_rx: u32,
    pub msg_total_tx: u32,
    pub msg_dropped_rx: u32,
    pub msg_dropped_tx: u32,
    pub errors_total: u32,
    /// 인터페이스 종류 (데이터 페이로드 타입 코드와 같은 값)
    pub interface_type: u8,
    pub link_status: LinkStatus,
    pub feature_support: u32,
    pub stream_ids: Vec<u8>,
    pub vendor_data: Bytes,
}

/// 해석하지 못한 페이로드 (원본 보존)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UndefinedPayload {
    pub raw_type: u8,
    pub data: Bytes,
}

/// 통합 페이로드 enum
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Can(CanPayload),
    CanFd(CanPayload),
    Analog(AnalogPayload),
    InterfaceStatus(InterfaceStatusPayload),
    CaptureModuleStatus(CaptureModuleStatusPayload),
    Undefined(UndefinedPayload),
}

impl Payload {
    /// 페이로드 타입 반환
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Can(_) => PayloadType::Can,
            Payload::CanFd(_) => PayloadType::CanFd,
            Payload::Analog(_) => PayloadType::Analog,
            Payload::InterfaceStatus(_) => PayloadType::InterfaceStatus,
            Payload::CaptureModuleStatus(_) => PayloadType::CaptureModuleStatus,
            Payload::Undefined(p) if p.raw_type == 0 => PayloadType::Invalid,
            Payload::Undefined(p) => PayloadType::Other(p.raw_type),
        }
    }

    /// 와이어 상의 페이로드 타입 바이트
    pub fn raw_type(&self) -> u8 {
        match self {
            Payload::Undefined(p) => p.raw_type,
            other => other.payload_type().to_raw(),
        }
    }

    /// 구조 검증: 길이 제한, 샘플 범위
    pub fn is_valid(&self) -> bool {
        match self {
            Payload::Can(can) => can.data.len() <= CAN_MAX_DATA_LEN,
            Payload::CanFd(can) => can.data.len() <= CAN_FD_MAX_DATA_LEN,
            Payload::Analog(analog) => analog.samples_fit(),
            Payload::InterfaceStatus(status) => {
                fits_u16(status.stream_ids.len()) && fits_u16(status.vendor_data.len())
            }
            Payload::CaptureModuleStatus(status) => {
                [
                    &status.device_description,
                    &status.serial_number,
                    &status.hardware_version,
                    &status.software_version,
                ]
                .iter()
                .all(|s| fits_u16(padded(s.len())))
                    && fits_u16(status.vendor_data.len())
            }
            Payload::Undefined(_) => false,
        }
    }

    /// 직렬화 후 바이트 수
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Can(can) | Payload::CanFd(can) => CAN_HEADER_LEN + can.data.len(),
            Payload::Analog(analog) => {
                ANALOG_HEADER_LEN + analog.samples.len() * analog.sample_type.width()
            }
            Payload::CaptureModuleStatus(status) => {
                CM_STATUS_HEADER_LEN
                    + string_len(&status.device_description)
                    + string_len(&status.serial_number)
                    + string_len(&status.hardware_version)
                    + string_len(&status.software_version)
                    + 2
                    + status.vendor_data.len()
            }
            Payload::InterfaceStatus(status) => {
                IF_STATUS_HEADER_LEN + padded(status.stream_ids.len()) + 2 + status.vendor_data.len()
            }
            Payload::Undefined(p) => p.data.len(),
        }
    }

    /// 버퍼에 직렬화
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        match self {
            Payload::Can(can) | Payload::CanFd(can) => {
                buf.put_u16(can.flags);
                buf.put_u16(0); // reserved
                buf.put_u32(can.id);
                buf.put_u32(can.crc);
                buf.put_u16(can.error_position);
                buf.put_u8(length_to_dlc(can.data.len()));
                buf.put_u8(can.data.len() as u8);
                buf.put_slice(&can.data);
            }
            Payload::Analog(analog) => {
                buf.put_u16(analog.flags);
                buf.put_u8(0); // reserved
                buf.put_u8(analog.sample_type.to_raw());
                buf.put_u8(analog.unit);
                buf.put_f32(analog.sample_interval);
                buf.put_f32(analog.offset);
                buf.put_f32(analog.scale);
                match analog.sample_type {
                    AnalogSampleType::Int16 => {
                        for &s in &analog.samples {
                            buf.put_i16(s as i16);
                        }
                    }
                    AnalogSampleType::Int32 => {
                        for &s in &analog.samples {
                            buf.put_i32(s);
                        }
                    }
                }
            }
            Payload::CaptureModuleStatus(status) => {
                buf.put_u64(status.uptime_ns);
                buf.put_u64(status.gm_identity);
                buf.put_u32(status.gm_clock_quality);
                buf.put_u16(status.current_utc_offset);
                buf.put_u8(status.time_source);
                buf.put_u8(status.domain_number);
                buf.put_u8(0); // reserved
                buf.put_u8(status.gptp_flags);
                put_string(buf, &status.device_description);
                put_string(buf, &status.serial_number);
                put_string(buf, &status.hardware_version);
                put_string(buf, &status.software_version);
                buf.put_u16(status.vendor_data.len() as u16);
                buf.put_slice(&status.vendor_data);
            }
            Payload::InterfaceStatus(status) => {
                buf.put_u32(status.interface_id);
                buf.put_u32(status.msg_total_rx);
                buf.put_u32(status.msg_total_tx);
                buf.put_u32(status.msg_dropped_rx);
                buf.put_u32(status.msg_dropped_tx);
                buf.put_u32(status.errors_total);
                buf.put_u8(status.interface_type);
                buf.put_u8(status.link_status.to_raw());
                buf.put_u16(0); // reserved
                buf.put_u32(status.feature_support);
                buf.put_u16(status.stream_ids.len() as u16);
                buf.put_slice(&status.stream_ids);
                if status.stream_ids.len() % 2 == 1 {
                    buf.put_u8(0);
                }
                buf.put_u16(status.vendor_data.len() as u16);
                buf.put_slice(&status.vendor_data);
            }
            Payload::Undefined(p) => buf.put_slice(&p.data),
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// 바이트에서 역직렬화
    ///
    /// 구조가 맞지 않으면 원본을 담은 `Undefined`를 돌려준다 (에러 아님).
    pub fn parse(message_type: MessageType, raw_type: u8, body: Bytes) -> Payload {
        let parsed = match PayloadType::from_raw(message_type, raw_type) {
            PayloadType::Can => parse_can(body.clone(), CAN_MAX_DATA_LEN).map(Payload::Can),
            PayloadType::CanFd => parse_can(body.clone(), CAN_FD_MAX_DATA_LEN).map(Payload::CanFd),
            PayloadType::Analog => parse_analog(body.clone()).map(Payload::Analog),
            PayloadType::CaptureModuleStatus => {
                parse_cm_status(body.clone()).map(Payload::CaptureModuleStatus)
            }
            PayloadType::InterfaceStatus => {
                parse_if_status(body.clone()).map(Payload::InterfaceStatus)
            }
            PayloadType::Invalid | PayloadType::Other(_) => None,
        };

        parsed.unwrap_or(Payload::Undefined(UndefinedPayload {
            raw_type,
            data: body,
        }))
    }
}

fn padded(len: usize) -> usize {
    len + len % 2
}

/// u16 길이 필드에 담기는지
fn fits_u16(len: usize) -> bool {
    len <= u16::MAX as usize
}

fn string_len(s: &str) -> usize {
    2 + padded(s.len())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    let len = padded(s.len());
    buf.put_u16(len as u16);
    buf.put_slice(s.as_bytes());
    if len > s.len() {
        buf.put_u8(0);
    }
}

fn get_string(buf: &mut Bytes) -> Option<String> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return None;
    }
    let raw = buf.split_to(len);
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn get_blob(buf: &mut Bytes) -> Option<Bytes> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.split_to(len))
}

fn parse_can(mut buf: Bytes, max_len: usize) -> Option<CanPayload> {
    if buf.remaining() < CAN_HEADER_LEN {
        return None;
    }
    let flags = buf.get_u16();
    buf.advance(2); // reserved
    let id = buf.get_u32();
    let crc = buf.get_u32();
    let error_position = buf.get_u16();
    let _dlc = buf.get_u8();
    let data_len = buf.get_u8() as usize;
    // 선언된 데이터 길이와 본문 길이가 정확히 맞아야 함
    if data_len > max_len || data_len != buf.remaining() {
        return None;
    }

    Some(CanPayload {
        flags,
        id,
        crc,
        error_position,
        data: buf.split_to(data_len),
    })
}

fn parse_analog(mut buf: Bytes) -> Option<AnalogPayload> {
    if buf.remaining() < ANALOG_HEADER_LEN {
        return None;
    }
    let flags = buf.get_u16();
    buf.advance(1); // reserved
    let sample_type = AnalogSampleType::from_raw(buf.get_u8())?;
    let unit = buf.get_u8();
    let sample_interval = buf.get_f32();
    let offset = buf.get_f32();
    let scale = buf.get_f32();

    let width = sample_type.width();
    if buf.remaining() % width != 0 {
        return None;
    }
    let mut samples = Vec::with_capacity(buf.remaining() / width);
    while buf.has_remaining() {
        samples.push(match sample_type {
            AnalogSampleType::Int16 => buf.get_i16() as i32,
            AnalogSampleType::Int32 => buf.get_i32(),
        });
    }

    Some(AnalogPayload {
        flags,
        sample_type,
        unit,
        sample_interval,
        offset,
        scale,
        samples,
    })
}

fn parse_cm_status(mut buf: Bytes) -> Option<CaptureModuleStatusPayload> {
    if buf.remaining() < CM_STATUS_HEADER_LEN {
        return None;
    }
    let uptime_ns = buf.get_u64();
    let gm_identity = buf.get_u64();
    let gm_clock_quality = buf.get_u32();
    let current_utc_offset = buf.get_u16();
    let time_source = buf.get_u8();
    let domain_number = buf.get_u8();
    buf.advance(1); // reserved
    let gptp_flags = buf.get_u8();

    let payload = CaptureModuleStatusPayload {
        uptime_ns,
        gm_identity,
        gm_clock_quality,
        current_utc_offset,
        time_source,
        domain_number,
        gptp_flags,
        device_description: get_string(&mut buf)?,
        serial_number: get_string(&mut buf)?,
        hardware_version: get_string(&mut buf)?,
        software_version: get_string(&mut buf)?,
        vendor_data: get_blob(&mut buf)?,
    };
    if buf.has_remaining() {
        return None;
    }
    Some(payload)
}

fn parse_if_status(mut buf: Bytes) -> Option<InterfaceStatusPayload> {
    if buf.remaining() < IF_STATUS_HEADER_LEN {
        return None;
    }
    let interface_id = buf.get_u32();
    let msg_total_rx = buf.get_u32();
    let msg_total_tx = buf.get_u32();
    let msg_dropped_rx = buf.get_u32();
    let msg_dropped_tx = buf.get_u32();
    let errors_total = buf.get_u32();
    let interface_type = buf.get_u8();
    let link_status = LinkStatus::from_raw(buf.get_u8());
    buf.advance(2); // reserved
    let feature_support = buf.get_u32();
    let stream_count = buf.get_u16() as usize;
    if buf.remaining() < padded(stream_count) {
        return None;
    }
    let stream_ids = buf.split_to(stream_count).to_vec();
    buf.advance(stream_count % 2);
    let vendor_data = get_blob(&mut buf)?;
    if buf.has_remaining() {
        return None;
    }

    Some(InterfaceStatusPayload {
        interface_id,
        msg_total_rx,
        msg_total_tx,
        msg_dropped_rx,
        msg_dropped_tx,
        errors_total,
        interface_type,
        link_status,
        feature_support,
        stream_ids,
        vendor_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_body_layout() {
        let payload = Payload::Can(CanPayload::new(45, vec![0x21]));
        let bytes = payload.to_bytes();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x00, 0x00, // flags
                0x00, 0x00, // reserved
                0x00, 0x00, 0x00, 0x2D, // id
                0x00, 0x00, 0x00, 0x00, // crc
                0x00, 0x00, // error position
                0x01, // dlc
                0x01, // data length
                0x21,
            ]
        );
        assert_eq!(bytes.len(), payload.encoded_len());
    }

    #[test]
    fn test_can_length_limits() {
        let too_long = Payload::Can(CanPayload::new(1, vec![0u8; 9]));
        assert!(!too_long.is_valid());

        let fd = Payload::CanFd(CanPayload::new(1, vec![0u8; 64]));
        assert!(fd.is_valid());
        let parsed = Payload::parse(MessageType::Data, 0x02, fd.to_bytes());
        assert_eq!(parsed, fd);

        // 클래식 CAN 타입으로 64바이트는 해석 불가
        let parsed = Payload::parse(MessageType::Data, 0x01, fd.to_bytes());
        assert!(!parsed.is_valid());
    }

    #[test]
    fn test_dlc_mapping() {
        assert_eq!(length_to_dlc(0), 0);
        assert_eq!(length_to_dlc(8), 8);
        assert_eq!(length_to_dlc(12), 9);
        assert_eq!(length_to_dlc(20), 11);
        assert_eq!(length_to_dlc(48), 14);
        assert_eq!(length_to_dlc(64), 15);
    }

    #[test]
    fn test_can_id_flags() {
        let can = CanPayload::new(0x1234_5678, vec![]).with_extended(true);
        assert!(can.is_extended());
        assert!(!can.is_remote());
        assert_eq!(can.arbitration_id(), 0x1234_5678 & CAN_ID_MASK);
    }

    #[test]
    fn test_analog_layout_and_parse() {
        let analog = AnalogPayload {
            flags: 0,
            sample_type: AnalogSampleType::Int16,
            unit: 0x10,
            sample_interval: 0.001,
            offset: 0.0,
            scale: 1.0,
            samples: vec![1, -1],
        };
        let payload = Payload::Analog(analog);
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), ANALOG_HEADER_LEN + 4);
        assert_eq!(bytes[3], 0x00); // int16
        assert_eq!(bytes[4], 0x10); // unit
        assert_eq!(&bytes[ANALOG_HEADER_LEN..], &[0x00, 0x01, 0xFF, 0xFF]);

        assert_eq!(Payload::parse(MessageType::Data, 0x07, bytes), payload);
    }

    #[test]
    fn test_analog_int16_overflow_invalid() {
        let payload = Payload::Analog(AnalogPayload {
            sample_type: AnalogSampleType::Int16,
            samples: vec![40_000],
            ..AnalogPayload::default()
        });
        assert!(!payload.is_valid());
    }

    #[test]
    fn test_analog_ragged_samples_invalid() {
        let mut raw = BytesMut::new();
        Payload::Analog(AnalogPayload {
            sample_type: AnalogSampleType::Int32,
            samples: vec![7],
            ..AnalogPayload::default()
        })
        .write_to(&mut raw);
        raw.put_u8(0xAA);

        let parsed = Payload::parse(MessageType::Data, 0x07, raw.freeze());
        assert!(matches!(parsed, Payload::Undefined(UndefinedPayload { raw_type: 0x07, .. })));
    }

    #[test]
    fn test_cm_status_strings_padded() {
        let status = CaptureModuleStatusPayload {
            uptime_ns: 5,
            device_description: "abc".into(),
            serial_number: "SN01".into(),
            hardware_version: "hw1".into(),
            software_version: "".into(),
            vendor_data: Bytes::from_static(&[1, 2, 3]),
            ..CaptureModuleStatusPayload::default()
        };
        let payload = Payload::CaptureModuleStatus(status);
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), payload.encoded_len());
        assert_eq!(&bytes[26..32], &[0x00, 0x04, b'a', b'b', b'c', 0x00]);

        assert_eq!(Payload::parse(MessageType::Status, 0x01, bytes), payload);
    }

    #[test]
    fn test_if_status_roundtrip_odd_stream_count() {
        let payload = Payload::InterfaceStatus(InterfaceStatusPayload {
            interface_id: 7,
            msg_total_tx: 100,
            interface_type: PayloadType::Can.to_raw(),
            link_status: LinkStatus::Up,
            stream_ids: vec![1, 2, 3],
            ..InterfaceStatusPayload::default()
        });
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), IF_STATUS_HEADER_LEN + 4 + 2);
        assert_eq!(Payload::parse(MessageType::Status, 0x02, bytes), payload);
    }

    #[test]
    fn test_truncated_status_is_undefined() {
        let payload = Payload::InterfaceStatus(InterfaceStatusPayload {
            stream_ids: vec![1, 2],
            ..InterfaceStatusPayload::default()
        });
        let bytes = payload.to_bytes().slice(..IF_STATUS_HEADER_LEN + 1);
        let parsed = Payload::parse(MessageType::Status, 0x02, bytes);
        assert!(!parsed.is_valid());
    }

    #[test]
    fn test_same_raw_type_differs_by_message_type() {
        let can = Payload::Can(CanPayload::new(1, vec![1]));
        // 17바이트 CAN 본문은 상태 헤더(26바이트)로 읽을 수 없음
        let as_status = Payload::parse(MessageType::Status, 0x01, can.to_bytes());
        assert!(!as_status.is_valid());
        assert_eq!(as_status.raw_type(), 0x01);
        assert_eq!(as_status.payload_type(), PayloadType::Other(0x01));
    }

    #[test]
    fn test_status_length_fields_must_fit_u16() {
        let mut status = CaptureModuleStatusPayload {
            vendor_data: Bytes::from(vec![0u8; 70_000]),
            ..CaptureModuleStatusPayload::default()
        };
        assert!(!Payload::CaptureModuleStatus(status.clone()).is_valid());

        status.vendor_data = Bytes::new();
        status.serial_number = "x".repeat(u16::MAX as usize);
        assert!(!Payload::CaptureModuleStatus(status.clone()).is_valid());

        status.serial_number = "x".repeat(u16::MAX as usize - 1);
        assert!(Payload::CaptureModuleStatus(status).is_valid());

        let interface = InterfaceStatusPayload {
            vendor_data: Bytes::from(vec![0u8; 65_536]),
            ..InterfaceStatusPayload::default()
        };
        assert!(!Payload::InterfaceStatus(interface).is_valid());
    }

    #[test]
    fn test_trailing_bytes_make_payload_undefined() {
        let mut can = BytesMut::new();
        Payload::Can(CanPayload::new(1, vec![1])).write_to(&mut can);
        can.put_slice(&[0xDE, 0xAD, 0xBE]);
        let parsed = Payload::parse(MessageType::Data, 0x01, can.freeze());
        assert!(!parsed.is_valid());

        let mut cm = BytesMut::new();
        Payload::CaptureModuleStatus(CaptureModuleStatusPayload::default()).write_to(&mut cm);
        cm.put_u8(0x55);
        assert!(!Payload::parse(MessageType::Status, 0x01, cm.freeze()).is_valid());

        let mut iface = BytesMut::new();
        Payload::InterfaceStatus(InterfaceStatusPayload::default()).write_to(&mut iface);
        iface.put_u16(0);
        assert!(!Payload::parse(MessageType::Status, 0x02, iface.freeze()).is_valid());
    }
}
