//! CMP 패킷과 헤더 정의
//!
//! 프레임 구조:
//!
//! ```text
//! +------------------+------------------+---------+------------------+---------+----
//! | CMP 헤더 (8)     | 메시지 헤더 (16) | 페이로드 | 메시지 헤더 (16) | 페이로드 | ...
//! +------------------+------------------+---------+------------------+---------+----
//! ```
//!
//! CMP 헤더는 프레임당 하나, 메시지는 여러 개가 이어질 수 있다.

use bytes::{Buf, BufMut, BytesMut};

use crate::payload::Payload;
use crate::CMP_VERSION;

/// CMP 헤더 크기
pub const CMP_HEADER_LEN: usize = 8;

/// 메시지 헤더 크기
pub const MESSAGE_HEADER_LEN: usize = 16;

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// 버스 데이터
    Data,

    /// 제어 메시지
    Control,

    /// 상태 메시지 (캡처 모듈 / 인터페이스)
    Status,

    /// 벤더 정의
    Vendor,

    Unknown(u8),
}

impl MessageType {
    pub fn to_raw(self) -> u8 {
        match self {
            MessageType::Data => 0x01,
            MessageType::Control => 0x02,
            MessageType::Status => 0x03,
            MessageType::Vendor => 0xFF,
            MessageType::Unknown(raw) => raw,
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => MessageType::Data,
            0x02 => MessageType::Control,
            0x03 => MessageType::Status,
            0xFF => MessageType::Vendor,
            other => MessageType::Unknown(other),
        }
    }
}

/// 페이로드 타입
///
/// 같은 원시 코드가 메시지 타입에 따라 다른 의미를 가진다
/// (데이터 0x01 = CAN, 상태 0x01 = 캡처 모듈 상태).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Invalid,
    Can,
    CanFd,
    Analog,
    CaptureModuleStatus,
    InterfaceStatus,
    Other(u8),
}

impl PayloadType {
    pub fn to_raw(self) -> u8 {
        match self {
            PayloadType::Invalid => 0x00,
            PayloadType::Can => 0x01,
            PayloadType::CanFd => 0x02,
            PayloadType::Analog => 0x07,
            PayloadType::CaptureModuleStatus => 0x01,
            PayloadType::InterfaceStatus => 0x02,
            PayloadType::Other(raw) => raw,
        }
    }

    pub fn from_raw(message_type: MessageType, raw: u8) -> Self {
        match (message_type, raw) {
            (_, 0x00) => PayloadType::Invalid,
            (MessageType::Data, 0x01) => PayloadType::Can,
            (MessageType::Data, 0x02) => PayloadType::CanFd,
            (MessageType::Data, 0x07) => PayloadType::Analog,
            (MessageType::Status, 0x01) => PayloadType::CaptureModuleStatus,
            (MessageType::Status, 0x02) => PayloadType::InterfaceStatus,
            (_, other) => PayloadType::Other(other),
        }
    }

    /// 이 페이로드를 실어야 하는 메시지 타입
    pub fn message_type(self) -> Option<MessageType> {
        match self {
            PayloadType::Can | PayloadType::CanFd | PayloadType::Analog => Some(MessageType::Data),
            PayloadType::CaptureModuleStatus | PayloadType::InterfaceStatus => {
                Some(MessageType::Status)
            }
            PayloadType::Invalid | PayloadType::Other(_) => None,
        }
    }
}

/// 세그먼트 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Segmentation {
    #[default]
    Unsegmented,
    First,
    Intermediary,
    Last,
}

impl Segmentation {
    fn to_bits(self) -> u8 {
        match self {
            Segmentation::Unsegmented => 0b00,
            Segmentation::First => 0b01,
            Segmentation::Intermediary => 0b10,
            Segmentation::Last => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Segmentation::Unsegmented,
            0b01 => Segmentation::First,
            0b10 => Segmentation::Intermediary,
            _ => Segmentation::Last,
        }
    }
}

/// 메시지 공통 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CommonFlags(u8);

impl CommonFlags {
    pub const RECALC: u8 = 0x01;
    pub const INSYNC: u8 = 0x02;
    pub const SEGMENTATION_MASK: u8 = 0x0C;
    pub const DIAG_ON_IF: u8 = 0x10;
    pub const OVERFLOW: u8 = 0x20;
    pub const ERROR_IN_PAYLOAD: u8 = 0x40;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    pub fn segmentation(self) -> Segmentation {
        Segmentation::from_bits((self.0 & Self::SEGMENTATION_MASK) >> 2)
    }

    pub fn with_segmentation(self, seg: Segmentation) -> Self {
        Self((self.0 & !Self::SEGMENTATION_MASK) | (seg.to_bits() << 2))
    }
}

/// CMP 헤더 (프레임당 하나)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmpHeader {
    pub version: u8,
    pub device_id: u16,
    pub message_type: MessageType,
    pub stream_id: u8,
    /// 슬롯별 프레임 시퀀스 카운터
    pub sequence: u16,
}

impl CmpHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(0); // reserved
        buf.put_u16(self.device_id);
        buf.put_u8(self.message_type.to_raw());
        buf.put_u8(self.stream_id);
        buf.put_u16(self.sequence);
    }

    pub fn parse(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < CMP_HEADER_LEN {
            return None;
        }
        let version = buf.get_u8();
        buf.advance(1); // reserved
        Some(Self {
            version,
            device_id: buf.get_u16(),
            message_type: MessageType::from_raw(buf.get_u8()),
            stream_id: buf.get_u8(),
            sequence: buf.get_u16(),
        })
    }
}

/// 메시지 헤더 (메시지당 하나)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// 타임스탬프 (ns)
    pub timestamp: u64,
    pub interface_id: u32,
    pub flags: CommonFlags,
    pub payload_type: u8,
    /// 이 메시지(세그먼트)의 페이로드 길이
    pub payload_length: u16,
}

impl MessageHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u64(self.timestamp);
        buf.put_u32(self.interface_id);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.payload_type);
        buf.put_u16(self.payload_length);
    }

    pub fn parse(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < MESSAGE_HEADER_LEN {
            return None;
        }
        Some(Self {
            timestamp: buf.get_u64(),
            interface_id: buf.get_u32(),
            flags: CommonFlags::from_bits(buf.get_u8()),
            payload_type: buf.get_u8(),
            payload_length: buf.get_u16(),
        })
    }
}

/// 논리 패킷 (헤더 + 타입 페이로드)
///
/// 세그먼트는 인코더/디코더 내부 사정이라 여기 플래그에는 남지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub message_type: MessageType,
    pub device_id: u16,
    pub interface_id: u32,
    pub stream_id: u8,
    /// 타임스탬프 (ns)
    pub timestamp: u64,
    pub flags: CommonFlags,
    pub payload: Payload,
}

impl Packet {
    /// 페이로드에 맞는 메시지 타입으로 패킷 생성
    ///
    /// 장치/스트림 ID는 송신 시 인코더 슬롯이 채운다.
    pub fn new(interface_id: u32, timestamp: u64, payload: Payload) -> Self {
        let message_type = payload
            .payload_type()
            .message_type()
            .unwrap_or(MessageType::Data);
        Self {
            version: CMP_VERSION,
            message_type,
            device_id: 0,
            interface_id,
            stream_id: 0,
            timestamp,
            flags: CommonFlags::default(),
            payload,
        }
    }

    pub fn with_address(mut self, device_id: u16, stream_id: u8) -> Self {
        self.device_id = device_id;
        self.stream_id = stream_id;
        self
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    /// 구조 검증
    ///
    /// 알려진 메시지 타입(데이터/상태), 버전 일치, 페이로드 길이 정합,
    /// 페이로드 종류와 메시지 타입의 짝이 맞아야 유효하다.
    pub fn is_valid(&self) -> bool {
        if self.version != CMP_VERSION {
            return false;
        }
        if !matches!(self.message_type, MessageType::Data | MessageType::Status) {
            return false;
        }
        if self.payload.payload_type().message_type() != Some(self.message_type) {
            return false;
        }
        self.payload.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CanPayload, InterfaceStatusPayload};

    #[test]
    fn test_cmp_header_layout() {
        let header = CmpHeader {
            version: 1,
            device_id: 0x1234,
            message_type: MessageType::Data,
            stream_id: 2,
            sequence: 0xABCD,
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(buf.as_ref(), &[0x01, 0x00, 0x12, 0x34, 0x01, 0x02, 0xAB, 0xCD]);

        let parsed = CmpHeader::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_message_header_layout() {
        let header = MessageHeader {
            timestamp: 0x0102_0304_0506_0708,
            interface_id: 1,
            flags: CommonFlags::default().with_segmentation(Segmentation::Last),
            payload_type: 0x07,
            payload_length: 300,
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(
            buf.as_ref(),
            &[
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // timestamp
                0x00, 0x00, 0x00, 0x01, // interface
                0x0C, // flags: segmentation = last
                0x07, // analog
                0x01, 0x2C, // length
            ]
        );
        assert_eq!(MessageHeader::parse(&mut buf.freeze()), Some(header));
    }

    #[test]
    fn test_flags_segmentation_bits() {
        let flags = CommonFlags::from_bits(CommonFlags::INSYNC | CommonFlags::OVERFLOW);
        let seg = flags.with_segmentation(Segmentation::Intermediary);
        assert_eq!(seg.segmentation(), Segmentation::Intermediary);
        assert!(seg.contains(CommonFlags::INSYNC));
        assert!(seg.contains(CommonFlags::OVERFLOW));
        assert_eq!(
            seg.with_segmentation(Segmentation::Unsegmented),
            flags
        );
    }

    #[test]
    fn test_payload_type_depends_on_message_type() {
        assert_eq!(PayloadType::from_raw(MessageType::Data, 0x01), PayloadType::Can);
        assert_eq!(
            PayloadType::from_raw(MessageType::Status, 0x01),
            PayloadType::CaptureModuleStatus
        );
        assert_eq!(PayloadType::from_raw(MessageType::Status, 0x07), PayloadType::Other(0x07));
        assert_eq!(PayloadType::from_raw(MessageType::Data, 0x00), PayloadType::Invalid);
    }

    #[test]
    fn test_packet_validity() {
        let packet = Packet::new(1, 0, Payload::Can(CanPayload::new(1, vec![1])));
        assert_eq!(packet.message_type, MessageType::Data);
        assert!(packet.is_valid());

        let mut wrong_type = packet.clone();
        wrong_type.message_type = MessageType::Status;
        assert!(!wrong_type.is_valid());

        let mut wrong_version = packet.clone();
        wrong_version.version = 2;
        assert!(!wrong_version.is_valid());

        let status = Packet::new(1, 0, Payload::InterfaceStatus(InterfaceStatusPayload::default()));
        assert_eq!(status.message_type, MessageType::Status);
        assert!(status.is_valid());
    }
}
