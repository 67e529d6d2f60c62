//! CMP 인코더
//!
//! - 슬롯: (장치 ID, 스트림 ID)에 고정된 인코더. 패킷의 장치/스트림 ID는 무시
//! - 패킹: 작은 패킷 여러 개를 한 프레임에 채움
//! - 세그먼트: 한 프레임에 안 들어가는 페이로드는 여러 프레임으로 분할
//!
//! 슬롯마다 독립된 락을 두어 다른 슬롯의 인코딩은 서로 막지 않고,
//! 같은 슬롯의 인코딩은 직렬화된다.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::packet::{
    CmpHeader, MessageHeader, MessageType, Packet, PayloadType, Segmentation, CMP_HEADER_LEN,
    MESSAGE_HEADER_LEN,
};
use crate::{Error, Result, CMP_VERSION, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MIN_FRAME_SIZE, MAX_STREAMS};

/// 프레임 크기 제약 (이더넷 페이로드 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConstraints {
    pub min_frame_size: usize,
    pub max_frame_size: usize,
}

impl FrameConstraints {
    pub fn new(min_frame_size: usize, max_frame_size: usize) -> Self {
        Self {
            min_frame_size,
            max_frame_size,
        }
    }

    /// 제약 검증
    ///
    /// 최소 > 최대이거나, 최대가 헤더 두 개와 1바이트도 못 담으면 설정 오류.
    pub fn validate(&self) -> Result<()> {
        if self.min_frame_size > self.max_frame_size
            || self.max_frame_size <= CMP_HEADER_LEN + MESSAGE_HEADER_LEN
        {
            return Err(Error::InvalidFrameConstraints {
                min: self.min_frame_size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// 세그먼트 하나에 실을 수 있는 페이로드 바이트 수
    pub fn segment_capacity(&self) -> usize {
        (self.max_frame_size - CMP_HEADER_LEN - MESSAGE_HEADER_LEN).min(u16::MAX as usize)
    }
}

impl Default for FrameConstraints {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE)
    }
}

/// 단일 슬롯 인코더
#[derive(Debug)]
pub struct Encoder {
    slot: usize,
    device_id: u16,
    stream_id: u8,
    /// 허용 페이로드 타입 (None이면 제한 없음)
    payload_type: Option<PayloadType>,
    /// 다음 프레임 시퀀스
    sequence: u16,
}

impl Encoder {
    pub fn new(device_id: u16, stream_id: u8) -> Self {
        Self {
            slot: stream_id as usize,
            device_id,
            stream_id,
            payload_type: None,
            sequence: 0,
        }
    }

    pub fn with_payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    fn with_slot(mut self, slot: usize) -> Self {
        self.slot = slot;
        self
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn stream_id(&self) -> u8 {
        self.stream_id
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.payload_type
    }

    /// 패킷들을 프레임으로 인코딩
    pub fn encode(&mut self, packets: &[Packet], constraints: &FrameConstraints) -> Result<Vec<Bytes>> {
        constraints.validate()?;
        let capacity = constraints.segment_capacity();

        let mut frames = Vec::new();
        let mut current: Option<(MessageType, BytesMut)> = None;

        for packet in packets {
            self.check_payload(packet)?;

            let body = packet.payload.to_bytes();
            let message_len = MESSAGE_HEADER_LEN + body.len();

            if body.len() <= capacity {
                let fits = matches!(
                    &current,
                    Some((message_type, buf))
                        if *message_type == packet.message_type
                            && buf.len() + message_len <= constraints.max_frame_size
                );
                if !fits {
                    if let Some((_, buf)) = current.take() {
                        frames.push(finish_frame(buf, constraints));
                    }
                    current = Some((packet.message_type, self.start_frame(packet.message_type)));
                }
                if let Some((_, buf)) = current.as_mut() {
                    write_message(buf, packet, Segmentation::Unsegmented, &body);
                }
            } else {
                if let Some((_, buf)) = current.take() {
                    frames.push(finish_frame(buf, constraints));
                }

                let count = (body.len() + capacity - 1) / capacity;
                debug!(
                    "페이로드 분할: slot={}, {} bytes -> {} segments",
                    self.slot,
                    body.len(),
                    count
                );

                for (idx, segment) in body.chunks(capacity).enumerate() {
                    let position = if idx == 0 {
                        Segmentation::First
                    } else if idx + 1 == count {
                        Segmentation::Last
                    } else {
                        Segmentation::Intermediary
                    };
                    let mut buf = self.start_frame(packet.message_type);
                    write_message(&mut buf, packet, position, segment);
                    frames.push(finish_frame(buf, constraints));
                }
            }
        }

        if let Some((_, buf)) = current.take() {
            frames.push(finish_frame(buf, constraints));
        }

        Ok(frames)
    }

    fn check_payload(&self, packet: &Packet) -> Result<()> {
        let got = packet.payload_type();
        if let Some(expected) = self.payload_type {
            if expected != got {
                return Err(Error::PayloadTypeMismatch {
                    slot: self.slot,
                    expected,
                    got,
                });
            }
        }
        if !packet.payload.is_valid() {
            return Err(Error::InvalidPayload { payload_type: got });
        }
        Ok(())
    }

    fn start_frame(&mut self, message_type: MessageType) -> BytesMut {
        let mut buf = BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE);
        CmpHeader {
            version: CMP_VERSION,
            device_id: self.device_id,
            message_type,
            stream_id: self.stream_id,
            sequence: self.sequence,
        }
        .write_to(&mut buf);
        self.sequence = self.sequence.wrapping_add(1);
        buf
    }
}

fn write_message(buf: &mut BytesMut, packet: &Packet, position: Segmentation, body: &[u8]) {
    MessageHeader {
        timestamp: packet.timestamp,
        interface_id: packet.interface_id,
        flags: packet.flags.with_segmentation(position),
        payload_type: packet.payload.raw_type(),
        payload_length: body.len() as u16,
    }
    .write_to(buf);
    buf.put_slice(body);
}

/// 최소 크기까지 0으로 패딩
fn finish_frame(mut buf: BytesMut, constraints: &FrameConstraints) -> Bytes {
    if buf.len() < constraints.min_frame_size {
        buf.resize(constraints.min_frame_size, 0);
    }
    buf.freeze()
}

/// 고정 크기 인코더 슬롯 테이블
///
/// 슬롯 하나에 락 하나. 슬롯 인덱스는 보통 스트림 ID와 같다.
pub struct EncoderBank {
    slots: Vec<Mutex<Option<Encoder>>>,
}

impl EncoderBank {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, slot: usize) -> Result<&Mutex<Option<Encoder>>> {
        self.slots.get(slot).ok_or(Error::SlotOutOfRange {
            slot,
            max: self.slots.len(),
        })
    }

    /// 슬롯을 (장치, 스트림)에 묶음. 시퀀스는 0부터 다시 시작
    pub fn configure(
        &self,
        slot: usize,
        device_id: u16,
        stream_id: u8,
        payload_type: Option<PayloadType>,
    ) -> Result<()> {
        let mut encoder = Encoder::new(device_id, stream_id).with_slot(slot);
        encoder.payload_type = payload_type;
        *self.slot(slot)?.lock() = Some(encoder);
        Ok(())
    }

    /// 시퀀스를 유지한 채 허용 페이로드 타입만 변경
    pub fn set_payload_type(&self, slot: usize, payload_type: Option<PayloadType>) -> Result<()> {
        let mut guard = self.slot(slot)?.lock();
        let encoder = guard.as_mut().ok_or(Error::SlotNotConfigured { slot })?;
        encoder.payload_type = payload_type;
        Ok(())
    }

    pub fn release(&self, slot: usize) {
        if let Some(entry) = self.slots.get(slot) {
            *entry.lock() = None;
        }
    }

    pub fn is_configured(&self, slot: usize) -> bool {
        self.slots.get(slot).map_or(false, |entry| entry.lock().is_some())
    }

    /// 지정 슬롯에서 인코딩
    pub fn encode(
        &self,
        slot: usize,
        packets: &[Packet],
        constraints: &FrameConstraints,
    ) -> Result<Vec<Bytes>> {
        let mut guard = self.slot(slot)?.lock();
        let encoder = guard.as_mut().ok_or(Error::SlotNotConfigured { slot })?;
        encoder.encode(packets, constraints)
    }
}

impl Default for EncoderBank {
    fn default() -> Self {
        Self::new(MAX_STREAMS)
    }
}
