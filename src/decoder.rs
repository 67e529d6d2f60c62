//! CMP 디코더
//!
//! - 프레임 하나 = CMP 헤더 + 메시지 여러 개
//! - 분할된 메시지는 (장치, 인터페이스, 스트림) 단위로 버퍼링 후 조립
//! - 구조가 깨진 메시지는 에러 대신 유효하지 않은 패킷으로 반환

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::packet::{CmpHeader, MessageHeader, Packet, Segmentation, MESSAGE_HEADER_LEN};
use crate::payload::{Payload, UndefinedPayload};

/// 재조립 버퍼 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SegmentKey {
    device_id: u16,
    interface_id: u32,
    stream_id: u8,
}

/// 조립 중인 메시지
#[derive(Debug)]
struct PendingMessage {
    cmp: CmpHeader,
    header: MessageHeader,
    data: BytesMut,
    /// 다음 세그먼트가 가져야 할 프레임 시퀀스
    next_sequence: u16,
    created_at: Instant,
}

/// 세그먼트 이어붙이기 결과
enum Continuation {
    Appended,
    Completed,
    Broken,
    Orphan,
}

/// 디코더
pub struct Decoder {
    pending: DashMap<SegmentKey, PendingMessage>,
    reassembly_timeout: Duration,
}

impl Decoder {
    pub fn new(reassembly_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            reassembly_timeout,
        }
    }

    /// 프레임 하나(이더넷 페이로드)를 디코딩
    pub fn decode(&self, frame: &[u8]) -> Vec<Arc<Packet>> {
        self.purge_stale();

        let mut buf = Bytes::copy_from_slice(frame);
        let cmp = match CmpHeader::parse(&mut buf) {
            Some(cmp) => cmp,
            None => {
                debug!("CMP 헤더보다 짧은 프레임: {} bytes", frame.len());
                return Vec::new();
            }
        };

        let mut packets = Vec::new();

        while buf.remaining() >= MESSAGE_HEADER_LEN {
            if buf.iter().all(|&b| b == 0) {
                break; // 패딩
            }

            let header = match MessageHeader::parse(&mut buf) {
                Some(header) => header,
                None => break,
            };
            let len = header.payload_length as usize;

            if len > buf.remaining() {
                warn!(
                    "잘린 메시지: device={}, stream={}, declared={} bytes, remaining={} bytes",
                    cmp.device_id,
                    cmp.stream_id,
                    len,
                    buf.remaining()
                );
                let data = buf.split_to(buf.remaining());
                packets.push(Arc::new(build_packet(
                    &cmp,
                    &header,
                    Payload::Undefined(UndefinedPayload {
                        raw_type: header.payload_type,
                        data,
                    }),
                )));
                break;
            }

            let body = buf.split_to(len);
            match header.flags.segmentation() {
                Segmentation::Unsegmented => {
                    let payload = Payload::parse(cmp.message_type, header.payload_type, body);
                    packets.push(Arc::new(build_packet(&cmp, &header, payload)));
                }
                Segmentation::First => self.start_message(cmp, header, body),
                position => {
                    if let Some(packet) = self.continue_message(&cmp, &header, position, &body) {
                        packets.push(Arc::new(packet));
                    }
                }
            }
        }

        packets
    }

    /// 여러 프레임을 순서대로 디코딩
    pub fn decode_all<'a, I>(&self, frames: I) -> Vec<Arc<Packet>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        frames
            .into_iter()
            .flat_map(|frame| self.decode(frame))
            .collect()
    }

    fn start_message(&self, cmp: CmpHeader, header: MessageHeader, body: Bytes) {
        let key = segment_key(&cmp, &header);
        let mut data = BytesMut::with_capacity(body.len() * 4);
        data.extend_from_slice(&body);

        let previous = self.pending.insert(
            key,
            PendingMessage {
                cmp,
                header,
                data,
                next_sequence: cmp.sequence.wrapping_add(1),
                created_at: Instant::now(),
            },
        );
        if previous.is_some() {
            debug!("미완성 메시지 폐기 (새 첫 세그먼트): {:?}", key);
        }
    }

    fn continue_message(
        &self,
        cmp: &CmpHeader,
        header: &MessageHeader,
        position: Segmentation,
        body: &[u8],
    ) -> Option<Packet> {
        let key = segment_key(cmp, header);

        let outcome = match self.pending.get_mut(&key) {
            Some(mut pending) if pending.next_sequence == cmp.sequence => {
                pending.data.extend_from_slice(body);
                pending.next_sequence = cmp.sequence.wrapping_add(1);
                if position == Segmentation::Last {
                    Continuation::Completed
                } else {
                    Continuation::Appended
                }
            }
            Some(_) => Continuation::Broken,
            None => Continuation::Orphan,
        };

        match outcome {
            Continuation::Appended => None,
            Continuation::Completed => {
                let (_, pending) = self.pending.remove(&key)?;
                let payload = Payload::parse(
                    pending.cmp.message_type,
                    pending.header.payload_type,
                    pending.data.freeze(),
                );
                Some(build_packet(&pending.cmp, &pending.header, payload))
            }
            Continuation::Broken => {
                warn!("세그먼트 시퀀스 불연속: {:?}, seq={}", key, cmp.sequence);
                self.pending.remove(&key);
                None
            }
            Continuation::Orphan => {
                debug!("첫 세그먼트 없는 세그먼트 무시: {:?}, seq={}", key, cmp.sequence);
                None
            }
        }
    }

    /// 오래된 재조립 버퍼 정리
    pub fn purge_stale(&self) -> usize {
        let before = self.pending.len();
        let timeout = self.reassembly_timeout;
        self.pending.retain(|key, pending| {
            let alive = pending.created_at.elapsed() < timeout;
            if !alive {
                warn!(
                    "재조립 타임아웃: {:?}, {} bytes 수신",
                    key,
                    pending.data.len()
                );
            }
            alive
        });
        before.saturating_sub(self.pending.len())
    }

    /// 조립 중인 메시지 수
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&self) {
        self.pending.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

fn segment_key(cmp: &CmpHeader, header: &MessageHeader) -> SegmentKey {
    SegmentKey {
        device_id: cmp.device_id,
        interface_id: header.interface_id,
        stream_id: cmp.stream_id,
    }
}

fn build_packet(cmp: &CmpHeader, header: &MessageHeader, payload: Payload) -> Packet {
    Packet {
        version: cmp.version,
        message_type: cmp.message_type,
        device_id: cmp.device_id,
        interface_id: header.interface_id,
        stream_id: cmp.stream_id,
        timestamp: header.timestamp,
        flags: header.flags.with_segmentation(Segmentation::Unsegmented),
        payload,
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("pending", &self.pending.len())
            .field("reassembly_timeout", &self.reassembly_timeout)
            .finish()
    }
}
