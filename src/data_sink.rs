//! 데이터 싱크 (수신 측 집합체)
//!
//! 프레임 -> 디코더 -> (상태 패킷) 상태 집계기
//!                  -> (데이터 패킷) 라우터 -> ReceiveStream -> 출력 큐

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::decoder::Decoder;
use crate::ethernet;
use crate::packet::{MessageType, Packet, PayloadType};
use crate::payload::Payload;
use crate::router::{EndpointKey, HandlerRef, PacketHandler, Router};
use crate::status::StatusAggregator;
use crate::units::UnitConverter;
use crate::{Config, Result};

/// 복원된 CAN 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanOutput {
    /// 타임스탬프 (ns)
    pub timestamp: u64,
    pub arbitration_id: u32,
    pub extended: bool,
    pub data: Vec<u8>,
}

/// 복원된 아날로그 묶음 (물리값)
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogOutput {
    pub timestamp: u64,
    /// 샘플 간격 (초)
    pub sample_interval: f64,
    pub unit: &'static str,
    pub values: Vec<f64>,
}

/// 수신 스트림 출력
#[derive(Debug, Clone, PartialEq)]
pub enum OutputBatch {
    Can(Vec<CanOutput>),
    Analog(AnalogOutput),
}

/// 수신 측 스트림
///
/// 라우터에 구독된 핸들러. 현재 키와 다른 패킷, 페이로드 타입이 다른 패킷은 버린다.
/// 라우터는 약한 참조만 들고 있으므로 마지막 `Arc`가 사라지면 구독도 해지된다.
pub struct ReceiveStream {
    router: Weak<Router>,
    link: HandlerRef,
    key: Mutex<EndpointKey>,
    payload_type: PayloadType,
    units: UnitConverter,
    tx: Sender<OutputBatch>,
    rx: Receiver<OutputBatch>,
    received: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl ReceiveStream {
    pub fn key(&self) -> EndpointKey {
        *self.key.lock()
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// 받은 패킷 수
    pub fn packets_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// 출력 큐가 가득 차 버린 묶음 수
    pub fn batches_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 페이로드 타입이 달라 거부한 패킷 수
    pub fn packets_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn try_recv(&self) -> Option<OutputBatch> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<OutputBatch> {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Some(batch),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn drain(&self) -> Vec<OutputBatch> {
        self.rx.try_iter().collect()
    }

    /// 키 변경 (라우터 재구독을 한 번에)
    pub fn set_key(&self, new_key: EndpointKey) {
        let mut key = self.key.lock();
        if *key == new_key {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.rebind(&key, new_key, &self.link);
        }
        *key = new_key;
    }

    /// 라우터에서 구독 해지
    pub fn close(&self) {
        let key = *self.key.lock();
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(&key, &self.link);
        }
    }

    fn convert(&self, packets: &[Arc<Packet>]) -> Option<OutputBatch> {
        match self.payload_type {
            PayloadType::Can | PayloadType::CanFd => {
                let frames: Vec<CanOutput> = packets
                    .iter()
                    .filter_map(|packet| match &packet.payload {
                        Payload::Can(can) | Payload::CanFd(can) => Some(CanOutput {
                            timestamp: packet.timestamp,
                            arbitration_id: can.arbitration_id(),
                            extended: can.is_extended(),
                            data: can.data.to_vec(),
                        }),
                        _ => None,
                    })
                    .collect();
                (!frames.is_empty()).then_some(OutputBatch::Can(frames))
            }
            PayloadType::Analog => {
                let mut output: Option<AnalogOutput> = None;
                for packet in packets {
                    let Payload::Analog(analog) = &packet.payload else {
                        continue;
                    };
                    let values = analog.physical_values();
                    match output.as_mut() {
                        Some(out) => out.values.extend(values),
                        None => {
                            output = Some(AnalogOutput {
                                timestamp: packet.timestamp,
                                sample_interval: analog.sample_interval as f64,
                                unit: self.units.to_symbol(analog.unit).unwrap_or(""),
                                values,
                            })
                        }
                    }
                }
                output.map(OutputBatch::Analog)
            }
            _ => None,
        }
    }
}

impl PacketHandler for ReceiveStream {
    fn receive(&self, key: &EndpointKey, packets: &[Arc<Packet>]) {
        let current = self.key();
        if *key != current {
            return;
        }

        let accepted: Vec<Arc<Packet>> = packets
            .iter()
            .filter(|packet| {
                if EndpointKey::from(packet.as_ref()) != current {
                    return false;
                }
                if packet.payload_type() != self.payload_type {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "페이로드 타입 불일치 패킷 버림: {} expected {:?}, got {:?}",
                        current,
                        self.payload_type,
                        packet.payload_type()
                    );
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        if accepted.is_empty() {
            return;
        }
        self.received.fetch_add(accepted.len() as u64, Ordering::Relaxed);

        let Some(batch) = self.convert(&accepted) else {
            return;
        };
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("수신 스트림 출력 큐 가득 참: {}", current);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for ReceiveStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// 라우터에 등록되는 연결 고리
struct StreamLink {
    stream: Weak<ReceiveStream>,
}

impl PacketHandler for StreamLink {
    fn receive(&self, key: &EndpointKey, packets: &[Arc<Packet>]) {
        if let Some(stream) = self.stream.upgrade() {
            stream.receive(key, packets);
        }
    }
}

impl std::fmt::Debug for ReceiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveStream")
            .field("key", &self.key())
            .field("payload_type", &self.payload_type)
            .finish()
    }
}

/// 데이터 싱크
pub struct DataSink {
    config: Config,
    decoder: Decoder,
    router: Arc<Router>,
    status: StatusAggregator,
    frames: AtomicU64,
    invalid_packets: AtomicU64,
}

impl DataSink {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            decoder: Decoder::new(Duration::from_millis(config.reassembly_timeout_ms)),
            config,
            router: Arc::new(Router::new()),
            status: StatusAggregator::new(),
            frames: AtomicU64::new(0),
            invalid_packets: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets.load(Ordering::Relaxed)
    }

    /// CMP 프레임(이더넷 페이로드) 처리. 디코딩된 모든 패킷 반환
    pub fn process_incoming_frame(&self, frame: &[u8]) -> Vec<Arc<Packet>> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let packets = self.decoder.decode(frame);

        let mut data = Vec::with_capacity(packets.len());
        for packet in &packets {
            if !packet.is_valid() {
                self.invalid_packets.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "유효하지 않은 패킷 버림: device={}, interface={}, stream={}, type={:#04x}",
                    packet.device_id,
                    packet.interface_id,
                    packet.stream_id,
                    packet.payload.raw_type()
                );
                continue;
            }
            match packet.message_type {
                MessageType::Status => {
                    self.status.process_status_packet(packet);
                }
                _ => data.push(packet.clone()),
            }
        }

        if !data.is_empty() {
            self.router.dispatch(&data);
        }
        packets
    }

    /// 이더넷 프레임 처리. CMP EtherType이 아니면 무시
    pub fn process_ethernet_frame(&self, frame: &[u8]) -> Vec<Arc<Packet>> {
        match ethernet::unwrap(frame) {
            Some(payload) => self.process_incoming_frame(payload),
            None => Vec::new(),
        }
    }

    pub fn subscribe(&self, key: EndpointKey, handler: HandlerRef) -> bool {
        self.router.subscribe(key, handler)
    }

    pub fn unsubscribe(&self, key: &EndpointKey, handler: &HandlerRef) -> bool {
        self.router.unsubscribe(key, handler)
    }

    /// 수신 스트림 생성 후 구독
    pub fn open_stream(&self, key: EndpointKey, payload_type: PayloadType) -> Arc<ReceiveStream> {
        let (tx, rx) = bounded(self.config.output_queue_capacity);
        let router = Arc::downgrade(&self.router);
        let stream = Arc::new_cyclic(|me| ReceiveStream {
            router,
            link: Arc::new(StreamLink { stream: me.clone() }),
            key: Mutex::new(key),
            payload_type,
            units: UnitConverter::new(),
            tx,
            rx,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });
        self.router.subscribe(key, stream.link.clone());
        debug!("수신 스트림 열림: {} ({:?})", key, payload_type);
        stream
    }

    /// 오래된 재조립 버퍼 정리
    pub fn purge_stale(&self) -> usize {
        self.decoder.purge_stale()
    }
}

impl std::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSink")
            .field("decoder", &self.decoder)
            .field("router", &self.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureModule, DeviceInfo, SendStream};
    use crate::descriptor::{DataDescriptor, DomainDescriptor, SampleType, TickResolution};
    use crate::encoder::{Encoder, FrameConstraints};
    use crate::payload::{CanPayload, InterfaceStatusPayload};
    use crate::stream::{CanSample, DataBatch};
    use crate::transport::loopback;
    use bytes::Bytes;

    fn link() -> (CaptureModule, Receiver<Bytes>, DataSink) {
        let (transport, rx) = loopback([2, 0, 0, 0, 0, 1], 1024);
        let capture = CaptureModule::new(Config::default(), DeviceInfo::new(0, "capture"), transport).unwrap();
        (capture, rx, DataSink::new(Config::default()).unwrap())
    }

    fn pump(rx: &Receiver<Bytes>, sink: &DataSink) -> usize {
        rx.try_iter().map(|frame| sink.process_ethernet_frame(&frame).len()).sum()
    }

    fn can_stream(capture: &CaptureModule, id: u8) -> Arc<SendStream> {
        let interface = capture.add_interface(PayloadType::Can).unwrap();
        let stream = interface.add_stream_with_id(id, PayloadType::Can).unwrap();
        stream.on_descriptor_changed(
            Some(DataDescriptor::can_message()),
            Some(DomainDescriptor::new(TickResolution::nanoseconds())),
        );
        stream
    }

    #[test]
    fn test_can_end_to_end() {
        let (capture, rx, sink) = link();
        let sender = can_stream(&capture, 2);
        let receiver = sink.open_stream(EndpointKey::new(0, 1, 2), PayloadType::Can);

        sender
            .send(&DataBatch::Can(vec![CanSample::new(777, 45, &[0x21])]))
            .unwrap();
        assert_eq!(pump(&rx, &sink), 1);

        match receiver.try_recv() {
            Some(OutputBatch::Can(frames)) => {
                assert_eq!(
                    frames,
                    vec![CanOutput {
                        timestamp: 777,
                        arbitration_id: 45,
                        extended: false,
                        data: vec![0x21],
                    }]
                );
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_renumbered_stream_rebinds() {
        let (capture, rx, sink) = link();
        let sender = can_stream(&capture, 2);
        let receiver = sink.open_stream(EndpointKey::new(0, 1, 2), PayloadType::Can);

        assert!(sender.set_id(100));
        receiver.set_key(EndpointKey::new(0, 1, 100));

        sender.send(&DataBatch::Can(vec![CanSample::new(1, 1, &[1])])).unwrap();
        pump(&rx, &sink);

        // 옛 스트림 ID로 인코딩된 패킷은 전달되지 않아야 함
        let mut stale = Encoder::new(0, 2);
        let frames = stale
            .encode(
                &[Packet::new(1, 2, Payload::Can(CanPayload::new(9, vec![9])))],
                &FrameConstraints::default(),
            )
            .unwrap();
        sink.process_incoming_frame(&frames[0]);

        let outputs = receiver.drain();
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            OutputBatch::Can(frames) => assert_eq!(frames[0].arbitration_id, 1),
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(receiver.packets_received(), 1);
        assert_eq!(sink.router().size(), 1);
    }

    #[test]
    fn test_analog_end_to_end() {
        let (capture, rx, sink) = link();
        let interface = capture.add_interface(PayloadType::Analog).unwrap();
        let sender = interface.add_stream_with_id(3, PayloadType::Analog).unwrap();
        sender.on_descriptor_changed(
            Some(DataDescriptor::scalar("temp", SampleType::Float64).with_range(-40.0, 125.0).with_unit("°C")),
            Some(DomainDescriptor::linear(TickResolution::microseconds(), 100)),
        );
        let receiver = sink.open_stream(EndpointKey::new(0, interface.id(), 3), PayloadType::Analog);

        let samples: Vec<f64> = (0..2000).map(|i| -40.0 + i as f64 * 0.08).collect();
        let frames = sender
            .send(&DataBatch::Analog { start_tick: 10, samples: samples.clone() })
            .unwrap();
        assert!(frames > 1);
        pump(&rx, &sink);

        match receiver.try_recv() {
            Some(OutputBatch::Analog(out)) => {
                assert_eq!(out.timestamp, 10_000);
                assert_eq!(out.unit, "°C");
                assert!((out.sample_interval - 0.0001).abs() < 1e-9);
                assert_eq!(out.values.len(), samples.len());
                let quantum = 165.0 / (1u64 << 24) as f64;
                for (got, want) in out.values.iter().zip(samples.iter()) {
                    assert!((got - want).abs() <= quantum);
                }
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_status_reaches_aggregator() {
        let (capture, rx, sink) = link();
        can_stream(&capture, 4);
        capture.send_status().unwrap();
        pump(&rx, &sink);

        assert_eq!(sink.status().device_count(), 1);
        assert_eq!(sink.status().summary(), vec!["Id: 0, Name: capture, Interfaces: 1".to_string()]);
    }

    #[test]
    fn test_orphan_interface_status_dropped() {
        let sink = DataSink::new(Config::default()).unwrap();
        let mut encoder = Encoder::new(9, 0);
        for _ in 0..2 {
            let frames = encoder
                .encode(
                    &[Packet::new(1, 0, Payload::InterfaceStatus(InterfaceStatusPayload::default()))],
                    &FrameConstraints::default(),
                )
                .unwrap();
            assert_eq!(sink.process_incoming_frame(&frames[0]).len(), 1);
        }
        assert_eq!(sink.status().device_count(), 0);
    }

    #[test]
    fn test_payload_type_mismatch_rejected() {
        let sink = DataSink::new(Config::default()).unwrap();
        let receiver = sink.open_stream(EndpointKey::new(0, 1, 1), PayloadType::Analog);
        let mut encoder = Encoder::new(0, 1);
        let frames = encoder
            .encode(
                &[Packet::new(1, 0, Payload::Can(CanPayload::new(1, vec![1])))],
                &FrameConstraints::default(),
            )
            .unwrap();
        sink.process_incoming_frame(&frames[0]);
        assert_eq!(receiver.packets_rejected(), 1);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_invalid_and_foreign_frames() {
        let sink = DataSink::new(Config::default()).unwrap();
        let mut frame = vec![0x01, 0x00, 0x00, 0x00, 0x42, 0x01, 0x00, 0x00];
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0x01, 0, 2, 0xAB, 0xCD]);
        let packets = sink.process_incoming_frame(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(sink.invalid_packets(), 1);

        let mut ipv4 = vec![0xFF; 12];
        ipv4.extend_from_slice(&[0x08, 0x00, 0x45, 0x00]);
        assert!(sink.process_ethernet_frame(&ipv4).is_empty());
    }

    #[test]
    fn test_close_unsubscribes() {
        let sink = DataSink::new(Config::default()).unwrap();
        let receiver = sink.open_stream(EndpointKey::new(0, 1, 1), PayloadType::Can);
        assert_eq!(sink.router().size(), 1);
        receiver.close();
        assert_eq!(sink.router().size(), 0);
    }

    #[test]
    fn test_dropped_stream_unsubscribes() {
        let sink = DataSink::new(Config::default()).unwrap();
        let key = EndpointKey::new(0, 1, 1);
        let receiver = sink.open_stream(key, PayloadType::Can);
        let kept = sink.open_stream(key, PayloadType::Can);
        assert_eq!(sink.router().handler_count(&key), 2);

        drop(receiver);
        assert_eq!(sink.router().handler_count(&key), 1);

        let frames = Encoder::new(0, 1)
            .encode(
                &[Packet::new(1, 0, Payload::Can(CanPayload::new(1, vec![1])))],
                &FrameConstraints::default(),
            )
            .unwrap();
        sink.process_incoming_frame(&frames[0]);
        assert_eq!(kept.packets_received(), 1);
    }

    #[test]
    fn test_full_output_queue_counts_drops() {
        let config = Config {
            output_queue_capacity: 1,
            ..Config::default()
        };
        let sink = DataSink::new(config).unwrap();
        let receiver = sink.open_stream(EndpointKey::new(0, 1, 1), PayloadType::Can);
        let mut encoder = Encoder::new(0, 1);
        for _ in 0..3 {
            let frames = encoder
                .encode(
                    &[Packet::new(1, 0, Payload::Can(CanPayload::new(1, vec![1])))],
                    &FrameConstraints::default(),
                )
                .unwrap();
            sink.process_incoming_frame(&frames[0]);
        }
        assert_eq!(receiver.packets_received(), 3);
        assert_eq!(receiver.batches_dropped(), 2);
    }
}
