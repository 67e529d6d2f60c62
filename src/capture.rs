//! 캡처 측 집합체
//!
//! - 장치 정보, 인터페이스/스트림 ID 할당기, 인코더 슬롯, 송신 전송을 소유
//! - 인터페이스와 스트림의 번호 변경은 begin_update/end_update로 묶어 한 번에 적용
//! - 상태 패킷은 슬롯 0(스트림 ID 0)으로 주기 전송

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::descriptor::{DataDescriptor, DomainDescriptor};
use crate::encoder::{EncoderBank, FrameConstraints};
use crate::id_manager::{IdManager, ZeroPolicy};
use crate::packet::{Packet, PayloadType};
use crate::payload::{CaptureModuleStatusPayload, InterfaceStatusPayload, LinkStatus, Payload};
use crate::periodic::PeriodicWorker;
use crate::stream::{DataBatch, StreamState, StreamStateMachine};
use crate::transport::FrameTransport;
use crate::{Config, Error, Result, MAX_STREAMS, STATUS_SLOT};

/// 장치 정보
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub device_id: u16,
    pub description: String,
    pub serial_number: String,
    pub hardware_version: String,
    pub software_version: String,
    pub vendor_data: Bytes,
}

impl DeviceInfo {
    pub fn new(device_id: u16, description: impl Into<String>) -> Self {
        Self {
            device_id,
            description: description.into(),
            ..Self::default()
        }
    }
}

/// 인터페이스/스트림이 함께 쓰는 링크 자원
struct LinkContext {
    device_id: u16,
    constraints: FrameConstraints,
    encoders: EncoderBank,
    interface_ids: IdManager,
    stream_ids: IdManager,
    transport: Arc<dyn FrameTransport>,
}

impl LinkContext {
    fn send_frames(&self, frames: &[Bytes]) -> Result<()> {
        for frame in frames {
            self.transport.send_packet(frame)?;
        }
        Ok(())
    }
}

fn is_data_payload(payload_type: PayloadType) -> bool {
    matches!(
        payload_type,
        PayloadType::Can | PayloadType::CanFd | PayloadType::Analog
    )
}

struct ModuleInner {
    ctx: Arc<LinkContext>,
    device: RwLock<DeviceInfo>,
    interfaces: RwLock<Vec<Arc<CaptureInterface>>>,
    started_at: Instant,
}

impl ModuleInner {
    fn status_packets(&self) -> Vec<Packet> {
        let device = self.device.read();
        let uptime_ns = u64::try_from(self.started_at.elapsed().as_nanos()).unwrap_or(u64::MAX);

        let mut packets = vec![Packet::new(
            0,
            uptime_ns,
            Payload::CaptureModuleStatus(CaptureModuleStatusPayload {
                uptime_ns,
                device_description: device.description.clone(),
                serial_number: device.serial_number.clone(),
                hardware_version: device.hardware_version.clone(),
                software_version: device.software_version.clone(),
                vendor_data: device.vendor_data.clone(),
                ..CaptureModuleStatusPayload::default()
            }),
        )];

        for interface in self.interfaces.read().iter() {
            let status = interface.status_payload();
            packets.push(Packet::new(
                status.interface_id,
                uptime_ns,
                Payload::InterfaceStatus(status),
            ));
        }
        packets
    }

    fn send_status(&self) -> Result<usize> {
        let packets = self.status_packets();
        let frames = self
            .ctx
            .encoders
            .encode(STATUS_SLOT, &packets, &self.ctx.constraints)?;
        self.ctx.send_frames(&frames)?;
        debug!(
            "상태 전송: {} packets, {} frames",
            packets.len(),
            frames.len()
        );
        Ok(frames.len())
    }
}

/// 캡처 모듈
pub struct CaptureModule {
    config: Config,
    inner: Arc<ModuleInner>,
    status_loop: Mutex<Option<PeriodicWorker>>,
}

impl CaptureModule {
    pub fn new(config: Config, device: DeviceInfo, transport: Arc<dyn FrameTransport>) -> Result<Self> {
        config.validate()?;

        let zero = if config.reserve_zero_interface_id {
            ZeroPolicy::Reserved
        } else {
            ZeroPolicy::Allocatable
        };
        let ctx = Arc::new(LinkContext {
            device_id: device.device_id,
            constraints: config.frame_constraints(),
            encoders: EncoderBank::new(MAX_STREAMS),
            interface_ids: IdManager::for_interfaces(zero),
            stream_ids: IdManager::for_streams(),
            transport,
        });
        ctx.encoders
            .configure(STATUS_SLOT, device.device_id, STATUS_SLOT as u8, None)?;

        info!(
            "캡처 모듈 생성: device={}, {}",
            device.device_id, device.description
        );
        Ok(Self {
            config,
            inner: Arc::new(ModuleInner {
                ctx,
                device: RwLock::new(device),
                interfaces: RwLock::new(Vec::new()),
                started_at: Instant::now(),
            }),
            status_loop: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_id(&self) -> u16 {
        self.inner.ctx.device_id
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.inner.device.read().clone()
    }

    /// 장치 문자열/벤더 데이터 갱신 (장치 ID는 유지)
    pub fn update_device_info<F>(&self, update: F)
    where
        F: FnOnce(&mut DeviceInfo),
    {
        let mut device = self.inner.device.write();
        let device_id = device.device_id;
        update(&mut device);
        device.device_id = device_id;
    }

    /// 다음 빈 인터페이스 ID로 인터페이스 추가
    pub fn add_interface(&self, interface_type: PayloadType) -> Result<Arc<CaptureInterface>> {
        if !is_data_payload(interface_type) {
            return Err(Error::InvalidPayload {
                payload_type: interface_type,
            });
        }
        let id = self.inner.ctx.interface_ids.allocate()?;
        Ok(self.insert_interface(id, interface_type))
    }

    /// 지정 ID로 인터페이스 추가
    pub fn add_interface_with_id(
        &self,
        id: u32,
        interface_type: PayloadType,
    ) -> Result<Arc<CaptureInterface>> {
        if !is_data_payload(interface_type) {
            return Err(Error::InvalidPayload {
                payload_type: interface_type,
            });
        }
        if !self.inner.ctx.interface_ids.add_id(id) {
            return Err(Error::IdInUse { id });
        }
        Ok(self.insert_interface(id, interface_type))
    }

    fn insert_interface(&self, id: u32, interface_type: PayloadType) -> Arc<CaptureInterface> {
        let interface = Arc::new(CaptureInterface {
            ctx: self.inner.ctx.clone(),
            id: Arc::new(AtomicU32::new(id)),
            state: Mutex::new(InterfaceState {
                interface_type,
                link_status: LinkStatus::Up,
                streams: Vec::new(),
                pending: None,
            }),
        });
        self.inner.interfaces.write().push(interface.clone());
        info!("인터페이스 추가: id={}, type={:?}", id, interface_type);
        interface
    }

    /// 인터페이스 제거 (소속 스트림도 함께 해제)
    pub fn remove_interface(&self, id: u32) -> Result<()> {
        let interface = {
            let mut interfaces = self.inner.interfaces.write();
            let idx = interfaces
                .iter()
                .position(|i| i.id() == id)
                .ok_or(Error::UnknownInterface { interface_id: id })?;
            interfaces.remove(idx)
        };
        interface.release_streams();
        self.inner.ctx.interface_ids.remove_id(id);
        info!("인터페이스 제거: id={}", id);
        Ok(())
    }

    pub fn interface(&self, id: u32) -> Option<Arc<CaptureInterface>> {
        self.inner
            .interfaces
            .read()
            .iter()
            .find(|i| i.id() == id)
            .cloned()
    }

    pub fn interfaces(&self) -> Vec<Arc<CaptureInterface>> {
        self.inner.interfaces.read().clone()
    }

    /// 캡처 모듈 상태 + 인터페이스별 상태 전송. 프레임 수 반환
    pub fn send_status(&self) -> Result<usize> {
        self.inner.send_status()
    }

    /// 주기 상태 전송 시작. 이미 돌고 있으면 아무것도 안 함
    pub fn start_status_loop(&self) -> Result<()> {
        let mut slot = self.status_loop.lock();
        if slot.as_ref().map_or(false, PeriodicWorker::is_running) {
            return Ok(());
        }

        let weak: Weak<ModuleInner> = Arc::downgrade(&self.inner);
        let interval = Duration::from_millis(self.config.status_interval_ms);
        let worker = PeriodicWorker::spawn("cmp-status", interval, move || {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            if let Err(e) = inner.send_status() {
                warn!("상태 전송 실패: {}", e);
            }
            true
        })?;
        *slot = Some(worker);
        Ok(())
    }

    /// 주기 상태 전송 중지 (여러 번 불러도 안전)
    pub fn stop_status_loop(&self) {
        let worker = self.status_loop.lock().take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }

    pub fn is_status_loop_running(&self) -> bool {
        self.status_loop
            .lock()
            .as_ref()
            .map_or(false, PeriodicWorker::is_running)
    }
}

impl Drop for CaptureModule {
    fn drop(&mut self) {
        self.stop_status_loop();
    }
}

/// begin_update 중 쌓인 변경
#[derive(Debug, Default)]
struct PendingInterfaceUpdate {
    id: Option<u32>,
    interface_type: Option<PayloadType>,
}

struct InterfaceState {
    interface_type: PayloadType,
    link_status: LinkStatus,
    streams: Vec<Arc<SendStream>>,
    pending: Option<PendingInterfaceUpdate>,
}

/// 캡처 인터페이스 (물리 버스 하나)
pub struct CaptureInterface {
    ctx: Arc<LinkContext>,
    /// 소속 스트림과 공유
    id: Arc<AtomicU32>,
    state: Mutex<InterfaceState>,
}

impl CaptureInterface {
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn interface_type(&self) -> PayloadType {
        self.state.lock().interface_type
    }

    pub fn set_link_status(&self, link_status: LinkStatus) {
        self.state.lock().link_status = link_status;
    }

    /// 다음 빈 스트림 ID로 스트림 추가
    pub fn add_stream(&self, payload_type: PayloadType) -> Result<Arc<SendStream>> {
        if !is_data_payload(payload_type) {
            return Err(Error::InvalidPayload { payload_type });
        }
        let id = self.ctx.stream_ids.allocate()?;
        self.insert_stream(id as u8, payload_type)
    }

    pub fn add_stream_with_id(&self, id: u8, payload_type: PayloadType) -> Result<Arc<SendStream>> {
        if !is_data_payload(payload_type) {
            return Err(Error::InvalidPayload { payload_type });
        }
        if !self.ctx.stream_ids.add_id(id as u32) {
            return Err(Error::IdInUse { id: id as u32 });
        }
        self.insert_stream(id, payload_type)
    }

    fn insert_stream(&self, id: u8, payload_type: PayloadType) -> Result<Arc<SendStream>> {
        if let Err(e) =
            self.ctx
                .encoders
                .configure(id as usize, self.ctx.device_id, id, Some(payload_type))
        {
            self.ctx.stream_ids.remove_id(id as u32);
            return Err(e);
        }

        let stream = Arc::new(SendStream {
            ctx: self.ctx.clone(),
            interface_id: self.id.clone(),
            state: Mutex::new(StreamSlot {
                id,
                machine: StreamStateMachine::new(payload_type),
                pending: None,
            }),
            tx_packets: AtomicU64::new(0),
            tx_frames: AtomicU64::new(0),
            tx_dropped: AtomicU64::new(0),
        });
        self.state.lock().streams.push(stream.clone());
        debug!("스트림 추가: interface={}, stream={}", self.id(), id);
        Ok(stream)
    }

    pub fn remove_stream(&self, id: u8) -> Result<()> {
        let stream = {
            let mut state = self.state.lock();
            let idx = state
                .streams
                .iter()
                .position(|s| s.id() == id)
                .ok_or(Error::UnknownStream { stream_id: id })?;
            state.streams.remove(idx)
        };
        stream.release();
        Ok(())
    }

    pub fn stream(&self, id: u8) -> Option<Arc<SendStream>> {
        self.state.lock().streams.iter().find(|s| s.id() == id).cloned()
    }

    pub fn streams(&self) -> Vec<Arc<SendStream>> {
        self.state.lock().streams.clone()
    }

    fn release_streams(&self) {
        let streams = std::mem::take(&mut self.state.lock().streams);
        for stream in streams {
            stream.release();
        }
    }

    /// 인터페이스 상태 페이로드
    pub fn status_payload(&self) -> InterfaceStatusPayload {
        let state = self.state.lock();
        let (mut tx, mut dropped) = (0u64, 0u64);
        let mut stream_ids = Vec::with_capacity(state.streams.len());
        for stream in &state.streams {
            tx += stream.packets_sent();
            dropped += stream.packets_dropped();
            stream_ids.push(stream.id());
        }
        InterfaceStatusPayload {
            interface_id: self.id(),
            msg_total_tx: tx.min(u32::MAX as u64) as u32,
            msg_dropped_tx: dropped.min(u32::MAX as u64) as u32,
            interface_type: state.interface_type.to_raw(),
            link_status: state.link_status,
            stream_ids,
            ..InterfaceStatusPayload::default()
        }
    }

    /// 일괄 변경 시작
    pub fn begin_update(&self) {
        let mut state = self.state.lock();
        if state.pending.is_none() {
            state.pending = Some(PendingInterfaceUpdate::default());
        }
    }

    /// ID 변경 (일괄 변경 중이면 보류). 즉시 적용했고 실패하면 false
    pub fn set_id(&self, new_id: u32) -> bool {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_mut() {
            pending.id = Some(new_id);
            return true;
        }
        self.apply_id(new_id)
    }

    pub fn set_interface_type(&self, interface_type: PayloadType) -> bool {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_mut() {
            pending.interface_type = Some(interface_type);
            return true;
        }
        Self::apply_interface_type(&mut state, interface_type)
    }

    /// 보류된 변경을 한 번에 적용. 무효한 값은 되돌리고 false
    pub fn end_update(&self) -> bool {
        let mut state = self.state.lock();
        let Some(pending) = state.pending.take() else {
            return true;
        };
        let mut ok = true;
        if let Some(interface_type) = pending.interface_type {
            ok &= Self::apply_interface_type(&mut state, interface_type);
        }
        if let Some(id) = pending.id {
            ok &= self.apply_id(id);
        }
        ok
    }

    fn apply_id(&self, new_id: u32) -> bool {
        let old_id = self.id();
        match self.ctx.interface_ids.replace_id(old_id, new_id) {
            Ok(()) => {
                self.id.store(new_id, Ordering::Release);
                if old_id != new_id {
                    info!("인터페이스 ID 변경: {} -> {}", old_id, new_id);
                }
                true
            }
            Err(e) => {
                warn!("인터페이스 ID {} 사용 불가 ({}), {}로 되돌림", new_id, e, old_id);
                false
            }
        }
    }

    fn apply_interface_type(state: &mut InterfaceState, interface_type: PayloadType) -> bool {
        if !is_data_payload(interface_type) {
            warn!(
                "인터페이스 타입 {:?} 사용 불가, {:?}로 되돌림",
                interface_type, state.interface_type
            );
            return false;
        }
        state.interface_type = interface_type;
        true
    }
}

impl std::fmt::Debug for CaptureInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureInterface").field("id", &self.id()).finish()
    }
}

#[derive(Debug, Default)]
struct PendingStreamUpdate {
    id: Option<u8>,
    payload_type: Option<PayloadType>,
}

struct StreamSlot {
    /// 스트림 ID = 인코더 슬롯
    id: u8,
    machine: StreamStateMachine,
    pending: Option<PendingStreamUpdate>,
}

/// 송신 스트림
pub struct SendStream {
    ctx: Arc<LinkContext>,
    interface_id: Arc<AtomicU32>,
    state: Mutex<StreamSlot>,
    tx_packets: AtomicU64,
    tx_frames: AtomicU64,
    tx_dropped: AtomicU64,
}

impl SendStream {
    pub fn id(&self) -> u8 {
        self.state.lock().id
    }

    pub fn interface_id(&self) -> u32 {
        self.interface_id.load(Ordering::Acquire)
    }

    pub fn payload_type(&self) -> PayloadType {
        self.state.lock().machine.payload_type()
    }

    pub fn state(&self) -> StreamState {
        self.state.lock().machine.state()
    }

    pub fn packets_sent(&self) -> u64 {
        self.tx_packets.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.tx_frames.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.tx_dropped.load(Ordering::Relaxed)
    }

    pub fn on_descriptor_changed(
        &self,
        data: Option<DataDescriptor>,
        domain: Option<DomainDescriptor>,
    ) -> StreamState {
        self.state.lock().machine.on_descriptor_changed(data, domain)
    }

    pub fn on_disconnected(&self) {
        self.state.lock().machine.on_disconnected();
    }

    /// 데이터 묶음 변환 -> 인코딩 -> 전송. 보낸 프레임 수 반환
    pub fn send(&self, batch: &DataBatch) -> Result<usize> {
        let state = self.state.lock();
        let packets = state.machine.translate(self.interface_id(), batch);
        if packets.is_empty() {
            return Ok(0);
        }

        let frames = match self
            .ctx
            .encoders
            .encode(state.id as usize, &packets, &self.ctx.constraints)
        {
            Ok(frames) => frames,
            Err(e) => {
                self.tx_dropped.fetch_add(packets.len() as u64, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.ctx.send_frames(&frames)?;

        self.tx_packets.fetch_add(packets.len() as u64, Ordering::Relaxed);
        self.tx_frames.fetch_add(frames.len() as u64, Ordering::Relaxed);
        Ok(frames.len())
    }

    pub fn begin_update(&self) {
        let mut state = self.state.lock();
        if state.pending.is_none() {
            state.pending = Some(PendingStreamUpdate::default());
        }
    }

    pub fn set_id(&self, new_id: u8) -> bool {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_mut() {
            pending.id = Some(new_id);
            return true;
        }
        self.apply_id(&mut state, new_id)
    }

    pub fn set_payload_type(&self, payload_type: PayloadType) -> bool {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_mut() {
            pending.payload_type = Some(payload_type);
            return true;
        }
        self.apply_payload_type(&mut state, payload_type)
    }

    pub fn end_update(&self) -> bool {
        let mut state = self.state.lock();
        let Some(pending) = state.pending.take() else {
            return true;
        };
        let mut ok = true;
        if let Some(payload_type) = pending.payload_type {
            ok &= self.apply_payload_type(&mut state, payload_type);
        }
        if let Some(id) = pending.id {
            ok &= self.apply_id(&mut state, id);
        }
        ok
    }

    fn apply_id(&self, state: &mut StreamSlot, new_id: u8) -> bool {
        let old_id = state.id;
        if old_id == new_id {
            return true;
        }
        if let Err(e) = self.ctx.stream_ids.replace_id(old_id as u32, new_id as u32) {
            warn!("스트림 ID {} 사용 불가 ({}), {}로 되돌림", new_id, e, old_id);
            return false;
        }

        let payload_type = state.machine.payload_type();
        if let Err(e) = self.ctx.encoders.configure(
            new_id as usize,
            self.ctx.device_id,
            new_id,
            Some(payload_type),
        ) {
            warn!("인코더 슬롯 {} 설정 실패 ({}), {}로 되돌림", new_id, e, old_id);
            // 재활용 집합에서 old_id를 다시 사용 중으로
            let _ = self.ctx.stream_ids.replace_id(new_id as u32, old_id as u32);
            return false;
        }
        self.ctx.encoders.release(old_id as usize);
        state.id = new_id;
        info!("스트림 ID 변경: {} -> {}", old_id, new_id);
        true
    }

    fn apply_payload_type(&self, state: &mut StreamSlot, payload_type: PayloadType) -> bool {
        if !is_data_payload(payload_type) {
            warn!(
                "페이로드 타입 {:?} 사용 불가, {:?}로 되돌림",
                payload_type,
                state.machine.payload_type()
            );
            return false;
        }
        if self
            .ctx
            .encoders
            .set_payload_type(state.id as usize, Some(payload_type))
            .is_err()
        {
            return false;
        }
        state.machine.set_payload_type(payload_type);
        true
    }

    fn release(&self) {
        let id = self.state.lock().id;
        self.ctx.encoders.release(id as usize);
        self.ctx.stream_ids.remove_id(id as u32);
        debug!("스트림 해제: {}", id);
    }
}

impl std::fmt::Debug for SendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendStream")
            .field("id", &self.id())
            .field("interface_id", &self.interface_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::descriptor::TickResolution;
    use crate::ethernet;
    use crate::stream::CanSample;
    use crate::transport::loopback;
    use crossbeam_channel::Receiver;

    fn module() -> (CaptureModule, Receiver<Bytes>) {
        let (transport, rx) = loopback([2, 0, 0, 0, 0, 1], 256);
        let module = CaptureModule::new(Config::default(), DeviceInfo::new(3, "bench box"), transport).unwrap();
        (module, rx)
    }

    fn decode_all(rx: &Receiver<Bytes>, decoder: &Decoder) -> Vec<Packet> {
        rx.try_iter()
            .flat_map(|frame| {
                let payload = ethernet::unwrap(&frame).unwrap().to_vec();
                decoder.decode(&payload)
            })
            .map(|p| (*p).clone())
            .collect()
    }

    fn can_stream(interface: &CaptureInterface, id: u8) -> Arc<SendStream> {
        let stream = interface.add_stream_with_id(id, PayloadType::Can).unwrap();
        stream.on_descriptor_changed(
            Some(DataDescriptor::can_message()),
            Some(DomainDescriptor::new(TickResolution::microseconds())),
        );
        stream
    }

    #[test]
    fn test_interface_and_stream_ids() {
        let (module, _rx) = module();
        let a = module.add_interface(PayloadType::Can).unwrap();
        let b = module.add_interface(PayloadType::Analog).unwrap();
        assert_eq!((a.id(), b.id()), (1, 2));

        let s1 = a.add_stream(PayloadType::Can).unwrap();
        let s2 = b.add_stream(PayloadType::Analog).unwrap();
        assert_eq!((s1.id(), s2.id()), (1, 2));
        assert!(matches!(
            a.add_stream_with_id(2, PayloadType::Can),
            Err(Error::IdInUse { id: 2 })
        ));
        assert!(matches!(
            a.add_stream(PayloadType::CaptureModuleStatus),
            Err(Error::InvalidPayload { .. })
        ));

        module.remove_interface(1).unwrap();
        assert!(matches!(
            module.remove_interface(1),
            Err(Error::UnknownInterface { interface_id: 1 })
        ));
        // 제거된 인터페이스의 스트림 ID는 재활용
        assert_eq!(b.add_stream(PayloadType::Analog).unwrap().id(), 1);
        assert_eq!(module.add_interface(PayloadType::Can).unwrap().id(), 1);
    }

    #[test]
    fn test_send_can_batch() {
        let (module, rx) = module();
        let interface = module.add_interface(PayloadType::Can).unwrap();
        let stream = can_stream(&interface, 2);

        let frames = stream
            .send(&DataBatch::Can(vec![
                CanSample::new(1, 45, &[0x21]),
                CanSample::new(2, 46, &[0x22, 0x23]),
            ]))
            .unwrap();
        assert_eq!(frames, 1);
        assert_eq!(stream.packets_sent(), 2);

        let packets = decode_all(&rx, &Decoder::default());
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.device_id == 3 && p.stream_id == 2 && p.interface_id == 1));
        assert_eq!(packets[1].timestamp, 2_000);
    }

    #[test]
    fn test_unconnected_stream_sends_nothing() {
        let (module, rx) = module();
        let interface = module.add_interface(PayloadType::Can).unwrap();
        let stream = interface.add_stream(PayloadType::Can).unwrap();
        assert_eq!(stream.send(&DataBatch::Can(vec![CanSample::new(0, 1, &[1])])).unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_renumber_stream_uses_new_slot() {
        let (module, rx) = module();
        let interface = module.add_interface(PayloadType::Can).unwrap();
        let stream = can_stream(&interface, 2);

        assert!(stream.set_id(100));
        assert_eq!(stream.id(), 100);
        stream.send(&DataBatch::Can(vec![CanSample::new(0, 1, &[1])])).unwrap();

        let packets = decode_all(&rx, &Decoder::default());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].stream_id, 100);

        // 2는 다시 할당 가능
        assert_eq!(interface.add_stream(PayloadType::Can).unwrap().id(), 2);
    }

    #[test]
    fn test_batched_update_reverts_invalid_values() {
        let (module, _rx) = module();
        let first = module.add_interface(PayloadType::Can).unwrap();
        let second = module.add_interface(PayloadType::Can).unwrap();

        second.begin_update();
        second.set_id(first.id());
        second.set_interface_type(PayloadType::Analog);
        assert_eq!(second.id(), 2); // 아직 적용 전
        assert!(!second.end_update());
        assert_eq!(second.id(), 2);
        assert_eq!(second.interface_type(), PayloadType::Analog);

        let stream = second.add_stream(PayloadType::Can).unwrap();
        stream.begin_update();
        stream.set_id(0);
        stream.set_payload_type(PayloadType::CanFd);
        assert!(!stream.end_update());
        assert_eq!(stream.id(), 1);
        assert_eq!(stream.payload_type(), PayloadType::CanFd);

        assert!(!stream.set_payload_type(PayloadType::InterfaceStatus));
        assert_eq!(stream.payload_type(), PayloadType::CanFd);
    }

    #[test]
    fn test_interface_renumber_visible_to_streams() {
        let (module, rx) = module();
        let interface = module.add_interface(PayloadType::Can).unwrap();
        let stream = can_stream(&interface, 5);
        assert!(interface.set_id(40));
        assert_eq!(stream.interface_id(), 40);
        assert!(module.interface(40).is_some());

        stream.send(&DataBatch::Can(vec![CanSample::new(0, 1, &[1])])).unwrap();
        let packets = decode_all(&rx, &Decoder::default());
        assert_eq!(packets[0].interface_id, 40);
    }

    #[test]
    fn test_status_packets() {
        let (module, rx) = module();
        let interface = module.add_interface(PayloadType::Can).unwrap();
        can_stream(&interface, 7);
        module.add_interface(PayloadType::Analog).unwrap();

        assert_eq!(module.send_status().unwrap(), 1);
        let packets = decode_all(&rx, &Decoder::default());
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.stream_id == 0 && p.is_valid()));
        match &packets[0].payload {
            Payload::CaptureModuleStatus(status) => assert_eq!(status.device_description, "bench box"),
            other => panic!("unexpected payload: {:?}", other),
        }
        match &packets[1].payload {
            Payload::InterfaceStatus(status) => {
                assert_eq!(status.interface_id, 1);
                assert_eq!(status.stream_ids, vec![7]);
                assert_eq!(status.interface_type, 0x01);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_status_loop_start_stop() {
        let (transport, rx) = loopback([2, 0, 0, 0, 0, 1], 256);
        let config = Config {
            status_interval_ms: 10,
            ..Config::default()
        };
        let module = CaptureModule::new(config, DeviceInfo::new(1, "loop"), transport).unwrap();
        module.start_status_loop().unwrap();
        module.start_status_loop().unwrap();
        assert!(module.is_status_loop_running());

        std::thread::sleep(Duration::from_millis(80));
        module.stop_status_loop();
        module.stop_status_loop();
        assert!(!module.is_status_loop_running());
        assert!(rx.try_iter().count() >= 2);
    }
}
