//! 상태 집계
//!
//! 주기적으로 들어오는 상태 패킷으로 장치/인터페이스별 마지막 상태를 유지한다.
//! 인터페이스 상태는 해당 장치의 캡처 모듈 상태를 먼저 받은 뒤에만 반영된다.

use parking_lot::RwLock;
use tracing::debug;

use crate::packet::Packet;
use crate::payload::{CaptureModuleStatusPayload, InterfaceStatusPayload, Payload};

/// 인터페이스 상태 기록
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatusRecord {
    pub interface_id: u32,
    /// 마지막 상태 패킷의 타임스탬프 (ns)
    pub timestamp: u64,
    pub status: InterfaceStatusPayload,
}

/// 장치 상태 기록
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device_id: u16,
    pub timestamp: u64,
    pub status: CaptureModuleStatusPayload,
    /// 처음 보고된 순서 유지
    pub interfaces: Vec<InterfaceStatusRecord>,
}

impl DeviceStatus {
    pub fn interface(&self, interface_id: u32) -> Option<&InterfaceStatusRecord> {
        self.interfaces.iter().find(|i| i.interface_id == interface_id)
    }

    /// 요약 한 줄
    pub fn summary(&self) -> String {
        format!(
            "Id: {}, Name: {}, Interfaces: {}",
            self.device_id,
            self.status.device_description,
            self.interfaces.len()
        )
    }
}

/// 상태 집계기
#[derive(Debug, Default)]
pub struct StatusAggregator {
    devices: RwLock<Vec<DeviceStatus>>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 상태 패킷 반영. 반영되었으면 true
    pub fn process_status_packet(&self, packet: &Packet) -> bool {
        match &packet.payload {
            Payload::CaptureModuleStatus(status) => {
                self.apply_module_status(packet.device_id, packet.timestamp, status);
                true
            }
            Payload::InterfaceStatus(status) => {
                self.apply_interface_status(packet.device_id, packet.timestamp, status)
            }
            other => {
                debug!("상태 페이로드가 아님: {:?}", other.payload_type());
                false
            }
        }
    }

    fn apply_module_status(&self, device_id: u16, timestamp: u64, status: &CaptureModuleStatusPayload) {
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|d| d.device_id == device_id) {
            Some(device) => {
                device.timestamp = timestamp;
                device.status = status.clone();
            }
            None => {
                debug!("새 장치: id={}, {}", device_id, status.device_description);
                devices.push(DeviceStatus {
                    device_id,
                    timestamp,
                    status: status.clone(),
                    interfaces: Vec::new(),
                });
            }
        }
    }

    fn apply_interface_status(
        &self,
        device_id: u16,
        timestamp: u64,
        status: &InterfaceStatusPayload,
    ) -> bool {
        let mut devices = self.devices.write();
        let Some(device) = devices.iter_mut().find(|d| d.device_id == device_id) else {
            debug!(
                "알 수 없는 장치의 인터페이스 상태 버림: device={}, interface={}",
                device_id, status.interface_id
            );
            return false;
        };

        let record = InterfaceStatusRecord {
            interface_id: status.interface_id,
            timestamp,
            status: status.clone(),
        };
        match device
            .interfaces
            .iter_mut()
            .find(|i| i.interface_id == status.interface_id)
        {
            Some(existing) => *existing = record,
            None => device.interfaces.push(record),
        }
        true
    }

    /// 현재 스냅샷 복사본
    pub fn get_status(&self) -> Vec<DeviceStatus> {
        self.devices.read().clone()
    }

    pub fn device_status(&self, index: usize) -> Option<DeviceStatus> {
        self.devices.read().get(index).cloned()
    }

    pub fn find_device(&self, device_id: u16) -> Option<DeviceStatus> {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn summary(&self) -> Vec<String> {
        self.devices.read().iter().map(DeviceStatus::summary).collect()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }
}
