//! 이더넷 II 캡슐화
//!
//! CMP 프레임은 브로드캐스트 목적지, EtherType 0x99FE로 나간다.
//! 수신 시 VLAN 태그 하나는 건너뛴다.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ETHER_TYPE_CMP;

/// 이더넷 헤더 크기 (목적지 + 출발지 + EtherType)
pub const ETHERNET_HEADER_LEN: usize = 14;

const ETHER_TYPE_VLAN: u16 = 0x8100;
const VLAN_TAG_LEN: usize = 4;

pub type MacAddress = [u8; 6];

pub const BROADCAST_MAC: MacAddress = [0xFF; 6];

/// 수신 프레임 헤더 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub ether_type: u16,
}

/// CMP 페이로드를 이더넷 프레임으로 감쌈
pub fn wrap(source: &MacAddress, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ETHERNET_HEADER_LEN + payload.len());
    buf.put_slice(&BROADCAST_MAC);
    buf.put_slice(source);
    buf.put_u16(ETHER_TYPE_CMP);
    buf.put_slice(payload);
    buf.freeze()
}

/// 이더넷 프레임에서 헤더와 페이로드 분리
pub fn parse(frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let mut destination = [0u8; 6];
    let mut source = [0u8; 6];
    destination.copy_from_slice(&frame[0..6]);
    source.copy_from_slice(&frame[6..12]);

    let mut offset = 12;
    let mut ether_type = u16::from_be_bytes([frame[offset], frame[offset + 1]]);
    if ether_type == ETHER_TYPE_VLAN {
        offset += VLAN_TAG_LEN;
        if frame.len() < offset + 2 {
            return None;
        }
        ether_type = u16::from_be_bytes([frame[offset], frame[offset + 1]]);
    }

    Some((
        EthernetHeader {
            destination,
            source,
            ether_type,
        },
        &frame[offset + 2..],
    ))
}

/// CMP 프레임이면 페이로드만 반환
pub fn unwrap(frame: &[u8]) -> Option<&[u8]> {
    match parse(frame) {
        Some((header, payload)) if header.ether_type == ETHER_TYPE_CMP => Some(payload),
        _ => None,
    }
}
