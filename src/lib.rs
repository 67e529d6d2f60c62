//! # CMP Link
//!
//! ASAM CMP (Capture Module Protocol) 코덱/라우팅/스트림 엔진
//!
//! ## 핵심 특징
//! - **코덱**: CAN, CAN-FD, 아날로그, 상태 페이로드 <-> 빅엔디안 CMP 프레임
//! - **패킹/세그먼트**: 작은 패킷은 한 프레임에 모으고, 큰 페이로드는 여러 프레임으로 분할
//! - **슬롯별 락**: 256개 인코더 슬롯이 서로 막지 않음
//! - **라우터**: (장치, 인터페이스, 스트림) 키로 여러 핸들러에 팬아웃
//! - **스트림 상태 머신**: 신호 기술자 검증, 아날로그 스케일 유도
//! - **상태 집계**: 주기 상태 패킷으로 장치/인터페이스 스냅샷 유지

pub mod capture;
pub mod config;
pub mod data_sink;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod error;
pub mod ethernet;
pub mod id_manager;
pub mod packet;
pub mod payload;
pub mod periodic;
pub mod router;
pub mod status;
pub mod stream;
pub mod transport;
pub mod units;

pub use capture::{CaptureInterface, CaptureModule, DeviceInfo, SendStream};
pub use config::Config;
pub use data_sink::{AnalogOutput, CanOutput, DataSink, OutputBatch, ReceiveStream};
pub use decoder::Decoder;
pub use descriptor::{DataDescriptor, DomainDescriptor, SampleType, TickResolution};
pub use encoder::{Encoder, EncoderBank, FrameConstraints};
pub use error::{Error, Result};
pub use id_manager::{IdManager, ZeroPolicy};
pub use packet::{CommonFlags, MessageType, Packet, PayloadType, Segmentation};
pub use payload::Payload;
pub use router::{EndpointKey, HandlerRef, PacketHandler, Router};
pub use status::{DeviceStatus, StatusAggregator};
pub use stream::{CanSample, DataBatch, StreamState, StreamStateMachine};
pub use transport::{FrameTransport, LoopbackTransport, ReceiveLoop};
pub use units::UnitConverter;

/// 프로토콜 버전
pub const CMP_VERSION: u8 = 1;

/// CMP EtherType
pub const ETHER_TYPE_CMP: u16 = 0x99FE;

/// 인코더 슬롯 수 (8비트 스트림 ID 공간)
pub const MAX_STREAMS: usize = 256;

/// 상태 패킷 전송 슬롯
pub const STATUS_SLOT: usize = 0;

/// 기본 최소 프레임 크기 (바이트)
pub const DEFAULT_MIN_FRAME_SIZE: usize = 64;

/// 기본 최대 프레임 크기 (바이트)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1500;

/// 점보 프레임 최대 크기 (바이트)
pub const JUMBO_MAX_FRAME_SIZE: usize = 9000;
