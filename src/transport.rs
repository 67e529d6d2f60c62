//! 프레임 송수신 경계
//!
//! 코어는 플랫폼 네트워크 API를 직접 부르지 않는다.
//! 송신은 `FrameTransport`, 수신은 프레임마다 콜백을 부르는 `ReceiveLoop`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::ethernet::{self, MacAddress};
use crate::{Error, Result};

/// 원시 프레임 송신
pub trait FrameTransport: Send + Sync {
    /// CMP 프레임 하나 송신 (이더넷 캡슐화는 구현체 몫)
    fn send_packet(&self, frame: &[u8]) -> Result<()>;
}

/// 채널 기반 루프백 전송
///
/// 프레임을 이더넷 헤더로 감싸 채널에 넣는다. 큐가 가득 차면 버린다.
pub struct LoopbackTransport {
    source: MacAddress,
    tx: Sender<Bytes>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl LoopbackTransport {
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameTransport for LoopbackTransport {
    fn send_packet(&self, frame: &[u8]) -> Result<()> {
        match self.tx.try_send(ethernet::wrap(&self.source, frame)) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("루프백 큐 가득 참, 프레임 버림");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::TransportClosed),
        }
    }
}

/// 루프백 전송과 수신 채널 생성
pub fn loopback(source: MacAddress, capacity: usize) -> (Arc<LoopbackTransport>, Receiver<Bytes>) {
    let (tx, rx) = bounded(capacity);
    (
        Arc::new(LoopbackTransport {
            source,
            tx,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }),
        rx,
    )
}

/// 수신 스레드: 채널에서 프레임을 꺼내 콜백 호출
pub struct ReceiveLoop {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<u64>>>,
}

impl ReceiveLoop {
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    pub fn spawn<F>(rx: Receiver<Bytes>, mut on_frame: F) -> std::io::Result<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("cmp-receive".into())
            .spawn(move || {
                let mut frames = 0u64;
                while flag.load(Ordering::Acquire) {
                    match rx.recv_timeout(Self::POLL_INTERVAL) {
                        Ok(frame) => {
                            frames += 1;
                            on_frame(&frame);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("수신 루프 종료: {} frames", frames);
                frames
            })?;

        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 중지 후 처리한 프레임 수 반환. 두 번째 호출부터는 None
    pub fn stop(&self) -> Option<u64> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.lock().take()?;
        handle.join().ok()
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
