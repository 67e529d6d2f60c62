//! 엔드포인트 라우터
//!
//! (장치, 인터페이스, 스트림) 키 -> 핸들러 목록 멀티맵.
//! 핸들러 호출 중에는 락을 잡지 않는다: 목록을 복사한 뒤 락을 풀고 호출하므로
//! 핸들러 안에서 구독/해지를 해도 교착이나 순회 손상이 없다.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::packet::Packet;

/// 라우팅 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub device_id: u16,
    pub interface_id: u32,
    pub stream_id: u8,
}

impl EndpointKey {
    pub fn new(device_id: u16, interface_id: u32, stream_id: u8) -> Self {
        Self {
            device_id,
            interface_id,
            stream_id,
        }
    }
}

impl From<&Packet> for EndpointKey {
    fn from(packet: &Packet) -> Self {
        Self::new(packet.device_id, packet.interface_id, packet.stream_id)
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.device_id, self.interface_id, self.stream_id)
    }
}

/// 패킷 수신 핸들러
pub trait PacketHandler: Send + Sync {
    /// 키에 해당하는 패킷 묶음 수신. 오래 블록하면 안 됨
    fn receive(&self, key: &EndpointKey, packets: &[Arc<Packet>]);
}

impl<F> PacketHandler for F
where
    F: Fn(&EndpointKey, &[Arc<Packet>]) + Send + Sync,
{
    fn receive(&self, key: &EndpointKey, packets: &[Arc<Packet>]) {
        self(key, packets)
    }
}

pub type HandlerRef = Arc<dyn PacketHandler>;

/// 같은 핸들러 객체인지 (vtable 무시, 데이터 포인터만 비교)
fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// 라우터
#[derive(Default)]
pub struct Router {
    handlers: Mutex<HashMap<EndpointKey, Vec<HandlerRef>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// 구독. 같은 키에 같은 핸들러는 한 번만 등록
    pub fn subscribe(&self, key: EndpointKey, handler: HandlerRef) -> bool {
        let mut map = self.handlers.lock();
        let list = map.entry(key).or_default();
        if list.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        list.push(handler);
        true
    }

    pub fn unsubscribe(&self, key: &EndpointKey, handler: &HandlerRef) -> bool {
        let mut map = self.handlers.lock();
        Self::remove_locked(&mut map, key, handler)
    }

    fn remove_locked(
        map: &mut HashMap<EndpointKey, Vec<HandlerRef>>,
        key: &EndpointKey,
        handler: &HandlerRef,
    ) -> bool {
        let Some(list) = map.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !same_handler(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(key);
        }
        removed
    }

    /// 키 변경: 해지와 구독을 하나의 락 안에서 수행
    pub fn rebind(&self, old_key: &EndpointKey, new_key: EndpointKey, handler: &HandlerRef) {
        if *old_key == new_key {
            return;
        }
        let mut map = self.handlers.lock();
        Self::remove_locked(&mut map, old_key, handler);
        let list = map.entry(new_key).or_default();
        if !list.iter().any(|h| same_handler(h, handler)) {
            list.push(handler.clone());
        }
        debug!("핸들러 키 변경: {} -> {}", old_key, new_key);
    }

    /// 키의 모든 핸들러에 전달. 호출한 핸들러 수 반환
    pub fn publish(&self, key: &EndpointKey, packets: &[Arc<Packet>]) -> usize {
        let snapshot: Vec<HandlerRef> = match self.handlers.lock().get(key) {
            Some(list) => list.clone(),
            None => return 0,
        };

        for handler in &snapshot {
            handler.receive(key, packets);
        }
        snapshot.len()
    }

    /// 섞인 패킷들을 키별로 묶어 전달 (키 안에서는 도착 순서 유지)
    pub fn dispatch(&self, packets: &[Arc<Packet>]) -> usize {
        let mut groups: Vec<(EndpointKey, Vec<Arc<Packet>>)> = Vec::new();
        for packet in packets {
            let key = EndpointKey::from(packet.as_ref());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(packet.clone()),
                None => groups.push((key, vec![packet.clone()])),
            }
        }

        groups
            .iter()
            .map(|(key, group)| self.publish(key, group))
            .sum()
    }

    /// 등록된 (키, 핸들러) 쌍의 수
    pub fn size(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    pub fn handler_count(&self, key: &EndpointKey) -> usize {
        self.handlers.lock().get(key).map_or(0, Vec::len)
    }

    pub fn keys(&self) -> Vec<EndpointKey> {
        self.handlers.lock().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("size", &self.size()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CanPayload, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn packet(device_id: u16, interface_id: u32, stream_id: u8) -> Arc<Packet> {
        Arc::new(
            Packet::new(interface_id, 0, Payload::Can(CanPayload::new(1, vec![1])))
                .with_address(device_id, stream_id),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, HandlerRef) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: HandlerRef = Arc::new(move |_: &EndpointKey, packets: &[Arc<Packet>]| {
            c.fetch_add(packets.len(), Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_fan_out_each_handler_once() {
        for n in 0..5 {
            let router = Router::new();
            let key = EndpointKey::new(1, 2, 3);
            let counters: Vec<_> = (0..n)
                .map(|_| {
                    let (count, handler) = counter();
                    assert!(router.subscribe(key, handler));
                    count
                })
                .collect();
            let (other, other_handler) = counter();
            router.subscribe(EndpointKey::new(1, 2, 4), other_handler);

            assert_eq!(router.publish(&key, &[packet(1, 2, 3)]), n);
            assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
            assert_eq!(other.load(Ordering::SeqCst), 0);
            assert_eq!(router.size(), n + 1);
        }
    }

    #[test]
    fn test_duplicate_subscribe_ignored() {
        let router = Router::new();
        let key = EndpointKey::new(0, 1, 1);
        let (count, handler) = counter();
        assert!(router.subscribe(key, handler.clone()));
        assert!(!router.subscribe(key, handler.clone()));
        router.publish(&key, &[packet(0, 1, 1)]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(router.unsubscribe(&key, &handler));
        assert!(!router.unsubscribe(&key, &handler));
        assert_eq!(router.size(), 0);
    }

    #[test]
    fn test_unsubscribe_inside_handler() {
        struct SelfRemoving {
            router: Arc<Router>,
            me: Mutex<Option<HandlerRef>>,
            calls: AtomicUsize,
        }
        impl PacketHandler for SelfRemoving {
            fn receive(&self, key: &EndpointKey, _packets: &[Arc<Packet>]) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = self.me.lock().take() {
                    self.router.unsubscribe(key, &me);
                }
            }
        }

        let router = Arc::new(Router::new());
        let key = EndpointKey::new(0, 1, 1);
        let handler = Arc::new(SelfRemoving {
            router: router.clone(),
            me: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        let handler_ref: HandlerRef = handler.clone();
        *handler.me.lock() = Some(handler_ref.clone());
        router.subscribe(key, handler_ref);
        let (count, other) = counter();
        router.subscribe(key, other);

        assert_eq!(router.publish(&key, &[packet(0, 1, 1)]), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.publish(&key, &[packet(0, 1, 1)]), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rebind_moves_handler() {
        let router = Router::new();
        let old_key = EndpointKey::new(0, 1, 2);
        let new_key = EndpointKey::new(0, 1, 100);
        let (count, handler) = counter();
        router.subscribe(old_key, handler.clone());

        router.rebind(&old_key, new_key, &handler);
        assert_eq!(router.publish(&old_key, &[packet(0, 1, 2)]), 0);
        assert_eq!(router.publish(&new_key, &[packet(0, 1, 100)]), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.keys(), vec![new_key]);
    }

    #[test]
    fn test_dispatch_groups_by_key() {
        let router = Router::new();
        let (a, handler_a) = counter();
        let (b, handler_b) = counter();
        router.subscribe(EndpointKey::new(0, 1, 1), handler_a);
        router.subscribe(EndpointKey::new(0, 1, 2), handler_b);

        let packets = vec![packet(0, 1, 1), packet(0, 1, 2), packet(0, 1, 1), packet(9, 9, 9)];
        assert_eq!(router.dispatch(&packets), 2);
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_publish_and_subscribe() {
        let router = Arc::new(Router::new());
        let key = EndpointKey::new(0, 1, 1);
        let (count, handler) = counter();
        router.subscribe(key, handler);

        let publisher = {
            let router = router.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    router.publish(&key, &[packet(0, 1, 1)]);
                }
            })
        };
        let churn = {
            let router = router.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let (_, h) = counter();
                    router.subscribe(key, h.clone());
                    router.unsubscribe(&key, &h);
                }
            })
        };
        publisher.join().unwrap();
        churn.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1000);
        assert_eq!(router.size(), 1);
    }
}
