//! 주기 작업 스레드
//!
//! 조건변수에서 타임아웃으로 깨어나 작업을 반복한다.
//! `stop()`은 플래그를 세우고 조건변수를 깨운 뒤 스레드를 join한다.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

struct Shared {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

/// 주기 작업 스레드 핸들
pub struct PeriodicWorker {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl PeriodicWorker {
    /// 작업 스레드 시작. 작업이 false를 반환하면 루프 종료
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let mut deadline = Instant::now() + interval;
            loop {
                {
                    let mut stopped = thread_shared.stopped.lock();
                    while !*stopped {
                        if thread_shared.condvar.wait_until(&mut stopped, deadline).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        break;
                    }
                }

                if !task() {
                    break;
                }
                deadline += interval;
                let now = Instant::now();
                if deadline < now {
                    deadline = now + interval;
                }
            }
        })?;

        debug!("주기 작업 시작: {} ({:?})", name, interval);
        Ok(Self {
            name,
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// 중지. 여러 번 불러도 안전
    pub fn stop(&self) {
        {
            let mut stopped = self.shared.stopped.lock();
            *stopped = true;
            self.shared.condvar.notify_all();
        }

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // 작업 스레드 자신이 stop을 부르면 join하지 않음
        if thread::current().id() == self.thread_id {
            return;
        }
        if handle.join().is_err() {
            debug!("주기 작업 스레드 패닉: {}", self.name);
        } else {
            debug!("주기 작업 중지: {}", self.name);
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicWorker").field("name", &self.name).finish()
    }
}
