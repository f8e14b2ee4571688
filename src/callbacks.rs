//! 엔진 협력자 묶음
//!
//! 파일 저장소, 알림, PDU 출력, 시계를 한 곳에 모아 엔진에 주입한다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::filestore::{Filestore, MemoryFilestore};
use crate::indication::{Indication, LogIndication};
use crate::output::{PduOutput, QueueOutput};

/// 현재 시각 (초)
pub trait Clock: Send {
    fn now(&self) -> u64;
}

/// 벽시계
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// 수동 시계 (clone은 같은 시각을 공유)
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// 엔진에 주입하는 협력자
pub struct Callbacks {
    pub filestore: Box<dyn Filestore>,
    pub indication: Box<dyn Indication>,
    pub output: Box<dyn PduOutput>,
    pub clock: Box<dyn Clock>,
}

impl Callbacks {
    pub fn new(
        filestore: impl Filestore + 'static,
        indication: impl Indication + 'static,
        output: impl PduOutput + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            filestore: Box::new(filestore),
            indication: Box::new(indication),
            output: Box::new(output),
            clock: Box::new(clock),
        }
    }

    /// 메모리 저장소 + 로그 알림 + 큐 출력 + 벽시계
    pub fn in_memory() -> Self {
        Self::new(
            MemoryFilestore::new(),
            LogIndication,
            QueueOutput::new(),
            SystemClock,
        )
    }
}
