//! PDU 출력 경로
//!
//! - PduOutput: 링크 열기, 송신 허가(green light), 송신
//! - QueueOutput: 송신 PDU를 공유 큐에 기록, 허가를 켜고 끌 수 있음

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::id::{Id, TransactionId};

/// 송신 허가를 물을 때의 PDU 구분
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduClass {
    FileDirective,
    FileData,
}

/// PDU 출력 콜백
pub trait PduOutput: Send {
    /// 파트너와의 링크 준비 (실패하면 트랜잭션을 만들지 않음)
    fn open(&mut self, my_id: Id, partner: Id) -> bool;

    /// 지금 이 종류의 PDU를 보내도 되는지
    fn ready(&mut self, class: PduClass, trans: TransactionId, partner: Id) -> bool;

    fn send(&mut self, trans: TransactionId, partner: Id, pdu: Bytes);
}

/// 송신된 PDU 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPdu {
    pub trans: TransactionId,
    pub partner: Id,
    pub bytes: Bytes,
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<OutgoingPdu>,
    directive_light: bool,
    data_light: bool,
    unreachable: Vec<Id>,
}

/// 공유 큐 출력 (clone은 같은 큐를 공유)
#[derive(Debug, Clone)]
pub struct QueueOutput {
    state: Arc<Mutex<QueueState>>,
}

impl Default for QueueOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueOutput {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                directive_light: true,
                data_light: true,
                unreachable: Vec::new(),
            })),
        }
    }

    /// 두 종류 모두 허가 설정
    pub fn set_green_light(&self, on: bool) {
        let mut state = self.state.lock();
        state.directive_light = on;
        state.data_light = on;
    }

    /// Filedata만 허가 설정
    pub fn set_data_light(&self, on: bool) {
        self.state.lock().data_light = on;
    }

    /// 링크를 열 수 없는 파트너 지정
    pub fn set_unreachable(&self, partner: Id) {
        self.state.lock().unreachable.push(partner);
    }

    /// 큐에서 하나 꺼냄
    pub fn pop(&self) -> Option<OutgoingPdu> {
        self.state.lock().queue.pop_front()
    }

    /// 전부 꺼냄
    pub fn drain(&self) -> Vec<OutgoingPdu> {
        self.state.lock().queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}

impl PduOutput for QueueOutput {
    fn open(&mut self, _my_id: Id, partner: Id) -> bool {
        !self.state.lock().unreachable.contains(&partner)
    }

    fn ready(&mut self, class: PduClass, _trans: TransactionId, _partner: Id) -> bool {
        let state = self.state.lock();
        match class {
            PduClass::FileDirective => state.directive_light,
            PduClass::FileData => state.data_light,
        }
    }

    fn send(&mut self, trans: TransactionId, partner: Id, pdu: Bytes) {
        self.state.lock().queue.push_back(OutgoingPdu {
            trans,
            partner,
            bytes: pdu,
        });
    }
}
