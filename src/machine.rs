//! 트랜잭션 레코드와 고정 용량 테이블
//!
//! - Machine: 공개 상태 + 내부 플래그, 저장된 PDU, 타이머 3개, 열린 파일, 갭 리스트
//! - MachineList: 세대 태그 핸들로 접근하는 슬롯 배열
//!   (해제된 슬롯의 옛 핸들은 None으로 해석됨)

use std::fmt;

use crate::filestore::VirtualFile;
use crate::id::TransactionId;
use crate::nak::NakList;
use crate::pdu::{Ack, Eof, Fin, PduHeader};
use crate::timer::Timer;
use crate::types::TransStatus;
use crate::MAX_GAPS_PER_TRANSACTION;

/// 트랜잭션 상태 머신 하나
pub struct Machine {
    /// 공개 상태
    pub status: TransStatus,

    pub has_a_pdu_been_received: bool,
    pub has_a_put_request_been_received: bool,
    pub has_eof_been_received: bool,
    pub has_eof_been_sent: bool,
    pub has_this_state_machine_finished: bool,
    pub have_we_initiated_a_cancel: bool,
    pub is_external_xfer_open: bool,
    pub should_external_xfer_be_closed: bool,
    pub is_there_a_temp_file: bool,

    /// 송신 대기 중인 디렉티브
    pub is_outgoing_ack_buffered: bool,
    pub is_outgoing_eof_buffered: bool,
    pub is_outgoing_fin_buffered: bool,
    pub is_outgoing_md_buffered: bool,
    pub is_outgoing_nak_buffered: bool,

    /// 모든 송신 PDU에 쓰는 헤더
    pub hdr: PduHeader,

    /// 나중에 쓰려고 저장한 PDU 내용
    pub eof: Eof,
    pub fin: Fin,
    pub ack: Ack,
    pub nak: NakList,

    pub ack_timer: Timer,
    pub nak_timer: Timer,
    pub inactivity_timer: Timer,

    /// 송신 원본 또는 수신 임시 파일
    pub file: Option<Box<dyn VirtualFile>>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            status: TransStatus::default(),
            has_a_pdu_been_received: false,
            has_a_put_request_been_received: false,
            has_eof_been_received: false,
            has_eof_been_sent: false,
            has_this_state_machine_finished: false,
            have_we_initiated_a_cancel: false,
            is_external_xfer_open: false,
            should_external_xfer_be_closed: false,
            is_there_a_temp_file: false,
            is_outgoing_ack_buffered: false,
            is_outgoing_eof_buffered: false,
            is_outgoing_fin_buffered: false,
            is_outgoing_md_buffered: false,
            is_outgoing_nak_buffered: false,
            hdr: PduHeader::default(),
            eof: Eof::default(),
            fin: Fin::default(),
            ack: Ack::default(),
            nak: NakList::for_sender(MAX_GAPS_PER_TRANSACTION),
            ack_timer: Timer::default(),
            nak_timer: Timer::default(),
            inactivity_timer: Timer::default(),
            file: None,
        }
    }

    pub fn is_there_an_open_file(&self) -> bool {
        self.file.is_some()
    }

    /// 송신 대기 플래그 전부 해제
    pub fn clear_outgoing(&mut self) {
        self.is_outgoing_ack_buffered = false;
        self.is_outgoing_eof_buffered = false;
        self.is_outgoing_fin_buffered = false;
        self.is_outgoing_md_buffered = false;
        self.is_outgoing_nak_buffered = false;
    }

    /// 타이머 3개 모두 취소
    pub fn cancel_timers(&mut self) {
        self.ack_timer.cancel();
        self.nak_timer.cancel();
        self.inactivity_timer.cancel();
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("trans", &self.hdr.trans)
            .field("role", &self.status.role)
            .field("state", &self.status.state)
            .field("phase", &self.status.phase)
            .field("open_file", &self.file.is_some())
            .finish()
    }
}

/// 테이블 슬롯 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    machine: Option<Box<Machine>>,
}

/// 고정 용량 트랜잭션 테이블
#[derive(Debug)]
pub struct MachineList {
    slots: Vec<Slot>,
    in_use: usize,
}

impl MachineList {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                machine: None,
            })
            .collect();
        Self { slots, in_use: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 사용 중인 슬롯 수
    pub fn len(&self) -> usize {
        self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    pub fn is_full(&self) -> bool {
        self.in_use == self.slots.len()
    }

    /// 첫 빈 슬롯에 새 머신 할당, 가득 차면 None
    pub fn allocate(&mut self) -> Option<Handle> {
        let index = self.slots.iter().position(|s| s.machine.is_none())?;
        let slot = &mut self.slots[index];
        slot.machine = Some(Box::new(Machine::new()));
        self.in_use += 1;
        Some(Handle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// 슬롯 해제, 옛 핸들은 무효화
    pub fn deallocate(&mut self, handle: Handle) -> Option<Box<Machine>> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let machine = slot.machine.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.in_use -= 1;
        Some(machine)
    }

    pub fn get(&self, handle: Handle) -> Option<&Machine> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.machine.as_deref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Machine> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.machine.as_deref_mut()
    }

    /// 트랜잭션 ID로 검색 (선형 탐색)
    pub fn lookup(&self, trans: &TransactionId) -> Option<Handle> {
        self.iter()
            .find(|(_, m)| &m.hdr.trans == trans)
            .map(|(h, _)| h)
    }

    /// 사용 중인 슬롯 핸들 (순회 중 해제해도 안전하도록 복사본)
    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(h, _)| h).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Machine)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.machine.as_deref().map(|m| {
                (
                    Handle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    m,
                )
            })
        })
    }
}
