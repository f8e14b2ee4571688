//! CFDP 엔진 디스패처
//!
//! - `submit_request`: 사용자 요청 문자열을 해석해 트랜잭션에 전달
//! - `submit_pdu`: 수신 PDU 검사 후 기존 트랜잭션에 전달하거나 새 트랜잭션 생성
//! - `cycle`: 타이머 만료 확인과 디렉티브 방출, 그 다음 Filedata 방출
//!
//! 모든 진입점이 `&mut self`를 받으므로 한 트랜잭션의 상태 테이블이
//! 실행 중에 다시 호출될 수 없다.

use tracing::{debug, error, info, warn};

use crate::actions::{self, Context, Origin};
use crate::callbacks::Callbacks;
use crate::config::Config;
use crate::event::Event;
use crate::id::{Id, TransactionId};
use crate::machine::{Handle, Machine, MachineList};
use crate::pdu::{Pdu, PduKind};
use crate::request::{PutRequest, Request, Target};
use crate::timer::Timer;
use crate::types::{ConditionCode, IndicationType, Role, SummaryStatus, TimerType, TransStatus};
use crate::{r1, r2, s1, s2, Error, Result, MAX_AS_STRING_LENGTH};

/// 종료된 트랜잭션 누적 통계
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    successful_senders: u32,
    unsuccessful_senders: u32,
    successful_receivers: u32,
    unsuccessful_receivers: u32,
}

/// CFDP 엔진
pub struct Engine {
    /// MIB
    config: Config,

    /// 파일 저장소, 알림, 출력, 시계
    callbacks: Callbacks,

    /// 트랜잭션 테이블
    machines: MachineList,

    /// 다음 송신 트랜잭션 시퀀스 번호
    next_sequence: u32,

    /// 새 트랜잭션이 물려받는 동결 상태
    partners_frozen: bool,

    totals: Totals,
    last_condition_code: ConditionCode,
    last_trans_abandoned: bool,
}

/// 설정과 협력자에서 상태 테이블 컨텍스트 구성
fn context<'a>(config: &'a Config, callbacks: &'a mut Callbacks) -> Context<'a> {
    let now = callbacks.clock.now();
    let Callbacks {
        filestore,
        indication,
        output,
        ..
    } = callbacks;
    Context {
        config,
        filestore: &**filestore,
        indication: &mut **indication,
        output: &mut **output,
        now,
    }
}

/// 수신 PDU 종류가 로컬 역할에 맞는지
fn is_pdu_sane(kind: PduKind, role: Role) -> bool {
    match kind {
        PduKind::Metadata | PduKind::FileData | PduKind::Eof => role.is_receiver(),
        PduKind::AckEof | PduKind::Nak | PduKind::Fin => role == Role::Class2Sender,
        PduKind::AckFin => role == Role::Class2Receiver,
        PduKind::DontKnow => true,
    }
}

impl Engine {
    /// 새 엔진 생성
    pub fn new(config: Config, callbacks: Callbacks) -> Self {
        info!(
            "CFDP engine started (id={}, max {} transactions)",
            config.my_id, config.max_concurrent_transactions
        );
        Self {
            machines: MachineList::new(config.max_concurrent_transactions),
            config,
            callbacks,
            next_sequence: 1,
            partners_frozen: false,
            totals: Totals::default(),
            last_condition_code: ConditionCode::NoError,
            last_trans_abandoned: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// MIB 파라미터 텍스트 설정
    pub fn set_mib_parameter(&mut self, param: &str, value: &str) -> Result<()> {
        self.config.set_parameter(param, value)?;
        debug!("MIB {} = {}", param, value);
        Ok(())
    }

    /// 사용자 요청 처리
    ///
    /// 빈 문자열은 무시된다. 자기 자신에게 보내는 Put은 거부한다.
    pub fn submit_request(&mut self, text: &str) -> Result<()> {
        let Some(request) = Request::parse(text)? else {
            debug!("빈 요청 무시");
            return Ok(());
        };
        let event = Event::from_request(&request);

        match &request {
            Request::Put(put) => {
                if put.dest_id == self.config.my_id {
                    return Err(Error::SendToSelf(put.dest_id));
                }
                self.start_sender(put)?;
            }
            Request::Freeze => {
                self.give_to_all(event);
                self.partners_frozen = true;
            }
            Request::Thaw => {
                self.give_to_all(event);
                self.partners_frozen = false;
            }
            _ => match request.target() {
                Some(Target::All) => self.give_to_all(event),
                Some(Target::One(trans)) => {
                    let handle = self
                        .machines
                        .lookup(&trans)
                        .ok_or(Error::UnknownTransaction(trans))?;
                    self.dispatch(handle, event, None, None);
                }
                None => return Err(Error::InvalidRequest(text.to_string())),
            },
        }
        Ok(())
    }

    /// 수신 PDU 처리
    pub fn submit_pdu(&mut self, raw: &[u8]) -> Result<()> {
        let pdu = Pdu::decode(raw, &self.config.my_id)?;
        let kind = pdu.kind();
        if kind == PduKind::DontKnow {
            debug!("처리하지 않는 PDU 무시 ({})", pdu.header.trans);
            return Ok(());
        }

        let role = pdu.header.receiver_role();
        if !is_pdu_sane(kind, role) {
            warn!("역할 {}에 맞지 않는 {:?} PDU ({})", role, kind, pdu.header.trans);
            return Err(Error::PduNotSane(format!(
                "{:?} PDU for role {} ({})",
                kind, role, pdu.header.trans
            )));
        }

        let Some(event) = Event::from_pdu(&pdu) else {
            return Ok(());
        };

        if let Some(handle) = self.machines.lookup(&pdu.header.trans) {
            let now = self.callbacks.clock.now();
            let timeout = self.config.inactivity_timeout as u64;
            if let Some(m) = self.machines.get_mut(handle) {
                if !m.status.frozen && !m.status.suspended {
                    m.inactivity_timer = Timer::start(timeout, now);
                }
            }
            self.dispatch(handle, event, Some(&pdu), None);
            return Ok(());
        }

        match kind {
            PduKind::Metadata | PduKind::FileData | PduKind::Eof => {
                let partner = pdu.header.trans.source;
                let handle = self.allocate(partner)?;
                self.init_from_pdu(handle, &pdu);
                self.dispatch(handle, event, Some(&pdu), None);
            }
            PduKind::Fin => {
                // 이미 끝난 송신 트랜잭션의 Finished 재전송: ACK만 다시 보냄
                let partner = pdu.header.dest_id;
                let handle = self.allocate(partner)?;
                self.init_from_pdu(handle, &pdu);
                self.dispatch(handle, event, Some(&pdu), None);
            }
            _ => debug!(
                "알 수 없는 트랜잭션의 {:?} PDU 무시 ({})",
                kind, pdu.header.trans
            ),
        }
        Ok(())
    }

    /// 엔진 한 사이클
    ///
    /// 1단계: 트랜잭션마다 타이머 만료, 외부 전송 종료, 디렉티브 방출 중 하나
    /// 2단계: 송신 트랜잭션마다 Filedata 하나
    pub fn cycle(&mut self) {
        let now = self.callbacks.clock.now();

        for handle in self.machines.handles() {
            let Some(m) = self.machines.get_mut(handle) else {
                continue;
            };
            let event = if m.inactivity_timer.expired(now) {
                m.inactivity_timer.cancel();
                Some(Event::InactivityTimerExpired)
            } else if m.ack_timer.expired(now) {
                m.ack_timer.cancel();
                Some(Event::AckTimerExpired)
            } else if m.nak_timer.expired(now) {
                m.nak_timer.cancel();
                Some(Event::NakTimerExpired)
            } else if m.should_external_xfer_be_closed {
                m.should_external_xfer_be_closed = false;
                Some(Event::ExternalFileTransferCompleted)
            } else if m.status.role != Role::Class1Receiver {
                Some(Event::ThrottleFileDir)
            } else {
                None
            };
            if let Some(event) = event {
                self.dispatch(handle, event, None, None);
            }
        }

        for handle in self.machines.handles() {
            let is_sender = self
                .machines
                .get(handle)
                .is_some_and(|m| m.status.role.is_sender());
            if is_sender {
                self.dispatch(handle, Event::ThrottleFileData, None, None);
            }
        }
    }

    // -----------------------------------------------------------------------
    // 조회
    // -----------------------------------------------------------------------

    fn machine(&self, trans: &TransactionId) -> Result<&Machine> {
        self.machines
            .lookup(trans)
            .and_then(|h| self.machines.get(h))
            .ok_or(Error::UnknownTransaction(*trans))
    }

    fn machine_mut(&mut self, trans: &TransactionId) -> Result<&mut Machine> {
        let handle = self
            .machines
            .lookup(trans)
            .ok_or(Error::UnknownTransaction(*trans))?;
        self.machines
            .get_mut(handle)
            .ok_or(Error::UnknownTransaction(*trans))
    }

    pub fn transaction_status(&self, trans: &TransactionId) -> Result<TransStatus> {
        Ok(self.machine(trans)?.status.clone())
    }

    /// 첫 번째로 켜져 있는 타이머 (ack, nak, inactivity 순)와 남은 초
    pub fn transaction_timer_status(&self, trans: &TransactionId) -> Result<(TimerType, u64)> {
        let m = self.machine(trans)?;
        let now = self.callbacks.clock.now();
        let timers = [
            (TimerType::Ack, &m.ack_timer),
            (TimerType::Nak, &m.nak_timer),
            (TimerType::Inactivity, &m.inactivity_timer),
        ];
        Ok(timers
            .iter()
            .find(|(_, timer)| !timer.is_off())
            .map(|(kind, timer)| (*kind, timer.read(now)))
            .unwrap_or((TimerType::None, 0)))
    }

    /// (전송된 바이트, 파일 크기)
    pub fn transaction_progress(&self, trans: &TransactionId) -> Result<(u32, u32)> {
        let m = self.machine(trans)?;
        if m.status.role.is_sender() {
            let file_size = m.status.md.file_size;
            Ok((file_size.saturating_sub(m.nak.bytes_missing()), file_size))
        } else {
            let file_size = if m.status.has_md_been_received {
                m.status.md.file_size
            } else if m.has_eof_been_received {
                m.eof.file_size
            } else {
                0
            };
            Ok((m.nak.bytes_received(), file_size))
        }
    }

    pub fn transaction_gaps_as_string(&self, trans: &TransactionId) -> Result<String> {
        Ok(self.machine(trans)?.nak.gaps_as_string(MAX_AS_STRING_LENGTH))
    }

    pub fn summary_status(&self) -> SummaryStatus {
        let mut summary = SummaryStatus {
            are_any_partners_frozen: self.partners_frozen,
            total_files_sent: self.totals.successful_senders,
            total_files_received: self.totals.successful_receivers,
            total_unsuccessful_senders: self.totals.unsuccessful_senders,
            total_unsuccessful_receivers: self.totals.unsuccessful_receivers,
            ..SummaryStatus::default()
        };
        for (_, m) in self.machines.iter() {
            if m.status.role.is_sender() {
                summary.how_many_senders += 1;
            } else {
                summary.how_many_receivers += 1;
            }
            if m.status.frozen {
                summary.how_many_frozen += 1;
            }
            if m.status.suspended {
                summary.how_many_suspended += 1;
            }
        }
        summary
    }

    /// 누적 통계 초기화
    pub fn reset_totals(&mut self) {
        self.totals = Totals::default();
    }

    pub fn set_trans_seq_num(&mut self, value: u32) {
        self.next_sequence = value;
    }

    pub fn how_many_active_trans(&self) -> usize {
        self.machines.len()
    }

    pub fn is_a_trans_being_cancelled(&self) -> bool {
        self.machines.iter().any(|(_, m)| m.status.cancelled)
    }

    /// 마지막으로 끝난 트랜잭션의 condition code
    pub fn last_condition_code(&self) -> ConditionCode {
        self.last_condition_code
    }

    pub fn was_last_trans_abandoned(&self) -> bool {
        self.last_trans_abandoned
    }

    /// 활성 트랜잭션 ID 목록
    pub fn transactions(&self) -> Vec<TransactionId> {
        self.machines.iter().map(|(_, m)| m.hdr.trans).collect()
    }

    // -----------------------------------------------------------------------
    // 외부 파일 전송
    // -----------------------------------------------------------------------

    /// Filedata를 엔진 밖에서 보내도록 전환 (송신자만)
    pub fn open_external_file_xfer(&mut self, trans: &TransactionId) -> Result<()> {
        let m = self.machine_mut(trans)?;
        if !m.status.role.is_sender() {
            return Err(Error::InvalidTransaction(format!(
                "{}: 송신자가 아니라 외부 전송 불가",
                trans
            )));
        }
        m.status.external_file_xfer = true;
        m.is_external_xfer_open = true;
        Ok(())
    }

    /// 외부 전송 완료, 다음 사이클에서 EOF 대기열에 넣음
    pub fn close_external_file_xfer(&mut self, trans: &TransactionId) -> Result<()> {
        let m = self.machine_mut(trans)?;
        if !m.is_external_xfer_open {
            return Err(Error::InvalidTransaction(format!(
                "{}: 열린 외부 전송 없음",
                trans
            )));
        }
        m.status.external_file_xfer = false;
        m.should_external_xfer_be_closed = true;
        Ok(())
    }

    /// 외부에서 계산한 체크섬 설정
    pub fn set_file_checksum(&mut self, trans: &TransactionId, checksum: u32) -> Result<()> {
        self.machine_mut(trans)?.status.file_checksum_as_calculated = checksum;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 내부
    // -----------------------------------------------------------------------

    /// 링크 확인 후 슬롯 할당
    fn allocate(&mut self, partner: Id) -> Result<Handle> {
        if !self.callbacks.output.open(self.config.my_id, partner) {
            error!("노드 {}와 통신 불가, 요청 폐기", partner);
            return Err(Error::LinkUnavailable(partner));
        }
        self.machines.allocate().ok_or_else(|| {
            error!(
                "트랜잭션 테이블 가득 참 (최대 {}개), 요청 폐기",
                self.machines.capacity()
            );
            Error::TableFull {
                capacity: self.machines.capacity(),
            }
        })
    }

    fn start_sender(&mut self, put: &PutRequest) -> Result<()> {
        let handle = self.allocate(put.dest_id)?;
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let Self {
            config,
            callbacks,
            machines,
            partners_frozen,
            ..
        } = self;
        if let Some(m) = machines.get_mut(handle) {
            let ctx = context(config, callbacks);
            actions::initialize(
                m,
                &ctx,
                Origin::Put {
                    request: put,
                    sequence,
                },
                *partners_frozen,
            );
        }
        self.dispatch(handle, Event::PutRequest, None, Some(put));
        Ok(())
    }

    fn init_from_pdu(&mut self, handle: Handle, pdu: &Pdu) {
        let Self {
            config,
            callbacks,
            machines,
            partners_frozen,
            ..
        } = self;
        if let Some(m) = machines.get_mut(handle) {
            let ctx = context(config, callbacks);
            actions::initialize(m, &ctx, Origin::Pdu(&pdu.header), *partners_frozen);
        }
    }

    fn give_to_all(&mut self, event: Event) {
        for handle in self.machines.handles() {
            self.dispatch(handle, event, None, None);
        }
    }

    /// 역할별 상태 테이블 실행, 끝난 머신은 해제
    fn dispatch(
        &mut self,
        handle: Handle,
        event: Event,
        pdu: Option<&Pdu>,
        put: Option<&PutRequest>,
    ) {
        let finished = {
            let Self {
                config,
                callbacks,
                machines,
                ..
            } = self;
            let Some(m) = machines.get_mut(handle) else {
                error!("invariant: 해제된 트랜잭션에 이벤트 '{}'", event);
                return;
            };
            let mut ctx = context(config, callbacks);
            match m.status.role {
                Role::Class1Sender => s1::state_table(m, &mut ctx, event, pdu, put),
                Role::Class2Sender => s2::state_table(m, &mut ctx, event, pdu, put),
                Role::Class1Receiver => r1::state_table(m, &mut ctx, event, pdu, put),
                Role::Class2Receiver => r2::state_table(m, &mut ctx, event, pdu, put),
            }
            m.has_this_state_machine_finished
        };

        if finished {
            self.retire(handle);
        }
    }

    /// 끝난 머신의 통계 반영 후 슬롯 해제
    fn retire(&mut self, handle: Handle) {
        let Some(m) = self.machines.deallocate(handle) else {
            error!("invariant: 끝난 머신 해제 실패");
            return;
        };
        let status = &m.status;
        let successful = status.condition_code == ConditionCode::NoError && !status.abandoned;

        if status.role.is_sender() {
            if !status.is_this_trans_solely_for_ack_fin {
                if successful {
                    self.totals.successful_senders += 1;
                } else {
                    self.totals.unsuccessful_senders += 1;
                }
            }
        } else if successful {
            self.totals.successful_receivers += 1;
        } else {
            self.totals.unsuccessful_receivers += 1;
        }

        self.last_condition_code = status.condition_code;
        self.last_trans_abandoned = status.abandoned;

        let mut ctx = context(&self.config, &mut self.callbacks);
        ctx.notify(IndicationType::MachineDeallocated, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::ManualClock;
    use crate::checksum::checksum_of;
    use crate::filestore::MemoryFilestore;
    use crate::indication::ChannelIndication;
    use crate::output::QueueOutput;
    use crate::pdu::{self, Eof, FileData, Metadata, PduBody, PduHeader};
    use crate::types::{DeliveryCode, FinalStatus};
    use bytes::Bytes;
    use crossbeam_channel::Receiver;

    /// 엔진 하나와 관찰용 핸들
    struct Node {
        engine: Engine,
        fs: MemoryFilestore,
        out: QueueOutput,
        indications: Receiver<(IndicationType, TransStatus)>,
    }

    impl Node {
        fn new(id: u8, clock: &ManualClock) -> Self {
            Self::with_config(Config::with_id(Id::from(id)), clock)
        }

        fn with_config(config: Config, clock: &ManualClock) -> Self {
            let fs = MemoryFilestore::new();
            let out = QueueOutput::new();
            let (indication, indications) = ChannelIndication::unbounded();
            let callbacks = Callbacks::new(fs.clone(), indication, out.clone(), clock.clone());
            Self {
                engine: Engine::new(config, callbacks),
                fs,
                out,
                indications,
            }
        }

        fn sent(&self) -> Vec<Pdu> {
            self.out
                .drain()
                .into_iter()
                .map(|o| Pdu::from_bytes(&o.bytes).unwrap())
                .collect()
        }

        fn kinds(&self) -> Vec<IndicationType> {
            self.indications.try_iter().map(|(k, _)| k).collect()
        }

        fn submit(&mut self, pdu: &Pdu) -> Result<()> {
            self.engine.submit_pdu(&pdu.to_bytes())
        }
    }

    /// 한쪽 출력 전부를 다른 쪽 입력으로 (drop이 true인 PDU는 버림)
    fn deliver(from: &Node, to: &mut Node, mut drop: impl FnMut(&Pdu) -> bool) {
        for out in from.out.drain() {
            let pdu = Pdu::from_bytes(&out.bytes).unwrap();
            if !drop(&pdu) {
                to.engine.submit_pdu(&out.bytes).unwrap();
            }
        }
    }

    fn header_from_88(class1: bool) -> PduHeader {
        PduHeader {
            mode: if class1 {
                pdu::Mode::Unacknowledged
            } else {
                pdu::Mode::Acknowledged
            },
            trans: TransactionId::new(Id::from(88), 5),
            dest_id: Id::from(23),
            ..PduHeader::default()
        }
    }

    fn md_pdu(hdr: PduHeader, size: u32) -> Pdu {
        pdu::make_md(
            hdr,
            &Metadata {
                segmentation_control: false,
                file_size: size,
                source_file_name: "src.bin".into(),
                dest_file_name: "dst.bin".into(),
                file_transfer: true,
            },
        )
    }

    fn fd_pdu(hdr: PduHeader, offset: u32, data: &[u8]) -> Pdu {
        Pdu::new(
            hdr,
            PduBody::FileData(FileData {
                offset,
                data: Bytes::copy_from_slice(data),
            }),
        )
    }

    fn eof_pdu(hdr: PduHeader, checksum: u32, size: u32) -> Pdu {
        pdu::make_eof(
            hdr,
            Eof {
                condition_code: ConditionCode::NoError,
                file_checksum: checksum,
                file_size: size,
            },
        )
    }

    #[test]
    fn test_class1_ten_byte_file() {
        let clock = ManualClock::new(100);
        let mut node = Node::new(88, &clock);
        node.fs.insert("ten.bin", b"0123456789".to_vec());

        node.engine
            .submit_request("PUT -class1 ten.bin 23 out.bin")
            .unwrap();
        assert_eq!(node.engine.how_many_active_trans(), 1);

        node.engine.cycle();
        node.engine.cycle();

        let sent = node.sent();
        assert_eq!(sent.len(), 3);
        assert!(matches!(sent[0].body, PduBody::Metadata(_)));
        match &sent[1].body {
            PduBody::FileData(fd) => {
                assert_eq!(fd.offset, 0);
                assert_eq!(fd.data.len(), 10);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &sent[2].body {
            PduBody::Eof(eof) => {
                assert_eq!(eof.condition_code, ConditionCode::NoError);
                assert_eq!(eof.file_size, 10);
                assert_eq!(eof.file_checksum, checksum_of(b"0123456789"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sent[0].header.trans, TransactionId::new(Id::from(88), 1));

        // 끝난 머신은 해제되고 통계에 반영
        assert_eq!(node.engine.how_many_active_trans(), 0);
        let summary = node.engine.summary_status();
        assert_eq!(summary.total_files_sent, 1);
        assert_eq!(summary.total_unsuccessful_senders, 0);

        let finished = node
            .indications
            .try_iter()
            .find(|(k, _)| *k == IndicationType::TransactionFinished)
            .unwrap();
        assert_eq!(finished.1.final_status, FinalStatus::Successful);
    }

    #[test]
    fn test_class1_back_to_back() {
        let clock = ManualClock::new(100);
        let mut sender = Node::new(88, &clock);
        let mut receiver = Node::new(23, &clock);
        let data: Vec<u8> = (0..=255u8).cycle().take(777).collect();
        sender.fs.insert("big.bin", data.clone());

        sender
            .engine
            .submit_request("PUT -class1 big.bin 23 copy.bin")
            .unwrap();
        for _ in 0..40 {
            sender.engine.cycle();
            deliver(&sender, &mut receiver, |_| false);
            receiver.engine.cycle();
        }

        assert_eq!(sender.engine.how_many_active_trans(), 0);
        assert_eq!(receiver.engine.how_many_active_trans(), 0);
        assert_eq!(receiver.fs.contents("copy.bin"), Some(data));
        assert_eq!(receiver.engine.summary_status().total_files_received, 1);
        // R1은 아무것도 보내지 않음
        assert!(receiver.out.is_empty());
    }

    /// 양쪽 엔진을 번갈아 돌리며 sender -> receiver 방향 PDU는 `drop`으로 거름
    fn run_class2(
        sender: &mut Node,
        receiver: &mut Node,
        mut drop: impl FnMut(&Pdu) -> bool,
        rounds: usize,
    ) {
        for _ in 0..rounds {
            sender.engine.cycle();
            deliver(sender, receiver, &mut drop);
            receiver.engine.cycle();
            deliver(receiver, sender, |_| false);
            if sender.engine.how_many_active_trans() == 0
                && receiver.engine.how_many_active_trans() == 0
            {
                break;
            }
        }
    }

    #[test]
    fn test_class2_back_to_back() {
        let clock = ManualClock::new(100);
        let mut sender = Node::new(88, &clock);
        let mut receiver = Node::new(23, &clock);
        let data: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        sender.fs.insert("a.bin", data.clone());

        sender.engine.submit_request("PUT a.bin 23 b.bin").unwrap();
        run_class2(&mut sender, &mut receiver, |_| false, 40);

        assert_eq!(receiver.fs.contents("b.bin"), Some(data));
        assert_eq!(sender.engine.how_many_active_trans(), 0);
        assert_eq!(receiver.engine.how_many_active_trans(), 0);
        assert_eq!(sender.engine.summary_status().total_files_sent, 1);
        assert_eq!(receiver.engine.summary_status().total_files_received, 1);
        assert_eq!(sender.engine.last_condition_code(), ConditionCode::NoError);

        let kinds = sender.kinds();
        assert!(kinds.contains(&IndicationType::TransactionFinished));
        assert_eq!(kinds.last(), Some(&IndicationType::MachineDeallocated));
    }

    #[test]
    fn test_class2_recovers_lost_file_data() {
        let clock = ManualClock::new(100);
        let mut sender = Node::new(88, &clock);
        let mut receiver = Node::new(23, &clock);
        let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        sender.fs.insert("a.bin", data.clone());

        sender.engine.submit_request("PUT a.bin 23 b.bin").unwrap();

        // 오프셋 100의 Filedata를 한 번만 잃어버림
        let mut dropped = false;
        run_class2(
            &mut sender,
            &mut receiver,
            |pdu| match &pdu.body {
                PduBody::FileData(fd) if fd.offset == 100 && !dropped => {
                    dropped = true;
                    true
                }
                _ => false,
            },
            80,
        );

        assert!(dropped);
        assert_eq!(receiver.fs.contents("b.bin"), Some(data));
        assert_eq!(receiver.engine.how_many_active_trans(), 0);
        assert_eq!(sender.engine.how_many_active_trans(), 0);
    }

    #[test]
    fn test_receiver_naks_missing_ranges() {
        let clock = ManualClock::new(100);
        let mut node = Node::new(23, &clock);
        let hdr = header_from_88(false);

        node.submit(&md_pdu(hdr, 300)).unwrap();
        node.submit(&fd_pdu(hdr, 100, &[1u8; 100])).unwrap();
        node.submit(&eof_pdu(hdr, 0, 300)).unwrap();

        let trans = hdr.trans;
        assert_eq!(
            node.engine.transaction_progress(&trans).unwrap(),
            (100, 300)
        );
        assert_eq!(
            node.engine.transaction_gaps_as_string(&trans).unwrap(),
            "0-100 200-300"
        );

        node.engine.cycle();
        node.engine.cycle();

        let naks: Vec<_> = node
            .sent()
            .into_iter()
            .filter_map(|p| match p.body {
                PduBody::Nak(nak) => Some(nak),
                _ => None,
            })
            .collect();
        assert_eq!(naks.len(), 1);
        assert_eq!(naks[0].gaps, vec![(0, 100), (200, 300)]);
        assert!(!naks[0].is_metadata_missing);
    }

    #[test]
    fn test_class1_checksum_mismatch_cancels_silently() {
        let clock = ManualClock::new(100);
        let mut node = Node::new(23, &clock);
        let hdr = header_from_88(true);

        node.submit(&md_pdu(hdr, 4)).unwrap();
        node.submit(&fd_pdu(hdr, 0, b"abcd")).unwrap();
        node.submit(&eof_pdu(hdr, checksum_of(b"abcd") ^ 1, 4)).unwrap();
        node.engine.cycle();

        assert_eq!(node.engine.how_many_active_trans(), 0);
        assert!(node.out.is_empty());
        assert!(!node.fs.exists("dst.bin"));
        assert_eq!(
            node.engine.last_condition_code(),
            ConditionCode::FileChecksumFailure
        );
        assert_eq!(node.engine.summary_status().total_unsuccessful_receivers, 1);
    }

    #[test]
    fn test_class2_checksum_mismatch_sends_fin_cancel() {
        let clock = ManualClock::new(100);
        let mut node = Node::new(23, &clock);
        let hdr = header_from_88(false);

        node.submit(&md_pdu(hdr, 4)).unwrap();
        node.submit(&fd_pdu(hdr, 0, b"abcd")).unwrap();
        node.submit(&eof_pdu(hdr, 7, 4)).unwrap();
        node.engine.cycle();
        node.engine.cycle();

        let fins: Vec<_> = node
            .sent()
            .into_iter()
            .filter_map(|p| match p.body {
                PduBody::Fin(fin) => Some(fin),
                _ => None,
            })
            .collect();
        assert_eq!(fins.len(), 1);
        assert_eq!(fins[0].condition_code, ConditionCode::FileChecksumFailure);
        assert!(node.engine.is_a_trans_being_cancelled());

        // 이후의 Filedata는 파일에 쓰이지 않음
        node.submit(&fd_pdu(hdr, 0, b"zzzz")).unwrap();
        assert!(!node.fs.exists("dst.bin"));
    }

    #[test]
    fn test_inactivity_timer_via_manual_clock() {
        let clock = ManualClock::new(1000);
        let mut node = Node::new(23, &clock);
        let hdr = header_from_88(false);
        node.submit(&md_pdu(hdr, 10)).unwrap();

        let trans = hdr.trans;
        let timeout = node.engine.config().inactivity_timeout as u64;
        assert_eq!(
            node.engine.transaction_timer_status(&trans).unwrap(),
            (TimerType::Inactivity, timeout)
        );

        clock.advance(timeout - 1);
        node.engine.cycle();
        assert!(!node.kinds().contains(&IndicationType::InactivityTimerExpired));

        // PDU가 들어오면 타이머 재시작
        node.submit(&fd_pdu(hdr, 0, b"01234")).unwrap();
        assert_eq!(
            node.engine.transaction_timer_status(&trans).unwrap(),
            (TimerType::Inactivity, timeout)
        );

        clock.advance(timeout);
        node.engine.cycle();
        let kinds = node.kinds();
        assert!(kinds.contains(&IndicationType::InactivityTimerExpired));
        assert!(kinds.contains(&IndicationType::Fault));

        node.engine.cycle();
        let fin = node
            .sent()
            .into_iter()
            .find_map(|p| match p.body {
                PduBody::Fin(fin) => Some(fin),
                _ => None,
            })
            .unwrap();
        assert_eq!(fin.condition_code, ConditionCode::InactivityDetected);
        assert_eq!(fin.delivery_code, DeliveryCode::Incomplete);
    }

    #[test]
    fn test_request_errors() {
        let clock = ManualClock::new(0);
        let mut config = Config::with_id(Id::from(88));
        config.max_concurrent_transactions = 2;
        let mut node = Node::with_config(config, &clock);
        node.fs.insert("a", b"x".to_vec());

        assert!(matches!(
            node.engine.submit_request("PUT a 88"),
            Err(Error::SendToSelf(_))
        ));
        assert!(node.engine.submit_request("").is_ok());
        assert!(matches!(
            node.engine.submit_request("CANCEL 88_99"),
            Err(Error::UnknownTransaction(_))
        ));
        assert!(matches!(
            node.engine.submit_request("JUMP"),
            Err(Error::InvalidRequest(_))
        ));

        node.engine.submit_request("PUT a 23").unwrap();
        node.engine.submit_request("PUT a 24").unwrap();
        assert!(matches!(
            node.engine.submit_request("PUT a 25"),
            Err(Error::TableFull { capacity: 2 })
        ));

        node.out.set_unreachable(Id::from(9));
        node.engine.submit_request("ABANDON all").unwrap();
        assert_eq!(node.engine.how_many_active_trans(), 0);
        assert!(matches!(
            node.engine.submit_request("PUT a 9"),
            Err(Error::LinkUnavailable(_))
        ));
    }

    #[test]
    fn test_sequence_numbers_and_reset() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(88, &clock);
        node.fs.insert("a", b"x".to_vec());

        node.engine.submit_request("PUT a 23").unwrap();
        node.engine.set_trans_seq_num(40);
        node.engine.submit_request("PUT a 23").unwrap();

        let trans = node.engine.transactions();
        assert_eq!(
            trans,
            vec![
                TransactionId::new(Id::from(88), 1),
                TransactionId::new(Id::from(88), 40)
            ]
        );

        node.engine.submit_request("CANCEL 88_40").unwrap();
        assert!(node.engine.is_a_trans_being_cancelled());
        node.engine.submit_request("ABANDON all").unwrap();
        let summary = node.engine.summary_status();
        assert_eq!(summary.total_unsuccessful_senders, 2);
        assert!(node.engine.was_last_trans_abandoned());

        node.engine.reset_totals();
        assert_eq!(node.engine.summary_status().total_unsuccessful_senders, 0);
    }

    #[test]
    fn test_freeze_thaw_and_suspend() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(88, &clock);
        node.fs.insert("a", vec![1u8; 100]);
        node.engine.submit_request("PUT a 23").unwrap();

        node.engine.submit_request("FREEZE").unwrap();
        let summary = node.engine.summary_status();
        assert!(summary.are_any_partners_frozen);
        assert_eq!(summary.how_many_frozen, 1);
        node.engine.cycle();
        assert!(node.out.is_empty());

        // 동결 중에 시작된 트랜잭션도 동결 상태
        node.engine.submit_request("PUT a 24").unwrap();
        assert_eq!(node.engine.summary_status().how_many_frozen, 2);

        node.engine.submit_request("THAW").unwrap();
        assert_eq!(node.engine.summary_status().how_many_frozen, 0);
        node.engine.cycle();
        assert!(!node.out.is_empty());
        node.out.drain();

        let first = TransactionId::new(Id::from(88), 1);
        node.engine.submit_request("SUSPEND 88_1").unwrap();
        assert!(node.engine.transaction_status(&first).unwrap().suspended);
        assert_eq!(node.engine.summary_status().how_many_suspended, 1);
        node.engine.submit_request("RESUME all").unwrap();
        assert_eq!(node.engine.summary_status().how_many_suspended, 0);

        node.engine.submit_request("REPORT 88_1").unwrap();
        assert!(node.kinds().contains(&IndicationType::Report));
    }

    #[test]
    fn test_pdu_gate_and_sanity() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(23, &clock);

        // 잘린 PDU
        let bytes = md_pdu(header_from_88(false), 10).to_bytes();
        assert!(matches!(
            node.engine.submit_pdu(&bytes[..bytes.len() - 2]),
            Err(Error::PduRejected(_))
        ));

        // 다른 엔티티 사이의 PDU
        let foreign = PduHeader {
            trans: TransactionId::new(Id::from(7), 1),
            dest_id: Id::from(8),
            ..PduHeader::default()
        };
        assert!(matches!(
            node.submit(&md_pdu(foreign, 10)),
            Err(Error::PduRejected(_))
        ));

        // 수신자 방향 Finished는 말이 안 됨
        let fin = pdu::make_fin(
            header_from_88(false),
            actions::build_fin(ConditionCode::NoError, DeliveryCode::Complete),
        );
        assert!(matches!(node.submit(&fin), Err(Error::PduNotSane(_))));
        assert_eq!(node.engine.how_many_active_trans(), 0);
    }

    #[test]
    fn test_file_data_past_address_space_is_rejected() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(23, &clock);
        let trans = header_from_88(false).trans;

        node.submit(&md_pdu(header_from_88(false), 10)).unwrap();
        node.submit(&fd_pdu(header_from_88(false), 0, b"abcd")).unwrap();

        let wrapping = fd_pdu(header_from_88(false), u32::MAX - 2, &[7u8; 10]);
        assert!(matches!(
            node.submit(&wrapping),
            Err(Error::PduRejected(pdu::Reject::MalformedBody))
        ));

        // 트랜잭션 상태는 그대로
        assert_eq!(node.engine.how_many_active_trans(), 1);
        assert_eq!(node.engine.transaction_progress(&trans).unwrap(), (4, 10));
        let status = node.engine.transaction_status(&trans).unwrap();
        assert_eq!(status.received_file_size, 4);
        assert_eq!(status.fd_offset, 0);
    }

    #[test]
    fn test_stale_fin_is_acked_by_fresh_machine() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(88, &clock);
        let hdr = PduHeader {
            direction: pdu::Direction::TowardSender,
            trans: TransactionId::new(Id::from(88), 3),
            dest_id: Id::from(23),
            ..PduHeader::default()
        };
        let fin = pdu::make_fin(
            hdr,
            actions::build_fin(ConditionCode::NoError, DeliveryCode::Complete),
        );
        node.submit(&fin).unwrap();
        node.engine.cycle();

        let sent = node.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), PduKind::AckFin);
        assert_eq!(node.engine.how_many_active_trans(), 0);
        // ACK 전용 트랜잭션은 통계에 넣지 않음
        let summary = node.engine.summary_status();
        assert_eq!(summary.total_files_sent + summary.total_unsuccessful_senders, 0);
    }

    #[test]
    fn test_external_file_transfer() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(88, &clock);
        node.fs.insert("a", vec![3u8; 64]);
        node.engine.submit_request("PUT -class1 a 23").unwrap();
        let trans = TransactionId::new(Id::from(88), 1);

        assert!(node.engine.close_external_file_xfer(&trans).is_err());
        node.engine.open_external_file_xfer(&trans).unwrap();
        assert!(node.engine.transaction_status(&trans).unwrap().external_file_xfer);

        node.engine.cycle();
        let sent = node.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, PduBody::Metadata(_)));

        node.engine.set_file_checksum(&trans, 0x1234_5678).unwrap();
        node.engine.close_external_file_xfer(&trans).unwrap();
        node.engine.cycle();
        node.engine.cycle();

        let sent = node.sent();
        match &sent.last().unwrap().body {
            PduBody::Eof(eof) => assert_eq!(eof.file_checksum, 0x1234_5678),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(node.engine.how_many_active_trans(), 0);
    }

    #[test]
    fn test_mib_parameter() {
        let clock = ManualClock::new(0);
        let mut node = Node::new(88, &clock);
        node.engine.set_mib_parameter("ack_limit", "9").unwrap();
        assert_eq!(node.engine.config().ack_limit, 9);
        assert!(node.engine.set_mib_parameter("warp_factor", "9").is_err());
    }
}
