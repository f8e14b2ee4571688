//! 상태 테이블 공용 동작
//!
//! - 트랜잭션 수준: initialize, abandon, cancel_locally, 일시 정지/재개, shutdown, 종료
//! - PDU 빌더와 송신 (송신 대상 파트너는 헤더에서 결정)
//! - 파일 처리와 검증 (원본/임시 파일, 크기, 체크섬, 구조)
//!
//! 네 상태 테이블(S1, S2, R1, R2)이 `Context`를 통해 협력자에 접근한다.

use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::checksum::{checksum_reader, Checksum};
use crate::config::Config;
use crate::event::Event;
use crate::filestore::{Filestore, OpenMode};
use crate::id::{Id, TransactionId};
use crate::indication::Indication;
use crate::machine::Machine;
use crate::nak::NakList;
use crate::output::{PduClass, PduOutput};
use crate::pdu::{self, Ack, DirectiveCode, Direction, Eof, FileData, Fin, Metadata, Mode, Pdu,
    PduHeader};
use crate::request::PutRequest;
use crate::timer::Timer;
use crate::types::{ConditionCode, DeliveryCode, FinalStatus, IndicationType, Role, State,
    TransStat, TransStatus};
use crate::{MAX_FILE_CHUNK_SIZE, TEMP_FILE_ATTEMPTS};

/// 임시 파일을 읽을 수 없을 때의 체크섬 (EOF 값과 일치하지 않음을 기대)
pub const UNREADABLE_FILE_CHECKSUM: u32 = 0xDEAD_BEEF;

/// 상태 테이블 실행 중 협력자 접근
pub struct Context<'a> {
    pub config: &'a Config,
    pub filestore: &'a dyn Filestore,
    pub indication: &'a mut dyn Indication,
    pub output: &'a mut dyn PduOutput,

    /// 현재 시각 (초)
    pub now: u64,
}

impl<'a> Context<'a> {
    /// 알림 전달 (MIB에서 끈 종류는 생략)
    pub fn notify(&mut self, kind: IndicationType, status: &TransStatus) {
        if self.is_issued(kind) {
            self.indication.notify(kind, status);
        }
    }

    fn is_issued(&self, kind: IndicationType) -> bool {
        match kind {
            IndicationType::EofRecv => self.config.issue_eof_recv,
            IndicationType::EofSent => self.config.issue_eof_sent,
            IndicationType::FileSegmentRecv => self.config.issue_file_segment_recv,
            IndicationType::FileSegmentSent => self.config.issue_file_segment_sent,
            IndicationType::Resumed => self.config.issue_resumed,
            IndicationType::Suspended => self.config.issue_suspended,
            _ => true,
        }
    }

    /// 송신 허가 확인
    pub fn ready(&mut self, class: PduClass, m: &Machine) -> bool {
        let partner = partner_of(&m.hdr, &self.config.my_id);
        self.output.ready(class, m.hdr.trans, partner)
    }

    pub fn ack_timer(&self) -> Timer {
        Timer::start(self.config.ack_timeout as u64, self.now)
    }

    pub fn nak_timer(&self) -> Timer {
        Timer::start(self.config.nak_timeout as u64, self.now)
    }

    pub fn inactivity_timer(&self) -> Timer {
        Timer::start(self.config.inactivity_timeout as u64, self.now)
    }

    fn send(&mut self, trans: TransactionId, partner: Id, pdu: &Pdu) {
        if !matches!(pdu.body, pdu::PduBody::FileData(_)) {
            debug!("<---------- ({}) {:?}", trans, pdu.kind());
        }
        self.output.send(trans, partner, pdu.to_bytes());
    }
}

/// 송신 헤더 기준 파트너 ID
///
/// 내가 source면 파트너는 dest, 아니면 source
pub fn partner_of(hdr: &PduHeader, my_id: &Id) -> Id {
    if &hdr.trans.source == my_id {
        hdr.dest_id
    } else {
        hdr.trans.source
    }
}

/// 상태 테이블 진입 로그
pub fn trace_event(table: &str, m: &Machine, event: Event) {
    if !event.is_frequent() {
        debug!("<{}> ({}) {} [{}]", table, m.status.state, event, m.hdr.trans);
    }
}

/// 새 머신을 시작시키는 입력
#[derive(Debug, Clone, Copy)]
pub enum Origin<'r> {
    /// 송신자 (Put 요청 + 새 시퀀스 번호)
    Put {
        request: &'r PutRequest,
        sequence: u32,
    },

    /// 수신자 또는 재시작된 송신자 (수신 PDU 헤더)
    Pdu(&'r PduHeader),
}

/// 머신 초기화
pub fn initialize(m: &mut Machine, ctx: &Context<'_>, origin: Origin<'_>, partners_frozen: bool) {
    *m = Machine::new();

    let status = &mut m.status;
    status.frozen = partners_frozen;
    status.phase = 1;
    status.start_time = ctx.now;
    status.state = State::S1;
    status.md.dest_file_name = "Unknown".to_string();

    let capacity = ctx.config.max_gaps_per_transaction;
    match origin {
        Origin::Put { request, sequence } => {
            status.role = if request.ack_required {
                Role::Class2Sender
            } else {
                Role::Class1Sender
            };
            m.nak = NakList::for_sender(capacity);
            m.hdr = PduHeader {
                direction: Direction::TowardReceiver,
                mode: if request.ack_required {
                    Mode::Acknowledged
                } else {
                    Mode::Unacknowledged
                },
                trans: TransactionId::new(ctx.config.my_id, sequence),
                dest_id: request.dest_id,
                ..PduHeader::default()
            };
        }
        Origin::Pdu(hdr) => {
            m.hdr = *hdr;
            status.role = hdr.receiver_role();
            m.nak = NakList::for_receiver(capacity);
            m.inactivity_timer = ctx.inactivity_timer();
        }
    }
}

/// 트랜잭션 포기 (상대에게 알리지 않음)
pub fn abandon(m: &mut Machine, ctx: &mut Context<'_>) {
    m.status.abandoned = true;
    m.status.finished = true;
    m.status.final_status = FinalStatus::Abandoned;
    ctx.notify(IndicationType::Abandoned, &m.status);
    shutdown(m, ctx);
}

/// 로컬 취소: 타이머와 송신 대기를 모두 정리
pub fn cancel_locally(m: &mut Machine) {
    m.cancel_timers();
    m.clear_outgoing();
    m.status.cancelled = true;
}

pub fn notice_of_suspension(m: &mut Machine, ctx: &mut Context<'_>) {
    if !m.status.suspended {
        m.status.suspended = true;
        suspend_timers(m, ctx.now);
        ctx.notify(IndicationType::Suspended, &m.status);
    }
}

/// 실행 중인 타이머만 정지
pub fn suspend_timers(m: &mut Machine, now: u64) {
    m.ack_timer.pause(now);
    m.nak_timer.pause(now);
    m.inactivity_timer.pause(now);
}

/// 정지된 타이머만 재개
pub fn resume_timers(m: &mut Machine, now: u64) {
    m.ack_timer.resume(now);
    m.nak_timer.resume(now);
    m.inactivity_timer.resume(now);
}

/// 파일 닫기, 남은 임시 파일 정리, 머신 종료 표시
pub fn shutdown(m: &mut Machine, ctx: &mut Context<'_>) {
    m.file = None;

    if m.is_there_a_temp_file {
        if ctx.config.save_incomplete_files {
            debug!("saving incomplete temp-file ({})", m.status.temp_file_name);
        } else if let Err(e) = ctx.filestore.remove(&m.status.temp_file_name) {
            warn!("임시 파일 삭제 실패 ({}): {}", m.status.temp_file_name, e);
        }
    }

    m.status.state = State::Finished;
    m.clear_outgoing();
    m.nak.clear();
    m.cancel_timers();
    m.has_this_state_machine_finished = true;
}

/// 정상/취소 종료
pub fn transaction_has_finished(m: &mut Machine, ctx: &mut Context<'_>) {
    m.cancel_timers();
    m.clear_outgoing();

    m.status.finished = true;
    m.status.final_status = if m.status.role == Role::Class1Receiver && !m.status.has_md_been_received
    {
        FinalStatus::NoMetadata
    } else if m.status.cancelled {
        FinalStatus::Cancelled
    } else {
        FinalStatus::Successful
    };

    ctx.notify(IndicationType::TransactionFinished, &m.status);
    shutdown(m, ctx);
}

/// 첫 PDU 수신 시 한 번만 MachineAllocated 알림
pub fn note_first_pdu(m: &mut Machine, ctx: &mut Context<'_>) {
    if !m.has_a_pdu_been_received {
        ctx.notify(IndicationType::MachineAllocated, &m.status);
        m.has_a_pdu_been_received = true;
    }
}

// ---------------------------------------------------------------------------
// 빌더
// ---------------------------------------------------------------------------

pub fn build_eof(condition_code: ConditionCode, file_checksum: u32, file_size: u32) -> Eof {
    Eof {
        condition_code,
        file_checksum,
        file_size,
    }
}

pub fn build_fin(condition_code: ConditionCode, delivery_code: DeliveryCode) -> Fin {
    Fin {
        condition_code,
        end_system_status: true,
        delivery_code,
    }
}

pub fn build_ack_eof(m: &Machine) -> Ack {
    Ack {
        directive_code: DirectiveCode::Eof as u8,
        directive_subtype: 0,
        condition_code: m.eof.condition_code,
        delivery_code: m.status.delivery_code,
        transaction_status: TransStat::Active,
    }
}

pub fn build_ack_fin(m: &Machine) -> Ack {
    Ack {
        directive_code: DirectiveCode::Fin as u8,
        directive_subtype: 0,
        condition_code: m.fin.condition_code,
        delivery_code: DeliveryCode::Complete,
        transaction_status: if m.status.is_this_trans_solely_for_ack_fin {
            TransStat::Undefined
        } else {
            TransStat::Active
        },
    }
}

/// Put 요청에서 헤더와 Metadata 채우기
pub fn build_metadata_from_put_req(
    request: &PutRequest,
    hdr: &mut PduHeader,
    md: &mut Metadata,
    ctx: &Context<'_>,
) {
    hdr.direction = Direction::TowardReceiver;
    hdr.mode = if request.ack_required {
        Mode::Acknowledged
    } else {
        Mode::Unacknowledged
    };
    hdr.use_crc = false;
    hdr.trans.source = ctx.config.my_id;
    hdr.dest_id = request.dest_id;

    md.file_transfer = request.file_transfer;
    md.source_file_name.clear();
    md.dest_file_name.clear();
    if md.file_transfer {
        md.source_file_name = request.source_file_name.clone();
        md.dest_file_name = request.dest_file_name.clone();
        md.file_size = match ctx.filestore.file_size(&md.source_file_name) {
            Ok(size) => u32::try_from(size).unwrap_or_else(|_| {
                warn!("파일이 너무 큼 ({}, {} bytes)", md.source_file_name, size);
                u32::MAX
            }),
            Err(e) => {
                warn!("파일 크기 조회 실패 ({}): {}", md.source_file_name, e);
                0
            }
        };
    }
    md.segmentation_control = false;
}

// ---------------------------------------------------------------------------
// 검증
// ---------------------------------------------------------------------------

/// 저장소의 파일 전체 체크섬
pub fn calculate_file_checksum(filestore: &dyn Filestore, name: &str) -> std::io::Result<u32> {
    let mut file = filestore.open(name, OpenMode::Read)?;
    checksum_reader(&mut file)
}

/// 받은 데이터가 EOF의 파일 크기를 넘지 않는지
pub fn is_file_size_valid(m: &Machine) -> bool {
    if m.status.received_file_size > m.eof.file_size {
        error!(
            "file size error: received {} bytes, EOF says {} ({})",
            m.status.received_file_size, m.eof.file_size, m.hdr.trans
        );
        return false;
    }
    true
}

/// 임시 파일 체크섬이 EOF 값과 같은지
pub fn is_file_checksum_valid(m: &mut Machine, ctx: &Context<'_>) -> bool {
    let calculated = match calculate_file_checksum(ctx.filestore, &m.status.temp_file_name) {
        Ok(sum) => sum,
        Err(e) => {
            error!("임시 파일 읽기 실패 ({}): {}", m.status.temp_file_name, e);
            UNREADABLE_FILE_CHECKSUM
        }
    };
    m.status.file_checksum_as_calculated = calculated;

    if calculated != m.eof.file_checksum {
        error!(
            "file checksum failure: calculated {:#010x}, EOF says {:#010x} ({})",
            calculated, m.eof.file_checksum, m.hdr.trans
        );
        return false;
    }
    true
}

/// 레코드 구조 플래그와 실제 파일이 일치하는지
pub fn is_file_structure_valid(m: &Machine, ctx: &Context<'_>) -> bool {
    let segmented = ctx.filestore.is_segmented(&m.status.md.source_file_name);
    if m.status.md.segmentation_control && !segmented {
        error!("invalid file structure (file should be segmented)");
        return false;
    }
    if !m.status.md.segmentation_control && segmented {
        error!("invalid file structure (file should not be segmented)");
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// 파일 처리
// ---------------------------------------------------------------------------

pub fn open_source_file(m: &mut Machine, ctx: &Context<'_>) -> bool {
    match ctx.filestore.open(&m.status.md.source_file_name, OpenMode::Read) {
        Ok(file) => {
            m.file = Some(file);
            true
        }
        Err(e) => {
            error!(
                "unable to open source file '{}': {}",
                m.status.md.source_file_name, e
            );
            false
        }
    }
}

/// 새 임시 파일 열기 (이름 후보를 여러 번 시도)
pub fn open_temp_file(m: &mut Machine, ctx: &Context<'_>) -> bool {
    for _ in 0..TEMP_FILE_ATTEMPTS {
        let name = ctx.filestore.temp_file_name();
        match ctx.filestore.open(&name, OpenMode::Write) {
            Ok(file) => {
                m.file = Some(file);
                m.status.temp_file_name = name;
                m.is_there_a_temp_file = true;
                return true;
            }
            Err(e) => warn!("임시 파일 열기 실패 ({}): {}", name, e),
        }
    }
    error!("unable to open a temp file ({} attempts)", TEMP_FILE_ATTEMPTS);
    false
}

/// Filedata를 열린 파일의 오프셋에 기록
pub fn store_file_data(m: &mut Machine, fd: &FileData) {
    let Some(file) = m.file.as_mut() else {
        error!("invariant: Filedata 저장 시 열린 파일 없음 ({})", m.hdr.trans);
        return;
    };
    if let Err(e) = file.seek(SeekFrom::Start(fd.offset as u64)) {
        error!("seek 실패 (offset {}): {}", fd.offset, e);
        return;
    }
    if let Err(e) = file.write_all(&fd.data) {
        error!("write 실패 (offset {}, {} bytes): {}", fd.offset, fd.data.len(), e);
    }
}

/// 첫 수신 PDU의 헤더를 방향만 뒤집어 재사용
pub fn reuse_senders_first_hdr(incoming: &PduHeader, m: &mut Machine) {
    if m.has_a_pdu_been_received {
        return;
    }
    m.hdr = *incoming;
    m.status.trans = incoming.trans;
    m.status.partner_id = Some(incoming.trans.source);
    m.hdr.direction = incoming.direction.reversed();
}

// ---------------------------------------------------------------------------
// 송신
// ---------------------------------------------------------------------------

pub fn send_md(m: &Machine, ctx: &mut Context<'_>) {
    let pdu = pdu::make_md(m.hdr, &m.status.md);
    ctx.send(m.hdr.trans, m.hdr.dest_id, &pdu);
}

pub fn send_eof(m: &Machine, ctx: &mut Context<'_>) {
    let pdu = pdu::make_eof(m.hdr, m.eof);
    ctx.send(m.hdr.trans, m.hdr.dest_id, &pdu);
}

pub fn send_ack(m: &Machine, ctx: &mut Context<'_>) {
    let partner = partner_of(&m.hdr, &ctx.config.my_id);
    let pdu = pdu::make_ack(m.hdr, m.ack);
    ctx.send(m.hdr.trans, partner, &pdu);
}

pub fn send_nak(m: &Machine, ctx: &mut Context<'_>) {
    let pdu = pdu::make_nak(m.hdr, &m.nak);
    debug!("Nak: {}", m.nak.list_as_string());
    ctx.send(m.hdr.trans, m.hdr.trans.source, &pdu);
}

pub fn send_fin(m: &Machine, ctx: &mut Context<'_>) {
    let pdu = pdu::make_fin(m.hdr, m.fin);
    ctx.send(m.hdr.trans, m.hdr.trans.source, &pdu);
}

/// 첫 갭에서 Filedata 하나 송신, 보낸 (offset, length) 반환
///
/// 첫 전송 중에는 체크섬을 누적하고, EOF 이후 재전송에서는 seek만 한다.
pub fn send_one_file_data_pdu(m: &mut Machine, ctx: &mut Context<'_>) -> Option<(u32, u32)> {
    let Some((begin, end)) = m.nak.first_gap() else {
        error!("invariant: 갭 없이 Filedata 송신 요청 ({})", m.hdr.trans);
        return None;
    };
    let chunk = ctx
        .config
        .outgoing_file_chunk_size
        .clamp(1, MAX_FILE_CHUNK_SIZE as u32);
    let offset = begin;
    let length = end.saturating_sub(begin).min(chunk);

    // 읽기 실패나 열린 파일이 없으면 0으로 채운 채 보낸다
    let mut buf = vec![0u8; length as usize];
    match m.file.as_mut() {
        Some(file) => {
            if m.has_eof_been_sent {
                debug!("Resending FD: {} bytes at offset {}", length, offset);
                if let Err(e) = file.seek(SeekFrom::Start(offset as u64)) {
                    error!("seek 실패 (offset {}): {}", offset, e);
                }
            }
            if let Err(e) = file.read_exact(&mut buf) {
                error!("read 실패 (offset {}, {} bytes): {}", offset, length, e);
            }
        }
        None => error!("invariant: 원본 파일이 열려 있지 않음 ({})", m.hdr.trans),
    }

    if !m.has_eof_been_sent {
        let mut sum = Checksum::from_value(m.status.file_checksum_as_calculated);
        sum.update(offset as u64, &buf);
        m.status.file_checksum_as_calculated = sum.value();
    }

    let pdu = pdu::make_fd(m.hdr, offset, Bytes::from(buf));
    ctx.send(m.hdr.trans, m.hdr.dest_id, &pdu);

    m.status.fd_length = length;
    ctx.notify(IndicationType::FileSegmentSent, &m.status);
    if !m.has_eof_been_sent {
        m.status.fd_offset = offset + length;
    }
    Some((offset, length))
}

#[cfg(test)]
pub(crate) mod testing {
    use crossbeam_channel::Receiver;

    use super::*;
    use crate::filestore::MemoryFilestore;
    use crate::indication::ChannelIndication;
    use crate::output::{OutgoingPdu, QueueOutput};

    /// 상태 테이블 단위 테스트용 협력자 묶음
    pub struct TestBed {
        pub config: Config,
        pub fs: MemoryFilestore,
        pub indication: ChannelIndication,
        pub indications: Receiver<(IndicationType, TransStatus)>,
        pub output: QueueOutput,
        pub now: u64,
    }

    impl TestBed {
        pub fn new() -> Self {
            let (indication, indications) = ChannelIndication::unbounded();
            Self {
                config: Config::with_id(Id::from(23)),
                fs: MemoryFilestore::new(),
                indication,
                indications,
                output: QueueOutput::new(),
                now: 1000,
            }
        }

        pub fn ctx(&mut self) -> Context<'_> {
            Context {
                config: &self.config,
                filestore: &self.fs,
                indication: &mut self.indication,
                output: &mut self.output,
                now: self.now,
            }
        }

        /// 지금까지 나온 알림 종류
        pub fn kinds(&self) -> Vec<IndicationType> {
            self.indications.try_iter().map(|(k, _)| k).collect()
        }

        /// 송신된 PDU 디코드
        pub fn sent(&self) -> Vec<Pdu> {
            self.output
                .drain()
                .into_iter()
                .map(|OutgoingPdu { bytes, .. }| {
                    Pdu::from_bytes(&bytes).expect("engine emitted undecodable pdu")
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestBed;
    use super::*;
    use crate::pdu::PduBody;

    fn put(dest: u8) -> PutRequest {
        PutRequest::new("src.bin", Id::from(dest), "dst.bin")
    }

    #[test]
    fn test_initialize_sender_and_receiver() {
        let mut bed = TestBed::new();
        let req = put(88).unacknowledged();
        let mut m = Machine::new();
        initialize(
            &mut m,
            &bed.ctx(),
            Origin::Put {
                request: &req,
                sequence: 7,
            },
            true,
        );
        assert_eq!(m.status.role, Role::Class1Sender);
        assert_eq!(m.hdr.trans, TransactionId::new(Id::from(23), 7));
        assert_eq!(m.hdr.mode, Mode::Unacknowledged);
        assert!(m.status.frozen);
        assert_eq!(m.status.md.dest_file_name, "Unknown");
        assert!(m.inactivity_timer.is_off());

        let incoming = PduHeader {
            trans: TransactionId::new(Id::from(88), 3),
            dest_id: Id::from(23),
            ..PduHeader::default()
        };
        let mut r = Machine::new();
        initialize(&mut r, &bed.ctx(), Origin::Pdu(&incoming), false);
        assert_eq!(r.status.role, Role::Class2Receiver);
        assert!(r.nak.is_metadata_missing());
        assert!(r.inactivity_timer.is_running());
        assert_eq!(partner_of(&r.hdr, &bed.config.my_id), Id::from(88));
    }

    #[test]
    fn test_file_data_checksum_only_on_first_pass() {
        let mut bed = TestBed::new();
        bed.config.outgoing_file_chunk_size = 4;
        bed.fs.insert("src.bin", b"abcdefghij".to_vec());

        let mut m = Machine::new();
        m.status.md.source_file_name = "src.bin".into();
        assert!(open_source_file(&mut m, &bed.ctx()));
        m.nak.set_end_of_scope(10);

        while m.nak.how_many_gaps() > 0 {
            let (offset, len) = send_one_file_data_pdu(&mut m, &mut bed.ctx()).unwrap();
            m.nak.data_sent(offset, offset + len);
        }
        let expected = crate::checksum::checksum_of(b"abcdefghij");
        assert_eq!(m.status.file_checksum_as_calculated, expected);
        assert_eq!(m.status.fd_offset, 10);
        assert_eq!(bed.sent().len(), 3);

        // 재전송은 seek 후 보내고 체크섬은 그대로
        m.has_eof_been_sent = true;
        m.nak.copy_from(&crate::pdu::Nak {
            start_of_scope: 0,
            end_of_scope: 10,
            is_metadata_missing: false,
            gaps: vec![(2, 5)],
        });
        assert_eq!(send_one_file_data_pdu(&mut m, &mut bed.ctx()), Some((2, 3)));
        assert_eq!(m.status.file_checksum_as_calculated, expected);
        match &bed.sent()[0].body {
            PduBody::FileData(fd) => assert_eq!(&fd.data[..], b"cde"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_removes_temp_file_unless_saved() {
        let mut bed = TestBed::new();
        let mut m = Machine::new();
        assert!(open_temp_file(&mut m, &bed.ctx()));
        let name = m.status.temp_file_name.clone();
        assert!(bed.fs.exists(&name));

        shutdown(&mut m, &mut bed.ctx());
        assert!(!bed.fs.exists(&name));
        assert!(m.has_this_state_machine_finished);
        assert_eq!(m.status.state, State::Finished);

        bed.config.save_incomplete_files = true;
        let mut kept = Machine::new();
        assert!(open_temp_file(&mut kept, &bed.ctx()));
        let name = kept.status.temp_file_name.clone();
        shutdown(&mut kept, &mut bed.ctx());
        assert!(bed.fs.exists(&name));
    }

    #[test]
    fn test_indication_gating() {
        let mut bed = TestBed::new();
        let status = TransStatus::default();
        {
            let mut ctx = bed.ctx();
            ctx.notify(IndicationType::EofRecv, &status);
            ctx.notify(IndicationType::EofSent, &status);
            ctx.notify(IndicationType::TransactionFinished, &status);
        }
        assert_eq!(
            bed.kinds(),
            vec![IndicationType::EofSent, IndicationType::TransactionFinished]
        );
    }

    #[test]
    fn test_checksum_validation_reads_temp_file() {
        let mut bed = TestBed::new();
        let mut m = Machine::new();
        assert!(open_temp_file(&mut m, &bed.ctx()));
        store_file_data(
            &mut m,
            &FileData {
                offset: 0,
                data: Bytes::from_static(b"hello"),
            },
        );
        m.file = None;

        m.eof = build_eof(ConditionCode::NoError, crate::checksum::checksum_of(b"hello"), 5);
        m.status.received_file_size = 5;
        assert!(is_file_size_valid(&m));
        assert!(is_file_checksum_valid(&mut m, &bed.ctx()));

        m.eof.file_checksum ^= 1;
        assert!(!is_file_checksum_valid(&mut m, &bed.ctx()));

        m.status.temp_file_name = "missing".into();
        assert!(!is_file_checksum_valid(&mut m, &bed.ctx()));
        assert_eq!(m.status.file_checksum_as_calculated, UNREADABLE_FILE_CHECKSUM);
    }
}
