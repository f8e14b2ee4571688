//! Class 1 수신자 (R1)
//!
//! - S1: Metadata 대기 (먼저 온 Filedata도 저장)
//! - S2: EOF 대기
//!
//! 상대에게 아무것도 보내지 않는다. EOF를 받으면 검증 후 끝난다.

use tracing::{debug, error, info, warn};

use crate::actions::{self, Context};
use crate::event::Event;
use crate::machine::Machine;
use crate::pdu::{FileData, Pdu, PduBody};
use crate::request::PutRequest;
use crate::types::{ConditionCode, DeliveryCode, IndicationType, Response, State};

/// 결함 처리, 호출자가 계속해도 되면 true
fn fault_handler(m: &mut Machine, ctx: &mut Context<'_>, fault: ConditionCode) -> bool {
    m.status.condition_code = fault;
    ctx.notify(IndicationType::Fault, &m.status);

    match ctx.config.response_to_fault {
        Response::Cancel => {
            m.have_we_initiated_a_cancel = true;
            actions::cancel_locally(m);
            // 상대에게 알릴 방법이 없으므로 바로 종료
            actions::transaction_has_finished(m, ctx);
            false
        }
        Response::Suspend => {
            actions::notice_of_suspension(m, ctx);
            false
        }
        Response::Ignore => true,
        Response::Abandon => {
            actions::abandon(m, ctx);
            false
        }
    }
}

/// 수신 헤더 저장
fn adopt_header(m: &mut Machine, pdu: &Pdu) {
    m.hdr = pdu.header;
    m.status.trans = m.hdr.trans;
    m.status.partner_id = Some(m.hdr.trans.source);
}

/// Filedata를 임시 파일에 기록하고 갭 리스트 갱신
fn accept_file_data(m: &mut Machine, fd: &FileData) {
    let Some(end) = fd.end() else {
        warn!(
            "Filedata beyond the 32-bit file address space ignored ({})",
            m.hdr.trans
        );
        return;
    };
    actions::store_file_data(m, fd);
    if end > m.status.received_file_size {
        m.status.received_file_size = end;
    }
    m.nak.data_received(m.status.fd_offset, end);
}

fn note_file_data(m: &mut Machine, fd: &FileData) {
    m.status.fd_offset = fd.offset;
    m.status.fd_length = fd.data.len() as u32;
}

fn cancel_request(m: &mut Machine, ctx: &mut Context<'_>) {
    m.status.condition_code = ConditionCode::CancelRequestReceived;
    actions::cancel_locally(m);
    actions::transaction_has_finished(m, ctx);
}

fn eof_cancel(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    m.status.cancelled = true;
    if let PduBody::Eof(eof) = pdu.body {
        m.status.condition_code = eof.condition_code;
    }
    actions::note_first_pdu(m, ctx);
    actions::transaction_has_finished(m, ctx);
}

fn inactivity(m: &mut Machine, ctx: &mut Context<'_>) {
    m.inactivity_timer = ctx.inactivity_timer();
    fault_handler(m, ctx, ConditionCode::InactivityDetected);
}

/// 임시 파일 닫기, 검증, 최종 이름으로 옮기기
///
/// 결함 처리로 중단되면 false
fn complete_file(m: &mut Machine, ctx: &mut Context<'_>) -> bool {
    if m.file.take().is_none() {
        error!("invariant: EOF 수신 시 임시 파일이 열려 있지 않음 ({})", m.hdr.trans);
    }

    if !actions::is_file_size_valid(m) && !fault_handler(m, ctx, ConditionCode::FileSizeError) {
        return false;
    }
    if !actions::is_file_checksum_valid(m, ctx)
        && !fault_handler(m, ctx, ConditionCode::FileChecksumFailure)
    {
        return false;
    }
    m.status.delivery_code = DeliveryCode::Complete;

    match ctx
        .filestore
        .rename(&m.status.temp_file_name, &m.status.md.dest_file_name)
    {
        Ok(()) => m.is_there_a_temp_file = false,
        Err(e) => {
            error!(
                "unable to rename '{}' to '{}': {}",
                m.status.temp_file_name, m.status.md.dest_file_name, e
            );
            error!("are they on separate filesystems?");
            if !fault_handler(m, ctx, ConditionCode::FilestoreRejection) {
                return false;
            }
        }
    }
    true
}

fn waiting_for_metadata(m: &mut Machine, ctx: &mut Context<'_>, event: Event, pdu: Option<&Pdu>) {
    match (event, pdu) {
        (Event::CancelRequest, _) => cancel_request(m, ctx),

        (Event::AbandonRequest, _) => actions::abandon(m, ctx),

        (Event::ReportRequest, _) => ctx.notify(IndicationType::Report, &m.status),

        (Event::Metadata, Some(pdu)) => {
            adopt_header(m, pdu);
            if let PduBody::Metadata(md) = &pdu.body {
                m.status.md = md.clone();
            }
            m.status.has_md_been_received = true;
            m.nak.metadata_sent_or_received();

            actions::note_first_pdu(m, ctx);
            ctx.notify(IndicationType::MetadataRecv, &m.status);

            // Filedata가 먼저 와서 열어 둔 임시 파일은 그대로 사용
            if m.status.md.file_transfer
                && !m.is_there_an_open_file()
                && !actions::open_temp_file(m, ctx)
            {
                error!("unable to open a temp file (MD)");
                if !fault_handler(m, ctx, ConditionCode::FilestoreRejection) {
                    return;
                }
            }

            m.status.state = State::S2;
            debug!("<R1> (S2) 'Wait for an EOF Pdu' ({})", m.hdr.trans);
        }

        (Event::FileData, Some(pdu)) => {
            let PduBody::FileData(fd) = &pdu.body else {
                return;
            };
            adopt_header(m, pdu);
            actions::note_first_pdu(m, ctx);

            note_file_data(m, fd);
            ctx.notify(IndicationType::FileSegmentRecv, &m.status);

            if !m.is_there_an_open_file() && !actions::open_temp_file(m, ctx) {
                error!("unable to open a temp file (FD)");
                if !fault_handler(m, ctx, ConditionCode::FilestoreRejection) {
                    return;
                }
            }
            accept_file_data(m, fd);
        }

        (Event::EofNoError, Some(pdu)) => {
            adopt_header(m, pdu);
            actions::note_first_pdu(m, ctx);
            info!(
                "Class 1 Receiver finished, but never received Metadata ({})",
                m.hdr.trans
            );
            actions::transaction_has_finished(m, ctx);
        }

        (Event::EofCancel, Some(pdu)) => eof_cancel(m, ctx, pdu),

        (Event::InactivityTimerExpired, _) => inactivity(m, ctx),

        _ => warn!(
            "ignored event '{}' in state S1 for trans '{}' <R1>",
            event, m.hdr.trans
        ),
    }
}

fn waiting_for_eof(m: &mut Machine, ctx: &mut Context<'_>, event: Event, pdu: Option<&Pdu>) {
    match (event, pdu) {
        (Event::CancelRequest, _) => cancel_request(m, ctx),

        (Event::AbandonRequest, _) => actions::abandon(m, ctx),

        (Event::ReportRequest, _) => ctx.notify(IndicationType::Report, &m.status),

        (Event::FileData, Some(pdu)) => {
            let PduBody::FileData(fd) = &pdu.body else {
                return;
            };
            note_file_data(m, fd);
            if m.status.md.file_transfer {
                ctx.notify(IndicationType::FileSegmentRecv, &m.status);
                accept_file_data(m, fd);
            } else {
                debug!("Class 1 Receiver discarded Filedata because Metadata indicated 'no file transfer'");
            }
        }

        (Event::EofNoError, Some(pdu)) => {
            if let PduBody::Eof(eof) = pdu.body {
                m.eof = eof;
            }
            ctx.notify(IndicationType::EofRecv, &m.status);

            if m.status.md.file_transfer && !complete_file(m, ctx) {
                return;
            }
            actions::transaction_has_finished(m, ctx);
        }

        (Event::EofCancel, Some(pdu)) => eof_cancel(m, ctx, pdu),

        (Event::InactivityTimerExpired, _) => inactivity(m, ctx),

        _ => warn!(
            "ignored event '{}' in state S2 for trans '{}' <R1>",
            event, m.hdr.trans
        ),
    }
}

/// R1 상태 테이블
pub fn state_table(
    m: &mut Machine,
    ctx: &mut Context<'_>,
    event: Event,
    pdu: Option<&Pdu>,
    _put: Option<&PutRequest>,
) {
    actions::trace_event("R1", m, event);

    match m.status.state {
        State::S1 => waiting_for_metadata(m, ctx, event, pdu),
        State::S2 => waiting_for_eof(m, ctx, event, pdu),
        State::Finished => warn!(
            "ignored event '{}' in trans '{}' because the machine has finished <R1>",
            event, m.hdr.trans
        ),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::actions::testing::TestBed;
    use crate::actions::{initialize, Origin};
    use crate::checksum::checksum_of;
    use crate::id::{Id, TransactionId};
    use crate::pdu::{Eof, Metadata, Mode, PduHeader};
    use crate::types::FinalStatus;

    fn header() -> PduHeader {
        PduHeader {
            mode: Mode::Unacknowledged,
            trans: TransactionId::new(Id::from(88), 5),
            dest_id: Id::from(23),
            ..PduHeader::default()
        }
    }

    fn receiver(bed: &mut TestBed) -> Machine {
        let mut m = Machine::new();
        initialize(&mut m, &bed.ctx(), Origin::Pdu(&header()), false);
        m
    }

    fn md(size: u32) -> Pdu {
        Pdu::new(
            header(),
            PduBody::Metadata(Metadata {
                segmentation_control: false,
                file_size: size,
                source_file_name: "src".into(),
                dest_file_name: "dst".into(),
                file_transfer: true,
            }),
        )
    }

    fn fd(offset: u32, data: &'static [u8]) -> Pdu {
        Pdu::new(
            header(),
            PduBody::FileData(FileData {
                offset,
                data: Bytes::from_static(data),
            }),
        )
    }

    fn eof(cc: ConditionCode, checksum: u32, size: u32) -> Pdu {
        Pdu::new(
            header(),
            PduBody::Eof(Eof {
                condition_code: cc,
                file_checksum: checksum,
                file_size: size,
            }),
        )
    }

    fn feed(bed: &mut TestBed, m: &mut Machine, event: Event, pdu: &Pdu) {
        state_table(m, &mut bed.ctx(), event, Some(pdu), None);
    }

    #[test]
    fn test_nominal_receive() {
        let mut bed = TestBed::new();
        let mut m = receiver(&mut bed);
        assert_eq!(m.status.role, crate::types::Role::Class1Receiver);

        feed(&mut bed, &mut m, Event::Metadata, &md(10));
        assert_eq!(m.status.state, State::S2);
        feed(&mut bed, &mut m, Event::FileData, &fd(0, b"01234"));
        feed(&mut bed, &mut m, Event::FileData, &fd(5, b"56789"));
        feed(
            &mut bed,
            &mut m,
            Event::EofNoError,
            &eof(ConditionCode::NoError, checksum_of(b"0123456789"), 10),
        );

        assert_eq!(m.status.final_status, FinalStatus::Successful);
        assert_eq!(m.status.delivery_code, DeliveryCode::Complete);
        assert_eq!(bed.fs.contents("dst").unwrap(), b"0123456789");
        assert!(!bed.fs.exists(&m.status.temp_file_name));
        assert!(bed.output.is_empty());
    }

    #[test]
    fn test_filedata_before_metadata_keeps_temp_file() {
        let mut bed = TestBed::new();
        let mut m = receiver(&mut bed);

        feed(&mut bed, &mut m, Event::FileData, &fd(3, b"def"));
        let temp = m.status.temp_file_name.clone();
        feed(&mut bed, &mut m, Event::Metadata, &md(6));
        assert_eq!(m.status.temp_file_name, temp);
        feed(&mut bed, &mut m, Event::FileData, &fd(0, b"abc"));
        feed(
            &mut bed,
            &mut m,
            Event::EofNoError,
            &eof(ConditionCode::NoError, checksum_of(b"abcdef"), 6),
        );

        assert_eq!(m.status.final_status, FinalStatus::Successful);
        assert_eq!(bed.fs.contents("dst").unwrap(), b"abcdef");
        // MachineAllocated는 한 번만
        let allocated = bed
            .kinds()
            .into_iter()
            .filter(|k| *k == IndicationType::MachineAllocated)
            .count();
        assert_eq!(allocated, 1);
    }

    #[test]
    fn test_checksum_failure_cancels_without_output() {
        let mut bed = TestBed::new();
        let mut m = receiver(&mut bed);

        feed(&mut bed, &mut m, Event::Metadata, &md(4));
        feed(&mut bed, &mut m, Event::FileData, &fd(0, b"abcd"));
        feed(&mut bed, &mut m, Event::EofNoError, &eof(ConditionCode::NoError, 1, 4));

        assert_eq!(m.status.condition_code, ConditionCode::FileChecksumFailure);
        assert_eq!(m.status.final_status, FinalStatus::Cancelled);
        assert!(!bed.fs.exists("dst"));
        assert!(bed.fs.names().is_empty());
        assert!(bed.output.is_empty());
    }

    #[test]
    fn test_eof_without_metadata() {
        let mut bed = TestBed::new();
        let mut m = receiver(&mut bed);

        feed(&mut bed, &mut m, Event::FileData, &fd(0, b"ab"));
        feed(&mut bed, &mut m, Event::EofNoError, &eof(ConditionCode::NoError, 0, 2));

        assert_eq!(m.status.final_status, FinalStatus::NoMetadata);
        assert!(m.has_this_state_machine_finished);
        // 임시 파일은 정리됨
        assert!(bed.fs.names().is_empty());
    }

    #[test]
    fn test_eof_cancel_and_file_size_error() {
        let mut bed = TestBed::new();
        let mut m = receiver(&mut bed);
        feed(&mut bed, &mut m, Event::Metadata, &md(4));
        feed(
            &mut bed,
            &mut m,
            Event::EofCancel,
            &eof(ConditionCode::CancelRequestReceived, 0, 0),
        );
        assert_eq!(m.status.final_status, FinalStatus::Cancelled);
        assert_eq!(m.status.condition_code, ConditionCode::CancelRequestReceived);

        let mut m = receiver(&mut bed);
        feed(&mut bed, &mut m, Event::Metadata, &md(2));
        feed(&mut bed, &mut m, Event::FileData, &fd(0, b"abcd"));
        feed(
            &mut bed,
            &mut m,
            Event::EofNoError,
            &eof(ConditionCode::NoError, checksum_of(b"ab"), 2),
        );
        assert_eq!(m.status.condition_code, ConditionCode::FileSizeError);
        assert_eq!(m.status.final_status, FinalStatus::Cancelled);
    }
}
