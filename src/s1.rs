//! Class 1 송신자 (S1)
//!
//! 상대의 응답이 없으므로 상태는 항상 S1이다.
//! Metadata, Filedata, EOF를 순서대로 내보내고 EOF 송신과 함께 끝난다.

use tracing::{error, warn};

use crate::actions::{self, Context};
use crate::event::Event;
use crate::machine::Machine;
use crate::output::PduClass;
use crate::pdu::Pdu;
use crate::request::PutRequest;
use crate::types::{ConditionCode, IndicationType, Response};

/// EOF(취소) 대기열에 넣기
fn ask_partner_to_cancel(m: &mut Machine) {
    m.eof = actions::build_eof(m.status.condition_code, 0, 0);
    m.is_outgoing_eof_buffered = true;
}

/// 결함 처리, 호출자가 계속해도 되면 true
fn fault_handler(m: &mut Machine, ctx: &mut Context<'_>, fault: ConditionCode) -> bool {
    m.status.condition_code = fault;
    ctx.notify(IndicationType::Fault, &m.status);

    match ctx.config.response_to_fault {
        Response::Cancel => {
            m.have_we_initiated_a_cancel = true;
            actions::cancel_locally(m);
            ask_partner_to_cancel(m);
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

/// 원본 파일을 열고 전체 구간을 송신 대기열에 넣기
///
/// S2도 첫 Metadata 송신 시 같은 절차를 쓴다.
pub(crate) fn queue_file_data<F>(m: &mut Machine, ctx: &mut Context<'_>, mut fault: F)
where
    F: FnMut(&mut Machine, &mut Context<'_>, ConditionCode) -> bool,
{
    if !actions::open_source_file(m, ctx) && !fault(m, ctx, ConditionCode::FilestoreRejection) {
        return;
    }
    if !actions::is_file_structure_valid(m, ctx)
        && !fault(m, ctx, ConditionCode::InvalidFileStructure)
    {
        return;
    }

    m.nak.set_end_of_scope(m.status.md.file_size);

    // 빈 파일은 보낼 Filedata가 없으므로 바로 EOF
    if m.nak.how_many_gaps() == 0 {
        m.eof = actions::build_eof(
            m.status.condition_code,
            m.status.file_checksum_as_calculated,
            m.status.md.file_size,
        );
        m.is_outgoing_eof_buffered = true;
    }
}

fn release_metadata(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_md(m, ctx);
    m.is_outgoing_md_buffered = false;

    ctx.notify(IndicationType::MetadataSent, &m.status);

    if m.status.md.file_transfer && !m.is_external_xfer_open {
        queue_file_data(m, ctx, fault_handler);
    } else if m.status.md.file_transfer {
        // 외부 전송 중: EOF는 외부 전송 완료 이벤트에서
    } else {
        m.eof = actions::build_eof(m.status.condition_code, 0, 0);
        m.is_outgoing_eof_buffered = true;
    }
}

fn release_eof(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_eof(m, ctx);
    m.is_outgoing_eof_buffered = false;

    ctx.notify(IndicationType::EofSent, &m.status);

    // Class 1은 응답이 없으므로 여기서 끝
    actions::transaction_has_finished(m, ctx);
}

fn release_file_data(m: &mut Machine, ctx: &mut Context<'_>) {
    let Some((offset, length)) = actions::send_one_file_data_pdu(m, ctx) else {
        return;
    };
    m.nak.data_sent(offset, offset + length);

    if m.nak.how_many_gaps() == 0 {
        m.eof = actions::build_eof(
            m.status.condition_code,
            m.status.file_checksum_as_calculated,
            m.status.md.file_size,
        );
        m.is_outgoing_eof_buffered = true;
    }
}

/// S1 상태 테이블
pub fn state_table(
    m: &mut Machine,
    ctx: &mut Context<'_>,
    event: Event,
    _pdu: Option<&Pdu>,
    put: Option<&PutRequest>,
) {
    actions::trace_event("S1", m, event);

    match event {
        Event::ThrottleFileDir => {
            if m.status.frozen || m.status.suspended {
                // 동결/정지 중에는 아무것도 내보내지 않음
            } else if m.is_outgoing_md_buffered {
                if ctx.ready(PduClass::FileDirective, m) {
                    release_metadata(m, ctx);
                }
            } else if m.is_outgoing_eof_buffered && ctx.ready(PduClass::FileDirective, m) {
                release_eof(m, ctx);
            }
        }

        Event::ThrottleFileData => {
            if !m.status.frozen
                && !m.status.suspended
                && m.nak.how_many_gaps() > 0
                && ctx.ready(PduClass::FileData, m)
            {
                release_file_data(m, ctx);
            }
        }

        Event::PutRequest => {
            let Some(put) = put else {
                error!("invariant: Put 이벤트에 요청 없음 ({})", m.hdr.trans);
                return;
            };
            actions::build_metadata_from_put_req(put, &mut m.hdr, &mut m.status.md, ctx);
            m.status.trans = m.hdr.trans;
            m.status.partner_id = Some(put.dest_id);

            ctx.notify(IndicationType::Transaction, &m.status);
            ctx.notify(IndicationType::MachineAllocated, &m.status);

            m.is_outgoing_md_buffered = true;
        }

        Event::SuspendRequest => actions::notice_of_suspension(m, ctx),

        Event::ResumeRequest => {
            ctx.notify(IndicationType::Resumed, &m.status);
            m.status.suspended = false;
        }

        Event::CancelRequest => {
            m.status.cancelled = true;
            m.status.condition_code = ConditionCode::CancelRequestReceived;
            ask_partner_to_cancel(m);
        }

        Event::AbandonRequest => actions::abandon(m, ctx),

        Event::ReportRequest => ctx.notify(IndicationType::Report, &m.status),

        Event::FreezeRequest => m.status.frozen = true,

        Event::ThawRequest => m.status.frozen = false,

        Event::ExternalFileTransferCompleted => {
            m.eof = actions::build_eof(
                m.status.condition_code,
                m.status.file_checksum_as_calculated,
                m.status.md.file_size,
            );
            m.is_outgoing_eof_buffered = true;
            m.is_external_xfer_open = false;
            m.should_external_xfer_be_closed = false;
        }

        _ => warn!("<S1> ignored event '{}' ({})", event, m.hdr.trans),
    }
}
