//! Class 2 수신자 (R2)
//!
//! - S1: 정상 진행 (데이터 수신, EOF에 ACK, 갭이 있으면 NAK, 다 받으면 FIN)
//! - S2: 취소 중 (FIN-cancel을 보내고 ACK를 기다림)
//!
//! 송신 PDU 헤더는 처음 받은 PDU의 헤더를 방향만 바꿔 재사용한다.

use tracing::{debug, error, warn};

use crate::actions::{self, Context};
use crate::event::Event;
use crate::machine::Machine;
use crate::output::PduClass;
use crate::pdu::{Pdu, PduBody, PduHeader};
use crate::request::PutRequest;
use crate::types::{ConditionCode, DeliveryCode, IndicationType, Response, State};

/// FIN(취소)을 대기열에 넣고 시도 횟수 초기화
fn ask_partner_to_cancel(m: &mut Machine) {
    m.fin = actions::build_fin(m.status.condition_code, m.status.delivery_code);
    m.is_outgoing_fin_buffered = true;
    m.status.attempts = 0;
}

fn move_to_state_s2(m: &mut Machine) {
    m.status.state = State::S2;
    debug!("<R2> (State S2) 'Transaction Cancelled' ({})", m.hdr.trans);
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
            move_to_state_s2(m);
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

/// 첫 수신 PDU면 헤더를 재사용하고 MachineAllocated 알림
fn first_pdu(m: &mut Machine, ctx: &mut Context<'_>, hdr: &PduHeader) {
    if !m.has_a_pdu_been_received {
        actions::reuse_senders_first_hdr(hdr, m);
        actions::note_first_pdu(m, ctx);
    }
}

/// 모든 데이터 수신 완료: 파일 검증, 최종 이름으로 옮기기, FIN 대기열
fn all_data_received(m: &mut Machine, ctx: &mut Context<'_>) {
    if m.status.delivery_code == DeliveryCode::Complete {
        warn!("'all_data_received' called 2+ times ({})", m.hdr.trans);
        return;
    }
    m.status.delivery_code = DeliveryCode::Complete;
    m.is_outgoing_nak_buffered = false;
    m.nak_timer.cancel();

    if m.status.md.file_transfer {
        m.file = None;

        if !actions::is_file_checksum_valid(m, ctx)
            && !fault_handler(m, ctx, ConditionCode::FileChecksumFailure)
        {
            return;
        }

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
                    return;
                }
            }
        }
    }

    m.fin = actions::build_fin(ConditionCode::NoError, m.status.delivery_code);
    m.is_outgoing_fin_buffered = true;
    m.status.attempts = 0;
}

fn release_ack(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_ack(m, ctx);
    m.is_outgoing_ack_buffered = false;

    if m.ack.condition_code == ConditionCode::NoError {
        // EOF-no-error의 ACK: 갭 채우기 단계로
        if !m.have_we_initiated_a_cancel {
            m.status.phase = 3;
        }
    } else if !m.have_we_initiated_a_cancel {
        // 상대가 시작한 취소에 응답했으므로 종료
        actions::transaction_has_finished(m, ctx);
    }
}

fn release_fin(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_fin(m, ctx);
    m.is_outgoing_fin_buffered = false;

    m.status.phase = 4;
    m.status.attempts += 1;
    m.ack_timer = ctx.ack_timer();
}

fn release_nak(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_nak(m, ctx);
    m.is_outgoing_nak_buffered = false;

    m.status.how_many_naks += 1;
    if m.status.state == State::S1 {
        m.status.attempts += 1;
        m.nak_timer = ctx.nak_timer();
    }
}

fn throttle_file_directive(m: &mut Machine, ctx: &mut Context<'_>) {
    if m.status.frozen {
        return;
    }
    if m.status.suspended {
        // 정지 중에는 ACK만
        if m.is_outgoing_ack_buffered && ctx.ready(PduClass::FileDirective, m) {
            release_ack(m, ctx);
        }
        return;
    }

    if m.is_outgoing_ack_buffered {
        if ctx.ready(PduClass::FileDirective, m) {
            release_ack(m, ctx);
        }
    } else if m.is_outgoing_nak_buffered {
        if ctx.ready(PduClass::FileDirective, m) {
            release_nak(m, ctx);
        }
    } else if m.is_outgoing_fin_buffered && ctx.ready(PduClass::FileDirective, m) {
        release_fin(m, ctx);
    }
}

fn received_metadata(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    if m.status.state == State::S2 {
        return;
    }
    first_pdu(m, ctx, &pdu.header);

    // Metadata가 중복으로 와도 처음 것만 처리
    if m.status.has_md_been_received {
        return;
    }
    m.status.has_md_been_received = true;
    if let PduBody::Metadata(md) = &pdu.body {
        m.status.md = md.clone();
    }
    ctx.notify(IndicationType::MetadataRecv, &m.status);

    if m.status.md.file_transfer
        && !m.is_there_an_open_file()
        && !actions::open_temp_file(m, ctx)
    {
        error!("unable to open a temp file (MD)");
        if !fault_handler(m, ctx, ConditionCode::FilestoreRejection) {
            return;
        }
    }

    m.nak.metadata_sent_or_received();

    // NAK 타이머를 기다리지 않고 바로 완료
    if m.has_eof_been_received && m.nak.is_empty() {
        all_data_received(m, ctx);
    }
}

fn received_file_data(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    if m.status.state == State::S2 {
        return;
    }
    let PduBody::FileData(fd) = &pdu.body else {
        return;
    };
    let Some(end) = fd.end() else {
        warn!(
            "Filedata beyond the 32-bit file address space ignored ({})",
            m.hdr.trans
        );
        return;
    };
    first_pdu(m, ctx, &pdu.header);

    if !m.is_there_an_open_file() && !actions::open_temp_file(m, ctx) {
        error!("unable to open a temp file (FD)");
        if !fault_handler(m, ctx, ConditionCode::FilestoreRejection) {
            return;
        }
    }

    m.status.fd_offset = fd.offset;
    m.status.fd_length = fd.data.len() as u32;
    ctx.notify(IndicationType::FileSegmentRecv, &m.status);
    actions::store_file_data(m, fd);

    if end > m.status.received_file_size {
        m.status.received_file_size = end;
    }
    m.nak.data_received(m.status.fd_offset, end);

    if m.has_eof_been_received {
        // EOF가 말한 크기를 넘는 데이터
        if !actions::is_file_size_valid(m) && !fault_handler(m, ctx, ConditionCode::FileSizeError)
        {
            return;
        }
        if m.nak.is_empty() {
            all_data_received(m, ctx);
        }
    }
}

fn received_eof(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    if let PduBody::Eof(eof) = pdu.body {
        m.eof = eof;
    }
    actions::reuse_senders_first_hdr(&pdu.header, m);

    // EOF는 상태와 관계없이 항상 ACK
    m.ack = actions::build_ack_eof(m);
    m.is_outgoing_ack_buffered = true;

    if m.status.state == State::S2 {
        return;
    }

    m.status.phase = 2;
    actions::note_first_pdu(m, ctx);
    ctx.notify(IndicationType::EofRecv, &m.status);

    if m.has_eof_been_received {
        return;
    }
    m.has_eof_been_received = true;

    // EOF가 드러낸 끝부분 갭 추가
    m.nak.set_end_of_scope(m.eof.file_size);

    if !actions::is_file_size_valid(m) && !fault_handler(m, ctx, ConditionCode::FileSizeError) {
        return;
    }

    if m.nak.is_empty() {
        all_data_received(m, ctx);
    } else {
        m.is_outgoing_nak_buffered = true;
    }
}

fn received_eof_cancel(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    if let PduBody::Eof(eof) = pdu.body {
        m.eof = eof;
    }
    first_pdu(m, ctx, &pdu.header);

    if m.status.state == State::S1 {
        actions::cancel_locally(m);
        m.status.condition_code = m.eof.condition_code;
        m.status.phase = 4;
        move_to_state_s2(m);
    }

    m.ack = actions::build_ack_eof(m);
    m.is_outgoing_ack_buffered = true;
}

/// R2 상태 테이블
pub fn state_table(
    m: &mut Machine,
    ctx: &mut Context<'_>,
    event: Event,
    pdu: Option<&Pdu>,
    _put: Option<&PutRequest>,
) {
    actions::trace_event("R2", m, event);

    match (event, pdu) {
        (Event::ThrottleFileDir, _) => throttle_file_directive(m, ctx),

        (Event::SuspendRequest, _) => actions::notice_of_suspension(m, ctx),

        (Event::ResumeRequest, _) => {
            ctx.notify(IndicationType::Resumed, &m.status);
            m.status.suspended = false;
            if !m.status.frozen {
                actions::resume_timers(m, ctx.now);
            }
        }

        (Event::CancelRequest, _) => {
            if m.status.state == State::S1 {
                m.status.condition_code = ConditionCode::CancelRequestReceived;
                m.have_we_initiated_a_cancel = true;
                actions::cancel_locally(m);
                ask_partner_to_cancel(m);
                move_to_state_s2(m);
            }
        }

        (Event::AbandonRequest, _) => actions::abandon(m, ctx),

        (Event::ReportRequest, _) => ctx.notify(IndicationType::Report, &m.status),

        (Event::FreezeRequest, _) => {
            m.status.frozen = true;
            actions::suspend_timers(m, ctx.now);
        }

        (Event::ThawRequest, _) => {
            m.status.frozen = false;
            if !m.status.suspended {
                actions::resume_timers(m, ctx.now);
            }
        }

        (Event::Metadata, Some(pdu)) => received_metadata(m, ctx, pdu),

        (Event::FileData, Some(pdu)) => received_file_data(m, ctx, pdu),

        (Event::EofNoError, Some(pdu)) => received_eof(m, ctx, pdu),

        (Event::EofCancel, Some(pdu)) => received_eof_cancel(m, ctx, pdu),

        (Event::AckFinNoError, _) => {
            if m.status.state == State::S1 {
                if m.status.delivery_code == DeliveryCode::Complete {
                    actions::transaction_has_finished(m, ctx);
                } else {
                    warn!(
                        "protocol violation: ack of non-existent Finished-no-error ({})",
                        m.hdr.trans
                    );
                }
            }
        }

        (Event::AckFinCancel, _) => {
            if m.status.state == State::S1 {
                warn!(
                    "protocol violation: ack of non-existent Finished-cancel ({})",
                    m.hdr.trans
                );
            } else {
                actions::transaction_has_finished(m, ctx);
            }
        }

        (Event::AckTimerExpired, _) => {
            ctx.notify(IndicationType::AckTimerExpired, &m.status);

            if m.status.state == State::S1 {
                if m.status.attempts >= ctx.config.ack_limit
                    && !fault_handler(m, ctx, ConditionCode::PositiveAckLimitReached)
                {
                    return;
                }
                m.is_outgoing_fin_buffered = true;
            } else if m.status.attempts >= ctx.config.ack_limit {
                actions::abandon(m, ctx);
            } else {
                m.is_outgoing_fin_buffered = true;
            }
        }

        (Event::NakTimerExpired, _) => {
            ctx.notify(IndicationType::NakTimerExpired, &m.status);
            if m.status.state == State::S2 {
                return;
            }

            if m.nak.is_empty() {
                all_data_received(m, ctx);
            } else {
                if m.status.attempts >= ctx.config.nak_limit
                    && !fault_handler(m, ctx, ConditionCode::NakLimitReached)
                {
                    return;
                }
                m.is_outgoing_nak_buffered = true;
            }
        }

        (Event::InactivityTimerExpired, _) => {
            ctx.notify(IndicationType::InactivityTimerExpired, &m.status);

            if m.status.state == State::S1 {
                m.inactivity_timer = ctx.inactivity_timer();
                fault_handler(m, ctx, ConditionCode::InactivityDetected);
            } else {
                actions::abandon(m, ctx);
            }
        }

        _ => warn!(
            "ignored event '{}' in state {} for trans '{}' <R2>",
            event, m.status.state, m.hdr.trans
        ),
    }
}
