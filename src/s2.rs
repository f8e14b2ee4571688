//! Class 2 송신자 (S2)
//!
//! - S1: 정상 진행 (Metadata, Filedata, EOF 후 NAK에 따라 재전송, FIN에 ACK)
//! - S2: 취소 중 (EOF-cancel을 보내고 ACK를 기다림)
//!
//! Phase: 1=전송, 2=EOF 인계 대기, 3=갭 채우기, 4=종료

use tracing::{debug, error, warn};

use crate::actions::{self, Context};
use crate::event::Event;
use crate::machine::Machine;
use crate::output::PduClass;
use crate::pdu::{Direction, Pdu, PduBody, PduHeader};
use crate::request::PutRequest;
use crate::types::{ConditionCode, DeliveryCode, IndicationType, Response, State};

/// EOF(취소)를 대기열에 넣고 시도 횟수 초기화
fn ask_partner_to_cancel(m: &mut Machine) {
    m.eof = actions::build_eof(m.status.condition_code, 0, m.status.md.file_size);
    m.is_outgoing_eof_buffered = true;
    m.status.attempts = 0;
}

fn move_to_state_s2(m: &mut Machine) {
    m.status.state = State::S2;
    debug!("<S2> (State S2) 'Transaction Cancelled' ({})", m.hdr.trans);
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

fn release_ack(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_ack(m, ctx);
    m.is_outgoing_ack_buffered = false;

    // 우리가 시작한 취소라면 EOF-cancel의 ACK를 받을 때까지 유지
    if !m.have_we_initiated_a_cancel {
        actions::transaction_has_finished(m, ctx);
    }
}

fn release_metadata(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_md(m, ctx);
    m.is_outgoing_md_buffered = false;

    m.nak.metadata_sent_or_received();
    ctx.notify(IndicationType::MetadataSent, &m.status);

    // NAK에 의한 재전송이면 여기서 끝
    if m.status.attempts != 0 {
        return;
    }
    if m.status.md.file_transfer && !m.is_external_xfer_open {
        crate::s1::queue_file_data(m, ctx, fault_handler);
    } else if m.status.md.file_transfer {
        // 외부 전송 중
    } else {
        m.eof = actions::build_eof(m.status.condition_code, 0, 0);
        m.is_outgoing_eof_buffered = true;
    }
}

fn release_eof(m: &mut Machine, ctx: &mut Context<'_>) {
    actions::send_eof(m, ctx);
    m.is_outgoing_eof_buffered = false;

    m.status.attempts += 1;
    m.status.phase = if m.eof.condition_code == ConditionCode::NoError {
        2
    } else {
        4
    };
    m.ack_timer = ctx.ack_timer();

    if !m.has_eof_been_sent {
        m.has_eof_been_sent = true;
        ctx.notify(IndicationType::EofSent, &m.status);
        // 이제부터 상대의 응답을 기다림
        m.inactivity_timer = ctx.inactivity_timer();
    }
}

fn release_file_data(m: &mut Machine, ctx: &mut Context<'_>) {
    let Some((offset, length)) = actions::send_one_file_data_pdu(m, ctx) else {
        return;
    };
    m.nak.data_sent(offset, offset + length);

    if m.nak.how_many_gaps() == 0 {
        // 재전송이 끝날 때마다 닫고 다음 NAK에서 다시 연다
        m.file = None;
        if !m.has_eof_been_sent {
            m.eof = actions::build_eof(
                m.status.condition_code,
                m.status.file_checksum_as_calculated,
                m.status.md.file_size,
            );
            m.is_outgoing_eof_buffered = true;
        }
    }
}

/// 이전 머신이 보낸 ACK-FIN이 유실되어 FIN이 다시 온 경우
///
/// 이 머신은 ACK-FIN 하나를 보내고 끝난다.
fn ack_fin_from_previous_machine(m: &mut Machine, ctx: &mut Context<'_>, pdu: &Pdu) {
    let PduBody::Fin(fin) = pdu.body else {
        return;
    };
    m.status.is_this_trans_solely_for_ack_fin = true;
    m.status.phase = 4;

    m.fin = fin;
    m.status.condition_code = fin.condition_code;
    if m.status.condition_code != ConditionCode::NoError {
        actions::cancel_locally(m);
    }

    m.hdr = PduHeader {
        direction: Direction::TowardReceiver,
        ..pdu.header
    };
    m.status.trans = m.hdr.trans;
    m.status.partner_id = Some(m.hdr.dest_id);

    ctx.notify(IndicationType::Transaction, &m.status);
    ctx.notify(IndicationType::MachineAllocated, &m.status);

    m.ack = actions::build_ack_fin(m);
    m.is_outgoing_ack_buffered = true;
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
    } else if m.is_outgoing_md_buffered {
        if ctx.ready(PduClass::FileDirective, m) {
            release_metadata(m, ctx);
        }
    } else if m.is_outgoing_eof_buffered && ctx.ready(PduClass::FileDirective, m) {
        release_eof(m, ctx);
    }
}

/// S2 상태 테이블
pub fn state_table(
    m: &mut Machine,
    ctx: &mut Context<'_>,
    event: Event,
    pdu: Option<&Pdu>,
    put: Option<&PutRequest>,
) {
    actions::trace_event("S2", m, event);

    match event {
        Event::ThrottleFileDir => throttle_file_directive(m, ctx),

        Event::ThrottleFileData => {
            // EOF-cancel을 보낸 뒤에는 Filedata를 내보내지 않음
            if !m.status.frozen
                && !m.status.suspended
                && m.nak.how_many_gaps() > 0
                && !m.status.cancelled
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
            m.has_a_put_request_been_received = true;
            actions::build_metadata_from_put_req(put, &mut m.hdr, &mut m.status.md, ctx);
            m.status.trans = m.hdr.trans;
            m.status.partner_id = Some(put.dest_id);

            ctx.notify(IndicationType::Transaction, &m.status);
            ctx.notify(IndicationType::MachineAllocated, &m.status);

            m.is_outgoing_md_buffered = true;
        }

        Event::SuspendRequest => actions::notice_of_suspension(m, ctx),

        Event::ResumeRequest => {
            m.status.suspended = false;
            ctx.notify(IndicationType::Resumed, &m.status);
            // 동결 중이면 타이머는 계속 멈춤
            if !m.status.frozen {
                actions::resume_timers(m, ctx.now);
            }
        }

        Event::CancelRequest => {
            if m.status.state == State::S1 {
                m.status.condition_code = ConditionCode::CancelRequestReceived;
                m.have_we_initiated_a_cancel = true;
                actions::cancel_locally(m);
                ask_partner_to_cancel(m);
                move_to_state_s2(m);
            }
        }

        Event::AbandonRequest => actions::abandon(m, ctx),

        Event::ReportRequest => ctx.notify(IndicationType::Report, &m.status),

        Event::FreezeRequest => {
            m.status.frozen = true;
            actions::suspend_timers(m, ctx.now);
        }

        Event::ThawRequest => {
            m.status.frozen = false;
            if !m.status.suspended {
                actions::resume_timers(m, ctx.now);
            }
        }

        Event::AckEofNoError => {
            if m.status.state == State::S1 {
                if m.status.attempts == 0 {
                    warn!("protocol violation: ack of non-existent EOF-no-error ({})", m.hdr.trans);
                } else {
                    // 인계 완료
                    m.status.phase = 3;
                    m.ack_timer.cancel();
                    m.is_outgoing_eof_buffered = false;
                }
            }
        }

        Event::AckEofCancel => {
            if m.status.state == State::S1 {
                warn!("protocol violation: ack of non-existent EOF-cancel ({})", m.hdr.trans);
            } else if let Some(PduBody::Ack(ack)) = pdu.map(|p| &p.body) {
                m.ack = *ack;
                actions::transaction_has_finished(m, ctx);
            }
        }

        Event::Nak => {
            m.status.how_many_naks += 1;
            if m.status.state != State::S1 {
                return;
            }
            if m.status.md.file_transfer
                && !m.is_there_an_open_file()
                && !actions::open_source_file(m, ctx)
                && !fault_handler(m, ctx, ConditionCode::FilestoreRejection)
            {
                return;
            }
            if let Some(PduBody::Nak(nak)) = pdu.map(|p| &p.body) {
                m.nak.copy_from(nak);
            }
            if m.nak.is_metadata_missing() {
                m.is_outgoing_md_buffered = true;
            }
        }

        Event::FinNoError => {
            let Some(pdu) = pdu else {
                return;
            };
            if !m.has_a_put_request_been_received {
                ack_fin_from_previous_machine(m, ctx, pdu);
                return;
            }
            if !m.has_eof_been_sent {
                warn!(
                    "protocol violation: received Finished-no-error before sending EOF ({})",
                    m.hdr.trans
                );
                return;
            }
            if let PduBody::Fin(fin) = pdu.body {
                m.fin = fin;
            }
            if m.fin.delivery_code == DeliveryCode::Incomplete {
                warn!(
                    "Finished-no-error from partner shouldn't say delivery was incomplete ({})",
                    m.hdr.trans
                );
            }
            m.ack = actions::build_ack_fin(m);
            m.is_outgoing_ack_buffered = true;

            if m.status.state == State::S1 {
                m.status.phase = 4;
                m.is_outgoing_md_buffered = false;
                m.is_outgoing_eof_buffered = false;
            }
        }

        Event::FinCancel => {
            let Some(pdu) = pdu else {
                return;
            };
            if !m.has_a_put_request_been_received {
                ack_fin_from_previous_machine(m, ctx, pdu);
                return;
            }
            if let PduBody::Fin(fin) = pdu.body {
                m.fin = fin;
            }
            if m.status.state == State::S1 {
                actions::cancel_locally(m);
                m.status.condition_code = m.fin.condition_code;
                m.status.phase = 4;
                move_to_state_s2(m);
            }
            m.ack = actions::build_ack_fin(m);
            m.is_outgoing_ack_buffered = true;
        }

        Event::AckTimerExpired => {
            ctx.notify(IndicationType::AckTimerExpired, &m.status);

            if m.status.state == State::S1 {
                if m.status.attempts >= ctx.config.ack_limit
                    && !fault_handler(m, ctx, ConditionCode::PositiveAckLimitReached)
                {
                    return;
                }
                m.is_outgoing_eof_buffered = true;
            } else if m.status.attempts >= ctx.config.ack_limit {
                actions::abandon(m, ctx);
            } else {
                m.is_outgoing_eof_buffered = true;
            }
        }

        Event::InactivityTimerExpired => {
            ctx.notify(IndicationType::InactivityTimerExpired, &m.status);

            if m.status.state == State::S1 {
                m.inactivity_timer = ctx.inactivity_timer();
                fault_handler(m, ctx, ConditionCode::InactivityDetected);
            } else {
                actions::abandon(m, ctx);
            }
        }

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

        _ => warn!(
            "ignored event '{}' in state {} for trans '{}' <S2>",
            event, m.status.state, m.hdr.trans
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::TestBed;
    use crate::actions::{initialize, Origin};
    use crate::id::{Id, TransactionId};
    use crate::pdu::{self, Ack, DirectiveCode, Fin, Nak};
    use crate::types::{FinalStatus, TransStat};

    fn start(bed: &mut TestBed, put: &PutRequest) -> Machine {
        let mut m = Machine::new();
        initialize(
            &mut m,
            &bed.ctx(),
            Origin::Put {
                request: put,
                sequence: 4,
            },
            false,
        );
        state_table(&mut m, &mut bed.ctx(), Event::PutRequest, None, Some(put));
        m
    }

    fn cycle(bed: &mut TestBed, m: &mut Machine) {
        state_table(m, &mut bed.ctx(), Event::ThrottleFileDir, None, None);
        state_table(m, &mut bed.ctx(), Event::ThrottleFileData, None, None);
    }

    /// 수신자 쪽에서 온 PDU
    fn reply(m: &Machine, body: PduBody) -> Pdu {
        let hdr = PduHeader {
            direction: Direction::TowardSender,
            ..m.hdr
        };
        Pdu::new(hdr, body)
    }

    fn feed(bed: &mut TestBed, m: &mut Machine, event: Event, pdu: &Pdu) {
        state_table(m, &mut bed.ctx(), event, Some(pdu), None);
    }

    fn ack_eof(cc: ConditionCode) -> PduBody {
        PduBody::Ack(Ack {
            directive_code: DirectiveCode::Eof as u8,
            directive_subtype: 0,
            condition_code: cc,
            delivery_code: DeliveryCode::Incomplete,
            transaction_status: TransStat::Active,
        })
    }

    fn fin(cc: ConditionCode) -> PduBody {
        PduBody::Fin(Fin {
            condition_code: cc,
            end_system_status: true,
            delivery_code: if cc == ConditionCode::NoError {
                DeliveryCode::Complete
            } else {
                DeliveryCode::Incomplete
            },
        })
    }

    /// Metadata, Filedata, EOF까지 보낸 상태
    fn sent_everything(bed: &mut TestBed, data: &[u8]) -> Machine {
        bed.fs.insert("f", data.to_vec());
        let put = PutRequest::new("f", Id::from(88), "g");
        let mut m = start(bed, &put);
        for _ in 0..50 {
            if m.has_eof_been_sent {
                break;
            }
            cycle(bed, &mut m);
        }
        assert!(m.has_eof_been_sent);
        m
    }

    #[test]
    fn test_nominal_exchange() {
        let mut bed = TestBed::new();
        let mut m = sent_everything(&mut bed, b"hello world");
        assert_eq!(m.status.phase, 2);
        assert_eq!(m.status.attempts, 1);
        assert!(m.ack_timer.is_running());
        assert!(m.inactivity_timer.is_running());
        // 모든 Filedata를 보낸 뒤 파일은 닫힘
        assert!(!m.is_there_an_open_file());
        bed.sent();

        let pdu = reply(&m, ack_eof(ConditionCode::NoError));
        feed(&mut bed, &mut m, Event::AckEofNoError, &pdu);
        assert_eq!(m.status.phase, 3);
        assert!(m.ack_timer.is_off());

        let pdu = reply(&m, fin(ConditionCode::NoError));
        feed(&mut bed, &mut m, Event::FinNoError, &pdu);
        assert_eq!(m.status.phase, 4);
        cycle(&mut bed, &mut m);

        let sent = bed.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            PduBody::Ack(ack) => {
                assert_eq!(ack.directive_code, DirectiveCode::Fin as u8);
                assert_eq!(ack.transaction_status, TransStat::Active);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.status.final_status, FinalStatus::Successful);
    }

    #[test]
    fn test_nak_triggers_retransmission() {
        let mut bed = TestBed::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let mut m = sent_everything(&mut bed, &data);
        let checksum = m.eof.file_checksum;
        bed.sent();

        let nak = reply(
            &m,
            PduBody::Nak(Nak {
                start_of_scope: 0,
                end_of_scope: 300,
                is_metadata_missing: false,
                gaps: vec![(100, 130)],
            }),
        );
        feed(&mut bed, &mut m, Event::Nak, &nak);
        assert_eq!(m.status.how_many_naks, 1);
        assert!(m.is_there_an_open_file());

        cycle(&mut bed, &mut m);
        let sent = bed.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            PduBody::FileData(fd) => {
                assert_eq!(fd.offset, 100);
                assert_eq!(&fd.data[..], &data[100..130]);
            }
            other => panic!("unexpected {:?}", other),
        }
        // EOF는 다시 나가지 않고 체크섬도 그대로
        assert_eq!(m.status.file_checksum_as_calculated, checksum);
        assert!(!m.is_outgoing_eof_buffered);
    }

    #[test]
    fn test_nak_for_metadata_resends_it_only() {
        let mut bed = TestBed::new();
        let mut m = sent_everything(&mut bed, b"abc");
        bed.sent();

        let nak = reply(
            &m,
            PduBody::Nak(Nak {
                start_of_scope: 0,
                end_of_scope: 3,
                is_metadata_missing: true,
                gaps: vec![],
            }),
        );
        feed(&mut bed, &mut m, Event::Nak, &nak);
        assert!(m.is_outgoing_md_buffered);
        cycle(&mut bed, &mut m);

        let sent = bed.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, PduBody::Metadata(_)));
        assert!(!m.is_outgoing_eof_buffered);
    }

    #[test]
    fn test_ack_limit_cancels_then_abandons() {
        let mut bed = TestBed::new();
        bed.config.ack_limit = 2;
        let mut m = sent_everything(&mut bed, b"x");
        bed.sent();

        // 두 번째 EOF
        state_table(&mut m, &mut bed.ctx(), Event::AckTimerExpired, None, None);
        cycle(&mut bed, &mut m);
        assert_eq!(m.status.attempts, 2);

        // 한도 도달: 결함 -> 취소, EOF-cancel
        state_table(&mut m, &mut bed.ctx(), Event::AckTimerExpired, None, None);
        assert_eq!(m.status.state, State::S2);
        assert_eq!(m.status.condition_code, ConditionCode::PositiveAckLimitReached);
        assert_eq!(m.status.attempts, 0);
        cycle(&mut bed, &mut m);
        assert_eq!(m.status.phase, 4);

        state_table(&mut m, &mut bed.ctx(), Event::AckTimerExpired, None, None);
        cycle(&mut bed, &mut m);
        state_table(&mut m, &mut bed.ctx(), Event::AckTimerExpired, None, None);
        assert!(m.status.abandoned);
        assert_eq!(m.status.final_status, FinalStatus::Abandoned);

        let sent = bed.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|p| matches!(
            p.body,
            PduBody::Eof(pdu::Eof {
                condition_code: ConditionCode::NoError,
                ..
            }) | PduBody::Eof(pdu::Eof {
                condition_code: ConditionCode::PositiveAckLimitReached,
                ..
            })
        )));
    }

    #[test]
    fn test_cancel_request_waits_for_ack() {
        let mut bed = TestBed::new();
        bed.fs.insert("f", vec![1u8; 500]);
        let put = PutRequest::new("f", Id::from(88), "g");
        let mut m = start(&mut bed, &put);
        cycle(&mut bed, &mut m);

        state_table(&mut m, &mut bed.ctx(), Event::CancelRequest, None, None);
        assert_eq!(m.status.state, State::S2);
        cycle(&mut bed, &mut m);

        let sent = bed.sent();
        match &sent.last().unwrap().body {
            PduBody::Eof(eof) => {
                assert_eq!(eof.condition_code, ConditionCode::CancelRequestReceived);
                assert_eq!(eof.file_size, 500);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!m.has_this_state_machine_finished);

        let pdu = reply(&m, ack_eof(ConditionCode::CancelRequestReceived));
        feed(&mut bed, &mut m, Event::AckEofCancel, &pdu);
        assert_eq!(m.status.final_status, FinalStatus::Cancelled);
    }

    #[test]
    fn test_fin_without_put_acks_previous_machine() {
        let mut bed = TestBed::new();
        let hdr = PduHeader {
            direction: Direction::TowardSender,
            trans: TransactionId::new(Id::from(23), 9),
            dest_id: Id::from(88),
            ..PduHeader::default()
        };
        let mut m = Machine::new();
        initialize(&mut m, &bed.ctx(), Origin::Pdu(&hdr), false);
        assert_eq!(m.status.role, crate::types::Role::Class2Sender);

        let pdu = Pdu::new(hdr, fin(ConditionCode::NoError));
        feed(&mut bed, &mut m, Event::FinNoError, &pdu);
        assert!(m.status.is_this_trans_solely_for_ack_fin);
        cycle(&mut bed, &mut m);

        let sent = bed.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            PduBody::Ack(ack) => assert_eq!(ack.transaction_status, TransStat::Undefined),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sent[0].header.direction, Direction::TowardReceiver);
        assert!(m.has_this_state_machine_finished);
    }

    #[test]
    fn test_suspend_holds_everything_but_acks() {
        let mut bed = TestBed::new();
        let mut m = sent_everything(&mut bed, b"data");
        bed.sent();

        state_table(&mut m, &mut bed.ctx(), Event::SuspendRequest, None, None);
        assert!(m.ack_timer.is_paused());
        m.is_outgoing_eof_buffered = true;
        cycle(&mut bed, &mut m);
        assert!(bed.output.is_empty());

        state_table(&mut m, &mut bed.ctx(), Event::ResumeRequest, None, None);
        assert!(m.ack_timer.is_running());
        cycle(&mut bed, &mut m);
        assert_eq!(bed.output.len(), 1);
    }
}
