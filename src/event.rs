//! 이벤트 분류
//!
//! 수신 PDU, 사용자 요청, 타이머 만료, 스로틀 신호를 상태 테이블 이벤트로 바꾼다.

use std::fmt;

use tracing::{debug, warn};

use crate::pdu::{DirectiveCode, Pdu, PduBody};
use crate::request::Request;
use crate::types::ConditionCode;

/// 상태 테이블 입력 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    ThrottleFileDir,
    ThrottleFileData,

    PutRequest,
    SuspendRequest,
    ResumeRequest,
    CancelRequest,
    AbandonRequest,
    ReportRequest,
    FreezeRequest,
    ThawRequest,

    Metadata,
    FileData,
    EofNoError,
    EofCancel,
    FinNoError,
    FinCancel,
    AckEofNoError,
    AckEofCancel,
    AckFinNoError,
    AckFinCancel,
    Nak,

    AckTimerExpired,
    NakTimerExpired,
    InactivityTimerExpired,
    ExternalFileTransferCompleted,
}

impl Event {
    /// 수신 PDU에서 이벤트 결정
    pub fn from_pdu(pdu: &Pdu) -> Option<Self> {
        let event = match &pdu.body {
            PduBody::FileData(_) => Self::FileData,
            PduBody::Metadata(_) => Self::Metadata,
            PduBody::Eof(eof) if eof.condition_code == ConditionCode::NoError => Self::EofNoError,
            PduBody::Eof(_) => Self::EofCancel,
            PduBody::Fin(fin) if fin.condition_code == ConditionCode::NoError => Self::FinNoError,
            PduBody::Fin(_) => Self::FinCancel,
            PduBody::Ack(ack) => {
                let no_error = ack.condition_code == ConditionCode::NoError;
                match DirectiveCode::from_u8(ack.directive_code) {
                    Some(DirectiveCode::Eof) if no_error => Self::AckEofNoError,
                    Some(DirectiveCode::Eof) => Self::AckEofCancel,
                    Some(DirectiveCode::Fin) if no_error => Self::AckFinNoError,
                    Some(DirectiveCode::Fin) => Self::AckFinCancel,
                    _ => {
                        warn!("알 수 없는 디렉티브({})에 대한 ACK", ack.directive_code);
                        return None;
                    }
                }
            }
            PduBody::Nak(_) => Self::Nak,
            PduBody::Other(code) => {
                warn!("알 수 없는 디렉티브 코드 수신 ({})", code);
                return None;
            }
        };
        if event != Self::FileData {
            debug!("----------> ({}) {}", pdu.header.trans, event);
        }
        Some(event)
    }

    /// 사용자 요청에서 이벤트 결정
    pub fn from_request(request: &Request) -> Self {
        match request {
            Request::Put(_) => Self::PutRequest,
            Request::Suspend(_) => Self::SuspendRequest,
            Request::Resume(_) => Self::ResumeRequest,
            Request::Cancel(_) => Self::CancelRequest,
            Request::Abandon(_) => Self::AbandonRequest,
            Request::Report(_) => Self::ReportRequest,
            Request::Freeze => Self::FreezeRequest,
            Request::Thaw => Self::ThawRequest,
        }
    }

    /// 로그를 남기지 않을 빈번한 이벤트
    pub fn is_frequent(&self) -> bool {
        matches!(
            self,
            Self::ThrottleFileDir | Self::ThrottleFileData | Self::FileData
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ThrottleFileDir => "throttle outgoing file-dir pdu",
            Self::ThrottleFileData => "throttle outgoing file-data pdu",
            Self::PutRequest => "received Put Request",
            Self::SuspendRequest => "received Suspend Request",
            Self::ResumeRequest => "received Resume Request",
            Self::CancelRequest => "received Cancel Request",
            Self::AbandonRequest => "received Abandon Request",
            Self::ReportRequest => "received Report Request",
            Self::FreezeRequest => "received Freeze Request",
            Self::ThawRequest => "received Thaw Request",
            Self::Metadata => "received Metadata",
            Self::FileData => "received Filedata",
            Self::EofNoError => "received EOF (no error)",
            Self::EofCancel => "received EOF (cancel)",
            Self::FinNoError => "received Finished (no error)",
            Self::FinCancel => "received Finished (cancel)",
            Self::AckEofNoError => "received Ack-EOF (no error)",
            Self::AckEofCancel => "received Ack-EOF (cancel)",
            Self::AckFinNoError => "received Ack-Fin (no error)",
            Self::AckFinCancel => "received Ack-Fin (cancel)",
            Self::Nak => "received Nak",
            Self::AckTimerExpired => "Ack-timer expired",
            Self::NakTimerExpired => "Nak-timer expired",
            Self::InactivityTimerExpired => "Inactivity-timer expired",
            Self::ExternalFileTransferCompleted => "external file transfer completed",
        };
        f.write_str(s)
    }
}
