//! 프로토콜 공용 타입
//!
//! - 조건 코드, 결함 대응, 역할, 상태 등 열거형
//! - TransStatus: 트랜잭션별 공개 상태 스냅샷
//! - SummaryStatus: 엔진 전체 요약

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{Id, TransactionId};
use crate::pdu::Metadata;

/// 조건 코드 (4비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConditionCode {
    #[default]
    NoError = 0,
    PositiveAckLimitReached = 1,
    KeepAliveLimitReached = 2,
    InvalidTransmissionMode = 3,
    FilestoreRejection = 4,
    FileChecksumFailure = 5,
    FileSizeError = 6,
    NakLimitReached = 7,
    InactivityDetected = 8,
    InvalidFileStructure = 9,
    Reserved10 = 10,
    Reserved11 = 11,
    Reserved12 = 12,
    Reserved13 = 13,
    SuspendRequestReceived = 14,
    CancelRequestReceived = 15,
}

impl ConditionCode {
    /// 하위 4비트에서 변환
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0 => Self::NoError,
            1 => Self::PositiveAckLimitReached,
            2 => Self::KeepAliveLimitReached,
            3 => Self::InvalidTransmissionMode,
            4 => Self::FilestoreRejection,
            5 => Self::FileChecksumFailure,
            6 => Self::FileSizeError,
            7 => Self::NakLimitReached,
            8 => Self::InactivityDetected,
            9 => Self::InvalidFileStructure,
            10 => Self::Reserved10,
            11 => Self::Reserved11,
            12 => Self::Reserved12,
            13 => Self::Reserved13,
            14 => Self::SuspendRequestReceived,
            _ => Self::CancelRequestReceived,
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoError => "No error",
            Self::PositiveAckLimitReached => "Positive Ack limit reached",
            Self::KeepAliveLimitReached => "Keep alive limit reached",
            Self::InvalidTransmissionMode => "Invalid transmission mode",
            Self::FilestoreRejection => "Filestore rejection",
            Self::FileChecksumFailure => "File checksum failure",
            Self::FileSizeError => "File size error",
            Self::NakLimitReached => "NAK limit reached",
            Self::InactivityDetected => "Inactivity detected",
            Self::InvalidFileStructure => "Invalid file structure",
            Self::Reserved10 | Self::Reserved11 | Self::Reserved12 | Self::Reserved13 => {
                "Reserved"
            }
            Self::SuspendRequestReceived => "Suspend.request received",
            Self::CancelRequestReceived => "Cancel.request received",
        };
        f.write_str(s)
    }
}

/// 결함 대응 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Response {
    #[default]
    Cancel = 1,
    Suspend = 2,
    Ignore = 3,
    Abandon = 4,
}

impl Response {
    /// "cancel" / "suspend" / "ignore" / "abandon" (대소문자 무시)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cancel" => Some(Self::Cancel),
            "suspend" => Some(Self::Suspend),
            "ignore" => Some(Self::Ignore),
            "abandon" => Some(Self::Abandon),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancel => "cancel",
            Self::Suspend => "suspend",
            Self::Ignore => "ignore",
            Self::Abandon => "abandon",
        };
        f.write_str(s)
    }
}

/// 트랜잭션 내 역할 (수명 동안 고정)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Class1Sender,
    Class1Receiver,
    Class2Sender,
    Class2Receiver,
}

impl Role {
    pub fn is_sender(&self) -> bool {
        matches!(self, Self::Class1Sender | Self::Class2Sender)
    }

    pub fn is_receiver(&self) -> bool {
        !self.is_sender()
    }

    /// 1 또는 2
    pub fn class(&self) -> u8 {
        match self {
            Self::Class1Sender | Self::Class1Receiver => 1,
            Self::Class2Sender | Self::Class2Receiver => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Class1Sender => "S1",
            Self::Class1Receiver => "R1",
            Self::Class2Sender => "S2",
            Self::Class2Receiver => "R2",
        };
        f.write_str(s)
    }
}

/// 상태 테이블 상태
///
/// S1/S2 의미는 역할마다 다름:
/// - S2, R2: S1 = 정상, S2 = 취소 중
/// - R1: S1 = Metadata 대기, S2 = EOF 대기
/// - S1: 항상 S1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    S1,
    S2,
    Finished,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

/// 전달 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryCode {
    Complete,
    #[default]
    Incomplete,
}

impl DeliveryCode {
    /// FIN/ACK의 1비트 표현 (0 = complete)
    pub fn bit(&self) -> u8 {
        match self {
            Self::Complete => 0,
            Self::Incomplete => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            Self::Complete
        } else {
            Self::Incomplete
        }
    }
}

/// 최종 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FinalStatus {
    #[default]
    Unknown,
    Successful,
    Cancelled,
    Abandoned,
    NoMetadata,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Successful => "successful",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
            Self::NoMetadata => "no_metadata",
        };
        f.write_str(s)
    }
}

/// 엔진 사용자에게 전달되는 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicationType {
    Abandoned,
    AckTimerExpired,
    EofRecv,
    EofSent,
    Fault,
    FileSegmentSent,
    FileSegmentRecv,
    InactivityTimerExpired,
    MachineAllocated,
    MachineDeallocated,
    MetadataRecv,
    MetadataSent,
    NakTimerExpired,
    Report,
    Resumed,
    Suspended,
    Transaction,
    TransactionFinished,
}

impl fmt::Display for IndicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Abandoned => "Abandoned",
            Self::AckTimerExpired => "Ack_Timer_Expired",
            Self::EofRecv => "EOF_Recv",
            Self::EofSent => "EOF_Sent",
            Self::Fault => "Fault",
            Self::FileSegmentSent => "File_Segment_Sent",
            Self::FileSegmentRecv => "File_Segment_Recv",
            Self::InactivityTimerExpired => "Inactivity_Timer_Expired",
            Self::MachineAllocated => "Machine_Allocated",
            Self::MachineDeallocated => "Machine_Deallocated",
            Self::MetadataRecv => "Metadata_Recv",
            Self::MetadataSent => "Metadata_Sent",
            Self::NakTimerExpired => "Nak_Timer_Expired",
            Self::Report => "Report",
            Self::Resumed => "Resumed",
            Self::Suspended => "Suspended",
            Self::Transaction => "Transaction",
            Self::TransactionFinished => "Transaction_Finished",
        };
        f.write_str(s)
    }
}

/// 타이머 종류 (상태 조회용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerType {
    None,
    Ack,
    Nak,
    Inactivity,
}

/// ACK PDU의 트랜잭션 상태 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransStat {
    #[default]
    Undefined = 0,
    Active = 1,
    Terminated = 2,
    Unrecognized = 3,
}

impl TransStat {
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Undefined,
            1 => Self::Active,
            2 => Self::Terminated,
            _ => Self::Unrecognized,
        }
    }
}

/// 트랜잭션 공개 상태 (Indication 콜백과 상태 조회에 사용)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransStatus {
    pub trans: TransactionId,
    pub partner_id: Option<Id>,
    pub role: Role,
    pub state: State,

    /// 1=전송, 2=인계, 3=갭 채우기, 4=종료
    pub phase: u8,

    /// 시작 시각 (초)
    pub start_time: u64,

    pub abandoned: bool,
    pub cancelled: bool,
    pub finished: bool,
    pub frozen: bool,
    pub suspended: bool,

    /// EOF/FIN/NAK 송신 시도 횟수
    pub attempts: u32,

    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub final_status: FinalStatus,

    /// 마지막 Filedata 오프셋/길이
    pub fd_offset: u32,
    pub fd_length: u32,

    pub file_checksum_as_calculated: u32,
    pub received_file_size: u32,
    pub has_md_been_received: bool,
    pub how_many_naks: u32,
    pub is_this_trans_solely_for_ack_fin: bool,
    pub md: Metadata,
    pub temp_file_name: String,
    pub external_file_xfer: bool,
}

impl TransStatus {
    /// 텔레메트리용 바이트 직렬화
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// 텔레메트리 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// 엔진 전체 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatus {
    pub are_any_partners_frozen: bool,
    pub how_many_senders: u32,
    pub how_many_receivers: u32,
    pub how_many_frozen: u32,
    pub how_many_suspended: u32,
    pub total_files_sent: u32,
    pub total_files_received: u32,
    pub total_unsuccessful_senders: u32,
    pub total_unsuccessful_receivers: u32,
}
