//! 에러 타입 정의

use thiserror::Error;

use crate::id::{Id, TransactionId};
use crate::pdu::Reject;

/// CFDP 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 요청: {0}")]
    InvalidRequest(String),

    #[error("유효하지 않은 엔티티 ID: {0}")]
    InvalidId(String),

    #[error("유효하지 않은 트랜잭션 ID: {0}")]
    InvalidTransaction(String),

    #[error("자기 자신에게 파일을 보낼 수 없음 (dest={0})")]
    SendToSelf(Id),

    #[error("알 수 없는 트랜잭션: {0}")]
    UnknownTransaction(TransactionId),

    #[error("트랜잭션 테이블 가득 참: 최대 {capacity}개")]
    TableFull { capacity: usize },

    #[error("노드 {0}와 통신 불가")]
    LinkUnavailable(Id),

    #[error("PDU 거부: {0}")]
    PduRejected(#[from] Reject),

    #[error("역할에 맞지 않는 PDU: {0}")]
    PduNotSane(String),

    #[error("MIB 파라미터 설정 실패 ({param}): {reason}")]
    InvalidMibParameter { param: String, reason: String },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
