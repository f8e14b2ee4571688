//! # CFDP (CCSDS File Delivery Protocol) 엔진
//!
//! 신뢰할 수 없는 링크 위에서 파일을 전달하는 트랜잭션 상태 머신 엔진
//!
//! ## 핵심 특징
//! - **4가지 역할**: Class 1/2 송신자(S1, S2), Class 1/2 수신자(R1, R2)
//! - **NAK 기반 재전송**: 갭 리스트로 누락 구간만 다시 요청
//! - **증분 체크섬**: 전송하면서 한 번만 계산
//! - **우선순위 스로틀링**: 사이클마다 디렉티브 PDU를 Filedata보다 먼저 방출
//! - **결함 정책**: cancel / suspend / ignore / abandon
//! - **고정 용량 트랜잭션 테이블**: 가득 차면 새 트랜잭션 거부
//!
//! 엔진은 단일 스레드 협력형이며 `submit_request`, `submit_pdu`, `cycle`
//! 호출 안에서만 상태가 바뀐다.

pub mod actions;
pub mod callbacks;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod filestore;
pub mod id;
pub mod indication;
pub mod link;
pub mod machine;
pub mod nak;
pub mod output;
pub mod pdu;
pub mod r1;
pub mod r2;
pub mod request;
pub mod s1;
pub mod s2;
pub mod timer;
pub mod types;

pub use callbacks::{Callbacks, Clock, ManualClock, SystemClock};
pub use checksum::Checksum;
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::Event;
pub use filestore::{Filestore, MemoryFilestore, OpenMode, StdFilestore, VirtualFile};
pub use id::{Id, TransactionId};
pub use indication::{ChannelIndication, Indication, LogIndication};
pub use link::UdpLink;
pub use machine::{Handle, Machine, MachineList};
pub use nak::NakList;
pub use output::{PduClass, PduOutput, QueueOutput};
pub use pdu::{Pdu, PduHeader, Reject};
pub use request::Request;
pub use timer::Timer;
pub use types::{
    ConditionCode, DeliveryCode, FinalStatus, IndicationType, Response, Role, State,
    SummaryStatus, TimerType, TransStat, TransStatus,
};

/// 엔티티 ID 최대 바이트 수
pub const MAX_ID_LENGTH: usize = 8;

/// 송신 PDU의 트랜잭션 시퀀스 번호 폭 (바이트)
pub const OUTGOING_TSN_LENGTH: usize = 4;

/// 수신 가능한 트랜잭션 시퀀스 번호 최대 폭 (u32)
pub const MAX_TSN_LENGTH: usize = 4;

/// ID/트랜잭션 문자열 최대 길이
pub const MAX_AS_STRING_LENGTH: usize = 128;

/// 사용자 요청 문자열 최대 길이
pub const MAX_REQUEST_STRING_LENGTH: usize = 128;

/// 파일 이름 최대 길이 (바이트)
pub const MAX_FILE_NAME_LENGTH: usize = 64;

/// 트랜잭션당 기본 갭 수
pub const MAX_GAPS_PER_TRANSACTION: usize = 20;

/// 기본 최대 동시 트랜잭션 수
pub const DEFAULT_MAX_CONCURRENT_TRANSACTIONS: usize = 100;

/// PDU 최대 길이 (바이트)
pub const MAX_PDU_LENGTH: usize = 2048;

/// 고정 헤더 4바이트 + ID 두 개 + 시퀀스 번호
pub const MAX_PDU_HEADER_LENGTH: usize = 4 + 2 * MAX_ID_LENGTH + MAX_TSN_LENGTH;

/// 데이터 필드 최대 길이
pub const MAX_PDU_DATA_FIELD_LENGTH: usize = MAX_PDU_LENGTH - MAX_PDU_HEADER_LENGTH - 2;

/// NAK PDU 하나에 담을 수 있는 갭 수
pub const MAX_GAPS_PER_NAK_PDU: usize = (MAX_PDU_DATA_FIELD_LENGTH - 9) / 8;

/// Filedata PDU 하나의 최대 데이터 크기
pub const MAX_FILE_CHUNK_SIZE: usize = 1024;

/// 임시 파일 이름 생성 시도 횟수
pub const TEMP_FILE_ATTEMPTS: usize = 100;
