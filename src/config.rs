//! 엔진 설정 (MIB)
//!
//! - 로컬 엔티티 ID, 타이머/재시도 한계, 청크 크기, 결함 정책
//! - 알림(ISSUE_*) 활성화 플래그
//! - 텍스트 파라미터 접근: set_parameter / get_parameter

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::types::Response;
use crate::{Error, Result, DEFAULT_MAX_CONCURRENT_TRANSACTIONS, MAX_FILE_CHUNK_SIZE,
    MAX_GAPS_PER_TRANSACTION};

/// CFDP 엔진 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// 로컬 엔티티 ID
    pub my_id: Id,

    /// EOF/FIN 재전송 한계
    pub ack_limit: u32,

    /// ACK 대기 타임아웃 (초)
    pub ack_timeout: u32,

    /// NAK 재전송 한계
    pub nak_limit: u32,

    /// NAK 타임아웃 (초)
    pub nak_timeout: u32,

    /// 비활성 타임아웃 (초)
    pub inactivity_timeout: u32,

    /// Filedata PDU 하나의 데이터 크기
    pub outgoing_file_chunk_size: u32,

    /// 실패한 트랜잭션의 임시 파일 보존
    pub save_incomplete_files: bool,

    /// 모든 결함에 일괄 적용되는 대응
    pub response_to_fault: Response,

    pub issue_eof_recv: bool,
    pub issue_eof_sent: bool,
    pub issue_file_segment_recv: bool,
    pub issue_file_segment_sent: bool,
    pub issue_resumed: bool,
    pub issue_suspended: bool,
    pub issue_transaction_finished: bool,

    /// 트랜잭션 테이블 용량
    pub max_concurrent_transactions: usize,

    /// 트랜잭션당 갭 노드 수
    pub max_gaps_per_transaction: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            my_id: Id::from(88),
            ack_limit: 5,
            ack_timeout: 5,                   // 5초
            nak_limit: 5,
            nak_timeout: 5,                   // 5초
            inactivity_timeout: 60,           // 1분
            outgoing_file_chunk_size: 50,
            save_incomplete_files: false,
            response_to_fault: Response::Cancel,
            issue_eof_recv: false,
            issue_eof_sent: true,
            issue_file_segment_recv: false,
            issue_file_segment_sent: false,
            issue_resumed: true,
            issue_suspended: true,
            issue_transaction_finished: false,
            max_concurrent_transactions: DEFAULT_MAX_CONCURRENT_TRANSACTIONS,
            max_gaps_per_transaction: MAX_GAPS_PER_TRANSACTION,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬 ID 지정
    pub fn with_id(my_id: Id) -> Self {
        Self {
            my_id,
            ..Self::default()
        }
    }

    /// 지연이 짧은 Class 1 링크용 설정
    pub fn class1_link() -> Self {
        Self {
            inactivity_timeout: 30,
            outgoing_file_chunk_size: 1000,
            issue_file_segment_sent: false,
            ..Self::default()
        }
    }

    /// 왕복 지연이 긴 링크용 설정
    pub fn long_delay_link() -> Self {
        Self {
            ack_limit: 10,
            ack_timeout: 60,                  // 1분
            nak_limit: 10,
            nak_timeout: 60,
            inactivity_timeout: 600,          // 10분
            outgoing_file_chunk_size: MAX_FILE_CHUNK_SIZE as u32,
            save_incomplete_files: true,
            response_to_fault: Response::Suspend,
            ..Self::default()
        }
    }

    /// 손실이 많은 링크용 설정
    pub fn unstable_link() -> Self {
        Self {
            ack_limit: 20,
            ack_timeout: 10,
            nak_limit: 20,
            nak_timeout: 10,
            inactivity_timeout: 300,
            outgoing_file_chunk_size: 256,    // 작은 청크
            max_gaps_per_transaction: 64,
            ..Self::default()
        }
    }

    /// 바이트 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// 바이트에서 복원
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }

    /// 텍스트 파라미터 설정 (이름은 대소문자 무시)
    pub fn set_parameter(&mut self, param: &str, value: &str) -> Result<()> {
        let name = param.to_ascii_uppercase();
        let fail = |reason: &str| Error::InvalidMibParameter {
            param: param.to_string(),
            reason: format!("{} ('{}')", reason, value),
        };

        match name.as_str() {
            "MY_ID" => {
                self.my_id = value.parse().map_err(|_| fail("ID 형식 오류"))?;
            }
            "ACK_LIMIT" => self.ack_limit = parse_number(value).ok_or_else(|| fail("숫자 아님"))?,
            "ACK_TIMEOUT" => {
                self.ack_timeout = parse_number(value).ok_or_else(|| fail("숫자 아님"))?
            }
            "INACTIVITY_TIMEOUT" => {
                self.inactivity_timeout = parse_number(value).ok_or_else(|| fail("숫자 아님"))?
            }
            "NAK_LIMIT" => self.nak_limit = parse_number(value).ok_or_else(|| fail("숫자 아님"))?,
            "NAK_TIMEOUT" => {
                self.nak_timeout = parse_number(value).ok_or_else(|| fail("숫자 아님"))?
            }
            "OUTGOING_FILE_CHUNK_SIZE" => {
                let size = parse_number(value).ok_or_else(|| fail("숫자 아님"))?;
                if size == 0 || size as usize > MAX_FILE_CHUNK_SIZE {
                    return Err(fail(&format!("1~{} 범위 밖", MAX_FILE_CHUNK_SIZE)));
                }
                self.outgoing_file_chunk_size = size;
            }
            "SAVE_INCOMPLETE_FILES" => {
                self.save_incomplete_files = parse_yes_no(value).ok_or_else(|| fail("yes/no"))?
            }
            "RESPONSE_TO_FAULT" => {
                self.response_to_fault =
                    Response::parse(value).ok_or_else(|| fail("cancel/suspend/ignore/abandon"))?
            }
            _ if name.starts_with("ISSUE_") => {
                let flag = self
                    .issue_flag_mut(&name)
                    .ok_or_else(|| fail("알 수 없는 파라미터"))?;
                *flag = parse_yes_no(value).ok_or_else(|| fail("yes/no"))?;
            }
            _ => return Err(fail("알 수 없는 파라미터")),
        }
        Ok(())
    }

    /// 텍스트 파라미터 조회
    pub fn get_parameter(&self, param: &str) -> Result<String> {
        let name = param.to_ascii_uppercase();
        let yes_no = |b: bool| if b { "yes" } else { "no" }.to_string();

        let value = match name.as_str() {
            "MY_ID" => self.my_id.to_string(),
            "ACK_LIMIT" => self.ack_limit.to_string(),
            "ACK_TIMEOUT" => self.ack_timeout.to_string(),
            "INACTIVITY_TIMEOUT" => self.inactivity_timeout.to_string(),
            "NAK_LIMIT" => self.nak_limit.to_string(),
            "NAK_TIMEOUT" => self.nak_timeout.to_string(),
            "OUTGOING_FILE_CHUNK_SIZE" => self.outgoing_file_chunk_size.to_string(),
            "SAVE_INCOMPLETE_FILES" => yes_no(self.save_incomplete_files),
            "RESPONSE_TO_FAULT" => self.response_to_fault.to_string(),
            "ISSUE_EOF_RECV" => yes_no(self.issue_eof_recv),
            "ISSUE_EOF_SENT" => yes_no(self.issue_eof_sent),
            "ISSUE_FILE_SEGMENT_RECV" => yes_no(self.issue_file_segment_recv),
            "ISSUE_FILE_SEGMENT_SENT" => yes_no(self.issue_file_segment_sent),
            "ISSUE_RESUMED" => yes_no(self.issue_resumed),
            "ISSUE_SUSPENDED" => yes_no(self.issue_suspended),
            "ISSUE_TRANSACTION_FINISHED" => yes_no(self.issue_transaction_finished),
            _ => {
                return Err(Error::InvalidMibParameter {
                    param: param.to_string(),
                    reason: "알 수 없는 파라미터".into(),
                })
            }
        };
        Ok(value)
    }

    fn issue_flag_mut(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "ISSUE_EOF_RECV" => Some(&mut self.issue_eof_recv),
            "ISSUE_EOF_SENT" => Some(&mut self.issue_eof_sent),
            "ISSUE_FILE_SEGMENT_RECV" => Some(&mut self.issue_file_segment_recv),
            "ISSUE_FILE_SEGMENT_SENT" => Some(&mut self.issue_file_segment_sent),
            "ISSUE_RESUMED" => Some(&mut self.issue_resumed),
            "ISSUE_SUSPENDED" => Some(&mut self.issue_suspended),
            "ISSUE_TRANSACTION_FINISHED" => Some(&mut self.issue_transaction_finished),
            _ => None,
        }
    }
}

/// 숫자로 시작하는 값만 허용
fn parse_number(value: &str) -> Option<u32> {
    if !value.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
