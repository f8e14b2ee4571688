//! 엔진 사용자 알림
//!
//! - Indication: 트랜잭션 이벤트를 (종류, 상태 스냅샷)으로 전달
//! - LogIndication: tracing으로 콘솔 문구 출력
//! - ChannelIndication: crossbeam 채널로 전달 (테스트, 상위 애플리케이션)

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use crate::types::{ConditionCode, FinalStatus, IndicationType, TransStatus};

/// 알림 수신자
pub trait Indication: Send {
    fn notify(&mut self, kind: IndicationType, status: &TransStatus);
}

/// 로그로만 출력
#[derive(Debug, Clone, Copy, Default)]
pub struct LogIndication;

impl LogIndication {
    fn describe_file(status: &TransStatus, verb: &str, name: &str) -> String {
        if !status.md.file_transfer {
            return "no file transfer.".to_string();
        }
        let size = if status.md.file_size != 0 {
            format!("({} bytes).", status.md.file_size)
        } else {
            "(unbounded file).".to_string()
        };
        format!("{} '{}' {}", verb, name, size)
    }
}

impl Indication for LogIndication {
    fn notify(&mut self, kind: IndicationType, status: &TransStatus) {
        let trans = status.trans;
        let class = status.role.class();
        match kind {
            IndicationType::Transaction => {
                let partner = status.partner_id.map(|p| p.to_string()).unwrap_or_default();
                let what = if status.md.file_transfer {
                    format!(
                        "{} to node {}",
                        Self::describe_file(status, "sending", &status.md.source_file_name),
                        partner
                    )
                } else {
                    "no file transfer.".to_string()
                };
                info!(":::Trans  {}, class {}, {}", trans, class, what);
            }
            IndicationType::Abandoned => {
                info!(
                    ":::Abandoned  trans {}, due to '{}'",
                    trans, status.condition_code
                );
            }
            IndicationType::Fault => {
                error!(":::Fault  trans {}, fault='{}'", trans, status.condition_code);
            }
            IndicationType::MetadataRecv => {
                info!(
                    ":::MD_Recv  trans {}, class {}, {}",
                    trans,
                    class,
                    Self::describe_file(status, "receiving", &status.md.dest_file_name)
                );
            }
            IndicationType::MetadataSent => {
                info!(
                    ":::MD_Sent  trans {}, class {}, {}",
                    trans,
                    class,
                    Self::describe_file(status, "sending", &status.md.dest_file_name)
                );
            }
            IndicationType::FileSegmentRecv | IndicationType::FileSegmentSent => {
                debug!(
                    ":::{}  trans {}; offset={}, length={}",
                    kind, trans, status.fd_offset, status.fd_length
                );
            }
            IndicationType::TransactionFinished => {
                let outcome = match status.final_status {
                    FinalStatus::Successful => "successful".to_string(),
                    FinalStatus::Abandoned if status.condition_code == ConditionCode::NoError => {
                        "abandoned".to_string()
                    }
                    FinalStatus::Abandoned | FinalStatus::Cancelled => {
                        format!("{} ({})", status.final_status, status.condition_code)
                    }
                    other => other.to_string(),
                };
                info!(":::Trans_Finished  trans {} {}", trans, outcome);
            }
            IndicationType::Report => {
                info!(
                    ":::Report  trans {} {} state={} phase={} cc='{}'",
                    trans, status.role, status.state, status.phase, status.condition_code
                );
            }
            IndicationType::Suspended | IndicationType::Resumed => {
                info!(":::{}  trans {}", kind, trans);
            }
            _ => debug!(":::{}  trans {}", kind, trans),
        }
    }
}

/// 채널로 전달
#[derive(Debug, Clone)]
pub struct ChannelIndication {
    tx: Sender<(IndicationType, TransStatus)>,
}

impl ChannelIndication {
    /// (송신측, 수신측) 생성
    pub fn unbounded() -> (Self, Receiver<(IndicationType, TransStatus)>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn new(tx: Sender<(IndicationType, TransStatus)>) -> Self {
        Self { tx }
    }
}

impl Indication for ChannelIndication {
    fn notify(&mut self, kind: IndicationType, status: &TransStatus) {
        // 수신측이 없어도 엔진은 계속 동작
        let _ = self.tx.send((kind, status.clone()));
    }
}
