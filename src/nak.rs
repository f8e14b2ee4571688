//! 갭 리스트 (NAK 리스트)
//!
//! - 아직 확인되지 않은 파일 구간 [begin, end) 목록
//! - scope [start, end_of_scope): 갭 추적이 유효한 구간
//! - metadata_missing: Metadata 미수신 (NAK PDU에서는 (0,0) 갭)
//! - 용량이 차면 새 갭을 마지막 노드에 합친다 (재전송이 늘어도 갭은 잃지 않음)

use std::fmt::Write as _;

use tracing::{debug, error, warn};

use crate::pdu::Nak;

/// 문자열 표현에 넣을 최대 길이
const LIST_STRING_LIMIT: usize = 256;

/// 트랜잭션별 갭 추적기
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakList {
    start_of_scope: u32,
    end_of_scope: u32,
    metadata_missing: bool,

    /// 삽입/분할 순서를 유지하는 갭 노드
    gaps: Vec<(u32, u32)>,

    /// 최대 노드 수
    capacity: usize,
}

impl NakList {
    /// 송신자용 (Metadata 누락 아님)
    pub fn for_sender(capacity: usize) -> Self {
        Self::new(capacity, false)
    }

    /// 수신자용 (처음엔 Metadata 누락)
    pub fn for_receiver(capacity: usize) -> Self {
        Self::new(capacity, true)
    }

    fn new(capacity: usize, metadata_missing: bool) -> Self {
        Self {
            start_of_scope: 0,
            end_of_scope: 0,
            metadata_missing,
            gaps: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn start_of_scope(&self) -> u32 {
        self.start_of_scope
    }

    pub fn end_of_scope(&self) -> u32 {
        self.end_of_scope
    }

    pub fn is_metadata_missing(&self) -> bool {
        self.metadata_missing
    }

    /// 현재 갭 노드
    pub fn gaps(&self) -> &[(u32, u32)] {
        &self.gaps
    }

    /// 첫 번째 갭
    pub fn first_gap(&self) -> Option<(u32, u32)> {
        self.gaps.first().copied()
    }

    /// 모든 갭 제거 (트랜잭션 종료 시)
    pub fn clear(&mut self) {
        self.gaps.clear();
    }

    /// 수신 NAK PDU 내용으로 교체
    pub fn copy_from(&mut self, nak: &Nak) {
        self.start_of_scope = nak.start_of_scope;
        self.end_of_scope = nak.end_of_scope;
        self.metadata_missing = nak.is_metadata_missing;
        self.gaps.clear();
        for &gap in &nak.gaps {
            if gap.0 >= gap.1 {
                warn!("수신 NAK의 빈 갭 무시 ({}-{})", gap.0, gap.1);
                continue;
            }
            if self.gaps.len() >= self.capacity {
                warn!("수신 NAK이 저장 공간에 맞게 잘림 ({}개)", self.capacity);
                break;
            }
            self.gaps.push(gap);
        }
    }

    /// scope 끝 설정, 늘어난 구간은 갭
    pub fn set_end_of_scope(&mut self, end: u32) {
        if end < self.end_of_scope {
            warn!(
                "갭 리스트 scope 축소 요청 수락 ({} -> {})",
                self.end_of_scope, end
            );
        }
        if end > self.end_of_scope {
            self.add_gap(self.end_of_scope, end);
        }
        self.end_of_scope = end;
    }

    /// 송신 완료 구간
    pub fn data_sent(&mut self, begin: u32, end: u32) {
        self.remove_range(begin, end);
        if begin == self.end_of_scope {
            self.end_of_scope = end;
        }
    }

    /// 수신 구간
    pub fn data_received(&mut self, begin: u32, end: u32) {
        if begin > end {
            error!("잘못된 범위의 Filedata 무시 ({}-{})", begin, end);
            return;
        }
        debug!("Valid filedata received: {}-{}", begin, end);

        if end <= self.end_of_scope {
            // scope 안
            self.remove_range(begin, end);
        } else if begin < self.end_of_scope {
            // scope 경계에 걸침
            self.remove_range(begin, self.end_of_scope);
            self.end_of_scope = end;
        } else if begin == self.end_of_scope {
            self.end_of_scope = end;
        } else {
            // scope 밖, 사이에 새 갭
            self.add_gap(self.end_of_scope, begin);
            self.end_of_scope = end;
        }
    }

    pub fn metadata_sent_or_received(&mut self) {
        self.metadata_missing = false;
    }

    /// 갭도 없고 Metadata도 있음
    pub fn is_empty(&self) -> bool {
        !self.metadata_missing && self.gaps.is_empty()
    }

    /// Filedata 갭 수 (Metadata 제외)
    pub fn how_many_gaps(&self) -> usize {
        self.gaps.len()
    }

    /// 누락 바이트 합계
    pub fn bytes_missing(&self) -> u32 {
        self.gaps
            .iter()
            .map(|&(begin, end)| end.saturating_sub(begin))
            .fold(0u32, u32::saturating_add)
    }

    /// scope 폭 - 누락
    pub fn bytes_received(&self) -> u32 {
        (self.end_of_scope.saturating_sub(self.start_of_scope)).saturating_sub(self.bytes_missing())
    }

    /// "(0-500) Metadata 100-200 250-300 (2 total gaps)"
    pub fn list_as_string(&self) -> String {
        let mut s = format!("({}-{})", self.start_of_scope, self.end_of_scope);
        if self.metadata_missing {
            s.push_str(" Metadata");
        }

        let mut out_of_room = false;
        let last = self.gaps.len().saturating_sub(1);
        for (i, &(begin, end)) in self.gaps.iter().enumerate() {
            if !out_of_room {
                if s.len() + 96 >= LIST_STRING_LIMIT {
                    out_of_room = true;
                    s.push_str(" ...");
                } else {
                    let _ = write!(s, " {}-{}", begin, end);
                    continue;
                }
            }
            // 생략 후에는 마지막 갭만
            if i == last {
                let _ = write!(s, " {}-{}", begin, end);
            }
        }

        let _ = write!(s, " ({} total gaps)", self.gaps.len());
        s
    }

    /// "100-200 3500-3800" (최대 `max_len`자)
    pub fn gaps_as_string(&self, max_len: usize) -> String {
        let mut s = String::new();
        for &(begin, end) in &self.gaps {
            let piece = if s.is_empty() {
                format!("{}-{}", begin, end)
            } else {
                format!(" {}-{}", begin, end)
            };
            if s.len() + piece.len() > max_len {
                break;
            }
            s.push_str(&piece);
        }
        s
    }

    /// 새 노드 추가, 용량이 없으면 마지막 노드에 합침
    fn add_gap(&mut self, begin: u32, end: u32) {
        if self.gaps.len() < self.capacity {
            self.gaps.push((begin, end));
            return;
        }

        match self.gaps.last_mut() {
            Some(last) => {
                debug!(
                    "갭 노드 부족, ({}-{})를 마지막 갭 ({}-{})에 합침",
                    begin, end, last.0, last.1
                );
                last.1 = end;
            }
            None => {
                error!("invariant: 갭 용량 0, ({}-{}) 추적 불가", begin, end);
            }
        }
        if end > self.end_of_scope {
            self.end_of_scope = end;
        }
    }

    /// 모든 노드에서 [begin, end) 제거
    fn remove_range(&mut self, begin: u32, end: u32) {
        let mut i = 0;
        while i < self.gaps.len() {
            let (node_begin, node_end) = self.gaps[i];
            debug!(
                "Removing range ({}-{}) from node ({}-{})",
                begin, end, node_begin, node_end
            );

            if begin <= node_begin && end >= node_end {
                // 노드 전체
                self.gaps.remove(i);
                continue;
            } else if end <= node_begin || begin >= node_end {
                // 겹치지 않음
            } else if begin <= node_begin {
                // 앞부분
                self.gaps[i].0 = end;
            } else if end >= node_end {
                // 뒷부분
                self.gaps[i].1 = begin;
            } else {
                // 내부: 둘로 분할, 노드가 없으면 그대로 둔다
                if self.gaps.len() < self.capacity {
                    self.gaps[i].1 = begin;
                    self.gaps.insert(i + 1, (end, node_end));
                    i += 1;
                }
            }
            i += 1;
        }
    }
}
