//! 카운트다운 타이머
//!
//! 상태: off / running / paused
//! 현재 시각(초)은 호출자가 넘겨준다. 시계가 거꾸로 간 경우 만료되지 않은 것으로 본다.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum Mode {
    #[default]
    Off,
    Running,
    Paused,
}

/// 프로토콜 타이머 (ack / nak / inactivity)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    mode: Mode,

    /// 목표 카운트다운 (초)
    desired: u64,

    /// 시작 시각
    start: u64,

    /// 일시 정지 시각
    paused_at: u64,
}

impl Timer {
    /// `seconds` 후 만료되도록 시작
    pub fn start(seconds: u64, now: u64) -> Self {
        Self {
            mode: Mode::Running,
            desired: seconds,
            start: now,
            paused_at: 0,
        }
    }

    /// 같은 자리에서 재시작
    pub fn restart(&mut self, seconds: u64, now: u64) {
        *self = Self::start(seconds, now);
    }

    pub fn cancel(&mut self) {
        self.mode = Mode::Off;
    }

    /// 실행 중일 때만 정지
    pub fn pause(&mut self, now: u64) {
        if self.mode == Mode::Running {
            self.mode = Mode::Paused;
            self.paused_at = now;
        }
    }

    /// 정지 중일 때만 재개, 정지한 시간만큼 시작 시각을 민다
    pub fn resume(&mut self, now: u64) {
        if self.mode == Mode::Paused {
            let paused_for = now.saturating_sub(self.paused_at);
            self.start = self.start.saturating_add(paused_for);
            self.mode = Mode::Running;
        }
    }

    /// 실행 중이고 목표 시간이 지났으면 true
    pub fn expired(&self, now: u64) -> bool {
        if self.mode != Mode::Running {
            return false;
        }
        match now.checked_sub(self.start) {
            Some(elapsed) => elapsed >= self.desired,
            None => false, // 시계 역행
        }
    }

    /// 남은 시간 (초)
    pub fn read(&self, now: u64) -> u64 {
        let reference = match self.mode {
            Mode::Off => return 0,
            Mode::Paused => self.paused_at,
            Mode::Running => now,
        };
        (self.start + self.desired).saturating_sub(reference)
    }

    pub fn is_off(&self) -> bool {
        self.mode == Mode::Off
    }

    pub fn is_running(&self) -> bool {
        self.mode == Mode::Running
    }

    pub fn is_paused(&self) -> bool {
        self.mode == Mode::Paused
    }
}
