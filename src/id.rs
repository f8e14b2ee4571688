//! 엔티티 ID와 트랜잭션 ID
//!
//! - Id: 1~8 바이트 big-endian 주소, 점-십진 표기 (예: "12.52.23.45")
//! - 길이가 달라도 앞쪽 0 바이트는 무시하고 비교 ("0.23" == "23")
//! - TransactionId: (source ID, 시퀀스 번호), 표기 "<id>_<number>"

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, MAX_AS_STRING_LENGTH, MAX_ID_LENGTH};

/// CFDP 엔티티 ID
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Id {
    /// 유효 바이트 수 (1~8)
    len: u8,

    /// big-endian 값, 앞쪽 `len` 바이트만 유효
    value: [u8; MAX_ID_LENGTH],
}

impl Id {
    /// 바이트 슬라이스로 ID 생성 (1~8 바이트)
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_ID_LENGTH {
            return None;
        }
        let mut value = [0u8; MAX_ID_LENGTH];
        value[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            len: bytes.len() as u8,
            value,
        })
    }

    /// 유효 바이트
    pub fn as_bytes(&self) -> &[u8] {
        &self.value[..self.len as usize]
    }

    /// 바이트 길이
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// 항상 false (ID는 최소 1바이트)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 앞쪽 0 바이트를 제거한 유효 부분
    fn significant(&self) -> &[u8] {
        let bytes = self.as_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        &bytes[first..]
    }

    /// `width` 바이트로 왼쪽 0 패딩해서 출력
    ///
    /// 유효 부분이 `width`보다 길면 None
    pub fn padded(&self, width: usize) -> Option<Vec<u8>> {
        let sig = self.significant();
        if sig.len() > width {
            return None;
        }
        let mut out = vec![0u8; width];
        out[width - sig.len()..].copy_from_slice(sig);
        Some(out)
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl From<u8> for Id {
    fn from(value: u8) -> Self {
        let mut bytes = [0u8; MAX_ID_LENGTH];
        bytes[0] = value;
        Self { len: 1, value: bytes }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for b in self.as_bytes() {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", b)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Id {
    type Err = Error;

    /// 점-십진 문자열 파싱 (각 요소 0~255, 최대 8개)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidId("빈 문자열".into()));
        }
        if s.len() > MAX_AS_STRING_LENGTH {
            return Err(Error::InvalidId(format!("{} (너무 김)", s)));
        }
        if !s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::InvalidId(format!("{} (숫자로 시작해야 함)", s)));
        }

        let mut bytes = Vec::with_capacity(MAX_ID_LENGTH);
        for part in s.split('.').filter(|p| !p.is_empty()) {
            if bytes.len() == MAX_ID_LENGTH {
                return Err(Error::InvalidId(format!(
                    "{} (최대 {}바이트 초과)",
                    s, MAX_ID_LENGTH
                )));
            }
            if !part.bytes().all(|c| c.is_ascii_digit()) {
                return Err(Error::InvalidId(format!("{} (숫자가 아닌 요소)", s)));
            }
            let value: u16 = part
                .parse()
                .map_err(|_| Error::InvalidId(format!("{} (255 초과)", s)))?;
            if value > 255 {
                return Err(Error::InvalidId(format!("{} (255 초과)", s)));
            }
            bytes.push(value as u8);
        }

        Id::new(&bytes).ok_or_else(|| Error::InvalidId(s.to_string()))
    }
}

/// 트랜잭션 ID (source entity + 시퀀스 번호)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// 트랜잭션을 시작한 엔티티
    pub source: Id,

    /// 시퀀스 번호
    pub number: u32,
}

impl TransactionId {
    pub fn new(source: Id, number: u32) -> Self {
        Self { source, number }
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::from(0)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self {
            source: Id::from(0),
            number: 0,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.source, self.number)
    }
}

impl FromStr for TransactionId {
    type Err = Error;

    /// "<id>_<number>" 형식 파싱
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_AS_STRING_LENGTH {
            return Err(Error::InvalidTransaction(s.to_string()));
        }
        if !s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::InvalidTransaction(format!(
                "{} (숫자로 시작해야 함)",
                s
            )));
        }

        let (id_part, num_part) = s
            .split_once('_')
            .ok_or_else(|| Error::InvalidTransaction(format!("{} (시퀀스 번호 없음)", s)))?;

        let source: Id = id_part
            .parse()
            .map_err(|_| Error::InvalidTransaction(format!("{} (ID 오류)", s)))?;

        if num_part.is_empty() || !num_part.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::InvalidTransaction(format!(
                "{} (시퀀스 번호가 숫자가 아님)",
                s
            )));
        }
        let number: u32 = num_part
            .parse()
            .map_err(|_| Error::InvalidTransaction(format!("{} (시퀀스 번호 오류)", s)))?;

        Ok(Self { source, number })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_dotted_decimal() {
        let id: Id = "12.52.23.45".parse().unwrap();
        assert_eq!(id.as_bytes(), &[12, 52, 23, 45]);
        assert_eq!(id.to_string(), "12.52.23.45");
    }

    #[test]
    fn test_id_rejects_bad_input() {
        assert!("".parse::<Id>().is_err());
        assert!("a.1".parse::<Id>().is_err());
        assert!("256".parse::<Id>().is_err());
        assert!("1.2.3.4.5.6.7.8.9".parse::<Id>().is_err());
        assert!("1.x".parse::<Id>().is_err());
    }

    #[test]
    fn test_id_zero_padding_equality() {
        let short: Id = "23".parse().unwrap();
        let padded: Id = "0.23".parse().unwrap();
        let other: Id = "88.23".parse().unwrap();

        // 앞쪽 0은 무시
        assert_eq!(short, padded);
        assert_ne!(short, other);
        assert_eq!(padded.padded(4).unwrap(), vec![0, 0, 0, 23]);
        assert!(other.padded(1).is_none());
    }

    #[test]
    fn test_transaction_round_trip_text() {
        let t: TransactionId = "0.23_17".parse().unwrap();
        assert_eq!(t.number, 17);
        assert_eq!(t.source, Id::from(23));
        assert_eq!(t.to_string(), "0.23_17");

        assert!("23".parse::<TransactionId>().is_err());
        assert!("23_".parse::<TransactionId>().is_err());
        assert!("23_x".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_defaults_are_entity_zero() {
        assert_eq!(Id::default(), Id::from(0));
        assert_eq!(Id::default().len(), 1);
        assert_eq!(TransactionId::default().source, Id::default());
        assert_eq!(crate::pdu::PduHeader::default().dest_id, Id::from(0));
    }
}
