//! 사용자 요청 파싱
//!
//! ```text
//! PUT [-class1|-class2] <source-file> <dest-id> [<dest-file>]
//! SUSPEND|RESUME|CANCEL|ABANDON|REPORT <source-id>_<seq>|all
//! FREEZE
//! THAW
//! ```
//!
//! 동사는 대소문자를 가리지 않는다. 빈 문자열은 "요청 없음"이다.

use crate::id::{Id, TransactionId};
use crate::{Error, Result, MAX_FILE_NAME_LENGTH, MAX_REQUEST_STRING_LENGTH};

/// 고려하는 최대 토큰 수
const MAX_TOKENS: usize = 5;

/// 요청 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    One(TransactionId),
}

/// Put 요청 내용
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// Class 2 (기본) 여부
    pub ack_required: bool,
    pub file_transfer: bool,
    pub source_file_name: String,
    pub dest_file_name: String,
    pub dest_id: Id,
}

impl PutRequest {
    /// Class 2 파일 전송
    pub fn new(source: &str, dest_id: Id, dest: &str) -> Self {
        Self {
            ack_required: true,
            file_transfer: true,
            source_file_name: source.to_string(),
            dest_file_name: dest.to_string(),
            dest_id,
        }
    }

    /// Class 1로 변경
    pub fn unacknowledged(mut self) -> Self {
        self.ack_required = false;
        self
    }
}

/// 사용자 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Put(PutRequest),
    Suspend(Target),
    Resume(Target),
    Cancel(Target),
    Abandon(Target),
    Report(Target),
    Freeze,
    Thaw,
}

impl Request {
    /// 텍스트 요청 파싱, 빈 문자열이면 None
    pub fn parse(text: &str) -> Result<Option<Self>> {
        if text.len() > MAX_REQUEST_STRING_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "요청 문자열이 너무 김 ({} > {})",
                text.len(),
                MAX_REQUEST_STRING_LENGTH
            )));
        }

        let tokens: Vec<&str> = text.split_whitespace().take(MAX_TOKENS).collect();
        let Some((verb, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let request = match verb.to_ascii_uppercase().as_str() {
            "PUT" => Self::Put(parse_put(args)?),
            "SUSPEND" => Self::Suspend(parse_target(verb, args)?),
            "RESUME" => Self::Resume(parse_target(verb, args)?),
            "CANCEL" => Self::Cancel(parse_target(verb, args)?),
            "ABANDON" => Self::Abandon(parse_target(verb, args)?),
            "REPORT" => Self::Report(parse_target(verb, args)?),
            "FREEZE" => Self::Freeze,
            "THAW" => Self::Thaw,
            _ => {
                return Err(Error::InvalidRequest(format!("알 수 없는 요청: {}", verb)));
            }
        };
        Ok(Some(request))
    }

    /// 요청 대상 (Put/Freeze/Thaw는 None)
    pub fn target(&self) -> Option<Target> {
        match self {
            Self::Suspend(t) | Self::Resume(t) | Self::Cancel(t) | Self::Abandon(t)
            | Self::Report(t) => Some(*t),
            _ => None,
        }
    }
}

fn parse_put(mut args: &[&str]) -> Result<PutRequest> {
    let mut ack_required = true;
    if let Some(flag) = args.first() {
        if flag.eq_ignore_ascii_case("-class1") {
            ack_required = false;
            args = &args[1..];
        } else if flag.eq_ignore_ascii_case("-class2") {
            args = &args[1..];
        }
    }

    let (source, dest_id, dest) = match args {
        [source, dest_id] => (*source, *dest_id, *source),
        [source, dest_id, dest, ..] => (*source, *dest_id, *dest),
        _ => {
            return Err(Error::InvalidRequest(
                "PUT에는 <source-file> <dest-id>가 필요함".to_string(),
            ));
        }
    };

    for name in [source, dest] {
        if name.len() > MAX_FILE_NAME_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "파일 이름이 너무 김 ({} > {}): {}",
                name.len(),
                MAX_FILE_NAME_LENGTH,
                name
            )));
        }
    }

    Ok(PutRequest {
        ack_required,
        file_transfer: true,
        source_file_name: source.to_string(),
        dest_file_name: dest.to_string(),
        dest_id: dest_id.parse()?,
    })
}

fn parse_target(verb: &str, args: &[&str]) -> Result<Target> {
    let arg = args
        .first()
        .ok_or_else(|| Error::InvalidRequest(format!("{}에는 트랜잭션 또는 'all'이 필요함", verb)))?;
    if arg.eq_ignore_ascii_case("all") {
        Ok(Target::All)
    } else {
        Ok(Target::One(arg.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_variants() {
        let req = Request::parse("PUT -class1 a.txt 23").unwrap().unwrap();
        match req {
            Request::Put(put) => {
                assert!(!put.ack_required);
                assert_eq!(put.source_file_name, "a.txt");
                assert_eq!(put.dest_file_name, "a.txt");
                assert_eq!(put.dest_id, Id::from(23));
            }
            other => panic!("unexpected {:?}", other),
        }

        let req = Request::parse("put a.txt 12.52 b.txt").unwrap().unwrap();
        assert_eq!(
            req,
            Request::Put(PutRequest::new("a.txt", "12.52".parse().unwrap(), "b.txt"))
        );

        let req = Request::parse("PUT -class2 a.txt 23").unwrap().unwrap();
        assert!(matches!(req, Request::Put(PutRequest { ack_required: true, .. })));
    }

    #[test]
    fn test_put_errors() {
        assert!(Request::parse("PUT a.txt").is_err());
        assert!(Request::parse("PUT -class1 a.txt").is_err());
        assert!(Request::parse("PUT a.txt x.y").is_err());

        let long_name = "f".repeat(MAX_FILE_NAME_LENGTH + 1);
        assert!(Request::parse(&format!("PUT {} 23", long_name)).is_err());
    }

    #[test]
    fn test_targets() {
        assert_eq!(
            Request::parse("cancel all").unwrap(),
            Some(Request::Cancel(Target::All))
        );
        let trans = TransactionId::new(Id::from(23), 7);
        assert_eq!(
            Request::parse("SUSPEND 23_7").unwrap(),
            Some(Request::Suspend(Target::One(trans)))
        );
        assert_eq!(
            Request::parse("Report 23_7").unwrap().unwrap().target(),
            Some(Target::One(trans))
        );
        assert!(Request::parse("RESUME").is_err());
        assert!(Request::parse("ABANDON 23").is_err());
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(Request::parse("").unwrap(), None);
        assert_eq!(Request::parse("   ").unwrap(), None);
        assert_eq!(Request::parse("freeze").unwrap(), Some(Request::Freeze));
        assert_eq!(Request::parse("THAW").unwrap(), Some(Request::Thaw));
        assert!(Request::parse("LAUNCH 23").is_err());
        assert!(Request::parse(&"x".repeat(MAX_REQUEST_STRING_LENGTH + 1)).is_err());
    }
}
