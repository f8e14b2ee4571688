//! PDU 인코더/디코더
//!
//! 헤더 레이아웃 (CCSDS CFDP):
//! ```text
//! [flags:1][data_field_length:2][id_len<<4|tsn_len:1]
//! [source_id:N][trans_seq:M][dest_id:N][data field...]
//! ```
//!
//! - flags: 0x10 = Filedata, 0x08 = toward sender, 0x04 = unack, 0x02 = CRC (항상 0)
//! - 송신 PDU의 시퀀스 번호 폭은 4바이트 고정
//! - 수신 PDU는 디코드 전에 반드시 `check_acceptable`을 통과해야 함

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::id::{Id, TransactionId};
use crate::nak::NakList;
use crate::types::{ConditionCode, DeliveryCode, Role, TransStat};
use crate::{MAX_FILE_CHUNK_SIZE, MAX_FILE_NAME_LENGTH, MAX_GAPS_PER_NAK_PDU, MAX_ID_LENGTH,
    MAX_TSN_LENGTH, OUTGOING_TSN_LENGTH};

/// 받아들일 수 있는 최소 PDU 길이
pub const MIN_PDU_LENGTH: usize = 9;

const FLAG_FILE_DATA: u8 = 0x10;
const FLAG_TOWARD_SENDER: u8 = 0x08;
const FLAG_UNACK: u8 = 0x04;
const FLAG_CRC: u8 = 0x02;

/// File-Directive 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DirectiveCode {
    Eof = 4,
    Fin = 5,
    Ack = 6,
    Metadata = 7,
    Nak = 8,
    Prompt = 9,
    Suspend = 10,
    Resume = 11,
    KeepAlive = 12,
}

impl DirectiveCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            4 => Some(Self::Eof),
            5 => Some(Self::Fin),
            6 => Some(Self::Ack),
            7 => Some(Self::Metadata),
            8 => Some(Self::Nak),
            9 => Some(Self::Prompt),
            10 => Some(Self::Suspend),
            11 => Some(Self::Resume),
            12 => Some(Self::KeepAlive),
            _ => None,
        }
    }
}

/// PDU 거부 사유 (수용 게이트)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    #[error("너무 짧음 ({0}바이트)")]
    TooShort(usize),

    #[error("데이터 필드 길이 불일치 (선언 {declared}, 실제 {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("데이터 필드 길이 0")]
    EmptyDataField,

    #[error("알 수 없는 디렉티브 코드 {0}")]
    UnknownDirective(u8),

    #[error("엔티티 ID 폭 {0}바이트 지원 안 함")]
    IdTooLong(usize),

    #[error("시퀀스 번호 폭 {0}바이트 지원 안 함")]
    SequenceNumberTooLong(usize),

    #[error("다른 엔티티 앞으로 온 PDU ({0})")]
    NotForMe(Id),

    #[error("데이터 필드 형식 오류")]
    MalformedBody,
}

/// PDU 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PduType {
    #[default]
    FileDirective,
    FileData,
}

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    TowardReceiver,
    TowardSender,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::TowardReceiver => Self::TowardSender,
            Self::TowardSender => Self::TowardReceiver,
        }
    }
}

/// 전송 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Acknowledged,
    Unacknowledged,
}

/// PDU 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PduHeader {
    pub pdu_type: PduType,
    pub direction: Direction,
    pub mode: Mode,
    pub use_crc: bool,

    /// 데이터 필드 길이 (인코딩 시 자동 계산)
    pub data_field_length: u16,

    /// source ID + 시퀀스 번호
    pub trans: TransactionId,
    pub dest_id: Id,
}

impl PduHeader {
    /// 헤더만 보고 로컬 역할 결정
    ///
    /// 수신자 방향이면 R1/R2, 송신자 방향이면 S1/S2
    pub fn receiver_role(&self) -> Role {
        match (self.direction, self.mode) {
            (Direction::TowardReceiver, Mode::Unacknowledged) => Role::Class1Receiver,
            (Direction::TowardReceiver, Mode::Acknowledged) => Role::Class2Receiver,
            (Direction::TowardSender, Mode::Unacknowledged) => Role::Class1Sender,
            (Direction::TowardSender, Mode::Acknowledged) => Role::Class2Sender,
        }
    }

    /// 헤더만 디코드 (본문은 보지 않음)
    pub fn peek(raw: &[u8]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        let layout = Layout::of(raw);
        if layout.tsn_len > MAX_TSN_LENGTH
            || raw.len() < layout.header_len + layout.data_field_length
        {
            return None;
        }

        let mut r = Reader::new(&raw[4..layout.header_len]);
        let source = Id::new(r.take(layout.id_len)?)?;
        let number = r
            .take(layout.tsn_len)?
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        let dest_id = Id::new(r.take(layout.id_len)?)?;

        Some(Self {
            pdu_type: if is_file_data(raw) {
                PduType::FileData
            } else {
                PduType::FileDirective
            },
            direction: if raw[0] & FLAG_TOWARD_SENDER != 0 {
                Direction::TowardSender
            } else {
                Direction::TowardReceiver
            },
            mode: if raw[0] & FLAG_UNACK != 0 {
                Mode::Unacknowledged
            } else {
                Mode::Acknowledged
            },
            use_crc: raw[0] & FLAG_CRC != 0,
            data_field_length: layout.data_field_length as u16,
            trans: TransactionId::new(source, number),
            dest_id,
        })
    }

    /// 이 PDU를 보낸 엔티티
    pub fn origin(&self) -> Id {
        match self.direction {
            Direction::TowardReceiver => self.trans.source,
            Direction::TowardSender => self.dest_id,
        }
    }

    fn encode(&self, pdu_type: PduType, data_field_length: usize, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if pdu_type == PduType::FileData {
            flags |= FLAG_FILE_DATA;
        }
        if self.direction == Direction::TowardSender {
            flags |= FLAG_TOWARD_SENDER;
        }
        if self.mode == Mode::Unacknowledged {
            flags |= FLAG_UNACK;
        }
        buf.put_u8(flags);
        buf.put_u16(data_field_length as u16);

        // 두 ID는 같은 폭이어야 하므로 짧은 쪽은 왼쪽 0 패딩
        let width = self.trans.source.len().max(self.dest_id.len());
        buf.put_u8((((width - 1) as u8) << 4) | (OUTGOING_TSN_LENGTH - 1) as u8);

        let source = self.trans.source.padded(width).unwrap_or_else(|| vec![0; width]);
        let dest = self.dest_id.padded(width).unwrap_or_else(|| vec![0; width]);
        buf.put_slice(&source);
        buf.put_u32(self.trans.number);
        buf.put_slice(&dest);
    }
}

/// 헤더 폭 정보
#[derive(Debug, Clone, Copy)]
struct Layout {
    id_len: usize,
    tsn_len: usize,
    header_len: usize,
    data_field_length: usize,
}

impl Layout {
    fn of(raw: &[u8]) -> Self {
        let id_len = (((raw[3] & 0x70) >> 4) + 1) as usize;
        let tsn_len = ((raw[3] & 0x07) + 1) as usize;
        Self {
            id_len,
            tsn_len,
            header_len: 4 + 2 * id_len + tsn_len,
            data_field_length: u16::from_be_bytes([raw[1], raw[2]]) as usize,
        }
    }
}

/// 인코딩된 PDU가 Filedata인지 (첫 바이트만 봄)
pub fn is_file_data(raw: &[u8]) -> bool {
    raw.first().is_some_and(|b| b & FLAG_FILE_DATA != 0)
}

/// 수신 PDU 수용 게이트
///
/// 길이/폭/디렉티브 코드/수신 대상 순으로 검사한다. 디코드 전에 항상 호출.
pub fn check_acceptable(raw: &[u8], my_id: &Id) -> Result<(), Reject> {
    if raw.len() < MIN_PDU_LENGTH {
        return Err(Reject::TooShort(raw.len()));
    }

    let layout = Layout::of(raw);
    let declared = layout.header_len + layout.data_field_length;
    if declared > raw.len() {
        return Err(Reject::LengthMismatch {
            declared,
            actual: raw.len(),
        });
    }

    if layout.data_field_length == 0 {
        return Err(Reject::EmptyDataField);
    }

    if raw[0] & FLAG_FILE_DATA == 0 {
        let code = raw[layout.header_len];
        if DirectiveCode::from_u8(code).is_none() {
            return Err(Reject::UnknownDirective(code));
        }
    }

    if layout.id_len > MAX_ID_LENGTH {
        return Err(Reject::IdTooLong(layout.id_len));
    }
    if layout.tsn_len > MAX_TSN_LENGTH {
        return Err(Reject::SequenceNumberTooLong(layout.tsn_len));
    }

    // toward sender면 source가, toward receiver면 dest가 나여야 함
    let addressed_at = if raw[0] & FLAG_TOWARD_SENDER != 0 {
        4
    } else {
        4 + layout.id_len + layout.tsn_len
    };
    let addressed = Id::new(&raw[addressed_at..addressed_at + layout.id_len])
        .ok_or(Reject::IdTooLong(layout.id_len))?;
    if &addressed != my_id {
        return Err(Reject::NotForMe(addressed));
    }

    Ok(())
}

/// Metadata 본문
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// true = 레코드 경계 무시 (segmentation control)
    pub segmentation_control: bool,
    pub file_size: u32,
    pub source_file_name: String,
    pub dest_file_name: String,

    /// 목적지 파일 이름이 있으면 파일 전송
    pub file_transfer: bool,
}

/// Filedata 본문
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileData {
    pub offset: u32,
    pub data: Bytes,
}

impl FileData {
    /// 데이터 끝 오프셋, 32비트 파일 주소 공간을 넘으면 None
    pub fn end(&self) -> Option<u32> {
        let len = u32::try_from(self.data.len()).ok()?;
        self.offset.checked_add(len)
    }
}

/// EOF 본문
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eof {
    pub condition_code: ConditionCode,
    pub file_checksum: u32,
    pub file_size: u32,
}

/// Finished 본문
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fin {
    pub condition_code: ConditionCode,

    /// 종단 시스템이 생성한 Finished
    pub end_system_status: bool,
    pub delivery_code: DeliveryCode,
}

/// ACK 본문
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// 확인 대상 디렉티브 (EOF 또는 FIN)
    pub directive_code: u8,
    pub directive_subtype: u8,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub transaction_status: TransStat,
}

impl Default for Ack {
    fn default() -> Self {
        Self {
            directive_code: DirectiveCode::Eof as u8,
            directive_subtype: 0,
            condition_code: ConditionCode::NoError,
            delivery_code: DeliveryCode::Complete,
            transaction_status: TransStat::Undefined,
        }
    }
}

/// 디코드된 NAK 본문
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nak {
    pub start_of_scope: u32,
    pub end_of_scope: u32,
    pub is_metadata_missing: bool,

    /// [begin, end) 쌍
    pub gaps: Vec<(u32, u32)>,
}

/// PDU 본문 (종류별 태그)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    Metadata(Metadata),
    FileData(FileData),
    Eof(Eof),
    Fin(Fin),
    Ack(Ack),
    Nak(Nak),

    /// 지원하지 않는 디렉티브 (Prompt, Suspend, Resume, KeepAlive)
    Other(u8),
}

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Metadata,
    FileData,
    Eof,
    AckEof,
    AckFin,
    Nak,
    Fin,
    DontKnow,
}

/// 헤더 + 본문
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub header: PduHeader,
    pub body: PduBody,
}

impl Pdu {
    pub fn new(header: PduHeader, body: PduBody) -> Self {
        Self { header, body }
    }

    /// 종류 판별
    pub fn kind(&self) -> PduKind {
        match &self.body {
            PduBody::Metadata(_) => PduKind::Metadata,
            PduBody::FileData(_) => PduKind::FileData,
            PduBody::Eof(_) => PduKind::Eof,
            PduBody::Fin(_) => PduKind::Fin,
            PduBody::Nak(_) => PduKind::Nak,
            PduBody::Ack(ack) if ack.directive_code == DirectiveCode::Eof as u8 => PduKind::AckEof,
            PduBody::Ack(ack) if ack.directive_code == DirectiveCode::Fin as u8 => PduKind::AckFin,
            PduBody::Ack(_) => {
                warn!("EOF도 FIN도 아닌 디렉티브에 대한 ACK");
                PduKind::DontKnow
            }
            PduBody::Other(_) => PduKind::DontKnow,
        }
    }

    /// 바이트로 인코딩
    ///
    /// 데이터 필드 길이는 본문에서 계산해 헤더에 채운다.
    pub fn to_bytes(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(64);
        let pdu_type = match &self.body {
            PduBody::FileData(fd) => {
                body.put_u32(fd.offset);
                body.put_slice(&fd.data);
                PduType::FileData
            }
            PduBody::Metadata(md) => {
                body.put_u8(DirectiveCode::Metadata as u8);
                body.put_u8(if md.segmentation_control { 0x80 } else { 0 });
                body.put_u32(md.file_size);
                put_lv(&mut body, &md.source_file_name);
                put_lv(&mut body, &md.dest_file_name);
                PduType::FileDirective
            }
            PduBody::Eof(eof) => {
                body.put_u8(DirectiveCode::Eof as u8);
                body.put_u8((eof.condition_code as u8) << 4);
                body.put_u32(eof.file_checksum);
                body.put_u32(eof.file_size);
                PduType::FileDirective
            }
            PduBody::Fin(fin) => {
                body.put_u8(DirectiveCode::Fin as u8);
                body.put_u8(
                    ((fin.condition_code as u8) << 4)
                        | ((fin.end_system_status as u8) << 3)
                        | (fin.delivery_code.bit() << 2),
                );
                PduType::FileDirective
            }
            PduBody::Ack(ack) => {
                body.put_u8(DirectiveCode::Ack as u8);
                body.put_u8((ack.directive_code << 4) | (ack.directive_subtype & 0x0F));
                body.put_u8(
                    ((ack.condition_code as u8) << 4)
                        | (ack.delivery_code.bit() << 2)
                        | (ack.transaction_status as u8),
                );
                PduType::FileDirective
            }
            PduBody::Nak(nak) => {
                encode_nak(nak, &mut body);
                PduType::FileDirective
            }
            PduBody::Other(code) => {
                body.put_u8(*code);
                PduType::FileDirective
            }
        };

        let mut buf = BytesMut::with_capacity(crate::MAX_PDU_HEADER_LENGTH + body.len());
        self.header.encode(pdu_type, body.len(), &mut buf);
        buf.put_slice(&body);
        buf.freeze()
    }

    /// 게이트 + 디코드
    pub fn decode(raw: &[u8], my_id: &Id) -> Result<Self, Reject> {
        check_acceptable(raw, my_id)?;
        Self::from_bytes(raw).ok_or(Reject::MalformedBody)
    }

    /// 바이트에서 디코드 (게이트는 별도)
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let header = PduHeader::peek(raw)?;
        let layout = Layout::of(raw);

        let field = &raw[layout.header_len..layout.header_len + layout.data_field_length];
        let body = match header.pdu_type {
            PduType::FileData => PduBody::FileData(decode_file_data(field)?),
            PduType::FileDirective => decode_directive(field)?,
        };

        Some(Self { header, body })
    }
}

/// 길이 접두 문자열 (최대 64바이트)
fn put_lv(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(MAX_FILE_NAME_LENGTH);
    buf.put_u8(len as u8);
    buf.put_slice(&bytes[..len]);
}

fn encode_nak(nak: &Nak, buf: &mut BytesMut) {
    let total = nak.gaps.len() + nak.is_metadata_missing as usize;
    let mut room = total;
    if total > MAX_GAPS_PER_NAK_PDU {
        warn!(
            "outgoing Nak has first {} of {} total gaps ({} dropped)",
            MAX_GAPS_PER_NAK_PDU,
            total,
            total - MAX_GAPS_PER_NAK_PDU
        );
        room = MAX_GAPS_PER_NAK_PDU;
    }

    buf.put_u8(DirectiveCode::Nak as u8);
    buf.put_u32(nak.start_of_scope);
    buf.put_u32(nak.end_of_scope);
    if nak.is_metadata_missing && room > 0 {
        // Metadata 누락은 (0, 0) 갭으로 표현
        buf.put_u32(0);
        buf.put_u32(0);
        room -= 1;
    }
    for &(begin, end) in nak.gaps.iter().take(room) {
        buf.put_u32(begin);
        buf.put_u32(end);
    }
}

fn decode_file_data(field: &[u8]) -> Option<FileData> {
    let mut r = Reader::new(field);
    let offset = r.u32()?;
    let mut data = r.rest();
    if data.len() > MAX_FILE_CHUNK_SIZE {
        warn!(
            "수신 Filedata 잘림 ({} / {})",
            MAX_FILE_CHUNK_SIZE,
            data.len()
        );
        data = &data[..MAX_FILE_CHUNK_SIZE];
    }
    let fd = FileData {
        offset,
        data: Bytes::copy_from_slice(data),
    };
    if fd.end().is_none() {
        warn!(
            "Filedata 범위가 파일 주소 공간을 넘음 (offset={}, length={})",
            fd.offset,
            fd.data.len()
        );
        return None;
    }
    Some(fd)
}

fn decode_directive(field: &[u8]) -> Option<PduBody> {
    let mut r = Reader::new(field);
    let code = r.u8()?;
    let body = match DirectiveCode::from_u8(code)? {
        DirectiveCode::Metadata => {
            let status = r.u8()?;
            let file_size = r.u32()?;
            let source_file_name = get_lv(&mut r, "source")?;
            let dest_file_name = get_lv(&mut r, "dest")?;
            PduBody::Metadata(Metadata {
                segmentation_control: status & 0x80 != 0,
                file_size,
                file_transfer: !dest_file_name.is_empty(),
                source_file_name,
                dest_file_name,
            })
        }
        DirectiveCode::Eof => {
            let cc = r.u8()?;
            PduBody::Eof(Eof {
                condition_code: ConditionCode::from_nibble(cc >> 4),
                file_checksum: r.u32()?,
                file_size: r.u32()?,
            })
        }
        DirectiveCode::Fin => {
            let b = r.u8()?;
            PduBody::Fin(Fin {
                condition_code: ConditionCode::from_nibble(b >> 4),
                end_system_status: b & 0x08 != 0,
                delivery_code: DeliveryCode::from_bit(b >> 2),
            })
        }
        DirectiveCode::Ack => {
            let first = r.u8()?;
            let second = r.u8()?;
            PduBody::Ack(Ack {
                directive_code: first >> 4,
                directive_subtype: first & 0x0F,
                condition_code: ConditionCode::from_nibble(second >> 4),
                delivery_code: DeliveryCode::from_bit(second >> 2),
                transaction_status: TransStat::from_bits(second),
            })
        }
        DirectiveCode::Nak => {
            let start_of_scope = r.u32()?;
            let end_of_scope = r.u32()?;
            let mut nak = Nak {
                start_of_scope,
                end_of_scope,
                ..Nak::default()
            };
            let mut first = true;
            while r.remaining() >= 8 {
                let begin = r.u32()?;
                let end = r.u32()?;
                if first && begin == 0 && end == 0 {
                    nak.is_metadata_missing = true;
                } else if nak.gaps.len() < MAX_GAPS_PER_NAK_PDU {
                    nak.gaps.push((begin, end));
                } else {
                    warn!("수신 NAK 갭 목록 잘림 ({}개까지)", MAX_GAPS_PER_NAK_PDU);
                    break;
                }
                first = false;
            }
            PduBody::Nak(nak)
        }
        other => PduBody::Other(other as u8),
    };
    Some(body)
}

fn get_lv(r: &mut Reader<'_>, which: &str) -> Option<String> {
    let len = r.u8()? as usize;
    let bytes = r.take(len)?;
    let keep = if len > MAX_FILE_NAME_LENGTH {
        warn!("수신 Metadata의 {} 파일 이름이 너무 길어 잘림", which);
        &bytes[..MAX_FILE_NAME_LENGTH]
    } else {
        bytes
    };
    Some(String::from_utf8_lossy(keep).into_owned())
}

/// 경계 검사 리더
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

// ---------------------------------------------------------------------------
// 엔진용 빌더
// ---------------------------------------------------------------------------

/// Metadata PDU
pub fn make_md(header: PduHeader, md: &Metadata) -> Pdu {
    Pdu::new(header, PduBody::Metadata(md.clone()))
}

/// Filedata PDU
pub fn make_fd(header: PduHeader, offset: u32, data: Bytes) -> Pdu {
    Pdu::new(header, PduBody::FileData(FileData { offset, data }))
}

/// EOF PDU
pub fn make_eof(header: PduHeader, eof: Eof) -> Pdu {
    Pdu::new(header, PduBody::Eof(eof))
}

/// Finished PDU
pub fn make_fin(header: PduHeader, fin: Fin) -> Pdu {
    Pdu::new(header, PduBody::Fin(fin))
}

/// ACK PDU
pub fn make_ack(header: PduHeader, ack: Ack) -> Pdu {
    Pdu::new(header, PduBody::Ack(ack))
}

/// 갭 리스트에서 NAK PDU
pub fn make_nak(header: PduHeader, list: &NakList) -> Pdu {
    Pdu::new(
        header,
        PduBody::Nak(Nak {
            start_of_scope: list.start_of_scope(),
            end_of_scope: list.end_of_scope(),
            is_metadata_missing: list.is_metadata_missing(),
            gaps: list.gaps().to_vec(),
        }),
    )
}
