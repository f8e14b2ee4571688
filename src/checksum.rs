//! 파일 체크섬
//!
//! 파일을 4바이트 big-endian 워드의 나열로 보고 32비트 wrap 덧셈한다.
//! 각 바이트는 파일 내 절대 오프셋 기준 워드 위치에 더해지므로
//! 어떤 청크 경계로 나눠 계산해도 한 번에 계산한 값과 같다.

use std::io::{self, Read};

/// 전체 파일 계산 시 읽기 단위
pub const CHECKSUM_READ_SIZE: usize = 1024;

/// 증분 체크섬 누산기
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이전 값에서 이어서 계산
    pub fn from_value(sum: u32) -> Self {
        Self { sum }
    }

    /// 파일 오프셋 `offset`에서 시작하는 데이터 누적
    pub fn update(&mut self, offset: u64, data: &[u8]) {
        let mut pos = offset;
        let mut rest = data;

        // 워드 경계까지 앞쪽 바이트
        while pos % 4 != 0 {
            let Some((&b, tail)) = rest.split_first() else {
                return;
            };
            self.add_byte(pos, b);
            pos += 1;
            rest = tail;
        }

        let mut words = rest.chunks_exact(4);
        for word in &mut words {
            let value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            self.sum = self.sum.wrapping_add(value);
            pos += 4;
        }

        // 끝은 오른쪽 0 패딩
        for &b in words.remainder() {
            self.add_byte(pos, b);
            pos += 1;
        }
    }

    #[inline]
    fn add_byte(&mut self, pos: u64, b: u8) {
        let shift = 8 * (3 - (pos % 4) as u32);
        self.sum = self.sum.wrapping_add((b as u32) << shift);
    }

    pub fn value(&self) -> u32 {
        self.sum
    }
}

/// 한 번에 계산
pub fn checksum_of(data: &[u8]) -> u32 {
    let mut ck = Checksum::new();
    ck.update(0, data);
    ck.value()
}

/// 리더 전체를 1024바이트 단위로 읽어 계산
pub fn checksum_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut ck = Checksum::new();
    let mut buf = [0u8; CHECKSUM_READ_SIZE];
    let mut offset = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ck.update(offset, &buf[..n]);
        offset += n as u64;
    }
    Ok(ck.value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_sum() {
        // 0x01020304 + 0x05000000 (오른쪽 패딩)
        assert_eq!(checksum_of(&[1, 2, 3, 4, 5]), 0x0102_0304 + 0x0500_0000);
        assert_eq!(checksum_of(&[]), 0);
    }

    #[test]
    fn test_wraparound() {
        assert_eq!(checksum_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 2]), 1);
    }

    #[test]
    fn test_incremental_matches_whole_file() {
        let data: Vec<u8> = (0..997u32).map(|i| (i * 31 + 7) as u8).collect();
        let whole = checksum_of(&data);

        // 다양한 청크 크기 (4의 배수가 아닌 것 포함)
        for chunk in [1usize, 2, 3, 5, 7, 50, 333, 1024] {
            let mut ck = Checksum::new();
            let mut offset = 0u64;
            for piece in data.chunks(chunk) {
                ck.update(offset, piece);
                offset += piece.len() as u64;
            }
            assert_eq!(ck.value(), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_out_of_order_pieces() {
        let data: Vec<u8> = (0..64u8).collect();
        let mut ck = Checksum::new();
        ck.update(30, &data[30..]);
        ck.update(0, &data[..13]);
        ck.update(13, &data[13..30]);
        assert_eq!(ck.value(), checksum_of(&data));
    }

    #[test]
    fn test_reader() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let mut cursor = std::io::Cursor::new(data.clone());
        assert_eq!(checksum_reader(&mut cursor).unwrap(), checksum_of(&data));
    }
}
