//! 물리 단위 기호 <-> CMP 단위 코드 변환

use std::collections::HashMap;

/// 코드 0: 단위 없음
pub const UNIT_NONE: u8 = 0x00;

/// (코드, 기호) 표. 기호는 정규 표기.
const UNIT_TABLE: &[(u8, &str)] = &[
    (0x00, ""),
    (0x01, "m"),
    (0x02, "kg"),
    (0x03, "s"),
    (0x04, "A"),
    (0x05, "K"),
    (0x06, "mol"),
    (0x07, "cd"),
    (0x08, "Hz"),
    (0x09, "rad"),
    (0x0A, "sr"),
    (0x0B, "N"),
    (0x0C, "Pa"),
    (0x0D, "J"),
    (0x0E, "W"),
    (0x0F, "C"),
    (0x10, "V"),
    (0x11, "F"),
    (0x12, "Ω"),
    (0x13, "S"),
    (0x14, "Wb"),
    (0x15, "T"),
    (0x16, "H"),
    (0x17, "°C"),
    (0x18, "lm"),
    (0x19, "lx"),
    (0x1A, "Bq"),
    (0x1B, "Gy"),
    (0x1C, "Sv"),
    (0x1D, "kat"),
];

/// 입력 전용 별칭 (역방향은 정규 기호로)
const UNIT_ALIASES: &[(&str, u8)] = &[
    ("Ohm", 0x12),
    ("ohm", 0x12),
    ("degC", 0x17),
];

/// 양방향 단위 조회 테이블
#[derive(Debug, Clone)]
pub struct UnitConverter {
    by_symbol: HashMap<&'static str, u8>,
    by_code: HashMap<u8, &'static str>,
}

impl UnitConverter {
    pub fn new() -> Self {
        let mut by_symbol = HashMap::with_capacity(UNIT_TABLE.len() + UNIT_ALIASES.len());
        let mut by_code = HashMap::with_capacity(UNIT_TABLE.len());

        for &(code, symbol) in UNIT_TABLE {
            by_symbol.insert(symbol, code);
            by_code.insert(code, symbol);
        }
        for &(alias, code) in UNIT_ALIASES {
            by_symbol.insert(alias, code);
        }

        Self { by_symbol, by_code }
    }

    /// 기호 -> 코드
    pub fn to_code(&self, symbol: &str) -> Option<u8> {
        self.by_symbol.get(symbol.trim()).copied()
    }

    /// 코드 -> 정규 기호
    pub fn to_symbol(&self, code: u8) -> Option<&'static str> {
        self.by_code.get(&code).copied()
    }

    /// 모르는 기호는 "단위 없음"으로
    pub fn code_or_none(&self, symbol: Option<&str>) -> u8 {
        symbol.and_then(|s| self.to_code(s)).unwrap_or(UNIT_NONE)
    }
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self::new()
    }
}
