//! Administrative region code tables.
//!
//! Province (sido) codes are the first two PNU digits. Source archives embed
//! either the 2-digit code or a short province name in their file names, so
//! both directions are needed for region-scoped file discovery.

/// Province code → official name.
pub const PROVINCE_CODES: &[(&str, &str)] = &[
    ("11", "서울특별시"),
    ("26", "부산광역시"),
    ("27", "대구광역시"),
    ("28", "인천광역시"),
    ("29", "광주광역시"),
    ("30", "대전광역시"),
    ("31", "울산광역시"),
    ("36", "세종특별자치시"),
    ("41", "경기도"),
    ("42", "강원특별자치도"),
    ("43", "충청북도"),
    ("44", "충청남도"),
    ("45", "전북특별자치도"),
    ("46", "전라남도"),
    ("47", "경상북도"),
    ("48", "경상남도"),
    ("50", "제주특별자치도"),
    // Alternate codes some datasets use for the renamed provinces.
    ("51", "강원특별자치도"),
    ("52", "전북특별자치도"),
];

/// Short province names as embedded in archive file names
/// (e.g. `LSMD_CONT_LDREG_서울.zip`).
pub const PROVINCE_SHORT_NAMES: &[(&str, &str)] = &[
    ("서울", "11"),
    ("부산", "26"),
    ("대구", "27"),
    ("인천", "28"),
    ("광주", "29"),
    ("대전", "30"),
    ("울산", "31"),
    ("세종", "36"),
    ("경기", "41"),
    ("강원", "42"),
    ("강원특별자치도", "42"),
    ("충북", "43"),
    ("충남", "44"),
    ("전북", "45"),
    ("전북특별자치도", "45"),
    ("전남", "46"),
    ("경북", "47"),
    ("경남", "48"),
    ("제주", "50"),
];

/// Official name for a 2-digit province code.
pub fn province_name(code: &str) -> Option<&'static str> {
    PROVINCE_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, n)| *n)
}

/// Resolve a user-supplied region token to an administrative code prefix.
/// Accepts a numeric prefix (`11`, `41135`) verbatim, or a province name /
/// short name.
pub fn resolve_region_prefix(token: &str) -> Option<String> {
    let token = token.trim();
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return Some(token.to_string());
    }
    PROVINCE_SHORT_NAMES
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, code)| (*code).to_string())
        .or_else(|| {
            PROVINCE_CODES
                .iter()
                .find(|(_, name)| *name == token)
                .map(|(code, _)| (*code).to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn province_lookup() {
        assert_eq!(province_name("11"), Some("서울특별시"));
        assert_eq!(province_name("50"), Some("제주특별자치도"));
        assert_eq!(province_name("99"), None);
    }

    #[test]
    fn region_token_resolution() {
        assert_eq!(resolve_region_prefix("11").as_deref(), Some("11"));
        assert_eq!(resolve_region_prefix("41135").as_deref(), Some("41135"));
        assert_eq!(resolve_region_prefix("서울").as_deref(), Some("11"));
        assert_eq!(resolve_region_prefix("전북특별자치도").as_deref(), Some("45"));
        assert_eq!(resolve_region_prefix("나성시"), None);
    }
}
