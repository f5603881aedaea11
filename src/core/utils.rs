use anyhow::{bail, Context, Result};

/// Parse a hex string into bytes
/// Case-insensitive, and tolerant of the usual ways people paste APDUs:
/// - "00A4040000" (pure hex)
/// - "00 A4 04 00 00" (space-separated)
/// - "0x00,0xA4,0x04" (0x prefix with commas)
/// - "00:A4:04" or "00-A4-04"
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned = clean_hex_string(hex_str);

    if cleaned.len() % 2 != 0 {
        bail!(
            "Hex string must have even number of characters: '{}'",
            hex_str
        );
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{hex_str}'"))
}

/// Strip separators and `0x` prefixes
fn clean_hex_string(hex_str: &str) -> String {
    hex_str
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ':' | '-' | ','))
        .collect()
}

/// Format bytes as an uppercase hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as a hex string with spaces
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short label for the status word of a card response, for debug logs
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x61, n) => format!("Success, {n} bytes available"),
        (0x62 | 0x63, _) => "Warning".to_string(),
        (0x67, 0x00) => "Wrong length".to_string(),
        (0x69, 0x82) => "Security status not satisfied".to_string(),
        (0x6A, 0x82) => "File or application not found".to_string(),
        (0x6C, n) => format!("Wrong Le, exact length: {n}"),
        (0x6D, 0x00) => "Instruction not supported".to_string(),
        (0x6E, 0x00) => "Class not supported".to_string(),
        _ => "Error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_various_formats() {
        assert_eq!(parse_hex("0102030A").unwrap(), vec![0x01, 0x02, 0x03, 0x0A]);
        assert_eq!(
            parse_hex("01 02 03 0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(
            parse_hex("0x01,0x02,0x03,0x0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(
            parse_hex("01:02:03:0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex("   ").unwrap(), Vec::<u8>::new());
        assert_eq!(
            parse_hex("\t01\n02\r03\n0A\t").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
    }

    #[test]
    fn test_parse_hex_case_insensitive() {
        assert_eq!(parse_hex("abcdef").unwrap(), vec![0xAB, 0xCD, 0xEF]);
        assert_eq!(parse_hex("ABCDEF").unwrap(), vec![0xAB, 0xCD, 0xEF]);
        assert_eq!(parse_hex("aBcDeF").unwrap(), vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_parse_hex_invalid() {
        assert!(parse_hex("0102030").is_err()); // Odd length
        assert!(parse_hex("0102G30A").is_err());
        assert!(parse_hex("01@02").is_err());
        assert!(parse_hex("Z").is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        let encoded = format_hex(&all_bytes);

        assert_eq!(encoded, encoded.to_uppercase());
        assert_eq!(parse_hex(&encoded).unwrap(), all_bytes);
        assert_eq!(parse_hex(&encoded.to_lowercase()).unwrap(), all_bytes);
        assert_eq!(parse_hex(&format_hex(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_format_functions() {
        let bytes = vec![0x01, 0x02, 0x03, 0x0A];
        assert_eq!(format_hex(&bytes), "0102030A");
        assert_eq!(format_hex_spaced(&bytes), "01 02 03 0A");

        assert_eq!(format_hex(&[]), "");
        assert_eq!(format_hex_spaced(&[]), "");

        let special_bytes = vec![0x00, 0xFF, 0x7F, 0x80];
        assert_eq!(format_hex(&special_bytes), "00FF7F80");
        assert_eq!(format_hex_spaced(&special_bytes), "00 FF 7F 80");
    }

    #[test]
    fn test_describe_status_word() {
        assert_eq!(describe_status_word(0x90, 0x00), "Success");
        assert_eq!(
            describe_status_word(0x61, 0x10),
            "Success, 16 bytes available"
        );
        assert_eq!(describe_status_word(0x63, 0xC3), "Warning");
        assert_eq!(
            describe_status_word(0x6A, 0x82),
            "File or application not found"
        );
        assert_eq!(describe_status_word(0x6C, 0x08), "Wrong Le, exact length: 8");
        assert_eq!(describe_status_word(0x12, 0x34), "Error");
    }

    #[test]
    fn test_clean_hex_string() {
        assert_eq!(clean_hex_string("0x01,0x02"), "0102");
        assert_eq!(clean_hex_string("01 02 03"), "010203");
        assert_eq!(clean_hex_string("01-02-03"), "010203");
        assert_eq!(clean_hex_string("  0X01  "), "01");
        assert_eq!(clean_hex_string("6f10"), "6f10");
    }
}
