use anyhow::{bail, Context, Result};

/// Parse a hex string into bytes
/// Supports various formats:
/// - "0102030A" (pure hex)
/// - "01 02 03 0A" (space-separated)
/// - "0x01,0x02,0x03,0x0A" (0x prefix with commas)
/// - "01:02:03:0A" (colon-separated)
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned: String = hex_str
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !matches!(c, ' ' | ',' | ':' | '-' | '\t' | '\n' | '\r'))
        .collect();

    if cleaned.len() % 2 != 0 {
        bail!(
            "Hex string must have even number of characters: '{}'",
            hex_str
        );
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{hex_str}'"))
}

/// Parse a header byte given as "0xA4", "A4h" or decimal "164"
pub fn parse_byte(value: &str) -> Result<u8> {
    let n = parse_number(value)?;
    u8::try_from(n).with_context(|| format!("Value out of byte range: '{value}'"))
}

/// Parse an unsigned number, hex with 0x prefix or h suffix, decimal otherwise
pub fn parse_number(value: &str) -> Result<u32> {
    let cleaned = value.trim();

    if let Some(digits) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .or_else(|| cleaned.strip_suffix(['h', 'H']))
    {
        u32::from_str_radix(digits, 16).with_context(|| format!("Invalid hex number: '{value}'"))
    } else {
        cleaned
            .parse::<u32>()
            .with_context(|| format!("Invalid decimal number: '{value}'"))
    }
}

/// Format bytes as a hex string
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

/// Format bytes as ASCII, replacing non-printable chars with '.'
pub fn format_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

/// Format bytes in a hex dump style (both hex and ASCII)
pub fn format_hex_dump(bytes: &[u8]) -> String {
    const BYTES_PER_LINE: usize = 16;

    if bytes.is_empty() {
        return String::from("(empty)");
    }

    bytes
        .chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{:08X}: {:<width$} |{}|",
                i * BYTES_PER_LINE,
                format_hex_spaced(chunk),
                format_ascii(chunk),
                width = BYTES_PER_LINE * 3 - 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
