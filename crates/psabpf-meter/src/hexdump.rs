//! Space-separated hex rendering of map keys and values (`"A0 0F 00 00"`).

/// Formats bytes as upper-case hex octets separated by single spaces.
pub fn format(bytes: &[u8]) -> String {
    let encoded = hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

/// Parses hex octets, ignoring any whitespace and an optional `hex` prefix.
pub fn parse(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let text = text.trim();
    let text = text.strip_prefix("hex").unwrap_or(text);
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact)
}
