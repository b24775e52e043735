/// Byte <-> text codec applied to every framed message
///
/// Decoding never fails: invalid input is replaced rather than rejected, so a
/// malformed message still reaches the bytes handler intact.
///
/// # Examples
///
/// ```
/// use netframe::TextCodec;
///
/// assert_eq!(TextCodec::Utf8.decode(b"hello"), "hello");
/// assert_eq!(TextCodec::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
/// assert_eq!(TextCodec::Ascii.encode("café"), b"caf?".to_vec());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextCodec {
    /// UTF-8, invalid sequences decode to U+FFFD
    #[default]
    Utf8,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
    /// 7-bit ASCII, bytes above 0x7F decode to `?`
    Ascii,
}

impl TextCodec {
    /// Decodes bytes into text
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextCodec::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextCodec::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            TextCodec::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
                .collect(),
        }
    }

    /// Encodes text into bytes; unrepresentable characters become `?`
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextCodec::Utf8 => text.as_bytes().to_vec(),
            TextCodec::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            TextCodec::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}
