use crate::common::{DataContainer, TextCodec};
use crate::{NetError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// CR LF
pub const DEFAULT_DELIMITER: &[u8] = b"\r\n";

/// Codec for messages terminated by a delimiter byte sequence
///
/// The delimiter may be any non-empty byte sequence. A delimiter split across
/// two reads is completed on the next read, and a byte equal to the first
/// delimiter byte that is not followed by the rest of the delimiter stays
/// part of the message.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use netframe::TextCodec;
/// use netframe::framing::DelimitedCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = DelimitedCodec::new(TextCodec::Utf8, b"\r\n").unwrap();
/// let mut buf = BytesMut::from(&b"PING\r"[..]);
/// assert!(codec.decode(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(b"\n");
/// let message = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(message.text(), "PING");
/// ```
#[derive(Debug, Clone)]
pub struct DelimitedCodec {
    delimiter: Bytes,
    text: TextCodec,
    /// Offset of the first byte not yet ruled out as a delimiter start
    next_index: usize,
}

impl DelimitedCodec {
    pub fn new(text: TextCodec, delimiter: &[u8]) -> Result<Self> {
        validate(delimiter)?;
        Ok(Self {
            delimiter: Bytes::copy_from_slice(delimiter),
            text,
            next_index: 0,
        })
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn text_codec(&self) -> TextCodec {
        self.text
    }

    /// Replaces the delimiter and forgets any scan progress
    pub fn set_delimiter(&mut self, delimiter: &[u8]) -> Result<()> {
        validate(delimiter)?;
        self.delimiter = Bytes::copy_from_slice(delimiter);
        self.next_index = 0;
        Ok(())
    }

    pub(crate) fn fresh(&self) -> Self {
        Self {
            next_index: 0,
            ..self.clone()
        }
    }

    pub(crate) fn write_frame(&self, payload: &[u8], dst: &mut BytesMut) {
        dst.reserve(payload.len() + self.delimiter.len());
        dst.extend_from_slice(payload);
        dst.extend_from_slice(&self.delimiter);
    }
}

fn validate(delimiter: &[u8]) -> Result<()> {
    if delimiter.is_empty() {
        return Err(NetError::Config("delimiter must not be empty".into()));
    }
    Ok(())
}

impl Decoder for DelimitedCodec {
    type Item = DataContainer;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DataContainer>> {
        let first = self.delimiter[0];
        let width = self.delimiter.len();

        let mut i = self.next_index;
        while i < src.len() {
            if src[i] == first {
                let end = i + width;
                if end > src.len() {
                    // The rest of a possible delimiter has not arrived yet.
                    self.next_index = i;
                    return Ok(None);
                }
                if src[i..end] == self.delimiter[..] {
                    let frame = src.split_to(end);
                    self.next_index = 0;
                    let payload = frame.freeze().slice(..i);
                    let text = self.text.decode(&payload);
                    return Ok(Some(DataContainer::new(payload, text)));
                }
            }
            i += 1;
        }

        self.next_index = src.len();
        Ok(None)
    }
}

impl Encoder<&[u8]> for DelimitedCodec {
    type Error = NetError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.write_frame(item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FramingProtocol;

    fn crlf() -> FramingProtocol {
        FramingProtocol::delimited(TextCodec::Utf8, DEFAULT_DELIMITER).unwrap()
    }

    fn texts(messages: &[DataContainer]) -> Vec<&str> {
        messages.iter().map(|m| m.text()).collect()
    }

    #[test]
    fn test_format_appends_delimiter() {
        let wire = crlf().format_data(b"hello").unwrap();
        assert_eq!(&wire[..], b"hello\r\n");
    }

    #[test]
    fn test_delimiter_at_start_yields_empty_message() {
        let mut p = crlf();
        let messages = p.process_data(b"\r\nabc\r\n", 0).unwrap();
        assert_eq!(texts(&messages), vec!["", "abc"]);
        assert!(messages[0].is_empty());
    }

    #[test]
    fn test_message_split_across_reads() {
        let mut p = crlf();
        assert!(p.process_data(b"hel", 0).unwrap().is_empty());
        assert_eq!(p.pending(), b"hel");
        let messages = p.process_data(b"lo\r\nwor", 0).unwrap();
        assert_eq!(texts(&messages), vec!["hello"]);
        assert_eq!(p.pending(), b"wor");
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut p = crlf();
        assert!(p.process_data(b"abc\r", 0).unwrap().is_empty());
        assert_eq!(p.pending(), b"abc\r");
        let messages = p.process_data(b"\n", 0).unwrap();
        assert_eq!(texts(&messages), vec!["abc"]);
        assert!(p.pending().is_empty());
    }

    #[test]
    fn test_delimiter_byte_by_byte() {
        let mut p = FramingProtocol::delimited(TextCodec::Utf8, b"<END>").unwrap();
        let mut messages = Vec::new();
        for byte in b"data<END>" {
            messages.extend(p.process_data(&[*byte], 0).unwrap());
        }
        assert_eq!(texts(&messages), vec!["data"]);
        assert!(p.pending().is_empty());
    }

    #[test]
    fn test_partial_delimiter_inside_content() {
        let mut p = crlf();
        let messages = p.process_data(b"a\rb\r\n", 0).unwrap();
        assert_eq!(texts(&messages), vec!["a\rb"]);
    }

    #[test]
    fn test_partial_delimiter_at_read_end_then_mismatch() {
        let mut p = crlf();
        assert!(p.process_data(b"a\r", 0).unwrap().is_empty());
        assert!(p.process_data(b"b", 0).unwrap().is_empty());
        assert_eq!(p.pending(), b"a\rb");
        let messages = p.process_data(b"\r\n", 0).unwrap();
        assert_eq!(texts(&messages), vec!["a\rb"]);
    }

    #[test]
    fn test_overlapping_delimiter_prefix() {
        let mut p = FramingProtocol::delimited(TextCodec::Utf8, b"AAB").unwrap();
        let messages = p.process_data(b"xAAAByAAB", 0).unwrap();
        assert_eq!(texts(&messages), vec!["xA", "y"]);
    }

    #[test]
    fn test_many_messages_keep_order() {
        let mut p = FramingProtocol::delimited(TextCodec::Utf8, b"\n").unwrap();
        let messages = p.process_data(b"1\n2\n3\n4", 0).unwrap();
        assert_eq!(texts(&messages), vec!["1", "2", "3"]);
        assert_eq!(p.pending(), b"4");
    }

    #[test]
    fn test_container_owns_its_bytes() {
        let mut p = crlf();
        let mut read_buffer = b"abc\r\n".to_vec();
        let messages = p.process_data(&read_buffer, 0).unwrap();
        read_buffer.fill(0);
        assert_eq!(&messages[0].bytes()[..], b"abc");
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert!(DelimitedCodec::new(TextCodec::Utf8, b"").is_err());
        let mut codec = DelimitedCodec::new(TextCodec::Utf8, b"\n").unwrap();
        assert!(codec.set_delimiter(b"").is_err());
        assert_eq!(codec.delimiter(), b"\n");
    }
}
