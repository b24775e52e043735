//! Message framing over byte streams
//!
//! A [`FramingProtocol`] turns outgoing payloads into wire bytes and
//! reassembles incoming reads into [`DataContainer`]s. Reads may split a
//! message or merge several; any incomplete trailing frame is retained and
//! completed by the next call to [`FramingProtocol::process_data`].
//!
//! The three wire formats are also exposed as `tokio_util` codecs
//! ([`StreamingCodec`], [`DelimitedCodec`], [`FixedSizeCodec`]) so they can be
//! used with `FramedRead`/`FramedWrite` directly.

pub mod delimited;
pub mod fixed_size;
pub mod streaming;

pub use delimited::{DEFAULT_DELIMITER, DelimitedCodec};
pub use fixed_size::FixedSizeCodec;
pub use streaming::StreamingCodec;

use crate::common::{ClientId, DataContainer, TextCodec};
use crate::{NetError, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Wire format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolType {
    /// No framing: one read is one message
    Streaming,
    /// Messages terminated by a delimiter byte sequence
    #[default]
    Delimited,
    /// Messages of a fixed byte width
    FixedSize,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolType::Streaming => write!(f, "streaming"),
            ProtocolType::Delimited => write!(f, "delimited"),
            ProtocolType::FixedSize => write!(f, "fixed-size"),
        }
    }
}

#[derive(Debug)]
enum Codec {
    Streaming(StreamingCodec),
    Delimited(DelimitedCodec),
    FixedSize(FixedSizeCodec),
}

/// Stateful framing for one connection
///
/// # Examples
///
/// ```
/// use netframe::{FramingProtocol, TextCodec};
///
/// let mut protocol = FramingProtocol::delimited(TextCodec::Utf8, b"\r\n").unwrap();
/// let wire = protocol.format_data(b"PING").unwrap();
/// assert_eq!(&wire[..], b"PING\r\n");
///
/// let messages = protocol.process_data(b"PING\r\nPO", 0).unwrap();
/// assert_eq!(messages.len(), 1);
/// assert_eq!(messages[0].text(), "PING");
/// assert_eq!(protocol.pending(), b"PO");
/// ```
#[derive(Debug)]
pub struct FramingProtocol {
    codec: Codec,
    retained: BytesMut,
}

impl FramingProtocol {
    /// Builds a protocol from configuration values.
    ///
    /// `delimiter` is only read for [`ProtocolType::Delimited`] and
    /// `frame_size` only for [`ProtocolType::FixedSize`].
    pub fn from_config(
        protocol: ProtocolType,
        text: TextCodec,
        delimiter: &[u8],
        frame_size: usize,
    ) -> Result<Self> {
        match protocol {
            ProtocolType::Streaming => Ok(Self::streaming(text)),
            ProtocolType::Delimited => Self::delimited(text, delimiter),
            ProtocolType::FixedSize => Self::fixed_size(text, frame_size),
        }
    }

    pub fn streaming(text: TextCodec) -> Self {
        Self::with_codec(Codec::Streaming(StreamingCodec::new(text)))
    }

    /// Delimited framing; fails on an empty delimiter
    pub fn delimited(text: TextCodec, delimiter: &[u8]) -> Result<Self> {
        Ok(Self::with_codec(Codec::Delimited(DelimitedCodec::new(
            text, delimiter,
        )?)))
    }

    /// Fixed-size framing; fails on a zero frame size
    pub fn fixed_size(text: TextCodec, frame_size: usize) -> Result<Self> {
        Ok(Self::with_codec(Codec::FixedSize(FixedSizeCodec::new(
            text, frame_size,
        )?)))
    }

    fn with_codec(codec: Codec) -> Self {
        Self {
            codec,
            retained: BytesMut::new(),
        }
    }

    /// A protocol with the same configuration and no retained bytes
    pub fn fresh(&self) -> Self {
        let codec = match &self.codec {
            Codec::Streaming(c) => Codec::Streaming(c.clone()),
            Codec::Delimited(c) => Codec::Delimited(c.fresh()),
            Codec::FixedSize(c) => Codec::FixedSize(c.clone()),
        };
        Self::with_codec(codec)
    }

    pub fn protocol_type(&self) -> ProtocolType {
        match self.codec {
            Codec::Streaming(_) => ProtocolType::Streaming,
            Codec::Delimited(_) => ProtocolType::Delimited,
            Codec::FixedSize(_) => ProtocolType::FixedSize,
        }
    }

    pub fn text_codec(&self) -> TextCodec {
        match &self.codec {
            Codec::Streaming(c) => c.text_codec(),
            Codec::Delimited(c) => c.text_codec(),
            Codec::FixedSize(c) => c.text_codec(),
        }
    }

    /// Bytes of an incomplete frame carried over to the next read
    pub fn pending(&self) -> &[u8] {
        &self.retained
    }

    /// Wraps a payload in this protocol's wire format
    pub fn format_data(&self, payload: &[u8]) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(payload.len() + 4);
        match &self.codec {
            Codec::Streaming(c) => c.write_frame(payload, &mut dst),
            Codec::Delimited(c) => c.write_frame(payload, &mut dst),
            Codec::FixedSize(c) => c.write_frame(payload, &mut dst)?,
        }
        Ok(dst.freeze())
    }

    /// Encodes text with the protocol's codec, then formats it
    pub fn format_text(&self, text: &str) -> Result<Bytes> {
        self.format_data(&self.text_codec().encode(text))
    }

    /// Feeds one read into the protocol and returns every message it
    /// completed, in wire order.
    ///
    /// After this returns, [`pending`](Self::pending) holds exactly the
    /// unconsumed suffix of the input, which never contains a complete frame.
    pub fn process_data(&mut self, data: &[u8], client_id: ClientId) -> Result<Vec<DataContainer>> {
        self.retained.extend_from_slice(data);
        let mut containers = Vec::new();
        loop {
            let next = match &mut self.codec {
                Codec::Streaming(c) => c.decode(&mut self.retained)?,
                Codec::Delimited(c) => c.decode(&mut self.retained)?,
                Codec::FixedSize(c) => c.decode(&mut self.retained)?,
            };
            match next {
                Some(container) => containers.push(container),
                None => break,
            }
        }
        trace!(
            client_id,
            read = data.len(),
            messages = containers.len(),
            retained = self.retained.len(),
            "Processed data"
        );
        Ok(containers)
    }

    /// Current delimiter; only valid for the delimited protocol
    pub fn delimiter(&self) -> Result<&[u8]> {
        match &self.codec {
            Codec::Delimited(c) => Ok(c.delimiter()),
            _ => Err(self.mismatch(ProtocolType::Delimited)),
        }
    }

    /// Replaces the delimiter.
    ///
    /// Fails on a non-delimited protocol, on an empty delimiter, and while a
    /// partial frame is pending (it was scanned against the old delimiter).
    pub fn set_delimiter(&mut self, delimiter: &[u8]) -> Result<()> {
        let actual = self.protocol_type();
        let Codec::Delimited(codec) = &mut self.codec else {
            return Err(NetError::ProtocolMismatch {
                expected: ProtocolType::Delimited,
                actual,
            });
        };
        if !self.retained.is_empty() {
            return Err(NetError::Config(format!(
                "cannot change the delimiter while {} bytes of a partial frame are pending",
                self.retained.len()
            )));
        }
        codec.set_delimiter(delimiter)
    }

    /// Frame width; only valid for the fixed-size protocol
    pub fn frame_size(&self) -> Result<usize> {
        match &self.codec {
            Codec::FixedSize(c) => Ok(c.frame_size()),
            _ => Err(self.mismatch(ProtocolType::FixedSize)),
        }
    }

    fn mismatch(&self, expected: ProtocolType) -> NetError {
        NetError::ProtocolMismatch {
            expected,
            actual: self.protocol_type(),
        }
    }
}

impl Encoder<&[u8]> for FramingProtocol {
    type Error = NetError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        let frame = self.format_data(item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
