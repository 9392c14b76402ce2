//! Line framing for the control link.
//!
//! Inbound bytes are cut on `\n`; a trailing `\r` is dropped and blank
//! lines are skipped. Partial lines stay buffered until the rest of the
//! line arrives, so a frame split across reads is still delivered whole.

use bytes::{Bytes, BytesMut};

use crate::error::PepTalkError;

/// Largest line the codec buffers before giving up on the stream.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Outbound line terminator.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Default)]
pub struct PepTalkCodec {
    /// Bytes already scanned for `\n` in the current buffer.
    scanned: usize,
}

impl PepTalkCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Drop the `\n` and at most one `\r` before it. Earlier `\r` bytes may
/// belong to a literal.
fn trim_line(mut line: BytesMut) -> BytesMut {
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
    }
    line
}

impl tokio_util::codec::Decoder for PepTalkCodec {
    type Item = Bytes;
    type Error = PepTalkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|&b| b == b'\n');
            let Some(offset) = newline else {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(PepTalkError::FrameTooLarge {
                        size: src.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let end = self.scanned + offset + 1;
            if end > MAX_FRAME_SIZE {
                return Err(PepTalkError::FrameTooLarge {
                    size: end,
                    max: MAX_FRAME_SIZE,
                });
            }
            self.scanned = 0;
            let line = trim_line(src.split_to(end));
            if !line.is_empty() {
                return Ok(Some(line.freeze()));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let line = trim_line(src.split_to(src.len()));
        Ok((!line.is_empty()).then(|| line.freeze()))
    }
}

impl tokio_util::codec::Encoder<String> for PepTalkCodec {
    type Error = PepTalkError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + LINE_TERMINATOR.len());
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(LINE_TERMINATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::{Decoder, Encoder, FramedRead};

    #[test]
    fn splits_multiple_frames_in_one_read() {
        let mut codec = PepTalkCodec::new();
        let mut buf = BytesMut::from(&b"1 ok\r\n\n* set /a carousel_status run\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), &b"1 ok"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            &b"* set /a carousel_status run"[..]
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut codec = PepTalkCodec::new();
        let mut buf = BytesMut::from(&b"2 prot"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ocol peptalk\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            &b"2 protocol peptalk"[..]
        );
    }

    #[test]
    fn oversized_line_is_an_error() {
        let mut codec = PepTalkCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_SIZE + 1].as_slice());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(PepTalkError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn oversized_terminated_line_is_an_error() {
        let mut codec = PepTalkCodec::new();
        let mut line = vec![b'x'; 3 * MAX_FRAME_SIZE];
        line.push(b'\n');
        let mut buf = BytesMut::from(line.as_slice());
        match codec.decode(&mut buf) {
            Err(PepTalkError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 3 * MAX_FRAME_SIZE + 1);
                assert_eq!(max, MAX_FRAME_SIZE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn line_at_the_limit_is_accepted() {
        let mut codec = PepTalkCodec::new();
        let mut line = vec![b'x'; MAX_FRAME_SIZE - 1];
        line.push(b'\n');
        let mut buf = BytesMut::from(line.as_slice());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), MAX_FRAME_SIZE - 1);
    }

    #[test]
    fn carriage_return_inside_trailing_literal_survives() {
        let mut codec = PepTalkCodec::new();
        let mut buf = BytesMut::from(&b"1 set /a v {1}\r\r\n"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, &b"1 set /a v {1}\r"[..]);

        let fields = crate::frame::tokenize(&frame).unwrap();
        assert_eq!(fields[4].as_bytes(), b"\r");
    }

    #[test]
    fn eof_flushes_unterminated_line() {
        let mut codec = PepTalkCodec::new();
        let mut buf = BytesMut::from(&b"3 ok"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), &b"3 ok"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_appends_terminator() {
        let mut codec = PepTalkCodec::new();
        let mut dst = BytesMut::new();
        codec.encode("1 protocol peptalk".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"1 protocol peptalk\r\n");
    }

    #[tokio::test]
    async fn reassembles_frames_across_reads() {
        let io = tokio_test::io::Builder::new()
            .read(b"1 protocol pep")
            .read(b"talk\n* set /c active_A E1\n* cha")
            .read(b"nged E1 carousel_status\n")
            .build();
        let frames: Vec<Bytes> = FramedRead::new(io, PepTalkCodec::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"1 protocol peptalk"),
                Bytes::from_static(b"* set /c active_A E1"),
                Bytes::from_static(b"* changed E1 carousel_status"),
            ]
        );
    }
}
