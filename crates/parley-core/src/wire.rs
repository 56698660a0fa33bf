//! Wire conventions
//!
//! Text travels as raw UTF-8 with no length prefix. Control frames are
//! wrapped in DLE bytes (`DLE word DLE`), and every DLE inside text is sent
//! doubled, so no ordinary message can be mistaken for a control frame.
//!
//! TCP does not keep write boundaries: one read can carry several frames, or
//! end in the middle of a frame or of a UTF-8 sequence. [`FrameDecoder`] keeps
//! the unfinished tail of each read and completes it with the next one.

use core::str::Utf8Error;

/// Opens and closes every control frame (ASCII DLE)
pub const CONTROL_MARKER: u8 = 0x10;

/// Longest control word the decoder waits for before giving up on a frame
const MAX_CONTROL_WORD: usize = 16;

const QUIT_WORD: &[u8] = b"quit";
const TYPING_WORD: &[u8] = b"typing";

/// A unit of traffic in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// User text
    Text(String),
    /// The peer is composing a message
    Typing,
    /// The peer is ending the session
    Quit,
}

/// Reasons inbound bytes could not be turned into a [`Frame`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    #[error("Unknown control word: {0:?}")]
    UnknownControl(String),

    #[error("Control frame is not terminated")]
    UnterminatedControl,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    /// Encode the frame into the bytes written to the socket
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Text(text) => {
                let bytes = text.as_bytes();
                let markers = bytes.iter().filter(|&&b| b == CONTROL_MARKER).count();
                let mut encoded = Vec::with_capacity(bytes.len() + markers);
                for &b in bytes {
                    if b == CONTROL_MARKER {
                        encoded.push(CONTROL_MARKER);
                    }
                    encoded.push(b);
                }
                encoded
            }
            Frame::Typing => control(TYPING_WORD),
            Frame::Quit => control(QUIT_WORD),
        }
    }
}

fn control(word: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(word.len() + 2);
    bytes.push(CONTROL_MARKER);
    bytes.extend_from_slice(word);
    bytes.push(CONTROL_MARKER);
    bytes
}

fn control_frame(word: &[u8]) -> Result<Frame, DecodeError> {
    match word {
        QUIT_WORD => Ok(Frame::Quit),
        TYPING_WORD => Ok(Frame::Typing),
        other => Err(DecodeError::UnknownControl(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

// ----------------------------------------------------------------------------
// Stream Decoder
// ----------------------------------------------------------------------------

/// Splits a received byte stream back into frames
///
/// One decoder per listen socket. Bytes that cannot be decoded yet (a control
/// frame or a UTF-8 sequence cut by the read boundary) are held until the
/// next call to [`FrameDecoder::decode`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back from earlier reads
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Decode one received chunk, in order. Text runs between control frames
    /// come out as one [`Frame::Text`] each.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<Frame, DecodeError>> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut text = Vec::new();
        let mut i = 0;

        while i < buf.len() {
            if buf[i] != CONTROL_MARKER {
                text.push(buf[i]);
                i += 1;
                continue;
            }

            match buf.get(i + 1) {
                None => break,
                Some(&CONTROL_MARKER) => {
                    text.push(CONTROL_MARKER);
                    i += 2;
                }
                Some(_) => {
                    let word_start = i + 1;
                    let search_end = buf.len().min(word_start + MAX_CONTROL_WORD + 1);
                    match buf[word_start..search_end]
                        .iter()
                        .position(|&b| b == CONTROL_MARKER)
                    {
                        Some(len) => {
                            flush_text(&mut text, &mut frames);
                            frames.push(control_frame(&buf[word_start..word_start + len]));
                            i = word_start + len + 1;
                        }
                        None if search_end == buf.len()
                            && buf.len() - word_start <= MAX_CONTROL_WORD =>
                        {
                            break
                        }
                        None => {
                            // Skip the stray marker and read on as text.
                            flush_text(&mut text, &mut frames);
                            frames.push(Err(DecodeError::UnterminatedControl));
                            i += 1;
                        }
                    }
                }
            }
        }

        let held = buf.split_off(i);
        if held.is_empty() {
            self.pending = hold_utf8_tail(&mut text);
        } else {
            self.pending = held;
        }
        flush_text(&mut text, &mut frames);
        frames
    }
}

/// Move an incomplete trailing UTF-8 sequence out of `text`
fn hold_utf8_tail(text: &mut Vec<u8>) -> Vec<u8> {
    match core::str::from_utf8(text) {
        Err(e) if e.error_len().is_none() => text.split_off(e.valid_up_to()),
        _ => Vec::new(),
    }
}

fn flush_text(text: &mut Vec<u8>, frames: &mut Vec<Result<Frame, DecodeError>>) {
    if text.is_empty() {
        return;
    }
    let bytes = std::mem::take(text);
    frames.push(
        String::from_utf8(bytes)
            .map(Frame::Text)
            .map_err(|e| DecodeError::InvalidUtf8(e.utf8_error())),
    );
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all<C: AsRef<[u8]>>(chunks: &[C]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let frames = chunks
            .iter()
            .flat_map(|chunk| decoder.decode(chunk.as_ref()))
            .map(|frame| frame.expect("frame should decode"))
            .collect();
        assert!(decoder.pending().is_empty());
        frames
    }

    #[test]
    fn test_plain_text_is_sent_verbatim() {
        assert_eq!(Frame::text("hello\n").encode(), b"hello\n".to_vec());
        assert_eq!(decode_all(&[b"hello\n"]), vec![Frame::text("hello\n")]);
    }

    #[test]
    fn test_sentinel_lookalike_text_stays_text() {
        // Words that earlier versions treated as commands are plain text here.
        for text in ["/q", "[typing]", "quit", "typing"] {
            let encoded = Frame::text(text).encode();
            assert_eq!(decode_all(&[&encoded]), vec![Frame::text(text)]);
        }
    }

    #[test]
    fn test_markers_in_text_are_escaped() {
        let text = "\u{10}quit\u{10} and \u{10}";
        let encoded = Frame::text(text).encode();
        assert_eq!(encoded[..2], [CONTROL_MARKER, CONTROL_MARKER]);
        assert_eq!(decode_all(&[&encoded]), vec![Frame::text(text)]);
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::Quit.encode(), b"\x10quit\x10".to_vec());
        assert_eq!(Frame::Typing.encode(), b"\x10typing\x10".to_vec());
        assert_eq!(
            decode_all(&[&Frame::Quit.encode(), &Frame::Typing.encode()]),
            vec![Frame::Quit, Frame::Typing]
        );
    }

    #[test]
    fn test_merged_frames_are_split_in_order() {
        let mut wire = Frame::Typing.encode();
        wire.extend(Frame::text("hello\n").encode());
        wire.extend(Frame::Quit.encode());

        assert_eq!(
            decode_all(&[&wire]),
            vec![Frame::Typing, Frame::text("hello\n"), Frame::Quit]
        );
    }

    #[test]
    fn test_text_then_quit_in_one_chunk() {
        assert_eq!(
            decode_all(&[b"hello\n\x10quit\x10"]),
            vec![Frame::text("hello\n"), Frame::Quit]
        );
    }

    #[test]
    fn test_control_frame_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(b"hi\x10ty").iter().all(|f| f.is_ok()));
        assert_eq!(decoder.pending(), b"\x10ty");

        let frames = decoder.decode(b"ping\x10");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::Typing);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_lone_trailing_marker_waits_for_next_read() {
        let text = "a\u{10}b";
        let encoded = Frame::text(text).encode();
        let (head, tail) = encoded.split_at(2);
        assert_eq!(head, b"a\x10");

        let joined: String = decode_all(&[head, tail])
            .into_iter()
            .map(|frame| match frame {
                Frame::Text(text) => text,
                other => panic!("unexpected frame {:?}", other),
            })
            .collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_utf8_sequence_split_across_reads() {
        let bytes = "caf\u{e9}!".as_bytes();
        let (head, tail) = bytes.split_at(4);

        let mut decoder = FrameDecoder::new();
        let first = decoder.decode(head);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().unwrap(), &Frame::text("caf"));
        assert_eq!(decoder.pending().len(), 1);

        let second = decoder.decode(tail);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap(), &Frame::text("\u{e9}!"));
    }

    #[test]
    fn test_unknown_control_word_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.decode(b"\x10reboot\x10after");
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0],
            Err(DecodeError::UnknownControl(word)) if word == "reboot"
        ));
        assert_eq!(frames[1].as_ref().unwrap(), &Frame::text("after"));
    }

    #[test]
    fn test_unterminated_control_falls_back_to_text() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.decode(b"\x10this is far too long for a control word");
        assert!(matches!(frames[0], Err(DecodeError::UnterminatedControl)));
        assert_eq!(
            frames[1].as_ref().unwrap(),
            &Frame::text("this is far too long for a control word")
        );
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.decode(&[0x68, 0xff, 0xfe]);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(DecodeError::InvalidUtf8(_))));
        assert!(decoder.pending().is_empty());
    }
}
