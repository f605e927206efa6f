//! Receiving the DATA section: dot-unstuffing and terminator detection
//! without buffering the message.

const TERMINATOR: &[u8; 5] = b"\r\n.\r\n";

/// Turns the raw DATA stream into message content.
///
/// Bytes are fed in as they arrive. A dot at the start of a line is held
/// back until the next byte shows whether it starts the terminator
/// (`.\r\n`) or was stuffed, in which case it is dropped. The CRLF in front
/// of the terminator belongs to the message.
#[derive(Debug)]
pub(crate) struct DataReceiver {
    tail: [u8; 5],
    held: Held,
    done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    Nothing,
    Dot,
    DotCr,
}

impl DataReceiver {
    pub(crate) fn new() -> Self {
        Self {
            // The DATA command line itself ended with CRLF
            tail: [0, 0, 0, b'\r', b'\n'],
            held: Held::Nothing,
            done: false,
        }
    }

    /// Whether the terminator was seen
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Feed `input`, appending message content to `out`.
    ///
    /// Returns how many bytes of `input` were consumed. Consumption stops
    /// right after the terminator, anything behind it is left to the caller.
    pub(crate) fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize {
        for (index, &byte) in input.iter().enumerate() {
            if self.done {
                return index;
            }
            let line_start = self.tail[3..] == b"\r\n"[..];
            self.tail.rotate_left(1);
            self.tail[4] = byte;

            if &self.tail == TERMINATOR {
                self.held = Held::Nothing;
                self.done = true;
                return index + 1;
            }

            match self.held {
                Held::Nothing if byte == b'.' && line_start => self.held = Held::Dot,
                Held::Nothing => out.push(byte),
                Held::Dot if byte == b'\r' => self.held = Held::DotCr,
                Held::Dot => {
                    self.held = Held::Nothing;
                    out.push(byte);
                }
                Held::DotCr => {
                    self.held = Held::Nothing;
                    out.push(b'\r');
                    out.push(byte);
                }
            }
        }
        input.len()
    }
}
