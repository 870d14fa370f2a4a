//! Allocation-free diagnostics.
//!
//! Messages are formatted into a fixed-size buffer on the stack, then handed to the `Platform` in one piece. Overly
//! long messages are truncated.

use core::fmt::{self, Write};

use crate::Platform;

/// Prefix of all diagnostics.
pub(crate) const PREFIX: &str = "<arenalloc>: ";

const CAPACITY: usize = 512;

/// A message, formatted on the stack.
///
/// Writing never fails: overly long messages are truncated on a character boundary.
pub struct Message {
    buffer: [u8; CAPACITY],
    length: usize,
}

impl Message {
    /// Creates an empty message.
    pub const fn new() -> Self { Self { buffer: [0; CAPACITY], length: 0 } }

    /// Returns the formatted message.
    pub fn as_str(&self) -> &str {
        //  Only whole characters are ever copied in, see `write_str`.
        core::str::from_utf8(&self.buffer[..self.length]).unwrap_or("")
    }
}

impl Default for Message {
    fn default() -> Self { Self::new() }
}

impl Write for Message {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = CAPACITY - self.length;

        let mut count = core::cmp::min(room, s.len());
        while !s.is_char_boundary(count) {
            count -= 1;
        }

        self.buffer[self.length..self.length + count].copy_from_slice(&s.as_bytes()[..count]);
        self.length += count;

        Ok(())
    }
}

/// Displays raw bytes, such as configuration keys, replacing non-ASCII bytes.
pub(crate) struct Bytes<'a>(pub(crate) &'a [u8]);

impl fmt::Display for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii() && !byte.is_ascii_control() { *byte as char } else { '?' };
            f.write_char(c)?;
        }

        Ok(())
    }
}

/// Writes a prefixed, newline-terminated, diagnostic.
#[cold]
#[inline(never)]
pub(crate) fn report<P: Platform>(platform: &P, args: fmt::Arguments<'_>) {
    let mut message = Message::new();

    //  Writing into a `Message` never fails, it truncates.
    let _ = message.write_str(PREFIX);
    let _ = message.write_fmt(args);
    let _ = message.write_str("\n");

    platform.write_diagnostic(message.as_str());
}

/// Writes a newline-terminated line, without prefix.
#[cold]
pub(crate) fn line<P: Platform>(platform: &P, args: fmt::Arguments<'_>) {
    let mut message = Message::new();

    let _ = message.write_fmt(args);
    let _ = message.write_str("\n");

    platform.write_diagnostic(message.as_str());
}

/// Writes a diagnostic, see `report`.
macro_rules! diagnostic {
    ($platform:expr, $($arg:tt)*) => {
        $crate::internals::diagnostics::report($platform, format_args!($($arg)*))
    };
}

pub(crate) use diagnostic;
