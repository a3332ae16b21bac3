//! Tagged log lines, written to whatever sink the board registers.
//!
//! Lines take the form `ESC[{color}m{tag:8}ESC[0m: {message}` so that the
//! serial log tooling can split them back into tag and message.

use core::fmt::{self, Write};

use spin::Once;

/// Destination for log output, usually a serial port or the USB console
pub trait LogSink: Sync {
    fn write_line(&self, args: fmt::Arguments);
}

static SINK: Once<&'static dyn LogSink> = Once::new();

/// Install the sink used by every `TaggedLogger`. Only the first call has
/// any effect. Until a sink is set, log lines are dropped.
pub fn set_sink(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

pub struct TaggedLogger {
    tag: [u8; 8],
    color: u8,
}

impl TaggedLogger {
    pub const fn new(tag_str: &str, color: u8) -> Self {
        let tag_bytes = tag_str.as_bytes();
        let mut tag = [0x20u8; 8];
        let copy_len = if tag_bytes.len() < 8 {
            tag_bytes.len()
        } else {
            8
        };
        // copy_from_slice is not usable in const fn
        let mut i = 0;
        while i < copy_len {
            tag[i] = tag_bytes[i];
            i += 1;
        }
        TaggedLogger { tag, color }
    }

    pub fn tag(&self) -> &str {
        core::str::from_utf8(&self.tag).unwrap_or("????????")
    }

    pub fn log(&self, args: fmt::Arguments) {
        if let Some(sink) = SINK.get() {
            sink.write_line(format_args!(
                "\x1b[{}m{}\x1b[0m: {}",
                self.color,
                self.tag(),
                args
            ));
        }
    }

    /// Format a line into any writer, for sinks that buffer
    pub fn render<W: Write>(&self, out: &mut W, args: fmt::Arguments) -> fmt::Result {
        write!(out, "\x1b[{}m{}\x1b[0m: {}", self.color, self.tag(), args)
    }
}
