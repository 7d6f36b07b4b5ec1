//! JSON Lines encoding.
//!
//! Records are written in the pipeline's canonical JSON style: `", "`
//! between items, `": "` after keys, and non-ASCII characters escaped as
//! `\uXXXX` (UTF-16 surrogate pairs above the BMP). Numbers parsed from input
//! keep their original text. Floats built in code use serde_json's shortest
//! form, so an exponent may differ from other targets (`1e22`, not `1e+22`).
//!
//! ```text
//! {"a":1,"b":[1,2],"c":"é"}  ->  {"a": 1, "b": [1, 2], "c": "é"}
//! ```

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use std::io::{self, Write};

/// Initial capacity of a line buffer
const LINE_CAPACITY: usize = 256;

/// serde_json formatter for the canonical JSON style
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineFormatter;

impl Formatter for PipelineFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }

        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Encode one record as a JSON line, trailing `\n` included
pub fn encode_line<T>(record: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::with_capacity(LINE_CAPACITY);
    let mut serializer = Serializer::with_formatter(&mut buf, PipelineFormatter);
    record.serialize(&mut serializer)?;
    buf.push(b'\n');

    debug_assert!(
        !buf[..buf.len() - 1].contains(&b'\n'),
        "Postcondition: an encoded record must occupy exactly one line"
    );
    Ok(buf)
}
