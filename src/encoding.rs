//! Encoded line reading over raw files.
//!
//! Every supported encoding is presented through the same interface: open a
//! file, consume its byte-order mark once, then pull successive logical lines
//! with exact byte positions. Positions are what the newline index and the
//! task offsets are built from, so decoding never happens through a buffered
//! text layer that would hide them.
//!
//! Supported encodings:
//! - **UTF-8** with an optional `EF BB BF` BOM,
//! - **UTF-16** with a mandatory BOM (`FF FE` little-endian, `FE FF`
//!   big-endian) and an even file size,
//! - **WINDOWS-1252**, transcoded per line through a resident converter.

use anyhow::{Context, Result, bail};
use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// Encoding tag carried on tasks and parsed from the CLI. UTF-16 endianness
/// is not part of the tag; the reader resolves it from the BOM at open time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16,
    Win1252,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF8",
            TextEncoding::Utf16 => "UTF16",
            TextEncoding::Win1252 => "WIN1252",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEncoding {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "UTF8" | "UTF-8" => Ok(TextEncoding::Utf8),
            "UTF16" | "UTF-16" => Ok(TextEncoding::Utf16),
            "WIN1252" | "WINDOWS-1252" | "CP1252" => Ok(TextEncoding::Win1252),
            _ => bail!("invalid encoding name: {value:?}"),
        }
    }
}

/// Detect an encoding from the file's BOM. `FF FE` / `FE FF` mean UTF-16,
/// `EF BB BF` means UTF-8, anything else falls back to UTF-8. An explicit
/// CLI flag always wins over this.
pub fn sniff(path: &Path) -> Result<TextEncoding> {
    let mut file =
        File::open(path).with_context(|| format!("open {} for sniffing", path.display()))?;
    let mut bom = [0u8; 3];
    let n = file.read(&mut bom)?;
    if n >= 2 && (bom[..2] == [0xFF, 0xFE] || bom[..2] == [0xFE, 0xFF]) {
        return Ok(TextEncoding::Utf16);
    }
    Ok(TextEncoding::Utf8)
}

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Clone, Copy, Debug)]
enum Decoder {
    Utf8,
    Utf16 { big_endian: bool },
    Win1252,
}

/// A file handle that yields decoded lines and exact byte positions.
///
/// `read_line` strips the `\n` terminator (a `\r` before it is left for the
/// tokenizer's `EAT_CRNL` state to discard). After each successful read,
/// [`pos`](Self::pos) is the byte offset immediately past the terminator, or
/// the end of file for an unterminated final line.
pub struct EncodedReader {
    inner: BufReader<File>,
    decoder: Decoder,
    /// Absolute byte offset of the next unread byte.
    pos: u64,
    len: u64,
    /// Offset just past the BOM; the first record starts here.
    data_start: u64,
    /// Scratch for byte-oriented decoders, reused across lines.
    raw: Vec<u8>,
    /// Scratch for UTF-16 code units, reused across lines.
    units: Vec<u16>,
}

impl EncodedReader {
    /// Open `path`, consume the BOM, and position the reader at the first
    /// record. Fails on a missing or malformed UTF-16 BOM and on odd-sized
    /// UTF-16 files.
    pub fn open(path: &Path, encoding: TextEncoding) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let len = file.metadata()?.len();
        let mut inner = BufReader::new(file);

        let (decoder, data_start) = match encoding {
            TextEncoding::Utf8 => {
                let mut bom = [0u8; 3];
                let start = if len >= 3 {
                    inner.read_exact(&mut bom)?;
                    if bom == UTF8_BOM {
                        3
                    } else {
                        inner.seek(SeekFrom::Start(0))?;
                        0
                    }
                } else {
                    0
                };
                (Decoder::Utf8, start)
            }
            TextEncoding::Utf16 => {
                if len % 2 != 0 {
                    bail!(
                        "{}: UTF-16 file has odd size {len}",
                        path.display()
                    );
                }
                let mut bom = [0u8; 2];
                inner
                    .read_exact(&mut bom)
                    .with_context(|| format!("{}: reading UTF-16 BOM", path.display()))?;
                let big_endian = match bom {
                    [0xFF, 0xFE] => false,
                    [0xFE, 0xFF] => true,
                    _ => bail!(
                        "{}: missing or invalid UTF-16 BOM ({:02X} {:02X})",
                        path.display(),
                        bom[0],
                        bom[1]
                    ),
                };
                (Decoder::Utf16 { big_endian }, 2)
            }
            TextEncoding::Win1252 => (Decoder::Win1252, 0),
        };

        Ok(Self {
            inner,
            decoder,
            pos: data_start,
            len,
            data_start,
            raw: Vec::with_capacity(4096),
            units: Vec::with_capacity(2048),
        })
    }

    /// Byte offset of the next unread byte.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Byte offset immediately past the BOM.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.len
    }

    /// Reposition to an absolute byte offset (a record boundary from the
    /// newline index).
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    /// Read the next logical line into `line` (cleared first), stripping the
    /// terminator. Returns `false` at end of file with nothing read.
    pub fn read_line(&mut self, line: &mut String) -> Result<bool> {
        line.clear();
        match self.decoder {
            Decoder::Utf8 => self.read_line_utf8(line),
            Decoder::Utf16 { big_endian } => self.read_line_utf16(line, big_endian),
            Decoder::Win1252 => self.read_line_win1252(line),
        }
    }

    fn fill_raw_line(&mut self) -> Result<bool> {
        self.raw.clear();
        let n = self.inner.read_until(b'\n', &mut self.raw)?;
        if n == 0 {
            return Ok(false);
        }
        self.pos += n as u64;
        if self.raw.last() == Some(&b'\n') {
            self.raw.pop();
        }
        Ok(true)
    }

    fn read_line_utf8(&mut self, line: &mut String) -> Result<bool> {
        if !self.fill_raw_line()? {
            return Ok(false);
        }
        let text = std::str::from_utf8(&self.raw)
            .with_context(|| format!("invalid UTF-8 near byte {}", self.pos))?;
        line.push_str(text);
        Ok(true)
    }

    fn read_line_win1252(&mut self, line: &mut String) -> Result<bool> {
        if !self.fill_raw_line()? {
            return Ok(false);
        }
        // WINDOWS-1252 maps every byte, so this decode cannot fail.
        let (text, _, _) = WINDOWS_1252.decode(&self.raw);
        line.push_str(&text);
        Ok(true)
    }

    fn read_line_utf16(&mut self, line: &mut String, big_endian: bool) -> Result<bool> {
        self.units.clear();
        loop {
            let mut pair = [0u8; 2];
            match read_full(&mut self.inner, &mut pair)? {
                0 => break,
                2 => {}
                _ => bail!("short read mid UTF-16 code unit at byte {}", self.pos),
            }
            self.pos += 2;
            let unit = if big_endian {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            };
            if unit == 0x000A {
                let decoded = decode_units(&self.units, self.pos)?;
                line.push_str(&decoded);
                return Ok(true);
            }
            self.units.push(unit);
        }
        if self.units.is_empty() {
            return Ok(false);
        }
        let decoded = decode_units(&self.units, self.pos)?;
        line.push_str(&decoded);
        Ok(true)
    }
}

fn decode_units(units: &[u16], pos: u64) -> Result<String> {
    char::decode_utf16(units.iter().copied())
        .collect::<Result<String, _>>()
        .with_context(|| format!("unpaired UTF-16 surrogate before byte {pos}"))
}

/// `read_exact` that tolerates EOF at a boundary: returns the number of
/// bytes actually read (0, or the buffer length, or a short count at EOF).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
