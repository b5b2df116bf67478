//! Pickle-protocol-3 serializer for object pages.
//!
//! The body of an `|O` page is a pickle stream that reconstructs a 1-D
//! numpy object array: a fixed prelude (modulo the embedded element count),
//! one serialized scalar per row, and a fixed suffix. Only these opcodes are
//! ever emitted; nothing reads the stream back here, a reference unpickler
//! does.
//!
//! Memoization follows the reference pickler: GLOBALs, bytes payloads,
//! strings, tuples, REDUCE results and the element list get a BINPUT (or
//! LONG_BINPUT past index 255) from a per-file counter; ints, floats, bools
//! and None are not memoized. The stream never emits a memo read, so the
//! counter only has to be self-consistent.

use anyhow::Result;
use std::io::Write;

use crate::datatypes::{Date, DateTime, Time, Value};

const PROTO: u8 = 0x80;
const GLOBAL: u8 = b'c';
const BINPUT: u8 = b'q';
const LONG_BINPUT: u8 = b'r';
const BININT: u8 = b'J';
const BININT1: u8 = b'K';
const BININT2: u8 = b'M';
const LONG1: u8 = 0x8A;
const NONE: u8 = b'N';
const NEWTRUE: u8 = 0x88;
const NEWFALSE: u8 = 0x89;
const BINFLOAT: u8 = b'G';
const BINUNICODE: u8 = b'X';
const SHORT_BINBYTES: u8 = b'C';
const TUPLE: u8 = b't';
const TUPLE1: u8 = 0x85;
const TUPLE2: u8 = 0x86;
const TUPLE3: u8 = 0x87;
const EMPTY_LIST: u8 = b']';
const APPENDS: u8 = b'e';
const MARK: u8 = b'(';
const REDUCE: u8 = b'R';
const BUILD: u8 = b'b';
const STOP: u8 = b'.';

fn put<W: Write>(w: &mut W, memo: &mut u32) -> Result<()> {
    if *memo <= 255 {
        w.write_all(&[BINPUT, *memo as u8])?;
    } else {
        w.write_all(&[LONG_BINPUT])?;
        w.write_all(&memo.to_le_bytes())?;
    }
    *memo += 1;
    Ok(())
}

fn global<W: Write>(w: &mut W, memo: &mut u32, module: &str, name: &str) -> Result<()> {
    w.write_all(&[GLOBAL])?;
    w.write_all(module.as_bytes())?;
    w.write_all(b"\n")?;
    w.write_all(name.as_bytes())?;
    w.write_all(b"\n")?;
    put(w, memo)
}

fn binint<W: Write>(w: &mut W, value: i32) -> Result<()> {
    w.write_all(&[BININT])?;
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn binunicode<W: Write>(w: &mut W, memo: &mut u32, s: &str) -> Result<()> {
    w.write_all(&[BINUNICODE])?;
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    put(w, memo)
}

fn short_binbytes<W: Write>(w: &mut W, memo: &mut u32, bytes: &[u8]) -> Result<()> {
    debug_assert!(bytes.len() <= 255);
    w.write_all(&[SHORT_BINBYTES, bytes.len() as u8])?;
    w.write_all(bytes)?;
    put(w, memo)
}

fn tuple1<W: Write>(w: &mut W, memo: &mut u32) -> Result<()> {
    w.write_all(&[TUPLE1])?;
    put(w, memo)
}

fn tuple2<W: Write>(w: &mut W, memo: &mut u32) -> Result<()> {
    w.write_all(&[TUPLE2])?;
    put(w, memo)
}

fn tuple3<W: Write>(w: &mut W, memo: &mut u32) -> Result<()> {
    w.write_all(&[TUPLE3])?;
    put(w, memo)
}

fn reduce<W: Write>(w: &mut W, memo: &mut u32) -> Result<()> {
    w.write_all(&[REDUCE])?;
    put(w, memo)
}

/// Stream prelude: everything up to (and including) the MARK that opens the
/// element list. `n` is the element count embedded in the array shape; with
/// `n == 0` no MARK is opened and the suffix emits no APPENDS.
pub fn write_prelude<W: Write>(w: &mut W, memo: &mut u32, n: usize) -> Result<()> {
    w.write_all(&[PROTO, 3])?;
    global(w, memo, "numpy.core.multiarray", "_reconstruct")?;
    global(w, memo, "numpy", "ndarray")?;
    binint(w, 0)?;
    tuple1(w, memo)?;
    short_binbytes(w, memo, b"b")?;
    tuple3(w, memo)?;
    reduce(w, memo)?;
    w.write_all(&[MARK])?;
    binint(w, 1)?;
    binint(w, n as i32)?;
    tuple1(w, memo)?;
    global(w, memo, "numpy", "dtype")?;
    binunicode(w, memo, "O8")?;
    w.write_all(&[NEWFALSE, NEWTRUE])?;
    tuple3(w, memo)?;
    reduce(w, memo)?;
    w.write_all(&[MARK])?;
    binint(w, 3)?;
    binunicode(w, memo, "|")?;
    w.write_all(&[NONE, NONE, NONE])?;
    binint(w, -1)?;
    binint(w, -1)?;
    binint(w, 63)?;
    w.write_all(&[TUPLE])?;
    put(w, memo)?;
    w.write_all(&[BUILD, NEWFALSE])?;
    w.write_all(&[EMPTY_LIST])?;
    put(w, memo)?;
    if n > 0 {
        w.write_all(&[MARK])?;
    }
    Ok(())
}

/// Stream suffix: close the element list, finish the array state tuple,
/// BUILD, STOP.
pub fn write_suffix<W: Write>(w: &mut W, n: usize) -> Result<()> {
    if n > 0 {
        w.write_all(&[APPENDS])?;
    }
    w.write_all(&[TUPLE, BUILD, STOP])?;
    Ok(())
}

/// Serialize one scalar element.
pub fn write_value<W: Write>(w: &mut W, memo: &mut u32, value: &Value<'_>) -> Result<()> {
    match value {
        Value::None => w.write_all(&[NONE]).map_err(Into::into),
        Value::Bool(true) => w.write_all(&[NEWTRUE]).map_err(Into::into),
        Value::Bool(false) => w.write_all(&[NEWFALSE]).map_err(Into::into),
        Value::Int(i) => write_int(w, *i),
        Value::Float(f) => {
            w.write_all(&[BINFLOAT])?;
            w.write_all(&f.to_be_bytes())?;
            Ok(())
        }
        Value::Str(s) => binunicode(w, memo, s),
        Value::Date(date) => write_date(w, memo, date),
        Value::Time(time) => write_time(w, memo, time),
        Value::DateTime(dt) => write_datetime(w, memo, dt),
    }
}

/// Shortest integer form: BININT1 (u8), BININT2 (u16), BININT (i32), then
/// LONG1 with minimal little-endian two's complement.
fn write_int<W: Write>(w: &mut W, value: i64) -> Result<()> {
    if (0..=255).contains(&value) {
        w.write_all(&[BININT1, value as u8])?;
    } else if (256..=65_535).contains(&value) {
        w.write_all(&[BININT2])?;
        w.write_all(&(value as u16).to_le_bytes())?;
    } else if i64::from(i32::MIN) <= value && value <= i64::from(i32::MAX) {
        binint(w, value as i32)?;
    } else {
        let bytes = value.to_le_bytes();
        let mut len = bytes.len();
        // drop redundant sign-extension bytes, keeping the sign bit intact
        while len > 1 {
            let sign_ext = if bytes[len - 2] & 0x80 != 0 { 0xFF } else { 0x00 };
            if bytes[len - 1] == sign_ext {
                len -= 1;
            } else {
                break;
            }
        }
        w.write_all(&[LONG1, len as u8])?;
        w.write_all(&bytes[..len])?;
    }
    Ok(())
}

fn date_payload(date: &Date) -> [u8; 4] {
    let [hi, lo] = date.year.to_be_bytes();
    [hi, lo, date.month, date.day]
}

fn time_payload(time: &Time) -> [u8; 6] {
    let us = time.microsecond.to_be_bytes();
    [time.hour, time.minute, time.second, us[1], us[2], us[3]]
}

fn write_date<W: Write>(w: &mut W, memo: &mut u32, date: &Date) -> Result<()> {
    global(w, memo, "datetime", "date")?;
    short_binbytes(w, memo, &date_payload(date))?;
    tuple1(w, memo)?;
    reduce(w, memo)
}

/// `datetime.timezone(datetime.timedelta(days, seconds, microseconds))`.
fn write_timezone<W: Write>(
    w: &mut W,
    memo: &mut u32,
    offset: &crate::datatypes::TzOffset,
) -> Result<()> {
    let (days, seconds, micros) = offset.as_timedelta();
    global(w, memo, "datetime", "timezone")?;
    global(w, memo, "datetime", "timedelta")?;
    binint(w, days)?;
    binint(w, seconds)?;
    binint(w, micros)?;
    tuple3(w, memo)?;
    reduce(w, memo)?;
    tuple1(w, memo)?;
    reduce(w, memo)
}

fn write_time<W: Write>(w: &mut W, memo: &mut u32, time: &Time) -> Result<()> {
    global(w, memo, "datetime", "time")?;
    short_binbytes(w, memo, &time_payload(time))?;
    match time.offset {
        None => tuple1(w, memo)?,
        Some(offset) => {
            write_timezone(w, memo, &offset)?;
            tuple2(w, memo)?;
        }
    }
    reduce(w, memo)
}

fn write_datetime<W: Write>(w: &mut W, memo: &mut u32, dt: &DateTime) -> Result<()> {
    let date = date_payload(&dt.date);
    let time = time_payload(&dt.time);
    let mut payload = [0u8; 10];
    payload[..4].copy_from_slice(&date);
    payload[4..].copy_from_slice(&time);
    global(w, memo, "datetime", "datetime")?;
    short_binbytes(w, memo, &payload)?;
    match dt.time.offset {
        None => tuple1(w, memo)?,
        Some(offset) => {
            write_timezone(w, memo, &offset)?;
            tuple2(w, memo)?;
        }
    }
    reduce(w, memo)
}
