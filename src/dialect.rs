//! Tokenizer configuration.
//!
//! A [`Dialect`] is an immutable value describing how fields are separated,
//! quoted, and escaped. It is carried on every task so worker processes
//! tokenize identically to the planner.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quoting behavior requested for the file.
///
/// Only `Minimal` and `None` change tokenizer output today; the remaining
/// modes are accepted, validated, and carried so plans round-trip, matching
/// the reference reader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quoting {
    #[default]
    Minimal,
    All,
    NonNumeric,
    None,
    Strings,
    NotNull,
}

impl Quoting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quoting::Minimal => "QUOTE_MINIMAL",
            Quoting::All => "QUOTE_ALL",
            Quoting::NonNumeric => "QUOTE_NONNUMERIC",
            Quoting::None => "QUOTE_NONE",
            Quoting::Strings => "QUOTE_STRINGS",
            Quoting::NotNull => "QUOTE_NOTNULL",
        }
    }
}

impl fmt::Display for Quoting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quoting {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let upper = value.to_ascii_uppercase();
        let token = upper.strip_prefix("QUOTE_").unwrap_or(&upper);
        match token {
            "MINIMAL" => Ok(Quoting::Minimal),
            "ALL" => Ok(Quoting::All),
            "NONNUMERIC" => Ok(Quoting::NonNumeric),
            "NONE" => Ok(Quoting::None),
            "STRINGS" => Ok(Quoting::Strings),
            "NOTNULL" => Ok(Quoting::NotNull),
            _ => bail!("unknown quoting mode: {value:?}"),
        }
    }
}

/// Immutable tokenizer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dialect {
    pub delimiter: char,
    pub quotechar: Option<char>,
    pub escapechar: Option<char>,
    pub lineterminator: char,
    /// `""` inside a quoted field denotes one literal quote character.
    pub doublequote: bool,
    /// Discard spaces immediately after a delimiter.
    pub skipinitialspace: bool,
    /// Trim trailing spaces when a field is saved, in both passes.
    pub skiptrailingspace: bool,
    /// Fail on malformed quoting instead of recovering.
    pub strict: bool,
    pub quoting: Quoting,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quotechar: Some('"'),
            escapechar: None,
            lineterminator: '\n',
            doublequote: true,
            skipinitialspace: false,
            skiptrailingspace: false,
            strict: false,
            quoting: Quoting::Minimal,
        }
    }
}

impl Dialect {
    /// Reject configurations the tokenizer cannot honor. Runs at planner
    /// start, before any file I/O.
    pub fn validate(&self) -> Result<()> {
        if self.quotechar == Some(self.delimiter) {
            bail!("quotechar must differ from delimiter");
        }
        if self.escapechar == Some(self.delimiter) {
            bail!("escapechar must differ from delimiter");
        }
        if self.quoting != Quoting::None && self.quotechar.is_none() {
            bail!(
                "quoting mode {} requires a quotechar",
                self.quoting.as_str()
            );
        }
        Ok(())
    }
}

/// Parse a CLI flag value into exactly one code point, honoring the
/// backslash escapes a shell-quoted flag commonly carries.
pub fn unescape_char(flag: &str, value: &str) -> Result<char> {
    let c = match value {
        "\\t" => '\t',
        "\\n" => '\n',
        "\\r" => '\r',
        "\\\\" => '\\',
        "\\'" => '\'',
        "\\\"" => '"',
        "\\0" => '\0',
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => bail!("--{flag} must be a single character, got {value:?}"),
            }
        }
    };
    Ok(c)
}

/// Render a code point back into the escaped form `unescape_char` accepts,
/// for worker command lines.
pub fn escape_char(c: char) -> String {
    match c {
        '\t' => "\\t".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\\' => "\\\\".to_string(),
        '\0' => "\\0".to_string(),
        other => other.to_string(),
    }
}
