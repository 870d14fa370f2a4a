//! Parser of configuration strings.
//!
//! A configuration string is a comma-separated list of `key:value` pairs:
//!
//! ```text
//! conf  := (pair (',' pair)*)?
//! pair  := key ':' value
//! key   := [A-Za-z0-9_]+
//! value := any run of characters up to the next ',' or the end
//! ```
//!
//! Structural errors abort the parsing of the string at the point of error, invalid pairs are reported and skipped.

use core::{convert::TryFrom, fmt};

use thiserror::Error;

use crate::configuration::{DssPrecedence, Options, Prefix, FILL, PROF, TCACHE, UTRACE, XMALLOC};
use crate::description::{LG_CHUNK_MAX, LG_CHUNK_MIN};
use crate::internals::diagnostics::Bytes;

/// Kind of configuration diagnostic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum ConfErrorKind {
    /// The string ends in the middle of a key.
    #[error("Conf string ends with key")]
    EndsWithKey,
    /// The string ends with a comma; the preceding pair is still applied.
    #[error("Conf string ends with comma")]
    EndsWithComma,
    /// A key is empty, or not followed by a colon.
    #[error("Malformed conf string")]
    Malformed,
    /// The key is unknown, or disabled at compile-time.
    #[error("Invalid conf pair")]
    InvalidPair,
    /// The value cannot be parsed for the key.
    #[error("Invalid conf value")]
    InvalidValue,
    /// The value is outside the accepted range for the key.
    #[error("Out-of-range conf value")]
    OutOfRange,
    /// The data segment precedence is not supported by the platform.
    #[error("Error setting dss")]
    DssUnsupported,
}

impl ConfErrorKind {
    /// Returns whether the diagnostic is about the structure of the string, rather than a pair.
    pub fn is_structural(&self) -> bool {
        matches!(self, ConfErrorKind::EndsWithKey | ConfErrorKind::EndsWithComma | ConfErrorKind::Malformed)
    }
}

/// A configuration diagnostic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfDiagnostic<'a> {
    /// The kind of diagnostic.
    pub kind: ConfErrorKind,
    /// The offending key, if any.
    pub key: &'a [u8],
    /// The offending value, if any.
    pub value: &'a [u8],
}

impl<'a> ConfDiagnostic<'a> {
    fn structural(kind: ConfErrorKind) -> Self { Self { kind, key: b"", value: b"" } }
}

impl fmt::Display for ConfDiagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_structural() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}:{}", self.kind, Bytes(self.key), Bytes(self.value))
        }
    }
}

/// Iterator over the pairs of a configuration string.
pub struct ConfPairs<'a> {
    rest: &'a [u8],
    trailing_comma: bool,
    done: bool,
}

impl<'a> ConfPairs<'a> {
    /// Creates an iterator over the pairs of `conf`.
    ///
    /// `conf` ends at its first NUL, if any.
    pub fn new(conf: &'a [u8]) -> Self {
        let end = conf.iter().position(|b| *b == 0).unwrap_or(conf.len());

        Self { rest: &conf[..end], trailing_comma: false, done: false }
    }

    fn fail(&mut self, kind: ConfErrorKind) -> Option<Result<(&'a [u8], &'a [u8]), ConfDiagnostic<'a>>> {
        self.done = true;
        Some(Err(ConfDiagnostic::structural(kind)))
    }
}

impl<'a> Iterator for ConfPairs<'a> {
    type Item = Result<(&'a [u8], &'a [u8]), ConfDiagnostic<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.rest.is_empty() {
            self.done = true;

            return if self.trailing_comma { self.fail(ConfErrorKind::EndsWithComma) } else { None };
        }

        let key_length = self.rest.iter()
            .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
            .unwrap_or(self.rest.len());

        if key_length == self.rest.len() {
            return self.fail(ConfErrorKind::EndsWithKey);
        }

        if key_length == 0 || self.rest[key_length] != b':' {
            return self.fail(ConfErrorKind::Malformed);
        }

        let key = &self.rest[..key_length];
        let tail = &self.rest[key_length + 1..];

        let value = match tail.iter().position(|b| *b == b',') {
            Some(comma) => {
                self.rest = &tail[comma + 1..];
                self.trailing_comma = self.rest.is_empty();
                &tail[..comma]
            },
            None => {
                self.rest = b"";
                tail
            },
        };

        Some(Ok((key, value)))
    }
}

impl Options {
    /// Applies the configuration string `conf`, reporting each diagnostic.
    ///
    /// `dss_supported` indicates whether the platform can obtain chunks from the data segment.
    pub fn apply_conf<F>(&mut self, conf: &[u8], dss_supported: bool, mut report: F)
        where
            F: FnMut(&ConfDiagnostic<'_>),
    {
        for item in ConfPairs::new(conf) {
            match item {
                Ok((key, value)) => {
                    if let Err(kind) = self.apply_pair(key, value, dss_supported) {
                        report(&ConfDiagnostic { kind, key, value });
                    }
                },
                Err(diagnostic) => report(&diagnostic),
            }
        }
    }

    fn apply_pair(&mut self, key: &[u8], value: &[u8], dss_supported: bool) -> Result<(), ConfErrorKind> {
        const SIGNED_LG_MAX: isize = usize::BITS as isize - 1;
        const UNSIGNED_LG_MAX: usize = usize::BITS as usize - 1;

        match key {
            b"abort" => self.abort = parse_bool(value)?,
            b"lg_chunk" => self.lg_chunk = parse_size(value, LG_CHUNK_MIN as usize, LG_CHUNK_MAX as usize, true)?,
            b"dss" => {
                let dss = DssPrecedence::from_name(value).ok_or(ConfErrorKind::InvalidValue)?;

                if dss != DssPrecedence::Disabled && !dss_supported {
                    return Err(ConfErrorKind::DssUnsupported);
                }

                self.dss = dss;
            },
            b"narenas" => self.narenas = parse_size(value, 1, usize::MAX, false)?,
            b"lg_dirty_mult" => self.lg_dirty_mult = parse_ssize(value, -1, SIGNED_LG_MAX)?,
            b"stats_print" => self.stats_print = parse_bool(value)?,
            b"junk" if FILL => self.junk = parse_bool(value)?,
            b"quarantine" if FILL => self.quarantine = parse_size(value, 0, usize::MAX, false)?,
            b"redzone" if FILL => self.redzone = parse_bool(value)?,
            b"zero" if FILL => self.zero = parse_bool(value)?,
            b"utrace" if UTRACE => self.utrace = parse_bool(value)?,
            b"xmalloc" if XMALLOC => self.xmalloc = parse_bool(value)?,
            b"tcache" if TCACHE => self.tcache = parse_bool(value)?,
            b"lg_tcache_max" if TCACHE => self.lg_tcache_max = parse_ssize(value, -1, SIGNED_LG_MAX)?,
            b"prof" if PROF => self.prof = parse_bool(value)?,
            b"prof_prefix" if PROF => self.prof_prefix = Prefix::new(value),
            b"prof_active" if PROF => self.prof_active = parse_bool(value)?,
            b"prof_thread_active_init" if PROF => self.prof_thread_active_init = parse_bool(value)?,
            b"lg_prof_sample" if PROF => self.lg_prof_sample = parse_size(value, 0, UNSIGNED_LG_MAX, true)?,
            b"prof_accum" if PROF => self.prof_accum = parse_bool(value)?,
            b"lg_prof_interval" if PROF => self.lg_prof_interval = parse_ssize(value, -1, SIGNED_LG_MAX)?,
            b"prof_gdump" if PROF => self.prof_gdump = parse_bool(value)?,
            b"prof_final" if PROF => self.prof_final = parse_bool(value)?,
            b"prof_leak" if PROF => self.prof_leak = parse_bool(value)?,
            _ => return Err(ConfErrorKind::InvalidPair),
        }

        Ok(())
    }
}

fn parse_bool(value: &[u8]) -> Result<bool, ConfErrorKind> {
    match value {
        b"true" => Ok(true),
        b"false" => Ok(false),
        _ => Err(ConfErrorKind::InvalidValue),
    }
}

//  With `clip`, values below a non-zero `min` are raised to it, and values above `max` lowered to it.
fn parse_size(value: &[u8], min: usize, max: usize, clip: bool) -> Result<usize, ConfErrorKind> {
    let number = parse_unsigned(value).ok_or(ConfErrorKind::InvalidValue)?;

    if clip {
        if min != 0 && number < min {
            Ok(min)
        } else if number > max {
            Ok(max)
        } else {
            Ok(number)
        }
    } else if number < min || number > max {
        Err(ConfErrorKind::OutOfRange)
    } else {
        Ok(number)
    }
}

fn parse_ssize(value: &[u8], min: isize, max: isize) -> Result<isize, ConfErrorKind> {
    let (negative, digits) = match value.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, value),
    };

    let magnitude = parse_unsigned(digits).ok_or(ConfErrorKind::InvalidValue)?;

    let number = if negative {
        0isize.checked_sub_unsigned(magnitude)
    } else {
        isize::try_from(magnitude).ok()
    };

    let number = number.ok_or(ConfErrorKind::InvalidValue)?;

    if number < min || number > max {
        return Err(ConfErrorKind::OutOfRange);
    }

    Ok(number)
}

//  Parses the whole of `value` as an unsigned integer with C base-0 syntax: `0x` hexadecimal, `0` octal, or decimal.
fn parse_unsigned(value: &[u8]) -> Option<usize> {
    let value = value.strip_prefix(b"+").unwrap_or(value);

    let (radix, digits) = if let Some(hex) = value.strip_prefix(b"0x").or_else(|| value.strip_prefix(b"0X")) {
        (16, hex)
    } else if value.len() > 1 && value[0] == b'0' {
        (8, &value[1..])
    } else {
        (10, value)
    };

    if digits.is_empty() {
        return None;
    }

    digits.iter().try_fold(0usize, |accumulator, byte| {
        let digit = (*byte as char).to_digit(radix)? as usize;
        accumulator.checked_mul(radix as usize)?.checked_add(digit)
    })
}

#[cfg(test)]
mod tests {

use super::*;

fn pairs(conf: &str) -> Vec<Result<(String, String), ConfErrorKind>> {
    ConfPairs::new(conf.as_bytes())
        .map(|item| item
            .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), String::from_utf8_lossy(v).into_owned()))
            .map_err(|d| d.kind))
        .collect()
}

fn pair(key: &str, value: &str) -> Result<(String, String), ConfErrorKind> { Ok((key.to_string(), value.to_string())) }

fn apply(conf: &str) -> (Options, Vec<String>) {
    let mut options = Options::DEFAULT;
    let mut diagnostics = Vec::new();

    options.apply_conf(conf.as_bytes(), false, |d| diagnostics.push(d.to_string()));

    (options, diagnostics)
}

#[test]
fn pairs_well_formed() {
    assert_eq!(Vec::<Result<(String, String), ConfErrorKind>>::new(), pairs(""));
    assert_eq!(vec![pair("abort", "true")], pairs("abort:true"));
    assert_eq!(vec![pair("a", ""), pair("b_2", "x:y")], pairs("a:,b_2:x:y"));
}

#[test]
fn pairs_malformed() {
    assert_eq!(vec![Err(ConfErrorKind::EndsWithKey)], pairs("abort"));
    assert_eq!(vec![pair("a", "1"), Err(ConfErrorKind::EndsWithKey)], pairs("a:1,abort"));
    assert_eq!(vec![Err(ConfErrorKind::Malformed)], pairs(":true"));
    assert_eq!(vec![Err(ConfErrorKind::Malformed)], pairs("ab-rt:true,narenas:3"));
    assert_eq!(vec![pair("a", "1"), Err(ConfErrorKind::EndsWithComma)], pairs("a:1,"));
    assert_eq!(vec![pair("a", "1")], pairs("a:1\0,b:2"));
}

#[test]
fn parse_numbers() {
    assert_eq!(Some(42), parse_unsigned(b"42"));
    assert_eq!(Some(42), parse_unsigned(b"+42"));
    assert_eq!(Some(0x2a), parse_unsigned(b"0x2A"));
    assert_eq!(Some(0o52), parse_unsigned(b"052"));
    assert_eq!(Some(0), parse_unsigned(b"0"));
    assert_eq!(None, parse_unsigned(b""));
    assert_eq!(None, parse_unsigned(b"0x"));
    assert_eq!(None, parse_unsigned(b"08"));
    assert_eq!(None, parse_unsigned(b"12k"));
    assert_eq!(None, parse_unsigned(b"99999999999999999999999"));

    assert_eq!(Ok(-1), parse_ssize(b"-1", -1, 63));
    assert_eq!(Err(ConfErrorKind::OutOfRange), parse_ssize(b"-2", -1, 63));
    assert_eq!(Err(ConfErrorKind::OutOfRange), parse_ssize(b"64", -1, 63));
    assert_eq!(Err(ConfErrorKind::InvalidValue), parse_ssize(b"--1", -1, 63));
}

#[test]
fn apply_typed_values() {
    let (options, diagnostics) = apply("abort:true,narenas:3,lg_dirty_mult:-1,junk:true,prof_prefix:heap");

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert!(options.abort);
    assert_eq!(3, options.narenas);
    assert_eq!(-1, options.lg_dirty_mult);
    assert!(options.junk);
    assert_eq!(b"heap", options.prof_prefix.as_bytes());
}

#[test]
fn apply_clips_and_rejects() {
    let (options, diagnostics) = apply("lg_chunk:2,lg_prof_sample:99,narenas:0");

    assert_eq!(LG_CHUNK_MIN as usize, options.lg_chunk);
    assert_eq!(usize::BITS as usize - 1, options.lg_prof_sample);
    assert_eq!(0, options.narenas);
    assert_eq!(vec!["Out-of-range conf value: narenas:0".to_string()], diagnostics);

    let (options, _) = apply("lg_chunk:99");
    assert_eq!(LG_CHUNK_MAX as usize, options.lg_chunk);
}

#[test]
fn apply_reports_and_continues() {
    let (options, diagnostics) = apply("abort:maybe,bogus:1,dss:primary,dss:nope,stats_print:true");

    assert_eq!(Options::DEFAULT.abort, options.abort);
    assert_eq!(DssPrecedence::Disabled, options.dss);
    assert!(options.stats_print);

    assert_eq!(vec![
        "Invalid conf value: abort:maybe".to_string(),
        "Invalid conf pair: bogus:1".to_string(),
        "Error setting dss: dss:primary".to_string(),
        "Invalid conf value: dss:nope".to_string(),
    ], diagnostics);
}

#[test]
fn apply_malformed_keeps_defaults() {
    let (options, diagnostics) = apply("narenas:2,");
    assert_eq!(2, options.narenas);
    assert_eq!(vec!["Conf string ends with comma".to_string()], diagnostics);

    let (options, diagnostics) = apply("zero:true,narenas");
    assert!(options.zero);
    assert_eq!(0, options.narenas);
    assert_eq!(vec!["Conf string ends with key".to_string()], diagnostics);

    let (options, diagnostics) = apply(":3,narenas:4");
    assert_eq!(0, options.narenas);
    assert_eq!(vec!["Malformed conf string".to_string()], diagnostics);
}

#[test]
fn apply_later_sources_win() {
    let mut options = Options::DEFAULT;

    options.apply_conf(b"narenas:2,junk:true", false, |_| ());
    options.apply_conf(b"narenas:5", false, |_| ());

    assert_eq!(5, options.narenas);
    assert!(options.junk);
}

}
