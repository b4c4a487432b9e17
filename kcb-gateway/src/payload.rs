//! Extraction of request payload fields.
//!
//! Write requests carry tiny JSON-shaped bodies such as
//! `{"values":[1,0,1,0]}`, `{"data":[80,73,79]}` or
//! `{"bus":"i2c","addr":80,"data":[1,2]}`. This
//! module pulls exactly those fields out and nothing more. It is not a JSON
//! parser: anything that does not match the expected shape is rejected
//! rather than guessed at.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Key of the integer list in write payloads.
const VALUES_KEY: &str = "values";

const BUS_KEY: &str = "bus";
const ADDR_KEY: &str = "addr";
const DATA_KEY: &str = "data";

/// A quoted key followed by its colon, e.g. `"values" :`.
static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*"#).expect("invalid field regex")
});

/// Optionally signed decimal integer at the start of the input.
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?[0-9]+").expect("invalid integer regex"));

/// Quoted string without escapes at the start of the input.
static STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"([^"\\]*)""#).expect("invalid string regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field \"{0}\"")]
    MissingField(&'static str),
    #[error("field \"{0}\" holds no values")]
    Empty(&'static str),
    #[error("field \"{field}\": {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Fields of a raw bus write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRequest {
    pub bus: String,
    pub addr: i64,
    pub data: Vec<i64>,
}

/// Read the `values` list, at most `max_len` items.
pub fn parse_int_array(text: &str, max_len: usize) -> Result<Vec<i64>, ParseError> {
    parse_int_array_field(text, VALUES_KEY, max_len)
}

/// Read the `data` byte list of a raw UART write, at most `max_len` items.
pub fn parse_uart_data(text: &str, max_len: usize) -> Result<Vec<i64>, ParseError> {
    parse_int_array_field(text, DATA_KEY, max_len)
}

/// Read the integer list under `key`, stopping at the closing bracket or
/// after `max_len` items, whichever comes first.
pub fn parse_int_array_field(
    text: &str,
    key: &'static str,
    max_len: usize,
) -> Result<Vec<i64>, ParseError> {
    let invalid = |reason| ParseError::Invalid { field: key, reason };

    let rest = field_value(text, key).ok_or(ParseError::MissingField(key))?;
    let mut rest = rest
        .strip_prefix('[')
        .ok_or_else(|| invalid("expected '['"))?
        .trim_start();

    let mut values = Vec::new();
    if rest.starts_with(']') {
        return Err(ParseError::Empty(key));
    }

    while values.len() < max_len {
        let (value, tail) = take_integer(rest).ok_or_else(|| invalid("expected an integer"))?;
        values.push(value.parse().map_err(|_| invalid("integer out of range"))?);
        if values.len() == max_len {
            break;
        }

        let tail = tail.trim_start();
        if tail.starts_with(']') {
            break;
        }
        rest = tail
            .strip_prefix(',')
            .ok_or_else(|| invalid("expected ',' or ']'"))?
            .trim_start();
    }

    if values.is_empty() {
        return Err(ParseError::Empty(key));
    }
    Ok(values)
}

/// Read the integer under `key`.
pub fn parse_int_field(text: &str, key: &'static str) -> Result<i64, ParseError> {
    let rest = field_value(text, key).ok_or(ParseError::MissingField(key))?;
    let (value, _) = take_integer(rest).ok_or(ParseError::Invalid {
        field: key,
        reason: "expected an integer",
    })?;
    value.parse().map_err(|_| ParseError::Invalid {
        field: key,
        reason: "integer out of range",
    })
}

/// Read the quoted string under `key`.
pub fn parse_string_field<'a>(text: &'a str, key: &'static str) -> Result<&'a str, ParseError> {
    let rest = field_value(text, key).ok_or(ParseError::MissingField(key))?;
    STRING
        .captures(rest)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or(ParseError::Invalid {
            field: key,
            reason: "expected a string",
        })
}

/// Read a `{"bus":..,"addr":..,"data":[..]}` request. The data list may be
/// empty; up to `max_len` bytes are read.
pub fn parse_bus_request(text: &str, max_len: usize) -> Result<BusRequest, ParseError> {
    let bus = parse_string_field(text, BUS_KEY)?.to_string();
    let addr = parse_int_field(text, ADDR_KEY)?;
    let data = match parse_int_array_field(text, DATA_KEY, max_len) {
        Ok(data) => data,
        Err(ParseError::Empty(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    Ok(BusRequest { bus, addr, data })
}

/// Text following `"key":`, if the key is present.
fn field_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    FIELD
        .captures_iter(text)
        .find(|caps| &caps[1] == key)
        .and_then(|caps| caps.get(0))
        .map(|m| &text[m.end()..])
}

fn take_integer(text: &str) -> Option<(&str, &str)> {
    INTEGER
        .find(text)
        .map(|m| (m.as_str(), &text[m.end()..]))
}
