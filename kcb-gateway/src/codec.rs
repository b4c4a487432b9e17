//! KCB-5 line protocol.
//!
//! Commands and replies are single ASCII lines. Reads are a keyword ending
//! in `?`; the controller answers with a prefix and a payload:
//!
//! ```text
//! > PIO?            < PIO:0F                 (hex bitmap, bit i = pin i)
//! > SERVO?          < SERVO:1200,1250,1230   (decimal list)
//! > AD?             < AD:512,498,7,1023      (decimal list)
//! > PIO=A5          < OK
//! > SERVO=1500,1500 < OK
//! ```
//!
//! A write answered with anything but `OK` failed on the device side,
//! usually with an `ERR` line.
//!
//! A reply is only decoded once its newline has arrived. Anything cut off
//! by the read timeout or the reply buffer is malformed, whatever the
//! policy.
//!
//! Noisy links garble tokens, so list decoding keeps the values parsed
//! before the first bad token of a complete line. Whether such a reply is
//! accepted is a [`DecodePolicy`] choice.

use bytes::Bytes;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::tracing::prelude::*;
use crate::types::{
    AnalogSample, BoundedList, DigitalState, RawBusFrame, ServoFrame, UartFrame, WireCommand,
    WireReply,
};

const DIGITAL_READ: &str = "PIO?";
const DIGITAL_WRITE: &str = "PIO=";
const DIGITAL_PREFIX: &str = "PIO:";

const SERVO_READ: &str = "SERVO?";
const SERVO_WRITE: &str = "SERVO=";
const SERVO_PREFIX: &str = "SERVO:";

const ANALOG_READ: &str = "AD?";
const ANALOG_PREFIX: &str = "AD:";

const ACK: &str = "OK";
const NAK_PREFIX: &str = "ERR";

/// How to treat a complete list reply cut short by a malformed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DecodePolicy {
    /// Keep the values parsed before the bad token.
    #[default]
    Lenient,
    /// Reject the reply with [`DecodeError::Truncated`].
    Strict,
}

/// A reply that could not be turned into a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed reply {reply:?}: {reason}")]
    Malformed { reply: String, reason: &'static str },
    #[error("reply {reply:?} truncated after {parsed} value(s)")]
    Truncated { reply: String, parsed: usize },
    #[error("device rejected command: {0:?}")]
    Rejected(String),
}

pub fn encode_digital_read() -> WireCommand {
    WireCommand::new(DIGITAL_READ.to_string())
}

/// Pins as an uppercase hex bitmap, no padding.
pub fn encode_digital_write(state: &DigitalState) -> WireCommand {
    WireCommand::new(format!("{DIGITAL_WRITE}{:X}", state.bits()))
}

pub fn decode_digital_read(reply: &WireReply) -> Result<DigitalState, DecodeError> {
    let text = reply_line(reply)?;
    let payload = strip_prefix(&text, DIGITAL_PREFIX)?;

    if payload.is_empty() || !payload.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed(&text, "bitmap is not hexadecimal"));
    }
    let bits = u16::from_str_radix(payload, 16)
        .map_err(|_| malformed(&text, "bitmap wider than 16 pins"))?;

    Ok(DigitalState::from_bits(bits))
}

pub fn encode_servo_read() -> WireCommand {
    WireCommand::new(SERVO_READ.to_string())
}

/// Positions as a comma-separated decimal list.
pub fn encode_servo_write(frame: &ServoFrame) -> WireCommand {
    let positions = frame
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    WireCommand::new(format!("{SERVO_WRITE}{positions}"))
}

pub fn decode_servo_read(reply: &WireReply, policy: DecodePolicy) -> Result<ServoFrame, DecodeError> {
    decode_list(reply, SERVO_PREFIX, policy)
}

pub fn encode_analog_read() -> WireCommand {
    WireCommand::new(ANALOG_READ.to_string())
}

pub fn decode_analog_read(
    reply: &WireReply,
    policy: DecodePolicy,
) -> Result<AnalogSample, DecodeError> {
    decode_list(reply, ANALOG_PREFIX, policy)
}

/// Check the controller's answer to a write command.
pub fn decode_ack(reply: &WireReply) -> Result<(), DecodeError> {
    if reply.is_empty() {
        return Err(malformed("", "no acknowledgment"));
    }
    let text = reply_line(reply)?;
    if text == ACK {
        return Ok(());
    }
    if text.starts_with(NAK_PREFIX) {
        return Err(DecodeError::Rejected(text));
    }
    Err(malformed(&text, "unexpected acknowledgment"))
}

/// Bytes written verbatim to the addressed bus.
pub fn encode_raw_bus(frame: &RawBusFrame) -> Bytes {
    Bytes::copy_from_slice(frame.data())
}

/// Bytes written verbatim to the UART, no terminator added.
pub fn encode_raw_uart(frame: &UartFrame) -> Bytes {
    Bytes::copy_from_slice(frame)
}

fn decode_list<const N: usize>(
    reply: &WireReply,
    prefix: &str,
    policy: DecodePolicy,
) -> Result<BoundedList<u16, N>, DecodeError> {
    let text = reply_line(reply)?;
    let payload = strip_prefix(&text, prefix)?;

    let mut values = BoundedList::new();
    if payload.is_empty() {
        return Ok(values);
    }

    let mut truncated = false;
    for token in payload.split(',') {
        let Ok(value) = token.trim().parse::<u16>() else {
            truncated = true;
            break;
        };
        if values.try_push(value).is_err() {
            truncated = true;
            break;
        }
    }

    if truncated {
        if values.is_empty() {
            return Err(malformed(&text, "no numeric values"));
        }
        match policy {
            DecodePolicy::Lenient => {
                warn!(reply = %text, parsed = values.len(), "Accepting truncated reply");
            }
            DecodePolicy::Strict => {
                return Err(DecodeError::Truncated {
                    reply: text.clone(),
                    parsed: values.len(),
                });
            }
        }
    }

    Ok(values)
}

// Text of a reply whose newline arrived.
fn reply_line(reply: &WireReply) -> Result<String, DecodeError> {
    let text = reply.text();
    if !reply.is_complete() {
        return Err(malformed(&text, "reply cut off before end of line"));
    }
    Ok(text)
}

fn strip_prefix<'a>(text: &'a str, prefix: &str) -> Result<&'a str, DecodeError> {
    text.strip_prefix(prefix)
        .map(str::trim)
        .ok_or_else(|| malformed(text, "missing reply prefix"))
}

fn malformed(text: &str, reason: &'static str) -> DecodeError {
    DecodeError::Malformed {
        reply: text.to_string(),
        reason,
    }
}
