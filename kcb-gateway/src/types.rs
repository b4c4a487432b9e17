//! Values exchanged with the controller.
//!
//! Every container here has a fixed capacity matching the KCB-5 hardware:
//! 16 digital pins, 8 servos, 4 analog channels, 32-byte raw bus frames
//! and 256-byte raw UART writes.
//! Constructors validate against that capacity instead of silently
//! truncating, so anything that gets this far is safe to encode.

use bitvec::prelude::*;
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

/// Number of digital I/O pins.
pub const DIGITAL_PINS: usize = 16;

/// Number of servo channels.
pub const SERVO_CHANNELS: usize = 8;

/// Number of analog input channels.
pub const ANALOG_CHANNELS: usize = 4;

/// Maximum payload of one raw bus write.
pub const RAW_BUS_MAX_LEN: usize = 32;

/// Maximum payload of one raw UART write.
pub const UART_MAX_LEN: usize = 256;

/// Highest 7-bit I2C address.
const I2C_ADDR_MAX: i64 = 0x7F;

/// Caller input that does not fit the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{what}: {len} values exceeds capacity of {capacity}")]
    TooLong {
        what: &'static str,
        len: usize,
        capacity: usize,
    },
    #[error("{what}: at least one value is required")]
    Empty { what: &'static str },
    #[error("{what}: value {value} at index {index} is outside {min}..={max}")]
    OutOfRange {
        what: &'static str,
        index: usize,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown bus '{0}' (expected i2c or spi)")]
    UnknownBus(String),
    #[error("address {address} is not valid on the {bus} bus")]
    BadAddress { bus: Bus, address: i64 },
}

/// Secondary buses reachable through raw writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Bus {
    I2c,
    Spi,
}

/// State of the digital pins, bit `i` is pin `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigitalState {
    bits: u16,
}

impl DigitalState {
    pub const CAPACITY: usize = DIGITAL_PINS;

    pub fn from_bits(bits: u16) -> Self {
        Self { bits }
    }

    /// Build from pin states in pin order. Pins past the end are low.
    pub fn from_pins(pins: &[bool]) -> Result<Self, ValidationError> {
        check_len("digital pins", pins.len(), Self::CAPACITY)?;

        let mut bits = 0u16;
        let view = bits.view_bits_mut::<Lsb0>();
        for (index, &high) in pins.iter().enumerate() {
            view.set(index, high);
        }
        Ok(Self { bits })
    }

    /// Build from the `0`/`1` integers an API caller sends.
    pub fn from_values(values: &[i64]) -> Result<Self, ValidationError> {
        check_len("digital pins", values.len(), Self::CAPACITY)?;

        let pins = values
            .iter()
            .enumerate()
            .map(|(index, &value)| match value {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(ValidationError::OutOfRange {
                    what: "digital pins",
                    index,
                    value,
                    min: 0,
                    max: 1,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_pins(&pins)
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// All pins, padded to capacity.
    pub fn pins(&self) -> Vec<bool> {
        self.bits.view_bits::<Lsb0>().iter().by_vals().collect()
    }

    /// Pins as `0`/`1`, the shape returned to API callers.
    pub fn to_values(&self) -> Vec<u8> {
        self.pins().into_iter().map(u8::from).collect()
    }
}

/// A list that never holds more than `N` items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedList<T, const N: usize>(Vec<T>);

impl<T, const N: usize> BoundedList<T, N> {
    pub const CAPACITY: usize = N;

    pub fn new() -> Self {
        Self(Vec::with_capacity(N))
    }

    pub fn try_from_vec(what: &'static str, items: Vec<T>) -> Result<Self, ValidationError> {
        check_len(what, items.len(), N)?;
        Ok(Self(items))
    }

    /// Append an item, handing it back when the list is full.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.0.push(item);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.0.len() >= N
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T, const N: usize> Default for BoundedList<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for BoundedList<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Servo positions in device units (microseconds on the KCB-5).
pub type ServoFrame = BoundedList<u16, SERVO_CHANNELS>;

/// Analog channel readings.
pub type AnalogSample = BoundedList<u16, ANALOG_CHANNELS>;

impl ServoFrame {
    /// Validate positions sent by an API caller. At least one is required;
    /// servos past the end keep whatever position the device has.
    pub fn from_values(values: &[i64]) -> Result<Self, ValidationError> {
        const WHAT: &str = "servo positions";
        if values.is_empty() {
            return Err(ValidationError::Empty { what: WHAT });
        }
        check_len(WHAT, values.len(), SERVO_CHANNELS)?;
        let positions = narrow(WHAT, values, 0, u16::MAX.into())?;
        Self::try_from_vec(WHAT, positions)
    }
}

/// Bytes written verbatim to the controller's UART.
pub type UartFrame = BoundedList<u8, UART_MAX_LEN>;

impl UartFrame {
    pub fn from_values(values: &[i64]) -> Result<Self, ValidationError> {
        const WHAT: &str = "uart data";
        if values.is_empty() {
            return Err(ValidationError::Empty { what: WHAT });
        }
        check_len(WHAT, values.len(), UART_MAX_LEN)?;
        let data = narrow(WHAT, values, 0, u8::MAX.into())?;
        Self::try_from_vec(WHAT, data)
    }
}

/// One fire-and-forget write to a secondary bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBusFrame {
    bus: Bus,
    address: u16,
    data: BoundedList<u8, RAW_BUS_MAX_LEN>,
}

impl RawBusFrame {
    /// Validate a bus write request. I2C addresses are 7-bit; SPI has no
    /// addressing on the wire so any non-negative address is accepted.
    pub fn new(bus: &str, address: i64, data: &[i64]) -> Result<Self, ValidationError> {
        const WHAT: &str = "bus data";
        let bus =
            Bus::from_str(bus).map_err(|_| ValidationError::UnknownBus(bus.to_string()))?;

        let max_address = match bus {
            Bus::I2c => I2C_ADDR_MAX,
            Bus::Spi => u16::MAX.into(),
        };
        if !(0..=max_address).contains(&address) {
            return Err(ValidationError::BadAddress { bus, address });
        }

        check_len(WHAT, data.len(), RAW_BUS_MAX_LEN)?;
        let data = narrow(WHAT, data, 0, u8::MAX.into())?;

        Ok(Self {
            bus,
            address: address as u16,
            data: BoundedList::try_from_vec(WHAT, data)?,
        })
    }

    pub fn bus(&self) -> Bus {
        self.bus
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A command line for the controller, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand(String);

impl WireCommand {
    pub(crate) fn new(line: String) -> Self {
        Self(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bytes that go out on the wire, newline included.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.0.len() + 1);
        line.extend_from_slice(self.0.as_bytes());
        line.push(b'\n');
        line
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bytes read back from the controller for one command.
///
/// A reply is `complete` when its newline arrived. A partial reply holds
/// whatever came in before the read timed out or the buffer filled, and
/// may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireReply {
    bytes: Bytes,
    complete: bool,
}

impl WireReply {
    pub fn complete(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            complete: true,
        }
    }

    pub fn partial(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reply text with line ending and surrounding whitespace removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

fn check_len(what: &'static str, len: usize, capacity: usize) -> Result<(), ValidationError> {
    if len > capacity {
        return Err(ValidationError::TooLong {
            what,
            len,
            capacity,
        });
    }
    Ok(())
}

fn narrow<T: TryFrom<i64>>(
    what: &'static str,
    values: &[i64],
    min: i64,
    max: i64,
) -> Result<Vec<T>, ValidationError> {
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            if !(min..=max).contains(&value) {
                return Err(ValidationError::OutOfRange {
                    what,
                    index,
                    value,
                    min,
                    max,
                });
            }
            T::try_from(value).map_err(|_| ValidationError::OutOfRange {
                what,
                index,
                value,
                min,
                max,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digital_bit_order() {
        let state = DigitalState::from_pins(&[true, false, true]).unwrap();
        assert_eq!(state.bits(), 0b101);
        let pins = state.pins();
        assert_eq!(pins.len(), DIGITAL_PINS);
        assert_eq!(&pins[..4], &[true, false, true, false]);
        assert!(!pins[15]);
    }

    #[test]
    fn test_digital_capacity() {
        assert!(DigitalState::from_values(&[1; 16]).is_ok());
        assert_eq!(
            DigitalState::from_values(&[1; 17]),
            Err(ValidationError::TooLong {
                what: "digital pins",
                len: 17,
                capacity: 16
            })
        );
    }

    #[test]
    fn test_digital_rejects_non_binary() {
        let err = DigitalState::from_values(&[1, 0, 2]).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { index: 2, value: 2, .. }));
    }

    #[test]
    fn test_bounded_list_push() {
        let mut list = AnalogSample::new();
        for value in 0..4 {
            assert!(list.try_push(value).is_ok());
        }
        assert!(list.is_full());
        assert_eq!(list.try_push(99), Err(99));
        assert_eq!(&*list, &[0, 1, 2, 3]);
    }

    #[test]
    fn test_servo_frame_bounds() {
        assert!(ServoFrame::from_values(&[1500; 8]).is_ok());
        assert!(matches!(
            ServoFrame::from_values(&[]),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            ServoFrame::from_values(&[1500; 9]),
            Err(ValidationError::TooLong { len: 9, .. })
        ));
        assert!(matches!(
            ServoFrame::from_values(&[1500, -1]),
            Err(ValidationError::OutOfRange { index: 1, .. })
        ));
    }

    #[test]
    fn test_raw_bus_frame() {
        let frame = RawBusFrame::new("i2c", 0x50, &[0x00, 0x10, 0xFF]).unwrap();
        assert_eq!(frame.bus(), Bus::I2c);
        assert_eq!(frame.address(), 0x50);
        assert_eq!(frame.data(), &[0x00, 0x10, 0xFF]);

        // Empty writes are allowed
        assert!(RawBusFrame::new("spi", 0, &[]).is_ok());
    }

    #[test]
    fn test_raw_bus_frame_rejects() {
        assert_eq!(
            RawBusFrame::new("serial", 0, &[1]),
            Err(ValidationError::UnknownBus("serial".into()))
        );
        assert!(matches!(
            RawBusFrame::new("i2c", 0x80, &[1]),
            Err(ValidationError::BadAddress { bus: Bus::I2c, .. })
        ));
        assert!(matches!(
            RawBusFrame::new("spi", 0, &[0; 33]),
            Err(ValidationError::TooLong { len: 33, .. })
        ));
        assert!(matches!(
            RawBusFrame::new("spi", 0, &[256]),
            Err(ValidationError::OutOfRange { value: 256, .. })
        ));
    }

    #[test]
    fn test_uart_frame_bounds() {
        let frame = UartFrame::from_values(&[0x41, 0x0D, 0x0A]).unwrap();
        assert_eq!(&*frame, b"A\r\n");
        assert!(UartFrame::from_values(&[0; UART_MAX_LEN]).is_ok());
        assert!(matches!(
            UartFrame::from_values(&[0; UART_MAX_LEN + 1]),
            Err(ValidationError::TooLong { len: 257, .. })
        ));
        assert!(matches!(
            UartFrame::from_values(&[]),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            UartFrame::from_values(&[1, 300]),
            Err(ValidationError::OutOfRange { index: 1, value: 300, .. })
        ));
    }

    #[test]
    fn test_wire_reply_text() {
        let reply = WireReply::complete(&b"PIO:0F\r"[..]);
        assert_eq!(reply.text(), "PIO:0F");
        assert!(reply.is_complete());
        assert!(WireReply::partial(Bytes::new()).is_empty());
    }
}
