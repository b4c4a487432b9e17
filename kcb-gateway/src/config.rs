//! Configuration for the gateway daemon.
//!
//! Everything comes from environment variables so the daemon can run
//! unchanged under systemd or in a container:
//!
//! | variable            | default   |
//! |---------------------|-----------|
//! | `SERVER_HOST`       | `0.0.0.0` |
//! | `SERVER_PORT`       | `8080`    |
//! | `UART_PORT`         | required  |
//! | `UART_BAUD`         | `115200`  |
//! | `UART_TIMEOUT_MS`   | `2000`    |
//! | `I2C_DEV`           | unset     |
//! | `SPI_DEV`           | unset     |
//! | `KCB_DECODE_POLICY` | `lenient` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channel::DEFAULT_TIMEOUT;
use crate::codec::DecodePolicy;
use crate::error::{Error, Result};

/// Baud rates the controller's UART supports.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BAUD: u32 = 115200;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub serial: SerialConfig,
    pub bus: BusConfig,
    pub decode_policy: DecodePolicy,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serial link to the controller.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyS1`
    pub device: String,
    pub baud_rate: u32,
    /// Idle time after which a reply is considered finished
    pub timeout: Duration,
}

/// Raw bus devices. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct BusConfig {
    pub i2c: Option<PathBuf>,
    pub spi: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server = ServerConfig {
            host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "SERVER_PORT", DEFAULT_PORT)?,
        };

        let device = lookup("UART_PORT")
            .filter(|path| !path.is_empty())
            .ok_or_else(|| Error::Config("UART_PORT must name the serial device".into()))?;
        let baud_rate = parse_or(&lookup, "UART_BAUD", DEFAULT_BAUD)?;
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            return Err(Error::Config(format!(
                "UART_BAUD {baud_rate} is not a standard rate"
            )));
        }
        let timeout = match lookup("UART_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(parse("UART_TIMEOUT_MS", &ms)?),
            None => DEFAULT_TIMEOUT,
        };
        if timeout.is_zero() {
            return Err(Error::Config("UART_TIMEOUT_MS must be positive".into()));
        }

        let bus = BusConfig {
            i2c: lookup("I2C_DEV").filter(|p| !p.is_empty()).map(PathBuf::from),
            spi: lookup("SPI_DEV").filter(|p| !p.is_empty()).map(PathBuf::from),
        };

        let decode_policy = parse_or(&lookup, "KCB_DECODE_POLICY", DecodePolicy::default())?;

        Ok(Self {
            server,
            serial: SerialConfig {
                device,
                baud_rate,
                timeout,
            },
            bus,
            decode_policy,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid value {value:?}")))
}
