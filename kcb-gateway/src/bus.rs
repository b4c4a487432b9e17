//! Raw writes to the controller's I2C and SPI buses.
//!
//! These are opaque sinks: the gateway writes the caller's bytes and
//! reports whether the write went through. Nothing is read back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::codec;
use crate::tracing::prelude::*;
use crate::types::{Bus, RawBusFrame};

/// SPI clock used for raw writes.
const SPI_SPEED_HZ: u32 = 1_000_000;

mod ioctl {
    use nix::{ioctl_write_int_bad, ioctl_write_ptr};

    // linux/i2c-dev.h
    ioctl_write_int_bad!(i2c_slave, 0x0703);

    // linux/spi/spidev.h
    const SPI_IOC_MAGIC: u8 = b'k';
    ioctl_write_ptr!(spi_wr_mode, SPI_IOC_MAGIC, 1, u8);
    ioctl_write_ptr!(spi_wr_bits_per_word, SPI_IOC_MAGIC, 3, u8);
    ioctl_write_ptr!(spi_wr_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("{0} bus is not configured")]
    Unavailable(Bus),
    #[error("failed to open {bus} device {path}: {source}")]
    Open {
        bus: Bus,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{bus} write failed: {source}")]
    Write {
        bus: Bus,
        #[source]
        source: io::Error,
    },
}

/// Destination for raw bus frames.
#[async_trait]
pub trait RawBus: Send + Sync {
    async fn write(&self, frame: &RawBusFrame) -> Result<(), BusError>;
}

/// Linux i2c-dev and spidev character devices.
#[derive(Default)]
pub struct LinuxBus {
    i2c: Option<Arc<Mutex<File>>>,
    spi: Option<Arc<Mutex<File>>>,
}

impl LinuxBus {
    /// Open whichever bus devices are configured. A bus left as `None`
    /// rejects writes with [`BusError::Unavailable`].
    pub fn open(i2c: Option<&Path>, spi: Option<&Path>) -> Result<Self, BusError> {
        let i2c = i2c.map(open_i2c).transpose()?;
        let spi = spi.map(open_spi).transpose()?;
        Ok(Self {
            i2c: i2c.map(|file| Arc::new(Mutex::new(file))),
            spi: spi.map(|file| Arc::new(Mutex::new(file))),
        })
    }

    fn device(&self, bus: Bus) -> Option<Arc<Mutex<File>>> {
        match bus {
            Bus::I2c => self.i2c.clone(),
            Bus::Spi => self.spi.clone(),
        }
    }
}

#[async_trait]
impl RawBus for LinuxBus {
    async fn write(&self, frame: &RawBusFrame) -> Result<(), BusError> {
        let bus = frame.bus();
        let address = frame.address();
        let device = self.device(bus).ok_or(BusError::Unavailable(bus))?;
        let data = codec::encode_raw_bus(frame);

        trace!(%bus, address, data = %hex::encode(&data), "Raw bus write");

        tokio::task::spawn_blocking(move || {
            let mut file = device.lock();
            if bus == Bus::I2c {
                // SAFETY: I2C_SLAVE takes the address by value.
                unsafe { ioctl::i2c_slave(file.as_raw_fd(), address.into()) }
                    .map_err(io::Error::from)?;
            }
            file.write_all(&data)
        })
        .await
        .map_err(io::Error::other)
        .and_then(|result| result)
        .map_err(|source| {
            warn!(%bus, address, error = %source, "Raw bus write failed");
            BusError::Write { bus, source }
        })
    }
}

fn open_device(bus: Bus, path: &Path) -> Result<File, BusError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| BusError::Open {
            bus,
            path: path.display().to_string(),
            source,
        })
}

fn open_i2c(path: &Path) -> Result<File, BusError> {
    let file = open_device(Bus::I2c, path)?;
    debug!(path = %path.display(), "Opened I2C bus");
    Ok(file)
}

/// Open spidev in mode 0, 8 bits per word.
fn open_spi(path: &Path) -> Result<File, BusError> {
    let file = open_device(Bus::Spi, path)?;
    let fd = file.as_raw_fd();
    let mode: u8 = 0;
    let bits: u8 = 8;
    let speed: u32 = SPI_SPEED_HZ;

    // SAFETY: each ioctl reads one value of the declared type.
    let configured = unsafe {
        ioctl::spi_wr_mode(fd, &mode)
            .and_then(|_| ioctl::spi_wr_bits_per_word(fd, &bits))
            .and_then(|_| ioctl::spi_wr_max_speed_hz(fd, &speed))
    };
    configured.map_err(|errno| BusError::Open {
        bus: Bus::Spi,
        path: path.display().to_string(),
        source: errno.into(),
    })?;

    debug!(path = %path.display(), speed_hz = speed, "Opened SPI bus");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_bus_is_unavailable() {
        let bus = LinuxBus::default();
        let frame = RawBusFrame::new("spi", 0, &[1, 2, 3]).unwrap();
        assert!(matches!(
            bus.write(&frame).await,
            Err(BusError::Unavailable(Bus::Spi))
        ));
    }

    #[test]
    fn test_open_missing_device() {
        let err = LinuxBus::open(Some(Path::new("/nonexistent/i2c-9")), None)
            .err()
            .unwrap();
        assert!(matches!(err, BusError::Open { bus: Bus::I2c, .. }));
    }

    #[tokio::test]
    async fn test_spi_write_reaches_device_file() {
        // spidev ioctls fail on a plain file, so build the bus by hand
        let path = std::env::temp_dir().join(format!("kcb-spi-{}", std::process::id()));
        let file = File::create(&path).unwrap();
        let bus = LinuxBus {
            i2c: None,
            spi: Some(Arc::new(Mutex::new(file))),
        };

        let frame = RawBusFrame::new("spi", 0, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        bus.write(&frame).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        std::fs::remove_file(&path).unwrap();
    }
}
