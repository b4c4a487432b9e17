//! Serial channel to the controller.
//!
//! The channel owns the one open serial stream and runs one transaction at
//! a time: discard stale input, write a command line, then read until
//! newline, a full buffer, or the idle timeout. Concurrent callers queue on
//! the channel's lock, so their bytes never interleave on the wire.
//!
//! Stale input is whatever the controller sent outside a transaction: the
//! late answer to a command that timed out, or the tail of an overflowed
//! reply. It is dropped so it cannot be taken for the next reply.
//!
//! A transport error closes the channel for good. There is no reconnect;
//! every later transaction fails with [`TransactError::Closed`].

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::FutureExt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time;
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

use crate::tracing::prelude::*;
use crate::types::{WireCommand, WireReply};

/// Default wait for the next reply byte.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest reply kept; the rest of the line is discarded as stale input.
pub const REPLY_BUF_SIZE: usize = 256;

/// Most stale bytes dropped before one command.
const DRAIN_LIMIT: usize = 4 * REPLY_BUF_SIZE;

/// Opening the serial device failed.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("serial device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },
}

/// A transaction failed at the transport level.
#[derive(Error, Debug)]
pub enum TransactError {
    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),
    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),
    #[error("serial channel closed")]
    Closed,
}

/// Something that runs command/reply transactions against the controller.
#[async_trait]
pub trait Transact: Send + Sync {
    /// Send `command` and return the reply, which may be partial or empty
    /// if the controller went quiet.
    async fn transact(&self, command: &WireCommand) -> Result<WireReply, TransactError>;

    /// Write `bytes` as they are, without waiting for a reply.
    async fn send(&self, bytes: &[u8]) -> Result<(), TransactError>;
}

/// Line-oriented channel over a serial stream.
pub struct SerialChannel<S = SerialStream> {
    stream: Mutex<Option<S>>,
    timeout: Duration,
}

impl SerialChannel<SerialStream> {
    /// Open `path` as 8N1, raw, no flow control.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, OpenError> {
        let unavailable = |source| OpenError::DeviceUnavailable {
            path: path.to_string(),
            source,
        };

        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(unavailable)?;

        // Drop whatever the controller sent before we were listening
        stream.clear(ClearBuffer::Input).map_err(unavailable)?;

        debug!(path, baud_rate, ?timeout, "Opened serial channel");
        Ok(Self::new(stream, timeout))
    }
}

impl<S> SerialChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already open stream.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            timeout,
        }
    }

    /// Release the stream. Waits for any transaction in flight.
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                warn!(error = %e, "Error closing serial channel");
            }
            debug!("Closed serial channel");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}

#[async_trait]
impl<S> Transact for SerialChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn transact(&self, command: &WireCommand) -> Result<WireReply, TransactError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransactError::Closed)?;

        trace!(%command, "Sending command");
        match exchange(stream, command, self.timeout).await {
            Ok(reply) => {
                trace!(
                    reply = %reply.text(),
                    complete = reply.is_complete(),
                    "Received reply"
                );
                Ok(reply)
            }
            Err(e) => {
                error!(%command, error = %e, "Serial transport failed, closing channel");
                *guard = None;
                Err(e)
            }
        }
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransactError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransactError::Closed)?;

        trace!(data = %hex::encode(bytes), "Sending raw bytes");
        if let Err(e) = write_raw(stream, bytes).await {
            error!(error = %e, "Serial transport failed, closing channel");
            *guard = None;
            return Err(e);
        }
        Ok(())
    }
}

// Drop input already waiting on the line without blocking.
fn drain<S>(stream: &mut S) -> Result<usize, TransactError>
where
    S: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 64];
    let mut dropped = 0;
    while dropped < DRAIN_LIMIT {
        match stream.read(&mut scratch).now_or_never() {
            None => break,
            Some(Ok(0)) => return Err(TransactError::Read(closed())),
            Some(Ok(n)) => dropped += n,
            Some(Err(e)) => return Err(TransactError::Read(e)),
        }
    }
    Ok(dropped)
}

async fn write_raw<S>(stream: &mut S, bytes: &[u8]) -> Result<(), TransactError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(TransactError::Write)?;
    stream.flush().await.map_err(TransactError::Write)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "serial stream closed")
}

async fn exchange<S>(
    stream: &mut S,
    command: &WireCommand,
    timeout: Duration,
) -> Result<WireReply, TransactError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stale = drain(stream)?;
    if stale > 0 {
        debug!(%command, stale, "Dropped stale input");
    }

    write_raw(stream, &command.to_line()).await?;

    let mut reply = BytesMut::with_capacity(REPLY_BUF_SIZE);
    let mut byte = [0u8; 1];
    while reply.len() < REPLY_BUF_SIZE {
        match time::timeout(timeout, stream.read(&mut byte)).await {
            Err(_) => {
                debug!(%command, received = reply.len(), "Reply timed out");
                return Ok(WireReply::partial(reply.freeze()));
            }
            Ok(Ok(0)) => return Err(TransactError::Read(closed())),
            Ok(Ok(_)) if byte[0] == b'\n' => {
                return Ok(WireReply::complete(reply.freeze()));
            }
            Ok(Ok(_)) => reply.put_u8(byte[0]),
            Ok(Err(e)) => return Err(TransactError::Read(e)),
        }
    }

    debug!(%command, "Reply buffer full");
    Ok(WireReply::partial(reply.freeze()))
}
