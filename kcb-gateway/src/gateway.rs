//! Operation dispatcher.
//!
//! [`Gateway`] is the public face of the controller: one method per
//! operation, each validating its input before anything touches the serial
//! channel or a bus. Failures come back as an [`OpError`] whose kind tells
//! the caller whose fault it was.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use strum::Display;
use thiserror::Error;

use crate::bus::{BusError, RawBus};
use crate::channel::{TransactError, Transact};
use crate::codec::{self, DecodeError, DecodePolicy};
use crate::payload::{self, ParseError};
use crate::tracing::prelude::*;
use crate::types::{
    AnalogSample, DigitalState, RawBusFrame, ServoFrame, UartFrame, ValidationError, WireCommand,
    WireReply, DIGITAL_PINS, RAW_BUS_MAX_LEN, SERVO_CHANNELS, UART_MAX_LEN,
};

/// Why an operation failed.
#[derive(Error, Debug)]
pub enum OpError {
    /// Bad input. Nothing was sent to the device.
    #[error("invalid request: {0}")]
    ValidationFailed(String),
    /// The serial channel or a bus device failed.
    #[error("transport failure: {0}")]
    TransportFailed(String),
    /// The device answered, but not with something we understand.
    #[error("protocol failure: {0}")]
    ProtocolFailed(#[from] DecodeError),
}

impl OpError {
    pub fn kind(&self) -> &'static str {
        match self {
            OpError::ValidationFailed(_) => "validation_failed",
            OpError::TransportFailed(_) => "transport_failed",
            OpError::ProtocolFailed(_) => "protocol_failed",
        }
    }
}

impl From<ValidationError> for OpError {
    fn from(e: ValidationError) -> Self {
        OpError::ValidationFailed(e.to_string())
    }
}

impl From<ParseError> for OpError {
    fn from(e: ParseError) -> Self {
        OpError::ValidationFailed(e.to_string())
    }
}

impl From<TransactError> for OpError {
    fn from(e: TransactError) -> Self {
        OpError::TransportFailed(e.to_string())
    }
}

impl From<BusError> for OpError {
    fn from(e: BusError) -> Self {
        OpError::TransportFailed(e.to_string())
    }
}

/// Operations the gateway performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    ReadDigital,
    WriteDigital,
    ReadServo,
    WriteServo,
    ReadAnalog,
    WriteRawBus,
    WriteUart,
    Status,
}

/// An operation decoded by the HTTP layer, with its body if any.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: OperationKind,
    pub payload: Option<String>,
}

impl Request {
    pub fn new(kind: OperationKind, payload: Option<String>) -> Self {
        Self { kind, payload }
    }
}

/// Combined analog and digital reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub ad: Vec<u16>,
    pub pio: Vec<u8>,
}

/// Successful outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Digital(DigitalState),
    Servo(ServoFrame),
    Analog(AnalogSample),
    Status(StatusSnapshot),
    Ack,
}

impl Reply {
    /// Response body, `None` for a bare acknowledgment.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Reply::Digital(state) => Some(json!({ "values": state.to_values() })),
            Reply::Servo(frame) => Some(json!({ "positions": &**frame })),
            Reply::Analog(sample) => Some(json!({ "values": &**sample })),
            Reply::Status(status) => Some(json!(status)),
            Reply::Ack => None,
        }
    }
}

/// Gateway to the controller's I/O.
///
/// Cheap to clone; clones share the same serial channel and buses.
#[derive(Clone)]
pub struct Gateway {
    channel: Arc<dyn Transact>,
    bus: Arc<dyn RawBus>,
    policy: DecodePolicy,
}

impl Gateway {
    pub fn new(channel: Arc<dyn Transact>, bus: Arc<dyn RawBus>, policy: DecodePolicy) -> Self {
        Self {
            channel,
            bus,
            policy,
        }
    }

    /// Run one operation, parsing its payload first for writes.
    pub async fn handle(&self, request: Request) -> Result<Reply, OpError> {
        debug!(op = %request.kind, "Handling request");

        let result = match request.kind {
            OperationKind::ReadDigital => self.read_digital().await.map(Reply::Digital),
            OperationKind::ReadServo => self.read_servo().await.map(Reply::Servo),
            OperationKind::ReadAnalog => self.read_analog().await.map(Reply::Analog),
            OperationKind::Status => self.status().await.map(Reply::Status),
            OperationKind::WriteDigital => {
                // One past capacity so oversize payloads are seen and rejected
                let payload = require_payload(&request)?;
                let values = payload::parse_int_array(payload, DIGITAL_PINS + 1)?;
                self.write_digital(&values).await.map(|_| Reply::Ack)
            }
            OperationKind::WriteServo => {
                let payload = require_payload(&request)?;
                let positions = payload::parse_int_array(payload, SERVO_CHANNELS + 1)?;
                self.write_servo(&positions).await.map(|_| Reply::Ack)
            }
            OperationKind::WriteRawBus => {
                let payload = require_payload(&request)?;
                let bus = payload::parse_bus_request(payload, RAW_BUS_MAX_LEN + 1)?;
                self.write_raw_bus(&bus.bus, bus.addr, &bus.data)
                    .await
                    .map(|_| Reply::Ack)
            }
            OperationKind::WriteUart => {
                let payload = require_payload(&request)?;
                let data = payload::parse_uart_data(payload, UART_MAX_LEN + 1)?;
                self.write_uart(&data).await.map(|_| Reply::Ack)
            }
        };

        if let Err(e) = &result {
            warn!(op = %request.kind, kind = e.kind(), error = %e, "Operation failed");
        }
        result
    }

    pub async fn read_digital(&self) -> Result<DigitalState, OpError> {
        let reply = self.transact(codec::encode_digital_read()).await?;
        Ok(codec::decode_digital_read(&reply)?)
    }

    /// Set the digital pins. Pins past the end of `values` are driven low.
    pub async fn write_digital(&self, values: &[i64]) -> Result<(), OpError> {
        let state = DigitalState::from_values(values)?;
        let reply = self.transact(codec::encode_digital_write(&state)).await?;
        Ok(codec::decode_ack(&reply)?)
    }

    pub async fn read_servo(&self) -> Result<ServoFrame, OpError> {
        let reply = self.transact(codec::encode_servo_read()).await?;
        Ok(codec::decode_servo_read(&reply, self.policy)?)
    }

    /// Move the first `positions.len()` servos; the rest keep their place.
    pub async fn write_servo(&self, positions: &[i64]) -> Result<(), OpError> {
        let frame = ServoFrame::from_values(positions)?;
        let reply = self.transact(codec::encode_servo_write(&frame)).await?;
        Ok(codec::decode_ack(&reply)?)
    }

    pub async fn read_analog(&self) -> Result<AnalogSample, OpError> {
        let reply = self.transact(codec::encode_analog_read()).await?;
        Ok(codec::decode_analog_read(&reply, self.policy)?)
    }

    /// Write raw bytes to the I2C or SPI bus. No reply is read.
    pub async fn write_raw_bus(&self, bus: &str, address: i64, data: &[i64]) -> Result<(), OpError> {
        let frame = RawBusFrame::new(bus, address, data)?;
        self.bus.write(&frame).await?;
        Ok(())
    }

    /// Pass raw bytes through to the controller's UART. Nothing is read
    /// back; whatever the controller answers is dropped as stale input
    /// before the next transaction.
    pub async fn write_uart(&self, data: &[i64]) -> Result<(), OpError> {
        let frame = UartFrame::from_values(data)?;
        self.channel.send(&codec::encode_raw_uart(&frame)).await?;
        Ok(())
    }

    /// Analog channels and digital pins, read back to back.
    pub async fn status(&self) -> Result<StatusSnapshot, OpError> {
        let ad = self.read_analog().await?.into_vec();
        let pio = self.read_digital().await?.to_values();
        Ok(StatusSnapshot { ad, pio })
    }

    async fn transact(&self, command: WireCommand) -> Result<WireReply, OpError> {
        let reply = self.channel.transact(&command).await?;
        if !reply.is_complete() {
            debug!(%command, reply = %reply.text(), "Incomplete reply");
        }
        Ok(reply)
    }
}

fn require_payload(request: &Request) -> Result<&str, OpError> {
    request
        .payload
        .as_deref()
        .ok_or_else(|| OpError::ValidationFailed(format!("{} requires a payload", request.kind)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Controller stand-in that replays canned replies and records commands.
    #[derive(Default)]
    pub(crate) struct ScriptedChannel {
        replies: Mutex<VecDeque<Result<WireReply, TransactError>>>,
        pub(crate) commands: Mutex<Vec<String>>,
        pub(crate) sent: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedChannel {
        pub(crate) fn with_replies(lines: &[&str]) -> Arc<Self> {
            let channel = Self::default();
            for line in lines {
                channel.push(Ok(WireReply::complete(line.as_bytes().to_vec())));
            }
            Arc::new(channel)
        }

        pub(crate) fn push(&self, reply: Result<WireReply, TransactError>) {
            self.replies.lock().push_back(reply);
        }

        pub(crate) fn calls(&self) -> usize {
            self.commands.lock().len()
        }
    }

    #[async_trait]
    impl Transact for ScriptedChannel {
        async fn transact(&self, command: &WireCommand) -> Result<WireReply, TransactError> {
            self.commands.lock().push(command.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(WireReply::partial(Vec::new())))
        }

        async fn send(&self, bytes: &[u8]) -> Result<(), TransactError> {
            self.sent.lock().push(bytes.to_vec());
            Ok(())
        }
    }

    /// Bus sink that counts frames.
    #[derive(Default)]
    pub(crate) struct CountingBus {
        pub(crate) frames: Mutex<Vec<RawBusFrame>>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl RawBus for CountingBus {
        async fn write(&self, frame: &RawBusFrame) -> Result<(), BusError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.frames.lock().push(frame.clone());
            Ok(())
        }
    }

    fn gateway(channel: Arc<ScriptedChannel>, bus: Arc<CountingBus>) -> Gateway {
        Gateway::new(channel, bus, DecodePolicy::Lenient)
    }

    #[tokio::test]
    async fn test_read_digital() {
        let channel = ScriptedChannel::with_replies(&["PIO:0F"]);
        let gw = gateway(channel.clone(), Arc::default());

        let state = gw.read_digital().await.unwrap();
        assert_eq!(state.bits(), 0x0F);
        assert_eq!(*channel.commands.lock(), vec!["PIO?"]);
    }

    #[tokio::test]
    async fn test_write_digital() {
        let channel = ScriptedChannel::with_replies(&["OK"]);
        let gw = gateway(channel.clone(), Arc::default());

        gw.write_digital(&[1, 0, 1, 0, 0, 1, 0, 1]).await.unwrap();
        assert_eq!(*channel.commands.lock(), vec!["PIO=A5"]);
    }

    #[tokio::test]
    async fn test_write_digital_oversize_never_reaches_channel() {
        let channel = ScriptedChannel::with_replies(&["OK"]);
        let gw = gateway(channel.clone(), Arc::default());

        let err = gw.write_digital(&[1; 17]).await.unwrap_err();
        assert!(matches!(err, OpError::ValidationFailed(_)));
        assert_eq!(channel.calls(), 0);

        // Same through the request path, where the payload is parsed
        let values = vec!["1"; 17].join(",");
        let request = Request::new(
            OperationKind::WriteDigital,
            Some(format!(r#"{{"values":[{values}]}}"#)),
        );
        let err = gw.handle(request).await.unwrap_err();
        assert!(matches!(err, OpError::ValidationFailed(_)));
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_write_digital_device_rejects() {
        let channel = ScriptedChannel::with_replies(&["ERR 1"]);
        let gw = gateway(channel, Arc::default());

        let err = gw.write_digital(&[1]).await.unwrap_err();
        assert!(matches!(
            err,
            OpError::ProtocolFailed(DecodeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_read_servo() {
        let channel = ScriptedChannel::with_replies(&["SERVO:1200,1250,1230"]);
        let gw = gateway(channel, Arc::default());

        let frame = gw.read_servo().await.unwrap();
        assert_eq!(&*frame, &[1200, 1250, 1230]);
    }

    #[tokio::test]
    async fn test_write_servo_bounds() {
        let channel = ScriptedChannel::with_replies(&["OK"]);
        let gw = gateway(channel.clone(), Arc::default());

        assert!(matches!(
            gw.write_servo(&[]).await,
            Err(OpError::ValidationFailed(_))
        ));
        assert!(matches!(
            gw.write_servo(&[1500; 9]).await,
            Err(OpError::ValidationFailed(_))
        ));
        assert_eq!(channel.calls(), 0);

        gw.write_servo(&[1500, 1600]).await.unwrap();
        assert_eq!(*channel.commands.lock(), vec!["SERVO=1500,1600"]);
    }

    #[tokio::test]
    async fn test_read_analog_strict_policy() {
        let channel = ScriptedChannel::with_replies(&["AD:1,2,x"]);
        let gw = Gateway::new(channel, Arc::new(CountingBus::default()), DecodePolicy::Strict);

        assert!(matches!(
            gw.read_analog().await,
            Err(OpError::ProtocolFailed(DecodeError::Truncated { parsed: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_write_raw_bus() {
        let bus = Arc::new(CountingBus::default());
        let channel = ScriptedChannel::with_replies(&[]);
        let gw = gateway(channel.clone(), bus.clone());

        gw.write_raw_bus("i2c", 0x50, &[1, 2, 3]).await.unwrap();
        let frames = bus.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[1, 2, 3]);
        // Raw bus writes bypass the serial channel
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_write_raw_bus_rejects_unknown_bus() {
        let bus = Arc::new(CountingBus::default());
        let gw = gateway(ScriptedChannel::with_replies(&[]), bus.clone());

        assert!(matches!(
            gw.write_raw_bus("serial", 0x50, &[1]).await,
            Err(OpError::ValidationFailed(_))
        ));
        assert!(matches!(
            gw.write_raw_bus("spi", 0, &[0; 33]).await,
            Err(OpError::ValidationFailed(_))
        ));
        assert_eq!(bus.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_protocol_failure() {
        // An empty partial reply is what the channel returns on timeout
        let channel = ScriptedChannel::with_replies(&[]);
        let gw = gateway(channel, Arc::default());

        assert!(matches!(
            gw.read_digital().await,
            Err(OpError::ProtocolFailed(DecodeError::Malformed { .. }))
        ));
        assert!(matches!(
            gw.write_servo(&[1500]).await,
            Err(OpError::ProtocolFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cut_off_reply_is_protocol_failure() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.push(Ok(WireReply::partial(&b"PIO:0"[..])));
        let gw = gateway(channel, Arc::default());
        assert!(matches!(
            gw.read_digital().await,
            Err(OpError::ProtocolFailed(DecodeError::Malformed { .. }))
        ));

        let channel = Arc::new(ScriptedChannel::default());
        channel.push(Ok(WireReply::partial(&b"AD:512,49"[..])));
        let gw = Gateway::new(channel, Arc::new(CountingBus::default()), DecodePolicy::Strict);
        assert!(matches!(
            gw.read_analog().await,
            Err(OpError::ProtocolFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_write_uart() {
        let channel = ScriptedChannel::with_replies(&[]);
        let gw = gateway(channel.clone(), Arc::default());

        let request = Request::new(
            OperationKind::WriteUart,
            Some(r#"{"data":[80,73,79,63,10]}"#.into()),
        );
        assert_eq!(gw.handle(request).await.unwrap(), Reply::Ack);
        assert_eq!(*channel.sent.lock(), vec![b"PIO?\n".to_vec()]);
        // Passthrough bytes are not a command transaction
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_write_uart_rejects_before_sending() {
        let channel = ScriptedChannel::with_replies(&[]);
        let gw = gateway(channel.clone(), Arc::default());

        let oversize = vec!["0"; UART_MAX_LEN + 1].join(",");
        for body in [
            r#"{"values":[1]}"#.to_string(),
            r#"{"data":[]}"#.to_string(),
            r#"{"data":[256]}"#.to_string(),
            format!(r#"{{"data":[{oversize}]}}"#),
        ] {
            assert!(
                matches!(
                    gw.handle(Request::new(OperationKind::WriteUart, Some(body.clone())))
                        .await,
                    Err(OpError::ValidationFailed(_))
                ),
                "body {body} should be rejected"
            );
        }
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.push(Err(TransactError::Closed));
        let gw = gateway(channel, Arc::default());

        assert!(matches!(
            gw.read_servo().await,
            Err(OpError::TransportFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_requires_payload() {
        let channel = ScriptedChannel::with_replies(&[]);
        let gw = gateway(channel.clone(), Arc::default());

        for kind in [
            OperationKind::WriteDigital,
            OperationKind::WriteServo,
            OperationKind::WriteRawBus,
        ] {
            assert!(matches!(
                gw.handle(Request::new(kind, None)).await,
                Err(OpError::ValidationFailed(_))
            ));
        }
        assert!(matches!(
            gw.handle(Request::new(
                OperationKind::WriteServo,
                Some(r#"{"foo":1}"#.into())
            ))
            .await,
            Err(OpError::ValidationFailed(_))
        ));
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_handle_status() {
        let channel = ScriptedChannel::with_replies(&["AD:512,498,7,1023", "PIO:3"]);
        let gw = gateway(channel.clone(), Arc::default());

        let reply = gw
            .handle(Request::new(OperationKind::Status, None))
            .await
            .unwrap();
        let Reply::Status(status) = &reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(status.ad, vec![512, 498, 7, 1023]);
        assert_eq!(&status.pio[..3], &[1, 1, 0]);
        assert_eq!(*channel.commands.lock(), vec!["AD?", "PIO?"]);
        assert_eq!(
            reply.to_json().unwrap()["ad"],
            json!([512, 498, 7, 1023])
        );
    }

    #[test]
    fn test_reply_json_shapes() {
        let servo = ServoFrame::from_values(&[1200, 1250]).unwrap();
        assert_eq!(
            Reply::Servo(servo).to_json(),
            Some(json!({ "positions": [1200, 1250] }))
        );

        let digital = Reply::Digital(DigitalState::from_bits(0b11)).to_json().unwrap();
        assert_eq!(digital["values"][0], 1);
        assert_eq!(digital["values"].as_array().unwrap().len(), DIGITAL_PINS);

        assert_eq!(Reply::Ack.to_json(), None);
    }
}
