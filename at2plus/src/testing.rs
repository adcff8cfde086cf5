//! Fixtures shared by the unit tests: sample records, payload encoders and an
//! in-memory console reachable through a scripted connector.

use crate::aircon::{AcAbility, AcFanSpeed, AcMode, AcPowerState, AcStatus};
use crate::checksum::CHECKSUM_LENGTH;
use crate::connection::{BoxedTransport, ConnectFailure, Connector, MessageSink};
use crate::error::{ClientError, ClientResult};
use crate::messages::{OutboundMessage, AC_ABILITY_ENTRY_LENGTH, AC_STATUS_ENTRY_LENGTH};
use crate::protocol::{
    encode_frame, ControlStatusSubHeader, ControlStatusSubType, ExtendedSubHeader,
    ExtendedSubType, Header, MessageType, SubDataLength, HEADER_LENGTH,
};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub fn sample_status(id: u8) -> AcStatus {
    AcStatus {
        id,
        power: AcPowerState::On,
        mode: AcMode::Cool,
        fan_speed: AcFanSpeed::Low,
        setpoint: 22,
        spill: false,
        timer: true,
        temperature: 22.5,
        error_code: 0,
    }
}

pub fn sample_ability(number: u8) -> AcAbility {
    AcAbility {
        number,
        name: format!("Unit {}", number),
        start_group: number * 4,
        group_count: 4,
        supported_modes: 0x1F,
        supported_fan_speeds: 0x0E,
        min_cool_setpoint: 16,
        max_cool_setpoint: 30,
        min_heat_setpoint: 10,
        max_heat_setpoint: 28,
    }
}

pub fn status_entry(status: &AcStatus) -> [u8; AC_STATUS_ENTRY_LENGTH] {
    let power = match status.power {
        AcPowerState::Off => 0,
        AcPowerState::On => 1,
        AcPowerState::Unknown(other) => other,
    };
    let mode = match status.mode {
        AcMode::Auto => 0,
        AcMode::Heat => 1,
        AcMode::Dry => 2,
        AcMode::Fan => 3,
        AcMode::Cool => 4,
        AcMode::AutoHeat => 8,
        AcMode::AutoCool => 9,
        AcMode::Unknown(other) => other,
    };
    let fan = match status.fan_speed {
        AcFanSpeed::Auto => 0,
        AcFanSpeed::Quiet => 1,
        AcFanSpeed::Low => 2,
        AcFanSpeed::Medium => 3,
        AcFanSpeed::High => 4,
        AcFanSpeed::Powerful => 5,
        AcFanSpeed::Turbo => 6,
        AcFanSpeed::IntelligentAuto => 8,
        AcFanSpeed::Unknown(other) => other,
    };
    let flags = (status.spill as u8) << 1 | status.timer as u8;
    let raw_temperature = (((status.temperature * 10.0).round() as i32 + 500) as u16) << 5;

    let mut entry = [0u8; AC_STATUS_ENTRY_LENGTH];
    entry[0] = (power << 6) | (status.id & 0x3F);
    entry[1] = (mode << 4) | (fan & 0x0F);
    entry[2] = status.setpoint;
    entry[3] = flags;
    entry[4..6].copy_from_slice(&raw_temperature.to_be_bytes());
    entry[6..8].copy_from_slice(&status.error_code.to_be_bytes());
    entry
}

/// Control/status payload carrying one status entry per unit
pub fn status_payload(statuses: &[AcStatus]) -> Bytes {
    let mut buf = BytesMut::new();
    ControlStatusSubHeader::new(
        ControlStatusSubType::AcStatus,
        SubDataLength {
            normal: 0,
            repeat_count: statuses.len() as u16,
            repeat_length: AC_STATUS_ENTRY_LENGTH as u16,
        },
    )
    .put(&mut buf);
    for status in statuses {
        buf.put_slice(&status_entry(status));
    }
    buf.freeze()
}

/// Number and length prefix followed by the ability body
pub fn ability_entry(ability: &AcAbility) -> Vec<u8> {
    let mut entry = vec![ability.number, AC_ABILITY_ENTRY_LENGTH as u8];
    let mut name = [0u8; 16];
    let bytes = ability.name.as_bytes();
    let len = bytes.len().min(name.len());
    name[..len].copy_from_slice(&bytes[..len]);
    entry.extend_from_slice(&name);
    entry.extend_from_slice(&[
        ability.start_group,
        ability.group_count,
        ability.supported_modes,
        ability.supported_fan_speeds,
        ability.min_cool_setpoint,
        ability.max_cool_setpoint,
        ability.min_heat_setpoint,
        ability.max_heat_setpoint,
    ]);
    entry
}

/// Extended payload with the ability sub-header and one entry per unit
pub fn ability_payload(abilities: &[AcAbility]) -> Bytes {
    let mut buf = BytesMut::new();
    ExtendedSubHeader::new(ExtendedSubType::Ability).put(&mut buf);
    for ability in abilities {
        buf.put_slice(&ability_entry(ability));
    }
    buf.freeze()
}

pub fn status_frame(statuses: &[AcStatus]) -> Bytes {
    encode_frame(MessageType::ControlStatus, 0, &status_payload(statuses))
}

pub fn ability_frame(abilities: &[AcAbility]) -> Bytes {
    encode_frame(MessageType::Extended, 0, &ability_payload(abilities))
}

/// Client end and console end of an in-memory connection
pub fn device_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(64 * 1024)
}

/// Read one frame the client wrote, without validating its checksum
pub async fn read_frame(device: &mut DuplexStream) -> (Header, Bytes) {
    let mut header = [0u8; HEADER_LENGTH];
    device.read_exact(&mut header).await.unwrap();
    let header = Header::from_bytes(&header).unwrap();
    let mut payload = vec![0u8; header.data_length as usize];
    device.read_exact(&mut payload).await.unwrap();
    let mut checksum = [0u8; CHECKSUM_LENGTH];
    device.read_exact(&mut checksum).await.unwrap();
    (header, Bytes::from(payload))
}

/// Outcome of one scripted connect attempt
pub enum Script {
    Stream(DuplexStream),
    Refused,
    Unresolvable,
    Fatal,
}

struct ScriptState {
    steps: VecDeque<Script>,
    attempts: Vec<Instant>,
}

/// Connector that plays back a fixed list of outcomes, then refuses forever
#[derive(Clone)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<Script>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into(),
                attempts: Vec::new(),
            })),
        }
    }

    /// When each connect attempt was made
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn target(&self) -> String {
        "console.test:9200".to_string()
    }

    async fn open(&self) -> Result<BoxedTransport, ConnectFailure> {
        let step = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            state.steps.pop_front()
        };
        match step {
            Some(Script::Stream(stream)) => Ok(Box::new(stream)),
            Some(Script::Unresolvable) => Err(ConnectFailure::Resolution(io::Error::new(
                io::ErrorKind::NotFound,
                "no such host",
            ))),
            Some(Script::Fatal) => Err(ConnectFailure::Fatal(io::ErrorKind::PermissionDenied.into())),
            Some(Script::Refused) | None => {
                Err(ConnectFailure::Transient(io::ErrorKind::ConnectionRefused.into()))
            }
        }
    }
}

/// Sink that records the ability numbers it was asked to send
pub struct RecordingSink {
    sent: mpsc::UnboundedSender<u8>,
    generation: watch::Sender<u64>,
    fail_sends: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<u8>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let (generation, _) = watch::channel(1);
        let sink = Arc::new(Self {
            sent,
            generation,
            fail_sends: Mutex::new(false),
        });
        (sink, rx)
    }

    /// Simulate a replacement connection
    pub fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock() = failing;
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, message: &dyn OutboundMessage) -> ClientResult<()> {
        if *self.fail_sends.lock() {
            return Err(ClientError::NotConnected);
        }
        let payload = message.payload();
        if message.message_type() == MessageType::Extended {
            let _ = self.sent.send(payload[2]);
        }
        Ok(())
    }

    fn generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

/// Receive the next value or fail the test after a generous timeout
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for value")
        .expect("channel closed")
}
