//! Per-unit records: static ability, live status and status subscribers

use crate::callbacks::{CallbackHandle, CallbackList};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// AC power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcPowerState {
    Off,
    On,
    Unknown(u8),
}

impl From<u8> for AcPowerState {
    fn from(value: u8) -> Self {
        match value {
            0 => AcPowerState::Off,
            1 => AcPowerState::On,
            other => AcPowerState::Unknown(other),
        }
    }
}

/// AC operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcMode {
    Auto,
    Heat,
    Dry,
    Fan,
    Cool,
    AutoHeat,
    AutoCool,
    Unknown(u8),
}

impl From<u8> for AcMode {
    fn from(value: u8) -> Self {
        match value {
            0 => AcMode::Auto,
            1 => AcMode::Heat,
            2 => AcMode::Dry,
            3 => AcMode::Fan,
            4 => AcMode::Cool,
            8 => AcMode::AutoHeat,
            9 => AcMode::AutoCool,
            other => AcMode::Unknown(other),
        }
    }
}

/// AC fan speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcFanSpeed {
    Auto,
    Quiet,
    Low,
    Medium,
    High,
    Powerful,
    Turbo,
    IntelligentAuto,
    Unknown(u8),
}

impl From<u8> for AcFanSpeed {
    fn from(value: u8) -> Self {
        match value {
            0 => AcFanSpeed::Auto,
            1 => AcFanSpeed::Quiet,
            2 => AcFanSpeed::Low,
            3 => AcFanSpeed::Medium,
            4 => AcFanSpeed::High,
            5 => AcFanSpeed::Powerful,
            6 => AcFanSpeed::Turbo,
            8 => AcFanSpeed::IntelligentAuto,
            other => AcFanSpeed::Unknown(other),
        }
    }
}

/// Live status of one AC unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcStatus {
    pub id: u8,
    pub power: AcPowerState,
    pub mode: AcMode,
    pub fan_speed: AcFanSpeed,
    pub setpoint: u8,
    pub spill: bool,
    pub timer: bool,
    /// Measured temperature in degrees Celsius
    pub temperature: f32,
    pub error_code: u16,
}

impl AcStatus {
    pub fn has_error(&self) -> bool {
        self.error_code != 0
    }
}

/// Static capabilities of one AC unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcAbility {
    pub number: u8,
    pub name: String,
    pub start_group: u8,
    pub group_count: u8,
    /// Raw supported-modes bitfield
    pub supported_modes: u8,
    /// Raw supported-fan-speeds bitfield
    pub supported_fan_speeds: u8,
    pub min_cool_setpoint: u8,
    pub max_cool_setpoint: u8,
    pub min_heat_setpoint: u8,
    pub max_heat_setpoint: u8,
}

struct AirconInner {
    ability: AcAbility,
    status: RwLock<AcStatus>,
    callbacks: CallbackList<AcStatus>,
}

/// A discovered AC unit. Cloning yields another handle to the same record.
#[derive(Clone)]
pub struct Aircon {
    inner: Arc<AirconInner>,
}

impl Aircon {
    pub(crate) fn new(ability: AcAbility, status: AcStatus) -> Self {
        Self {
            inner: Arc::new(AirconInner {
                ability,
                status: RwLock::new(status),
                callbacks: CallbackList::new(),
            }),
        }
    }

    /// AC number as used on the wire
    pub fn id(&self) -> u8 {
        self.inner.ability.number
    }

    pub fn name(&self) -> &str {
        &self.inner.ability.name
    }

    pub fn ability(&self) -> &AcAbility {
        &self.inner.ability
    }

    /// Snapshot of the latest status
    pub fn status(&self) -> AcStatus {
        self.inner.status.read().clone()
    }

    /// Subscribe to status changes of this unit
    pub fn add_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&AcStatus) + Send + Sync + 'static,
    {
        self.inner.callbacks.add(callback)
    }

    /// Replace the status in place and notify subscribers
    pub(crate) fn update_status(&self, status: AcStatus) {
        *self.inner.status.write() = status.clone();
        self.inner.callbacks.notify(&status);
    }
}

impl std::fmt::Debug for Aircon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aircon")
            .field("ability", &self.inner.ability)
            .field("status", &*self.inner.status.read())
            .finish()
    }
}
