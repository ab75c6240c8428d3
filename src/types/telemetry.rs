//! Decoded pack telemetry.

/// Pack status bitfield (frame byte 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Charge FET is enabled.
    pub const CHARGE_FET: Self = Self(1 << 0);

    /// Discharge FET is enabled.
    pub const DISCHARGE_FET: Self = Self(1 << 1);

    /// A charger is connected.
    pub const CHARGER_DETECTED: Self = Self(1 << 2);

    /// Charger OK. The pack reuses this bit to report cell undervoltage.
    pub const CHARGER_OK: Self = Self(1 << 3);

    /// Bulk charging phase.
    pub const CHARGING_BULK: Self = Self(1 << 5);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[must_use]
    pub const fn charge_fet_enabled(self) -> bool {
        self.contains(Self::CHARGE_FET)
    }

    #[must_use]
    pub const fn discharge_fet_enabled(self) -> bool {
        self.contains(Self::DISCHARGE_FET)
    }

    #[must_use]
    pub const fn charger_detected(self) -> bool {
        self.contains(Self::CHARGER_DETECTED)
    }

    #[must_use]
    pub const fn charger_ok(self) -> bool {
        self.contains(Self::CHARGER_OK)
    }

    /// Same bit as [`Self::charger_ok`].
    #[must_use]
    pub const fn cell_undervoltage(self) -> bool {
        self.contains(Self::CHARGER_OK)
    }

    #[must_use]
    pub const fn charging_bulk(self) -> bool {
        self.contains(Self::CHARGING_BULK)
    }
}

/// Charger state reported in frame byte 13.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerState {
    /// Pack is discharging (`0x00`).
    Discharging,
    /// Charging is starting (`0x19`).
    BeginCharging,
    /// Pack is charging (`0x7C`).
    Charging,
    /// Any other code.
    Invalid(u8),
}

impl ChargerState {
    /// Parses the charger state code.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Discharging,
            0x19 => Self::BeginCharging,
            0x7C => Self::Charging,
            other => Self::Invalid(other),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discharging => "Discharging",
            Self::BeginCharging => "Begin Charging",
            Self::Charging => "Charging",
            Self::Invalid(_) => "INVALID",
        }
    }
}

impl std::fmt::Display for ChargerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temperature sensors, in degrees Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Temperatures {
    /// Hottest cell.
    pub max_cell: u8,
    /// Cell average.
    pub avg_cell: u8,
    /// Discharge FET.
    pub discharge_fet: u8,
    /// Pack microcontroller.
    pub microcontroller: u8,
}

impl Temperatures {
    /// Highest of the three pack sensors (microcontroller excluded).
    #[must_use]
    pub fn max(&self) -> u8 {
        self.max_cell.max(self.avg_cell).max(self.discharge_fet)
    }

    /// Lowest of the three pack sensors (microcontroller excluded).
    #[must_use]
    pub fn min(&self) -> u8 {
        self.max_cell.min(self.avg_cell).min(self.discharge_fet)
    }
}

/// Measurements decoded from one validated frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// State of charge in percent.
    pub soc: u8,
    /// Charge cycle count.
    pub cycles: u16,
    /// Pack voltage in V.
    pub voltage: f64,
    /// Pack current in A (negative when discharging).
    pub current: f64,
    /// Highest cell voltage in V.
    pub cell_high: f64,
    /// Lowest cell voltage in V.
    pub cell_low: f64,
    /// Status flags.
    pub flags: StatusFlags,
    /// Charger state.
    pub charger: ChargerState,
    /// Temperature sensors.
    pub temperatures: Temperatures,
}

impl TelemetrySample {
    /// Power in W.
    #[must_use]
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }

    /// Returns true if the discharge FET is enabled.
    #[must_use]
    pub const fn discharge_enabled(&self) -> bool {
        self.flags.discharge_fet_enabled()
    }
}
