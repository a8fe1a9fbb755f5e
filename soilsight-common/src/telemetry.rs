use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Nitrogen content channel (mg/kg).
pub const NITROGEN: &str = "nitrogen";
/// Phosphorus content channel (mg/kg).
pub const PHOSPHORUS: &str = "phosphorus";
/// Potassium content channel (mg/kg).
pub const POTASSIUM: &str = "potassium";

/// Channels that must contribute at least one value for a batch to be published.
pub const MANDATORY_CHANNELS: [&str; 3] = [NITROGEN, PHOSPHORUS, POTASSIUM];

/// Returns true if `name` is one of the mandatory NPK channels.
pub fn is_mandatory(name: &str) -> bool {
    MANDATORY_CHANNELS.contains(&name)
}

/// Rejection reasons for a poll cycle's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no mandatory channel (nitrogen, phosphorus, potassium) has a value")]
    NoMandatoryValues,
}

/// One channel's value from a single poll.
///
/// `value` is `None` when the channel could not be read this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    /// Logical channel name (e.g. "nitrogen", "temperature").
    pub name: String,

    /// Decoded value, already scaled by the register's decimals.
    pub value: Option<f64>,

    /// Decimal places of the source register. Zero-decimal channels are sent
    /// as JSON integers, all others as floats.
    pub decimals: u8,
}

impl ChannelReading {
    pub fn new(name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            name: name.into(),
            value,
            decimals: 0,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }
}

/// The readings collected during one poll cycle.
///
/// Keeps insertion order (the configured channel order) and unique names.
/// Serializes as a flat JSON object of the channels that carry a value, which
/// is the telemetry shape ThingsBoard expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingBatch {
    readings: Vec<ChannelReading>,
}

impl ReadingBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a zero-decimal channel value, replacing any earlier reading with
    /// the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.push(ChannelReading::new(name, value));
    }

    /// Record a reading, replacing any earlier reading with the same name.
    pub fn push(&mut self, reading: ChannelReading) {
        match self.readings.iter_mut().find(|r| r.name == reading.name) {
            Some(existing) => *existing = reading,
            None => self.readings.push(reading),
        }
    }

    /// Value of a channel, if it was read successfully.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.value)
    }

    /// Number of entries, including absent ones.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Iterate over the readings in channel order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelReading> {
        self.readings.iter()
    }

    /// Channel names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.readings.iter().map(|r| r.name.as_str())
    }

    /// True if at least one of nitrogen, phosphorus or potassium has a value.
    pub fn has_mandatory(&self) -> bool {
        MANDATORY_CHANNELS.iter().any(|name| self.get(name).is_some())
    }

    /// Drop every entry without a value.
    pub fn strip_absent(mut self) -> Self {
        self.readings.retain(|r| r.value.is_some());
        self
    }

    /// Turn a raw poll result into a publishable batch.
    ///
    /// Fails if no mandatory channel has a value; otherwise returns the batch
    /// with absent entries removed.
    pub fn into_publishable(self) -> Result<Self, ValidationError> {
        if !self.has_mandatory() {
            return Err(ValidationError::NoMandatoryValues);
        }
        Ok(self.strip_absent())
    }
}

impl<N: Into<String>> FromIterator<(N, Option<f64>)> for ReadingBatch {
    fn from_iter<I: IntoIterator<Item = (N, Option<f64>)>>(iter: I) -> Self {
        let mut batch = ReadingBatch::new();
        for (name, value) in iter {
            batch.insert(name, value);
        }
        batch
    }
}

impl Serialize for ReadingBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = self.readings.iter().filter(|r| r.value.is_some());
        let mut map = serializer.serialize_map(Some(present.clone().count()))?;
        for reading in present {
            if let Some(value) = reading.value {
                let measurement = Measurement::new(value, reading.decimals);
                map.serialize_entry(&reading.name, &measurement)?;
            }
        }
        map.end()
    }
}

/// Largest magnitude at which every integer is exactly representable in an f64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A reading value with the decimal scale of its register.
///
/// Zero-decimal registers are sent as `120`, not `120.0`. Scaled registers
/// are always floats, so `ph` stays `6.0` rather than flipping to `6`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub decimals: u8,
}

impl Measurement {
    pub fn new(value: f64, decimals: u8) -> Self {
        Self { value, decimals }
    }
}

impl Serialize for Measurement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.value;
        let integral = v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT_INTEGER;
        if self.decimals == 0 && integral {
            serializer.serialize_i64(v as i64)
        } else {
            serializer.serialize_f64(v)
        }
    }
}

/// Telemetry wrapped with a client-side timestamp.
///
/// Without the wrapper the broker stamps values with its own server time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimestampedPayload<'a, T: Serialize> {
    /// Unix epoch milliseconds.
    pub ts: i64,
    pub values: &'a T,
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
