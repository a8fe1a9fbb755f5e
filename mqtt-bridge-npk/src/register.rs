//! Channel-to-register mapping for NPK soil sensors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use soilsight_bridge_framework::{BridgeError, Result};
use soilsight_common::{NITROGEN, PHOSPHORUS, POTASSIUM, is_mandatory};

/// Largest supported decimal scaling (10^9 still fits a u16 reading in f64 exactly).
const MAX_DECIMALS: u8 = 9;

/// A channel this bridge knows by name, with its factory register layout.
struct KnownChannel {
    name: &'static str,
    address: u16,
    decimals: u8,
    signed: bool,
    unit: &'static str,
}

impl KnownChannel {
    const fn new(
        name: &'static str,
        address: u16,
        decimals: u8,
        signed: bool,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            address,
            decimals,
            signed,
            unit,
        }
    }
}

/// Factory register layout of the common 7-in-1 RS485 soil sensors.
const KNOWN_CHANNELS: &[KnownChannel] = &[
    KnownChannel::new(NITROGEN, 0x1E, 0, false, "mg/kg"),
    KnownChannel::new(PHOSPHORUS, 0x1F, 0, false, "mg/kg"),
    KnownChannel::new(POTASSIUM, 0x20, 0, false, "mg/kg"),
    KnownChannel::new("temperature", 0x12, 1, true, "°C"),
    KnownChannel::new("moisture", 0x13, 1, false, "%"),
    KnownChannel::new("ph", 0x06, 1, false, "pH"),
    KnownChannel::new("ec", 0x15, 0, false, "µS/cm"),
];

fn known(name: &str) -> Option<&'static KnownChannel> {
    KNOWN_CHANNELS.iter().find(|c| c.name == name)
}

/// Map alternative channel names onto the names used in telemetry.
pub fn canonical_channel_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "acidity" => "ph".to_string(),
        "conductivity" => "ec".to_string(),
        _ => lower,
    }
}

/// Register specification as written in configuration.
///
/// Either a bare address (`nitrogen: 30`) or an object
/// (`temperature: { address: 18, decimals: 1, signed: true }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterSpec {
    Address(u16),
    Detailed {
        address: u16,
        #[serde(default)]
        decimals: Option<u8>,
        #[serde(default)]
        signed: Option<bool>,
    },
}

impl RegisterSpec {
    fn address(&self) -> u16 {
        match self {
            RegisterSpec::Address(address) => *address,
            RegisterSpec::Detailed { address, .. } => *address,
        }
    }
}

/// One measurement channel bound to a holding register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub channel: String,
    pub address: u16,
    /// Raw value is divided by 10^decimals.
    pub decimals: u8,
    /// Raw value is two's complement.
    pub signed: bool,
}

impl RegisterEntry {
    /// Engineering unit for known channels.
    pub fn unit(&self) -> Option<&'static str> {
        known(&self.channel).map(|c| c.unit)
    }

    pub fn is_mandatory(&self) -> bool {
        is_mandatory(&self.channel)
    }
}

/// Ordered set of register entries.
///
/// Mandatory channels come first, then known optional channels in table
/// order, then custom channels by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    entries: Vec<RegisterEntry>,
}

impl RegisterMap {
    /// The factory layout with every known channel.
    pub fn defaults() -> Self {
        let entries = KNOWN_CHANNELS
            .iter()
            .map(|c| RegisterEntry {
                channel: c.name.to_string(),
                address: c.address,
                decimals: c.decimals,
                signed: c.signed,
            })
            .collect();
        Self { entries }
    }

    /// Build a map from configured registers.
    ///
    /// Decimals and signedness default to the factory values for known
    /// channels and to `0`/unsigned for custom ones.
    pub fn from_config(registers: &BTreeMap<String, RegisterSpec>) -> Result<Self> {
        let mut entries: Vec<RegisterEntry> = Vec::with_capacity(registers.len());

        for (name, spec) in registers {
            let channel = canonical_channel_name(name);
            if channel.is_empty() {
                return Err(BridgeError::validation("register channel name cannot be empty"));
            }
            if entries.iter().any(|e| e.channel == channel) {
                return Err(BridgeError::validation(format!(
                    "register channel '{}' is configured more than once",
                    channel
                )));
            }

            let factory = known(&channel);
            let (decimals, signed) = match spec {
                RegisterSpec::Address(_) => (
                    factory.map_or(0, |c| c.decimals),
                    factory.is_some_and(|c| c.signed),
                ),
                RegisterSpec::Detailed {
                    decimals, signed, ..
                } => (
                    decimals.unwrap_or_else(|| factory.map_or(0, |c| c.decimals)),
                    signed.unwrap_or_else(|| factory.is_some_and(|c| c.signed)),
                ),
            };

            if decimals > MAX_DECIMALS {
                return Err(BridgeError::validation(format!(
                    "register '{}': decimals must be at most {}, got {}",
                    channel, MAX_DECIMALS, decimals
                )));
            }

            entries.push(RegisterEntry {
                channel,
                address: spec.address(),
                decimals,
                signed,
            });
        }

        entries.sort_by(|a, b| Self::order_key(a).cmp(&Self::order_key(b)));
        Ok(Self { entries })
    }

    fn order_key(entry: &RegisterEntry) -> (usize, &str) {
        let position = KNOWN_CHANNELS
            .iter()
            .position(|c| c.name == entry.channel)
            .unwrap_or(KNOWN_CHANNELS.len());
        (position, entry.channel.as_str())
    }

    pub fn get(&self, channel: &str) -> Option<&RegisterEntry> {
        self.entries.iter().find(|e| e.channel == channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.get(channel).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries.iter()
    }

    /// Channel names in map order.
    pub fn channels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.channel.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Scale a raw 16-bit register into an engineering value.
pub fn decode_register(raw: u16, decimals: u8, signed: bool) -> f64 {
    let value = if signed {
        f64::from(raw as i16)
    } else {
        f64::from(raw)
    };

    if decimals == 0 {
        value
    } else {
        value / 10f64.powi(i32::from(decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map() {
        let map = RegisterMap::defaults();
        assert_eq!(map.len(), 7);
        assert_eq!(
            map.channels(),
            vec!["nitrogen", "phosphorus", "potassium", "temperature", "moisture", "ph", "ec"]
        );

        let nitrogen = map.get("nitrogen").unwrap();
        assert_eq!(nitrogen.address, 0x1E);
        assert_eq!(nitrogen.decimals, 0);
        assert!(nitrogen.is_mandatory());
        assert_eq!(nitrogen.unit(), Some("mg/kg"));

        let ph = map.get("ph").unwrap();
        assert_eq!(ph.address, 0x06);
        assert_eq!(ph.decimals, 1);
        assert!(!ph.is_mandatory());
    }

    #[test]
    fn test_from_config_orders_channels() {
        let mut registers = BTreeMap::new();
        registers.insert("salinity".to_string(), RegisterSpec::Address(0x40));
        registers.insert("Moisture".to_string(), RegisterSpec::Address(0x13));
        registers.insert("potassium".to_string(), RegisterSpec::Address(0x20));
        registers.insert("nitrogen".to_string(), RegisterSpec::Address(0x1E));

        let map = RegisterMap::from_config(&registers).unwrap();
        assert_eq!(
            map.channels(),
            vec!["nitrogen", "potassium", "moisture", "salinity"]
        );

        // Factory scaling applies to known channels given by bare address
        assert_eq!(map.get("moisture").unwrap().decimals, 1);
        let custom = map.get("salinity").unwrap();
        assert_eq!(custom.decimals, 0);
        assert!(!custom.signed);
        assert_eq!(custom.unit(), None);
    }

    #[test]
    fn test_from_config_aliases() {
        let mut registers = BTreeMap::new();
        registers.insert("acidity".to_string(), RegisterSpec::Address(0x06));
        registers.insert("conductivity".to_string(), RegisterSpec::Address(0x15));

        let map = RegisterMap::from_config(&registers).unwrap();
        assert!(map.contains("ph"));
        assert!(map.contains("ec"));
        assert!(!map.contains("acidity"));
    }

    #[test]
    fn test_from_config_duplicate_after_alias() {
        let mut registers = BTreeMap::new();
        registers.insert("ph".to_string(), RegisterSpec::Address(0x06));
        registers.insert("acidity".to_string(), RegisterSpec::Address(0x07));

        let err = RegisterMap::from_config(&registers).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_from_config_detailed_overrides() {
        let mut registers = BTreeMap::new();
        registers.insert(
            "temperature".to_string(),
            RegisterSpec::Detailed {
                address: 0x12,
                decimals: Some(2),
                signed: Some(false),
            },
        );

        let map = RegisterMap::from_config(&registers).unwrap();
        let entry = map.get("temperature").unwrap();
        assert_eq!(entry.decimals, 2);
        assert!(!entry.signed);
    }

    #[test]
    fn test_from_config_rejects_large_decimals() {
        let mut registers = BTreeMap::new();
        registers.insert(
            "nitrogen".to_string(),
            RegisterSpec::Detailed {
                address: 0x1E,
                decimals: Some(12),
                signed: None,
            },
        );

        assert!(RegisterMap::from_config(&registers).is_err());
    }

    #[test]
    fn test_register_spec_deserialize() {
        let bare: RegisterSpec = serde_json::from_str("30").unwrap();
        assert_eq!(bare, RegisterSpec::Address(30));

        let detailed: RegisterSpec =
            serde_json::from_str(r#"{"address": 18, "decimals": 1}"#).unwrap();
        assert_eq!(
            detailed,
            RegisterSpec::Detailed {
                address: 18,
                decimals: Some(1),
                signed: None
            }
        );
    }

    #[test]
    fn test_decode_register() {
        assert_eq!(decode_register(120, 0, false), 120.0);
        assert_eq!(decode_register(215, 1, false), 21.5);
        assert_eq!(decode_register(0xFFE7, 1, true), -2.5);
        assert_eq!(decode_register(0xFFE7, 0, false), 65511.0);
        assert_eq!(decode_register(65, 1, false), 6.5);
    }
}
