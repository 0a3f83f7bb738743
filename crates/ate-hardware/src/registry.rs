//! Capability profiles and the registry that matches probe responses to them.
//!
//! Profiles are data: a set of case-insensitive regular expressions that must
//! all match the identity response, plus the instrument family and the
//! capabilities it declares. The registry keeps them in order and the first
//! matching profile wins, so specific profiles must come before vendor-wide
//! wildcards.

use crate::error::RegistryError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Identity
// =============================================================================

/// Parsed `*IDN?` reply: `<manufacturer>,<model>,<serial>,<firmware>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Manufacturer field.
    pub manufacturer: String,
    /// Model field.
    pub model: String,
    /// Serial number field.
    pub serial_number: String,
    /// Firmware version field.
    pub firmware_version: String,
}

impl Identity {
    /// Parse a four-field identity string. Returns `None` for other shapes.
    pub fn parse(response: &str) -> Option<Self> {
        let parts: Vec<&str> = response.trim().split(',').map(str::trim).collect();
        match parts.as_slice() {
            [manufacturer, model, serial, firmware] => Some(Self {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                serial_number: serial.to_string(),
                firmware_version: firmware.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial_number, self.firmware_version
        )
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// Instrument family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    /// DC power supply.
    PowerSupply,
    /// Digital multimeter.
    DigitalMultimeter,
    /// Function / arbitrary waveform generator.
    FunctionGenerator,
    /// Oscilloscope.
    Oscilloscope,
    /// Spectrum or signal analyzer.
    SignalAnalyzer,
    /// RF signal generator.
    SignalGenerator,
    /// Anything else (vendor wildcards).
    Other,
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentType::PowerSupply => "power_supply",
            InstrumentType::DigitalMultimeter => "digital_multimeter",
            InstrumentType::FunctionGenerator => "function_generator",
            InstrumentType::Oscilloscope => "oscilloscope",
            InstrumentType::SignalAnalyzer => "signal_analyzer",
            InstrumentType::SignalGenerator => "signal_generator",
            InstrumentType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Serialisable profile description, as found in `[[profiles]]` config tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDefinition {
    /// Unique profile id.
    pub id: String,
    /// Instrument family.
    pub instrument_type: InstrumentType,
    /// Regular expressions that must all match the probe response.
    pub patterns: Vec<String>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Number of channels.
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

fn default_channels() -> u32 {
    1
}

/// A compiled profile.
#[derive(Debug, Clone)]
pub struct CapabilityProfile {
    id: String,
    instrument_type: InstrumentType,
    patterns: Vec<Regex>,
    capabilities: BTreeSet<String>,
    channels: u32,
    description: String,
}

impl CapabilityProfile {
    /// Compile a definition.
    pub fn from_definition(def: &ProfileDefinition) -> Result<Self, RegistryError> {
        if def.id.trim().is_empty() {
            return Err(RegistryError::InvalidProfile {
                id: def.id.clone(),
                reason: "empty id".into(),
            });
        }
        if def.patterns.is_empty() {
            return Err(RegistryError::InvalidProfile {
                id: def.id.clone(),
                reason: "at least one pattern is required".into(),
            });
        }
        let patterns = def
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RegistryError::InvalidPattern {
                        id: def.id.clone(),
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: def.id.clone(),
            instrument_type: def.instrument_type,
            patterns,
            capabilities: def.capabilities.iter().cloned().collect(),
            channels: def.channels.max(1),
            description: def.description.clone(),
        })
    }

    /// Profile id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instrument family.
    pub fn instrument_type(&self) -> InstrumentType {
        self.instrument_type
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Whether the profile declares `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// True if every pattern matches `response`.
    pub fn matches(&self, response: &str) -> bool {
        self.patterns.iter().all(|p| p.is_match(response))
    }

    /// Back to a serialisable definition.
    pub fn to_definition(&self) -> ProfileDefinition {
        ProfileDefinition {
            id: self.id.clone(),
            instrument_type: self.instrument_type,
            patterns: self.patterns.iter().map(|p| p.as_str().to_string()).collect(),
            capabilities: self.capabilities.iter().cloned().collect(),
            channels: self.channels,
            description: self.description.clone(),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

const KEYSIGHT: &str = r"Keysight Technologies|Agilent Technologies";
const ROHDE_SCHWARZ: &str = r"Rohde\s*&\s*Schwarz";

/// Ordered profile list.
///
/// Written at startup through `&mut`, read by discovery through `&`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    profiles: Vec<Arc<CapabilityProfile>>,
}

impl CapabilityRegistry {
    /// Registry with no profiles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in profiles, specific before generic.
    pub fn with_builtin_profiles() -> Self {
        let mut registry = Self::new();
        for def in builtin_definitions() {
            // Built-in patterns are constant and known to compile.
            if let Err(e) = registry.register_definition(&def) {
                tracing::error!(profile = %def.id, error = %e, "Built-in profile rejected");
            }
        }
        registry
    }

    /// Add a profile, or replace the one with the same id in place.
    pub fn register_profile(&mut self, profile: CapabilityProfile) {
        let profile = Arc::new(profile);
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(slot) => *slot = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Compile and register a definition.
    pub fn register_definition(&mut self, def: &ProfileDefinition) -> Result<(), RegistryError> {
        self.register_profile(CapabilityProfile::from_definition(def)?);
        Ok(())
    }

    /// Insert a profile ahead of all others (or move an existing id there).
    pub fn register_profile_first(&mut self, profile: CapabilityProfile) {
        self.profiles.retain(|p| p.id != profile.id);
        self.profiles.insert(0, Arc::new(profile));
    }

    /// First profile matching `response`.
    pub fn match_response(&self, response: &str) -> Option<Arc<CapabilityProfile>> {
        self.profiles.iter().find(|p| p.matches(response)).cloned()
    }

    /// Profile by id.
    pub fn get(&self, id: &str) -> Option<Arc<CapabilityProfile>> {
        self.profiles.iter().find(|p| p.id == id).cloned()
    }

    /// Profiles in match order.
    pub fn profiles(&self) -> &[Arc<CapabilityProfile>] {
        &self.profiles
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn def(
    id: &str,
    instrument_type: InstrumentType,
    patterns: &[&str],
    capabilities: &[&str],
    channels: u32,
    description: &str,
) -> ProfileDefinition {
    ProfileDefinition {
        id: id.to_string(),
        instrument_type,
        patterns: patterns.iter().map(|s| s.to_string()).collect(),
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        channels,
        description: description.to_string(),
    }
}

/// Built-in profile definitions in match order.
pub fn builtin_definitions() -> Vec<ProfileDefinition> {
    use InstrumentType::*;
    vec![
        def(
            "keysight_e36100",
            PowerSupply,
            &[KEYSIGHT, r"E36(10[2-6]A)"],
            &["voltage_control", "current_limit", "multi_channel"],
            1,
            "Keysight E36100 series DC power supply",
        ),
        def(
            "keysight_34461a",
            DigitalMultimeter,
            &[KEYSIGHT, r"34461A"],
            &["dc_voltage", "ac_voltage", "dc_current", "ac_current", "resistance", "capacitance"],
            1,
            "Keysight 34461A digital multimeter",
        ),
        def(
            "keysight_33500",
            FunctionGenerator,
            &[KEYSIGHT, r"335(0[0-9]|1[0-9]|2[0-9])B?"],
            &["waveform_generation", "arbitrary_waveforms", "multi_channel"],
            2,
            "Keysight 33500 series function generator",
        ),
        def(
            "keysight_dsox1000",
            Oscilloscope,
            &[KEYSIGHT, r"DSOX1[0-9]{3}G?"],
            &["waveform_capture", "measurements", "triggering", "multi_channel"],
            4,
            "Keysight DSOX1000 series oscilloscope",
        ),
        def(
            "rs_fswp",
            SignalAnalyzer,
            &[ROHDE_SCHWARZ, r"FSWP[0-9]+"],
            &["spectrum_analysis", "signal_analysis", "measurements", "markers", "wide_bandwidth"],
            1,
            "Rohde & Schwarz FSWP phase noise / signal analyzer",
        ),
        def(
            "rs_fsv",
            SignalAnalyzer,
            &[ROHDE_SCHWARZ, r"FSV[0-9]+"],
            &["spectrum_analysis", "measurements", "markers", "trace_analysis"],
            1,
            "Rohde & Schwarz FSV spectrum analyzer",
        ),
        def(
            "rs_sma100a",
            SignalGenerator,
            &[ROHDE_SCHWARZ, r"SMA100A"],
            &["rf_generation", "modulation", "high_purity", "cw_generation"],
            1,
            "Rohde & Schwarz SMA100A signal generator",
        ),
        def(
            "keysight_generic",
            Other,
            &[KEYSIGHT],
            &["scpi"],
            1,
            "Any Keysight / Agilent SCPI instrument",
        ),
        def(
            "rs_generic",
            Other,
            &[ROHDE_SCHWARZ],
            &["scpi"],
            1,
            "Any Rohde & Schwarz SCPI instrument",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, patterns: &[&str]) -> CapabilityProfile {
        CapabilityProfile::from_definition(&def(id, InstrumentType::Other, patterns, &[], 1, ""))
            .unwrap()
    }

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("Keysight Technologies, E36103A ,MY123,2.1.0\n").unwrap();
        assert_eq!(id.manufacturer, "Keysight Technologies");
        assert_eq!(id.model, "E36103A");
        assert_eq!(id.serial_number, "MY123");
        assert_eq!(id.firmware_version, "2.1.0");
        assert!(Identity::parse("just a string").is_none());
    }

    #[test]
    fn test_builtin_matching() {
        let registry = CapabilityRegistry::with_builtin_profiles();
        assert_eq!(registry.len(), builtin_definitions().len());

        let cases = [
            ("Keysight Technologies,E36103A,MY1,2.1", "keysight_e36100"),
            ("Agilent Technologies,34461A,MY2,A.02", "keysight_34461a"),
            ("KEYSIGHT TECHNOLOGIES,33522B,MY3,4.0", "keysight_33500"),
            ("Keysight Technologies,DSOX1204G,CN4,1.10", "keysight_dsox1000"),
            ("Rohde&Schwarz,FSWP26,100,1.5", "rs_fswp"),
            ("ROHDE&SCHWARZ,FSV7,101,3.4", "rs_fsv"),
            ("Rohde&Schwarz,SMA100A,102,3.1", "rs_sma100a"),
            ("Keysight Technologies,N9020B,MY5,A.1", "keysight_generic"),
            ("Rohde & Schwarz,RTO2044,103,4.7", "rs_generic"),
        ];
        for (response, expected) in cases {
            let matched = registry.match_response(response).map(|p| p.id().to_string());
            assert_eq!(matched.as_deref(), Some(expected), "{}", response);
        }
        assert!(registry.match_response("Tektronix,MSO44,1,1").is_none());
    }

    #[test]
    fn test_all_patterns_must_match() {
        let p = profile("both", &["ACME", "X100"]);
        assert!(p.matches("acme,x100,1,1"));
        assert!(!p.matches("ACME,Y200,1,1"));
    }

    #[test]
    fn test_order_decides_between_specific_and_wildcard() {
        let mut specific_first = CapabilityRegistry::new();
        specific_first.register_profile(profile("specific", &["ACME", "X100"]));
        specific_first.register_profile(profile("wildcard", &["ACME"]));
        assert_eq!(
            specific_first.match_response("ACME,X100,1,1").unwrap().id(),
            "specific"
        );

        let mut wildcard_first = CapabilityRegistry::new();
        wildcard_first.register_profile(profile("wildcard", &["ACME"]));
        wildcard_first.register_profile(profile("specific", &["ACME", "X100"]));
        assert_eq!(
            wildcard_first.match_response("ACME,X100,1,1").unwrap().id(),
            "wildcard"
        );
    }

    #[test]
    fn test_register_is_idempotent_and_keeps_position() {
        let mut registry = CapabilityRegistry::new();
        registry.register_profile(profile("a", &["ONE"]));
        registry.register_profile(profile("b", &["TWO"]));
        registry.register_profile(profile("a", &["THREE"]));
        registry.register_profile(profile("a", &["THREE"]));

        let ids: Vec<&str> = registry.profiles().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.match_response("ONE").is_none());
        assert_eq!(registry.match_response("THREE").unwrap().id(), "a");
    }

    #[test]
    fn test_register_first_moves_profile() {
        let mut registry = CapabilityRegistry::with_builtin_profiles();
        registry.register_profile_first(profile("override", &["Keysight"]));
        assert_eq!(
            registry
                .match_response("Keysight Technologies,E36103A,1,1")
                .unwrap()
                .id(),
            "override"
        );
    }

    #[test]
    fn test_invalid_definitions() {
        let bad_regex = def("x", InstrumentType::Other, &["(unclosed"], &[], 1, "");
        assert!(matches!(
            CapabilityProfile::from_definition(&bad_regex),
            Err(RegistryError::InvalidPattern { .. })
        ));
        let no_patterns = def("y", InstrumentType::Other, &[], &[], 1, "");
        assert!(CapabilityProfile::from_definition(&no_patterns).is_err());
    }

    #[test]
    fn test_definition_from_toml_shape() {
        let json = r#"{"id":"lab_psu","instrument_type":"power_supply",
            "patterns":["ACME","PSU-\\d+"],"capabilities":["voltage_control"]}"#;
        let def: ProfileDefinition = serde_json::from_str(json).unwrap();
        let profile = CapabilityProfile::from_definition(&def).unwrap();
        assert_eq!(profile.channels(), 1);
        assert!(profile.has_capability("voltage_control"));
        assert!(profile.matches("acme,psu-30,1,1"));
        assert_eq!(profile.to_definition().patterns, def.patterns);
    }
}
