//! Hwmon attribute filenames
//!
//! Maps `(kind, index, attribute)` triples to sysfs filenames and back.
//! Every attribute is named `<prefix><index>_<suffix>` except the PWM duty
//! cycle, which is the bare `pwm<index>` file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::data::SensorKind;

/// Attribute of one hwmon sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    #[default]
    Input,
    Label,
    Min,
    Max,
    Crit,
    Alarm,
    Enable,
    Target,
    Fault,
    Beep,
    Offset,
    Type,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 12] = [
        AttributeKind::Input,
        AttributeKind::Label,
        AttributeKind::Min,
        AttributeKind::Max,
        AttributeKind::Crit,
        AttributeKind::Alarm,
        AttributeKind::Enable,
        AttributeKind::Target,
        AttributeKind::Fault,
        AttributeKind::Beep,
        AttributeKind::Offset,
        AttributeKind::Type,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            AttributeKind::Input => "input",
            AttributeKind::Label => "label",
            AttributeKind::Min => "min",
            AttributeKind::Max => "max",
            AttributeKind::Crit => "crit",
            AttributeKind::Alarm => "alarm",
            AttributeKind::Enable => "enable",
            AttributeKind::Target => "target",
            AttributeKind::Fault => "fault",
            AttributeKind::Beep => "beep",
            AttributeKind::Offset => "offset",
            AttributeKind::Type => "type",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.suffix() == suffix)
    }

    /// Attributes the kernel accepts writes on
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            AttributeKind::Min
                | AttributeKind::Max
                | AttributeKind::Crit
                | AttributeKind::Enable
                | AttributeKind::Target
                | AttributeKind::Beep
                | AttributeKind::Offset
        )
    }

    /// Attributes holding a quantity in the sensor's own unit
    ///
    /// Flags such as `alarm`, `enable` or `type` are plain integers.
    pub fn is_measurement(self) -> bool {
        matches!(
            self,
            AttributeKind::Input
                | AttributeKind::Min
                | AttributeKind::Max
                | AttributeKind::Crit
                | AttributeKind::Target
                | AttributeKind::Offset
        )
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A classified attribute filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAttribute {
    pub kind: SensorKind,
    pub index: u32,
    pub attribute: AttributeKind,
}

/// Filename of an attribute, or `None` for kinds without an hwmon prefix
pub fn attribute_filename(kind: SensorKind, index: u32, attribute: AttributeKind) -> Option<String> {
    let prefix = kind.prefix()?;
    if kind == SensorKind::Pwm && attribute == AttributeKind::Input {
        return Some(format!("{}{}", prefix, index));
    }
    Some(format!("{}{}_{}", prefix, index, attribute.suffix()))
}

fn attribute_patterns() -> &'static [(SensorKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(SensorKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SensorKind::HWMON
            .into_iter()
            .filter_map(|kind| {
                let prefix = kind.prefix()?;
                let pattern = if kind == SensorKind::Pwm {
                    format!(r"^{}(\d+)(?:_(.+))?$", prefix)
                } else {
                    format!(r"^{}(\d+)_(.+)$", prefix)
                };
                // Patterns are built from fixed prefixes and always compile
                Regex::new(&pattern).ok().map(|re| (kind, re))
            })
            .collect()
    })
}

/// Classify an hwmon filename
///
/// Returns `None` for files that are not sensor attributes (`name`,
/// `uevent`, ...) and for unrecognised suffixes such as `pwm1_mode`.
pub fn parse_attribute_filename(file_name: &str) -> Option<ParsedAttribute> {
    for (kind, re) in attribute_patterns() {
        let Some(caps) = re.captures(file_name) else {
            continue;
        };
        let index = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let attribute = match caps.get(2) {
            Some(suffix) => AttributeKind::from_suffix(suffix.as_str())?,
            // Only the PWM pattern has an optional suffix
            None => AttributeKind::Input,
        };
        return Some(ParsedAttribute {
            kind: *kind,
            index,
            attribute,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pwm_input_is_bare_file() {
        assert_eq!(
            attribute_filename(SensorKind::Pwm, 2, AttributeKind::Input).as_deref(),
            Some("pwm2")
        );
        assert_eq!(
            attribute_filename(SensorKind::Pwm, 2, AttributeKind::Enable).as_deref(),
            Some("pwm2_enable")
        );
    }

    #[test]
    fn test_other_kinds_use_suffix() {
        let expected = [
            (SensorKind::Temperature, "temp3_input"),
            (SensorKind::Voltage, "in3_input"),
            (SensorKind::Fan, "fan3_input"),
            (SensorKind::Power, "power3_input"),
            (SensorKind::Current, "curr3_input"),
            (SensorKind::Humidity, "humidity3_input"),
            (SensorKind::Pressure, "pressure3_input"),
        ];
        for (kind, name) in expected {
            assert_eq!(
                attribute_filename(kind, 3, AttributeKind::Input).as_deref(),
                Some(name)
            );
        }
        assert_eq!(
            attribute_filename(SensorKind::Temperature, 1, AttributeKind::Crit).as_deref(),
            Some("temp1_crit")
        );
        assert_eq!(attribute_filename(SensorKind::Generic, 1, AttributeKind::Input), None);
    }

    #[test]
    fn test_parse_filenames() {
        assert_eq!(
            parse_attribute_filename("temp12_label"),
            Some(ParsedAttribute {
                kind: SensorKind::Temperature,
                index: 12,
                attribute: AttributeKind::Label,
            })
        );
        assert_eq!(
            parse_attribute_filename("pwm1"),
            Some(ParsedAttribute {
                kind: SensorKind::Pwm,
                index: 1,
                attribute: AttributeKind::Input,
            })
        );
        assert_eq!(
            parse_attribute_filename("pwm1_enable").map(|p| p.attribute),
            Some(AttributeKind::Enable)
        );
        assert_eq!(
            parse_attribute_filename("in0_max").map(|p| (p.kind, p.index)),
            Some((SensorKind::Voltage, 0))
        );
    }

    #[test]
    fn test_parse_ignores_non_attributes() {
        assert_eq!(parse_attribute_filename("name"), None);
        assert_eq!(parse_attribute_filename("uevent"), None);
        assert_eq!(parse_attribute_filename("pwm1_mode"), None);
        assert_eq!(parse_attribute_filename("intrusion0_alarm"), None);
        assert_eq!(parse_attribute_filename("temp_input"), None);
    }

    #[test]
    fn test_filename_round_trip() {
        for kind in SensorKind::HWMON {
            for attribute in AttributeKind::ALL {
                let Some(name) = attribute_filename(kind, 4, attribute) else {
                    continue;
                };
                let parsed = parse_attribute_filename(&name).unwrap();
                assert_eq!((parsed.kind, parsed.index, parsed.attribute), (kind, 4, attribute));
            }
        }
    }
}
