use std::fmt;

use serde::{Deserialize, Serialize};

/// Acoustic front end the external extractor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Mfcc,
    Fbank,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mfcc => "mfcc",
            Self::Fbank => "fbank",
        })
    }
}

/// Time-derivative features appended after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dynamic {
    #[default]
    Nodelta,
    Delta,
    Ddelta,
}

impl Dynamic {
    /// Derivative order passed to the delta tool, `None` when no deltas are added.
    pub fn delta_order(self) -> Option<u32> {
        match self {
            Self::Nodelta => None,
            Self::Delta => Some(1),
            Self::Ddelta => Some(2),
        }
    }
}

/// A named feature configuration; the name is the directory under the
/// feature root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureType,
    #[serde(default)]
    pub dynamic: Dynamic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_lowercase_names() {
        let spec: FeatureSpec =
            serde_json::from_str(r#"{"name": "fbank40", "type": "fbank", "dynamic": "ddelta"}"#).unwrap();
        assert_eq!(spec.kind, FeatureType::Fbank);
        assert_eq!(spec.dynamic.delta_order(), Some(2));
    }

    #[test]
    fn test_dynamic_defaults_to_nodelta() {
        let spec: FeatureSpec = serde_json::from_str(r#"{"name": "mfcc", "type": "mfcc"}"#).unwrap();
        assert_eq!(spec.dynamic, Dynamic::Nodelta);
        assert!(spec.dynamic.delta_order().is_none());
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(serde_json::from_str::<FeatureSpec>(r#"{"name": "x", "type": "plp"}"#).is_err());
    }
}
