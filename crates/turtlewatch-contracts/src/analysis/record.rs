use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wellbeing {
    Good,
    Distressed,
    #[default]
    Unknown,
}

impl Wellbeing {
    /// Anything other than `good` or `distressed` (case-insensitive) is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "good" => Self::Good,
            "distressed" => Self::Distressed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Distressed => "distressed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Wellbeing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one habitat image analysis.
///
/// Every field has a default, so a record can always be built from a partial
/// or empty model answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRecord {
    pub wellbeing: Wellbeing,
    pub carapace_up: bool,
    pub plastron_visible: bool,
    pub entrapment: bool,
    pub unusual_inactivity: bool,
    pub aggressive_interactions: bool,
    pub eggs_present: bool,
    pub notes: String,
}

impl AnalysisRecord {
    pub fn is_unknown(&self) -> bool {
        self.wellbeing == Wellbeing::Unknown
    }
}
