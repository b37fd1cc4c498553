use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifacts::COMPLEXITY_ASSESSMENT_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Standard => write!(f, "standard"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    pub complexity: Complexity,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_research: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_self_critique: Option<bool>,
}

impl Default for ComplexityAssessment {
    fn default() -> Self {
        Self {
            complexity: Complexity::Standard,
            confidence: 0.0,
            reasoning: "assessment missing or invalid, defaulting to standard".to_string(),
            needs_research: None,
            needs_self_critique: None,
        }
    }
}

impl ComplexityAssessment {
    fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }

    /// Read the assessor's output. A missing or invalid file defaults to
    /// `standard`.
    pub fn load(spec_dir: &Path) -> Self {
        let path = spec_dir.join(COMPLEXITY_ASSESSMENT_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            tracing::debug!("no complexity assessment, defaulting to standard");
            return Self::default();
        };
        match serde_json::from_str::<ComplexityAssessment>(&content) {
            Ok(assessment) if assessment.is_valid() => assessment,
            Ok(_) => {
                tracing::warn!("complexity assessment out of range, defaulting to standard");
                Self::default()
            }
            Err(e) => {
                tracing::warn!("complexity assessment unreadable ({e}), defaulting to standard");
                Self::default()
            }
        }
    }
}
