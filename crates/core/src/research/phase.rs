//! # Research Phases
//!
//! The phase a research session is in, as asserted by the upstream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of a research session, in declared order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Session created, nothing received yet
    #[default]
    Initialization,
    /// Extracting the research topic from the request
    TopicExtraction,
    /// Writing the research brief
    ResearchBrief,
    /// Assembling the analyst panel
    Analysts,
    /// Analysts interviewing sources
    Interviews,
    /// Writing the report sections
    Report,
    /// Done
    Completed,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Initialization => "initialization",
            ResearchPhase::TopicExtraction => "topic_extraction",
            ResearchPhase::ResearchBrief => "research_brief",
            ResearchPhase::Analysts => "analysts",
            ResearchPhase::Interviews => "interviews",
            ResearchPhase::Report => "report",
            ResearchPhase::Completed => "completed",
        }
    }

    /// Check if the phase is terminal
    pub fn is_terminal(&self) -> bool {
        *self == ResearchPhase::Completed
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized phase name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown research phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for ResearchPhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Upstream has used both snake_case and kebab-case
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "initialization" => Ok(ResearchPhase::Initialization),
            "topic_extraction" => Ok(ResearchPhase::TopicExtraction),
            "research_brief" => Ok(ResearchPhase::ResearchBrief),
            "analysts" => Ok(ResearchPhase::Analysts),
            "interviews" => Ok(ResearchPhase::Interviews),
            "report" => Ok(ResearchPhase::Report),
            "completed" | "complete" => Ok(ResearchPhase::Completed),
            _ => Err(UnknownPhase(s.to_string())),
        }
    }
}

/// Outcome of applying an asserted phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// Same phase as before
    Unchanged,
    /// Moved forward (possibly skipping phases)
    Advanced,
    /// Moved backward; recorded but unusual
    Regressed,
    /// Session already completed, value ignored
    Rejected,
}

/// Apply an upstream-asserted phase to `current`
pub fn transition(current: &mut ResearchPhase, next: ResearchPhase) -> PhaseTransition {
    if *current == next {
        return PhaseTransition::Unchanged;
    }
    if current.is_terminal() {
        return PhaseTransition::Rejected;
    }
    let outcome = if next > *current {
        PhaseTransition::Advanced
    } else {
        PhaseTransition::Regressed
    };
    *current = next;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase() {
        assert_eq!("topic_extraction".parse(), Ok(ResearchPhase::TopicExtraction));
        assert_eq!("research-brief".parse(), Ok(ResearchPhase::ResearchBrief));
        assert_eq!("Interviews".parse(), Ok(ResearchPhase::Interviews));
        assert!("brainstorm".parse::<ResearchPhase>().is_err());
    }

    #[test]
    fn test_phase_order() {
        assert!(ResearchPhase::Initialization < ResearchPhase::TopicExtraction);
        assert!(ResearchPhase::Report < ResearchPhase::Completed);
    }

    #[test]
    fn test_transitions() {
        let mut phase = ResearchPhase::default();
        assert_eq!(transition(&mut phase, ResearchPhase::Analysts), PhaseTransition::Advanced);
        assert_eq!(transition(&mut phase, ResearchPhase::Analysts), PhaseTransition::Unchanged);

        // Backward values are recorded
        assert_eq!(
            transition(&mut phase, ResearchPhase::ResearchBrief),
            PhaseTransition::Regressed
        );
        assert_eq!(phase, ResearchPhase::ResearchBrief);

        // Completed is terminal
        assert_eq!(transition(&mut phase, ResearchPhase::Completed), PhaseTransition::Advanced);
        assert_eq!(transition(&mut phase, ResearchPhase::Report), PhaseTransition::Rejected);
        assert_eq!(phase, ResearchPhase::Completed);
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&ResearchPhase::TopicExtraction).unwrap();
        assert_eq!(json, "\"topic_extraction\"");
    }
}
