//! Phase progression for the next training block
//!
//! Blocks move along a fixed ladder: base -> build -> peak -> taper, with
//! recovery as the deload step. Key principles:
//! - Criteria-driven, not calendar-driven
//! - Problems hold or deload, never push forward
//! - After taper (or recovery) a new cycle starts at base

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
/// Training Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    #[default]
    Base,
    Build,
    Peak,
    Taper,
    /// Deload block, outside the main ladder
    Recovery,
}

/// The progressive ladder, in order
pub const PHASE_SEQUENCE: &[TrainingPhase] = &[
    TrainingPhase::Base,
    TrainingPhase::Build,
    TrainingPhase::Peak,
    TrainingPhase::Taper,
];

impl std::fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Build => write!(f, "build"),
            Self::Peak => write!(f, "peak"),
            Self::Taper => write!(f, "taper"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

impl std::str::FromStr for TrainingPhase {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Self::Base),
            "build" => Ok(Self::Build),
            "peak" => Ok(Self::Peak),
            "taper" => Ok(Self::Taper),
            "recovery" => Ok(Self::Recovery),
            _ => Err(format!("Unknown training phase: {}", s)),
        }
    }
}

impl TrainingPhase {
    /// Next phase on the ladder (None at the top)
    pub fn next(&self) -> Option<TrainingPhase> {
        let idx = PHASE_SEQUENCE.iter().position(|p| p == self)?;
        PHASE_SEQUENCE.get(idx + 1).copied()
    }

    /// Previous phase on the ladder (None at the bottom or off-ladder)
    pub fn prev(&self) -> Option<TrainingPhase> {
        let idx = PHASE_SEQUENCE.iter().position(|p| p == self)?;
        if idx > 0 {
            PHASE_SEQUENCE.get(idx - 1).copied()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
/// Phase Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseDecision {
    /// Block went well, move up the ladder
    Advance,
    /// Repeat the current phase
    Hold,
    /// Drop to a recovery block
    Deload,
}

/// Phase for the next block given the current one and the decision
pub fn suggest_phase(current: TrainingPhase, decision: PhaseDecision) -> TrainingPhase {
    match (decision, current) {
        (PhaseDecision::Deload, _) => TrainingPhase::Recovery,
        // Recovery is never repeated back to back
        (_, TrainingPhase::Recovery) => TrainingPhase::Base,
        (PhaseDecision::Hold, phase) => phase,
        (PhaseDecision::Advance, TrainingPhase::Taper) => TrainingPhase::Recovery,
        (PhaseDecision::Advance, phase) => phase.next().unwrap_or(phase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_round_trip_through_strings() {
        for phase in [
            TrainingPhase::Base,
            TrainingPhase::Build,
            TrainingPhase::Peak,
            TrainingPhase::Taper,
            TrainingPhase::Recovery,
        ] {
            assert_eq!(phase.to_string().parse::<TrainingPhase>(), Ok(phase));
        }
        assert!("tempo".parse::<TrainingPhase>().is_err());
    }

    #[test]
    fn test_ladder_navigation() {
        assert_eq!(TrainingPhase::Base.next(), Some(TrainingPhase::Build));
        assert_eq!(TrainingPhase::Taper.next(), None);
        assert_eq!(TrainingPhase::Base.prev(), None);
        assert_eq!(TrainingPhase::Peak.prev(), Some(TrainingPhase::Build));
        assert_eq!(TrainingPhase::Recovery.next(), None);
    }

    #[test]
    fn test_suggest_phase() {
        assert_eq!(suggest_phase(TrainingPhase::Base, PhaseDecision::Advance), TrainingPhase::Build);
        assert_eq!(suggest_phase(TrainingPhase::Build, PhaseDecision::Hold), TrainingPhase::Build);
        assert_eq!(suggest_phase(TrainingPhase::Peak, PhaseDecision::Deload), TrainingPhase::Recovery);
        assert_eq!(suggest_phase(TrainingPhase::Taper, PhaseDecision::Advance), TrainingPhase::Recovery);
        assert_eq!(suggest_phase(TrainingPhase::Recovery, PhaseDecision::Hold), TrainingPhase::Base);
        assert_eq!(suggest_phase(TrainingPhase::Recovery, PhaseDecision::Deload), TrainingPhase::Recovery);
    }
}
