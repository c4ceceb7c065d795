//! Core domain types: difficulty tiers, charts, and score rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Play mode, derived from which half of the nine difficulty tiers a chart
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Single,
    Double,
}

impl Mode {
    /// Wire flag for the ranking API: 0 for single, 1 for double.
    pub fn wire_flag(self) -> u8 {
        match self {
            Mode::Single => 0,
            Mode::Double => 1,
        }
    }

    /// The difficulty tier labels belonging to this mode, in index order.
    pub fn tiers(self) -> &'static [&'static str] {
        match self {
            Mode::Single => &["bSP", "BSP", "DSP", "ESP", "CSP"],
            Mode::Double => &["BDP", "DDP", "EDP", "CDP"],
        }
    }
}

impl FromStr for Mode {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Mode::Single),
            "double" => Ok(Mode::Double),
            other => Err(UnknownDifficulty(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown difficulty tier or mode: {0}")]
pub struct UnknownDifficulty(pub String);

/// One of the nine symbolic difficulty tiers.
///
/// The fixed tier→index mapping doubles as the ranking API's addressing
/// scheme: indices 0-4 are single-mode charts, 5-8 double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Difficulty {
    /// Beginner (single)
    bSP,
    /// Basic (single)
    BSP,
    /// Difficult (single)
    DSP,
    /// Expert (single)
    ESP,
    /// Challenge (single)
    CSP,
    /// Basic (double)
    BDP,
    /// Difficult (double)
    DDP,
    /// Expert (double)
    EDP,
    /// Challenge (double)
    CDP,
}

impl Difficulty {
    /// All nine tiers in index order.
    pub const ALL: [Difficulty; 9] = [
        Difficulty::bSP,
        Difficulty::BSP,
        Difficulty::DSP,
        Difficulty::ESP,
        Difficulty::CSP,
        Difficulty::BDP,
        Difficulty::DDP,
        Difficulty::EDP,
        Difficulty::CDP,
    ];

    /// Stable numeric index (0-8) used by the ranking API.
    pub fn index(self) -> u8 {
        match self {
            Difficulty::bSP => 0,
            Difficulty::BSP => 1,
            Difficulty::DSP => 2,
            Difficulty::ESP => 3,
            Difficulty::CSP => 4,
            Difficulty::BDP => 5,
            Difficulty::DDP => 6,
            Difficulty::EDP => 7,
            Difficulty::CDP => 8,
        }
    }

    /// The play mode this tier belongs to.
    pub fn mode(self) -> Mode {
        if self.index() <= 4 {
            Mode::Single
        } else {
            Mode::Double
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::bSP => "bSP",
            Difficulty::BSP => "BSP",
            Difficulty::DSP => "DSP",
            Difficulty::ESP => "ESP",
            Difficulty::CSP => "CSP",
            Difficulty::BDP => "BDP",
            Difficulty::DDP => "DDP",
            Difficulty::EDP => "EDP",
            Difficulty::CDP => "CDP",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDifficulty(s.to_owned()))
    }
}

/// A chart joined with its song, as read by the refresh paginator.
/// Charts and songs are provisioned out-of-band and read-only here.
#[derive(Debug, Clone)]
pub struct Chart {
    pub id: Uuid,
    pub difficulty: Difficulty,
    pub rating: i32,
    /// External id used to address the ranking API.
    pub song_id: String,
    pub song_name: String,
}

impl Chart {
    /// Label used in logs and failure reports.
    pub fn label(&self) -> String {
        format!("{} {}", self.song_name, self.difficulty)
    }
}

/// One `{username, score, lamp}` tuple from the ranking API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub username: String,
    pub score: i32,
    /// Clear-type code (failed/clear/FC tiers); stored opaquely.
    pub lamp: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_indices_cover_zero_to_eight() {
        let indices: Vec<u8> = Difficulty::ALL.iter().map(|d| d.index()).collect();
        assert_eq!(indices, (0..=8).collect::<Vec<u8>>());
    }

    #[test]
    fn esp_is_single_mode_index_three() {
        let d: Difficulty = "ESP".parse().unwrap();
        assert_eq!(d.index(), 3);
        assert_eq!(d.mode(), Mode::Single);
        assert_eq!(d.mode().wire_flag(), 0);
    }

    #[test]
    fn edp_is_double_mode_index_seven() {
        let d: Difficulty = "EDP".parse().unwrap();
        assert_eq!(d.index(), 7);
        assert_eq!(d.mode(), Mode::Double);
        assert_eq!(d.mode().wire_flag(), 1);
    }

    #[test]
    fn difficulty_labels_round_trip() {
        for d in Difficulty::ALL {
            assert_eq!(d.as_str().parse::<Difficulty>().unwrap(), d);
        }
    }

    #[test]
    fn unknown_tier_is_rejected() {
        assert!("XSP".parse::<Difficulty>().is_err());
        assert!("".parse::<Difficulty>().is_err());
    }

    #[test]
    fn mode_tiers_partition_the_table() {
        let mut all: Vec<&str> = Mode::Single
            .tiers()
            .iter()
            .chain(Mode::Double.tiers())
            .copied()
            .collect();
        assert_eq!(all.len(), 9);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 9);
    }
}
