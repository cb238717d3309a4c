use serde::{Deserialize, Serialize};

/// Self-reported nervous-system state, ordered from dysregulated/low-energy
/// to regulated/connected. The ordinal is used by selection to find the
/// nearest populated neighbour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolyvagalState {
    Withdrawn,
    Stirring,
    Activated,
    Settling,
    Connected,
}

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;
const BUCKET_WIDTH: i32 = 20;

impl PolyvagalState {
    pub const ALL: [PolyvagalState; 5] = [
        PolyvagalState::Withdrawn,
        PolyvagalState::Stirring,
        PolyvagalState::Activated,
        PolyvagalState::Settling,
        PolyvagalState::Connected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolyvagalState::Withdrawn => "withdrawn",
            PolyvagalState::Stirring => "stirring",
            PolyvagalState::Activated => "activated",
            PolyvagalState::Settling => "settling",
            PolyvagalState::Connected => "connected",
        }
    }

    pub fn ordinal(&self) -> usize {
        match self {
            PolyvagalState::Withdrawn => 0,
            PolyvagalState::Stirring => 1,
            PolyvagalState::Activated => 2,
            PolyvagalState::Settling => 3,
            PolyvagalState::Connected => 4,
        }
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolyvagalState::Withdrawn => "Withdrawn",
            PolyvagalState::Stirring => "Stirring",
            PolyvagalState::Activated => "Activated",
            PolyvagalState::Settling => "Settling",
            PolyvagalState::Connected => "Connected",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            PolyvagalState::Withdrawn => "#4A5A8C",
            PolyvagalState::Stirring => "#6B8CB8",
            PolyvagalState::Activated => "#E07A5F",
            PolyvagalState::Settling => "#81B29A",
            PolyvagalState::Connected => "#F2CC8F",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PolyvagalState::Withdrawn => "Shut down, numb or far away from the body",
            PolyvagalState::Stirring => "Coming back online, low energy but noticing",
            PolyvagalState::Activated => "Revved up, anxious or restless",
            PolyvagalState::Settling => "Slowing down, breath getting easier",
            PolyvagalState::Connected => "Present, safe and in contact with the body",
        }
    }

    /// Lower bound of the score range that maps onto this state.
    pub fn score_floor(&self) -> i32 {
        self.ordinal() as i32 * BUCKET_WIDTH
    }
}

impl TryFrom<&str> for PolyvagalState {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "withdrawn" => Ok(PolyvagalState::Withdrawn),
            "stirring" => Ok(PolyvagalState::Stirring),
            "activated" => Ok(PolyvagalState::Activated),
            "settling" => Ok(PolyvagalState::Settling),
            "connected" => Ok(PolyvagalState::Connected),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PolyvagalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn clamp_score(score: i32) -> i32 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}

/// Maps an embodiment score onto a state. Buckets are `[0,20)`, `[20,40)`,
/// `[40,60)`, `[60,80)` and `[80,100]`; the last one includes 100.
pub fn score_to_state(score: i32) -> PolyvagalState {
    let score = clamp_score(score);
    let bucket = (score / BUCKET_WIDTH).min(4) as usize;
    PolyvagalState::ALL[bucket]
}
