use once_cell::sync::Lazy;
use std::collections::HashMap;

const MORNING_2: &[&str] = &["morning_arrival_breath", "vagal_hum"];
const MORNING_6: &[&str] = &[
    "morning_arrival_breath",
    "ear_massage",
    "vagal_hum",
    "gentle_shake",
    "butterfly_hug",
    "orienting_gaze",
];
const MORNING_10: &[&str] = &[
    "morning_arrival_breath",
    "ear_massage",
    "neck_release",
    "vagal_hum",
    "body_tapping",
    "gentle_shake",
    "butterfly_hug",
    "heart_hold",
    "orienting_gaze",
    "closing_stillness",
];
const NIGHT_2: &[&str] = &["evening_body_scan", "long_exhale"];
const NIGHT_6: &[&str] = &[
    "evening_body_scan",
    "jaw_release",
    "long_exhale",
    "butterfly_hug",
    "legs_up_rest",
    "closing_stillness",
];
const NIGHT_10: &[&str] = &[
    "evening_body_scan",
    "jaw_release",
    "shoulder_drop",
    "long_exhale",
    "belly_breath",
    "butterfly_hug",
    "heart_hold",
    "legs_up_rest",
    "sleep_body_scan",
    "closing_stillness",
];

static ROUTINES: Lazy<HashMap<(&'static str, usize), &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (("morning", 2), MORNING_2),
        (("morning", 6), MORNING_6),
        (("morning", 10), MORNING_10),
        (("night", 2), NIGHT_2),
        (("night", 6), NIGHT_6),
        (("night", 10), NIGHT_10),
    ])
});

/// Ordered canonical block names for a routine, or `None` when the
/// combination is not configured.
pub fn get_routine_config(routine_type: &str, block_count: usize) -> Option<&'static [&'static str]> {
    let routine_type = routine_type.trim().to_lowercase();
    ROUTINES
        .iter()
        .find(|((name, count), _)| *name == routine_type && *count == block_count)
        .map(|(_, names)| *names)
}

/// Every configured (routine type, block count) pair, sorted.
pub fn configured_routines() -> Vec<(&'static str, usize)> {
    let mut keys: Vec<_> = ROUTINES.keys().copied().collect();
    keys.sort();
    keys
}

/// Every canonical name referenced by some routine, deduplicated.
pub fn referenced_block_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ROUTINES.values().flat_map(|names| names.iter().copied()).collect();
    names.sort_unstable();
    names.dedup();
    names
}
