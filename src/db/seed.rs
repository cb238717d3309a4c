use crate::domain::models::{Block, MediaType};
use crate::domain::polyvagal::PolyvagalState;
use anyhow::Result;
use sqlx::PgPool;

pub const DEFAULT_SOS_CANONICAL_NAME: &str = "sos_emergency_calm";

struct SeedBlock<'a> {
    canonical_name: &'a str,
    display_name: &'a str,
    media_type: MediaType,
    state_target: Option<PolyvagalState>,
    intensity: Option<i16>,
    is_routine_only: bool,
}

fn block(
    canonical_name: &'static str,
    display_name: &'static str,
    media_type: MediaType,
    state_target: Option<PolyvagalState>,
    intensity: Option<i16>,
    is_routine_only: bool,
) -> SeedBlock<'static> {
    SeedBlock {
        canonical_name,
        display_name,
        media_type,
        state_target,
        intensity,
        is_routine_only,
    }
}

fn seed_blocks() -> Vec<SeedBlock<'static>> {
    use MediaType::{Audio, Video};
    use PolyvagalState::*;

    vec![
        block("morning_arrival_breath", "Morning Arrival Breath", Video, Some(Stirring), Some(2), true),
        block("vagal_hum", "Vagal Hum", Video, Some(Activated), Some(2), false),
        block("ear_massage", "Ear Massage", Video, Some(Settling), Some(1), false),
        block("gentle_shake", "Gentle Shake", Video, Some(Activated), Some(4), false),
        block("butterfly_hug", "Butterfly Hug", Video, Some(Activated), Some(2), false),
        block("orienting_gaze", "Orienting Gaze", Video, Some(Withdrawn), Some(1), false),
        block("neck_release", "Neck Release", Video, Some(Settling), Some(2), false),
        block("body_tapping", "Body Tapping", Video, Some(Withdrawn), Some(3), false),
        block("heart_hold", "Heart Hold", Video, Some(Connected), Some(1), false),
        block("closing_stillness", "Closing Stillness", Audio, Some(Connected), Some(1), true),
        block("evening_body_scan", "Evening Body Scan", Audio, Some(Settling), Some(1), false),
        block("long_exhale", "Long Exhale", Audio, Some(Activated), Some(1), false),
        block("jaw_release", "Jaw Release", Video, Some(Activated), Some(2), false),
        block("legs_up_rest", "Legs Up Rest", Video, Some(Settling), Some(1), false),
        block("shoulder_drop", "Shoulder Drop", Video, Some(Stirring), Some(2), false),
        block("belly_breath", "Belly Breath", Audio, Some(Stirring), Some(1), false),
        block("sleep_body_scan", "Sleep Body Scan", Audio, Some(Connected), Some(1), true),
        block("free_movement", "Free Movement", Video, Some(Stirring), Some(3), false),
        block("self_havening", "Self Havening", Video, Some(Withdrawn), Some(2), false),
        block(DEFAULT_SOS_CANONICAL_NAME, "SOS: Emergency Calm", Video, None, Some(1), true),
    ]
}

fn media_url(seed: &SeedBlock<'_>) -> String {
    let ext = match seed.media_type {
        MediaType::Video => "mp4",
        MediaType::Audio => "m4a",
    };
    format!("https://media.somi.app/blocks/{}.{}", seed.canonical_name, ext)
}

/// Demo catalog for running without a database. Ids follow seed order.
pub fn demo_blocks() -> Vec<Block> {
    seed_blocks()
        .iter()
        .enumerate()
        .map(|(idx, seed)| Block {
            id: idx as i64 + 1,
            canonical_name: seed.canonical_name.to_string(),
            display_name: seed.display_name.to_string(),
            media_url: Some(media_url(seed)),
            media_type: seed.media_type,
            state_target: seed.state_target,
            intensity: seed.intensity,
            active: true,
            is_routine_only: seed.is_routine_only,
        })
        .collect()
}

/// Inserts the demo catalog. Existing rows (matched on canonical name) are
/// left alone so content edits survive restarts.
pub async fn seed_catalog(pool: &PgPool) -> Result<()> {
    let mut inserted = 0;
    for seed in seed_blocks() {
        let result = sqlx::query(
            r#"
            INSERT INTO somi_blocks
                (canonical_name, display_name, media_url, media_type, state_target, intensity, active, is_routine_only)
            VALUES ($1, $2, $3, $4, $5, $6, true, $7)
            ON CONFLICT (canonical_name) DO NOTHING
            "#,
        )
        .bind(seed.canonical_name)
        .bind(seed.display_name)
        .bind(media_url(&seed))
        .bind(seed.media_type.as_str())
        .bind(seed.state_target.map(|s| s.as_str()))
        .bind(seed.intensity)
        .bind(seed.is_routine_only)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    tracing::info!("Catalog seed finished: {} new blocks", inserted);
    Ok(())
}
