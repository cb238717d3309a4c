use crate::db::seed::DEFAULT_SOS_CANONICAL_NAME;
use crate::domain::models::Block;
use crate::domain::polyvagal::{clamp_score, PolyvagalState, MAX_SCORE};
use crate::domain::routine::get_routine_config;
use crate::error::EngineError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_INTENSITY: i32 = 5;

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    pub sos_canonical_name: String,
    /// When set, ties on the best rank are broken by an RNG seeded from this
    /// value and the request. When unset the lowest id wins.
    pub seed: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            sos_canonical_name: DEFAULT_SOS_CANONICAL_NAME.to_string(),
            seed: None,
        }
    }
}

/// Pure selection rules over a catalog snapshot. Holds no I/O handles.
#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    config: SelectionConfig,
}

/// States to try for `state`: itself, then outward by ordinal distance with
/// the more regulated neighbour first at each distance.
pub fn search_order(state: PolyvagalState) -> Vec<PolyvagalState> {
    let origin = state.ordinal() as isize;
    let mut order = vec![state];
    for distance in 1..PolyvagalState::ALL.len() as isize {
        for ordinal in [origin + distance, origin - distance] {
            if ordinal < 0 {
                continue;
            }
            if let Some(neighbour) = PolyvagalState::from_ordinal(ordinal as usize) {
                order.push(neighbour);
            }
        }
    }
    order
}

/// Lower embodiment asks for a gentler practice: 0 maps to intensity 1,
/// 100 to intensity 5.
pub fn target_intensity(score: i32) -> i32 {
    clamp_score(score) * (MAX_INTENSITY - 1) / MAX_SCORE + 1
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Picks the next practice block for a declared state and score.
    ///
    /// Candidates come from the nearest populated state bucket (untargeted
    /// blocks only when no bucket is populated). Blocks in `recent` are
    /// skipped unless that empties the pool. Remaining candidates are ranked
    /// by intensity distance to [`target_intensity`], then by id.
    pub fn select_next_video(
        &self,
        catalog: &[Block],
        state: PolyvagalState,
        score: i32,
        recent: &[i64],
    ) -> Result<Block, EngineError> {
        let playable: Vec<&Block> = catalog.iter().filter(|b| b.is_playable()).collect();
        if playable.is_empty() {
            return Err(EngineError::NoContentAvailable);
        }

        let mut candidates: Vec<&Block> = Vec::new();
        for target in search_order(state) {
            candidates = playable
                .iter()
                .copied()
                .filter(|b| b.state_target == Some(target))
                .collect();
            if !candidates.is_empty() {
                if target != state {
                    tracing::debug!("No blocks for {}, falling back to {}", state, target);
                }
                break;
            }
        }
        if candidates.is_empty() {
            tracing::warn!("No state-targeted blocks in catalog, using untargeted ones");
            candidates = playable;
        }

        let fresh: Vec<&Block> = candidates
            .iter()
            .copied()
            .filter(|b| !recent.contains(&b.id))
            .collect();
        if !fresh.is_empty() {
            candidates = fresh;
        }

        let target = target_intensity(score);
        let rank = |b: &Block| {
            let distance = b
                .intensity
                .map(|i| (i as i32 - target).abs())
                .unwrap_or(i32::MAX);
            (distance, b.id)
        };
        candidates.sort_by_key(|b| rank(*b));

        let best_distance = rank(candidates[0]).0;
        let tied: Vec<&Block> = candidates
            .iter()
            .copied()
            .take_while(|b| rank(*b).0 == best_distance)
            .collect();

        let chosen = match self.config.seed {
            Some(seed) if tied.len() > 1 => {
                let mixed = seed ^ ((state.ordinal() as u64) << 32) ^ clamp_score(score) as u64;
                let mut rng = StdRng::seed_from_u64(mixed);
                tied[rng.gen_range(0..tied.len())]
            }
            _ => tied[0],
        };
        Ok(chosen.clone())
    }

    /// The designated emergency block, independent of state or score.
    pub fn select_sos_video(&self, catalog: &[Block]) -> Result<Block, EngineError> {
        catalog
            .iter()
            .find(|b| b.canonical_name == self.config.sos_canonical_name && b.is_playable())
            .cloned()
            .ok_or(EngineError::NoContentAvailable)
    }

    /// Blocks offered for free choice, ordered by display name.
    pub fn library_blocks(&self, catalog: &[Block]) -> Vec<Block> {
        let mut blocks: Vec<Block> = catalog
            .iter()
            .filter(|b| b.is_playable() && !b.is_routine_only)
            .cloned()
            .collect();
        blocks.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.id.cmp(&b.id)));
        blocks
    }

    /// Resolves a routine into catalog blocks, in routine order. Names that
    /// are missing from the catalog are skipped.
    pub fn build_routine(
        &self,
        catalog: &[Block],
        routine_type: &str,
        block_count: usize,
    ) -> Result<Vec<Block>, EngineError> {
        let names = get_routine_config(routine_type, block_count).ok_or_else(|| {
            EngineError::ConfigurationMissing {
                routine_type: routine_type.to_string(),
                block_count,
            }
        })?;

        let mut blocks = Vec::with_capacity(names.len());
        for name in names {
            match catalog
                .iter()
                .find(|b| b.canonical_name == *name && b.is_playable())
            {
                Some(block) => blocks.push(block.clone()),
                None => tracing::warn!(
                    "Routine {}/{}: block '{}' missing from catalog",
                    routine_type,
                    block_count,
                    name
                ),
            }
        }

        if blocks.is_empty() {
            return Err(EngineError::NoContentAvailable);
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::seed::demo_blocks;
    use crate::domain::models::MediaType;

    fn block(id: i64, target: Option<PolyvagalState>, intensity: Option<i16>) -> Block {
        Block {
            id,
            canonical_name: format!("block_{id}"),
            display_name: format!("Block {id}"),
            media_url: Some(format!("https://cdn/{id}.mp4")),
            media_type: MediaType::Video,
            state_target: target,
            intensity,
            active: true,
            is_routine_only: false,
        }
    }

    #[test]
    fn test_search_order_prefers_regulated_side() {
        use PolyvagalState::*;
        assert_eq!(
            search_order(Activated),
            vec![Activated, Settling, Stirring, Connected, Withdrawn]
        );
        assert_eq!(
            search_order(Withdrawn),
            vec![Withdrawn, Stirring, Activated, Settling, Connected]
        );
        assert_eq!(search_order(Connected).len(), 5);
    }

    #[test]
    fn test_target_intensity_range() {
        assert_eq!(target_intensity(0), 1);
        assert_eq!(target_intensity(50), 3);
        assert_eq!(target_intensity(100), 5);
        assert_eq!(target_intensity(250), 5);
    }

    #[test]
    fn test_exact_state_match_wins() {
        let catalog = vec![
            block(1, Some(PolyvagalState::Settling), None),
            block(2, Some(PolyvagalState::Activated), None),
        ];
        let engine = SelectionEngine::default();
        let chosen = engine
            .select_next_video(&catalog, PolyvagalState::Activated, 45, &[])
            .unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn test_falls_back_to_nearest_populated_state() {
        let catalog = vec![
            block(10, Some(PolyvagalState::Connected), None),
            block(11, Some(PolyvagalState::Connected), None),
            block(12, Some(PolyvagalState::Connected), None),
        ];
        let engine = SelectionEngine::default();
        let chosen = engine
            .select_next_video(&catalog, PolyvagalState::Activated, 45, &[])
            .unwrap();
        assert_eq!(chosen.state_target, Some(PolyvagalState::Connected));
        assert_eq!(chosen.id, 10);
    }

    #[test]
    fn test_equal_distance_tie_goes_to_more_regulated() {
        let catalog = vec![
            block(1, Some(PolyvagalState::Stirring), None),
            block(2, Some(PolyvagalState::Settling), None),
        ];
        let chosen = SelectionEngine::default()
            .select_next_video(&catalog, PolyvagalState::Activated, 50, &[])
            .unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn test_deterministic_and_member_of_catalog() {
        let catalog = demo_blocks();
        let engine = SelectionEngine::default();
        for state in PolyvagalState::ALL {
            for score in [0, 33, 67, 100] {
                let a = engine.select_next_video(&catalog, state, score, &[]).unwrap();
                let b = engine.select_next_video(&catalog, state, score, &[]).unwrap();
                assert_eq!(a, b);
                assert!(catalog.contains(&a));
            }
        }
    }

    #[test]
    fn test_seeded_tie_break_is_reproducible() {
        let catalog: Vec<Block> = (1..=6)
            .map(|id| block(id, Some(PolyvagalState::Settling), Some(2)))
            .collect();
        let engine = SelectionEngine::new(SelectionConfig {
            seed: Some(42),
            ..Default::default()
        });
        let first = engine
            .select_next_video(&catalog, PolyvagalState::Settling, 30, &[])
            .unwrap();
        for _ in 0..5 {
            let again = engine
                .select_next_video(&catalog, PolyvagalState::Settling, 30, &[])
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_intensity_closest_to_score_ranks_first() {
        let catalog = vec![
            block(1, Some(PolyvagalState::Settling), Some(5)),
            block(2, Some(PolyvagalState::Settling), Some(1)),
            block(3, Some(PolyvagalState::Settling), None),
        ];
        let engine = SelectionEngine::default();
        let gentle = engine
            .select_next_video(&catalog, PolyvagalState::Settling, 5, &[])
            .unwrap();
        assert_eq!(gentle.id, 2);
        let strong = engine
            .select_next_video(&catalog, PolyvagalState::Settling, 95, &[])
            .unwrap();
        assert_eq!(strong.id, 1);
    }

    #[test]
    fn test_recent_blocks_are_avoided_unless_nothing_left() {
        let catalog = vec![
            block(1, Some(PolyvagalState::Connected), None),
            block(2, Some(PolyvagalState::Connected), None),
        ];
        let engine = SelectionEngine::default();
        let chosen = engine
            .select_next_video(&catalog, PolyvagalState::Connected, 90, &[1])
            .unwrap();
        assert_eq!(chosen.id, 2);

        let chosen = engine
            .select_next_video(&catalog, PolyvagalState::Connected, 90, &[1, 2])
            .unwrap();
        assert_eq!(chosen.id, 1);
    }

    #[test]
    fn test_untargeted_blocks_are_last_resort() {
        let catalog = vec![block(5, None, None)];
        let chosen = SelectionEngine::default()
            .select_next_video(&catalog, PolyvagalState::Withdrawn, 10, &[])
            .unwrap();
        assert_eq!(chosen.id, 5);
    }

    #[test]
    fn test_no_content_cases() {
        let engine = SelectionEngine::default();
        assert_eq!(
            engine.select_next_video(&[], PolyvagalState::Activated, 45, &[]),
            Err(EngineError::NoContentAvailable)
        );

        let mut silent = block(1, Some(PolyvagalState::Activated), None);
        silent.media_url = None;
        let mut retired = block(2, Some(PolyvagalState::Activated), None);
        retired.active = false;
        assert_eq!(
            engine.select_next_video(&[silent, retired], PolyvagalState::Activated, 45, &[]),
            Err(EngineError::NoContentAvailable)
        );
    }

    #[test]
    fn test_sos_is_fixed_block() {
        let catalog = demo_blocks();
        let engine = SelectionEngine::default();
        let sos = engine.select_sos_video(&catalog).unwrap();
        assert_eq!(sos.canonical_name, DEFAULT_SOS_CANONICAL_NAME);

        let without: Vec<Block> = catalog
            .into_iter()
            .filter(|b| b.canonical_name != DEFAULT_SOS_CANONICAL_NAME)
            .collect();
        assert_eq!(
            engine.select_sos_video(&without),
            Err(EngineError::NoContentAvailable)
        );
    }

    #[test]
    fn test_library_hides_routine_only_blocks() {
        let engine = SelectionEngine::default();
        let library = engine.library_blocks(&demo_blocks());
        assert!(!library.is_empty());
        assert!(library.iter().all(|b| !b.is_routine_only));
        assert!(library
            .windows(2)
            .all(|w| w[0].display_name <= w[1].display_name));
    }

    #[test]
    fn test_build_routine() {
        let engine = SelectionEngine::default();
        let catalog = demo_blocks();
        let blocks = engine.build_routine(&catalog, "morning", 6).unwrap();
        let names: Vec<&str> = blocks.iter().map(|b| b.canonical_name.as_str()).collect();
        assert_eq!(names, get_routine_config("morning", 6).unwrap());

        assert_eq!(
            engine.build_routine(&catalog, "afternoon", 6),
            Err(EngineError::ConfigurationMissing {
                routine_type: "afternoon".into(),
                block_count: 6
            })
        );
        assert_eq!(
            engine.build_routine(&[], "night", 2),
            Err(EngineError::NoContentAvailable)
        );
    }

    #[test]
    fn test_build_routine_skips_missing_blocks() {
        let engine = SelectionEngine::default();
        let catalog: Vec<Block> = demo_blocks()
            .into_iter()
            .filter(|b| b.canonical_name != "vagal_hum")
            .collect();
        let blocks = engine.build_routine(&catalog, "morning", 2).unwrap();
        assert_eq!(blocks.len(), 1);
    }
}
