//! Candidate pool selection
//!
//! Builds the ordered ballot: nominations first, then random catalog fillers
//! that avoid the current map and, where possible, recently played maps.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::catalog::MapEntry;

/// Select up to `target` ballot entries.
///
/// `nominated` is already capacity-bounded and keeps its order. Fillers are
/// drawn from `catalog` minus the current map and minus nominated ids. If
/// excluding recent maps would leave no fillers, recent maps are allowed back
/// in so a vote is never starved for fresh maps.
pub fn select_candidates<R: Rng + ?Sized>(
    nominated: &[MapEntry],
    catalog: &[MapEntry],
    is_recent: impl Fn(&str) -> bool,
    current_map_id: Option<&str>,
    target: usize,
    rng: &mut R,
) -> Vec<MapEntry> {
    let mut selected: Vec<MapEntry> = nominated.iter().take(target).cloned().collect();
    let needed = target.saturating_sub(selected.len());
    if needed == 0 {
        return selected;
    }

    let taken: HashSet<&str> = selected.iter().map(|m| m.id.as_str()).collect();
    let pool: Vec<&MapEntry> = catalog
        .iter()
        .filter(|m| !taken.contains(m.id.as_str()))
        .filter(|m| current_map_id != Some(m.id.as_str()))
        .collect();

    let fresh: Vec<&MapEntry> = pool
        .iter()
        .copied()
        .filter(|m| !is_recent(m.id.as_str()))
        .collect();

    let mut fillers = if fresh.is_empty() { pool } else { fresh };
    fillers.shuffle(rng);

    debug!(
        nominated = selected.len(),
        fillers = fillers.len().min(needed),
        target,
        "Selected ballot candidates"
    );

    selected.extend(fillers.into_iter().take(needed).cloned());
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entry(id: &str) -> MapEntry {
        MapEntry::new(id, format!("Map {}", id))
    }

    fn catalog() -> Vec<MapEntry> {
        ["A", "B", "C", "D", "E"].iter().map(|id| entry(id)).collect()
    }

    #[test]
    fn test_nominations_first_then_fresh_fillers() {
        let nominated = vec![entry("A"), entry("B")];
        let recent: HashSet<&str> = ["C"].into_iter().collect();

        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let selected = select_candidates(
                &nominated,
                &catalog(),
                |id| recent.contains(id),
                Some("A"),
                4,
                &mut rng,
            );

            let ids: Vec<&str> = selected.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids.len(), 4);
            assert_eq!(&ids[..2], &["A", "B"]);
            let mut fillers = ids[2..].to_vec();
            fillers.sort_unstable();
            assert_eq!(fillers, vec!["D", "E"]);
        }
    }

    #[test]
    fn test_current_map_never_a_filler() {
        let mut rng = StdRng::seed_from_u64(7);
        let selected = select_candidates(&[], &catalog(), |_| false, Some("C"), 10, &mut rng);
        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|m| m.id != "C"));
    }

    #[test]
    fn test_falls_back_to_recent_when_fresh_pool_empty() {
        let catalog = vec![entry("A"), entry("B"), entry("C")];
        let mut rng = StdRng::seed_from_u64(1);
        let selected = select_candidates(&[], &catalog, |_| true, Some("A"), 5, &mut rng);

        let mut ids: Vec<&str> = selected.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn test_prefers_fresh_even_if_short() {
        // One fresh filler exists: recent maps stay excluded even though the
        // ballot ends up shorter than the target.
        let catalog = vec![entry("A"), entry("B"), entry("C")];
        let mut rng = StdRng::seed_from_u64(3);
        let selected = select_candidates(&[], &catalog, |id| id != "B", None, 3, &mut rng);
        assert_eq!(selected, vec![entry("B")]);
    }

    #[test]
    fn test_full_nominations_skip_catalog() {
        let nominated = vec![entry("X"), entry("Y")];
        let mut rng = StdRng::seed_from_u64(0);
        let selected = select_candidates(&nominated, &catalog(), |_| false, None, 2, &mut rng);
        assert_eq!(selected, nominated);
    }

    #[test]
    fn test_empty_catalog_yields_only_nominations() {
        let nominated = vec![entry("X")];
        let mut rng = StdRng::seed_from_u64(0);
        let selected = select_candidates(&nominated, &[], |_| false, None, 8, &mut rng);
        assert_eq!(selected, nominated);
    }
}
