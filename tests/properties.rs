use std::path::PathBuf;

use blendref::paths::{is_relative, make_relative, rebase, resolve};
use blendref::similarity::{MatchOptions, rank_names, similarity};
use proptest::prelude::*;

fn segments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 0..4)
}

fn under_root(segments: &[String]) -> PathBuf {
    let mut path = PathBuf::from("/proj");
    path.extend(segments);
    path
}

fn stored_relative() -> impl Strategy<Value = String> {
    (0_usize..3, prop::collection::vec("[a-z]{1,6}", 1..4))
        .prop_map(|(ups, names)| format!("//{}{}", "../".repeat(ups), names.join("/")))
}

proptest! {
    #[test]
    fn make_relative_then_resolve_round_trips(target in segments(), file in "[a-z]{1,6}\\.png", owner in segments()) {
        let target = under_root(&target).join(file);
        let owner_dir = under_root(&owner);
        let stored = make_relative(&target, &owner_dir);
        prop_assert!(is_relative(&stored));
        prop_assert_eq!(resolve(&stored, &owner_dir), target);
    }

    #[test]
    fn rebase_to_same_directory_is_identity(stored in stored_relative(), dir in segments()) {
        let dir = under_root(&dir);
        prop_assert_eq!(rebase(&stored, &dir, &dir), stored);
    }

    #[test]
    fn absolute_paths_are_never_rebased(abs in segments(), old in segments(), new in segments()) {
        let stored = format!("/{}", abs.join("/"));
        prop_assert_eq!(rebase(&stored, &under_root(&old), &under_root(&new)), stored);
    }

    #[test]
    fn rebased_path_resolves_to_the_same_file(
        stored in stored_relative(),
        old in prop::collection::vec("[a-z]{1,6}", 2..4),
        new in segments(),
    ) {
        let old_dir = under_root(&old);
        let new_dir = under_root(&new);
        let rebased = rebase(&stored, &old_dir, &new_dir);
        prop_assert_eq!(resolve(&rebased, &new_dir), resolve(&stored, &old_dir));
    }

    #[test]
    fn similarity_is_a_ratio(a in "[a-zA-Z_]{0,12}", b in "[a-zA-Z_]{0,12}") {
        let ratio = similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ratio));
        prop_assert!((similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn similarity_is_symmetric(a in "[a-zA-Z_]{0,12}", b in "[a-zA-Z_]{0,12}") {
        prop_assert!((similarity(&a, &b) - similarity(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn ranked_names_are_bounded_and_sorted(missing in "[a-z]{1,8}", available in prop::collection::vec("[a-z]{1,8}", 0..12)) {
        let options = MatchOptions::default();
        let ranked = rank_names(&missing, &available, options);
        prop_assert!(ranked.len() <= options.max_matches);
        prop_assert!(ranked.iter().all(|s| s.ratio >= options.threshold));
        prop_assert!(ranked.windows(2).all(|w| w[0].ratio >= w[1].ratio));
    }
}
