//
// property_tests.rs
//
// Property-based tests for the influence map and its binary codec
//

#![cfg(test)]

use std::collections::HashSet;

use proptest::prelude::*;

use crate::codec;
use crate::ids::{FileId, TestId};
use crate::influence_map::InfluenceMap;

// ============================================================================
// Generators
// ============================================================================

fn file_name() -> impl Strategy<Value = FileId> {
    "(/src/)?[a-z]{1,6}(/[a-z_]{1,6}){0,2}\\.py".prop_map(FileId::new)
}

fn test_name() -> impl Strategy<Value = TestId> {
    "tests/test_[a-z]{1,4}\\.py::test_[a-z0-9_]{1,8}".prop_map(TestId::new)
}

/// Operation applied while building a map
#[derive(Debug, Clone)]
enum Op {
    Touch(usize),
    Hit(usize, u32, usize),
}

fn ops(files: usize, tests: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        1 => (0..files).prop_map(Op::Touch),
        4 => (0..files, 1u32..40, 0..tests).prop_map(|(f, l, t)| Op::Hit(f, l, t)),
    ];
    prop::collection::vec(op, 0..60)
}

/// A map built from random touches and hits over small file/test pools
fn influence_map() -> impl Strategy<Value = InfluenceMap> {
    (
        prop::collection::vec(file_name(), 1..6),
        prop::collection::vec(test_name(), 1..8),
    )
        .prop_flat_map(|(files, tests)| {
            let ops = ops(files.len(), tests.len());
            (Just(files), Just(tests), ops)
        })
        .prop_map(|(files, tests, ops)| {
            let mut map = InfluenceMap::new();
            for op in ops {
                match op {
                    Op::Touch(f) => {
                        map.touch(&files[f]);
                    }
                    Op::Hit(f, line, t) => {
                        map.record_hit(&files[f], line, &tests[t]);
                    }
                }
            }
            map
        })
}

// ============================================================================
// Codec properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Decoding an encoded map gives back the same files, order and per-line test sets.
    #[test]
    fn prop_round_trip_preserves_map(map in influence_map()) {
        let decoded = codec::from_bytes(&codec::to_bytes(&map)).unwrap();
        prop_assert_eq!(&decoded, &map);
        prop_assert_eq!(decoded.untested_files(), map.untested_files());
    }

    /// Re-encoding a decoded map reproduces the payload byte for byte.
    #[test]
    fn prop_reencoding_is_byte_identical(map in influence_map()) {
        let bytes = codec::to_bytes(&map);
        let again = codec::to_bytes(&codec::from_bytes(&bytes).unwrap());
        prop_assert_eq!(again, bytes);
    }

    /// Every test index in the encoded form resolves through the reverse index.
    #[test]
    fn prop_serialized_indices_resolve(map in influence_map()) {
        let serialized = codec::serialize(&map);
        for record in &serialized.entries {
            for indices in record.lines.values() {
                for index in indices {
                    prop_assert!(serialized.reverse_index.contains_key(index));
                }
            }
        }
    }

    /// Flipping any single payload byte never decodes silently into a different map.
    #[test]
    fn prop_corruption_is_detected(map in influence_map(), offset in any::<prop::sample::Index>()) {
        let mut bytes = codec::to_bytes(&map);
        let i = offset.index(bytes.len());
        bytes[i] ^= 0x5a;
        prop_assert!(codec::from_bytes(&bytes).is_err());
    }
}

// ============================================================================
// InfluenceMap properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The suite for a set of files is the duplicate-free union of their tests.
    #[test]
    fn prop_suite_is_deduplicated_union(map in influence_map(), pick in prop::collection::vec(any::<prop::sample::Index>(), 1..4)) {
        let files: Vec<FileId> = map.files().cloned().collect();
        prop_assume!(!files.is_empty());
        let chosen: Vec<FileId> = pick.iter().map(|i| files[i.index(files.len())].clone()).collect();

        let suite = map.suite(Some(&chosen)).unwrap();

        let unique: HashSet<&TestId> = suite.iter().collect();
        prop_assert_eq!(unique.len(), suite.len());

        let expected: HashSet<&TestId> = chosen
            .iter()
            .flat_map(|f| map.get(f).unwrap().affected_tests())
            .collect();
        prop_assert_eq!(unique, expected);
    }

    /// Filtering by every known file is the same as not filtering.
    #[test]
    fn prop_suite_of_all_files_matches_unfiltered(map in influence_map()) {
        let files: Vec<FileId> = map.files().cloned().collect();
        prop_assert_eq!(map.suite(Some(&files)).unwrap(), map.suite(None).unwrap());
    }

    /// Repeating a hit changes nothing and reports no new fact.
    #[test]
    fn prop_record_hit_is_idempotent(mut map in influence_map(), file in file_name(), line in 1u32..100, test in test_name()) {
        map.record_hit(&file, line, &test);
        let before = map.clone();

        prop_assert!(!map.record_hit(&file, line, &test));
        prop_assert_eq!(&map, &before);

        // touch never disturbs an existing entry either
        prop_assert!(!map.touch(&file));
        prop_assert_eq!(&map, &before);
    }
}
