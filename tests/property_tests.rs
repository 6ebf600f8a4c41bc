//! Property-based tests
//!
//! These tests verify:
//! - Platform strings parse and print back unchanged
//! - Package grouping never loses, duplicates or reorders packages
//! - Reinstall/install classification is an order-preserving partition
//! - Tags file lines survive a parse/render cycle

use nightly_installer::ayum::{InstalledPackage, classify, strip_extension};
use nightly_installer::config::is_cache_branch;
use nightly_installer::package::{HLT_PREFIX, OFFLINE_PREFIX, Package, PackageSet};
use nightly_installer::types::{Binary, Build, Compiler, Os, Platform};
use nightly_installer::TagEntry;
use proptest::prelude::*;
use std::path::PathBuf;
use strum::IntoEnumIterator;

// =============================================================================
// Platform
// =============================================================================

fn platform_strategy() -> impl Strategy<Value = Platform> {
    (
        prop::sample::select(Binary::iter().collect::<Vec<_>>()),
        prop::sample::select(Os::iter().collect::<Vec<_>>()),
        prop::sample::select(Compiler::iter().collect::<Vec<_>>()),
        prop::sample::select(Build::iter().collect::<Vec<_>>()),
    )
        .prop_map(|(binary, os, compiler, build)| Platform {
            binary,
            os,
            compiler,
            build,
        })
}

proptest! {
    /// Platform: to_string → parse round-trip is identity
    #[test]
    fn platform_roundtrip(platform in platform_strategy()) {
        let parsed: Platform = platform.to_string().parse().expect("Should parse");
        prop_assert_eq!(platform, parsed);
    }

    /// Anything without exactly four dash-separated parts is rejected
    #[test]
    fn platform_rejects_wrong_shape(parts in prop::collection::vec("[a-z0-9_]{1,6}", 0..8usize)) {
        prop_assume!(parts.len() != 4);
        prop_assert!(parts.join("-").parse::<Platform>().is_err());
    }
}

// =============================================================================
// Package grouping
// =============================================================================

fn package_name_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec![OFFLINE_PREFIX, HLT_PREFIX, "AnalysisBase", "tdaq", "Gaudi"]),
        "[A-Za-z0-9]{0,6}",
    )
        .prop_map(|(prefix, rest)| format!("{}{}", prefix, rest))
}

/// Distinct file names in random order
fn package_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(package_name_strategy(), 0..20usize).prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, n)| format!("{}_{}.rpm", n, i))
            .collect()
    })
}

fn package_set(names: &[String]) -> PackageSet {
    names
        .iter()
        .map(|n| Package {
            path: PathBuf::from("/rpms").join(n),
            size: 1,
        })
        .collect()
}

proptest! {
    /// Grouping keeps every package exactly once and keeps relative order in each group
    #[test]
    fn groups_partition_packages(names in package_names_strategy(), cache in any::<bool>()) {
        let groups = package_set(&names).into_groups(cache);
        let flat: Vec<String> = groups.iter().flat_map(|g| g.names()).collect();

        let mut sorted_in = names.clone();
        sorted_in.sort();
        let mut sorted_out = flat;
        sorted_out.sort();
        prop_assert_eq!(sorted_in, sorted_out);

        for group in &groups {
            let positions: Vec<Option<usize>> = group
                .names()
                .iter()
                .map(|n| names.iter().position(|m| m == n))
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    /// Two groups exactly when both offline and HLT packages are present outside cache nightlies
    #[test]
    fn hlt_split_condition(names in package_names_strategy(), cache in any::<bool>()) {
        let has_offline = names.iter().any(|n| n.starts_with(OFFLINE_PREFIX));
        let has_hlt = names.iter().any(|n| n.starts_with(HLT_PREFIX));
        let groups = package_set(&names).into_groups(cache);

        if !cache && has_offline && has_hlt {
            prop_assert_eq!(groups.len(), 2);
            prop_assert!(groups[1].names().iter().all(|n| n.starts_with(HLT_PREFIX)));
            prop_assert!(groups[0].names().iter().all(|n| !n.starts_with(HLT_PREFIX)));
        } else {
            prop_assert_eq!(groups.len(), 1);
            prop_assert_eq!(groups[0].names(), names);
        }
    }
}

// =============================================================================
// Reinstall/install classification
// =============================================================================

proptest! {
    /// Every request lands in exactly one list, in request order, without its extension
    #[test]
    fn classify_is_ordered_partition(
        requested in prop::collection::vec("[a-d]{1,3}\\.rpm", 0..12usize),
        installed in prop::collection::vec("[a-d]{1,3}", 0..6usize),
    ) {
        let installed: Vec<InstalledPackage> = installed
            .into_iter()
            .map(|name| InstalledPackage { name, version: "1-1".into() })
            .collect();
        let (reinstall, install) = classify(&installed, &requested);

        prop_assert_eq!(reinstall.len() + install.len(), requested.len());

        let bare: Vec<&str> = requested.iter().map(|r| strip_extension(r)).collect();
        let is_installed = |n: &str| installed.iter().any(|p| p.name == n);

        let expected_reinstall: Vec<&str> = bare.iter().copied().filter(|n| is_installed(n)).collect();
        let expected_install: Vec<&str> = bare.iter().copied().filter(|n| !is_installed(n)).collect();
        prop_assert_eq!(reinstall, expected_reinstall);
        prop_assert_eq!(install, expected_install);
    }
}

// =============================================================================
// Tags file lines and branches
// =============================================================================

proptest! {
    /// A nightly entry renders to a line that parses back to the same entry
    #[test]
    fn tag_entry_line_roundtrip(
        branch in "[0-9]{2}\\.[0-9]{1,2}(\\.[0-9]{1,3}){0,2}",
        project in "[A-Za-z]{3,12}",
        release in "[0-9]{2}\\.[0-9]\\.[0-9]{1,3}",
        platform in platform_strategy(),
        sep in prop::sample::select(vec![';', ',', '|', ':']),
    ) {
        let entry = TagEntry::nightly(&branch, "2024-01-01T0200", &project, &release, &platform.to_string(), sep)
            .expect("Should build");
        let parsed = TagEntry::parse(&entry.render(sep), sep).expect("Should parse");
        prop_assert_eq!(entry, parsed);
    }

    /// Cache branches have at least three dots
    #[test]
    fn cache_branch_counts_dots(parts in prop::collection::vec("[0-9]{1,3}", 1..7usize)) {
        let branch = parts.join(".");
        prop_assert_eq!(is_cache_branch(&branch), parts.len() > 3);
    }
}
