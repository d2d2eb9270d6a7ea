// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filesystem Detection Fallback
//!
//! Centralized "are my input files there?" helper for stages that need a
//! readiness answer before the manifest has been refreshed — typically the
//! first stage of a pipeline run. One shared implementation keeps every
//! stage's answer consistent.
//!
//! Two passes run and the larger count wins: a glob per extension
//! (case-insensitive), and a direct directory scan matching extensions.
//! Glob can fail on unusual locales and a direct scan can race concurrent
//! writes, so neither pass is trusted alone.

use std::path::Path;

use glob::MatchOptions;
use tracing::debug;

/// Counts files under `dir` carrying any of the given extensions
/// (case-insensitive, without the leading dot).
///
/// Returns 0 for a missing directory.
pub fn detect_data_files(dir: &Path, extensions: &[&str]) -> usize {
    if !dir.is_dir() {
        return 0;
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut glob_count = 0usize;
    for ext in extensions {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_string_lossy();
        if let Ok(paths) = glob::glob_with(&pattern, options) {
            glob_count += paths.flatten().filter(|p| p.is_file()).count();
        }
    }

    let scan_count = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| {
                    let path = entry.path();
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|found| {
                                extensions.iter().any(|ext| found.eq_ignore_ascii_case(ext))
                            })
                })
                .count()
        })
        .unwrap_or(0);

    let count = glob_count.max(scan_count);
    debug!(
        dir = %dir.display(),
        glob_count,
        scan_count,
        "detected data files"
    );
    count
}
