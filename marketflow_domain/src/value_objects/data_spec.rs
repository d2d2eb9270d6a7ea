// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Data Specifications
//!
//! Steps declare what data they consume and produce with these value
//! objects. The manifest matches requirements against its `available_data`
//! records to answer "can this stage run?", and refreshes its records from
//! the declared outputs after a stage completes.
//!
//! Type tags are free-form strings; the canonical four used by the ingestion
//! pipeline live in [`data_types`].

use serde::{Deserialize, Serialize};

/// Canonical data-type tags used by the financial-data ingestion pipeline.
///
/// The engine itself is not specialized to these — any string tag works —
/// but the job queue's manifest pre-scan is wired to exactly this set.
pub mod data_types {
    /// Raw exchange workbooks downloaded by the scraping stage
    pub const EXCEL_FILES: &str = "excel_files";
    /// Per-day CSV reports produced by the processing stage
    pub const CSV_FILES: &str = "csv_files";
    /// Extracted index series
    pub const INDEX_DATA: &str = "index_data";
    /// Liquidity calculation results
    pub const LIQUIDITY_RESULTS: &str = "liquidity_results";
}

/// Input specification declared by a step.
///
/// A requirement is satisfied when the manifest records at least `min_count`
/// files of the given type. Optional requirements never block execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequirement {
    /// Data-type tag, e.g. `excel_files`
    pub data_type: String,
    /// Directory the data is expected in
    pub location: String,
    /// Minimum number of files required
    pub min_count: usize,
    /// Whether the step can run without this input
    pub optional: bool,
}

impl DataRequirement {
    /// Creates a mandatory requirement.
    pub fn new(data_type: impl Into<String>, location: impl Into<String>, min_count: usize) -> Self {
        Self {
            data_type: data_type.into(),
            location: location.into(),
            min_count,
            optional: false,
        }
    }

    /// Marks the requirement optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Output specification declared by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOutput {
    /// Data-type tag the output refreshes in the manifest
    pub data_type: String,
    /// Directory the files are written to
    pub location: String,
    /// Glob pattern matching the produced files, e.g. `liquidity_*.csv`
    pub pattern: String,
}

impl DataOutput {
    /// Creates an output specification.
    pub fn new(
        data_type: impl Into<String>,
        location: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            location: location.into(),
            pattern: pattern.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_defaults_to_mandatory() {
        let req = DataRequirement::new(data_types::EXCEL_FILES, "data/downloads", 1);
        assert!(!req.optional);
        assert_eq!(req.min_count, 1);
        assert!(DataRequirement::new("x", "y", 0).optional().optional);
    }
}
