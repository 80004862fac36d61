//! Metadata field mapping
//!
//! Studies name the same metadata field differently (`refinebio_age`,
//! `characteristics_ch1_Age`, ...). Each logical field has an ordered list of
//! candidate columns; the first non-blank one wins.

use gxw_common::UNKNOWN_VALUE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_age_fields() -> Vec<String> {
    to_strings(&["refinebio_age", "characteristics_ch1_Age", "characteristics_ch1_age", "MetaSRA_age"])
}

fn default_sex_fields() -> Vec<String> {
    to_strings(&["refinebio_sex", "characteristics_ch1_Sex", "characteristics_ch1_Gender", "sex"])
}

fn default_illness_fields() -> Vec<String> {
    to_strings(&["characteristics_ch1_Illness", "refinebio_disease", "illness"])
}

fn default_platform_fields() -> Vec<String> {
    to_strings(&["refinebio_platform", "platform_id"])
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Candidate column names per logical metadata field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappings {
    #[serde(default = "default_age_fields")]
    pub age_fields: Vec<String>,
    #[serde(default = "default_sex_fields")]
    pub sex_fields: Vec<String>,
    #[serde(default = "default_illness_fields")]
    pub illness_fields: Vec<String>,
    #[serde(default = "default_platform_fields")]
    pub platform_fields: Vec<String>,
}

impl Default for FieldMappings {
    fn default() -> Self {
        Self {
            age_fields: default_age_fields(),
            sex_fields: default_sex_fields(),
            illness_fields: default_illness_fields(),
            platform_fields: default_platform_fields(),
        }
    }
}

impl FieldMappings {
    /// Replace empty candidate lists with the defaults.
    ///
    /// An explicitly empty list in configuration would otherwise map every
    /// sample to `UNKNOWN`.
    pub fn with_defaults_for_empty(mut self) -> Self {
        let defaults = Self::default();
        if self.age_fields.is_empty() {
            self.age_fields = defaults.age_fields;
        }
        if self.sex_fields.is_empty() {
            self.sex_fields = defaults.sex_fields;
        }
        if self.illness_fields.is_empty() {
            self.illness_fields = defaults.illness_fields;
        }
        if self.platform_fields.is_empty() {
            self.platform_fields = defaults.platform_fields;
        }
        self
    }
}

/// First candidate column with a non-blank value, trimmed, else `UNKNOWN`
pub fn resolve_field(row: &HashMap<&str, &str>, candidates: &[String]) -> String {
    candidates
        .iter()
        .filter_map(|column| row.get(column.as_str()))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_VALUE.to_string())
}
