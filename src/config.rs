use std::collections::HashMap;

use polars::prelude::*;

use crate::error::DietError;
use crate::schema::footprint;

/// Which subpopulation the constant/reference diet is averaged over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceDiet {
    HighIncome,
    HighIncomeOecd,
}

impl ReferenceDiet {
    /// Diet identifier written into the scenario's `diet` column.
    pub fn diet_name(&self) -> &'static str {
        match self {
            ReferenceDiet::HighIncome => "high_income",
            ReferenceDiet::HighIncomeOecd => "high_income_oecd",
        }
    }
}

/// Run configuration, threaded explicitly through every stage call.
/// No stage reads module-level mutable state.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Country codes to run; empty means every country with adequate data
    /// (present in both the supply table and the trade matrix).
    pub countries_to_run: Vec<i64>,
    pub reference_diet: ReferenceDiet,
    /// Whether antibiotic-use footprint types are carried through
    /// escalation and attachment.
    pub include_abx: bool,
    /// Bootstrap trials per footprint distribution.
    pub n_trials: usize,
    pub random_seed: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            countries_to_run: Vec::new(),
            reference_diet: ReferenceDiet::HighIncome,
            include_abx: true,
            n_trials: 10_000,
            random_seed: 3,
        }
    }
}

/// Coarse footprint-type category used when combining subtypes into totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FootprintCategory {
    Ghg,
    Abx,
    Other,
}

/// Typed classification of a footprint type.
///
/// Loaded from reference data so that no behavior hangs off substring
/// matching of type names.
#[derive(Debug, Clone)]
pub struct FootprintClass {
    pub category: FootprintCategory,
    /// Land-use-change types never fall back to region/world averages.
    pub luc: bool,
    /// Already-combined totals; excluded from any further combination.
    pub is_total: bool,
    /// Whether this type may escalate to subgroup/group distributions
    /// in the bootstrap.
    pub bootstrap_by_group: bool,
    /// Static ordinal pinning the bootstrap input sort order.
    pub sort_order: i64,
}

impl Default for FootprintClass {
    fn default() -> Self {
        Self {
            category: FootprintCategory::Other,
            luc: false,
            is_total: false,
            bootstrap_by_group: false,
            sort_order: i64::MAX,
        }
    }
}

/// Footprint-type classification table, loaded once as reference data.
#[derive(Debug, Clone, Default)]
pub struct FootprintClassTable {
    map: HashMap<String, FootprintClass>,
}

impl FootprintClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, footprint_type: impl Into<String>, class: FootprintClass) {
        self.map.insert(footprint_type.into(), class);
    }

    /// Build the table from a reference DataFrame.
    ///
    /// Expected columns (all read as strings, per the CSV loading contract):
    /// `footprint_type`, `category` (ghg|abx|other), `luc` (yes|no),
    /// `is_total` (yes|no), `bootstrap_by_group` (yes|no),
    /// `footprint_type_sort_order` (integer).
    pub fn from_dataframe(df: &DataFrame) -> Result<Self, DietError> {
        let types = df.column(footprint::FOOTPRINT_TYPE)?.str()?;
        let categories = df.column("category")?.str()?;
        let luc = df.column("luc")?.str()?;
        let is_total = df.column("is_total")?.str()?;
        let by_group = df.column("bootstrap_by_group")?.str()?;
        let sort_order = df.column("footprint_type_sort_order")?.str()?;

        let mut table = Self::new();
        for i in 0..df.height() {
            let ty = types.get(i).ok_or_else(|| {
                DietError::InvalidData(format!("Null footprint_type at row {i}"))
            })?;
            let category = match categories.get(i).unwrap_or("other") {
                "ghg" => FootprintCategory::Ghg,
                "abx" => FootprintCategory::Abx,
                "other" => FootprintCategory::Other,
                other => {
                    return Err(DietError::InvalidData(format!(
                        "Unknown footprint category '{other}' for type '{ty}'"
                    )))
                }
            };
            let order = match sort_order.get(i) {
                Some(s) => s.trim().parse::<i64>().map_err(|_| {
                    DietError::InvalidData(format!(
                        "Invalid footprint_type_sort_order '{s}' for type '{ty}'"
                    ))
                })?,
                None => i64::MAX,
            };
            table.insert(
                ty,
                FootprintClass {
                    category,
                    luc: luc.get(i) == Some("yes"),
                    is_total: is_total.get(i) == Some("yes"),
                    bootstrap_by_group: by_group.get(i) == Some("yes"),
                    sort_order: order,
                },
            );
        }
        Ok(table)
    }

    pub fn get(&self, footprint_type: &str) -> Option<&FootprintClass> {
        self.map.get(footprint_type)
    }

    /// Category of a type; unknown types combine into nothing.
    pub fn category(&self, footprint_type: &str) -> FootprintCategory {
        self.get(footprint_type)
            .map(|c| c.category)
            .unwrap_or(FootprintCategory::Other)
    }

    pub fn is_luc(&self, footprint_type: &str) -> bool {
        self.get(footprint_type).map(|c| c.luc).unwrap_or(false)
    }

    pub fn is_total(&self, footprint_type: &str) -> bool {
        self.get(footprint_type).map(|c| c.is_total).unwrap_or(false)
    }

    pub fn bootstrap_by_group(&self, footprint_type: &str) -> bool {
        self.get(footprint_type)
            .map(|c| c.bootstrap_by_group)
            .unwrap_or(false)
    }

    /// All known type names in a category, in name order.
    pub fn types_in_category(&self, category: FootprintCategory) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .map
            .iter()
            .filter(|(_, c)| c.category == category)
            .map(|(t, _)| t.as_str())
            .collect();
        types.sort_unstable();
        types
    }

    /// Sort ordinal; unknown types sort last, tie-broken by name downstream.
    pub fn sort_order(&self, footprint_type: &str) -> i64 {
        self.get(footprint_type)
            .map(|c| c.sort_order)
            .unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_from_dataframe() {
        let df = df!(
            footprint::FOOTPRINT_TYPE => ["kg_co2_luc", "kg_co2", "mg_abx", "l_blue_wf"],
            "category" => ["ghg", "ghg", "abx", "other"],
            "luc" => ["yes", "no", "no", "no"],
            "is_total" => ["no", "no", "no", "no"],
            "bootstrap_by_group" => ["no", "no", "yes", "no"],
            "footprint_type_sort_order" => ["2", "1", "3", "4"],
        )
        .unwrap();

        let table = FootprintClassTable::from_dataframe(&df).unwrap();
        assert!(table.is_luc("kg_co2_luc"));
        assert!(!table.is_luc("kg_co2"));
        assert_eq!(table.category("mg_abx"), FootprintCategory::Abx);
        assert_eq!(table.category("l_blue_wf"), FootprintCategory::Other);
        assert!(table.bootstrap_by_group("mg_abx"));
        assert_eq!(table.sort_order("kg_co2"), 1);
        // unknown types never combine, never escalate
        assert_eq!(table.category("unknown"), FootprintCategory::Other);
        assert_eq!(table.sort_order("unknown"), i64::MAX);
    }

    #[test]
    fn rejects_unknown_category() {
        let df = df!(
            footprint::FOOTPRINT_TYPE => ["x"],
            "category" => ["bogus"],
            "luc" => ["no"],
            "is_total" => ["no"],
            "bootstrap_by_group" => ["no"],
            "footprint_type_sort_order" => ["1"],
        )
        .unwrap();
        assert!(FootprintClassTable::from_dataframe(&df).is_err());
    }
}
