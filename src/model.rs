use std::collections::HashMap;
use std::path::PathBuf;

use polars::prelude::*;
use tracing::info;

use crate::baseline;
use crate::bootstrap;
use crate::config::{FootprintClassTable, RunParams};
use crate::error::DietError;
use crate::footprints;
use crate::origin;
use crate::scenarios;
use crate::schema::bootstrap as bootstrap_cols;
use crate::schema::{country, diet, extraction, footprint, item, losses, supply, trade};

/// Loading and orchestration shell for one model run.
///
/// Holds the reference DataFrames and the run configuration; each stage
/// method delegates to the corresponding module and hands tables between
/// stages explicitly. Callers load the tables they need, then call stages
/// in pipeline order.
pub struct DietModel {
    base_path: PathBuf,
    params: RunParams,
    items: Option<DataFrame>,
    countries: Option<DataFrame>,
    supply: Option<DataFrame>,
    trade_matrix: Option<DataFrame>,
    loss_rates: Option<DataFrame>,
    production: Option<DataFrame>,
    footprints: Option<DataFrame>,
    intensive_footprints: Option<DataFrame>,
    distributions: Option<DataFrame>,
    extraction_rates: Option<DataFrame>,
    footprint_classes: Option<FootprintClassTable>,
}

impl DietModel {
    pub fn new(base_path: impl Into<PathBuf>, params: RunParams) -> Self {
        Self {
            base_path: base_path.into(),
            params,
            items: None,
            countries: None,
            supply: None,
            trade_matrix: None,
            loss_rates: None,
            production: None,
            footprints: None,
            intensive_footprints: None,
            distributions: None,
            extraction_rates: None,
            footprint_classes: None,
        }
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Load any CSV into a Polars DataFrame with all columns as strings.
    /// Optionally rename columns via a map.
    pub fn load_csv(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> Result<DataFrame, DietError> {
        self.read_csv_as_strings(filename, rename)
    }

    /// Load item metadata (codes, names, group memberships, inclusion flags,
    /// per-diet scaling methods).
    pub fn load_items(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("item_parameters.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                item::ITEM_CODE,
                item::ITEM,
                item::OUTPUT_GROUP,
                item::TYPE,
                item::INCLUDE_IN_MODEL,
                item::FOOD_LOSS_GROUP,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (item::ITEM_CODE, DataType::Int64),
                (item::PCT_UNPROCESSED, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded item parameters");
        self.items = Some(df);
        self.items()
    }

    /// Load country reference data (codes, names, regions, income class,
    /// OECD membership, food-loss region, population).
    pub fn load_countries(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("countries.csv"), None)?;
        Self::require_columns(&raw, &[country::COUNTRY_CODE, country::COUNTRY])?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (country::POPULATION, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded countries");
        self.countries = Some(df);
        self.countries()
    }

    /// Load per-country per-item food supply quantities.
    pub fn load_supply(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("fbs_supply.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                country::COUNTRY_CODE,
                country::COUNTRY,
                item::ITEM_CODE,
                item::ITEM,
                supply::SUPPLY_KG,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (item::ITEM_CODE, DataType::Int64),
                (supply::IMPORTS_1000_MT, DataType::Float64),
                (supply::DOMESTIC_SUPPLY_1000_MT, DataType::Float64),
                (supply::SUPPLY_KG, DataType::Float64),
                (supply::SUPPLY_KCAL, DataType::Float64),
                (supply::SUPPLY_PROTEIN, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded supply");
        self.supply = Some(df);
        self.supply()
    }

    /// Load the bilateral trade matrix (destination, origin, item, tonnage).
    pub fn load_trade_matrix(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("trade_matrix.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                country::COUNTRY_CODE,
                trade::COO_CODE,
                trade::COO,
                item::ITEM_CODE,
                trade::IMPORTS_MT,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (trade::COO_CODE, DataType::Int64),
                (item::ITEM_CODE, DataType::Int64),
                (trade::IMPORTS_MT, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded trade matrix");
        self.trade_matrix = Some(df);
        self.trade_matrix()
    }

    /// Load loss rates keyed by (food-loss region, food-loss group).
    pub fn load_loss_rates(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("food_loss_rates.csv"), None)?;
        Self::require_columns(
            &raw,
            &[country::FOOD_LOSS_REGION, item::FOOD_LOSS_GROUP],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (losses::POSTHARVEST, DataType::Float64),
                (losses::MILLING, DataType::Float64),
                (losses::PROCESSING, DataType::Float64),
                (losses::DIST_PROC, DataType::Float64),
                (losses::DIST_UNPROC, DataType::Float64),
                (losses::CONS_PROC, DataType::Float64),
                (losses::CONS_UNPROC, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded loss rates");
        self.loss_rates = Some(df);
        self.loss_rates()
    }

    /// Load per-country per-item production tonnage.
    pub fn load_production(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("item_production.csv"), None)?;
        Self::require_columns(
            &raw,
            &[country::COUNTRY_CODE, footprint::MT_PRODUCTION],
        )?;
        // Production tables may be keyed by model item code, FAO item code
        // or both; cast whichever is present.
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (footprint::MT_PRODUCTION, DataType::Float64),
                (item::ITEM_CODE, DataType::Int64),
                (extraction::FAO_ITEM_CODE, DataType::Int64),
            ],
        )?;
        info!(rows = df.height(), "loaded production");
        self.production = Some(df);
        self.production()
    }

    /// Load point-value footprint intensities per (country, item, type).
    pub fn load_footprints(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("item_footprints.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                country::COUNTRY_CODE,
                item::ITEM_CODE,
                footprint::FOOTPRINT_TYPE,
                footprint::FOOTPRINT,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (item::ITEM_CODE, DataType::Int64),
                (footprint::FOOTPRINT, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded footprints");
        self.footprints = Some(df);
        self.footprints()
    }

    /// Load footprint intensities for intensive production systems, used in
    /// place of the standard table when costing the reference diet.
    pub fn load_intensive_footprints(
        &mut self,
        filename: Option<&str>,
    ) -> Result<&DataFrame, DietError> {
        let raw =
            self.read_csv_as_strings(filename.unwrap_or("item_footprints_intensive.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                country::COUNTRY_CODE,
                item::ITEM_CODE,
                footprint::FOOTPRINT_TYPE,
                footprint::FOOTPRINT,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (item::ITEM_CODE, DataType::Int64),
                (footprint::FOOTPRINT, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded intensive-production footprints");
        self.intensive_footprints = Some(df);
        self.intensive_footprints()
    }

    /// Load literature-review footprint distributions.
    pub fn load_distributions(&mut self, filename: Option<&str>) -> Result<&DataFrame, DietError> {
        let raw =
            self.read_csv_as_strings(filename.unwrap_or("footprint_distributions.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                item::ITEM_CODE,
                item::BOOTSTRAP_SUBGROUP,
                item::GROUP,
                item::OUTPUT_GROUP,
                footprint::FOOTPRINT_TYPE,
                footprint::FOOTPRINT,
                bootstrap_cols::WEIGHT,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (item::ITEM_CODE, DataType::Int64),
                (footprint::FOOTPRINT, DataType::Float64),
                (bootstrap_cols::WEIGHT, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded footprint distributions");
        self.distributions = Some(df);
        self.distributions()
    }

    /// Load country-level extraction rates.
    pub fn load_extraction_rates(
        &mut self,
        filename: Option<&str>,
    ) -> Result<&DataFrame, DietError> {
        let raw = self.read_csv_as_strings(filename.unwrap_or("extraction_rates.csv"), None)?;
        Self::require_columns(
            &raw,
            &[
                country::COUNTRY_CODE,
                extraction::FAO_ITEM_CODE,
                extraction::EXTR_RATE,
            ],
        )?;
        let df = Self::cast_columns(
            raw,
            &[
                (country::COUNTRY_CODE, DataType::Int64),
                (extraction::FAO_ITEM_CODE, DataType::Int64),
                (extraction::EXTR_RATE, DataType::Float64),
            ],
        )?;
        info!(rows = df.height(), "loaded extraction rates");
        self.extraction_rates = Some(df);
        self.extraction_rates()
    }

    /// Load the footprint-type classification table.
    pub fn load_footprint_classes(
        &mut self,
        filename: Option<&str>,
    ) -> Result<&FootprintClassTable, DietError> {
        let raw =
            self.read_csv_as_strings(filename.unwrap_or("footprint_type_parameters.csv"), None)?;
        let table = FootprintClassTable::from_dataframe(&raw)?;
        self.footprint_classes = Some(table);
        self.footprint_classes()
    }

    // ── Loaded-table accessors ──────────────────────────────────────────────

    pub fn items(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.items, "items")
    }

    pub fn countries(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.countries, "countries")
    }

    pub fn supply(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.supply, "supply")
    }

    pub fn trade_matrix(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.trade_matrix, "trade_matrix")
    }

    pub fn loss_rates(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.loss_rates, "loss_rates")
    }

    pub fn production(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.production, "production")
    }

    pub fn footprints(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.footprints, "footprints")
    }

    pub fn intensive_footprints(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.intensive_footprints, "intensive_footprints")
    }

    pub fn distributions(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.distributions, "distributions")
    }

    pub fn extraction_rates(&self) -> Result<&DataFrame, DietError> {
        Self::loaded(&self.extraction_rates, "extraction_rates")
    }

    pub fn footprint_classes(&self) -> Result<&FootprintClassTable, DietError> {
        self.footprint_classes
            .as_ref()
            .ok_or_else(|| DietError::NotLoaded("footprint_classes".to_string()))
    }

    // ── Pipeline stages ─────────────────────────────────────────────────────

    /// §4.1: build the baseline diet from supply, item metadata and loss
    /// rates.
    pub fn build_baseline(&self) -> Result<DataFrame, DietError> {
        let loss_regions = self
            .countries()?
            .select([country::COUNTRY_CODE, country::FOOD_LOSS_REGION])?;
        baseline::build_baseline(
            self.supply()?,
            self.items()?,
            self.loss_rates()?,
            &loss_regions,
            &self.trade_matrix_countries()?,
            &self.params,
        )
    }

    /// §4.2: constant/reference diet scenario.
    pub fn constant_diet(&self, baseline_diet: &DataFrame) -> Result<DataFrame, DietError> {
        scenarios::constant_diet(baseline_diet, self.countries()?, &self.params)
    }

    /// §4.2: per-item world-average extraction rates.
    pub fn world_extraction_rates(&self) -> Result<DataFrame, DietError> {
        scenarios::world_extraction_rates(self.extraction_rates()?, self.production()?)
    }

    /// §4.2: target diet scenario.
    pub fn target_diet(
        &self,
        target_df: &DataFrame,
        item_match: &DataFrame,
        baseline_diet: &DataFrame,
        diet_name: &str,
    ) -> Result<DataFrame, DietError> {
        let world_rates = self.world_extraction_rates()?;
        scenarios::target_diet(
            target_df,
            item_match,
            baseline_diet,
            self.extraction_rates()?,
            &world_rates,
            diet_name,
        )
    }

    /// §4.3: allocate diets across countries of origin.
    pub fn allocate_origins(&self, diets: &DataFrame) -> Result<DataFrame, DietError> {
        origin::allocate_origins(diets, self.trade_matrix()?)
    }

    /// §4.4: escalate footprints to full country coverage and append
    /// combined totals. Antibiotic-use types are dropped up front when the
    /// run excludes them.
    pub fn escalate_footprints(&self) -> Result<DataFrame, DietError> {
        self.escalate(self.footprints()?)
    }

    /// §4.4 variant: escalate the intensive-production footprint table. The
    /// result prices the reference diet in `attach_diet_footprints`.
    pub fn escalate_intensive_footprints(&self) -> Result<DataFrame, DietError> {
        self.escalate(self.intensive_footprints()?)
    }

    fn escalate(&self, footprints: &DataFrame) -> Result<DataFrame, DietError> {
        let classes = self.footprint_classes()?;
        let observed = if self.params.include_abx {
            footprints.clone()
        } else {
            let abx = Series::new(
                "abx_types".into(),
                classes
                    .types_in_category(crate::config::FootprintCategory::Abx)
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<String>>(),
            );
            footprints
                .clone()
                .lazy()
                .filter(
                    col(footprint::FOOTPRINT_TYPE)
                        .is_in(lit(abx), false)
                        .not(),
                )
                .collect()?
        };
        let escalated = footprints::escalate_footprints(
            &observed,
            self.production()?,
            self.countries()?,
            classes,
        )?;
        footprints::combine_escalated(&escalated, classes)
    }

    /// §4.4: attach escalated footprints to origin-allocated diets and
    /// summarize per item with population scaling.
    ///
    /// When an intensive-production table is supplied, records belonging to
    /// the reference diet are costed against it instead of the standard
    /// table; all other diets use the standard table.
    pub fn attach_diet_footprints(
        &self,
        allocated: &DataFrame,
        escalated: &DataFrame,
        escalated_intensive: Option<&DataFrame>,
    ) -> Result<DataFrame, DietError> {
        let attached = match escalated_intensive {
            Some(intensive) => {
                let reference = self.params.reference_diet.diet_name();
                let is_reference: BooleanChunked = allocated
                    .column(diet::DIET)?
                    .str()?
                    .into_iter()
                    .map(|d| d.map(|d| d == reference))
                    .collect();
                let mut attached = footprints::attach_diet_footprints(
                    &allocated.filter(&!&is_reference)?,
                    escalated,
                )?;
                attached.vstack_mut(&footprints::attach_diet_footprints(
                    &allocated.filter(&is_reference)?,
                    intensive,
                )?)?;
                attached
            }
            None => footprints::attach_diet_footprints(allocated, escalated)?,
        };
        footprints::footprints_by_item(&attached, self.countries()?)
    }

    /// §4.5: bootstrap footprint centiles per (country, diet, output group).
    pub fn bootstrap_diet_footprints(&self, diets: &DataFrame) -> Result<DataFrame, DietError> {
        bootstrap::bootstrap_diet_footprints(
            diets,
            self.distributions()?,
            self.items()?,
            self.footprint_classes()?,
            &self.params,
        )
    }

    /// Long (item, diet, scaling_method) table melted from the per-diet
    /// columns of the item metadata.
    pub fn diet_scaling_methods(&self) -> Result<DataFrame, DietError> {
        baseline::unpivot_diet_params(self.items()?)
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    /// Distinct destination-country codes present in the trade matrix, used
    /// to scope the run when no explicit country list is configured.
    fn trade_matrix_countries(&self) -> Result<Vec<i64>, DietError> {
        let codes = self
            .trade_matrix()?
            .column(country::COUNTRY_CODE)?
            .i64()?
            .into_iter()
            .flatten()
            .collect::<std::collections::BTreeSet<i64>>();
        Ok(codes.into_iter().collect())
    }

    fn loaded<'a>(table: &'a Option<DataFrame>, name: &str) -> Result<&'a DataFrame, DietError> {
        table
            .as_ref()
            .ok_or_else(|| DietError::NotLoaded(name.to_string()))
    }

    fn read_csv_as_strings(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> Result<DataFrame, DietError> {
        let path = self.base_path.join(filename);
        let mut df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0)) // all columns as String
            .try_into_reader_with_file_path(Some(path))?
            .finish()?;

        // Trim whitespace from column names
        let trimmed: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        df.set_column_names(trimmed.as_slice())?;

        // Apply optional column rename
        if let Some(map) = rename {
            let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
            let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
            df = df.lazy().rename(old, new, true).collect()?;
        }

        Ok(df)
    }

    fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), DietError> {
        for &col_name in required {
            if df.column(col_name).is_err() {
                return Err(DietError::MissingColumn(col_name.to_string()));
            }
        }
        Ok(())
    }

    /// Cast named string columns to typed columns; columns not present in
    /// the frame are skipped.
    fn cast_columns(df: DataFrame, casts: &[(&str, DataType)]) -> Result<DataFrame, DietError> {
        let exprs: Vec<Expr> = casts
            .iter()
            .filter(|(name, _)| df.schema().contains(name))
            .map(|(name, dtype)| col(*name).cast(dtype.clone()))
            .collect();
        if exprs.is_empty() {
            return Ok(df);
        }
        Ok(df.lazy().with_columns(exprs).collect()?)
    }
}
