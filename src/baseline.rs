//! Loss & baseline diet builder.
//!
//! Converts raw per-capita food-supply quantities into a loss-adjusted
//! baseline diet per country/item: computes `%_imported` from food-balance
//! accounting, tallies retention through the loss chain (postharvest,
//! milling, processing, distribution, consumption), and cleans quantities.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::RunParams;
use crate::error::DietError;
use crate::schema::{country, diet, item, losses, supply};

/// The pseudo-item carrying population counts in food-balance data.
const POPULATION_ITEM: &str = "Population";

/// Column order of the combined supply + item-metadata frame, used to align
/// schemas before appending special items.
const MERGED_COLS: [&str; 16] = [
    country::COUNTRY_CODE,
    country::COUNTRY,
    item::ITEM_CODE,
    item::ITEM,
    supply::IMPORTS_1000_MT,
    supply::DOMESTIC_SUPPLY_1000_MT,
    supply::SUPPLY_KG,
    supply::SUPPLY_KCAL,
    supply::SUPPLY_PROTEIN,
    item::OUTPUT_GROUP,
    item::TYPE,
    item::INCLUDE_IN_MODEL,
    item::FOOD_LOSS_GROUP,
    item::BOOTSTRAP_SUBGROUP,
    item::GROUP,
    item::PCT_UNPROCESSED,
];

/// Restrict the supply table to the configured country run list, or - when
/// the list is empty - to countries present in both the supply data and the
/// trade matrix.
pub fn filter_countries(
    supply_df: DataFrame,
    tm_coo_codes: &[i64],
    params: &RunParams,
) -> Result<DataFrame, DietError> {
    let codes: Vec<i64> = if !params.countries_to_run.is_empty() {
        info!(countries = ?params.countries_to_run, "countries to run");
        params.countries_to_run.clone()
    } else {
        let supply_codes: BTreeSet<i64> = supply_df
            .column(country::COUNTRY_CODE)?
            .i64()?
            .into_iter()
            .flatten()
            .collect();
        let tm_codes: HashSet<i64> = tm_coo_codes.iter().copied().collect();
        let included: Vec<i64> = supply_codes
            .iter()
            .copied()
            .filter(|c| tm_codes.contains(c))
            .collect();
        info!(
            supply = supply_codes.len(),
            trade_matrix = tm_codes.len(),
            both = included.len(),
            "running for all countries with adequate data"
        );
        included
    };

    let codes = Series::new("countries_included".into(), codes);
    let df = supply_df
        .lazy()
        .filter(col(country::COUNTRY_CODE).is_in(lit(codes), false))
        .collect()?;
    Ok(df)
}

/// Item metadata carries one `diet_<name>` scaling-method column per diet
/// scenario; melt these into a long (item, diet, scaling_method) table.
pub fn unpivot_diet_params(item_params: &DataFrame) -> Result<DataFrame, DietError> {
    let diet_cols: Vec<String> = item_params
        .get_column_names_str()
        .iter()
        .filter(|c| c.starts_with("diet_"))
        .map(|c| c.to_string())
        .collect();

    let codes = item_params.column(item::ITEM_CODE)?.i64()?;
    let mut out_codes: Vec<i64> = Vec::new();
    let mut out_diets: Vec<String> = Vec::new();
    let mut out_methods: Vec<Option<String>> = Vec::new();

    for dc in &diet_cols {
        let methods = item_params.column(dc)?.str()?;
        let diet_name = dc.trim_start_matches("diet_");
        for i in 0..item_params.height() {
            let code = codes.get(i).ok_or_else(|| {
                DietError::InvalidData(format!("Null {} at row {i}", item::ITEM_CODE))
            })?;
            out_codes.push(code);
            out_diets.push(diet_name.to_string());
            out_methods.push(methods.get(i).map(|s| s.to_string()));
        }
    }

    let df = DataFrame::new(vec![
        Column::new(item::ITEM_CODE.into(), &out_codes),
        Column::new(diet::DIET.into(), &out_diets),
        Column::new(diet::SCALING_METHOD.into(), out_methods),
    ])?;
    Ok(df)
}

/// Items flagged "special" (e.g. insects) have no food-balance-sheet rows;
/// append one row per supply country with null supply quantities so their
/// losses and `%_imported` are computed alongside regular items.
fn special_items(supply_df: &DataFrame, item_base: &DataFrame) -> Result<DataFrame, DietError> {
    // Distinct (country_code, country) pairs, in code order
    let codes = supply_df.column(country::COUNTRY_CODE)?.i64()?;
    let names = supply_df.column(country::COUNTRY)?.str()?;
    let mut countries: BTreeMap<i64, String> = BTreeMap::new();
    for i in 0..supply_df.height() {
        if let (Some(c), Some(n)) = (codes.get(i), names.get(i)) {
            countries.entry(c).or_insert_with(|| n.to_string());
        }
    }
    let (code_vec, name_vec): (Vec<i64>, Vec<String>) = countries.into_iter().unzip();
    let fbs_countries = DataFrame::new(vec![
        Column::new(country::COUNTRY_CODE.into(), &code_vec),
        Column::new(country::COUNTRY.into(), &name_vec),
    ])?;

    let special = item_base
        .clone()
        .lazy()
        .filter(col(item::INCLUDE_IN_MODEL).eq(lit(item::INCLUDE_SPECIAL)))
        .with_columns([lit(1i64).alias("_key")]);
    let fbs_countries = fbs_countries.lazy().with_columns([lit(1i64).alias("_key")]);

    let df = special
        .join(
            fbs_countries,
            [col("_key")],
            [col("_key")],
            JoinArgs::new(JoinType::Inner),
        )
        .with_columns(
            [
                supply::IMPORTS_1000_MT,
                supply::DOMESTIC_SUPPLY_1000_MT,
                supply::SUPPLY_KG,
                supply::SUPPLY_KCAL,
                supply::SUPPLY_PROTEIN,
            ]
            .iter()
            .map(|c| lit(NULL).cast(DataType::Float64).alias(*c))
            .collect::<Vec<_>>(),
        )
        .select(MERGED_COLS.iter().map(|c| col(*c)).collect::<Vec<_>>())
        .collect()?;
    Ok(df)
}

/// Tally the retention fraction after losses into `series_name`.
///
/// Postharvest losses apply only to the domestic share of the supply; import
/// quantities are recorded after postharvest losses upstream. Consumption
/// losses are gated by `include_consumption` so the same chain can produce a
/// farm-to-home series used when reversing losses from the point of purchase.
fn percent_after_losses(lf: LazyFrame, series_name: &str, include_consumption: bool) -> LazyFrame {
    let cons = if include_consumption { 1.0 } else { 0.0 };

    let postharvest_adj = col(losses::POSTHARVEST) * (lit(1.0) - col(diet::PCT_IMPORTED));
    let after_proc = (lit(1.0) - col(losses::PROCESSING))
        * (lit(1.0) - col(losses::DIST_PROC))
        * (lit(1.0) - col(losses::CONS_PROC) * lit(cons));
    let after_unproc = (lit(1.0) - col(losses::DIST_UNPROC))
        * (lit(1.0) - col(losses::CONS_UNPROC) * lit(cons));

    // Blend processed/unprocessed retention by the item's processed fraction;
    // milling occurs before processing and applies to the full quantity.
    let pct_proc = lit(1.0) - col(item::PCT_UNPROCESSED);
    let blended = col(item::PCT_UNPROCESSED) * after_unproc + pct_proc * after_proc;

    lf.with_columns([((lit(1.0) - postharvest_adj)
        * (lit(1.0) - col(losses::MILLING))
        * blended)
        .alias(series_name)])
}

/// Clamp negatives (data artifacts, e.g. Japan oats) and nulls to zero.
fn clamp_and_fill(column: &str) -> Expr {
    when(col(column).lt(lit(0.0)))
        .then(lit(0.0))
        .otherwise(col(column))
        .fill_null(lit(0.0))
        .alias(column)
}

/// Build the baseline diet: one row per (country, item) with cleaned
/// quantities, `%_imported`, and both loss-retention series.
///
/// `loss_regions` maps country code to food-loss region; `loss_rates` is
/// keyed by (food-loss region, food-loss group).
pub fn build_baseline(
    supply_df: &DataFrame,
    item_params: &DataFrame,
    loss_rates: &DataFrame,
    loss_regions: &DataFrame,
    tm_coo_codes: &[i64],
    params: &RunParams,
) -> Result<DataFrame, DietError> {
    let supply_df = filter_countries(supply_df.clone(), tm_coo_codes, params)?;

    // Drop the population pseudo-item; zero-fill missing supply values
    let quantity_cols = [
        supply::IMPORTS_1000_MT,
        supply::DOMESTIC_SUPPLY_1000_MT,
        supply::SUPPLY_KG,
        supply::SUPPLY_KCAL,
        supply::SUPPLY_PROTEIN,
    ];
    let supply_df = supply_df
        .lazy()
        .filter(col(item::ITEM).neq(lit(POPULATION_ITEM)))
        .with_columns(
            quantity_cols
                .iter()
                .map(|c| col(*c).fill_null(lit(0.0)))
                .collect::<Vec<_>>(),
        )
        .collect()?;

    // Item metadata without the per-diet scaling columns (see
    // `unpivot_diet_params`) and without the item name, which the supply
    // table already carries.
    let item_base_cols: Vec<String> = item_params
        .get_column_names_str()
        .iter()
        .filter(|c| !c.starts_with("diet_"))
        .map(|c| c.to_string())
        .collect();
    let item_base = item_params.select(item_base_cols)?;
    let item_meta = item_base.select([
        item::ITEM_CODE,
        item::OUTPUT_GROUP,
        item::TYPE,
        item::INCLUDE_IN_MODEL,
        item::FOOD_LOSS_GROUP,
        item::BOOTSTRAP_SUBGROUP,
        item::GROUP,
        item::PCT_UNPROCESSED,
    ])?;

    let dm = supply_df
        .clone()
        .lazy()
        .join(
            item_meta.lazy(),
            [col(item::ITEM_CODE)],
            [col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    // Every supply item should have metadata; orphans point at stale
    // reference data.
    let unmatched = dm.column(item::INCLUDE_IN_MODEL)?.null_count();
    if unmatched > 0 {
        warn!(rows = unmatched, "supply items not found in item metadata");
    }

    let dm = dm
        .lazy()
        .filter(col(item::INCLUDE_IN_MODEL).eq(lit(item::INCLUDE_YES)))
        .select(MERGED_COLS.iter().map(|c| col(*c)).collect::<Vec<_>>())
        .collect()?;

    // Append special items, then compute %_imported so they default to
    // domestic origin (null supply -> %_imported = 0).
    let special = special_items(&supply_df, &item_base)?;
    let dm = dm.vstack(&special)?;

    // Edge cases: imports can exceed domestic supply (stock variation,
    // re-exports) - cap at 1; nonpositive domestic supply means everything
    // consumed was imported.
    let pct = col(supply::IMPORTS_1000_MT) / col(supply::DOMESTIC_SUPPLY_1000_MT);
    let dm = dm
        .lazy()
        .with_columns([when(
            col(supply::DOMESTIC_SUPPLY_1000_MT)
                .lt_eq(lit(0.0))
                .and(col(supply::DOMESTIC_SUPPLY_1000_MT).is_not_null()),
        )
        .then(lit(1.0))
        .when(pct.clone().gt(lit(1.0)).and(pct.clone().is_not_null()))
        .then(lit(1.0))
        .otherwise(pct)
        .fill_null(lit(0.0))
        .alias(diet::PCT_IMPORTED)]);

    // Losses are assumed to occur in the region of the consuming country,
    // not the country of origin. This must happen after special items are
    // appended and %_imported is computed.
    let dm = dm
        .join(
            loss_regions.clone().lazy(),
            [col(country::COUNTRY_CODE)],
            [col(country::COUNTRY_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            loss_rates.clone().lazy(),
            [col(country::FOOD_LOSS_REGION), col(item::FOOD_LOSS_GROUP)],
            [col(country::FOOD_LOSS_REGION), col(item::FOOD_LOSS_GROUP)],
            JoinArgs::new(JoinType::Left),
        );
    let dm = percent_after_losses(dm, diet::PCT_AFTER_LOSSES, true);
    let dm = percent_after_losses(dm, diet::PCT_AFTER_LOSSES_TO_HOME, false);

    // Baseline quantities = raw supply, cleaned; B12 comes from nutrient
    // composition handled out of band, zero here.
    let dm = dm
        .rename(
            [supply::SUPPLY_KG, supply::SUPPLY_KCAL, supply::SUPPLY_PROTEIN],
            [diet::KG, diet::KCAL, diet::PROTEIN],
            true,
        )
        .with_columns([
            clamp_and_fill(diet::KG),
            clamp_and_fill(diet::KCAL),
            clamp_and_fill(diet::PROTEIN),
            lit(0.0).alias(diet::B12),
        ])
        .with_columns([
            (col(diet::KG) * col(diet::PCT_AFTER_LOSSES)).alias(diet::LOSS_ADJ_KG),
            (col(diet::KCAL) * col(diet::PCT_AFTER_LOSSES)).alias(diet::LOSS_ADJ_KCAL),
            (col(diet::PROTEIN) * col(diet::PCT_AFTER_LOSSES)).alias(diet::LOSS_ADJ_PROTEIN),
            lit(0.0).alias(diet::LOSS_ADJ_B12),
            lit(diet::BASELINE).alias(diet::DIET),
            lit(diet::BASELINE).alias(diet::SCALING_METHOD),
        ])
        .select(
            baseline_output_cols()
                .iter()
                .map(|c| col(*c))
                .collect::<Vec<_>>(),
        )
        .collect()?;

    Ok(dm)
}

/// Canonical DietRecord column order; identical for every diet scenario so
/// scenarios can be concatenated.
pub fn baseline_output_cols() -> Vec<&'static str> {
    vec![
        country::COUNTRY_CODE,
        country::COUNTRY,
        diet::DIET,
        item::ITEM_CODE,
        item::ITEM,
        item::OUTPUT_GROUP,
        item::TYPE,
        item::BOOTSTRAP_SUBGROUP,
        item::GROUP,
        diet::SCALING_METHOD,
        diet::PCT_IMPORTED,
        diet::PCT_AFTER_LOSSES,
        diet::PCT_AFTER_LOSSES_TO_HOME,
        diet::KG,
        diet::KCAL,
        diet::PROTEIN,
        diet::B12,
        diet::LOSS_ADJ_KG,
        diet::LOSS_ADJ_KCAL,
        diet::LOSS_ADJ_PROTEIN,
        diet::LOSS_ADJ_B12,
    ]
}
