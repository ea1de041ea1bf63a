//! Diet scenario generators.
//!
//! Each scenario transforms the baseline diet into an alternative diet with
//! the identical DietRecord schema, so scenario outputs can be concatenated.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use tracing::info;

use crate::baseline::baseline_output_cols;
use crate::config::{ReferenceDiet, RunParams};
use crate::error::DietError;
use crate::schema::{country, diet, extraction, item, target};
use crate::stats;

/// Quantity columns averaged/substituted by the constant diet.
const QUANTITY_COLS: [&str; 8] = [
    diet::KG,
    diet::KCAL,
    diet::PROTEIN,
    diet::B12,
    diet::LOSS_ADJ_KG,
    diet::LOSS_ADJ_KCAL,
    diet::LOSS_ADJ_PROTEIN,
    diet::LOSS_ADJ_B12,
];

/// Constant/reference diet: hold consumption at the average of a reference
/// subpopulation so that differences in results by country are explained by
/// country of origin alone.
///
/// Quantities are substituted only for items already present in a country's
/// baseline - items a country never had are not introduced, since they would
/// have no footprint path. Countries inside the reference subpopulation keep
/// their own baseline quantities.
pub fn constant_diet(
    baseline: &DataFrame,
    countries: &DataFrame,
    params: &RunParams,
) -> Result<DataFrame, DietError> {
    let class_info = countries.select([
        country::COUNTRY_CODE,
        country::INCOME_CLASS,
        country::OECD,
    ])?;

    let mut reference_filter = col(country::INCOME_CLASS).eq(lit("High income"));
    if params.reference_diet == ReferenceDiet::HighIncomeOecd {
        info!("filtering reference diet to high income OECD countries only");
        reference_filter = reference_filter.and(col(country::OECD).eq(lit("yes")));
    }

    let reference = baseline
        .clone()
        .lazy()
        .join(
            class_info.lazy(),
            [col(country::COUNTRY_CODE)],
            [col(country::COUNTRY_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(reference_filter)
        .collect()?;

    if reference.height() == 0 {
        return Err(DietError::Validation(
            "no countries in the reference subpopulation for the constant diet".into(),
        ));
    }

    let reference_codes: BTreeSet<i64> = reference
        .column(country::COUNTRY_CODE)?
        .i64()?
        .into_iter()
        .flatten()
        .collect();
    info!(countries = ?reference_codes, "countries included in the constant diet");

    // Average baseline consumption per item over the reference countries
    let constant_col = |c: &str| format!("{c}_constant");
    let means = reference
        .lazy()
        .group_by([col(item::ITEM_CODE)])
        .agg(
            QUANTITY_COLS
                .iter()
                .map(|c| col(*c).mean().alias(constant_col(c)))
                .collect::<Vec<_>>(),
        );

    let in_reference = col(country::COUNTRY_CODE).is_in(
        lit(Series::new(
            "reference_codes".into(),
            reference_codes.iter().copied().collect::<Vec<i64>>(),
        )),
        false,
    );

    let dm = baseline
        .clone()
        .lazy()
        .join(
            means,
            [col(item::ITEM_CODE)],
            [col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns(
            QUANTITY_COLS
                .iter()
                .map(|c| {
                    when(in_reference.clone())
                        .then(col(*c))
                        .otherwise(col(constant_col(c)))
                        .fill_null(lit(0.0))
                        .alias(*c)
                })
                .collect::<Vec<_>>(),
        )
        .with_columns([
            lit(params.reference_diet.diet_name()).alias(diet::DIET),
            lit("constant").alias(diet::SCALING_METHOD),
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

/// Per-item world-average extraction rates: production-weighted mean over
/// countries, falling back to the unweighted mean where production coverage
/// is missing (see `stats::weighted_mean`). Zero rates are treated as
/// missing data and excluded.
pub fn world_extraction_rates(
    extr_rates: &DataFrame,
    production: &DataFrame,
) -> Result<DataFrame, DietError> {
    let er = extr_rates
        .clone()
        .lazy()
        .filter(
            col(extraction::EXTR_RATE)
                .neq(lit(0.0))
                .and(col(extraction::EXTR_RATE).is_not_null()),
        )
        .join(
            production
                .clone()
                .lazy()
                .select([col(country::COUNTRY_CODE), col(extraction::FAO_ITEM_CODE),
                    col(crate::schema::footprint::MT_PRODUCTION)]),
            [col(country::COUNTRY_CODE), col(extraction::FAO_ITEM_CODE)],
            [col(country::COUNTRY_CODE), col(extraction::FAO_ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([col(crate::schema::footprint::MT_PRODUCTION).fill_null(lit(0.0))])
        .collect()?;

    let mut world: BTreeMap<i64, f64> = BTreeMap::new();
    for part in er.partition_by([extraction::FAO_ITEM_CODE], true)? {
        let code = part
            .column(extraction::FAO_ITEM_CODE)?
            .i64()?
            .get(0)
            .ok_or_else(|| DietError::InvalidData("null fao_item_code".into()))?;
        let rates: Vec<f64> = part
            .column(extraction::EXTR_RATE)?
            .f64()?
            .into_iter()
            .flatten()
            .collect();
        let weights: Vec<f64> = part
            .column(crate::schema::footprint::MT_PRODUCTION)?
            .f64()?
            .into_iter()
            .map(|w| w.unwrap_or(0.0))
            .collect();
        if let Some(mean) = stats::weighted_mean(&rates, &weights) {
            world.insert(code, mean);
        }
    }

    let (codes, rates): (Vec<i64>, Vec<f64>) = world.into_iter().unzip();
    let df = DataFrame::new(vec![
        Column::new(extraction::FAO_ITEM_CODE.into(), &codes),
        Column::new(extraction::EXTR_RATE_WORLD.into(), &rates),
    ])?;
    Ok(df)
}

/// Target/reference-nutrition diet (e.g. an externally specified
/// kcal/macronutrient target).
///
/// Target items are matched to model items via an explicit mapping table;
/// processed quantities are reconverted to primary equivalents using
/// country extraction rates with a world-rate fallback (a missing rate
/// defaults explicitly to 1.0); each target item's quantity is allocated
/// across its matched model items in proportion to baseline loss-adjusted
/// mass; and farm-to-home losses are reverse-applied so quantities are
/// expressed on the same raw-supply basis as the baseline.
///
/// Records with no item match, or whose target category has zero baseline
/// loss-adjusted mass in a country, are dropped from the scenario output.
pub fn target_diet(
    target_df: &DataFrame,
    item_match: &DataFrame,
    baseline: &DataFrame,
    extr_rates: &DataFrame,
    extr_rates_world: &DataFrame,
    diet_name: &str,
) -> Result<DataFrame, DietError> {
    // Primary-equivalent conversion applies to mass only, never kcal: eating
    // 14 g of a processed food may require producing 18 g of the primary
    // commodity, but the kcal consumed stays fixed.
    let extr_final = when(col(extraction::EXTR_RATE).is_not_null())
        .then(col(extraction::EXTR_RATE))
        .when(col(extraction::EXTR_RATE_WORLD).is_not_null())
        .then(col(extraction::EXTR_RATE_WORLD))
        .otherwise(lit(1.0));

    let bl_mass_by_target = col(diet::LOSS_ADJ_KG)
        .sum()
        .over([col(country::COUNTRY_CODE), col(target::TARGET_ITEM)]);

    let dm = target_df
        .clone()
        .lazy()
        .join(
            item_match.clone().lazy(),
            [col(target::TARGET_ITEM)],
            [col(target::TARGET_ITEM)],
            JoinArgs::new(JoinType::Left),
        )
        // Only items present in both the target diet and the baseline
        .join(
            baseline.clone().lazy(),
            [col(item::ITEM_CODE)],
            [col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            extr_rates.clone().lazy(),
            [col(country::COUNTRY_CODE), col(extraction::FAO_ITEM_CODE)],
            [col(country::COUNTRY_CODE), col(extraction::FAO_ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            extr_rates_world.clone().lazy(),
            [col(extraction::FAO_ITEM_CODE)],
            [col(extraction::FAO_ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            (col(target::TARGET_G) / extr_final).alias("_primary_g/cap/day"),
            bl_mass_by_target.alias("_bl_loss_adj_kg_by_target_item"),
        ])
        // Zero baseline mass in a target category: nothing to allocate over
        .filter(col("_bl_loss_adj_kg_by_target_item").gt(lit(0.0)))
        .with_columns([(col(diet::LOSS_ADJ_KG) / col("_bl_loss_adj_kg_by_target_item"))
            .alias("_%_allocated")])
        .with_columns([
            (col("_%_allocated") * (col("_primary_g/cap/day") / lit(1000.0) * lit(365.0)))
                .alias(diet::LOSS_ADJ_KG),
            (col("_%_allocated") * col(target::TARGET_KCAL)).alias(diet::LOSS_ADJ_KCAL),
            lit(0.0).alias(diet::LOSS_ADJ_PROTEIN),
            lit(0.0).alias(diet::LOSS_ADJ_B12),
        ])
        // Reverse (add back in) losses from the point of purchase to harvest
        .with_columns([
            (col(diet::LOSS_ADJ_KG) / col(diet::PCT_AFTER_LOSSES_TO_HOME)).alias(diet::KG),
            (col(diet::LOSS_ADJ_KCAL) / col(diet::PCT_AFTER_LOSSES_TO_HOME)).alias(diet::KCAL),
            lit(0.0).alias(diet::PROTEIN),
            lit(0.0).alias(diet::B12),
            lit(diet_name).alias(diet::DIET),
            lit("target").alias(diet::SCALING_METHOD),
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
