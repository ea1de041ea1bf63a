//! Country-of-origin allocation.
//!
//! Splits each country-item diet quantity across countries of origin using
//! bilateral trade shares: a domestic bucket, one bucket per trade partner,
//! and a synthetic "World" bucket for imports with no recorded partners.

use polars::prelude::*;
use tracing::{error, info};

use crate::error::DietError;
use crate::schema::{country, diet, item, origin, trade};

const SHARE_SUM_TOLERANCE: f64 = 1e-9;

/// Index columns identifying one diet record during allocation.
const ALLOC_INDEX: [&str; 10] = [
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
];

fn allocation_cols() -> Vec<&'static str> {
    let mut cols = ALLOC_INDEX.to_vec();
    cols.extend([
        diet::KG,
        diet::LOSS_ADJ_KCAL,
        diet::PCT_IMPORTED,
        trade::COO_CODE,
        trade::COO,
        origin::PCT_FROM_COO,
    ]);
    cols
}

/// Allocate every diet record across countries of origin.
///
/// Output has one row per (diet record, origin country) with `%_from_coo`
/// shares that sum to exactly 1 per record, plus origin-apportioned mass and
/// energy columns and a domestic/imported origin flag. Records with zero
/// consumed mass carry no footprint and are dropped up front.
pub fn allocate_origins(
    diet_df: &DataFrame,
    trade_matrix: &DataFrame,
) -> Result<DataFrame, DietError> {
    let null_imported = diet_df.column(diet::PCT_IMPORTED)?.null_count();
    if null_imported > 0 {
        let offenders = diet_df
            .clone()
            .lazy()
            .filter(col(diet::PCT_IMPORTED).is_null())
            .select([col(country::COUNTRY), col(item::ITEM), col(diet::DIET)])
            .collect()?;
        error!(%offenders, "diet records missing an import share");
        return Err(DietError::Validation(format!(
            "{null_imported} diet records have a null %_imported"
        )));
    }

    let dm = diet_df
        .clone()
        .lazy()
        .with_columns([
            col(diet::KG).fill_null(lit(0.0)),
            col(diet::LOSS_ADJ_KCAL).fill_null(lit(0.0)),
        ])
        .filter(col(diet::KG).gt(lit(0.0)))
        .collect()?;

    // Total imports per (destination, item) to turn bilateral tonnages into
    // shares of the import bucket
    let tm = trade_matrix
        .clone()
        .lazy()
        .with_columns([col(trade::IMPORTS_MT)
            .sum()
            .over([col(country::COUNTRY_CODE), col(item::ITEM_CODE)])
            .alias(trade::SUM_IMPORTS_MT)])
        .filter(col(trade::IMPORTS_MT).gt(lit(0.0)))
        .collect()?;

    let import_totals = tm
        .clone()
        .lazy()
        .group_by([col(country::COUNTRY_CODE), col(item::ITEM_CODE)])
        .agg([col(trade::SUM_IMPORTS_MT).first()]);

    let select_alloc = allocation_cols()
        .iter()
        .map(|c| col(*c))
        .collect::<Vec<_>>();

    // Domestic bucket: origin is the consuming country itself
    let domestic = dm
        .clone()
        .lazy()
        .with_columns([
            col(country::COUNTRY_CODE).alias(trade::COO_CODE),
            col(country::COUNTRY).alias(trade::COO),
            (lit(1.0) - col(diet::PCT_IMPORTED)).alias(origin::PCT_FROM_COO),
        ])
        .filter(col(origin::PCT_FROM_COO).gt(lit(0.0)))
        .select(select_alloc.clone());

    // Partner buckets: import share split by bilateral trade volumes
    let partners = dm
        .clone()
        .lazy()
        .join(
            tm.clone()
                .lazy()
                .select([
                    col(country::COUNTRY_CODE),
                    col(item::ITEM_CODE),
                    col(trade::COO_CODE),
                    col(trade::COO),
                    col(trade::IMPORTS_MT),
                    col(trade::SUM_IMPORTS_MT),
                ]),
            [col(country::COUNTRY_CODE), col(item::ITEM_CODE)],
            [col(country::COUNTRY_CODE), col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_columns([((col(trade::IMPORTS_MT) / col(trade::SUM_IMPORTS_MT))
            * col(diet::PCT_IMPORTED))
            .alias(origin::PCT_FROM_COO)])
        .filter(col(origin::PCT_FROM_COO).gt(lit(0.0)))
        .select(select_alloc.clone());

    // World bucket: imports with no recorded trade partners
    let world = dm
        .clone()
        .lazy()
        .join(
            import_totals,
            [col(country::COUNTRY_CODE), col(item::ITEM_CODE)],
            [col(country::COUNTRY_CODE), col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(
            col(diet::PCT_IMPORTED)
                .gt(lit(0.0))
                .and(col(trade::SUM_IMPORTS_MT).fill_null(lit(0.0)).lt_eq(lit(0.0))),
        )
        .with_columns([
            lit(origin::WORLD_CODE)
                .cast(DataType::Int64)
                .alias(trade::COO_CODE),
            lit(origin::WORLD).alias(trade::COO),
            col(diet::PCT_IMPORTED).alias(origin::PCT_FROM_COO),
        ])
        .select(select_alloc.clone());

    let mut allocated = domestic.collect()?;
    allocated.vstack_mut(&partners.collect()?)?;
    allocated.vstack_mut(&world.collect()?)?;

    // A country importing from itself lands in both the domestic and partner
    // buckets; merge the duplicate rows by summing their shares.
    let mut group_cols = ALLOC_INDEX
        .iter()
        .map(|c| col(*c))
        .collect::<Vec<_>>();
    group_cols.extend([
        col(diet::KG),
        col(diet::LOSS_ADJ_KCAL),
        col(diet::PCT_IMPORTED),
        col(trade::COO_CODE),
        col(trade::COO),
    ]);
    let allocated = allocated
        .lazy()
        .group_by(group_cols)
        .agg([col(origin::PCT_FROM_COO).sum()])
        .with_columns([col(origin::PCT_FROM_COO)
            .sum()
            .over(ALLOC_INDEX.iter().map(|c| col(*c)).collect::<Vec<_>>())
            .alias("_sum_%_from_coo")])
        .collect()?;

    validate_share_sums(&allocated)?;
    info!(rows = allocated.height(), "allocated diet records to countries of origin");

    let dm = allocated
        .lazy()
        .with_columns([
            (col(diet::KG) * col(origin::PCT_FROM_COO)).alias(origin::KG_BY_COO),
            (col(diet::LOSS_ADJ_KCAL) * col(origin::PCT_FROM_COO)).alias(origin::KCAL_BY_COO),
            when(col(trade::COO_CODE).eq(col(country::COUNTRY_CODE)))
                .then(lit(origin::DOMESTIC))
                .otherwise(lit(origin::IMPORTED))
                .alias(origin::ORIGIN),
        ])
        .select(
            allocation_cols()
                .iter()
                .map(|c| col(*c))
                .chain([
                    col(origin::KG_BY_COO),
                    col(origin::KCAL_BY_COO),
                    col(origin::ORIGIN),
                ])
                .collect::<Vec<_>>(),
        )
        .collect()?;

    Ok(dm)
}

/// Allocation is mass-conserving by construction; a record whose shares do
/// not sum to 1 is corrupt input (e.g. partner tonnages exceeding the import
/// total), never something to renormalize away.
fn validate_share_sums(allocated: &DataFrame) -> Result<(), DietError> {
    let sums = allocated.column("_sum_%_from_coo")?.f64()?;
    let bad = sums
        .into_iter()
        .filter(|s| s.map_or(true, |s| (s - 1.0).abs() > SHARE_SUM_TOLERANCE))
        .count();
    if bad > 0 {
        let offenders = allocated
            .clone()
            .lazy()
            .filter(
                (col("_sum_%_from_coo") - lit(1.0))
                    .gt(lit(SHARE_SUM_TOLERANCE))
                    .or((lit(1.0) - col("_sum_%_from_coo")).gt(lit(SHARE_SUM_TOLERANCE))),
            )
            .select([
                col(country::COUNTRY),
                col(item::ITEM),
                col(diet::DIET),
                col("_sum_%_from_coo"),
            ])
            .collect()?;
        error!(%offenders, "origin shares do not sum to 1");
        return Err(DietError::Validation(format!(
            "{bad} allocated diet records have origin shares not summing to 1"
        )));
    }
    Ok(())
}

/// Summarize allocated diets by origin class, the coarse
/// domestic-versus-imported view of each diet.
pub fn origin_group_summary(allocated: &DataFrame) -> Result<DataFrame, DietError> {
    let dm = allocated
        .clone()
        .lazy()
        .group_by([
            col(country::COUNTRY_CODE),
            col(country::COUNTRY),
            col(diet::DIET),
            col(item::TYPE),
            col(item::OUTPUT_GROUP),
            col(origin::ORIGIN),
        ])
        .agg([
            col(origin::KG_BY_COO).sum(),
            col(origin::KCAL_BY_COO).sum(),
        ])
        .collect()?;
    Ok(dm)
}
