//! Footprint escalation and attachment.
//!
//! Every (origin country, item, footprint type) triple needs a footprint per
//! kg before diets can be costed. Where country-level observations are
//! missing, values escalate to production-weighted regional averages and
//! finally to a production-weighted world average, with the provenance of
//! each value recorded alongside it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::{FootprintCategory, FootprintClassTable};
use crate::error::DietError;
use crate::schema::{country, footprint, item, origin, resolution, trade};

/// One observed footprint value read out of the footprints table.
struct FootprintRow {
    country_code: i64,
    item_code: i64,
    footprint_type: String,
    footprint: Option<f64>,
}

fn read_footprint_rows(fp: &DataFrame) -> Result<Vec<FootprintRow>, DietError> {
    let codes = fp.column(country::COUNTRY_CODE)?.i64()?;
    let items = fp.column(item::ITEM_CODE)?.i64()?;
    let types = fp.column(footprint::FOOTPRINT_TYPE)?.str()?;
    let values = fp.column(footprint::FOOTPRINT)?.f64()?;

    let mut rows = Vec::with_capacity(fp.height());
    for i in 0..fp.height() {
        let (Some(country_code), Some(item_code), Some(footprint_type)) =
            (codes.get(i), items.get(i), types.get(i))
        else {
            return Err(DietError::InvalidData(format!(
                "footprint row {i} has a null index column"
            )));
        };
        rows.push(FootprintRow {
            country_code,
            item_code,
            footprint_type: footprint_type.to_string(),
            footprint: values.get(i),
        });
    }
    Ok(rows)
}

/// Escalate footprints so every (country, item, type) triple has a value.
///
/// Observed country values win. Otherwise the production-weighted average of
/// observed values in the country's region applies, then the
/// production-weighted world average over all regions. Land-use-change types
/// never escalate: LUC emissions are attributable only to the producing
/// country, so a missing country value is a true zero.
///
/// `countries` supplies the country-to-region mapping and the full country
/// list; the output covers every country in it, including countries with no
/// production.
pub fn escalate_footprints(
    footprints: &DataFrame,
    production: &DataFrame,
    countries: &DataFrame,
    classes: &FootprintClassTable,
) -> Result<DataFrame, DietError> {
    let rows = read_footprint_rows(footprints)?;

    let mut seen: HashSet<(i64, i64, &str)> = HashSet::with_capacity(rows.len());
    for row in &rows {
        if !seen.insert((row.country_code, row.item_code, row.footprint_type.as_str())) {
            return Err(DietError::DuplicateIndex(format!(
                "duplicate footprint for country {}, item {}, type {}",
                row.country_code, row.item_code, row.footprint_type
            )));
        }
    }

    // Country list and region mapping
    let country_codes = countries.column(country::COUNTRY_CODE)?.i64()?;
    let country_names = countries.column(country::COUNTRY)?.str()?;
    let region_names = countries.column(country::REGION)?.str()?;
    let mut country_meta: BTreeMap<i64, (String, String)> = BTreeMap::new();
    for i in 0..countries.height() {
        let (Some(code), Some(name), Some(region)) = (
            country_codes.get(i),
            country_names.get(i),
            region_names.get(i),
        ) else {
            return Err(DietError::InvalidData(format!(
                "country row {i} has a null code, name or region"
            )));
        };
        country_meta.insert(code, (name.to_string(), region.to_string()));
    }

    // Production tonnage per (country, item); countries absent from the
    // production table produce nothing and get zero weight
    let prod_codes = production.column(country::COUNTRY_CODE)?.i64()?;
    let prod_items = production.column(item::ITEM_CODE)?.i64()?;
    let prod_mt = production.column(footprint::MT_PRODUCTION)?.f64()?;
    let mut prod: HashMap<(i64, i64), f64> = HashMap::with_capacity(production.height());
    for i in 0..production.height() {
        if let (Some(code), Some(item_code)) = (prod_codes.get(i), prod_items.get(i)) {
            prod.insert((code, item_code), prod_mt.get(i).unwrap_or(0.0));
        }
    }
    let production_of = |code: i64, item_code: i64| prod.get(&(code, item_code)).copied().unwrap_or(0.0);

    // Observed values keyed for country lookup; regional and world pools for
    // the escalation tiers. LUC types are excluded from the pools.
    let mut by_country: HashMap<(i64, i64, &str), f64> = HashMap::new();
    let mut regional: HashMap<(String, i64, &str), (Vec<f64>, Vec<f64>)> = HashMap::new();
    let mut world: HashMap<(i64, &str), (Vec<f64>, Vec<f64>)> = HashMap::new();
    let mut item_types: BTreeSet<(i64, String)> = BTreeSet::new();

    for row in &rows {
        item_types.insert((row.item_code, row.footprint_type.clone()));
        let Some(value) = row.footprint else { continue };
        by_country.insert(
            (row.country_code, row.item_code, row.footprint_type.as_str()),
            value,
        );
        if classes.is_luc(&row.footprint_type) {
            continue;
        }
        let Some((_, region)) = country_meta.get(&row.country_code) else {
            warn!(
                country_code = row.country_code,
                "footprint observed for a country missing from the country table"
            );
            continue;
        };
        let weight = production_of(row.country_code, row.item_code);
        let (values, weights) = regional
            .entry((region.clone(), row.item_code, row.footprint_type.as_str()))
            .or_default();
        values.push(value);
        weights.push(weight);
        let (values, weights) = world
            .entry((row.item_code, row.footprint_type.as_str()))
            .or_default();
        values.push(value);
        weights.push(weight);
    }

    let regional_avg: HashMap<&(String, i64, &str), f64> = regional
        .iter()
        .filter_map(|(k, (v, w))| crate::stats::weighted_mean(v, w).map(|m| (k, m)))
        .collect();
    let world_avg: HashMap<&(i64, &str), f64> = world
        .iter()
        .filter_map(|(k, (v, w))| crate::stats::weighted_mean(v, w).map(|m| (k, m)))
        .collect();

    let n = country_meta.len() * item_types.len();
    let mut out_codes: Vec<i64> = Vec::with_capacity(n);
    let mut out_countries: Vec<String> = Vec::with_capacity(n);
    let mut out_regions: Vec<String> = Vec::with_capacity(n);
    let mut out_items: Vec<i64> = Vec::with_capacity(n);
    let mut out_types: Vec<String> = Vec::with_capacity(n);
    let mut out_values: Vec<f64> = Vec::with_capacity(n);
    let mut out_resolutions: Vec<&str> = Vec::with_capacity(n);

    for (&code, (name, region)) in &country_meta {
        for (item_code, footprint_type) in &item_types {
            let country_value = by_country
                .get(&(code, *item_code, footprint_type.as_str()))
                .copied();
            let (value, res) = if classes.is_luc(footprint_type) {
                (country_value.unwrap_or(0.0), resolution::COUNTRY)
            } else {
                let region_value = regional_avg
                    .get(&(region.clone(), *item_code, footprint_type.as_str()))
                    .copied();
                let world_value = world_avg
                    .get(&(*item_code, footprint_type.as_str()))
                    .copied();
                match crate::stats::resolve_first(&[
                    (country_value, resolution::COUNTRY),
                    (region_value, resolution::REGION),
                    (world_value, resolution::WORLD),
                ]) {
                    Some(resolved) => resolved,
                    // No observation anywhere for this (item, type)
                    None => continue,
                }
            };
            out_codes.push(code);
            out_countries.push(name.clone());
            out_regions.push(region.clone());
            out_items.push(*item_code);
            out_types.push(footprint_type.clone());
            out_values.push(value);
            out_resolutions.push(res);
        }
    }

    info!(
        observed = rows.len(),
        escalated = out_codes.len(),
        "escalated footprints to full country coverage"
    );

    let df = DataFrame::new(vec![
        Column::new(country::COUNTRY_CODE.into(), &out_codes),
        Column::new(country::COUNTRY.into(), &out_countries),
        Column::new(country::REGION.into(), &out_regions),
        Column::new(item::ITEM_CODE.into(), &out_items),
        Column::new(footprint::FOOTPRINT_TYPE.into(), &out_types),
        Column::new(footprint::FOOTPRINT.into(), &out_values),
        Column::new(footprint::GEOGRAPHIC_RESOLUTION.into(), &out_resolutions),
    ])?;
    Ok(df)
}

/// Sum component footprint types into combined totals: greenhouse-gas types
/// into `kg_co2e_total` and antibiotic types into `mg_abx_total`. Types
/// flagged as already-total are excluded from the sums.
pub fn combine_footprint_types(
    fp: &DataFrame,
    index_cols: &[&str],
    results_cols: &[&str],
    keep_originals: bool,
    classes: &FootprintClassTable,
) -> Result<DataFrame, DietError> {
    let types = fp.column(footprint::FOOTPRINT_TYPE)?.str()?;

    let combined_for = |category: FootprintCategory, total_name: &str| -> Result<Option<DataFrame>, DietError> {
        let mask: BooleanChunked = (0..fp.height())
            .map(|i| {
                types.get(i).map(|t| {
                    classes.category(t) == category && !classes.is_total(t)
                })
            })
            .collect();
        let component = fp.filter(&mask)?;
        if component.height() == 0 {
            return Ok(None);
        }
        let combined = component
            .lazy()
            .group_by(index_cols.iter().map(|c| col(*c)).collect::<Vec<_>>())
            .agg(
                results_cols
                    .iter()
                    .map(|c| col(*c).sum())
                    .collect::<Vec<_>>(),
            )
            .with_columns([lit(total_name).alias(footprint::FOOTPRINT_TYPE)])
            .collect()?;
        Ok(Some(combined))
    };

    let mut select_cols = index_cols.to_vec();
    select_cols.push(footprint::FOOTPRINT_TYPE);
    select_cols.extend(results_cols);

    // Totals from an earlier combine are dropped from the kept originals,
    // otherwise they would duplicate the freshly computed rows
    let mut out = if keep_originals {
        let component_mask: BooleanChunked = (0..fp.height())
            .map(|i| types.get(i).map(|t| !classes.is_total(t)))
            .collect();
        fp.filter(&component_mask)?.select(select_cols.clone())?
    } else {
        fp.select(select_cols.clone())?.head(Some(0))
    };
    if let Some(ghg) = combined_for(FootprintCategory::Ghg, footprint::KG_CO2E_TOTAL)? {
        out.vstack_mut(&ghg.select(select_cols.clone())?)?;
    }
    if let Some(abx) = combined_for(FootprintCategory::Abx, footprint::MG_ABX_TOTAL)? {
        out.vstack_mut(&abx.select(select_cols.clone())?)?;
    }
    Ok(out)
}

/// Append combined totals to an escalated footprint table. Combined rows are
/// sums over source rows at possibly different resolutions, so their
/// provenance is marked `grouped_data`.
pub fn combine_escalated(
    escalated: &DataFrame,
    classes: &FootprintClassTable,
) -> Result<DataFrame, DietError> {
    let index_cols = [
        country::COUNTRY_CODE,
        country::COUNTRY,
        country::REGION,
        item::ITEM_CODE,
    ];
    let combined = combine_footprint_types(
        escalated,
        &index_cols,
        &[footprint::FOOTPRINT],
        false,
        classes,
    )?
    .lazy()
    .with_columns([lit(resolution::GROUPED).alias(footprint::GEOGRAPHIC_RESOLUTION)])
    .collect()?;

    let out_cols = [
        country::COUNTRY_CODE,
        country::COUNTRY,
        country::REGION,
        item::ITEM_CODE,
        footprint::FOOTPRINT_TYPE,
        footprint::FOOTPRINT,
        footprint::GEOGRAPHIC_RESOLUTION,
    ];
    // Strip totals from the input before appending the recomputed ones, so
    // combining already-combined data stays idempotent
    let types = escalated.column(footprint::FOOTPRINT_TYPE)?.str()?;
    let component_mask: BooleanChunked = (0..escalated.height())
        .map(|i| types.get(i).map(|t| !classes.is_total(t)))
        .collect();
    let mut out = escalated.filter(&component_mask)?.select(out_cols)?;
    out.vstack_mut(&combined.select(out_cols)?)?;
    check_unique_footprints(&out)?;
    Ok(out)
}

/// One row per (country, item, footprint type) after combining.
fn check_unique_footprints(fp: &DataFrame) -> Result<(), DietError> {
    let codes = fp.column(country::COUNTRY_CODE)?.i64()?;
    let items = fp.column(item::ITEM_CODE)?.i64()?;
    let types = fp.column(footprint::FOOTPRINT_TYPE)?.str()?;
    let mut seen: HashSet<(i64, i64, &str)> = HashSet::with_capacity(fp.height());
    for i in 0..fp.height() {
        if let (Some(code), Some(item_code), Some(fp_type)) =
            (codes.get(i), items.get(i), types.get(i))
        {
            if !seen.insert((code, item_code, fp_type)) {
                return Err(DietError::DuplicateIndex(format!(
                    "duplicate combined footprint for country {code}, item {item_code}, type {fp_type}"
                )));
            }
        }
    }
    Ok(())
}

/// Attach escalated footprints to origin-allocated diets: each origin's mass
/// is costed at the origin country's footprint per kg.
pub fn attach_diet_footprints(
    allocated: &DataFrame,
    escalated: &DataFrame,
) -> Result<DataFrame, DietError> {
    let fp = escalated
        .clone()
        .lazy()
        .rename([country::COUNTRY_CODE], [trade::COO_CODE], true)
        .select([
            col(trade::COO_CODE),
            col(item::ITEM_CODE),
            col(footprint::FOOTPRINT_TYPE),
            col(footprint::FOOTPRINT).alias(footprint::ITEM_FOOTPRINT_PER_KG),
            col(footprint::GEOGRAPHIC_RESOLUTION),
        ]);

    // Inner join: origins without a footprint (e.g. the World bucket when no
    // world average exists for an item) drop out here
    let dm = allocated
        .clone()
        .lazy()
        .join(
            fp,
            [col(trade::COO_CODE), col(item::ITEM_CODE)],
            [col(trade::COO_CODE), col(item::ITEM_CODE)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_columns([(col(origin::KG_BY_COO) * col(footprint::ITEM_FOOTPRINT_PER_KG))
            .alias(footprint::DIET_FOOTPRINT)])
        .collect()?;
    Ok(dm)
}

/// Footprint totals per (country, diet, item, origin, type): per-capita sums
/// over origin countries, keeping the domestic/imported split, scaled to the
/// whole population.
pub fn footprints_by_item(
    diet_footprints: &DataFrame,
    countries: &DataFrame,
) -> Result<DataFrame, DietError> {
    let population = countries
        .clone()
        .lazy()
        .select([col(country::COUNTRY_CODE), col(country::POPULATION)]);

    let dm = diet_footprints
        .clone()
        .lazy()
        .group_by([
            col(country::COUNTRY_CODE),
            col(country::COUNTRY),
            col(crate::schema::diet::DIET),
            col(item::ITEM_CODE),
            col(item::ITEM),
            col(item::OUTPUT_GROUP),
            col(item::TYPE),
            col(origin::ORIGIN),
            col(footprint::FOOTPRINT_TYPE),
        ])
        .agg([
            col(footprint::DIET_FOOTPRINT).sum(),
            col(origin::KG_BY_COO).sum(),
            col(origin::KCAL_BY_COO).sum(),
        ])
        .join(
            population,
            [col(country::COUNTRY_CODE)],
            [col(country::COUNTRY_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([(col(footprint::DIET_FOOTPRINT) * col(country::POPULATION))
            .alias(footprint::DIET_FOOTPRINT_WHOLE_POP)])
        .collect()?;
    Ok(dm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FootprintClass;
    use crate::schema::diet;
    use approx::assert_relative_eq;

    fn classes_fixture() -> FootprintClassTable {
        let mut classes = FootprintClassTable::new();
        classes.insert(
            "kg_co2e_excl_luc",
            FootprintClass {
                category: FootprintCategory::Ghg,
                sort_order: 1,
                ..Default::default()
            },
        );
        classes.insert(
            "kg_co2e_luc_direct",
            FootprintClass {
                category: FootprintCategory::Ghg,
                luc: true,
                sort_order: 2,
                ..Default::default()
            },
        );
        classes.insert(
            "mg_abx",
            FootprintClass {
                category: FootprintCategory::Abx,
                sort_order: 3,
                ..Default::default()
            },
        );
        classes.insert(
            "kg_co2e_total",
            FootprintClass {
                category: FootprintCategory::Ghg,
                is_total: true,
                sort_order: 4,
                ..Default::default()
            },
        );
        classes
    }

    fn countries_fixture() -> DataFrame {
        df!(
            country::COUNTRY_CODE => [10i64, 20, 30],
            country::COUNTRY => ["Richland", "Poorland", "Farmland"],
            country::REGION => ["North", "North", "South"],
            country::POPULATION => [1_000_000.0, 5_000_000.0, 2_000_000.0],
        )
        .unwrap()
    }

    fn footprints_fixture() -> DataFrame {
        // Item 1: observed in 10 and 30 only. Item 1 LUC: observed in 30.
        df!(
            country::COUNTRY_CODE => [10i64, 30, 30],
            item::ITEM_CODE => [1i64, 1, 1],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_excl_luc", "kg_co2e_excl_luc", "kg_co2e_luc_direct"],
            footprint::FOOTPRINT => [2.0, 4.0, 1.5],
        )
        .unwrap()
    }

    fn production_fixture() -> DataFrame {
        df!(
            country::COUNTRY_CODE => [10i64, 30],
            item::ITEM_CODE => [1i64, 1],
            footprint::MT_PRODUCTION => [1000.0, 3000.0],
        )
        .unwrap()
    }

    fn value_at(
        dm: &DataFrame,
        code: i64,
        item_code: i64,
        fp_type: &str,
    ) -> Option<(f64, String)> {
        let codes = dm.column(country::COUNTRY_CODE).unwrap().i64().unwrap();
        let items = dm.column(item::ITEM_CODE).unwrap().i64().unwrap();
        let types = dm.column(footprint::FOOTPRINT_TYPE).unwrap().str().unwrap();
        let values = dm.column(footprint::FOOTPRINT).unwrap().f64().unwrap();
        let res = dm
            .column(footprint::GEOGRAPHIC_RESOLUTION)
            .unwrap()
            .str()
            .unwrap();
        (0..dm.height())
            .find(|&i| {
                codes.get(i) == Some(code)
                    && items.get(i) == Some(item_code)
                    && types.get(i) == Some(fp_type)
            })
            .map(|i| (values.get(i).unwrap(), res.get(i).unwrap().to_string()))
    }

    #[test]
    fn escalates_country_region_world() {
        let dm = escalate_footprints(
            &footprints_fixture(),
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();

        // Observed countries keep their own values
        let (v, r) = value_at(&dm, 10, 1, "kg_co2e_excl_luc").unwrap();
        assert_relative_eq!(v, 2.0);
        assert_eq!(r, resolution::COUNTRY);

        // Poorland has no observation; its region North contains only the
        // value from Richland
        let (v, r) = value_at(&dm, 20, 1, "kg_co2e_excl_luc").unwrap();
        assert_relative_eq!(v, 2.0);
        assert_eq!(r, resolution::REGION);
    }

    #[test]
    fn world_average_is_production_weighted_over_all_regions() {
        // Drop the region mapping distinction by observing only in the South;
        // northern countries then escalate past the empty region to world.
        let fp = df!(
            country::COUNTRY_CODE => [30i64],
            item::ITEM_CODE => [1i64],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_excl_luc"],
            footprint::FOOTPRINT => [4.0],
        )
        .unwrap();
        let dm = escalate_footprints(
            &fp,
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        let (v, r) = value_at(&dm, 10, 1, "kg_co2e_excl_luc").unwrap();
        assert_relative_eq!(v, 4.0);
        assert_eq!(r, resolution::WORLD);
    }

    #[test]
    fn luc_never_escalates() {
        let dm = escalate_footprints(
            &footprints_fixture(),
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();

        let (v, r) = value_at(&dm, 30, 1, "kg_co2e_luc_direct").unwrap();
        assert_relative_eq!(v, 1.5);
        assert_eq!(r, resolution::COUNTRY);

        // Countries without a LUC observation get a true zero, still at
        // country resolution
        let (v, r) = value_at(&dm, 10, 1, "kg_co2e_luc_direct").unwrap();
        assert_relative_eq!(v, 0.0);
        assert_eq!(r, resolution::COUNTRY);
    }

    #[test]
    fn zero_production_observations_still_enter_averages() {
        // Both northern countries observe, neither produces: the regional
        // average degrades to an unweighted mean instead of vanishing.
        let fp = df!(
            country::COUNTRY_CODE => [10i64, 20],
            item::ITEM_CODE => [1i64, 1],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_excl_luc", "kg_co2e_excl_luc"],
            footprint::FOOTPRINT => [2.0, 6.0],
        )
        .unwrap();
        let prod = df!(
            country::COUNTRY_CODE => Vec::<i64>::new(),
            item::ITEM_CODE => Vec::<i64>::new(),
            footprint::MT_PRODUCTION => Vec::<f64>::new(),
        )
        .unwrap();
        let dm = escalate_footprints(&fp, &prod, &countries_fixture(), &classes_fixture()).unwrap();
        let (v, r) = value_at(&dm, 30, 1, "kg_co2e_excl_luc").unwrap();
        assert_relative_eq!(v, 4.0);
        assert_eq!(r, resolution::WORLD);
    }

    #[test]
    fn duplicate_observations_are_rejected() {
        let fp = df!(
            country::COUNTRY_CODE => [10i64, 10],
            item::ITEM_CODE => [1i64, 1],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_excl_luc", "kg_co2e_excl_luc"],
            footprint::FOOTPRINT => [2.0, 3.0],
        )
        .unwrap();
        assert!(matches!(
            escalate_footprints(
                &fp,
                &production_fixture(),
                &countries_fixture(),
                &classes_fixture()
            ),
            Err(DietError::DuplicateIndex(_))
        ));
    }

    #[test]
    fn combines_component_types_into_totals() {
        let escalated = escalate_footprints(
            &footprints_fixture(),
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        let combined = combine_escalated(&escalated, &classes_fixture()).unwrap();

        // Farmland: 4.0 excl-luc + 1.5 luc = 5.5 total, marked grouped_data
        let (v, r) = value_at(&combined, 30, 1, footprint::KG_CO2E_TOTAL).unwrap();
        assert_relative_eq!(v, 5.5);
        assert_eq!(r, resolution::GROUPED);
        // Originals survive alongside the totals
        assert!(value_at(&combined, 30, 1, "kg_co2e_excl_luc").is_some());
    }

    #[test]
    fn totals_are_excluded_from_recombination() {
        let escalated = escalate_footprints(
            &footprints_fixture(),
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        let once = combine_escalated(&escalated, &classes_fixture()).unwrap();
        let twice = combine_escalated(&once, &classes_fixture()).unwrap();

        let (v1, _) = value_at(&once, 30, 1, footprint::KG_CO2E_TOTAL).unwrap();
        let (v2, _) = value_at(&twice, 30, 1, footprint::KG_CO2E_TOTAL).unwrap();
        assert_relative_eq!(v1, v2);

        // Recombining is a no-op row-wise: the stale totals are replaced, not
        // duplicated
        assert_eq!(twice.height(), once.height());
        let types = twice.column(footprint::FOOTPRINT_TYPE).unwrap().str().unwrap();
        let codes = twice.column(country::COUNTRY_CODE).unwrap().i64().unwrap();
        let total_rows = (0..twice.height())
            .filter(|&i| {
                codes.get(i) == Some(30) && types.get(i) == Some(footprint::KG_CO2E_TOTAL)
            })
            .count();
        assert_eq!(total_rows, 1);
    }

    #[test]
    fn stale_totals_are_replaced_when_keeping_originals() {
        // A total row from an earlier combine sits alongside its components;
        // it must not survive next to the recomputed total
        let fp = df!(
            country::COUNTRY_CODE => [30i64, 30, 30],
            item::ITEM_CODE => [1i64, 1, 1],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_excl_luc", "kg_co2e_luc_direct", footprint::KG_CO2E_TOTAL],
            footprint::FOOTPRINT => [4.0, 1.5, 99.0],
        )
        .unwrap();
        let out = combine_footprint_types(
            &fp,
            &[country::COUNTRY_CODE, item::ITEM_CODE],
            &[footprint::FOOTPRINT],
            true,
            &classes_fixture(),
        )
        .unwrap();

        let types = out.column(footprint::FOOTPRINT_TYPE).unwrap().str().unwrap();
        let values = out.column(footprint::FOOTPRINT).unwrap().f64().unwrap();
        let total_rows: Vec<usize> = (0..out.height())
            .filter(|&i| types.get(i) == Some(footprint::KG_CO2E_TOTAL))
            .collect();
        assert_eq!(total_rows.len(), 1);
        assert_relative_eq!(values.get(total_rows[0]).unwrap(), 5.5);
        assert_eq!(out.height(), 3);
    }

    #[test]
    fn attaches_footprints_at_origin_prices() {
        let escalated = escalate_footprints(
            &footprints_fixture(),
            &production_fixture(),
            &countries_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        // Richland eats 70 kg domestic wheat and 30 kg from Farmland
        let allocated = df!(
            country::COUNTRY_CODE => [10i64, 10],
            country::COUNTRY => ["Richland", "Richland"],
            diet::DIET => ["baseline", "baseline"],
            item::ITEM_CODE => [1i64, 1],
            item::ITEM => ["Wheat", "Wheat"],
            item::OUTPUT_GROUP => ["Grains", "Grains"],
            item::TYPE => ["plant", "plant"],
            trade::COO_CODE => [10i64, 30],
            origin::ORIGIN => [origin::DOMESTIC, origin::IMPORTED],
            origin::KG_BY_COO => [70.0, 30.0],
            origin::KCAL_BY_COO => [280.0, 120.0],
        )
        .unwrap();

        let dm = attach_diet_footprints(&allocated, &escalated).unwrap();
        let coos = dm.column(trade::COO_CODE).unwrap().i64().unwrap();
        let types = dm.column(footprint::FOOTPRINT_TYPE).unwrap().str().unwrap();
        let fps = dm.column(footprint::DIET_FOOTPRINT).unwrap().f64().unwrap();
        let get = |coo: i64, t: &str| {
            (0..dm.height())
                .find(|&i| coos.get(i) == Some(coo) && types.get(i) == Some(t))
                .map(|i| fps.get(i).unwrap())
        };
        assert_relative_eq!(get(10, "kg_co2e_excl_luc").unwrap(), 140.0);
        assert_relative_eq!(get(30, "kg_co2e_excl_luc").unwrap(), 120.0);
        assert_relative_eq!(get(30, "kg_co2e_luc_direct").unwrap(), 45.0);

        // The per-item summary keeps the domestic/imported split
        let summary = footprints_by_item(&dm, &countries_fixture()).unwrap();
        let types = summary
            .column(footprint::FOOTPRINT_TYPE)
            .unwrap()
            .str()
            .unwrap();
        let origins = summary.column(origin::ORIGIN).unwrap().str().unwrap();
        let totals = summary
            .column(footprint::DIET_FOOTPRINT)
            .unwrap()
            .f64()
            .unwrap();
        let whole_pop = summary
            .column(footprint::DIET_FOOTPRINT_WHOLE_POP)
            .unwrap()
            .f64()
            .unwrap();
        let at = |org: &str| {
            (0..summary.height())
                .find(|&i| {
                    types.get(i) == Some("kg_co2e_excl_luc") && origins.get(i) == Some(org)
                })
                .unwrap()
        };
        let (dom, imp) = (at(origin::DOMESTIC), at(origin::IMPORTED));
        assert_relative_eq!(totals.get(dom).unwrap(), 140.0);
        assert_relative_eq!(totals.get(imp).unwrap(), 120.0);
        assert_relative_eq!(whole_pop.get(dom).unwrap(), 140.0 * 1_000_000.0);
        assert_relative_eq!(whole_pop.get(imp).unwrap(), 120.0 * 1_000_000.0);
    }
}
