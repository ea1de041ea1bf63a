//! Bootstrap aggregation of diet footprints.
//!
//! Footprint intensities for plant and aquatic foods come from literature
//! review as weighted empirical distributions rather than point values. For
//! each footprint type this module draws repeated weighted samples per item,
//! multiplies them through per-capita diet quantities and summarizes the
//! simulated totals into quartiles per (country, diet, output group).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use polars::prelude::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::{FootprintClassTable, RunParams};
use crate::error::DietError;
use crate::schema::{bootstrap, country, diet, footprint, item};
use crate::stats;

/// One literature-review footprint observation. The level columns identify
/// what the observation describes: a single item, a subgroup or a broad
/// group.
struct DistRow {
    item_code: Option<i64>,
    subgroup: Option<String>,
    group: Option<String>,
    output_group: Option<String>,
    footprint_type: String,
    footprint: f64,
    weight: f64,
}

/// Item taxonomy needed to match distributions at each granularity level.
struct ItemMeta {
    item_code: i64,
    item: String,
    subgroup: Option<String>,
    group: Option<String>,
    output_group: Option<String>,
}

/// A gathered, weight-normalized distribution row assigned to one item.
struct NormRow {
    item_code: i64,
    footprint_type: String,
    footprint: f64,
    weight: f64,
    level: &'static str,
}

fn opt_str(df: &DataFrame, name: &str, i: usize) -> Result<Option<String>, DietError> {
    Ok(df.column(name)?.str()?.get(i).map(str::to_string))
}

fn read_dist_rows(distributions: &DataFrame) -> Result<Vec<DistRow>, DietError> {
    let codes = distributions.column(item::ITEM_CODE)?.i64()?;
    let types = distributions.column(footprint::FOOTPRINT_TYPE)?.str()?;
    let values = distributions.column(footprint::FOOTPRINT)?.f64()?;
    let weights = distributions.column(bootstrap::WEIGHT)?.f64()?;

    let mut rows = Vec::with_capacity(distributions.height());
    for i in 0..distributions.height() {
        // Null footprints carry no information and would poison the draws
        let Some(value) = values.get(i) else { continue };
        let Some(footprint_type) = types.get(i) else {
            return Err(DietError::InvalidData(format!(
                "distribution row {i} has a null footprint_type"
            )));
        };
        rows.push(DistRow {
            item_code: codes.get(i),
            subgroup: opt_str(distributions, item::BOOTSTRAP_SUBGROUP, i)?,
            group: opt_str(distributions, item::GROUP, i)?,
            output_group: opt_str(distributions, item::OUTPUT_GROUP, i)?,
            footprint_type: footprint_type.to_string(),
            footprint: value,
            weight: weights.get(i).unwrap_or(0.0),
        });
    }
    Ok(rows)
}

fn read_item_meta(items: &DataFrame) -> Result<Vec<ItemMeta>, DietError> {
    let codes = items.column(item::ITEM_CODE)?.i64()?;
    let names = items.column(item::ITEM)?.str()?;
    let includes = items.column(item::INCLUDE_IN_MODEL)?.str()?;
    let types = items.column(item::TYPE)?.str()?;

    let mut metas = Vec::new();
    for i in 0..items.height() {
        // Terrestrial animal foods use point footprints, not distributions
        if includes.get(i) == Some(item::INCLUDE_NO) || types.get(i) == Some("t_animal") {
            continue;
        }
        let Some(item_code) = codes.get(i) else {
            return Err(DietError::InvalidData(format!(
                "item row {i} has a null item code"
            )));
        };
        metas.push(ItemMeta {
            item_code,
            item: names.get(i).unwrap_or("").to_string(),
            subgroup: opt_str(items, item::BOOTSTRAP_SUBGROUP, i)?,
            group: opt_str(items, item::GROUP, i)?,
            output_group: opt_str(items, item::OUTPUT_GROUP, i)?,
        });
    }
    Ok(metas)
}

/// Gather the distribution rows applying to each (item, footprint type) pair
/// and normalize their weights to sum to 1.
///
/// Matching escalates along the item taxonomy: item-level observations win;
/// where none exist, and only for footprint types flagged for group-level
/// bootstrapping, subgroup observations apply, then broad-group
/// observations. Pairs valid for a footprint type are limited to output
/// groups that carry at least one observation of that type anywhere, so a
/// broad-group distribution never leaks into an output group the footprint
/// type does not describe.
fn gather_normalized(
    distributions: &DataFrame,
    items: &DataFrame,
    classes: &FootprintClassTable,
) -> Result<Vec<NormRow>, DietError> {
    let dist = read_dist_rows(distributions)?;
    let metas = read_item_meta(items)?;

    let fp_types: BTreeSet<&str> = dist.iter().map(|r| r.footprint_type.as_str()).collect();
    let valid: HashSet<(&str, &str)> = dist
        .iter()
        .filter_map(|r| {
            r.output_group
                .as_deref()
                .map(|og| (og, r.footprint_type.as_str()))
        })
        .collect();

    let mut out = Vec::new();
    for meta in &metas {
        for fp_type in &fp_types {
            let Some(output_group) = meta.output_group.as_deref() else {
                continue;
            };
            if !valid.contains(&(output_group, fp_type)) {
                continue;
            }

            let of_type =
                |r: &&DistRow| r.footprint_type == *fp_type;
            let item_rows: Vec<&DistRow> = dist
                .iter()
                .filter(of_type)
                .filter(|r| r.item_code == Some(meta.item_code))
                .collect();
            let (matched, level) = if !item_rows.is_empty() {
                (item_rows, item::ITEM_CODE)
            } else if !classes.bootstrap_by_group(fp_type) {
                continue;
            } else {
                let subgroup_rows: Vec<&DistRow> = dist
                    .iter()
                    .filter(of_type)
                    .filter(|r| {
                        meta.subgroup.is_some() && r.subgroup == meta.subgroup
                    })
                    .collect();
                if !subgroup_rows.is_empty() {
                    (subgroup_rows, item::BOOTSTRAP_SUBGROUP)
                } else {
                    let group_rows: Vec<&DistRow> = dist
                        .iter()
                        .filter(of_type)
                        .filter(|r| meta.group.is_some() && r.group == meta.group)
                        .collect();
                    if group_rows.is_empty() {
                        // Excluded from this footprint type, not zeroed
                        continue;
                    }
                    (group_rows, item::GROUP)
                }
            };

            let weight_sum: f64 = matched.iter().map(|r| r.weight).sum();
            if weight_sum <= 0.0 {
                return Err(DietError::InvalidData(format!(
                    "distribution weights for item {} ({}), type {fp_type} sum to {weight_sum}",
                    meta.item_code, meta.item
                )));
            }
            debug!(
                item_code = meta.item_code,
                footprint_type = *fp_type,
                level,
                rows = matched.len(),
                "gathered footprint distribution"
            );
            for r in matched {
                out.push(NormRow {
                    item_code: meta.item_code,
                    footprint_type: r.footprint_type.clone(),
                    footprint: r.footprint,
                    weight: r.weight / weight_sum,
                    level,
                });
            }
        }
    }

    // The draw sequence consumes one RNG stream across all items and types,
    // so the row order must be pinned rather than inherited from load order.
    out.sort_by(|a, b| {
        (a.item_code, classes.sort_order(&a.footprint_type))
            .cmp(&(b.item_code, classes.sort_order(&b.footprint_type)))
            .then_with(|| a.footprint_type.cmp(&b.footprint_type))
            .then_with(|| a.footprint.total_cmp(&b.footprint))
            .then_with(|| a.weight.total_cmp(&b.weight))
    });
    Ok(out)
}

/// Diagnostic view of the gathered, normalized distributions, including the
/// taxonomy level each one was matched at.
pub fn normalized_distributions(
    distributions: &DataFrame,
    items: &DataFrame,
    classes: &FootprintClassTable,
) -> Result<DataFrame, DietError> {
    let rows = gather_normalized(distributions, items, classes)?;
    let df = DataFrame::new(vec![
        Column::new(
            item::ITEM_CODE.into(),
            &rows.iter().map(|r| r.item_code).collect::<Vec<i64>>(),
        ),
        Column::new(
            footprint::FOOTPRINT_TYPE.into(),
            &rows
                .iter()
                .map(|r| r.footprint_type.clone())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            footprint::FOOTPRINT.into(),
            &rows.iter().map(|r| r.footprint).collect::<Vec<f64>>(),
        ),
        Column::new(
            bootstrap::WEIGHT.into(),
            &rows.iter().map(|r| r.weight).collect::<Vec<f64>>(),
        ),
        Column::new(
            bootstrap::DISTRIBUTION_GROUP_LEVEL.into(),
            &rows.iter().map(|r| r.level).collect::<Vec<&str>>(),
        ),
    ])?;
    Ok(df)
}

type GroupKey = (String, String, i64, String);

fn read_diet_groups(diets: &DataFrame) -> Result<BTreeMap<GroupKey, Vec<(i64, f64)>>, DietError> {
    let diet_names = diets.column(diet::DIET)?.str()?;
    let output_groups = diets.column(item::OUTPUT_GROUP)?.str()?;
    let country_codes = diets.column(country::COUNTRY_CODE)?.i64()?;
    let countries = diets.column(country::COUNTRY)?.str()?;
    let item_codes = diets.column(item::ITEM_CODE)?.i64()?;
    let quants = diets.column(diet::KG)?.f64()?;

    let mut groups: BTreeMap<GroupKey, Vec<(i64, f64)>> = BTreeMap::new();
    for i in 0..diets.height() {
        let (Some(d), Some(og), Some(code), Some(name), Some(item_code)) = (
            diet_names.get(i),
            output_groups.get(i),
            country_codes.get(i),
            countries.get(i),
            item_codes.get(i),
        ) else {
            return Err(DietError::InvalidData(format!(
                "diet row {i} has a null grouping column"
            )));
        };
        groups
            .entry((d.to_string(), og.to_string(), code, name.to_string()))
            .or_default()
            .push((item_code, quants.get(i).unwrap_or(0.0)));
    }
    Ok(groups)
}

/// Bootstrap diet footprint centiles per (country, diet, output group,
/// footprint type).
///
/// One RNG seeded from the run parameters drives all draws; with the same
/// seed and the same inputs the output is bit-identical across runs. Types
/// are simulated one at a time to bound the size of the live trial matrix.
pub fn bootstrap_diet_footprints(
    diets: &DataFrame,
    distributions: &DataFrame,
    items: &DataFrame,
    classes: &FootprintClassTable,
    params: &RunParams,
) -> Result<DataFrame, DietError> {
    let norm = gather_normalized(distributions, items, classes)?;
    let groups = read_diet_groups(diets)?;
    let n_trials = params.n_trials;
    let mut rng = StdRng::seed_from_u64(params.random_seed);

    // Footprint types in pinned order, items ascending
    let mut fp_types: Vec<&str> = norm
        .iter()
        .map(|r| r.footprint_type.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    fp_types.sort_by(|a, b| {
        classes
            .sort_order(a)
            .cmp(&classes.sort_order(b))
            .then_with(|| a.cmp(b))
    });
    let item_codes: BTreeSet<i64> = norm.iter().map(|r| r.item_code).collect();

    let mut out_codes: Vec<i64> = Vec::new();
    let mut out_diets: Vec<String> = Vec::new();
    let mut out_groups: Vec<String> = Vec::new();
    let mut out_countries: Vec<String> = Vec::new();
    let mut out_types: Vec<String> = Vec::new();
    let mut out_c25: Vec<f64> = Vec::new();
    let mut out_c50: Vec<f64> = Vec::new();
    let mut out_c75: Vec<f64> = Vec::new();

    for fp_type in fp_types {
        info!(footprint_type = fp_type, n_trials, "bootstrapping");
        let mut trials: HashMap<i64, Vec<f64>> = HashMap::new();
        for &item_code in &item_codes {
            let rows: Vec<&NormRow> = norm
                .iter()
                .filter(|r| r.item_code == item_code && r.footprint_type == fp_type)
                .collect();
            if rows.is_empty() {
                continue;
            }
            let index = WeightedIndex::new(rows.iter().map(|r| r.weight)).map_err(|e| {
                DietError::InvalidData(format!(
                    "invalid distribution weights for item {item_code}, type {fp_type}: {e}"
                ))
            })?;
            let draws: Vec<f64> = (0..n_trials)
                .map(|_| rows[index.sample(&mut rng)].footprint)
                .collect();
            trials.insert(item_code, draws);
        }

        for ((diet_name, output_group, code, name), members) in &groups {
            let simulated: Vec<(&Vec<f64>, f64)> = members
                .iter()
                .filter_map(|(item_code, kg)| trials.get(item_code).map(|t| (t, *kg)))
                .collect();
            // Groups with no simulated items are dropped for this type
            if simulated.is_empty() {
                continue;
            }
            let mut totals = vec![0.0f64; n_trials];
            for (draws, kg) in simulated {
                for (total, draw) in totals.iter_mut().zip(draws) {
                    *total += kg * draw;
                }
            }
            totals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            out_codes.push(*code);
            out_diets.push(diet_name.clone());
            out_groups.push(output_group.clone());
            out_countries.push(name.clone());
            out_types.push(fp_type.to_string());
            out_c25.push(stats::percentile(&totals, 25.0));
            out_c50.push(stats::percentile(&totals, 50.0));
            out_c75.push(stats::percentile(&totals, 75.0));
        }
    }

    let df = DataFrame::new(vec![
        Column::new(country::COUNTRY_CODE.into(), &out_codes),
        Column::new(diet::DIET.into(), &out_diets),
        Column::new(item::OUTPUT_GROUP.into(), &out_groups),
        Column::new(country::COUNTRY.into(), &out_countries),
        Column::new(footprint::FOOTPRINT_TYPE.into(), &out_types),
        Column::new(bootstrap::CENTILE_25.into(), &out_c25),
        Column::new(bootstrap::CENTILE_50.into(), &out_c50),
        Column::new(bootstrap::CENTILE_75.into(), &out_c75),
    ])?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FootprintCategory, FootprintClass};
    use approx::assert_relative_eq;

    fn classes_fixture() -> FootprintClassTable {
        let mut classes = FootprintClassTable::new();
        classes.insert(
            "kg_co2e_total",
            FootprintClass {
                category: FootprintCategory::Ghg,
                bootstrap_by_group: true,
                sort_order: 1,
                ..Default::default()
            },
        );
        classes.insert(
            "l_water",
            FootprintClass {
                category: FootprintCategory::Other,
                bootstrap_by_group: false,
                sort_order: 2,
                ..Default::default()
            },
        );
        classes
    }

    fn items_fixture() -> DataFrame {
        df!(
            item::ITEM_CODE => [1i64, 2, 3, 4],
            item::ITEM => ["Wheat", "Rice", "Beef", "Apples"],
            item::INCLUDE_IN_MODEL => ["yes", "yes", "yes", "yes"],
            item::TYPE => ["plant", "plant", "t_animal", "plant"],
            item::BOOTSTRAP_SUBGROUP => [Some("grains"), Some("grains"), None, Some("fruit")],
            item::GROUP => ["plant foods", "plant foods", "animal foods", "plant foods"],
            item::OUTPUT_GROUP => ["Grains", "Grains", "Meat", "Fruit"],
        )
        .unwrap()
    }

    fn distributions_fixture() -> DataFrame {
        // Item-level rows for wheat, a subgroup-level row for grains, and a
        // group-level row for plant foods. Output groups recorded per row.
        df!(
            item::ITEM_CODE => [Some(1i64), Some(1), Some(1), None, None],
            item::BOOTSTRAP_SUBGROUP => [None, None, None, Some("grains"), None],
            item::GROUP => [None, None, None, None, Some("plant foods")],
            item::OUTPUT_GROUP => ["Grains", "Grains", "Grains", "Grains", "Fruit"],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_total"; 5],
            footprint::FOOTPRINT => [1.0, 2.0, 3.0, 5.0, 7.0],
            bootstrap::WEIGHT => [0.2, 0.5, 0.3, 1.0, 1.0],
        )
        .unwrap()
    }

    fn diets_fixture() -> DataFrame {
        df!(
            country::COUNTRY_CODE => [10i64, 10, 10, 20],
            country::COUNTRY => ["Richland", "Richland", "Richland", "Poorland"],
            diet::DIET => ["baseline"; 4],
            item::OUTPUT_GROUP => ["Grains", "Grains", "Fruit", "Grains"],
            item::ITEM_CODE => [1i64, 2, 4, 1],
            diet::KG => [1.0, 0.0, 2.0, 10.0],
        )
        .unwrap()
    }

    fn params() -> RunParams {
        RunParams {
            n_trials: 10_000,
            random_seed: 3,
            ..Default::default()
        }
    }

    fn centiles(df: &DataFrame, code: i64, output_group: &str) -> Option<(f64, f64, f64)> {
        let codes = df.column(country::COUNTRY_CODE).unwrap().i64().unwrap();
        let groups = df.column(item::OUTPUT_GROUP).unwrap().str().unwrap();
        let c25 = df.column(bootstrap::CENTILE_25).unwrap().f64().unwrap();
        let c50 = df.column(bootstrap::CENTILE_50).unwrap().f64().unwrap();
        let c75 = df.column(bootstrap::CENTILE_75).unwrap().f64().unwrap();
        (0..df.height())
            .find(|&i| codes.get(i) == Some(code) && groups.get(i) == Some(output_group))
            .map(|i| {
                (
                    c25.get(i).unwrap(),
                    c50.get(i).unwrap(),
                    c75.get(i).unwrap(),
                )
            })
    }

    #[test]
    fn reproducible_with_fixed_seed() {
        let a = bootstrap_diet_footprints(
            &diets_fixture(),
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();
        let b = bootstrap_diet_footprints(
            &diets_fixture(),
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();
        assert!(a.equals(&b));
    }

    #[test]
    fn insensitive_to_distribution_load_order() {
        let reversed = distributions_fixture().reverse();
        let a = bootstrap_diet_footprints(
            &diets_fixture(),
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();
        let b = bootstrap_diet_footprints(
            &diets_fixture(),
            &reversed,
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();
        assert!(a.equals(&b));
    }

    #[test]
    fn centiles_converge_on_the_weighted_distribution() {
        let dm = bootstrap_diet_footprints(
            &diets_fixture(),
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();

        // Richland grains: wheat at 1 kg with values [1,2,3], weights
        // [.2,.5,.3]; rice contributes 0 kg. The cumulative weight passes
        // 0.5 inside the value 2, so the sample median is exactly 2.
        let (c25, c50, c75) = centiles(&dm, 10, "Grains").unwrap();
        assert_relative_eq!(c50, 2.0);
        assert!(c25 >= 1.0 && c75 <= 3.0);
        assert!(c25 <= c50 && c50 <= c75);

        // Scaling the diet scales the centiles linearly
        let (_, poor_c50, _) = centiles(&dm, 20, "Grains").unwrap();
        assert_relative_eq!(poor_c50, 20.0);
    }

    #[test]
    fn escalates_to_subgroup_only_when_flagged() {
        // Rice has no item-level rows; kg_co2e_total is flagged for group
        // bootstrapping so it picks up the grains subgroup distribution.
        let norm = normalized_distributions(
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        let codes = norm.column(item::ITEM_CODE).unwrap().i64().unwrap();
        let levels = norm
            .column(bootstrap::DISTRIBUTION_GROUP_LEVEL)
            .unwrap()
            .str()
            .unwrap();
        let level_of = |code: i64| {
            (0..norm.height())
                .find(|&i| codes.get(i) == Some(code))
                .map(|i| levels.get(i).unwrap().to_string())
        };
        assert_eq!(level_of(1).unwrap(), item::ITEM_CODE);
        assert_eq!(level_of(2).unwrap(), item::BOOTSTRAP_SUBGROUP);
        // Apples match at group level through the plant foods row
        assert_eq!(level_of(4).unwrap(), item::GROUP);

        // An unflagged type never escalates
        let water_only = df!(
            item::ITEM_CODE => [None::<i64>],
            item::BOOTSTRAP_SUBGROUP => [Some("grains")],
            item::GROUP => [None::<&str>],
            item::OUTPUT_GROUP => ["Grains"],
            footprint::FOOTPRINT_TYPE => ["l_water"],
            footprint::FOOTPRINT => [100.0],
            bootstrap::WEIGHT => [1.0],
        )
        .unwrap();
        let norm =
            normalized_distributions(&water_only, &items_fixture(), &classes_fixture()).unwrap();
        assert_eq!(norm.height(), 0);
    }

    #[test]
    fn output_group_validity_limits_group_matches() {
        // The plant foods group row is recorded under the Fruit output
        // group only, so grains items never see it even though their group
        // matches.
        let group_only = df!(
            item::ITEM_CODE => [None::<i64>],
            item::BOOTSTRAP_SUBGROUP => [None::<&str>],
            item::GROUP => [Some("plant foods")],
            item::OUTPUT_GROUP => ["Fruit"],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_total"],
            footprint::FOOTPRINT => [7.0],
            bootstrap::WEIGHT => [1.0],
        )
        .unwrap();
        let norm =
            normalized_distributions(&group_only, &items_fixture(), &classes_fixture()).unwrap();
        let codes: Vec<i64> = norm
            .column(item::ITEM_CODE)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(codes, vec![4]);
    }

    #[test]
    fn weights_normalize_per_item_and_type() {
        let norm = normalized_distributions(
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
        )
        .unwrap();
        let codes = norm.column(item::ITEM_CODE).unwrap().i64().unwrap();
        let weights = norm.column(bootstrap::WEIGHT).unwrap().f64().unwrap();
        let sum: f64 = (0..norm.height())
            .filter(|&i| codes.get(i) == Some(1))
            .map(|i| weights.get(i).unwrap())
            .sum();
        assert_relative_eq!(sum, 1.0);
    }

    #[test]
    fn zero_weight_sums_are_rejected() {
        let broken = df!(
            item::ITEM_CODE => [Some(1i64)],
            item::BOOTSTRAP_SUBGROUP => [None::<&str>],
            item::GROUP => [None::<&str>],
            item::OUTPUT_GROUP => ["Grains"],
            footprint::FOOTPRINT_TYPE => ["kg_co2e_total"],
            footprint::FOOTPRINT => [1.0],
            bootstrap::WEIGHT => [0.0],
        )
        .unwrap();
        assert!(matches!(
            normalized_distributions(&broken, &items_fixture(), &classes_fixture()),
            Err(DietError::InvalidData(_))
        ));
    }

    #[test]
    fn groups_without_simulated_items_are_dropped() {
        // Poorland consumes only beef, which never enters the simulation
        let diets = df!(
            country::COUNTRY_CODE => [10i64, 20],
            country::COUNTRY => ["Richland", "Poorland"],
            diet::DIET => ["baseline", "baseline"],
            item::OUTPUT_GROUP => ["Grains", "Meat"],
            item::ITEM_CODE => [1i64, 3],
            diet::KG => [1.0, 50.0],
        )
        .unwrap();
        let dm = bootstrap_diet_footprints(
            &diets,
            &distributions_fixture(),
            &items_fixture(),
            &classes_fixture(),
            &params(),
        )
        .unwrap();
        assert!(centiles(&dm, 10, "Grains").is_some());
        assert!(centiles(&dm, 20, "Meat").is_none());
    }
}
