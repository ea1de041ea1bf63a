/// Column-name constants for the diet-footprints schema.
/// Single source of truth - these names are the wire format between stages.

// ── Country reference columns ───────────────────────────────────────────────
pub mod country {
    pub const COUNTRY_CODE: &str = "country_code";
    pub const COUNTRY: &str = "country";
    pub const REGION: &str = "region";
    pub const INCOME_CLASS: &str = "income_class";
    pub const OECD: &str = "oecd";
    pub const FOOD_LOSS_REGION: &str = "food_loss_region";
    pub const POPULATION: &str = "population";
}

// ── Item reference columns ──────────────────────────────────────────────────
pub mod item {
    pub const ITEM_CODE: &str = "fbs_item_code";
    pub const ITEM: &str = "fbs_item";
    pub const OUTPUT_GROUP: &str = "output_group";
    pub const TYPE: &str = "type";
    pub const INCLUDE_IN_MODEL: &str = "include_in_model";
    pub const BOOTSTRAP_SUBGROUP: &str = "bootstrap_subgroup";
    pub const GROUP: &str = "fbs_group";
    pub const FOOD_LOSS_GROUP: &str = "food_loss_group";
    pub const PCT_UNPROCESSED: &str = "%_unproc";

    /// Values of `include_in_model`.
    pub const INCLUDE_YES: &str = "yes";
    pub const INCLUDE_NO: &str = "no";
    pub const INCLUDE_SPECIAL: &str = "special";
}

// ── Raw supply (food balance sheet) columns ─────────────────────────────────
pub mod supply {
    pub const IMPORTS_1000_MT: &str = "imports_1000_mt";
    pub const DOMESTIC_SUPPLY_1000_MT: &str = "domestic_supply_1000_mt";
    pub const SUPPLY_KG: &str = "supply_kg/cap/yr";
    pub const SUPPLY_KCAL: &str = "supply_kcal/cap/day";
    pub const SUPPLY_PROTEIN: &str = "supply_g_pro/cap/day";
}

// ── Loss-rate parameter columns ─────────────────────────────────────────────
pub mod losses {
    pub const POSTHARVEST: &str = "loss_%_postharvest";
    pub const MILLING: &str = "loss_%_milling";
    pub const PROCESSING: &str = "loss_%_proc";
    pub const DIST_PROC: &str = "loss_%_dist_proc";
    pub const DIST_UNPROC: &str = "loss_%_dist_unproc";
    pub const CONS_PROC: &str = "loss_%_cons_proc";
    pub const CONS_UNPROC: &str = "loss_%_cons_unproc";
}

// ── Diet record columns (identical schema for every diet scenario) ──────────
pub mod diet {
    pub const DIET: &str = "diet";
    pub const SCALING_METHOD: &str = "scaling_method";
    pub const PCT_IMPORTED: &str = "%_imported";
    pub const PCT_AFTER_LOSSES: &str = "%_after_losses";
    pub const PCT_AFTER_LOSSES_TO_HOME: &str = "%_after_losses_postharvest_to_home";
    pub const KG: &str = "kg/cap/yr";
    pub const KCAL: &str = "kcal/cap/day";
    pub const PROTEIN: &str = "g_pro/cap/day";
    pub const B12: &str = "mcg_b12/cap/day";
    pub const LOSS_ADJ_KG: &str = "loss_adj_kg/cap/yr";
    pub const LOSS_ADJ_KCAL: &str = "loss_adj_kcal/cap/day";
    pub const LOSS_ADJ_PROTEIN: &str = "loss_adj_g_pro/cap/day";
    pub const LOSS_ADJ_B12: &str = "loss_adj_mcg_b12/cap/day";

    pub const BASELINE: &str = "baseline";
}

// ── Trade matrix columns ────────────────────────────────────────────────────
pub mod trade {
    pub const COO_CODE: &str = "coo_code";
    pub const COO: &str = "coo";
    pub const IMPORTS_MT: &str = "imports_mt/yr";
    pub const SUM_IMPORTS_MT: &str = "sum_imports_mt/yr";
}

// ── Origin allocation columns ───────────────────────────────────────────────
pub mod origin {
    pub const PCT_FROM_COO: &str = "%_from_coo";
    pub const ORIGIN: &str = "origin";
    pub const KG_BY_COO: &str = "kg/cap/yr_by_coo";
    pub const KCAL_BY_COO: &str = "loss_adj_kcal/cap/day_by_coo";

    pub const DOMESTIC: &str = "domestic";
    pub const IMPORTED: &str = "imported";

    /// Residual bucket for imports with no trade-matrix coverage.
    pub const WORLD: &str = "World";
    pub const WORLD_CODE: i64 = 0;
}

// ── Footprint columns ───────────────────────────────────────────────────────
pub mod footprint {
    pub const FOOTPRINT_TYPE: &str = "footprint_type";
    pub const FOOTPRINT: &str = "footprint";
    pub const MT_PRODUCTION: &str = "mt_production";
    pub const GEOGRAPHIC_RESOLUTION: &str = "geographic_resolution";
    pub const ITEM_FOOTPRINT_PER_KG: &str = "item_footprint_per_kg";
    pub const DIET_FOOTPRINT: &str = "diet_footprint";
    pub const DIET_FOOTPRINT_WHOLE_POP: &str = "diet_footprint_whole_pop";

    /// Combined footprint-type names produced by `combine_footprint_types`.
    pub const KG_CO2E_TOTAL: &str = "kg_co2e_total";
    pub const MG_ABX_TOTAL: &str = "mg_abx_total";
}

// ── Geographic resolution values ────────────────────────────────────────────
pub mod resolution {
    pub const COUNTRY: &str = "country";
    pub const REGION: &str = "region";
    pub const WORLD: &str = "world";
    /// Combined totals may span source rows at more than one resolution.
    pub const GROUPED: &str = "grouped_data";
}

// ── Extraction rate columns ─────────────────────────────────────────────────
pub mod extraction {
    pub const FAO_ITEM_CODE: &str = "fao_item_code";
    pub const EXTR_RATE: &str = "extr_rate_mt/mt";
    pub const EXTR_RATE_WORLD: &str = "extr_rate_world_mt/mt";
}

// ── Target (reference-nutrition) diet columns ───────────────────────────────
pub mod target {
    pub const TARGET_ITEM: &str = "target_item";
    pub const TARGET_G: &str = "target_g/cap/day";
    pub const TARGET_KCAL: &str = "target_kcal/cap/day";
}

// ── Bootstrap columns ───────────────────────────────────────────────────────
pub mod bootstrap {
    pub const WEIGHT: &str = "weight";
    pub const CENTILE_25: &str = "centile_25";
    pub const CENTILE_50: &str = "centile_50";
    pub const CENTILE_75: &str = "centile_75";
    pub const DISTRIBUTION_GROUP_LEVEL: &str = "distribution_group_level";
}
