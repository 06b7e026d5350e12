use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::{Result, WranglerError};
use crate::pipeline::processing::crosswalk::{Classification, CrosswalkSet, CrosswalkTable};
use crate::pipeline::processing::dictionary::FieldDictionary;
use crate::pipeline::processing::inflation::InflationAdjuster;

/// Economic indicators for one calendar year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearContext {
    pub year: i32,
    pub unemployment: f64,
    pub gdp_growth: f64,
    /// Annual inflation as a fraction (0.03 = 3%)
    pub inflation: f64,
}

impl YearContext {
    pub fn new(year: i32, unemployment: f64, gdp_growth: f64, inflation: f64) -> Self {
        Self {
            year,
            unemployment,
            gdp_growth,
            inflation,
        }
    }
}

/// Year-keyed economic reference data. The latest year is the inflation
/// reference year.
#[derive(Debug, Clone)]
pub struct EconomicContext {
    years: BTreeMap<i32, YearContext>,
}

impl EconomicContext {
    pub fn from_rows(rows: Vec<YearContext>) -> Result<Self> {
        let mut years = BTreeMap::new();
        for row in rows {
            if years.insert(row.year, row.clone()).is_some() {
                return Err(WranglerError::Config(format!(
                    "economic context lists year {} twice",
                    row.year
                )));
            }
        }
        if years.is_empty() {
            return Err(WranglerError::Config("economic context is empty".to_string()));
        }
        Ok(Self { years })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let rows: Vec<YearContext> = serde_json::from_str(&content)?;
        Self::from_rows(rows)
    }

    pub fn get(&self, year: i32) -> Option<&YearContext> {
        self.years.get(&year)
    }

    pub fn iter(&self) -> impl Iterator<Item = &YearContext> {
        self.years.values()
    }

    pub fn first_year(&self) -> i32 {
        self.years.keys().next().copied().unwrap_or_default()
    }

    pub fn reference_year(&self) -> i32 {
        self.years.keys().next_back().copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionYear {
    pub year: i32,
    pub region: i64,
    pub regional_unemployment: f64,
}

/// Optional (region, year) unemployment rates
#[derive(Debug, Clone, Default)]
pub struct RegionContext {
    rates: HashMap<(i64, i32), f64>,
}

impl RegionContext {
    pub fn from_rows(rows: Vec<RegionYear>) -> Self {
        Self {
            rates: rows
                .into_iter()
                .map(|r| ((r.region, r.year), r.regional_unemployment))
                .collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let rows: Vec<RegionYear> = serde_json::from_str(&content)?;
        Ok(Self::from_rows(rows))
    }

    pub fn unemployment(&self, region: i64, year: i32) -> Option<f64> {
        self.rates.get(&(region, year)).copied()
    }
}

/// Read-only reference tables for one run, loaded once and shared by every
/// cohort pipeline.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub dictionary: FieldDictionary,
    pub crosswalks: CrosswalkSet,
    pub economy: EconomicContext,
    pub regions: Option<RegionContext>,
}

impl ReferenceData {
    pub fn load(config: &Config) -> Result<Self> {
        let paths = &config.reference;
        let economy = EconomicContext::load(&paths.economic_context)?;
        let adjuster = Arc::new(InflationAdjuster::from_context(&economy));

        let dictionary_json = fs::read_to_string(&paths.dictionary)?;
        let dictionary = FieldDictionary::from_json_str(&dictionary_json, adjuster)?;

        let crosswalks = CrosswalkSet::new(
            CrosswalkTable::load(Classification::Industry, &paths.industry_crosswalk)?,
            CrosswalkTable::load(Classification::Occupation, &paths.occupation_crosswalk)?,
            config.crosswalk.schemes.clone(),
        )?;

        let regions = match &paths.region_context {
            Some(path) => Some(RegionContext::load(path)?),
            None => None,
        };

        info!(
            cohorts = dictionary.cohort_years().len(),
            first_year = economy.first_year(),
            reference_year = economy.reference_year(),
            regional = regions.is_some(),
            "Loaded reference data"
        );

        Ok(Self {
            dictionary,
            crosswalks,
            economy,
            regions,
        })
    }
}
