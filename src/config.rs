use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::error::{Result, WranglerError};
use crate::pipeline::processing::binning::Bin;
use crate::pipeline::processing::crosswalk::{Classification, SchemeBinding};
use crate::pipeline::processing::translate::TranslationPolicy;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "COHORT_WRANGLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reference: ReferencePaths,
    #[serde(default)]
    pub cohorts: Vec<CohortSource>,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub crosswalk: CrosswalkConfig,
    #[serde(default)]
    pub shock: ShockConfig,
    #[serde(default)]
    pub impute: ImputeConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Locations of the read-only reference documents
#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePaths {
    pub dictionary: PathBuf,
    pub economic_context: PathBuf,
    #[serde(default)]
    pub region_context: Option<PathBuf>,
    pub industry_crosswalk: PathBuf,
    pub occupation_crosswalk: PathBuf,
}

impl Default for ReferencePaths {
    fn default() -> Self {
        Self {
            dictionary: PathBuf::from("data/dictionary.json"),
            economic_context: PathBuf::from("data/years.json"),
            region_context: None,
            industry_crosswalk: PathBuf::from("data/industry_crosswalk.json"),
            occupation_crosswalk: PathBuf::from("data/occupation_crosswalk.json"),
        }
    }
}

/// Input files for one cohort
#[derive(Debug, Clone, Deserialize)]
pub struct CohortSource {
    pub year: i32,
    pub rnum_file: PathBuf,
    pub qname_file: PathBuf,
    pub responses_file: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub policy: TranslationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrosswalkConfig {
    #[serde(default = "default_scheme_bindings")]
    pub schemes: Vec<SchemeBinding>,
}

impl Default for CrosswalkConfig {
    fn default() -> Self {
        Self {
            schemes: default_scheme_bindings(),
        }
    }
}

/// The 1979 cohort switches from 1970 to 2000 census codes in 2002; the 1997
/// cohort is coded with ACS 2003 codes throughout.
fn default_scheme_bindings() -> Vec<SchemeBinding> {
    let mut schemes = Vec::new();
    for classification in [Classification::Industry, Classification::Occupation] {
        schemes.push(SchemeBinding {
            cohort: 1979,
            classification,
            column: "census_1970".to_string(),
            from_year: None,
            until_year: Some(2002),
        });
        schemes.push(SchemeBinding {
            cohort: 1979,
            classification,
            column: "census_2000".to_string(),
            from_year: Some(2002),
            until_year: None,
        });
        schemes.push(SchemeBinding {
            cohort: 1997,
            classification,
            column: "acs_2003".to_string(),
            from_year: None,
            until_year: None,
        });
    }
    schemes
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShockConfig {
    /// Distance in years between the two compared incomes
    #[serde(default = "default_horizon_years")]
    pub horizon_years: i32,
    /// Later income below `threshold_ratio * earlier` is a shock
    #[serde(default = "default_threshold_ratio")]
    pub threshold_ratio: f64,
    /// Exclusive upper bound of the anchor years examined
    #[serde(default = "default_shock_end_year")]
    pub end_year: i32,
}

fn default_horizon_years() -> i32 {
    2
}

fn default_threshold_ratio() -> f64 {
    0.8
}

fn default_shock_end_year() -> i32 {
    constants::DEFAULT_SHOCK_END_YEAR
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self {
            horizon_years: default_horizon_years(),
            threshold_ratio: default_threshold_ratio(),
            end_year: default_shock_end_year(),
        }
    }
}

/// A quasi-static field filled forward from the respondent's last valid value
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CarryForwardField {
    pub field: String,
    /// Used before any valid value has been seen
    #[serde(default)]
    pub default: Option<i64>,
}

impl CarryForwardField {
    pub fn new(field: &str, default: Option<i64>) -> Self {
        Self {
            field: field.to_string(),
            default,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImputeConfig {
    #[serde(default = "default_carry_forward")]
    pub carry_forward: Vec<CarryForwardField>,
    #[serde(default = "default_outlier_std_devs")]
    pub outlier_std_devs: f64,
    #[serde(default = "default_income_change_cap")]
    pub income_change_cap: f64,
    #[serde(default = "default_grade_bins")]
    pub grade_bins: Vec<Bin>,
}

fn default_carry_forward() -> Vec<CarryForwardField> {
    vec![
        CarryForwardField::new(constants::NUMBER_OF_KIDS, Some(0)),
        CarryForwardField::new(constants::FAMILY_SIZE, Some(1)),
        CarryForwardField::new(constants::MARITAL_STATUS, None),
        CarryForwardField::new(constants::WORK_LIMITED_KIND, None),
        CarryForwardField::new(constants::WORK_LIMITED_AMOUNT, None),
        CarryForwardField::new(constants::HIGHEST_GRADE, None),
        CarryForwardField::new(constants::URBAN_OR_RURAL, None),
        CarryForwardField::new(constants::REGION, None),
        CarryForwardField::new(constants::REGIONAL_UNEMPLOYMENT, None),
    ]
}

fn default_outlier_std_devs() -> f64 {
    3.0
}

fn default_income_change_cap() -> f64 {
    5.0
}

fn default_grade_bins() -> Vec<Bin> {
    vec![
        Bin::new(0, 6, "0-6th"),
        Bin::new(7, 12, "7-12th"),
        Bin::new(13, 99_999, "13th and above"),
    ]
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            carry_forward: default_carry_forward(),
            outlier_std_devs: default_outlier_std_devs(),
            income_change_cap: default_income_change_cap(),
            grade_bins: default_grade_bins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Keep rows whose shock label is unknown
    #[serde(default = "default_true")]
    pub include_unlabeled: bool,
    /// Economic indicators attach from `year - economic_lag_years`
    #[serde(default = "default_economic_lag")]
    pub economic_lag_years: i32,
    /// Code fields one-hot encoded over their observed values
    #[serde(default = "default_one_hot_fields")]
    pub one_hot_fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_economic_lag() -> i32 {
    1
}

fn default_one_hot_fields() -> Vec<String> {
    vec![
        constants::RACE.to_string(),
        constants::SEX.to_string(),
        constants::MARITAL_STATUS.to_string(),
    ]
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            include_unlabeled: true,
            economic_lag_years: default_economic_lag(),
            one_hot_fields: default_one_hot_fields(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/wrangler.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Config {
    /// Loads from `$COHORT_WRANGLER_CONFIG`, falling back to `config.toml`.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(config_path)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = fs::read_to_string(path).map_err(|e| {
            WranglerError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&config_content)?;
        config.resolve_relative_to(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn cohort_source(&self, year: i32) -> Result<&CohortSource> {
        self.cohorts
            .iter()
            .find(|c| c.year == year)
            .ok_or(WranglerError::UnknownCohort(year))
    }

    /// Relative paths in the file are taken relative to the file itself.
    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.reference.dictionary);
        resolve(&mut self.reference.economic_context);
        resolve(&mut self.reference.industry_crosswalk);
        resolve(&mut self.reference.occupation_crosswalk);
        if let Some(p) = self.reference.region_context.as_mut() {
            resolve(p);
        }
        for cohort in &mut self.cohorts {
            resolve(&mut cohort.rnum_file);
            resolve(&mut cohort.qname_file);
            resolve(&mut cohort.responses_file);
        }
        resolve(&mut self.storage.sqlite_path);
    }
}
