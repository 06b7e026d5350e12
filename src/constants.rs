/// Canonical field names shared across cohorts.
/// These are the names the dictionary translates raw question codes into.

// Dynamic (per-year) fields the engine itself reads or writes
pub const ADJUSTED_INCOME: &str = "adjusted_income";
pub const INDUSTRY: &str = "industry";
pub const OCCUPATION: &str = "occupation";
pub const HIGHEST_GRADE: &str = "highest_grade";
pub const HOURS_WORKED_LAST_YEAR: &str = "hours_worked_last_year";
pub const WEEKS_WORKED_LAST_YEAR: &str = "weeks_worked_last_year";
pub const NUMBER_OF_KIDS: &str = "number_of_kids";
pub const FAMILY_SIZE: &str = "family_size";
pub const MARITAL_STATUS: &str = "marital_status";
pub const WORK_LIMITED_KIND: &str = "work_limited_kind";
pub const WORK_LIMITED_AMOUNT: &str = "work_limited_amount";
pub const URBAN_OR_RURAL: &str = "urban_or_rural";
pub const REGION: &str = "region";
pub const REGIONAL_UNEMPLOYMENT: &str = "regional_unemployment";

// Static respondent attributes
pub const RACE: &str = "race";
pub const SEX: &str = "sex";

// Derived output columns
pub const RESPONDENT_ID: &str = "respondent_id";
pub const YEAR: &str = "year";
pub const SHOCK: &str = "shock";
pub const PRIOR_INCOME: &str = "prior_income";
pub const INCOME_CHANGE: &str = "income_change";
pub const UNEMPLOYMENT: &str = "unemployment";
pub const GDP_GROWTH: &str = "gdp_growth";
pub const INFLATION: &str = "inflation";
pub const HIGHEST_GRADE_BINNED: &str = "highest_grade_binned";

/// Year marker used by constructed variables, whose real year is encoded in
/// the question code suffix.
pub const CONSTRUCTED_YEAR_MARKER: &str = "XRND";

/// Rnum of the respondent case id column in a wide responses file.
pub const CASE_ID_RNUM: &str = "R0000100";

/// Text written for incomes suppressed at the topcode ceiling.
pub const TOPCODE_MARKER: &str = "topcode";

/// Suffix of the one-hot column for values that fall in no bin.
pub const UNKNOWN_BIN: &str = "unknown";

/// Default last year (exclusive) examined by the shock labeler.
pub const DEFAULT_SHOCK_END_YEAR: i32 = 2018;
