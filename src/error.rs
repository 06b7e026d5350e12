use thiserror::Error;

#[derive(Error, Debug)]
pub enum WranglerError {
    #[error("Unmapped question code: {code}")]
    UnmappedQuestionCode { code: String },

    #[error("No translation for value {value} of field '{field}'{}", year_suffix(.year))]
    UnmappedValue {
        field: String,
        value: i64,
        year: Option<i32>,
    },

    #[error("Value {value} of field '{field}' exceeds the {year} topcode ceiling {ceiling}")]
    ValueOutOfRange {
        field: String,
        value: i64,
        ceiling: i64,
        year: i32,
    },

    #[error("Year {year} is outside the supported domain: {reason}")]
    YearOutOfDomain { year: i32, reason: String },

    #[error("Field '{field}' requires a survey year")]
    MissingYear { field: String },

    #[error("Misaligned mapping files: {0}")]
    MisalignedMappingFiles(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown cohort: {0}")]
    UnknownCohort(i32),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl WranglerError {
    /// Local failures that degrade a single value to unknown instead of
    /// aborting the cohort.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WranglerError::UnmappedValue { .. } | WranglerError::UnmappedQuestionCode { .. }
        )
    }

    /// Short stable label for metrics and run records
    pub fn kind(&self) -> &'static str {
        match self {
            WranglerError::UnmappedQuestionCode { .. } => "unmapped_question_code",
            WranglerError::UnmappedValue { .. } => "unmapped_value",
            WranglerError::ValueOutOfRange { .. } => "value_out_of_range",
            WranglerError::YearOutOfDomain { .. } => "year_out_of_domain",
            WranglerError::MissingYear { .. } => "missing_year",
            WranglerError::MisalignedMappingFiles(_) => "misaligned_mapping_files",
            WranglerError::MalformedInput(_) => "malformed_input",
            WranglerError::Config(_) => "config",
            WranglerError::UnknownCohort(_) => "unknown_cohort",
            WranglerError::Storage { .. } | WranglerError::Sqlite(_) => "storage",
            WranglerError::Io(_) => "io",
            WranglerError::Json(_) | WranglerError::Toml(_) => "deserialize",
            WranglerError::Regex(_) => "regex",
        }
    }
}

fn year_suffix(year: &Option<i32>) -> String {
    match year {
        Some(y) => format!(" in {}", y),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, WranglerError>;
