//! Error types for wayfare-core.

use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Which of the two session tables an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Trips,
    Meals,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trips => f.write_str("trips"),
            Self::Meals => f.write_str("meals"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A required column is absent from an uploaded table.
    #[error("{table} table is missing required column '{column}'")]
    Schema { table: Table, column: String },

    /// A new or edited row breaks a record invariant and was not applied.
    #[error("{0}")]
    Validation(String),

    #[error("Trip {0} not found")]
    TripNotFound(i64),

    #[error("Meal {0} not found")]
    MealNotFound(i64),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for the not-found variants, so front ends can map them to "no such record".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TripNotFound(_) | Self::MealNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_table_and_column() {
        let err = Error::Schema {
            table: Table::Meals,
            column: "cost_usd".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "meals table is missing required column 'cost_usd'"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::TripNotFound(3).is_not_found());
        assert!(Error::MealNotFound(3).is_not_found());
        assert!(!Error::validation("nope").is_not_found());
    }
}
