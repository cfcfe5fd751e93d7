#[cfg(test)]
pub mod memory;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::model::{
    FeeComponent, FeeStructure, NewAssignment, NewObligation, ObligationView, PaymentUpdate,
    Student,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("obligation {id} was modified concurrently (expected version {expected})")]
    Conflict { id: String, expected: i64 },

    #[error("duplicate {entity}")]
    Duplicate { entity: &'static str },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Duplicate { .. } => "duplicate",
            StoreError::Sqlite(_) | StoreError::Unavailable(_) => "db_query_failed",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct ObligationQuery {
    pub student_id: Option<String>,
    pub paid_only: bool,
}

pub trait FeeStore {
    fn student(&self, id: &str) -> StoreResult<Option<Student>>;

    fn students_in_program(&self, university_id: &str, course_id: &str)
        -> StoreResult<Vec<Student>>;

    fn fee_structure(&self, id: &str) -> StoreResult<Option<FeeStructure>>;

    fn active_structures_for_program(
        &self,
        university_id: &str,
        course_id: &str,
    ) -> StoreResult<Vec<FeeStructure>>;

    fn components(&self, fee_structure_id: &str) -> StoreResult<Vec<FeeComponent>>;

    fn assignment_exists(&self, student_id: &str, fee_structure_id: &str) -> StoreResult<bool>;

    /// Writes the assignment row and all of its obligations as one unit.
    /// Returns the new assignment id; fails with `Duplicate` if the pair is
    /// already assigned.
    fn assign_with_obligations(
        &self,
        assignment: &NewAssignment,
        obligations: &[NewObligation],
    ) -> StoreResult<String>;

    fn obligation(&self, id: &str) -> StoreResult<Option<ObligationView>>;

    /// Applies `update` only if the row is still at `expected_version`.
    /// Returns the new version.
    fn record_payment(
        &self,
        id: &str,
        update: &PaymentUpdate,
        expected_version: i64,
    ) -> StoreResult<i64>;

    fn obligations(&self, query: &ObligationQuery) -> StoreResult<Vec<ObligationView>>;
}
