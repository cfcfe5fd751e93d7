pub mod archive;
pub mod assign;
pub mod collect;
pub mod csv;
pub mod reports;
pub mod schedule;
