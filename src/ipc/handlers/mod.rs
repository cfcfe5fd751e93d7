pub mod archive;
pub mod catalog;
pub mod collections;
pub mod core;
pub mod fee_structures;
pub mod fees;
pub mod registry;
pub mod reports;
pub mod setup;
pub mod students;
