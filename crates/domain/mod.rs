pub mod access_evaluation;
pub mod entities;
pub mod reconciliation;
pub mod repositories;
pub mod value_objects;
