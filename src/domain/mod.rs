pub mod models;
pub mod reconcile;
pub mod token;
