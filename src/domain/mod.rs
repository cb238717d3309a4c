pub mod models;
pub mod polyvagal;
pub mod routine;
