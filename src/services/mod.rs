pub mod catalog;
pub mod chain_tracker;
pub mod selection;
