//! Content selection and practice-session tracking for SoMi body-based
//! practice videos.
//!
//! The engine picks the next block from a user's polyvagal state and
//! embodiment score, expands named routines, and records check-ins and
//! completed blocks into per-device chains. Storage sits behind the traits
//! in [`db`]; [`web`] exposes the engine over HTTP.

pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod services;
pub mod state;
pub mod web;
