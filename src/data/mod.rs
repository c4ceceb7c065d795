//! Database models and queries for the score database.
//!
//! The schema itself (tables `charts`, `songs`, `scores`, the ranked view
//! `scores_with_rank` and the `refresh_scores_with_rank()` function) is
//! provisioned out-of-band; this crate only reads charts/songs and upserts
//! scores.

pub mod charts;
pub mod models;
pub mod scores;
