//! Veduta renders URLs and markup into PNG/PDF artifacts served over HTTP.
//!
//! Artifacts are named by self-describing encrypted tokens: the file name
//! carries everything needed to regenerate the file after it expires from
//! the ephemeral dump directory.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub mod util;
