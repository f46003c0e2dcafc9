//! Small shared helpers.

pub mod naming;
