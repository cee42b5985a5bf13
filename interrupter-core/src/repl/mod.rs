//! Console tooling shared by every front-end.
//!
//! The grammar lives in [`grammar`]; [`commands`] executes parsed lines
//! against a controller and renders the replies.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
