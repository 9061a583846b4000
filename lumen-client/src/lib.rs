//! # lumen-client
//!
//! Headless front end for the lumen pipeline. Host requests arrive as
//! JSON lines on stdin and replies leave on stdout; video comes from a
//! recorded Annex-B stream and is decoded and presented by software
//! stand-ins for the platform decoder and surface.

pub mod config;
pub mod headless;
pub mod replay;
pub mod stdio;
