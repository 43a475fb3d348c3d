//! Reference integrity for interlinked scene projects.
//!
//! Scene documents reference images and other scene documents ("libraries")
//! by stored paths, usually relative to the document itself. This crate finds
//! references that no longer resolve, previews and executes moves so that every
//! reference still resolves afterwards, and relinks broken references to exact or
//! similar files. Documents are read and written through a [`engine::DocumentEngine`].

pub mod broken;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hasher;
pub mod paths;
pub mod planner;
pub mod protocol;
pub mod references;
pub mod relink;
pub mod scanner;
pub mod similarity;
pub mod types;

pub use error::Error;
