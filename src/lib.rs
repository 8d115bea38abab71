//! bugsweep - LLM-powered repository bug sweep
//!
//! Pages a repository through a bounded analysis pipeline: materialize,
//! select and order files, slice one page, dispatch it to a model in
//! micro-batches, bisect whatever fails, and fold the outcome into a
//! cumulative session.

pub mod ai;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod pipeline;
pub mod repo;
pub mod selector;
pub mod server;
pub mod status;
