pub mod application;
pub mod batch;
pub mod cache;
pub mod cleanup;
pub mod commands;
pub mod error;
pub mod install;
pub mod link;
pub mod resolve;
pub mod runtime;
pub mod setup;
pub mod spec;
pub mod tool;
