//! Git integration for smilebin.
//!
//! History is read by spawning the `git` executable (`process`, `history`);
//! repository discovery uses `git2` inside a blocking task (`repository`).
pub mod history;
pub mod process;
pub mod repository;
pub mod types;
