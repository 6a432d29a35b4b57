//! File-operation engine behind the pathwright terminal file manager.
//!
//! The engine copies, moves and removes file trees on a background worker
//! while the terminal UI keeps drawing. Conflicting destination entries are
//! settled through a [`prompt::Prompter`], which the UI answers from its own
//! event loop.

pub mod ops;
pub mod prompt;
pub mod scheduler;
