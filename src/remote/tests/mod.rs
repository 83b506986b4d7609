//! Unit tests for the remote channels.
//!
//! Every session is driven through [`ScriptedRunner`](crate::test_support::ScriptedRunner);
//! a privileged command consumes three scripted responses (open, run, close).

mod path;
