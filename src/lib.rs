//! Mail every new item of a set of RSS/Atom feeds exactly once.
//!
//! A sync run fetches the subscribed feeds in parallel, then delivers each
//! item not yet recorded in the [`storage::Database`] through a
//! [`notify::Notifier`], recording it only after the send succeeds.

pub mod config;
pub mod feed;
pub mod notify;
pub mod storage;
pub mod sync;
