//! A simple Telegram bot which sends and receives messages.
//!
//! [`tg::Client`] wraps the individual Bot API calls; [`tg::Bot`] long-polls
//! for updates and hands each message to a handler.

pub mod tg;
