//! Tailing processor for paired `.header`/`.payload` shard logs.
//!
//! Producers append CSV records to a `.header` file and raw
//! `input||output` blobs to a matching `.payload` file inside a
//! date-partitioned directory. Each [`tailer`] follows one such pair,
//! joins header records to their payload regions, survives torn writes,
//! persists its progress through [`cursor`], and terminates at day
//! rollover. The [`supervisor`] discovers pairs and runs one tailer per
//! shard.

pub mod config;
pub mod cursor;
pub mod daypath;
pub mod header;
pub mod sink;
pub mod supervisor;
pub mod tailer;
