//! `assemblyfs` — a read-only FUSE filesystem over a faceted genomic
//! assembly catalog, with an on-demand, deduplicating download cache.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod fs;
pub mod resolver;
pub mod url_lookup;
