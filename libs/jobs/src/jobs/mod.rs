//! Job implementations hosted by the worker pool

pub mod export;
