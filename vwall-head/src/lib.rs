//! # vwall-head
//!
//! Head process for the video wall: configuration, frame sources and the
//! service that runs a streaming session.

pub mod config;
pub mod service;
pub mod source;
