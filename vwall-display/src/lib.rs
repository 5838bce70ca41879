//! # vwall-display
//!
//! Display node for the video wall: configuration, framebuffer output and
//! the service that renders one tile of the head's stream.

pub mod config;
pub mod service;
pub mod surface;
