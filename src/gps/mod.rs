// src/gps/mod.rs
//! Position fixes and the receivers that produce them

pub mod data;
pub mod gpsd;
pub mod nmea;
pub mod replay;

pub use data::{Fix, Gate};
