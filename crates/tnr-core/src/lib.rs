#![doc = include_str!("../README.md")]

pub mod backend;
pub mod error;
pub mod frame_traits;
pub mod types;
