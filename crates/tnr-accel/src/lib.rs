#![doc = include_str!("../README.md")]

pub mod context;
pub mod convert;
pub mod image;
pub mod stream;
pub mod tnr;

pub use context::{Device, DeviceBuilder, FaultPoint, LedgerSnapshot, OpKind, ResourceKind};
pub use convert::submit_convert_image_format;
pub use image::{Image, ImageReadGuard};
pub use stream::Stream;
pub use tnr::{TemporalNoiseReduction, TnrParams, TnrPreset, submit_temporal_noise_reduction};
