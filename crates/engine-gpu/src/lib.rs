#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Device side of the search pipeline.
//!
//! - `FrameResourceSet`: two frames of device buffers; one is filled while the
//!   host drains the other.
//! - `DevicePipeline`: the seam a device backend implements. `HostSievePipeline`
//!   runs the same three stages on the host.
//! - `GpuSieveAdapter`: a `Worker` that drives a pipeline and pushes its results
//!   to the shared `WorkQueue` as device work units.

pub mod adapter;
pub mod error;
pub mod frame;
pub mod pipeline;

pub use adapter::GpuSieveAdapter;
pub use error::DeviceError;
pub use frame::{FrameBuffers, FrameLayout, FrameResourceSet};
pub use pipeline::{DevicePipeline, FillOutcome, HostPipelineConfig, HostSievePipeline};
