//! Job implementations and the compute-kernel boundary they run on.

pub mod algorithm;
pub mod kernel;

pub use algorithm::{AlgorithmJob, AlgorithmOutput};
pub use kernel::{CommandKernel, FnKernel, Kernel, KernelCallbacks};
