mod batch;
mod elementwise;
mod matmul;

pub use elementwise::*;
