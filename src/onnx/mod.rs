//! Export of network layers as ONNX-style operator nodes
//!
//! Covers convolution, pooling, batch normalization and ReLU. Nodes are
//! plain records; serializing a real ONNX model is out of scope.

mod compare;
mod export;
mod node;

pub use compare::*;
pub use export::*;
pub use node::*;
