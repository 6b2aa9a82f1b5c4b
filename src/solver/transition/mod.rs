pub mod node;
pub mod vm;

pub use node::{BootableNode, NodeTransition, ShutdownableNode};
pub use vm::VmTransition;
