pub mod id;
pub mod mapping;
pub mod model;
pub mod resource;

pub use id::{NodeId, ResourceId, VmId};
pub use mapping::{Mapping, NodeState, VmState};
pub use model::Model;
pub use resource::ShareableResource;
