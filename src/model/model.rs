use serde::Serialize;
use std::collections::HashMap;

use crate::model::id::ResourceId;
use crate::model::mapping::Mapping;
use crate::model::resource::ShareableResource;

/// An infrastructure snapshot: the placement [`Mapping`] plus the attached
/// resource dimensions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Model {
    mapping: Mapping,
    resources: HashMap<ResourceId, ShareableResource>,
}

impl Model {
    pub fn new(mapping: Mapping) -> Self {
        Model { mapping, resources: HashMap::new() }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.mapping
    }

    /// Attaches a resource dimension.
    ///
    /// # Returns
    /// `false` if a dimension with the same id is already attached; the
    /// existing view is kept.
    pub fn attach(&mut self, rc: ShareableResource) -> bool {
        if self.resources.contains_key(rc.id()) {
            log::warn!("A resource dimension '{}' is already attached", rc.id());
            return false;
        }
        self.resources.insert(rc.id().clone(), rc);
        true
    }

    pub fn detach(&mut self, id: &ResourceId) -> Option<ShareableResource> {
        self.resources.remove(id)
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&ShareableResource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &ResourceId) -> Option<&mut ShareableResource> {
        self.resources.get_mut(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ShareableResource> {
        self.resources.values()
    }
}
