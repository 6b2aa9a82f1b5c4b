use crate::error::{Error, Result};
use crate::model::id::ResourceId;
use crate::solver::backend::{Constraint, SolverBackend, VarId};

struct Dimension {
    name: ResourceId,
    loads: Vec<VarId>,
    sizes: Vec<VarId>,
    bins: Vec<VarId>,
}

/// Collects one bin-packing declaration per resource dimension, then posts
/// them in one shot.
///
/// Per-VM sizes are fixed to their lower bound right before posting; a
/// dimension with no schedulable VM is skipped instead of being posted
/// against an empty set.
pub struct Packing {
    dims: Vec<Dimension>,
}

impl Packing {
    pub fn new() -> Self {
        Packing { dims: Vec::new() }
    }

    pub fn add_dim(&mut self, name: ResourceId, loads: Vec<VarId>, sizes: Vec<VarId>, bins: Vec<VarId>) {
        self.dims.push(Dimension { name, loads, sizes, bins });
    }

    pub fn commit(self, solver: &mut dyn SolverBackend) -> Result<()> {
        for dim in self.dims {
            if dim.bins.is_empty() {
                log::debug!("No schedulable VM: skipping the packing constraint for dimension '{}'", dim.name);
                continue;
            }
            let mut fixed = Vec::with_capacity(dim.sizes.len());
            for s in &dim.sizes {
                let lb = solver.lower_bound(*s);
                solver
                    .post(Constraint::EqConst(*s, lb))
                    .map_err(|e| Error::formulation(&dim.name, format!("unable to fix a VM size: {}", e)))?;
                fixed.push(lb);
            }
            solver
                .post(Constraint::Pack { loads: dim.loads, sizes: fixed, bins: dim.bins })
                .map_err(|e| Error::formulation(&dim.name, format!("unable to post the packing constraint: {}", e)))?;
        }
        Ok(())
    }
}

impl Default for Packing {
    fn default() -> Self {
        Packing::new()
    }
}
