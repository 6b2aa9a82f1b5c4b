use crate::model::id::VmId;
use crate::solver::backend::VarId;

/// A VM's hosting interval on one node: the `[start, end)` moments plus the
/// variable choosing the hosting node (as a dense node index).
#[derive(Debug, Clone)]
pub struct Slice {
    pub vm: VmId,
    pub start: VarId,
    pub end: VarId,
    pub hoster: VarId,
}
