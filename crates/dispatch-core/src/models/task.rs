/// Position of a task within one task group run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GroupTaskId(pub usize);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OperationState {
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

