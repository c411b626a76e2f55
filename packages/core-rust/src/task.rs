//! Task identity shared by the router and its observers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifier of one scheduled task, unique for the lifetime of one router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque reference to the context that owns a task (a plugin, a module).
///
/// Cheap to clone; compared by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskOwner(Arc<str>);

impl TaskOwner {
    /// Creates an owner reference with the given name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The owner's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_display() {
        assert_eq!(TaskId(42).to_string(), "task-42");
    }

    #[test]
    fn owners_compare_by_name() {
        let a = TaskOwner::new("economy");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a, TaskOwner::new("economy"));
        assert_ne!(a, TaskOwner::new("holograms"));
        assert_eq!(a.name(), "economy");
    }
}
