use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Stable identity of an execution context. Used for diagnostics only.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextLabel(Arc<str>);

impl ContextLabel {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(Arc::from(label.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContextLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for ContextLabel {
    fn from(label: String) -> Self {
        Self(Arc::from(label))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConcurrencyMode {
    Serial,
    Concurrent,
}
