use std::fmt;

/// Process-local identity of a live application object.
///
/// The application allocates these; the engine only ever compares and hashes
/// them, so two `InstanceId`s name the same object exactly when they are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance#{}", self.0)
    }
}
