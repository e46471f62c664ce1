use std::fmt;

use serde::{Deserialize, Serialize};

/// The three kinds of handle the backend distributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Pool,
    Container,
    Array,
}

impl HandleKind {
    /// Kind of handle a handle of this kind must be opened under, if any.
    pub fn parent(self) -> Option<HandleKind> {
        match self {
            Self::Pool => None,
            Self::Container => Some(Self::Pool),
            Self::Array => Some(Self::Container),
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool => f.write_str("pool"),
            Self::Container => f.write_str("container"),
            Self::Array => f.write_str("array"),
        }
    }
}

/// Opaque process-local handle.
///
/// Only meaningful to the engine instance that issued it. A cookie of zero is
/// the invalid handle; closing a handle resets the holder to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    kind: HandleKind,
    cookie: u64,
}

impl Handle {
    pub const fn new(kind: HandleKind, cookie: u64) -> Self {
        Self { kind, cookie }
    }

    pub const fn invalid(kind: HandleKind) -> Self {
        Self { kind, cookie: 0 }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn is_valid(&self) -> bool {
        self.cookie != 0
    }

    /// Take the handle, leaving the invalid handle in its place.
    pub fn take(&mut self) -> Handle {
        std::mem::replace(self, Self::invalid(self.kind))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{:#x})", self.kind, self.cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle() {
        let h = Handle::invalid(HandleKind::Array);
        assert!(!h.is_valid());
        assert_eq!(h.kind(), HandleKind::Array);
    }

    #[test]
    fn take_resets() {
        let mut h = Handle::new(HandleKind::Container, 42);
        let taken = h.take();
        assert_eq!(taken.cookie(), 42);
        assert!(!h.is_valid());
        assert_eq!(h.kind(), HandleKind::Container);
    }

    #[test]
    fn parents() {
        assert_eq!(HandleKind::Pool.parent(), None);
        assert_eq!(HandleKind::Container.parent(), Some(HandleKind::Pool));
        assert_eq!(HandleKind::Array.parent(), Some(HandleKind::Container));
    }

    #[test]
    fn debug_format() {
        let h = Handle::new(HandleKind::Pool, 0x10);
        assert_eq!(format!("{h:?}"), "Handle(pool:0x10)");
    }
}
