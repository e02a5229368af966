//! Process-unique identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next identifier. Identifiers are never reused.
            pub fn next() -> Self {
                static NEXT: AtomicU64 = AtomicU64::new(1);
                Self(NEXT.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw numeric value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifies one loaded plugin instance. Reloading a plugin yields a new id.
    PluginId,
    "plugin"
);

counter_id!(
    /// Identifies one scheduler task.
    TaskId,
    "task"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = PluginId::next();
        let b = PluginId::next();
        assert!(b > a);
        assert_eq!(format!("{a}"), format!("plugin#{}", a.as_u64()));

        let t = TaskId::next();
        assert!(t.to_string().starts_with("task#"));
    }
}
