//! Request-scoped value carrier
//!
//! A `Context` is an immutable chain of typed values. Deriving a child never
//! changes the parent, and clones are cheap.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

struct Node {
    parent: Option<Arc<Node>>,
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

impl Context {
    /// Empty root context
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context carrying `value`, shadowing any value of the same type
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        self.with_shared(Arc::new(value))
    }

    pub fn with_shared<T: Any + Send + Sync>(&self, value: Arc<T>) -> Self {
        let node = Node {
            parent: self.head.clone(),
            key: TypeId::of::<T>(),
            value,
        };
        Self {
            head: Some(Arc::new(node)),
        }
    }

    /// Nearest value of type `T`
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            if current.key == TypeId::of::<T>() {
                return Arc::clone(&current.value).downcast::<T>().ok();
            }
            node = current.parent.as_ref();
        }
        None
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            depth += 1;
            node = current.parent.as_ref();
        }
        depth
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestId(u64);

    #[test]
    fn test_background_is_empty() {
        assert!(Context::background().value::<RequestId>().is_none());
    }

    #[test]
    fn test_child_sees_parent_values() {
        let parent = Context::background().with_value(RequestId(7));
        let child = parent.with_value("tenant-a".to_string());

        assert_eq!(*child.value::<RequestId>().unwrap(), RequestId(7));
        assert_eq!(child.value::<String>().unwrap().as_str(), "tenant-a");
        assert!(parent.value::<String>().is_none());
    }

    #[test]
    fn test_nearest_value_wins() {
        let outer = Context::background().with_value(RequestId(1));
        let inner = outer.with_value(RequestId(2));

        assert_eq!(*inner.value::<RequestId>().unwrap(), RequestId(2));
        assert_eq!(*outer.value::<RequestId>().unwrap(), RequestId(1));
    }
}
