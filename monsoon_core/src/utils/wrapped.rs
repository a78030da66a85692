use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Wrapper around `Rc<RefCell<T>>` used for the graph nodes owned by the
/// serializer thread.
///
/// `PartialEq`, `Eq` and `Hash` are implemented on the *pointer value*, so
/// sets and maps of wrapped nodes treat every node as a distinct object
/// regardless of its contents. Methods can be attached to concrete
/// instantiations with `impl WrappedRcRefCell<MyType> { ... }`.
#[derive(Default)]
pub struct WrappedRcRefCell<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> WrappedRcRefCell<T> {
    /// Create a new wrapped instance. Not called `new` so that concrete
    /// instantiations may define their own `new`.
    pub fn wrap(t: T) -> Self {
        WrappedRcRefCell {
            inner: Rc::new(RefCell::new(t)),
        }
    }

    /// Immutable borrow of the contents. Panics whenever
    /// `RefCell::borrow()` would.
    pub fn get(&self) -> Ref<T> {
        self.inner.borrow()
    }

    /// Mutable borrow of the contents. Panics whenever
    /// `RefCell::borrow_mut()` would.
    pub fn get_mut(&self) -> RefMut<T> {
        self.inner.borrow_mut()
    }

    /// Number of strong references to the contained cell.
    pub fn get_num_refs(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<T> Clone for WrappedRcRefCell<T> {
    fn clone(&self) -> Self {
        WrappedRcRefCell {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Hash for WrappedRcRefCell<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let ptr = &*self.inner as *const RefCell<T>;
        ptr.hash(state);
    }
}

impl<T> PartialEq for WrappedRcRefCell<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for WrappedRcRefCell<T> {}

impl<T: fmt::Debug> fmt::Debug for WrappedRcRefCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Wrapped(")?;
        self.get().fmt(f)?;
        f.write_str(")")
    }
}
