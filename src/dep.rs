//! Dependency keys.
//!
//! A [`Dep`] is an opaque integer naming a region of memory the runtime
//! tracks for ordering. Equality defines "same region"; the runtime performs
//! no aliasing analysis, so the caller must pick one representative key per
//! region and stick to it.

/// Key identifying a tracked memory region.
///
/// Typically the address of the data: build one from a reference with
/// [`Dep::of`] (or the [`deps!`](crate::deps) macro), or from a raw pointer,
/// whose *value* becomes the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dep(usize);

impl Dep {
    /// Key a region by the address of `value`.
    pub fn of<T: ?Sized>(value: &T) -> Dep {
        Dep(value as *const T as *const () as usize)
    }

    /// Key a region by an explicit address.
    pub fn raw(addr: usize) -> Dep {
        Dep(addr)
    }
}

/// Conversion into a dependency key.
///
/// References key by the address of their referent; raw pointers key by
/// their value. This is the explicit-Rust rendering of "the key is the
/// argument's address unless it already is a pointer".
pub trait IntoDep {
    fn into_dep(self) -> Dep;
}

impl IntoDep for Dep {
    fn into_dep(self) -> Dep {
        self
    }
}

impl<T: ?Sized> IntoDep for &T {
    fn into_dep(self) -> Dep {
        Dep::of(self)
    }
}

impl<T> IntoDep for *const T {
    fn into_dep(self) -> Dep {
        Dep(self as usize)
    }
}

impl<T> IntoDep for *mut T {
    fn into_dep(self) -> Dep {
        Dep(self as usize)
    }
}

/// Build a dependency key list: `deps![&a, &b, ptr]`.
///
/// Each element goes through [`IntoDep`], so references contribute their
/// referent's address and raw pointers contribute their value.
#[macro_export]
macro_rules! deps {
    () => {{
        let keys: [$crate::Dep; 0] = [];
        keys
    }};
    ($($value:expr),+ $(,)?) => {
        [$($crate::IntoDep::into_dep($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_keys_by_referent_address() {
        let x = 42u64;
        assert_eq!(Dep::of(&x), (&x).into_dep());
        assert_eq!(Dep::of(&x), Dep::raw(&x as *const u64 as usize));
    }

    #[test]
    fn test_pointer_keys_by_value() {
        let x = 1u8;
        let p = &x as *const u8;
        assert_eq!(p.into_dep(), Dep::raw(p as usize));
    }

    #[test]
    fn test_deps_macro() {
        let a = 1u32;
        let b = [0u8; 4];
        let keys = deps![&a, &b];
        assert_eq!(keys, [Dep::of(&a), Dep::of(&b)]);

        let empty = deps![];
        assert!(empty.is_empty());
    }

    #[test]
    fn test_clones_share_a_key() {
        use std::sync::Arc;
        let cell = Arc::new(5u64);
        let other = cell.clone();
        assert_eq!(Dep::of(&*cell), Dep::of(&*other));
    }
}
