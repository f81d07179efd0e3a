//! Read and write payloads carried by transaction items
//!
//! Objects decide what they store in an item's read, write and stash slots.
//! The shapes actually used are few: a version word, a scalar, or an owned
//! heap value. Scalars stay inline; anything else is boxed and handed back
//! to the object by value at install or cleanup time.

use std::any::Any;
use std::fmt;
use std::mem;

use stoa_core::Version;

/// Payload of one item slot
#[derive(Default)]
pub enum Payload {
    /// Nothing recorded
    #[default]
    Empty,
    /// A versioned-lock snapshot
    Version(Version),
    /// An inline scalar
    Int(i64),
    /// An owned heap value
    Boxed(Box<dyn Any + Send>),
}

impl Payload {
    /// Box an arbitrary value
    pub fn boxed<T: Any + Send>(value: T) -> Self {
        Payload::Boxed(Box::new(value))
    }

    /// Whether the slot is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// The version, if this slot holds one
    pub fn as_version(&self) -> Option<Version> {
        match self {
            Payload::Version(v) => Some(*v),
            _ => None,
        }
    }

    /// The scalar, if this slot holds one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow a boxed value of type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Boxed(b) => b.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Mutably borrow a boxed value of type `T`
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            Payload::Boxed(b) => b.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Move a boxed `T` out, leaving the slot empty
    ///
    /// Leaves the slot untouched if it holds anything else.
    pub fn take_boxed<T: Any>(&mut self) -> Option<Box<T>> {
        if !matches!(self, Payload::Boxed(b) if b.is::<T>()) {
            return None;
        }
        match mem::take(self) {
            Payload::Boxed(b) => b.downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Move the whole payload out
    pub fn take(&mut self) -> Payload {
        mem::take(self)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Version(v) => write!(f, "{:?}", v),
            Payload::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Payload::Boxed(_) => f.write_str("Boxed(..)"),
        }
    }
}

impl From<Version> for Payload {
    fn from(v: Version) -> Self {
        Payload::Version(v)
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(Payload::default().is_empty());
        assert!(!Payload::Int(0).is_empty());
    }

    #[test]
    fn test_scalar_accessors() {
        assert_eq!(Payload::from(7i64).as_int(), Some(7));
        assert_eq!(Payload::from(7i64).as_version(), None);
        let v = Version::from_raw(1 << 12);
        assert_eq!(Payload::from(v).as_version(), Some(v));
    }

    #[test]
    fn test_take_boxed_checks_type() {
        let mut p = Payload::boxed(String::from("hello"));
        assert!(p.take_boxed::<u32>().is_none());
        assert!(!p.is_empty());
        assert_eq!(p.downcast_ref::<String>().map(String::as_str), Some("hello"));
        let s = p.take_boxed::<String>().unwrap();
        assert_eq!(*s, "hello");
        assert!(p.is_empty());
    }

    #[test]
    fn test_downcast_mut_updates_in_place() {
        let mut p = Payload::boxed(vec![1u8]);
        p.downcast_mut::<Vec<u8>>().unwrap().push(2);
        assert_eq!(p.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2]));
    }
}
