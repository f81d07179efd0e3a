//! Transaction items
//!
//! A `TransItem` is one entry of a transaction's combined read/write/predicate
//! set. It names the object and the key within that object, and carries the
//! payloads the object chose to record. At most one item exists per
//! (object, key) pair within a transaction.

use std::fmt;

use crate::object::TObject;
use crate::payload::Payload;
use crate::predicate::IntRange;

/// Item flag bits
///
/// The engine owns the low bits; `USER0..USER3` belong to the object.
pub mod flags {
    /// A read snapshot was recorded
    pub const READ: u16 = 1 << 0;
    /// A write payload was recorded
    pub const WRITE: u16 = 1 << 1;
    /// A predicate was recorded
    pub const PREDICATE: u16 = 1 << 2;
    /// The stash slot holds object state
    pub const STASH: u16 = 1 << 3;
    /// The object's lock for this key is held and must be released
    pub const NEEDS_UNLOCK: u16 = 1 << 4;
    /// The lock was taken by the commit protocol rather than by `acquire`
    pub const LOCKED_AT_COMMIT: u16 = 1 << 5;
    /// First object-defined bit
    pub const USER0: u16 = 1 << 8;
    /// Second object-defined bit
    pub const USER1: u16 = 1 << 9;
    /// Third object-defined bit
    pub const USER2: u16 = 1 << 10;
    /// Fourth object-defined bit
    pub const USER3: u16 = 1 << 11;
    /// All object-defined bits
    pub const USER_MASK: u16 = USER0 | USER1 | USER2 | USER3;
}

/// Identity of an object: the address of the object itself
pub(crate) fn object_id(obj: &dyn TObject) -> usize {
    obj as *const _ as *const () as usize
}

/// One read/write/predicate record
pub struct TransItem<'a> {
    owner: &'a dyn TObject,
    key: u64,
    flags: u16,
    pub(crate) read: Payload,
    pub(crate) write: Payload,
    pub(crate) predicate: IntRange,
    pub(crate) stash: Payload,
}

impl<'a> TransItem<'a> {
    pub(crate) fn new(owner: &'a dyn TObject, key: u64) -> Self {
        Self {
            owner,
            key,
            flags: 0,
            read: Payload::Empty,
            write: Payload::Empty,
            predicate: IntRange::ANY,
            stash: Payload::Empty,
        }
    }

    /// Owning object
    pub fn owner(&self) -> &'a dyn TObject {
        self.owner
    }

    /// Address-based identity of the owning object
    pub fn owner_id(&self) -> usize {
        object_id(self.owner)
    }

    /// Object-defined key
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Raw flag word
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Whether every bit of `mask` is set
    pub fn has_flags(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    pub(crate) fn add_flags(&mut self, mask: u16) {
        self.flags |= mask;
    }

    pub(crate) fn clear_flags(&mut self, mask: u16) {
        self.flags &= !mask;
    }

    /// Set or clear object-defined bits
    ///
    /// Engine bits in `mask` are ignored.
    pub fn set_user_flags(&mut self, mask: u16, on: bool) {
        let mask = mask & flags::USER_MASK;
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    /// A read was recorded
    pub fn has_read(&self) -> bool {
        self.flags & flags::READ != 0
    }

    /// A write was recorded
    pub fn has_write(&self) -> bool {
        self.flags & flags::WRITE != 0
    }

    /// A predicate was recorded
    pub fn has_predicate(&self) -> bool {
        self.flags & flags::PREDICATE != 0
    }

    /// The stash holds object state
    pub fn has_stash(&self) -> bool {
        self.flags & flags::STASH != 0
    }

    /// The object's lock is held on behalf of this item
    pub fn needs_unlock(&self) -> bool {
        self.flags & flags::NEEDS_UNLOCK != 0
    }

    /// The lock was taken during commit phase 1
    pub fn locked_at_commit(&self) -> bool {
        self.flags & flags::LOCKED_AT_COMMIT != 0
    }

    /// Recorded read snapshot
    pub fn read_value(&self) -> &Payload {
        &self.read
    }

    /// Recorded write payload
    pub fn write_value(&self) -> &Payload {
        &self.write
    }

    /// Mutable write payload
    pub fn write_value_mut(&mut self) -> &mut Payload {
        &mut self.write
    }

    /// Move the write payload out, e.g. during install
    pub fn take_write(&mut self) -> Payload {
        self.write.take()
    }

    /// Recorded predicate
    pub fn predicate(&self) -> &IntRange {
        &self.predicate
    }

    /// Stash slot
    pub fn stash(&self) -> &Payload {
        &self.stash
    }
}

impl fmt::Debug for TransItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransItem")
            .field("owner", &self.owner.name())
            .field("key", &self.key)
            .field("flags", &format_args!("{:#06x}", self.flags))
            .field("read", &self.read)
            .field("write", &self.write)
            .field("predicate", &self.predicate)
            .finish()
    }
}
