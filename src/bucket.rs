pub(crate) const BUCKET_SHIFT: u32 = 3;

/// Maximum number of entries a bucket can hold.
pub const BUCKET_SIZE: usize = 1 << BUCKET_SHIFT;

/// Slot is empty.
pub(crate) const EMPTY: u8 = 0;
/// Slot is empty and its bucket has been evacuated.
pub(crate) const EVACUATED_EMPTY: u8 = 1;
/// Entry moved to the lower half of the grown array.
pub(crate) const EVACUATED_LOWER: u8 = 2;
/// Entry moved to the upper half of the grown array.
pub(crate) const EVACUATED_UPPER: u8 = 3;
/// Smallest status byte used as a tag for a filled slot.
pub(crate) const MIN_TAG: u8 = 4;

/// Derives the tag of a hash: its top byte, moved out of the reserved range.
#[inline(always)]
pub(crate) fn tag(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top < MIN_TAG { top + MIN_TAG } else { top }
}

/// Decoded form of a slot's status byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Empty,
    EvacuatedEmpty,
    EvacuatedLower,
    EvacuatedUpper,
    Filled(u8),
}

impl Status {
    #[inline(always)]
    pub(crate) fn of(byte: u8) -> Self {
        match byte {
            EMPTY => Status::Empty,
            EVACUATED_EMPTY => Status::EvacuatedEmpty,
            EVACUATED_LOWER => Status::EvacuatedLower,
            EVACUATED_UPPER => Status::EvacuatedUpper,
            tag => Status::Filled(tag),
        }
    }

    #[inline(always)]
    pub(crate) fn is_vacant(self) -> bool {
        matches!(self, Status::Empty | Status::EvacuatedEmpty)
    }

    #[inline(always)]
    pub(crate) fn is_relocated(self) -> bool {
        matches!(self, Status::EvacuatedLower | Status::EvacuatedUpper)
    }
}

/// Location of a single slot in the bucket arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub(crate) bucket: usize,
    pub(crate) index: usize,
}

/// Contents of a slot.
///
/// `Moved` is left behind by evacuation and points at the slot the entry was
/// copied to, which lets cursors started before a growth find the entry after
/// the array they snapshotted has been retired.
#[derive(Clone, Debug, Default)]
pub(crate) enum Slot<K, V> {
    #[default]
    Vacant,
    Occupied(K, V),
    Moved(SlotRef),
}

/// Eight slots plus an overflow link.
///
/// A bucket and every bucket in its overflow chain are either entirely
/// un-evacuated or entirely evacuated, except while that chain is itself
/// being evacuated.
#[derive(Clone, Debug)]
pub(crate) struct Bucket<K, V> {
    pub(crate) status: [u8; BUCKET_SIZE],
    pub(crate) slots: [Slot<K, V>; BUCKET_SIZE],
    pub(crate) overflow: Option<usize>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            status: [EMPTY; BUCKET_SIZE],
            slots: core::array::from_fn(|_| Slot::Vacant),
            overflow: None,
        }
    }

    /// Whether this bucket (and therefore its whole chain) has been evacuated.
    #[inline(always)]
    pub(crate) fn is_evacuated(&self) -> bool {
        let first = self.status[0];
        first > EMPTY && first < MIN_TAG
    }

    /// First slot that can take a new entry, if any.
    #[inline]
    pub(crate) fn first_empty(&self) -> Option<usize> {
        self.status.iter().position(|&s| s == EMPTY)
    }
}
