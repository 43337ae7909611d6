use derivative::Derivative;
use std::marker::PhantomData;

/// A generational index into a [`SlotMap`](crate::slot_map::SlotMap).
///
/// The slot is a plain value: it owns nothing, can be copied freely, and packs into a single
/// `u64` (`generation << 32 | index`) so it can cross module boundaries as an opaque integer.
#[derive(Derivative)]
#[derivative(
    Debug(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    Hash(bound = "")
)]
pub struct Slot<T> {
    id: u32,
    generation: u32,
    #[derivative(Debug = "ignore", PartialEq = "ignore", Hash = "ignore")]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Slot<T> {
    /// Index that is never handed out by a slot map
    pub const NULL_ID: u32 = u32::MAX;

    pub fn new(id: u32, generation: u32) -> Self {
        Self {
            id,
            generation,
            _marker: PhantomData,
        }
    }

    /// A slot that never resolves to a live element
    pub fn null() -> Self {
        Self::new(Self::NULL_ID, 0)
    }

    pub fn is_null(&self) -> bool {
        self.id == Self::NULL_ID
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into `generation << 32 | id`
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.id as u64
    }

    /// Unpack a value produced by [`Self::to_raw`]
    pub fn from_raw(raw: u64) -> Self {
        Self::new(raw as u32, (raw >> 32) as u32)
    }

    /// Reinterpret the slot for another element type
    pub fn cast<A>(self) -> Slot<A> {
        Slot::new(self.id, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        let slot: Slot<u8> = Slot::new(17, 3);
        let raw = slot.to_raw();
        assert_eq!(raw, (3u64 << 32) | 17);
        assert_eq!(Slot::<u8>::from_raw(raw), slot);
    }

    #[test]
    fn test_null() {
        let slot: Slot<u8> = Slot::default();
        assert!(slot.is_null());
        assert!(!Slot::<u8>::new(0, 0).is_null());
    }

    #[test]
    fn test_generation_distinguishes() {
        assert_ne!(Slot::<u8>::new(1, 0), Slot::<u8>::new(1, 1));
    }
}
