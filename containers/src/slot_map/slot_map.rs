use crate::error::ContainerErrors;
use crate::slot::Slot;

/// Dense generational slot map.
///
/// Elements live contiguously in `data`; `slots` is an indirection table from the outward slot
/// index to the element's position, so removal is a swap-remove that only patches one proxy.
#[derive(Debug)]
pub struct SlotMap<T> {
    // u32 is the index of the proxy slot owning the element
    pub(crate) data: Vec<(T, u32)>,
    pub(crate) slots: Vec<Slot<T>>,
    pub(crate) free_list: Vec<u32>,
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self {
            data: Default::default(),
            slots: Default::default(),
            free_list: Default::default(),
        }
    }
}

impl<T> SlotMap<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
        }
    }

    pub fn insert(&mut self, element: T) -> Slot<T> {
        let data_index = self.data.len() as u32;
        let (proxy_index, generation) = match self.free_list.pop() {
            Some(index) => {
                let proxy = &mut self.slots[index as usize];
                *proxy = Slot::new(data_index, proxy.generation());
                (index, proxy.generation())
            }
            None => {
                let index = self.slots.len() as u32;
                debug_assert!(index != Slot::<T>::NULL_ID);
                self.slots.push(Slot::new(data_index, 0));
                (index, 0)
            }
        };
        self.data.push((element, proxy_index));
        Slot::new(proxy_index, generation)
    }

    /// Resolve an outward slot to the position of its element in `data`
    fn data_index(&self, slot: Slot<T>) -> Result<usize, ContainerErrors> {
        let proxy = self
            .slots
            .get(slot.id() as usize)
            .ok_or(ContainerErrors::NonexistentSlot)?;
        if proxy.generation() != slot.generation() {
            return Err(ContainerErrors::GenerationMismatch);
        }
        Ok(proxy.id() as usize)
    }

    pub fn remove(&mut self, slot: Slot<T>) -> Result<T, ContainerErrors> {
        let index = self.data_index(slot)?;
        let proxy = &mut self.slots[slot.id() as usize];
        *proxy = Slot::new(proxy.id(), proxy.generation().wrapping_add(1));

        let last_index = self.data.len() - 1;
        if index != last_index {
            self.data.swap(index, last_index);
            // the element that moved into `index` needs its proxy patched
            let moved_proxy = self.data[index].1;
            let generation = self.slots[moved_proxy as usize].generation();
            self.slots[moved_proxy as usize] = Slot::new(index as u32, generation);
        }
        let (element, _) = self
            .data
            .pop()
            .ok_or(ContainerErrors::NonexistentSlot)?;
        self.free_list.push(slot.id());
        Ok(element)
    }

    pub fn contains(&self, slot: Slot<T>) -> bool {
        self.data_index(slot).is_ok()
    }

    pub fn get(&self, slot: Slot<T>) -> Option<&T> {
        let index = self.data_index(slot).ok()?;
        self.data.get(index).map(|data| &data.0)
    }

    pub fn get_mut(&mut self, slot: Slot<T>) -> Option<&mut T> {
        let index = self.data_index(slot).ok()?;
        self.data.get_mut(index).map(|data| &mut data.0)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over every live element together with its outward slot
    pub fn iter(&self) -> impl Iterator<Item = (Slot<T>, &T)> {
        self.data.iter().map(|(element, proxy)| {
            let generation = self.slots[*proxy as usize].generation();
            (Slot::new(*proxy, generation), element)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut slot_map = SlotMap::default();
        let slot = slot_map.insert(42);
        assert_eq!(slot_map.get(slot), Some(&42));
    }

    #[test]
    fn test_insert_multiple_and_get() {
        let mut slot_map = SlotMap::default();
        let slot1 = slot_map.insert(42);
        let slot2 = slot_map.insert(43);
        let slot3 = slot_map.insert(44);

        assert_eq!(slot_map.get(slot1), Some(&42));
        assert_eq!(slot_map.get(slot2), Some(&43));
        assert_eq!(slot_map.get(slot3), Some(&44));
    }

    #[test]
    fn test_remove() {
        let mut slot_map = SlotMap::default();
        let slot = slot_map.insert(42);
        assert_eq!(slot_map.remove(slot).unwrap(), 42);
        assert_eq!(slot_map.get(slot), None);
        assert!(slot_map.is_empty());
    }

    #[test]
    fn test_remove_and_insert_reuses_slot() {
        let mut slot_map = SlotMap::default();
        let slot1 = slot_map.insert(42);
        let slot2 = slot_map.insert(43);
        slot_map.remove(slot1).unwrap();
        let slot3 = slot_map.insert(44);

        assert_eq!(slot3.id(), slot1.id());
        assert_eq!(slot3.generation(), slot1.generation() + 1);
        assert_eq!(slot_map.get(slot1), None);
        assert_eq!(slot_map.get(slot2), Some(&43));
        assert_eq!(slot_map.get(slot3), Some(&44));
    }

    #[test]
    fn test_double_remove() {
        let mut slot_map = SlotMap::default();
        let slot = slot_map.insert(42);
        slot_map.remove(slot).unwrap();
        assert_eq!(slot_map.remove(slot), Err(ContainerErrors::GenerationMismatch));
    }

    #[test]
    fn test_nonexistent_slot() {
        let mut slot_map: SlotMap<i32> = SlotMap::default();
        assert_eq!(
            slot_map.remove(Slot::new(999, 0)),
            Err(ContainerErrors::NonexistentSlot)
        );
        assert_eq!(slot_map.remove(Slot::null()), Err(ContainerErrors::NonexistentSlot));
    }

    #[test]
    fn test_swap_remove_keeps_other_slots_valid() {
        let mut slot_map = SlotMap::default();
        let slots: Vec<_> = (0..8).map(|i| slot_map.insert(i)).collect();
        // removing from the front forces the last element to move
        slot_map.remove(slots[0]).unwrap();
        slot_map.remove(slots[3]).unwrap();
        for (i, slot) in slots.iter().enumerate() {
            if i == 0 || i == 3 {
                assert!(!slot_map.contains(*slot));
            } else {
                assert_eq!(slot_map.get(*slot), Some(&i));
            }
        }
    }

    #[test]
    fn test_get_mut() {
        let mut slot_map = SlotMap::default();
        let slot = slot_map.insert(42);
        if let Some(value) = slot_map.get_mut(slot) {
            *value = 100;
        }
        assert_eq!(slot_map.get(slot), Some(&100));
    }

    #[test]
    fn test_iter_yields_live_slots() {
        let mut slot_map = SlotMap::default();
        let a = slot_map.insert(1);
        let b = slot_map.insert(2);
        let c = slot_map.insert(3);
        slot_map.remove(b).unwrap();

        let mut collected: Vec<_> = slot_map.iter().map(|(slot, value)| (slot, *value)).collect();
        collected.sort_by_key(|(_, value)| *value);
        assert_eq!(collected, vec![(a, 1), (c, 3)]);
    }

    #[test]
    fn test_large_number_of_elements() {
        let mut slot_map = SlotMap::default();
        let num_elements = 1000;
        let slots: Vec<_> = (0..num_elements).map(|i| slot_map.insert(i)).collect();

        for i in (0..num_elements).step_by(2) {
            slot_map.remove(slots[i]).unwrap();
        }
        for i in (0..num_elements).step_by(2) {
            assert_eq!(slot_map.get(slots[i]), None);
        }
        for i in (1..num_elements).step_by(2) {
            assert_eq!(slot_map.get(slots[i]), Some(&i));
        }
        assert_eq!(slot_map.len(), num_elements / 2);
    }
}
