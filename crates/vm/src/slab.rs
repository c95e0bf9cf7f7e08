//! Fixed-size object pools with embedded free lists.
//!
//! Every runtime value type gets its own [`SlabAllocator`]. A slab is a
//! fixed-capacity block of cells with an index-linked free list; the
//! allocator keeps its slabs sorted into free / partial / busy lists by
//! occupancy. Cells are addressed as `slab_id * CAPACITY + cell`, which stays
//! stable for the lifetime of the allocator.

/// Number of cells per slab.
pub const SLAB_CAPACITY: usize = 256;

/// A fixed-capacity block of `T` cells with an internal free list.
pub struct Slab<T> {
    cells: Vec<Option<T>>,
    next_free: Vec<u16>,
    cur_free: u16,
    len: usize,
    /// Set once the backing storage was released back to the host.
    released: bool,
}

impl<T> Slab<T> {
    /// A released shell; [`Slab::reset`] allocates the storage.
    fn new() -> Self {
        Self {
            cells: Vec::new(),
            next_free: Vec::new(),
            cur_free: 0,
            len: 0,
            released: true,
        }
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.cells.resize_with(SLAB_CAPACITY, || None);
        self.next_free = (1..=SLAB_CAPACITY as u16).collect();
        self.cur_free = 0;
        self.len = 0;
        self.released = false;
    }

    fn release(&mut self) {
        self.cells = Vec::new();
        self.next_free = Vec::new();
        self.cur_free = 0;
        self.len = 0;
        self.released = true;
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == SLAB_CAPACITY
    }

    fn alloc(&mut self, value: T) -> Option<u16> {
        if self.is_full() || self.released {
            return None;
        }
        let index = self.cur_free;
        self.cur_free = self.next_free[index as usize];
        self.cells[index as usize] = Some(value);
        self.len += 1;
        Some(index)
    }

    fn free(&mut self, index: u16) -> Option<T> {
        let cell = self.cells.get_mut(index as usize)?.take()?;
        self.next_free[index as usize] = self.cur_free;
        self.cur_free = index;
        self.len -= 1;
        Some(cell)
    }

    pub fn get(&self, index: u16) -> Option<&T> {
        self.cells.get(index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut T> {
        self.cells.get_mut(index as usize)?.as_mut()
    }

    /// Iterates the live cells together with their in-slab indices.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u16, &mut T)> {
        self.cells
            .iter_mut()
            .enumerate()
            .filter_map(|(index, cell)| cell.as_mut().map(|value| (index as u16, value)))
    }
}

/// Pool of slabs for one object type.
pub struct SlabAllocator<T> {
    slabs: Vec<Slab<T>>,
    free: Vec<usize>,
    partial: Vec<usize>,
    busy: Vec<usize>,
    /// Objects currently live across all slabs.
    pub alloc_count: u64,
    /// Heap bytes reported by live objects at allocation time.
    pub managed_bytes: u64,
    alloc_chunk: usize,
}

impl<T> SlabAllocator<T> {
    /// Creates an allocator with `init_capacity` pre-created free slabs.
    pub fn new(init_capacity: usize) -> Self {
        let init_capacity = init_capacity.max(1);
        let mut allocator = Self {
            slabs: Vec::new(),
            free: Vec::new(),
            partial: Vec::new(),
            busy: Vec::new(),
            alloc_count: 0,
            managed_bytes: 0,
            alloc_chunk: init_capacity,
        };
        for _ in 0..init_capacity {
            let id = allocator.slabs.len();
            allocator.slabs.push(Slab::new());
            allocator.slabs[id].reset();
            allocator.free.push(id);
        }
        allocator
    }

    /// Allocates a cell and returns its stable index. `extra_bytes` is the
    /// object's reported heap footprint, accumulated for the collector.
    pub fn alloc(&mut self, value: T, extra_bytes: usize) -> u32 {
        if self.partial.is_empty() {
            let id = self.obtain_free_slab();
            self.partial.push(id);
        }
        let slab_id = *self.partial.last().expect("partial list refilled above");
        let cell = self.slabs[slab_id]
            .alloc(value)
            .expect("partial slab has a free cell");
        if self.slabs[slab_id].is_full() {
            self.partial.pop();
            self.busy.push(slab_id);
        }
        self.alloc_count += 1;
        self.managed_bytes += extra_bytes as u64;
        (slab_id * SLAB_CAPACITY) as u32 + cell as u32
    }

    fn obtain_free_slab(&mut self) -> usize {
        if let Some(id) = self.free.pop() {
            return id;
        }
        // Grow by the configured chunk, reusing released slab ids first.
        for _ in 0..self.alloc_chunk {
            if let Some(retired) = self.slabs.iter().position(|slab| slab.released) {
                self.slabs[retired].reset();
                self.free.push(retired);
            } else {
                let id = self.slabs.len();
                self.slabs.push(Slab::new());
                self.slabs[id].reset();
                self.free.push(id);
            }
        }
        self.free.pop().expect("chunk allocation produced free slabs")
    }

    /// Frees a cell; unknown or already-free indices are ignored. Returns the
    /// object that was destroyed, if any.
    pub fn free(&mut self, index: u32, freed_bytes: usize) -> Option<T> {
        let slab_id = index as usize / SLAB_CAPACITY;
        let cell = (index as usize % SLAB_CAPACITY) as u16;
        let value = self.slabs.get_mut(slab_id)?.free(cell)?;
        self.alloc_count = self.alloc_count.saturating_sub(1);
        self.managed_bytes = self.managed_bytes.saturating_sub(freed_bytes as u64);
        self.relist(slab_id);
        Some(value)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        let slab_id = index as usize / SLAB_CAPACITY;
        self.slabs.get(slab_id)?.get((index as usize % SLAB_CAPACITY) as u16)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        let slab_id = index as usize / SLAB_CAPACITY;
        self.slabs
            .get_mut(slab_id)?
            .get_mut((index as usize % SLAB_CAPACITY) as u16)
    }

    /// Moves the slab to the list matching its occupancy.
    fn relist(&mut self, slab_id: usize) {
        self.free.retain(|&id| id != slab_id);
        self.partial.retain(|&id| id != slab_id);
        self.busy.retain(|&id| id != slab_id);
        let slab = &self.slabs[slab_id];
        if slab.released {
            return;
        }
        if slab.is_empty() {
            self.free.push(slab_id);
        } else if slab.is_full() {
            self.busy.push(slab_id);
        } else {
            self.partial.push(slab_id);
        }
    }

    /// Re-sorts busy slabs that lost objects and partial slabs that drained
    /// back into the matching lists. The collector calls this after a sweep.
    pub fn reallocate_slabs(&mut self) {
        let ids: Vec<usize> = self.busy.iter().chain(self.partial.iter()).copied().collect();
        for id in ids {
            self.relist(id);
        }
    }

    /// Drops the storage of every free slab; the memory returns to the host.
    pub fn release_free_slabs(&mut self) {
        for id in std::mem::take(&mut self.free) {
            self.slabs[id].release();
        }
    }

    /// Visits every live cell of the occupied slabs. Used by the sweep.
    pub fn for_each_occupied<F: FnMut(u32, &mut T)>(&mut self, mut visit: F) {
        let ids: Vec<usize> = self.busy.iter().chain(self.partial.iter()).copied().collect();
        for slab_id in ids {
            for (cell, value) in self.slabs[slab_id].iter_mut() {
                visit((slab_id * SLAB_CAPACITY) as u32 + cell as u32, value);
            }
        }
    }

    /// Indices of every live cell, for sweeping without holding a borrow.
    pub fn occupied_indices(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for &slab_id in self.busy.iter().chain(self.partial.iter()) {
            let slab = &self.slabs[slab_id];
            for cell in 0..SLAB_CAPACITY as u16 {
                if slab.get(cell).is_some() {
                    out.push((slab_id * SLAB_CAPACITY) as u32 + cell as u32);
                }
            }
        }
        out
    }

    /// Total bytes attributable to this allocator: cell storage of non-released
    /// slabs plus the reported per-object heap bytes.
    pub fn total_bytes(&self) -> u64 {
        let cell_bytes = self
            .slabs
            .iter()
            .filter(|slab| !slab.released)
            .count() as u64
            * (SLAB_CAPACITY * (std::mem::size_of::<Option<T>>() + std::mem::size_of::<u16>()))
                as u64;
        cell_bytes + self.managed_bytes
    }

    #[cfg(test)]
    fn list_lens(&self) -> (usize, usize, usize) {
        (self.free.len(), self.partial.len(), self.busy.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_reuse() {
        let mut allocator = SlabAllocator::new(1);
        let a = allocator.alloc(10u32, 0);
        let b = allocator.alloc(20u32, 0);
        assert_ne!(a, b);
        assert_eq!(allocator.get(a), Some(&10));
        assert_eq!(allocator.get(b), Some(&20));
        assert_eq!(allocator.alloc_count, 2);

        assert_eq!(allocator.free(a, 0), Some(10));
        assert_eq!(allocator.get(a), None);
        assert_eq!(allocator.alloc_count, 1);

        // Freed cell is reused before any new slab is touched.
        let c = allocator.alloc(30u32, 0);
        assert_eq!(c, a);
        assert_eq!(allocator.get(c), Some(&30));
    }

    #[test]
    fn free_is_idempotent_on_invalid_indices() {
        let mut allocator = SlabAllocator::new(1);
        let a = allocator.alloc(1u8, 0);
        assert_eq!(allocator.free(9999, 0), None);
        assert_eq!(allocator.free(a, 0), Some(1));
        assert_eq!(allocator.free(a, 0), None);
        assert_eq!(allocator.alloc_count, 0);
    }

    #[test]
    fn slabs_move_between_lists() {
        let mut allocator = SlabAllocator::new(1);
        let mut indices = Vec::new();
        for value in 0..SLAB_CAPACITY as u32 {
            indices.push(allocator.alloc(value, 0));
        }
        // First slab is now busy; a second allocation opens a partial slab.
        let overflow = allocator.alloc(999, 0);
        let (_, partial, busy) = allocator.list_lens();
        assert_eq!(busy, 1);
        assert_eq!(partial, 1);

        // Draining the busy slab sends it back through partial to free.
        for index in &indices {
            allocator.free(*index, 0);
        }
        allocator.reallocate_slabs();
        let (free, _, busy) = allocator.list_lens();
        assert_eq!(busy, 0);
        assert!(free >= 1);

        assert_eq!(allocator.get(overflow), Some(&999));
    }

    #[test]
    fn release_free_slabs_drops_storage() {
        let mut allocator = SlabAllocator::new(2);
        let a = allocator.alloc(7i64, 0);
        allocator.release_free_slabs();
        // Live data survives; new allocations still succeed.
        assert_eq!(allocator.get(a), Some(&7));
        let b = allocator.alloc(8i64, 0);
        assert_eq!(allocator.get(b), Some(&8));
    }

    #[test]
    fn byte_accounting() {
        let mut allocator = SlabAllocator::new(1);
        let a = allocator.alloc(vec![0u8; 100], 100);
        assert_eq!(allocator.managed_bytes, 100);
        allocator.free(a, 100);
        assert_eq!(allocator.managed_bytes, 0);
    }

    #[test]
    fn occupied_indices_match_live_cells() {
        let mut allocator = SlabAllocator::new(1);
        let a = allocator.alloc(1u32, 0);
        let b = allocator.alloc(2u32, 0);
        let c = allocator.alloc(3u32, 0);
        allocator.free(b, 0);
        let mut occupied = allocator.occupied_indices();
        occupied.sort_unstable();
        assert_eq!(occupied, vec![a, c]);
    }
}
