use std::{
  alloc::{GlobalAlloc, Layout},
  ptr,
  sync::{Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace};

use crate::{
  align::ALIGNMENT,
  block::Block,
  brk::{BreakError, HeapBreak, Sbrk},
  inspect::{BlockInfo, HeapDump, HeapStats},
  list::{BlockList, ListError},
};

/// Everything the lock protects: the block list and the break it carves
/// blocks from.
struct Heap<B> {
  blocks: BlockList,
  brk: B,
}

// Blocks are only reachable through the list, and the list only through the
// mutex.
unsafe impl<B: Send> Send for Heap<B> {}

impl<B: HeapBreak> Heap<B> {
  unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      let free_block = self.blocks.find_free(size);

      if !free_block.is_null() {
        (*free_block).is_free = false;
        trace!("reusing block {free_block:?} ({} bytes) for {size} bytes", (*free_block).size);

        return Block::payload(free_block);
      }

      let Some(stride) = Block::stride(size) else {
        debug!("allocation of {size} bytes overflows the address space");
        return ptr::null_mut();
      };

      let address = match self.grow(stride) {
        Ok(address) => address,
        Err(e) => {
          debug!("failed to grow the heap by {stride} bytes: {e}");
          return ptr::null_mut();
        }
      };

      let block = Block::write(address, size);
      self.blocks.append(block);
      trace!("carved block {block:?} of {size} bytes, break = {:?}", self.brk.current());

      Block::payload(block)
    }
  }

  /// Moves the break up by `stride` bytes plus whatever padding brings a
  /// misaligned break back to [`ALIGNMENT`]. Padding is never given back.
  ///
  /// Both go out in a single request, so a failure leaves the break where it
  /// was.
  unsafe fn grow(
    &mut self,
    stride: usize,
  ) -> Result<ptr::NonNull<u8>, BreakError> {
    unsafe {
      let padding = (self.brk.current() as usize).wrapping_neg() & (ALIGNMENT - 1);
      let total = padding.checked_add(stride).ok_or(BreakError::TooLarge { bytes: stride })?;

      if padding != 0 {
        trace!("padding the break by {padding} bytes");
      }

      let address = self.brk.grow(total)?.add(padding);
      debug_assert_eq!(address.as_ptr() as usize % ALIGNMENT, 0);

      Ok(address)
    }
  }

  unsafe fn release(
    &mut self,
    payload: *mut u8,
  ) {
    debug_assert!(!self.blocks.is_empty());

    unsafe {
      let block = Block::from_payload(payload);
      debug_assert!(self.blocks.contains(block), "released {payload:?} was never allocated");
      let program_break = self.brk.current();

      if block != self.blocks.tail() || Block::end(block) != program_break {
        (*block).is_free = true;
        trace!("marked block {block:?} ({} bytes) as free", (*block).size);
        return;
      }

      let size = (*block).size;
      let stride = Block::footprint(block);

      self.blocks.pop_tail();

      if let Err(e) = self.brk.shrink(stride) {
        // The memory is still ours, keep it around for reuse.
        debug!("failed to shrink the heap by {stride} bytes: {e}");
        (*block).is_free = true;
        (*block).next = ptr::null_mut();
        self.blocks.append(block);
        return;
      }

      trace!("returned block {block:?} ({size} bytes), break = {:?}", self.brk.current());
    }
  }
}

/// First-fit free list allocator on top of a single growable heap region.
///
/// ```text
///   ┌────────┬─────────┬────────┬─────────┬────────┬─────────┐
///   │ Block  │ in use  │ Block  │  free   │ Block  │ in use  │
///   └────────┴─────────┴────────┴─────────┴────────┴─────────┘
///   ▲ head                                 ▲ tail            ▲ break
/// ```
///
/// Freed blocks stay in the list and are handed out again to any request
/// that fits. Only a block that ends exactly at the break goes back to the
/// [`HeapBreak`], because memory in the middle of the region can't be
/// released piecemeal.
///
/// All four operations are serialized by one [`Mutex`]. [`Self::reallocate`]
/// and [`Self::allocate_zeroed`] are built from [`Self::allocate`] and
/// [`Self::release`] and take the lock once per step.
///
/// Every failure, including `size == 0`, is reported as a null pointer.
///
/// # Examples
///
/// ```rust
/// use brkalloc::{FixedBreak, FreeListAllocator};
///
/// let allocator = FreeListAllocator::with_break(FixedBreak::with_capacity(4096));
///
/// unsafe {
///   let first = allocator.allocate(10);
///   let second = allocator.allocate(20);
///   assert!(!first.is_null() && !second.is_null());
///
///   allocator.release(first);
///   assert_eq!(allocator.allocate(8), first);
/// }
/// ```
///
/// Installing it as the process allocator:
///
/// ```no_run
/// use brkalloc::FreeListAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: FreeListAllocator = FreeListAllocator::new();
///
/// fn main() {
///   let boxed = Box::new(5);
///   assert_eq!(*boxed, 5);
/// }
/// ```
///
/// The allocator logs through [`log`]. A logger that allocates must not be
/// installed while this allocator is the global allocator, it would try to
/// take the lock it is called under.
pub struct FreeListAllocator<B = Sbrk> {
  heap: Mutex<Heap<B>>,
}

impl FreeListAllocator<Sbrk> {
  /// Allocator backed by the process data segment.
  pub const fn new() -> Self {
    Self::with_break(Sbrk)
  }
}

impl Default for FreeListAllocator<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<B> FreeListAllocator<B> {
  /// Allocator carving its blocks out of `brk`. The list starts empty at
  /// whatever the break currently is.
  pub const fn with_break(brk: B) -> Self {
    Self {
      heap: Mutex::new(Heap {
        blocks: BlockList::new(),
        brk,
      }),
    }
  }
}

impl<B: HeapBreak> FreeListAllocator<B> {
  /// A poisoned lock means a panic happened halfway through a list update,
  /// so the list can't be trusted anymore.
  fn lock(&self) -> Option<MutexGuard<'_, Heap<B>>> {
    match self.heap.lock() {
      Ok(heap) => Some(heap),
      Err(_) => {
        debug!("allocator lock poisoned");
        None
      }
    }
  }

  /// Read-only access, poisoned or not. A poisoned list is exactly what one
  /// wants to look at.
  fn lock_for_inspection(&self) -> MutexGuard<'_, Heap<B>> {
    self.heap.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns a pointer to `size` bytes aligned to [`ALIGNMENT`], or null if
  /// `size` is zero or the heap can't grow.
  ///
  /// Reuses the lowest free block whose size is at least `size` before
  /// growing the heap.
  ///
  /// # Safety
  ///
  /// Nothing else may shrink the break below memory this allocator handed
  /// out.
  pub unsafe fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    match self.lock() {
      Some(mut heap) => unsafe { heap.allocate(size) },
      None => ptr::null_mut(),
    }
  }

  /// Gives a block back. Null is a no-op.
  ///
  /// The last block of the heap is returned to the [`HeapBreak`] right away,
  /// any other block is only marked free for later reuse.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  /// Anything else, double frees included, is undefined behaviour.
  pub unsafe fn release(
    &self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }

    if let Some(mut heap) = self.lock() {
      unsafe { heap.release(address) };
    }
  }

  /// Allocates room for `count` elements of `element_size` bytes and zeroes
  /// it. Returns null if either is zero or their product overflows.
  ///
  /// # Safety
  ///
  /// Same as [`Self::allocate`].
  pub unsafe fn allocate_zeroed(
    &self,
    count: usize,
    element_size: usize,
  ) -> *mut u8 {
    if count == 0 || element_size == 0 {
      return ptr::null_mut();
    }

    let Some(size) = count.checked_mul(element_size) else {
      debug!("zeroed allocation of {count} x {element_size} bytes overflows");
      return ptr::null_mut();
    };

    unsafe {
      let address = self.allocate(size);

      if !address.is_null() {
        ptr::write_bytes(address, 0, size);
      }

      address
    }
  }

  /// Resizes the block at `address` to hold `size` bytes.
  ///
  /// - Null `address` or zero `size` behaves exactly like
  ///   [`Self::allocate`]`(size)`; the old block is left alone.
  /// - If the block is already big enough the same pointer comes back and
  ///   nothing changes, not even the recorded size.
  /// - Otherwise the contents move to a new block and the old one is
  ///   released. If that allocation fails, null is returned and the old
  ///   block stays valid.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn reallocate(
    &self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if address.is_null() || size == 0 {
        return self.allocate(size);
      }

      // Only the owner of a live block touches its size.
      let old_size = (*Block::from_payload(address)).size;

      if old_size >= size {
        return address;
      }

      let new_address = self.allocate(size);

      if new_address.is_null() {
        return new_address;
      }

      ptr::copy_nonoverlapping(address, new_address, old_size);
      self.release(address);

      new_address
    }
  }

  /// Current top of the heap, as the [`HeapBreak`] reports it.
  pub fn heap_top(&self) -> *mut u8 {
    self.lock_for_inspection().brk.current()
  }

  /// Runs `f` against the break while holding the lock.
  pub fn inspect_break<R>(
    &self,
    f: impl FnOnce(&B) -> R,
  ) -> R {
    f(&self.lock_for_inspection().brk)
  }

  /// Block counts and byte totals.
  pub fn stats(&self) -> HeapStats {
    HeapStats::collect(&self.lock_for_inspection().blocks)
  }

  /// Every block in the list, in address order.
  ///
  /// Allocates the `Vec` with the global allocator, like [`Self::dump`].
  pub fn blocks(&self) -> Vec<BlockInfo> {
    BlockInfo::collect(&self.lock_for_inspection().blocks)
  }

  /// Snapshot of every block in the list, in address order, with the list
  /// ends.
  ///
  /// The snapshot itself is allocated with the global allocator, so don't
  /// call this on the instance installed as the global allocator.
  pub fn dump(&self) -> HeapDump {
    HeapDump::collect(&self.lock_for_inspection().blocks)
  }

  /// Prints [`Self::dump`] to stdout. Same caveat applies.
  pub fn print_blocks(&self) {
    print!("{}", self.dump());
  }

  /// Checks the list invariants: address order, no overlap, consistent
  /// `head`/`tail`.
  pub fn verify(&self) -> Result<(), ListError> {
    self.lock_for_inspection().blocks.verify()
  }
}

unsafe impl<B: HeapBreak + Send> GlobalAlloc for FreeListAllocator<B> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.allocate(layout.size()) }
  }

  unsafe fn dealloc(
    &self,
    address: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.release(address) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.allocate_zeroed(1, layout.size()) }
  }

  unsafe fn realloc(
    &self,
    address: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.reallocate(address, new_size) }
  }
}
