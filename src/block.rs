use std::{mem, ptr::NonNull};

use crate::align::{ALIGNMENT, checked_align_to};

/// Metadata written right before every payload the allocator hands out.
///
/// ```text
///   ┌───────────────────────┬──────────────────────────────┬─────────┐
///   │    Block (header)     │   payload: `size` bytes      │ padding │
///   └───────────────────────┴──────────────────────────────┴─────────┘
///   ▲                       ▲                                        ▲
///   block                   Block::payload(block)          Block::end(block)
/// ```
///
/// The header is over-aligned so that its size is a multiple of
/// [`ALIGNMENT`] on every platform, which keeps the payload on that boundary
/// whenever the header itself is.
#[repr(C, align(16))]
pub struct Block {
  /// Payload size as requested by the caller. Never includes the header.
  pub size: usize,
  pub is_free: bool,
  /// Next block in address order. Not an owning link: the heap region owns
  /// the memory, the list only threads through it.
  pub next: *mut Block,
}

/// Distance between a header and its payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(mem::align_of::<Block>() == ALIGNMENT);
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: *mut Block,
  ) -> Self {
    Self { size, is_free, next }
  }

  /// Bytes a block with a payload of `size` occupies in the heap, or `None`
  /// if that doesn't fit in the address space.
  pub fn stride(size: usize) -> Option<usize> {
    checked_align_to(size, ALIGNMENT)?.checked_add(HEADER_SIZE)
  }

  /// Writes a fresh allocated header at `address` and returns it.
  ///
  /// # Safety
  ///
  /// `address` must be aligned to [`ALIGNMENT`] and point to at least
  /// [`Block::stride`]`(size)` writable bytes.
  pub unsafe fn write(
    address: NonNull<u8>,
    size: usize,
  ) -> *mut Block {
    let block = address.as_ptr() as *mut Block;
    unsafe { block.write(Block::new(size, false, std::ptr::null_mut())) };
    block
  }

  /// Recovers the header from a payload pointer.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`Block::payload`] for a block
  /// that is still linked in the allocator's list. Any other pointer is
  /// undefined behaviour: there is no way to tell them apart.
  #[inline]
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) as *mut Block }
  }

  /// First byte after the header.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  #[inline]
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(HEADER_SIZE) }
  }

  /// Bytes this block occupies in the heap, header included.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  #[inline]
  pub unsafe fn footprint(block: *mut Block) -> usize {
    // `stride` already succeeded when this block was carved.
    HEADER_SIZE + crate::align_to!(unsafe { (*block).size }, ALIGNMENT)
  }

  /// First byte after the (padded) payload, where the next block starts.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  #[inline]
  pub unsafe fn end(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(Block::footprint(block)) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(C, align(16))]
  struct Scratch([u8; 256]);

  #[test]
  fn test_header_keeps_payload_aligned() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    assert!(HEADER_SIZE >= mem::size_of::<usize>() * 2 + mem::size_of::<bool>());
  }

  #[test]
  fn test_stride() {
    assert_eq!(Block::stride(0), Some(HEADER_SIZE));
    assert_eq!(Block::stride(1), Some(HEADER_SIZE + ALIGNMENT));
    assert_eq!(Block::stride(ALIGNMENT), Some(HEADER_SIZE + ALIGNMENT));
    assert_eq!(Block::stride(ALIGNMENT + 1), Some(HEADER_SIZE + ALIGNMENT * 2));
    assert_eq!(Block::stride(usize::MAX), None);
    assert_eq!(Block::stride(usize::MAX - HEADER_SIZE), None);
  }

  #[test]
  fn test_payload_round_trip() {
    let mut scratch = Scratch([0; 256]);
    let address = NonNull::new(scratch.0.as_mut_ptr()).unwrap();

    unsafe {
      let block = Block::write(address, 10);

      assert_eq!((*block).size, 10);
      assert!(!(*block).is_free);
      assert!((*block).next.is_null());

      let payload = Block::payload(block);
      assert_eq!(payload as usize - block as usize, HEADER_SIZE);
      assert_eq!(payload as usize % ALIGNMENT, 0);
      assert_eq!(Block::from_payload(payload), block);
      assert_eq!(Block::footprint(block), Block::stride(10).unwrap());
      assert_eq!(Block::end(block) as usize - block as usize, Block::footprint(block));
    }
  }
}
