use std::{fmt, marker::PhantomData, ptr};

use crate::block::Block;

/// Every block ever carved from the heap and not yet given back, linked in
/// address order.
///
/// ```text
///   head                                   tail
///    │                                      │
///    ▼                                      ▼
///   ┌───────┬────┐   ┌───────┬────┐   ┌───────┬────┐
///   │ Block │    │──▶│ Block │    │──▶│ Block │    │──▶ null
///   └───────┴────┘   └───────┴────┘   └───────┴────┘
///   low address                          heap break ▲
/// ```
///
/// New blocks only ever come from the top of the heap, so appending keeps the
/// list sorted. Only the tail can be removed, and since there are no back
/// links finding its predecessor is a linear walk from `head`.
pub struct BlockList {
  head: *mut Block,
  tail: *mut Block,
  len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListError {
  /// Exactly one of `head` and `tail` is null, or they disagree with `len`.
  Ends,
  /// Block number `index` doesn't sit above its predecessor. A link
  /// pointing backwards, cycles included, shows up as this.
  Unordered { index: usize },
  /// Block number `index` starts inside its predecessor.
  Overlap { index: usize },
  /// The walk ended somewhere other than `tail`.
  Tail,
  /// The walk from `head` saw a different number of blocks than were
  /// linked. `found` stops one past `expected` when the walk overruns.
  Length { expected: usize, found: usize },
}

impl fmt::Display for ListError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      ListError::Ends => write!(f, "head, tail and length disagree about emptiness"),
      ListError::Unordered { index } => write!(f, "block {index} is not above its predecessor"),
      ListError::Overlap { index } => write!(f, "block {index} overlaps its predecessor"),
      ListError::Tail => write!(f, "last reachable block is not the tail"),
      ListError::Length { expected, found } => {
        write!(f, "expected {expected} blocks, found {found}")
      }
    }
  }
}

impl std::error::Error for ListError {}

impl BlockList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      len: 0,
    }
  }

  pub fn head(&self) -> *mut Block {
    self.head
  }

  pub fn tail(&self) -> *mut Block {
    self.tail
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// Links `block` after the current tail.
  ///
  /// # Safety
  ///
  /// `block` must be a valid header located above every block in the list,
  /// with `next` set to null.
  pub unsafe fn append(
    &mut self,
    block: *mut Block,
  ) {
    if self.head.is_null() {
      self.head = block;
    } else {
      unsafe { (*self.tail).next = block };
    }

    self.tail = block;
    self.len += 1;
  }

  /// First fit: the lowest free block that can hold `size` bytes, or null.
  pub fn find_free(
    &self,
    size: usize,
  ) -> *mut Block {
    self
      .iter()
      .find(|&block| unsafe { (*block).is_free && (*block).size >= size })
      .unwrap_or(ptr::null_mut())
  }

  /// Unlinks the tail and returns it, or null if the list is empty. The
  /// header memory is left untouched.
  pub fn pop_tail(&mut self) -> *mut Block {
    let tail = self.tail;

    if tail.is_null() {
      return tail;
    }

    if self.head == tail {
      self.head = ptr::null_mut();
      self.tail = ptr::null_mut();
    } else {
      let predecessor = self
        .iter()
        .find(|&block| unsafe { (*block).next == tail })
        .unwrap_or(ptr::null_mut());

      // `tail` is reachable from `head` whenever the list holds two blocks.
      debug_assert!(!predecessor.is_null());

      unsafe { (*predecessor).next = ptr::null_mut() };
      self.tail = predecessor;
    }

    self.len -= 1;
    tail
  }

  /// Whether `block` is one of the headers in the list.
  pub fn contains(
    &self,
    block: *mut Block,
  ) -> bool {
    self.iter().any(|candidate| candidate == block)
  }

  pub fn iter(&self) -> Iter<'_> {
    Iter {
      current: self.head,
      remaining: self.len,
      marker: PhantomData,
    }
  }

  /// Walks the whole list and reports the first broken invariant.
  pub fn verify(&self) -> Result<(), ListError> {
    if self.head.is_null() != self.tail.is_null() || self.head.is_null() != (self.len == 0) {
      return Err(ListError::Ends);
    }

    let mut previous: *mut Block = ptr::null_mut();
    let mut current = self.head;
    let mut found = 0;

    while !current.is_null() {
      if !previous.is_null() {
        if current <= previous {
          return Err(ListError::Unordered { index: found });
        }
        if (current as *mut u8) < unsafe { Block::end(previous) } {
          return Err(ListError::Overlap { index: found });
        }
      }

      if found == self.len {
        return Err(ListError::Length { expected: self.len, found: found + 1 });
      }

      found += 1;
      previous = current;
      current = unsafe { (*current).next };
    }

    if found != self.len {
      return Err(ListError::Length { expected: self.len, found });
    }

    if previous != self.tail {
      return Err(ListError::Tail);
    }

    Ok(())
  }
}

impl Default for BlockList {
  fn default() -> Self {
    Self::new()
  }
}

/// Headers in address order. Bounded by the list length so a corrupted link
/// can't make it spin forever.
pub struct Iter<'a> {
  current: *mut Block,
  remaining: usize,
  marker: PhantomData<&'a BlockList>,
}

impl Iterator for Iter<'_> {
  type Item = *mut Block;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() || self.remaining == 0 {
      return None;
    }

    let block = self.current;
    self.current = unsafe { (*block).next };
    self.remaining -= 1;

    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use std::ptr::NonNull;

  use super::*;
  use crate::block::HEADER_SIZE;

  #[repr(C, align(16))]
  struct Scratch([u8; 1024]);

  /// Writes blocks of the given sizes back to back, like the heap would.
  unsafe fn carve(
    scratch: &mut Scratch,
    sizes: &[usize],
  ) -> Vec<*mut Block> {
    let mut offset = 0;
    let mut blocks = Vec::new();

    for &size in sizes {
      let address = NonNull::new(unsafe { scratch.0.as_mut_ptr().add(offset) }).unwrap();
      blocks.push(unsafe { Block::write(address, size) });
      offset += Block::stride(size).unwrap();
    }

    blocks
  }

  #[test]
  fn test_append_keeps_address_order() {
    let mut scratch = Scratch([0; 1024]);
    let mut list = BlockList::new();

    assert!(list.is_empty());
    assert_eq!(list.verify(), Ok(()));

    unsafe {
      let blocks = carve(&mut scratch, &[10, 20, 30]);
      for &block in &blocks {
        list.append(block);
      }

      assert_eq!(list.len(), 3);
      assert_eq!(list.head(), blocks[0]);
      assert_eq!(list.tail(), blocks[2]);
      assert_eq!(list.iter().collect::<Vec<_>>(), blocks);
      assert!((*list.tail()).next.is_null());
    }

    assert_eq!(list.verify(), Ok(()));
  }

  #[test]
  fn test_find_free_is_first_fit() {
    let mut scratch = Scratch([0; 1024]);
    let mut list = BlockList::new();

    unsafe {
      let mut blocks = carve(&mut scratch, &[8, 64, 32, 64]);
      for &block in &blocks {
        list.append(block);
      }

      assert!(list.find_free(1).is_null());

      (*blocks[0]).is_free = true;
      (*blocks[2]).is_free = true;
      (*blocks[3]).is_free = true;

      assert_eq!(list.find_free(8), blocks[0]);
      assert_eq!(list.find_free(9), blocks[2]);
      assert_eq!(list.find_free(33), blocks[3]);
      assert!(list.find_free(65).is_null());
    }
  }

  #[test]
  fn test_pop_tail_finds_predecessor() {
    let mut scratch = Scratch([0; 1024]);
    let mut list = BlockList::new();

    unsafe {
      let blocks = carve(&mut scratch, &[16, 16, 16]);
      for &block in &blocks {
        list.append(block);
      }

      assert_eq!(list.pop_tail(), blocks[2]);
      assert_eq!(list.tail(), blocks[1]);
      assert!((*blocks[1]).next.is_null());
      assert_eq!(list.verify(), Ok(()));

      assert_eq!(list.pop_tail(), blocks[1]);
      assert_eq!(list.pop_tail(), blocks[0]);
      assert!(list.head().is_null());
      assert!(list.tail().is_null());
      assert!(list.pop_tail().is_null());
    }

    assert_eq!(list.len(), 0);
    assert_eq!(list.verify(), Ok(()));
  }

  #[test]
  fn test_contains_only_linked_blocks() {
    let mut scratch = Scratch([0; 1024]);
    let mut list = BlockList::new();

    unsafe {
      let blocks = carve(&mut scratch, &[16, 32, 48]);
      assert!(!list.contains(blocks[0]));

      list.append(blocks[0]);
      list.append(blocks[1]);

      assert!(list.contains(blocks[0]));
      assert!(list.contains(blocks[1]));
      assert!(!list.contains(blocks[2]));
      assert!(!list.contains(ptr::null_mut()));

      list.pop_tail();
      assert!(!list.contains(blocks[1]));
    }
  }

  #[test]
  fn test_verify_catches_broken_links() {
    let mut scratch = Scratch([0; 1024]);
    let mut list = BlockList::new();

    unsafe {
      let mut blocks = carve(&mut scratch, &[16, 16, 16]);
      for &block in &blocks {
        list.append(block);
      }

      (*blocks[1]).next = blocks[0];
      assert_eq!(list.verify(), Err(ListError::Unordered { index: 2 }));

      (*blocks[1]).next = blocks[2];
      (*blocks[0]).size = HEADER_SIZE * 2;
      assert_eq!(list.verify(), Err(ListError::Overlap { index: 1 }));

      (*blocks[0]).size = 16;
      list.len = 2;
      assert_eq!(list.verify(), Err(ListError::Length { expected: 2, found: 3 }));

      (*blocks[2]).next = blocks[2];
      list.len = 3;
      assert_eq!(list.verify(), Err(ListError::Unordered { index: 3 }));

      (*blocks[2]).next = ptr::null_mut();
      assert_eq!(list.verify(), Ok(()));
      assert_eq!(list.iter().nth(1), Some(blocks[1]));
    }
  }
}
