//! Sources of heap memory. The allocator only ever moves the top of one
//! contiguous region up and down, so that's all a backend has to offer.

use std::{
  alloc::{self, Layout},
  fmt, io,
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::align::ALIGNMENT;

#[derive(Debug)]
pub enum BreakError {
  /// The backend refused to move the break (`sbrk` returned `(void*)-1`).
  Exhausted(io::Error),
  /// The request doesn't fit in a signed break increment.
  TooLarge { bytes: usize },
  /// Shrinking would move the break below the start of the region.
  Underflow { bytes: usize },
}

impl fmt::Display for BreakError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      BreakError::Exhausted(e) => write!(f, "heap break exhausted: {e}"),
      BreakError::TooLarge { bytes } => write!(f, "break increment of {bytes} bytes is too large"),
      BreakError::Underflow { bytes } => {
        write!(f, "cannot shrink the heap by {bytes} bytes below its base")
      }
    }
  }
}

impl std::error::Error for BreakError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      BreakError::Exhausted(e) => Some(e),
      BreakError::TooLarge { .. } | BreakError::Underflow { .. } => None,
    }
  }
}

/// A heap region whose upper boundary (the break) can be moved.
///
/// # Safety
///
/// Implementors must hand out memory that stays valid and exclusively owned
/// by the caller until it is given back through [`HeapBreak::shrink`], and
/// `grow` must return the old break, so that consecutive successful calls
/// return adjacent, increasing addresses.
pub unsafe trait HeapBreak {
  /// Current top of the heap.
  fn current(&self) -> *mut u8;

  /// Moves the break up by `bytes` and returns the previous break, which is
  /// where the new memory starts.
  ///
  /// # Safety
  ///
  /// Nobody else may rely on the break staying where it is.
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, BreakError>;

  /// Moves the break down by `bytes`. The memory between the new and the old
  /// break must not be touched afterwards.
  ///
  /// # Safety
  ///
  /// The last `bytes` bytes below the break must not be in use.
  unsafe fn shrink(
    &mut self,
    bytes: usize,
  ) -> Result<(), BreakError>;
}

/// The process data segment, moved with `sbrk(2)`.
///
/// Anything else in the process calling `sbrk` or `brk` (the system `malloc`
/// included) moves the same break. The allocator copes with that by only
/// shrinking when its own last block ends exactly at the break.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

unsafe impl HeapBreak for Sbrk {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, BreakError> {
    let increment = intptr_t::try_from(bytes).map_err(|_| BreakError::TooLarge { bytes })?;

    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return Err(BreakError::Exhausted(io::Error::last_os_error()));
    }

    NonNull::new(address as *mut u8)
      .ok_or_else(|| BreakError::Exhausted(io::Error::from(io::ErrorKind::OutOfMemory)))
  }

  unsafe fn shrink(
    &mut self,
    bytes: usize,
  ) -> Result<(), BreakError> {
    let decrement = intptr_t::try_from(bytes).map_err(|_| BreakError::TooLarge { bytes })?;

    if unsafe { sbrk(-decrement) } == usize::MAX as *mut c_void {
      return Err(BreakError::Exhausted(io::Error::last_os_error()));
    }

    Ok(())
  }
}

/// A fixed-capacity region with a movable break, carved out of the global
/// allocator once and handed out `sbrk`-style.
///
/// ```text
///   base                      base + used             base + capacity
///   ▼                         ▼                       ▼
///   ┌─────────────────────────┬───────────────────────┐
///   │   handed out            │   available           │
///   └─────────────────────────┴───────────────────────┘
/// ```
///
/// Nothing else can move this break, which makes heap-top assertions exact.
/// It also counts how often the break moved.
pub struct FixedBreak {
  base: NonNull<u8>,
  capacity: usize,
  used: usize,
  grow_calls: usize,
  shrink_calls: usize,
}

// The region is owned exclusively by this value.
unsafe impl Send for FixedBreak {}

impl FixedBreak {
  /// Reserves `capacity` bytes (rounded up to [`ALIGNMENT`]). The base of the
  /// region is aligned to [`ALIGNMENT`].
  ///
  /// # Panics
  ///
  /// Panics if the global allocator can't provide the region, like any other
  /// collection does.
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = crate::align_to!(capacity.max(1), ALIGNMENT);
    let layout = Self::layout(capacity);

    let base = match NonNull::new(unsafe { alloc::alloc_zeroed(layout) }) {
      Some(base) => base,
      None => alloc::handle_alloc_error(layout),
    };

    Self {
      base,
      capacity,
      used: 0,
      grow_calls: 0,
      shrink_calls: 0,
    }
  }

  fn layout(capacity: usize) -> Layout {
    match Layout::from_size_align(capacity, ALIGNMENT) {
      Ok(layout) => layout,
      Err(_) => panic!("fixed break capacity {capacity} overflows isize"),
    }
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes between the base and the current break.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Successful and failed calls to [`HeapBreak::grow`].
  pub fn grow_calls(&self) -> usize {
    self.grow_calls
  }

  /// Successful and failed calls to [`HeapBreak::shrink`].
  pub fn shrink_calls(&self) -> usize {
    self.shrink_calls
  }
}

unsafe impl HeapBreak for FixedBreak {
  fn current(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.used) }
  }

  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, BreakError> {
    self.grow_calls += 1;

    if bytes > self.capacity - self.used {
      return Err(BreakError::Exhausted(io::Error::from(io::ErrorKind::OutOfMemory)));
    }

    let previous = unsafe { NonNull::new_unchecked(self.current()) };
    self.used += bytes;

    Ok(previous)
  }

  unsafe fn shrink(
    &mut self,
    bytes: usize,
  ) -> Result<(), BreakError> {
    self.shrink_calls += 1;

    if bytes > self.used {
      return Err(BreakError::Underflow { bytes });
    }

    self.used -= bytes;

    Ok(())
  }
}

impl Drop for FixedBreak {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
  }
}

impl fmt::Debug for FixedBreak {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("FixedBreak")
      .field("base", &self.base)
      .field("capacity", &self.capacity)
      .field("used", &self.used)
      .field("grow_calls", &self.grow_calls)
      .field("shrink_calls", &self.shrink_calls)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fixed_break_moves_like_sbrk() {
    let mut brk = FixedBreak::with_capacity(100);

    assert_eq!(brk.capacity(), 112);
    assert_eq!(brk.base() as usize % ALIGNMENT, 0);
    assert_eq!(brk.current(), brk.base());

    unsafe {
      let first = brk.grow(32).unwrap();
      let second = brk.grow(48).unwrap();

      assert_eq!(first.as_ptr(), brk.base());
      assert_eq!(second.as_ptr(), brk.base().add(32));
      assert_eq!(brk.current(), brk.base().add(80));

      brk.shrink(48).unwrap();
      assert_eq!(brk.current(), brk.base().add(32));
    }

    assert_eq!(brk.used(), 32);
    assert_eq!(brk.grow_calls(), 2);
    assert_eq!(brk.shrink_calls(), 1);
  }

  #[test]
  fn test_fixed_break_exhaustion_leaves_break_alone() {
    let mut brk = FixedBreak::with_capacity(64);

    unsafe {
      brk.grow(48).unwrap();
      assert!(matches!(brk.grow(32), Err(BreakError::Exhausted(_))));
      assert!(matches!(brk.shrink(64), Err(BreakError::Underflow { bytes: 64 })));
    }

    assert_eq!(brk.used(), 48);
    assert_eq!(brk.grow_calls(), 2);
  }

  #[test]
  fn test_sbrk_rejects_oversized_increment() {
    let mut brk = Sbrk;

    // Refused before `sbrk` is ever called, so the process break is never
    // touched.
    let grown = unsafe { brk.grow(usize::MAX) };
    let shrunk = unsafe { brk.shrink(usize::MAX) };

    assert!(matches!(grown, Err(BreakError::TooLarge { bytes: usize::MAX })));
    assert!(matches!(shrunk, Err(BreakError::TooLarge { bytes: usize::MAX })));
  }

  #[test]
  fn test_break_error_display() {
    let error = BreakError::Underflow { bytes: 16 };
    assert_eq!(error.to_string(), "cannot shrink the heap by 16 bytes below its base");

    let error = BreakError::Exhausted(io::Error::from(io::ErrorKind::OutOfMemory));
    assert!(std::error::Error::source(&error).is_some());
  }
}
