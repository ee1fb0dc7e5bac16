/// Boundary every payload handed out by the allocator starts on, regardless
/// of the platform pointer width.
pub const ALIGNMENT: usize = 16;

/// Calculates the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use brkalloc::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::std::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to the next multiple of `unit`, which must be a power
/// of two. Overflows like regular addition does, so callers that take sizes
/// from the outside should check with [`checked_align_to`] first.
///
/// # Examples
///
/// ```rust
/// use brkalloc::{ALIGNMENT, align_to};
///
/// assert_eq!(align_to!(1, ALIGNMENT), 16);
/// assert_eq!(align_to!(16, ALIGNMENT), 16);
/// assert_eq!(align_to!(17, ALIGNMENT), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $unit:expr) => {
    ($value + $unit - 1) & !($unit - 1)
  };
}

/// Same as [`align_to!`] but returns `None` instead of wrapping around the
/// address space.
#[inline]
pub const fn checked_align_to(
  value: usize,
  unit: usize,
) -> Option<usize> {
  match value.checked_add(unit - 1) {
    Some(padded) => Some(padded & !(unit - 1)),
    None => None,
  }
}
