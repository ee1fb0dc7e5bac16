//! Read-only views of the block list, for debugging. Nothing here mutates
//! allocator state.

use std::fmt;

use crate::{block::Block, list::BlockList};

/// One header as it looked when the snapshot was taken. Addresses are plain
/// numbers, with `0` standing for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the header, not of the payload.
  pub address: usize,
  pub size: usize,
  pub is_free: bool,
  pub next: usize,
}

impl BlockInfo {
  /// # Safety
  ///
  /// `block` must point to a valid header.
  unsafe fn read(block: *mut Block) -> Self {
    unsafe {
      Self {
        address: block as usize,
        size: (*block).size,
        is_free: (*block).is_free,
        next: (*block).next as usize,
      }
    }
  }

  pub(crate) fn collect(list: &BlockList) -> Vec<Self> {
    list.iter().map(|block| unsafe { Self::read(block) }).collect()
  }

  /// Address handed out to the caller for this block.
  pub fn payload(&self) -> usize {
    self.address + crate::block::HEADER_SIZE
  }
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "addr = {:#x}, size = {}, is_free = {}, next = {:#x}",
      self.address, self.size, self.is_free, self.next
    )
  }
}

/// The whole list, head to tail.
///
/// ```text
///   head = 0x5555_5555_a000, tail = 0x5555_5555_a030
///   addr = 0x5555_5555_a000, size = 10, is_free = true, next = 0x5555_5555_a030
///   addr = 0x5555_5555_a030, size = 20, is_free = false, next = 0x0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapDump {
  pub head: usize,
  pub tail: usize,
  pub blocks: Vec<BlockInfo>,
}

impl HeapDump {
  pub(crate) fn collect(list: &BlockList) -> Self {
    Self {
      head: list.head() as usize,
      tail: list.tail() as usize,
      blocks: BlockInfo::collect(list),
    }
  }
}

impl fmt::Display for HeapDump {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "head = {:#x}, tail = {:#x}", self.head, self.tail)?;

    for block in &self.blocks {
      writeln!(f, "{block}")?;
    }

    Ok(())
  }
}

/// Totals over the block list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Blocks in the list, free or not.
  pub blocks: usize,
  pub free_blocks: usize,
  /// Payload bytes of blocks in use, as requested.
  pub allocated_bytes: usize,
  /// Payload bytes of free blocks, as originally requested.
  pub free_bytes: usize,
  /// Bytes the list spans in the heap, headers and padding included.
  pub heap_bytes: usize,
}

impl HeapStats {
  pub(crate) fn collect(list: &BlockList) -> Self {
    let empty = Self {
      blocks: list.len(),
      ..Self::default()
    };

    list.iter().fold(empty, |mut stats, block| {
      let (size, is_free, footprint) =
        unsafe { ((*block).size, (*block).is_free, Block::footprint(block)) };

      stats.heap_bytes += footprint;

      if is_free {
        stats.free_blocks += 1;
        stats.free_bytes += size;
      } else {
        stats.allocated_bytes += size;
      }

      stats
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{FixedBreak, FreeListAllocator, block::HEADER_SIZE};

  #[test]
  fn test_dump_lists_blocks_in_address_order() {
    let allocator = FreeListAllocator::with_break(FixedBreak::with_capacity(1024));

    unsafe {
      let first = allocator.allocate(10);
      let second = allocator.allocate(20);
      allocator.release(first);

      let dump = allocator.dump();

      assert_eq!(dump.blocks.len(), 2);
      assert_eq!(dump.head, dump.blocks[0].address);
      assert_eq!(dump.tail, dump.blocks[1].address);
      assert_eq!(dump.blocks[0].payload(), first as usize);
      assert_eq!(dump.blocks[1].payload(), second as usize);
      assert_eq!(dump.blocks[0].next, dump.blocks[1].address);
      assert_eq!(dump.blocks[1].next, 0);
      assert!(dump.blocks[0].is_free);
      assert!(!dump.blocks[1].is_free);

      let text = dump.to_string();
      let lines: Vec<&str> = text.lines().collect();
      assert_eq!(lines.len(), 3);
      assert_eq!(lines[0], format!("head = {:#x}, tail = {:#x}", dump.head, dump.tail));
      assert_eq!(
        lines[2],
        format!("addr = {:#x}, size = 20, is_free = false, next = 0x0", dump.tail)
      );
    }
  }

  #[test]
  fn test_blocks_snapshot_matches_dump() {
    let allocator = FreeListAllocator::with_break(FixedBreak::with_capacity(1024));

    assert!(allocator.blocks().is_empty());

    unsafe {
      let first = allocator.allocate(24);
      let _second = allocator.allocate(8);
      allocator.release(first);
    }

    let blocks = allocator.blocks();

    assert_eq!(blocks, allocator.dump().blocks);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].size, 24);
    assert!(blocks[0].is_free);
    assert_eq!(blocks[0].next, blocks[1].address);
    assert_eq!(blocks[1].size, 8);
    assert!(!blocks[1].is_free);
    assert_eq!(blocks[1].next, 0);
  }

  #[test]
  fn test_stats_totals() {
    let allocator = FreeListAllocator::with_break(FixedBreak::with_capacity(1024));

    assert_eq!(allocator.stats(), HeapStats::default());

    unsafe {
      let first = allocator.allocate(10);
      let _second = allocator.allocate(40);
      allocator.release(first);
    }

    let stats = allocator.stats();

    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, 10);
    assert_eq!(stats.allocated_bytes, 40);
    assert_eq!(stats.heap_bytes, HEADER_SIZE * 2 + 16 + 48);
    assert_eq!(stats.heap_bytes, allocator.inspect_break(|brk| brk.used()));
  }
}
