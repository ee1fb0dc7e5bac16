//! # brkalloc - A Free List Memory Allocator
//!
//! This crate provides a first-fit **free list allocator** that carves its
//! blocks out of a single contiguous heap region grown with the `sbrk` system
//! call, and reuses freed blocks instead of handing them back to the OS.
//!
//! ## Overview
//!
//! Memory in the middle of the heap can't be returned to the operating
//! system, only the end of it can. So every block keeps a small header and
//! all headers are chained in address order:
//!
//! ```text
//!   Free List Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌─────┬─────┬─────┬─────┬───────────────────────────────────────┐  │
//!   │   │ A1  │free │ A3  │ A4  │         Not yet requested             │  │
//!   │   └─────┴─────┴─────┴─────┴───────────────────────────────────────┘  │
//!   │   ▲           ▲     ▲     ▲                                          │
//!   │   │           │     │     │                                          │
//!   │  head       reuse  tail  Program                                     │
//!   │           candidate      Break                                       │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: reuse the first free block that fits, else grow the break.
//!   release:  shrink the break if the block is the last one, else mark free.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment macros (align!, align_to!) and ALIGNMENT
//!   ├── block      - Block header and header/payload conversions
//!   ├── brk        - HeapBreak trait, Sbrk and FixedBreak backends
//!   ├── list       - Address-ordered block list (internal)
//!   ├── allocator  - FreeListAllocator implementation
//!   └── inspect    - Read-only dumps and statistics
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brkalloc::FreeListAllocator;
//!
//! fn main() {
//!     let allocator = FreeListAllocator::new();
//!
//!     unsafe {
//!         // Allocate memory for a u64
//!         let ptr = allocator.allocate(8) as *mut u64;
//!
//!         // Use the memory
//!         *ptr = 42;
//!         println!("Value: {}", *ptr);
//!
//!         // Free the memory
//!         allocator.release(ptr as *mut u8);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! The allocator uses `sbrk(2)` to extend the program's data segment:
//!
//! ```text
//!   Program Memory Layout:
//!
//!   High Address ┌─────────────────────┐
//!                │       Stack         │ ↓ grows down
//!                │         │           │
//!                │         ▼           │
//!                │                     │
//!                │         ▲           │
//!                │         │           │
//!                │       Heap          │ ↑ grows up (sbrk)
//!                ├─────────────────────┤ ← Program Break
//!                │   Uninitialized     │
//!                │       Data          │
//!                ├─────────────────────┤
//!                │   Initialized       │
//!                │       Data          │
//!                ├─────────────────────┤
//!                │       Text          │
//!   Low Address  └─────────────────────┘
//! ```
//!
//! Each allocation creates a block with metadata:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: false  │  │  │                          │  │
//!   │  │ next: null/ptr  │  │  │  N bytes, padded to 16   │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │   32 bytes (64 bit)   │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user, 16-byte aligned
//! ```
//!
//! ## Features
//!
//! - **Four classic operations**: allocate, release, allocate_zeroed, reallocate
//! - **First-fit reuse**: freed blocks are handed out again before growing
//! - **Tail shrinking**: the last block goes back to the OS when released
//! - **Thread safe**: one lock serializes every operation
//! - **Pluggable break**: run over `sbrk` or over a private [`FixedBreak`]
//! - **Global allocator**: implements [`std::alloc::GlobalAlloc`]
//!
//! ## Limitations
//!
//! - **No splitting or coalescing**: a reused block keeps its original size
//! - **Limited deallocation**: only the last block can be freed to the OS
//! - **Fixed alignment**: nothing above [`ALIGNMENT`] bytes
//! - **Null on failure**: a zero-size request and an exhausted heap look the same
//! - **Unix-only**: [`Sbrk`] requires `libc` and `sbrk` (POSIX systems)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! All allocation and deallocation operations require `unsafe` blocks, and
//! releasing a pointer this allocator didn't hand out is undefined behaviour.

pub mod align;
mod allocator;
mod block;
mod brk;
mod inspect;
mod list;

pub use align::{ALIGNMENT, checked_align_to};
pub use allocator::FreeListAllocator;
pub use block::HEADER_SIZE;
pub use brk::{BreakError, FixedBreak, HeapBreak, Sbrk};
pub use inspect::{BlockInfo, HeapDump, HeapStats};
pub use list::ListError;
