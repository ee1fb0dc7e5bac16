use std::{io::Read, ptr};

use brkalloc::{FreeListAllocator, HEADER_SIZE};
use libc::sbrk;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_allocation(
  size: usize,
  address: *mut u8,
) {
  println!(
    "Allocated {} bytes (+{} header), address = {:?}, program break = {:?}",
    size,
    HEADER_SIZE,
    address,
    unsafe { sbrk(0) }
  );
}

fn main() {
  env_logger::init();

  // The allocator keeps a list of every block it carved from the heap:
  // - blocks in use
  // - blocks released in the middle of the heap, waiting to be reused
  // The last block goes straight back to the OS when it's released.
  let allocator = FreeListAllocator::new();

  unsafe {
    // Initial heap state
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate space for a u32.
    // --------------------------------------------------------------------
    let first_block = allocator.allocate(size_of::<u32>());
    println!("\n[1] Allocate u32");
    print_allocation(size_of::<u32>(), first_block);

    // Write something into the allocated memory to show it's usable.
    let first_ptr = first_block as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 bytes.
    //    Odd sizes are padded so the next header stays aligned.
    // --------------------------------------------------------------------
    let second_block = allocator.allocate(12);
    println!("\n[2] Allocate [u8; 12]");
    print_allocation(12, second_block);

    ptr::write_bytes(second_block, 0xAB, 12);
    println!("[2] Initialized second block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate a zeroed array of u64 and check the alignment.
    // --------------------------------------------------------------------
    let third_block = allocator.allocate_zeroed(4, size_of::<u64>());
    println!("\n[3] Allocate zeroed [u64; 4] (observe alignment)");
    print_allocation(4 * size_of::<u64>(), third_block);

    let third_ptr = third_block as *mut u64;
    println!("[3] Values = {:?}", std::slice::from_raw_parts(third_ptr, 4));
    println!(
      "[3] Address = {:#X}, addr % 16 = {}",
      third_block as usize,
      third_block as usize % 16
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Release the first block.
    //    It isn't the last block of the heap, so it's only marked free.
    // --------------------------------------------------------------------
    allocator.release(first_block);
    println!("\n[4] Released first_block at {:?}", first_block);
    allocator.print_blocks();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Allocate a small block (2 bytes) to see the freed block reused.
    // --------------------------------------------------------------------
    let fourth_block = allocator.allocate(2);
    println!("\n[5] Allocate [u8; 2] (check reuse of freed block)");
    print_allocation(2, fourth_block);

    println!(
      "[5] fourth_block == first_block? {}",
      if fourth_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Grow the zeroed array. It doesn't fit, so it moves.
    // --------------------------------------------------------------------
    let grown = allocator.reallocate(third_block, 64 * size_of::<u64>());
    println!("\n[6] Reallocate [u64; 4] -> [u64; 64]: {:?} -> {:?}", third_block, grown);
    allocator.print_blocks();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Allocate a large block and release it right away.
    //    It's the last block, so the program break goes back down.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_block = allocator.allocate(64 * 1024);
    println!("\n[7] Allocate large 64 KiB block");
    print_allocation(64 * 1024, big_block);
    print_program_break("after large alloc");

    allocator.release(big_block);
    print_program_break("after large release");

    block_until_enter_pressed();

    println!("\n[8] {:?}", allocator.stats());
    println!("[8] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
