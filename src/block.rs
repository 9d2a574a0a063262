// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-size memory blocks backing chunks.
//!
//! Two size classes only. Blocks come from the global allocator, zeroed and
//! cache-line aligned; the first [`MEM_BLOCK_USABLE_OFFSET`] bytes are
//! reserved.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Block size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemBlockSize {
    /// 8 KiB block
    Small = 0,
    /// 16 KiB block
    Big = 1,
}

/// 8 KiB block size in bytes.
pub const MEM_BLOCK_SIZE_SMALL: usize = 8 * 1024;
/// 16 KiB block size in bytes.
pub const MEM_BLOCK_SIZE_BIG: usize = 16 * 1024;
/// Bytes reserved at the front of every block.
pub const MEM_BLOCK_USABLE_OFFSET: usize = 16;

const BLOCK_ALIGN: usize = 64;

/// Block size in bytes for a size class.
pub const fn mem_block_size(class: MemBlockSize) -> usize {
    match class {
        MemBlockSize::Small => MEM_BLOCK_SIZE_SMALL,
        MemBlockSize::Big => MEM_BLOCK_SIZE_BIG,
    }
}

impl MemBlockSize {
    pub const fn bytes(self) -> usize {
        mem_block_size(self)
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MemBlockSize::Small,
            1 => MemBlockSize::Big,
            _ => panic!("invalid block size class"),
        }
    }
}

/// Two-class block allocator over the global allocator.
#[derive(Debug, Default)]
pub struct BlockAllocator {
    allocated: [usize; 2],
    freed: [usize; 2],
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one zeroed block of the given class.
    pub fn alloc(&mut self, class: MemBlockSize) -> NonNull<u8> {
        let layout = Self::layout(class);
        // SAFETY: layout has non-zero size and valid alignment.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        self.allocated[class as usize] += 1;
        ptr
    }

    /// Return a block to the allocator.
    ///
    /// # Safety
    /// `ptr` must come from [`BlockAllocator::alloc`] with the same class and
    /// must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, class: MemBlockSize) {
        dealloc(ptr.as_ptr(), Self::layout(class));
        self.freed[class as usize] += 1;
    }

    /// Blocks currently live for a class.
    pub fn live_blocks(&self, class: MemBlockSize) -> usize {
        self.allocated[class as usize] - self.freed[class as usize]
    }

    /// Total blocks ever allocated for a class.
    pub fn total_allocated(&self, class: MemBlockSize) -> usize {
        self.allocated[class as usize]
    }

    fn layout(class: MemBlockSize) -> Layout {
        // Size and alignment are compile-time valid.
        Layout::from_size_align(mem_block_size(class), BLOCK_ALIGN).unwrap()
    }
}
