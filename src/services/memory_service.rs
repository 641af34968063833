// Memory Management Service: physical frames, user address spaces and the
// memory limit guard applied to heap growth
use alloc::vec::Vec;
use x86_64::structures::paging::{PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

use crate::error::{KResult, KernelError};
use crate::param::{pg_round_up, KSTACKSIZE, PGSIZE, USERTOP};

/// First physical address handed out by the frame allocator.
const PHYS_BASE: u64 = 0x0010_0000;

/// Base of the direct map through which the kernel reaches physical memory.
const KERNBASE: u64 = 0xFFFF_8000_0000_0000;

/// Fixed pool of 4 KiB physical frames.
pub struct FrameAllocator {
    free_frames: Vec<PhysFrame<Size4KiB>>,
    total: usize,
}

impl FrameAllocator {
    pub fn new(frames: usize) -> Self {
        // Reversed so that pop() hands out the lowest address first
        let free_frames = (0..frames)
            .rev()
            .map(|i| PhysFrame::containing_address(PhysAddr::new(PHYS_BASE + (i * PGSIZE) as u64)))
            .collect();

        Self {
            free_frames,
            total: frames,
        }
    }

    /// Allocate one frame
    pub fn allocate(&mut self) -> KResult<PhysFrame<Size4KiB>> {
        self.free_frames.pop().ok_or(KernelError::OutOfMemory)
    }

    /// Return a frame to the pool
    pub fn deallocate(&mut self, frame: PhysFrame<Size4KiB>) {
        debug_assert!(!self.free_frames.contains(&frame), "kfree: double free");
        self.free_frames.push(frame);
    }

    pub fn free_count(&self) -> usize {
        self.free_frames.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// A kernel stack owned by exactly one process or thread.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelStack {
    frame: PhysFrame<Size4KiB>,
}

impl KernelStack {
    pub fn allocate(kmem: &mut FrameAllocator) -> KResult<Self> {
        kmem.allocate().map(|frame| Self { frame })
    }

    pub fn release(self, kmem: &mut FrameAllocator) {
        kmem.deallocate(self.frame);
    }

    /// Highest address of the stack, seen through the kernel direct map
    pub fn top(&self) -> VirtAddr {
        VirtAddr::new(KERNBASE + self.frame.start_address().as_u64() + KSTACKSIZE as u64)
    }
}

/// User memory of one process: a contiguous byte image starting at address 0,
/// backed by one frame per page.
///
/// Frames are not returned on drop; callers release them with `free`.
#[derive(Debug, Default)]
pub struct AddressSpace {
    data: Vec<u8>,
    frames: Vec<PhysFrame<Size4KiB>>,
}

impl AddressSpace {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Size of the image in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of pages currently backed by frames
    pub fn pages(&self) -> usize {
        self.frames.len()
    }

    /// Grow or shrink the image to `new_size` bytes.
    ///
    /// Growth allocates every missing frame before touching the image; if the
    /// pool runs dry the frames taken so far go back and nothing changes.
    pub fn resize(&mut self, kmem: &mut FrameAllocator, new_size: usize) -> KResult<()> {
        if new_size >= USERTOP {
            return Err(KernelError::OutOfMemory);
        }

        let wanted = pg_round_up(new_size) / PGSIZE;
        if wanted > self.frames.len() {
            let mut fresh = Vec::with_capacity(wanted - self.frames.len());
            for _ in self.frames.len()..wanted {
                match kmem.allocate() {
                    Ok(frame) => fresh.push(frame),
                    Err(e) => {
                        for frame in fresh {
                            kmem.deallocate(frame);
                        }
                        log::debug!("[MEM] growth to {} bytes failed: {}", new_size, e);
                        return Err(e);
                    }
                }
            }
            self.frames.extend(fresh);
        } else {
            while self.frames.len() > wanted {
                if let Some(frame) = self.frames.pop() {
                    kmem.deallocate(frame);
                }
            }
        }

        self.data.resize(new_size, 0);
        Ok(())
    }

    /// Copy this image into freshly allocated frames
    pub fn try_clone(&self, kmem: &mut FrameAllocator) -> KResult<Self> {
        let mut copy = Self::new();
        copy.resize(kmem, self.size())?;
        copy.data.copy_from_slice(&self.data);
        Ok(copy)
    }

    /// Release every frame and empty the image
    pub fn free(&mut self, kmem: &mut FrameAllocator) {
        for frame in self.frames.drain(..) {
            kmem.deallocate(frame);
        }
        self.data = Vec::new();
    }

    /// Check that `[addr, addr + len)` lies inside the image
    pub fn check_range(&self, addr: usize, len: usize) -> KResult<()> {
        match addr.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub fn read(&self, addr: usize, len: usize) -> KResult<&[u8]> {
        self.check_range(addr, len)?;
        Ok(&self.data[addr..addr + len])
    }

    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> KResult<()> {
        self.check_range(addr, bytes.len())?;
        self.data[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u32(&self, addr: usize) -> KResult<u32> {
        let bytes = self.read(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&mut self, addr: usize, value: u32) -> KResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Read a NUL-terminated string that must end inside the image
    pub fn read_cstr(&self, addr: usize) -> KResult<&str> {
        if addr >= self.size() {
            return Err(KernelError::InvalidArgument);
        }
        let tail = &self.data[addr..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(KernelError::InvalidArgument)?;
        core::str::from_utf8(&tail[..len]).map_err(|_| KernelError::InvalidArgument)
    }
}

/// Size after a heap growth request of `n` bytes, or why it is refused.
///
/// A nonzero `limit` is a hard ceiling. The check happens before any frame
/// is allocated.
pub fn checked_growth(size: usize, n: isize, limit: usize) -> KResult<usize> {
    let new_size = if n >= 0 {
        size.checked_add(n as usize)
    } else {
        size.checked_sub(n.unsigned_abs())
    }
    .ok_or(KernelError::InvalidArgument)?;

    if limit > 0 && new_size > limit {
        return Err(KernelError::MemoryLimitExceeded);
    }
    Ok(new_size)
}

/// A freshly built program image, not yet installed in any process.
pub struct LoadedImage {
    pub memory: AddressSpace,
    pub stack_pointer: usize,
    pub argc: usize,
    pub argv: usize,
}

/// Lay out `text`, one guard page and `stack_pages` of stack, then push the
/// argument strings and the argv pointer array onto the stack.
pub fn load_image(
    kmem: &mut FrameAllocator,
    text: &[u8],
    argv: &[&str],
    stack_pages: usize,
    limit: usize,
) -> KResult<LoadedImage> {
    let stack_base = pg_round_up(text.len()) + PGSIZE;
    let size = stack_base + stack_pages * PGSIZE;
    if limit > 0 && size > limit {
        return Err(KernelError::MemoryLimitExceeded);
    }

    let mut memory = AddressSpace::new();
    memory.resize(kmem, size)?;
    match push_arguments(&mut memory, text, argv, stack_base) {
        Ok((stack_pointer, argv_ptr)) => Ok(LoadedImage {
            memory,
            stack_pointer,
            argc: argv.len(),
            argv: argv_ptr,
        }),
        Err(e) => {
            memory.free(kmem);
            Err(e)
        }
    }
}

fn push_arguments(
    memory: &mut AddressSpace,
    text: &[u8],
    argv: &[&str],
    stack_base: usize,
) -> KResult<(usize, usize)> {
    memory.write(0, text)?;

    let mut sp = memory.size();
    let mut ustack: Vec<u32> = Vec::with_capacity(argv.len() + 1);
    for arg in argv {
        sp = sp
            .checked_sub(arg.len() + 1)
            .filter(|&sp| sp >= stack_base)
            .ok_or(KernelError::InvalidArgument)?
            & !3;
        if sp < stack_base {
            return Err(KernelError::InvalidArgument);
        }
        memory.write(sp, arg.as_bytes())?;
        memory.write(sp + arg.len(), &[0])?;
        ustack.push(sp as u32);
    }
    ustack.push(0);

    // argv array, then a fake return address
    let array_len = ustack.len() * 4 + 4;
    sp = sp
        .checked_sub(array_len)
        .filter(|&sp| sp >= stack_base)
        .ok_or(KernelError::InvalidArgument)?;
    memory.write_u32(sp, 0xFFFF_FFFF)?;
    let argv_ptr = sp + 4;
    for (i, ptr) in ustack.iter().enumerate() {
        memory.write_u32(argv_ptr + 4 * i, *ptr)?;
    }

    Ok((sp, argv_ptr))
}
