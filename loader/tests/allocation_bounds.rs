//! Header size fields never drive allocations on their own.
//!
//! A container of a few hundred bytes can declare multi-gigabyte segment and
//! bss sizes. Loading it must fail without the loader ever requesting an
//! allocation anywhere near those sizes.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use kpio_loader::{
    DecompressionError, ImageBuilder, ImageLoader, LoadError, LoadOptions, MemoryError,
    MemorySource, Permission, SegmentKind, SparseAddressSpace,
};

struct PeakAlloc;

static LARGEST_ALLOCATION: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for PeakAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        LARGEST_ALLOCATION.fetch_max(layout.size(), Ordering::SeqCst);
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        LARGEST_ALLOCATION.fetch_max(layout.size(), Ordering::SeqCst);
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        LARGEST_ALLOCATION.fetch_max(new_size, Ordering::SeqCst);
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL_ALLOC: PeakAlloc = PeakAlloc;

/// Tests in this file share the peak counter.
static SERIAL: Mutex<()> = Mutex::new(());

/// Upper bound for any single allocation while loading a tiny container.
const ALLOCATION_LIMIT: usize = 0x10_0000;

fn largest_allocation_during<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    LARGEST_ALLOCATION.store(0, Ordering::SeqCst);
    let result = f();
    (result, LARGEST_ALLOCATION.load(Ordering::SeqCst))
}

#[test]
fn test_declared_segment_size_beyond_lz4_ratio() {
    let (mut header, mut image) = ImageBuilder::new()
        .text(vec![0x90u8; 16])
        .compress(SegmentKind::Code, true)
        .memory_offset(SegmentKind::ReadOnlyData, 0xFFFF_0000)
        .memory_offset(SegmentKind::Data, 0xFFFF_0000)
        .build_with_header()
        .unwrap();
    header.segments[0].size = 0xFFFF_0000;
    image[..0x100].copy_from_slice(&header.to_bytes());
    let stored = header.compressed_size(SegmentKind::Code) as usize;
    let source = MemorySource::new("main", image);

    let (result, largest) = largest_allocation_during(|| {
        let mut space = SparseAddressSpace::new(0x1000, 0x0000_7FFF_FFFF_F000);
        ImageLoader::default().load_module(&mut space, &source, 0x8000_0000, LoadOptions::new())
    });

    assert_eq!(
        result,
        Err(LoadError::Decompression {
            segment: SegmentKind::Code,
            source: DecompressionError::SizeExceedsBound {
                expected: 0xFFFF_0000,
                stored,
            },
        })
    );
    assert!(largest < ALLOCATION_LIMIT, "largest allocation {largest:#x}");
}

#[test]
fn test_huge_bss_refused_without_allocation() {
    let image = ImageBuilder::new()
        .text(vec![0xC3u8; 0x100])
        .rodata(vec![0x52u8; 0x10])
        .data(vec![0xDAu8; 0x10])
        .bss_size(0xF000_0000)
        .build()
        .unwrap();
    let source = MemorySource::new("main", image);

    let (result, largest) = largest_allocation_during(|| {
        let mut space = SparseAddressSpace::new(0x1000, 0x10_0000);
        ImageLoader::default().load_module(&mut space, &source, 0x1000, LoadOptions::new())
    });

    assert_eq!(
        result,
        Err(LoadError::Memory(MemoryError::Unavailable {
            address: 0x3000,
            len: 0xF000_0010,
            permission: Permission::READ_WRITE,
        }))
    );
    assert!(largest < ALLOCATION_LIMIT, "largest allocation {largest:#x}");
}
