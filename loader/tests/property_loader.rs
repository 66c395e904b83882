//! Property 2: Load contract
//!
//! Builder-produced images load at any base with entry = base + text
//! offset; a flipped stored byte never produces a partial load; repeated
//! loads are deterministic and each one is registered.

mod common;

use common::RecordingSpace;
use kpio_loader::config::HEADER_SIZE;
use kpio_loader::layout::ArgumentHeader;
use kpio_loader::{
    ImageBuilder, ImageLoader, LoadError, LoadOptions, MemorySource, SegmentKind,
};
use proptest::prelude::*;

fn arb_builder() -> impl Strategy<Value = ImageBuilder> {
    (
        proptest::collection::vec(any::<u8>(), 1..0x800),
        proptest::collection::vec(any::<u8>(), 1..0x400),
        proptest::collection::vec(any::<u8>(), 1..0x400),
        0u32..0x4000,
        any::<[bool; 3]>(),
    )
        .prop_map(|(text, rodata, data, bss, compress)| {
            let mut builder = ImageBuilder::new()
                .text(text)
                .rodata(rodata)
                .data(data)
                .bss_size(bss)
                .check_all_hashes(true);
            for kind in SegmentKind::ALL {
                builder = builder.compress(kind, compress[kind.index()]);
            }
            builder
        })
}

fn arb_base() -> impl Strategy<Value = u64> {
    (0x10u64..0x10_0000).prop_map(|page| page << 12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Valid images load and enter at base + text offset.
    #[test]
    fn entry_point_is_base_plus_text_offset(builder in arb_builder(), base in arb_base()) {
        let (header, image) = builder.build_with_header().unwrap();
        let source = MemorySource::new("main", image);
        let mut space = RecordingSpace::new();

        let module = ImageLoader::default()
            .load_module(&mut space, &source, base, LoadOptions::new())
            .unwrap();

        let text_offset = header.segment(SegmentKind::Code).memory_offset as u64;
        prop_assert_eq!(module.entry_point, base + text_offset);
        prop_assert_eq!(space.commits.len(), 3);
    }

    /// Flipping any stored segment byte fails the load and commits nothing.
    #[test]
    fn flipped_byte_is_rejected(
        builder in arb_builder(),
        pick in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (_, mut image) = builder.build_with_header().unwrap();
        let body = image.len() - HEADER_SIZE;
        let offset = HEADER_SIZE + pick.index(body);
        image[offset] ^= 1 << bit;

        let loader = ImageLoader::default();
        let source = MemorySource::new("main", image);
        let mut space = RecordingSpace::new();

        let err = loader
            .load_module(&mut space, &source, 0x8000_0000, LoadOptions::new())
            .unwrap_err();

        prop_assert!(matches!(
            err,
            LoadError::Validation(_) | LoadError::Decompression { .. }
        ), "unexpected error: {:?}", err);
        prop_assert!(space.commits.is_empty());
        prop_assert!(loader.modules().is_empty());
    }

    /// Loading the same image twice is deterministic and registers twice.
    #[test]
    fn repeated_load_registers_twice(builder in arb_builder(), base in arb_base()) {
        let loader = ImageLoader::default();
        let source = MemorySource::new("main", builder.build().unwrap());

        let first = loader
            .load_module(&mut RecordingSpace::new(), &source, base, LoadOptions::new())
            .unwrap();
        let second = loader
            .load_module(&mut RecordingSpace::new(), &source, base, LoadOptions::new())
            .unwrap();

        prop_assert_eq!(first, second);
        let modules = loader.modules();
        prop_assert_eq!(modules.len(), 2);
        prop_assert!(modules.iter().all(|m| m.address == base && m.name == "main"));
    }

    /// Argument blocks report the fixed capacity and the supplied length.
    #[test]
    fn argument_header_reports_length(args in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let image = ImageBuilder::new().text(vec![0u8; 16]).build().unwrap();
        let source = MemorySource::new("main", image);
        let mut space = RecordingSpace::new();

        let module = ImageLoader::default()
            .load_module(&mut space, &source, 0x8000_0000, LoadOptions::new().with_arguments(&args))
            .unwrap();

        let address = module.argument_address.unwrap();
        let block = space.inner.read(address, 0x20 + args.len()).unwrap();
        let header = ArgumentHeader::parse(block).unwrap();
        prop_assert_eq!(header.allocated_size, 36_832);
        prop_assert_eq!(header.actual_size as usize, args.len());
        prop_assert_eq!(&block[0x20..], &args[..]);
    }
}
