use bufheap::{Error, Heap};

mod common;

#[test]
fn create_rejects_bad_capacities() {
    common::init_tracing();
    // header and one minimal block: 11 words
    assert!(Heap::<Vec<u8>>::create(vec![0; 44]).is_ok());
    assert!(matches!(
        Heap::<Vec<u8>>::create(vec![0; 43]),
        Err(Error::InvalidCapacity {
            capacity: 40,
            min: 44,
            ..
        })
    ));
    assert!(matches!(
        Heap::<Vec<u8>, u64>::create(vec![0; 80]),
        Err(Error::InvalidCapacity { min: 88, .. })
    ));
    assert!(matches!(
        Heap::<Vec<u8>, u16>::create(vec![0; 70_000]),
        Err(Error::InvalidCapacity { max: 0xfffe, .. })
    ));
}

#[test]
fn capacity_is_rounded_to_words() {
    let heap = Heap::<Vec<u8>>::create(vec![0; 1023]).unwrap();
    assert_eq!(heap.capacity(), 1020);
    assert_eq!(heap.free_sizes(), [1020 - 16 - 12]);
    assert_eq!(heap.storage().len(), 1023);
}

#[test]
fn open_rejects_foreign_buffers() {
    assert!(matches!(
        Heap::<Vec<u8>>::open(vec![0; 8]),
        Err(Error::InvalidHeader(_))
    ));
    // all zeroes: the capacity is zero
    assert!(matches!(
        Heap::<Vec<u8>>::open(vec![0; 256]),
        Err(Error::InvalidHeader(_))
    ));
    assert!(matches!(
        Heap::<Vec<u8>>::open(vec![0xff; 256]),
        Err(Error::InvalidHeader(_))
    ));

    // a heap written with 16 bit words is no heap with 32 bit words
    let storage = Heap::<Vec<u8>, u16>::create(vec![0; 256]).unwrap().into_storage();
    assert!(Heap::<Vec<u8>, u32>::open(storage.clone()).is_err());
    assert!(Heap::<Vec<u8>, u16>::open(storage).is_ok());
}

#[test]
fn realloc_is_not_supported() {
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 256]).unwrap();
    let address = heap.alloc(8).unwrap();
    let error = heap.realloc(address, 64).unwrap_err();
    assert!(matches!(error, Error::Unsupported("realloc")));
    assert_eq!(error.to_string(), "realloc is not supported");
    assert!(!error.is_recoverable());
}

#[test]
fn record_round_trips() {
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 256]).unwrap();
    assert_eq!(heap.record(), 0);
    heap.set_record(0xdead_beef).unwrap();
    assert_eq!(heap.record(), 0xdead_beef);
    assert_eq!(&heap.storage()[8..12], &0xdead_beef_u32.to_le_bytes());
}

#[test]
fn accessors_are_bounds_checked() {
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 64]).unwrap();
    assert!(heap.read_word(60).is_ok());
    assert!(matches!(
        heap.read_word(61),
        Err(Error::OutOfBounds {
            offset: 61,
            len: 4,
            capacity: 64
        })
    ));
    assert!(heap.write_word(usize::MAX - 1, 0).is_err());
    assert!(heap.bytes(0, 65).is_err());
    assert_eq!(heap.bytes(60, 4).unwrap().len(), 4);
    assert!(heap.bytes_mut(64, 1).is_err());
    assert!(heap.bytes_mut(64, 0).unwrap().is_empty());
    // the footer at 60 announces 16 bytes, which would run past the end
    assert!(heap.read_prefixed(60).is_err());
}

#[test]
fn exhaustion_is_recoverable() {
    common::init_tracing();
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 128]).unwrap();
    let error = heap.alloc(200).unwrap_err();
    assert!(error.is_recoverable());
    assert_eq!(error.to_string(), "no free block of at least 200 bytes");
    heap.alloc(100).unwrap();
}

#[test]
fn invalid_frees_change_nothing() {
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 256]).unwrap();
    let a = heap.alloc(16).unwrap();
    let b = heap.alloc(16).unwrap();
    let before = heap.storage().clone();

    for address in [0, 3, a + 4, b + 16, 256, usize::MAX] {
        let error = heap.free(address).unwrap_err();
        assert!(matches!(error, Error::InvalidAddress { .. }), "{address}: {error}");
    }
    assert_eq!(heap.storage(), &before);

    heap.free(a).unwrap();
    assert!(matches!(heap.free(a), Err(Error::DoubleFree { address }) if address == a));
    heap.check().unwrap();
}

#[test]
fn double_free_is_caught_after_coalescing() {
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 256]).unwrap();
    let a = heap.alloc(16).unwrap();
    let b = heap.alloc(16).unwrap();
    let c = heap.alloc(16).unwrap();
    let _guard = heap.alloc(16).unwrap();
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    // merges with both neighbours
    heap.free(b).unwrap();
    let stats = heap.check().unwrap();

    let before = heap.storage().clone();
    let error = heap.free(b).unwrap_err();
    assert!(matches!(error, Error::DoubleFree { address } if address == b));
    assert_eq!(heap.storage(), &before);
    assert_eq!(heap.check().unwrap(), stats);
}

#[test]
fn prefixed_len_saturates() {
    assert_eq!(Heap::<Vec<u8>>::prefixed_len(10), 14);
    assert_eq!(Heap::<Vec<u8>, u64>::prefixed_len(usize::MAX - 3), usize::MAX);
    let mut heap = Heap::<Vec<u8>>::create(vec![0; 128]).unwrap();
    assert!(matches!(
        heap.alloc(Heap::<Vec<u8>>::prefixed_len(usize::MAX)),
        Err(Error::AllocFailed { requested: usize::MAX })
    ));
}

#[test]
fn format_unchecked_gives_an_empty_tree() {
    let mut heap = Heap::<Vec<u8>>::format_unchecked(vec![0; 128]).unwrap();
    assert!(heap.free_sizes().is_empty());
    assert!(heap.alloc(4).is_err());

    // build a free-tree by hand
    let buffer = heap.raw_mut().buffer_mut();
    for (node, key) in [(16, 40), (40, 20), (64, 30)] {
        buffer.add_at(bufheap::raw_allocator::node::Node(node), key);
    }
    assert_eq!(heap.free_sizes(), [20, 30, 40]);
    let shape = heap.raw().buffer().check_tree().unwrap();
    assert_eq!((shape.nodes, shape.height), (3, 2));
}
