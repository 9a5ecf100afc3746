// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use cork::cycle::{CycleCollector, ErasedGc, Gc, Trace};
use cork::{Buf, BufSink, Mempool, Slice, StreamConsumer};
use std::cell::RefCell;

#[test]
fn buf_round_trips_through_managed_buffer_and_slice() {
    let mut buf = Buf::new();
    buf.append(b"header:").unwrap();
    buf.append(b"payload").unwrap();
    assert_eq!(buf.len(), 14);

    let managed = buf.seal();
    assert_eq!(managed.strong_count(), 1);

    let header_slice = managed.slice(0, 7).unwrap();
    let payload_slice = managed.slice(7, 7).unwrap();
    assert_eq!(managed.strong_count(), 3, "two outstanding slices plus the buffer itself");

    assert_eq!(header_slice.bytes(), b"header:");
    assert_eq!(payload_slice.bytes(), b"payload");

    drop(header_slice);
    drop(payload_slice);
    assert_eq!(managed.strong_count(), 1);
}

#[test]
fn stream_consumer_accumulates_episodes_from_slices() {
    let chunks = [b"first ".as_slice(), b"second ".as_slice(), b"third".as_slice()];
    let mut target = Buf::new();
    let mut sink = BufSink::new(&mut target);
    for (i, chunk) in chunks.iter().enumerate() {
        sink.data(&Slice::from_static(chunk), i == 0).unwrap();
    }
    sink.eof().unwrap();
    assert_eq!(target.as_slice(), b"first second third");

    // A fresh episode discards the previous one's accumulated bytes.
    sink.data(&Slice::from_static(b"restarted"), true).unwrap();
    assert_eq!(target.as_slice(), b"restarted");
}

#[test]
fn copy_once_slice_defers_allocation_until_narrowed() {
    static BACKING: &[u8] = b"a shared, static backing region";
    let mut slice = Slice::from_copy_once(BACKING);
    assert!(!slice.is_promoted());

    // Reading the whole thing, or equality, never touches the heap.
    assert_eq!(slice.bytes(), BACKING);
    assert!(!slice.is_promoted());

    let sub = slice.copy(2, 6).unwrap();
    assert!(slice.is_promoted());
    assert_eq!(sub.bytes(), &BACKING[2..8]);
}

#[test]
fn mempool_reuses_slots_without_running_init_twice() {
    let mut pool = Mempool::<[u64; 4]>::new(size_of::<[u64; 4]>() * 3);
    let a = pool.acquire([1; 4]);
    let b = pool.acquire([2; 4]);
    drop(a);
    let c = pool.acquire([3; 4]);
    assert_eq!(*c.get(), [3; 4]);
    drop(b);
    drop(c);
    pool.done();
}

struct TreeNode {
    children: RefCell<Vec<Gc<TreeNode>>>,
}

impl Trace for TreeNode {
    fn trace(&self, visitor: &mut dyn FnMut(&dyn ErasedGc)) {
        for child in self.children.borrow().iter() {
            visitor(child);
        }
    }
}

#[test]
fn acyclic_tree_collects_without_an_explicit_collect_call() {
    let collector = CycleCollector::new();
    let leaf_a = collector.alloc(TreeNode { children: RefCell::new(Vec::new()) }).unwrap();
    let leaf_b = collector.alloc(TreeNode { children: RefCell::new(Vec::new()) }).unwrap();
    let root = collector.alloc(TreeNode { children: RefCell::new(vec![leaf_a, leaf_b]) }).unwrap();
    assert_eq!(collector.live_count(), 3);

    drop(root);
    assert_eq!(collector.live_count(), 0, "an acyclic graph frees immediately on drop, no collect() needed");
}

#[test]
fn diamond_shaped_graph_with_external_reference_survives_collect() {
    let collector = CycleCollector::new();
    let shared = collector.alloc(TreeNode { children: RefCell::new(Vec::new()) }).unwrap();
    let left = collector.alloc(TreeNode { children: RefCell::new(vec![shared.clone()]) }).unwrap();
    let right = collector.alloc(TreeNode { children: RefCell::new(vec![shared.clone()]) }).unwrap();
    let root = collector.alloc(TreeNode { children: RefCell::new(vec![left, right]) }).unwrap();

    collector.collect();
    assert_eq!(collector.live_count(), 4, "no cycles here, collect() must not free anything reachable");
    drop(root);
    drop(shared);
    assert_eq!(collector.live_count(), 0);
}
