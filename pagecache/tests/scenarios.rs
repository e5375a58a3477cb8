/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

//! Boundary scenarios S1-S6 (spec.md §8) against an in-memory mock block
//! device. `fs_write` completions are driven explicitly so tests can
//! control exactly when a "device" finishes a given write, the way S4 and
//! S6 require.

use std::sync::{Arc, Mutex};

use pagecache::{ByteRange, Cache, CacheConfig, FanoutMode, IoCompletion, SgList, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceFault(&'static str);

struct PendingWrite {
    range: ByteRange,
    sg: SgList<DeviceFault>,
    completion: IoCompletion<DeviceFault>,
}

/// A block device backed by a growable byte buffer. Reads complete
/// synchronously; writes are queued until the test explicitly completes
/// them via [`Device::complete_next_write`].
struct Device {
    data: Mutex<Vec<u8>>,
    read_calls: Mutex<Vec<ByteRange>>,
    write_calls: Mutex<Vec<ByteRange>>,
    pending_writes: Mutex<Vec<PendingWrite>>,
    fail_next: Mutex<Option<DeviceFault>>,
}

impl Device {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Vec::new()),
            read_calls: Mutex::new(Vec::new()),
            write_calls: Mutex::new(Vec::new()),
            pending_writes: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        })
    }

    fn read_call_count(&self) -> usize {
        self.read_calls.lock().unwrap().len()
    }

    fn write_call_count(&self) -> usize {
        self.write_calls.lock().unwrap().len()
    }

    fn last_write_range(&self) -> ByteRange {
        *self.write_calls.lock().unwrap().last().expect("no write calls yet")
    }

    fn fail_next_write(&self, reason: &'static str) {
        *self.fail_next.lock().unwrap() = Some(DeviceFault(reason));
    }

    /// Apply the oldest queued write to the backing buffer and fire its
    /// completion, simulating the device finishing that request.
    fn complete_next_write(&self) {
        let pending = self.pending_writes.lock().unwrap().remove(0);
        if let Some(fault) = self.fail_next.lock().unwrap().take() {
            (pending.completion)(Status::Io(fault));
            return;
        }
        let start = pending.range.start as usize;
        let end = pending.range.end as usize;
        let mut data = self.data.lock().unwrap();
        if data.len() < end {
            data.resize(end, 0);
        }
        let mut pos = start;
        for buf in pending.sg.iter() {
            let len = buf.len();
            let mut tmp = vec![0u8; len];
            buf.copy_out(&mut tmp);
            data[pos..pos + len].copy_from_slice(&tmp);
            pos += len;
        }
        drop(data);
        (pending.completion)(Status::Ok);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    fn fs_read(device: &Arc<Self>) -> pagecache::FsRead<DeviceFault> {
        let device = device.clone();
        Arc::new(move |sg: SgList<DeviceFault>, range: ByteRange, completion: IoCompletion<DeviceFault>| {
            device.read_calls.lock().unwrap().push(range);
            let data = device.data.lock().unwrap();
            let mut pos = range.start as usize;
            for buf in sg.iter() {
                let len = buf.len();
                let mut tmp = vec![0u8; len];
                if pos < data.len() {
                    let avail = (data.len() - pos).min(len);
                    tmp[..avail].copy_from_slice(&data[pos..pos + avail]);
                }
                buf.copy_in(&tmp);
                pos += len;
            }
            drop(data);
            completion(Status::Ok);
        })
    }

    fn fs_write(device: &Arc<Self>) -> pagecache::FsWrite<DeviceFault> {
        let device = device.clone();
        Arc::new(move |sg: SgList<DeviceFault>, range: ByteRange, completion: IoCompletion<DeviceFault>| {
            device.write_calls.lock().unwrap().push(range);
            device.pending_writes.lock().unwrap().push(PendingWrite { range, sg, completion });
        })
    }
}

fn status_slot() -> (Arc<Mutex<Option<Status<DeviceFault>>>>, IoCompletion<DeviceFault>) {
    let slot = Arc::new(Mutex::new(None));
    let slot2 = slot.clone();
    let completion: IoCompletion<DeviceFault> = Box::new(move |s| *slot2.lock().unwrap() = Some(s));
    (slot, completion)
}

const PAGE_SIZE: usize = 4096;

/// Scenario traces (`log::trace!` from `io/read.rs`/`io/write.rs`) only show
/// up with `RUST_LOG` set; `try_init` is safe to call once per test thread
/// and ignored on the (harmless) "already initialized" error.
fn new_cache() -> Cache<DeviceFault> {
    let _ = env_logger::try_init();
    Cache::new(CacheConfig { page_size_bytes: PAGE_SIZE, fanout: FanoutMode::Inline, ..CacheConfig::default() }, None)
}

#[test]
fn s1_full_page_cold_read() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(PAGE_SIZE as u64, 9);
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));
    node.set_length(PAGE_SIZE as u64);

    let (status, completion) = status_slot();
    let sg = node.reader(SgList::new(), ByteRange::new(0, PAGE_SIZE as u64), completion);

    assert_eq!(device.read_call_count(), 1);
    assert!(status.lock().unwrap().as_ref().unwrap().is_ok());
    assert_eq!(sg.total_bytes(), PAGE_SIZE);
    assert_eq!(cache.total_pages(), 1);
}

#[test]
fn s2_unaligned_write_into_empty_tail() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(0, 9); // block_size = 512
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));

    let (status, completion) = status_slot();
    let source = vec![0xABu8; 100];
    node.writer(source, ByteRange::new(0, 100), completion);

    assert_eq!(device.read_call_count(), 0, "write starts aligned with nothing past EOF to preserve");
    assert_eq!(device.write_call_count(), 1);
    assert_eq!(device.last_write_range(), ByteRange::new(0, 100), "dispatch range's start is block-aligned, end is not (kept verbatim from the block device contract)");
    assert!(status.lock().unwrap().as_ref().unwrap().is_ok());
    assert_eq!(node.length(), 100);

    device.complete_next_write();
    let on_disk = device.snapshot();
    assert_eq!(&on_disk[0..100], &vec![0xABu8; 100][..]);
    assert!(on_disk[100..512].iter().all(|&b| b == 0), "tail of the final block must be zeroed");
}

#[test]
fn s3_unaligned_write_into_existing_page() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(8192, 9);
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));
    node.set_length(8192);

    // Warm page 0 into NEW with known contents.
    let (_status, completion) = status_slot();
    let sg = node.reader(SgList::new(), ByteRange::new(0, PAGE_SIZE as u64), completion);
    for buf in sg.iter() {
        buf.copy_in(&vec![0x11u8; PAGE_SIZE]);
    }
    assert_eq!(device.read_call_count(), 1);

    let (status, completion) = status_slot();
    let source = vec![0x22u8; 200];
    node.writer(source, ByteRange::new(100, 300), completion);

    assert_eq!(device.read_call_count(), 1, "page is already cached, no extra fs_read");
    assert_eq!(device.write_call_count(), 1);
    assert_eq!(device.last_write_range(), ByteRange::new(0, 300), "dispatch range's start is block-aligned, end is not");
    assert!(status.lock().unwrap().as_ref().unwrap().is_ok());

    device.complete_next_write();
    let on_disk = device.snapshot();
    assert!(on_disk[0..100].iter().all(|&b| b == 0x11), "bytes before the write are preserved");
    assert!(on_disk[100..300].iter().all(|&b| b == 0x22), "the written bytes land exactly");
    assert!(on_disk[300..512].iter().all(|&b| b == 0x11), "bytes after the write up to the block are preserved");
}

#[test]
fn s4_concurrent_writes_to_same_page() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(512, 9);
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));

    let (status_a, completion_a) = status_slot();
    node.writer(vec![0xAAu8; 256], ByteRange::new(0, 256), completion_a);
    let (status_b, completion_b) = status_slot();
    node.writer(vec![0xBBu8; 256], ByteRange::new(256, 512), completion_b);

    assert!(status_a.lock().unwrap().as_ref().unwrap().is_ok(), "write A acknowledges before the device completes");
    assert!(status_b.lock().unwrap().as_ref().unwrap().is_ok(), "write B acknowledges before the device completes");
    assert_eq!(device.write_call_count(), 2);

    device.complete_next_write();
    device.complete_next_write();

    let on_disk = device.snapshot();
    assert!(on_disk[0..256].iter().all(|&b| b == 0xAA));
    assert!(on_disk[256..512].iter().all(|&b| b == 0xBB));
}

#[test]
fn s5_eviction_under_pressure() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(8 * PAGE_SIZE as u64, 9);
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));
    node.set_length(8 * PAGE_SIZE as u64);

    for i in 0..8u64 {
        let (_status, completion) = status_slot();
        let start = i * PAGE_SIZE as u64;
        node.reader(SgList::new(), ByteRange::new(start, start + PAGE_SIZE as u64), completion);
    }
    assert_eq!(cache.total_pages(), 8);

    let reclaimed = cache.drain(4 * PAGE_SIZE as u64);
    assert_eq!(reclaimed, 4 * PAGE_SIZE as u64);
    assert_eq!(cache.total_pages(), 4);
}

#[test]
fn s6_write_error_latching() {
    let cache = new_cache();
    let device = Device::new();
    let volume = cache.allocate_volume(512, 9);
    let node = volume.allocate_node(Device::fs_read(&device), Some(Device::fs_write(&device)));

    let (_status_w1, completion_w1) = status_slot();
    node.writer(vec![0x01u8; 512], ByteRange::new(0, 512), completion_w1);
    device.fail_next_write("disk timeout");
    device.complete_next_write();

    let calls_before = device.write_call_count();
    let (status_w2, completion_w2) = status_slot();
    node.writer(vec![0x02u8; 512], ByteRange::new(0, 512), completion_w2);

    assert_eq!(device.write_call_count(), calls_before, "W2 must not reach fs_write once the volume has latched an error");
    let got = status_w2.lock().unwrap().take().unwrap();
    assert!(!got.is_ok());
}
