//! Minimal HDF5 writer for tests: superblock v0, one level of old-style
//! groups, v1 object headers, contiguous or chunked (deflate/shuffle)
//! rank-1 datasets.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

const UNDEF: u64 = u64::MAX;
const SUPERBLOCK_SIZE: usize = 96;

pub enum Payload {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Fixed-length byte strings of the given width.
    Str(Vec<String>, usize),
}

impl Payload {
    fn elem_size(&self) -> usize {
        match self {
            Payload::I32(_) | Payload::F32(_) => 4,
            Payload::I64(_) | Payload::F64(_) => 8,
            Payload::Str(_, w) => *w,
        }
    }

    fn len(&self) -> usize {
        match self {
            Payload::I32(v) => v.len(),
            Payload::I64(v) => v.len(),
            Payload::F32(v) => v.len(),
            Payload::F64(v) => v.len(),
            Payload::Str(v, _) => v.len(),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Payload::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Payload::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Payload::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Payload::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Payload::Str(v, w) => v
                .iter()
                .flat_map(|s| {
                    let mut b = s.as_bytes().to_vec();
                    b.resize(*w, 0);
                    b
                })
                .collect(),
        }
    }

    fn datatype_message(&self) -> Vec<u8> {
        let mut m = Vec::new();
        match self {
            Payload::I32(_) | Payload::I64(_) => {
                let size = self.elem_size() as u32;
                m.extend_from_slice(&[0x10, 0x08, 0x00, 0x00]);
                m.extend_from_slice(&size.to_le_bytes());
                m.extend_from_slice(&0u16.to_le_bytes());
                m.extend_from_slice(&((size * 8) as u16).to_le_bytes());
            }
            Payload::F32(_) => {
                m.extend_from_slice(&[0x11, 0x20, 31, 0x00]);
                m.extend_from_slice(&4u32.to_le_bytes());
                m.extend_from_slice(&0u16.to_le_bytes());
                m.extend_from_slice(&32u16.to_le_bytes());
                m.extend_from_slice(&[23, 8, 0, 23]);
                m.extend_from_slice(&127u32.to_le_bytes());
            }
            Payload::F64(_) => {
                m.extend_from_slice(&[0x11, 0x20, 63, 0x00]);
                m.extend_from_slice(&8u32.to_le_bytes());
                m.extend_from_slice(&0u16.to_le_bytes());
                m.extend_from_slice(&64u16.to_le_bytes());
                m.extend_from_slice(&[52, 11, 0, 52]);
                m.extend_from_slice(&1023u32.to_le_bytes());
            }
            Payload::Str(_, w) => {
                m.extend_from_slice(&[0x13, 0x00, 0x00, 0x00]);
                m.extend_from_slice(&(*w as u32).to_le_bytes());
            }
        }
        m
    }
}

#[derive(Clone, Copy)]
pub enum Layout {
    Contiguous,
    Chunked { chunk: usize, shuffle: bool, deflate: bool },
}

struct DatasetEntry {
    name: String,
    payload: Payload,
    layout: Layout,
}

#[derive(Default)]
pub struct H5Builder {
    groups: Vec<(String, Vec<DatasetEntry>)>,
}

impl H5Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset under `group` (created on first use).
    pub fn dataset(mut self, group: &str, name: &str, payload: Payload, layout: Layout) -> Self {
        let entry = DatasetEntry { name: name.to_string(), payload, layout };
        match self.groups.iter_mut().find(|(g, _)| g == group) {
            Some((_, list)) => list.push(entry),
            None => self.groups.push((group.to_string(), vec![entry])),
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SUPERBLOCK_SIZE];

        let mut root_entries = Vec::new();
        for (group, datasets) in &self.groups {
            let mut entries = Vec::new();
            for ds in datasets {
                let header = write_dataset(&mut buf, ds);
                entries.push((ds.name.clone(), header, None));
            }
            let (btree, heap) = write_symbol_table(&mut buf, &entries);
            let header = write_object_header(&mut buf, &[(0x0011, symbol_table_message(btree, heap))]);
            root_entries.push((group.clone(), header, Some((btree, heap))));
        }
        let (root_btree, root_heap) = write_symbol_table(&mut buf, &root_entries);
        let root_header =
            write_object_header(&mut buf, &[(0x0011, symbol_table_message(root_btree, root_heap))]);

        let eof = buf.len() as u64;
        let mut sb = Vec::with_capacity(SUPERBLOCK_SIZE);
        sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes());
        sb.extend_from_slice(&16u16.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        for addr in [0, UNDEF, eof, UNDEF] {
            sb.extend_from_slice(&addr.to_le_bytes());
        }
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&root_header.to_le_bytes());
        sb.extend_from_slice(&1u32.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        sb.extend_from_slice(&root_btree.to_le_bytes());
        sb.extend_from_slice(&root_heap.to_le_bytes());
        assert_eq!(sb.len(), SUPERBLOCK_SIZE);
        buf[..SUPERBLOCK_SIZE].copy_from_slice(&sb);
        buf
    }

    pub fn write_to(&self, path: &std::path::Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

fn pad8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

fn padded(mut v: Vec<u8>) -> Vec<u8> {
    pad8(&mut v);
    v
}

fn symbol_table_message(btree: u64, heap: u64) -> Vec<u8> {
    let mut m = btree.to_le_bytes().to_vec();
    m.extend_from_slice(&heap.to_le_bytes());
    m
}

fn write_object_header(buf: &mut Vec<u8>, messages: &[(u16, Vec<u8>)]) -> u64 {
    let mut body = Vec::new();
    for (kind, data) in messages {
        let data = padded(data.clone());
        body.extend_from_slice(&kind.to_le_bytes());
        body.extend_from_slice(&(data.len() as u16).to_le_bytes());
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(&data);
    }
    pad8(buf);
    let addr = buf.len() as u64;
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(&body);
    addr
}

/// Local heap + one SNOD + one leaf B-tree node; returns (btree, heap).
fn write_symbol_table(buf: &mut Vec<u8>, entries: &[(String, u64, Option<(u64, u64)>)]) -> (u64, u64) {
    let mut segment = vec![0u8; 8];
    let mut offsets = Vec::new();
    for (name, _, _) in entries {
        offsets.push(segment.len() as u64);
        segment.extend_from_slice(name.as_bytes());
        segment.push(0);
        pad8(&mut segment);
    }

    pad8(buf);
    let segment_addr = buf.len() as u64;
    buf.extend_from_slice(&segment);

    let heap = buf.len() as u64;
    buf.extend_from_slice(b"HEAP");
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(&(segment.len() as u64).to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&segment_addr.to_le_bytes());

    let snod = buf.len() as u64;
    buf.extend_from_slice(b"SNOD");
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for ((_, header, cache), offset) in entries.iter().zip(&offsets) {
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&header.to_le_bytes());
        match cache {
            Some((btree, heap)) => {
                buf.extend_from_slice(&1u32.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&btree.to_le_bytes());
                buf.extend_from_slice(&heap.to_le_bytes());
            }
            None => buf.extend_from_slice(&[0u8; 24]),
        }
    }

    let btree = buf.len() as u64;
    buf.extend_from_slice(b"TREE");
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&snod.to_le_bytes());
    buf.extend_from_slice(&offsets.last().copied().unwrap_or(0).to_le_bytes());

    (btree, heap)
}

fn shuffle(src: &[u8], width: usize) -> Vec<u8> {
    let n = src.len() / width;
    let mut out = vec![0u8; src.len()];
    for i in 0..n {
        for b in 0..width {
            out[b * n + i] = src[i * width + b];
        }
    }
    out[n * width..].copy_from_slice(&src[n * width..]);
    out
}

fn write_dataset(buf: &mut Vec<u8>, ds: &DatasetEntry) -> u64 {
    let n = ds.payload.len();
    let elem = ds.payload.elem_size();
    let raw = ds.payload.bytes();

    let mut dataspace = vec![1u8, 1, 0, 0, 0, 0, 0, 0];
    dataspace.extend_from_slice(&(n as u64).to_le_bytes());

    let mut messages = vec![(0x0001, dataspace), (0x0003, ds.payload.datatype_message())];

    match ds.layout {
        Layout::Contiguous => {
            pad8(buf);
            let addr = buf.len() as u64;
            buf.extend_from_slice(&raw);
            let mut layout = vec![3u8, 1];
            layout.extend_from_slice(&addr.to_le_bytes());
            layout.extend_from_slice(&(raw.len() as u64).to_le_bytes());
            messages.push((0x0008, layout));
        }
        Layout::Chunked { chunk, shuffle: do_shuffle, deflate } => {
            let mut keys = Vec::new();
            for start in (0..n).step_by(chunk) {
                let mut block = vec![0u8; chunk * elem];
                let end = (start + chunk).min(n);
                block[..(end - start) * elem].copy_from_slice(&raw[start * elem..end * elem]);
                if do_shuffle {
                    block = shuffle(&block, elem);
                }
                if deflate {
                    let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(4));
                    enc.write_all(&block).unwrap();
                    block = enc.finish().unwrap();
                }
                pad8(buf);
                let addr = buf.len() as u64;
                buf.extend_from_slice(&block);
                keys.push((block.len() as u32, start as u64, addr));
            }

            pad8(buf);
            let btree = buf.len() as u64;
            buf.extend_from_slice(b"TREE");
            buf.extend_from_slice(&[1, 0]);
            buf.extend_from_slice(&(keys.len() as u16).to_le_bytes());
            buf.extend_from_slice(&UNDEF.to_le_bytes());
            buf.extend_from_slice(&UNDEF.to_le_bytes());
            for (size, offset, addr) in &keys {
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&0u64.to_le_bytes());
                buf.extend_from_slice(&addr.to_le_bytes());
            }
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&(n as u64).to_le_bytes());
            buf.extend_from_slice(&0u64.to_le_bytes());

            let mut layout = vec![3u8, 2, 2];
            layout.extend_from_slice(&btree.to_le_bytes());
            layout.extend_from_slice(&(chunk as u32).to_le_bytes());
            layout.extend_from_slice(&(elem as u32).to_le_bytes());
            messages.push((0x0008, layout));

            let mut filters = Vec::new();
            if do_shuffle {
                filters.push((2u16, elem as u32));
            }
            if deflate {
                filters.push((1u16, 4u32));
            }
            if !filters.is_empty() {
                let mut pipeline = vec![1u8, filters.len() as u8, 0, 0, 0, 0, 0, 0];
                for (id, value) in filters {
                    pipeline.extend_from_slice(&id.to_le_bytes());
                    pipeline.extend_from_slice(&0u16.to_le_bytes());
                    pipeline.extend_from_slice(&0u16.to_le_bytes());
                    pipeline.extend_from_slice(&1u16.to_le_bytes());
                    pipeline.extend_from_slice(&value.to_le_bytes());
                    pipeline.extend_from_slice(&[0, 0, 0, 0]);
                }
                messages.push((0x000B, pipeline));
            }
        }
    }

    write_object_header(buf, &messages)
}

/// 10x-style store: `group/{genes,data,indices,indptr}`.
pub fn csr_store(
    group: &str,
    n_genes: usize,
    data: &[f64],
    indices: &[i64],
    indptr: &[i64],
    layout: Layout,
) -> H5Builder {
    let genes = (0..n_genes).map(|g| format!("ENSMUSG{:011}", g)).collect();
    H5Builder::new()
        .dataset(group, "barcodes", Payload::Str(vec!["AAACCTGA-1".to_string()], 18), Layout::Contiguous)
        .dataset(group, "data", Payload::I32(data.iter().map(|&v| v as i32).collect()), layout)
        .dataset(group, "genes", Payload::Str(genes, 18), Layout::Contiguous)
        .dataset(group, "indices", Payload::I64(indices.to_vec()), layout)
        .dataset(group, "indptr", Payload::I64(indptr.to_vec()), layout)
}
