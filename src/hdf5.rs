//! hdf5.rs  –  read‑only HDF5 store for sparse expression matrices
//! =================================================================
//! Just enough HDF5 to pull the CSR arrays out of a 10x / h5py file:
//! * superblock v0/v1, version‑1 object headers, symbol‑table groups
//! * compact, contiguous and chunked (rank‑1) storage
//! * deflate and shuffle chunk filters
//!
//! The file is memory mapped once; every dataset is registered under its
//! slash‑joined path (`mm10/indptr`) while walking the group tree.  Reads
//! copy the dataset out into an owned `Vec`, so the map can be dropped
//! before any worker thread starts.
//!
//! © 2025 Scott Furlan – MIT OR Apache‑2.0.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

// ---- magic and signatures ----------------------------------------------

const HDF5_MAGIC: &[u8; 8] = b"\x89HDF\r\n\x1a\n";
const TREE_SIGNATURE: &[u8; 4] = b"TREE";
const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";
const HEAP_SIGNATURE: &[u8; 4] = b"HEAP";

// ---- object header message types --------------------------------------

const MSG_DATASPACE: u16 = 0x0001;
const MSG_DATATYPE: u16 = 0x0003;
const MSG_DATA_LAYOUT: u16 = 0x0008;
const MSG_FILTER_PIPELINE: u16 = 0x000B;
const MSG_CONTINUATION: u16 = 0x0010;
const MSG_SYMBOL_TABLE: u16 = 0x0011;

const MSG_FLAG_SHARED: u8 = 0x02;

// ---- datatype classes and filters --------------------------------------

const DT_CLASS_FIXED_POINT: u8 = 0;
const DT_CLASS_FLOATING_POINT: u8 = 1;

const FILTER_DEFLATE: u16 = 1;
const FILTER_SHUFFLE: u16 = 2;

// ---- limits ------------------------------------------------------------

const MAX_RECURSION_DEPTH: usize = 64;
const UNDEF_ADDR: u64 = u64::MAX;

//=========================================================================//
//  Byte helpers                                                           //
//=========================================================================//

fn bytes_at(data: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    let end = pos.checked_add(len).ok_or(Error::UnexpectedEof)?;
    data.get(pos..end).ok_or(Error::UnexpectedEof)
}

/// Little‑endian unsigned integer of `size` bytes (1..=8).
fn read_uint(data: &[u8], pos: usize, size: usize) -> Result<u64> {
    let raw = bytes_at(data, pos, size)?;
    Ok(raw
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (i * 8))))
}

fn read_u8(data: &[u8], pos: usize) -> Result<u8> {
    data.get(pos).copied().ok_or(Error::UnexpectedEof)
}

fn read_u16_le(data: &[u8], pos: usize) -> Result<u16> {
    Ok(read_uint(data, pos, 2)? as u16)
}

fn read_u32_le(data: &[u8], pos: usize) -> Result<u32> {
    Ok(read_uint(data, pos, 4)? as u32)
}

/// NUL‑terminated string starting at `pos`.
fn read_cstring(data: &[u8], pos: usize) -> Result<String> {
    let tail = data.get(pos..).ok_or(Error::UnexpectedEof)?;
    let len = tail.iter().position(|&b| b == 0).ok_or(Error::UnexpectedEof)?;
    String::from_utf8(tail[..len].to_vec())
        .map_err(|e| Error::InvalidFileStructure(format!("Invalid UTF-8 in HDF5 name: {}", e)))
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::UnexpectedEof)
}

/// Superblock parameters needed everywhere else.
#[derive(Debug, Clone, Copy)]
struct Hdf5Ctx {
    offset_size: usize,
    length_size: usize,
    base_addr: u64,
}

impl Hdf5Ctx {
    /// Offset‑sized field; the all‑ones pattern maps to [`UNDEF_ADDR`].
    fn read_offset(&self, data: &[u8], pos: usize) -> Result<u64> {
        let v = read_uint(data, pos, self.offset_size)?;
        let undef = if self.offset_size == 8 { u64::MAX } else { (1u64 << (self.offset_size * 8)) - 1 };
        Ok(if v == undef { UNDEF_ADDR } else { v })
    }

    fn read_length(&self, data: &[u8], pos: usize) -> Result<u64> {
        read_uint(data, pos, self.length_size)
    }

    /// File position of a stored address.
    fn resolve(&self, addr: u64) -> Result<usize> {
        if addr == UNDEF_ADDR {
            return Err(Error::InvalidFileStructure("undefined address dereferenced".into()));
        }
        to_usize(addr.checked_add(self.base_addr).ok_or(Error::UnexpectedEof)?)
    }
}

//=========================================================================//
//  Dataset description                                                    //
//=========================================================================//

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Anything else (strings, compounds, big‑endian numbers, committed types).
    Other { class: u8, size: usize },
}

impl DType {
    /// Element width in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
            DType::Other { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    /// Raw bytes at a file position (contiguous and compact layouts).
    Contiguous { pos: usize, size: usize },
    /// Never written; reads as the zero fill value.
    Unallocated,
    /// Chunk B‑tree address and chunk dimensions (last entry = element size).
    Chunked { btree: u64, chunk_dims: Vec<u64> },
    Unsupported(String),
}

#[derive(Debug, Clone)]
struct Filter {
    id: u16,
    client_data: Vec<u32>,
}

/// One dataset found while walking the file.
#[derive(Debug, Clone)]
pub struct Dataset {
    shape: Vec<u64>,
    dtype: DType,
    storage: Storage,
    filters: Vec<Filter>,
}

impl Dataset {
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements (product of the shape; 1 for scalars).
    pub fn n_elements(&self) -> u64 {
        self.shape.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
    }
}

//=========================================================================//
//  H5File                                                                 //
//=========================================================================//

/// A memory‑mapped HDF5 file with its dataset index.
pub struct H5File {
    mmap: Mmap,
    ctx: Hdf5Ctx,
    datasets: BTreeMap<String, Dataset>,
    groups: BTreeSet<String>,
}

impl std::fmt::Debug for H5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H5File")
            .field("bytes", &self.mmap.len())
            .field("datasets", &self.datasets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl H5File {
    /// Map `path` and index every dataset reachable from the root group.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() < 16 {
            return Err(Error::InvalidFileStructure(
                "File too small to be a valid HDF5 file".to_string(),
            ));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let data = &mmap[..];
        let sb_offset = find_superblock(data)?;
        let (ctx, root) = parse_superblock(data, sb_offset)?;

        let mut walker = Walker {
            data,
            ctx,
            datasets: BTreeMap::new(),
            groups: BTreeSet::new(),
        };
        let (btree, heap) = match root {
            RootGroup::Cached { btree, heap } => (btree, heap),
            RootGroup::Header(addr) => {
                let header = walker.object_header(ctx.resolve(addr)?, 0)?;
                header.symbol_table.ok_or_else(|| {
                    Error::InvalidFileStructure("Root object is not a group".to_string())
                })?
            }
        };
        walker.group(btree, heap, "", 0)?;

        let Walker { datasets, groups, .. } = walker;
        Ok(Self { mmap, ctx, datasets, groups })
    }

    /// Paths of every dataset in the file, sorted.
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.groups.contains(path.trim_matches('/'))
    }

    pub fn dataset(&self, path: &str) -> Result<&Dataset> {
        self.datasets
            .get(path.trim_matches('/'))
            .ok_or_else(|| Error::DatasetNotFound(path.to_string()))
    }

    pub fn shape(&self, path: &str) -> Result<&[u64]> {
        Ok(self.dataset(path)?.shape())
    }

    /// Read a numeric dataset, converting every element to `f64`.
    pub fn read_f64(&self, path: &str) -> Result<Vec<f64>> {
        let ds = self.dataset(path)?;
        let raw = self.raw_bytes(ds, path)?;
        decode_f64(&raw, ds.dtype, path)
    }

    /// Read an integer dataset as non‑negative `usize` values.
    pub fn read_indices(&self, path: &str) -> Result<Vec<usize>> {
        let ds = self.dataset(path)?;
        let raw = self.raw_bytes(ds, path)?;
        decode_usize(&raw, ds.dtype, path)
    }

    /// Exactly `n_elements * dtype.size()` bytes of dataset payload.
    fn raw_bytes(&self, ds: &Dataset, path: &str) -> Result<Cow<'_, [u8]>> {
        let elem = ds.dtype.size();
        let expected = to_usize(ds.n_elements())?
            .checked_mul(elem)
            .ok_or_else(|| Error::InvalidFileStructure(format!("'{}' is too large", path)))?;

        match &ds.storage {
            Storage::Contiguous { pos, size } => {
                if *size < expected {
                    return Err(Error::InvalidFileStructure(format!(
                        "'{}' stores {} bytes, expected {}",
                        path, size, expected
                    )));
                }
                Ok(Cow::Borrowed(bytes_at(&self.mmap, *pos, expected)?))
            }
            Storage::Unallocated => Ok(Cow::Owned(vec![0u8; expected])),
            Storage::Chunked { btree, chunk_dims } => {
                if ds.shape.len() != 1 || chunk_dims.len() != 2 {
                    return Err(Error::UnsupportedLayout(format!(
                        "chunked dataset '{}' has rank {} (only rank 1 is supported)",
                        path,
                        ds.shape.len()
                    )));
                }
                let mut out = vec![0u8; expected];
                let chunk_len = to_usize(chunk_dims[0])?;
                let mut chunks = Vec::new();
                collect_chunks(&self.mmap, &self.ctx, *btree, chunk_dims.len(), &mut chunks, 0)?;
                for chunk in chunks {
                    let pos = self.ctx.resolve(chunk.addr)?;
                    let stored = bytes_at(&self.mmap, pos, chunk.size)?;
                    let decoded = apply_filters(stored, &ds.filters, chunk.filter_mask, elem)?;

                    let start = to_usize(chunk.offset)?;
                    let n_elems = to_usize(ds.n_elements())?;
                    if start >= n_elems {
                        continue;
                    }
                    let count = chunk_len.min(n_elems - start) * elem;
                    if decoded.len() < count {
                        return Err(Error::InvalidFileStructure(format!(
                            "chunk at element {} of '{}' holds {} bytes, expected {}",
                            start,
                            path,
                            decoded.len(),
                            count
                        )));
                    }
                    let dst = start * elem;
                    out[dst..dst + count].copy_from_slice(&decoded[..count]);
                }
                Ok(Cow::Owned(out))
            }
            Storage::Unsupported(why) => Err(Error::UnsupportedLayout(format!("'{}': {}", path, why))),
        }
    }
}

//=========================================================================//
//  Superblock                                                             //
//=========================================================================//

enum RootGroup {
    Cached { btree: u64, heap: u64 },
    Header(u64),
}

/// Finds the superblock at 0, 512, 1024, 2048, ...
fn find_superblock(data: &[u8]) -> Result<usize> {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        if &data[offset..offset + 8] == HDF5_MAGIC {
            return Ok(offset);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(Error::InvalidMagicNumber {
        found: data[..8.min(data.len())].to_vec(),
    })
}

fn parse_superblock(data: &[u8], sb_offset: usize) -> Result<(Hdf5Ctx, RootGroup)> {
    let pos = sb_offset + 8;

    let sb_version = read_u8(data, pos)?;
    if sb_version > 1 {
        return Err(Error::InvalidFileStructure(format!(
            "Unsupported HDF5 superblock version: {} (only v0/v1 supported)",
            sb_version
        )));
    }

    //   +5: sizeof_offsets   +6: sizeof_lengths
    //   +8..16 (v0) / +8..20 (v1): tree K values, flags
    let offset_size = read_u8(data, pos + 5)? as usize;
    let length_size = read_u8(data, pos + 6)? as usize;
    if !(1..=8).contains(&offset_size) || !(1..=8).contains(&length_size) {
        return Err(Error::InvalidFileStructure(format!(
            "Invalid HDF5 offset/length sizes: O={}, L={}",
            offset_size, length_size
        )));
    }

    let var_start = if sb_version == 0 { pos + 16 } else { pos + 20 };
    let mut ctx = Hdf5Ctx { offset_size, length_size, base_addr: 0 };

    // base, free-space, end-of-file, driver-info addresses
    let base = ctx.read_offset(data, var_start)?;
    ctx.base_addr = if base == UNDEF_ADDR { 0 } else { base };

    // root symbol table entry: name offset, header address, cache type,
    // reserved, 16-byte scratch pad (btree, heap when cache type == 1)
    let entry = var_start + 4 * offset_size;
    let header_addr = ctx.read_offset(data, entry + offset_size)?;
    let cache_type = read_u32_le(data, entry + 2 * offset_size)?;
    let root = if cache_type == 1 {
        let scratch = entry + 2 * offset_size + 8;
        RootGroup::Cached {
            btree: ctx.read_offset(data, scratch)?,
            heap: ctx.read_offset(data, scratch + offset_size)?,
        }
    } else {
        RootGroup::Header(header_addr)
    };

    Ok((ctx, root))
}

//=========================================================================//
//  Group walk                                                             //
//=========================================================================//

#[derive(Default)]
struct HeaderMessages {
    shape: Option<Vec<u64>>,
    dtype: Option<DType>,
    storage: Option<Storage>,
    filters: Vec<Filter>,
    symbol_table: Option<(u64, u64)>,
}

struct Walker<'a> {
    data: &'a [u8],
    ctx: Hdf5Ctx,
    datasets: BTreeMap<String, Dataset>,
    groups: BTreeSet<String>,
}

fn check_depth(depth: usize, what: &str) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::InvalidFileStructure(format!(
            "HDF5 {} recursion depth exceeded",
            what
        )));
    }
    Ok(())
}

fn check_signature(data: &[u8], pos: usize, sig: &[u8; 4]) -> Result<()> {
    if bytes_at(data, pos, 4)? != sig {
        return Err(Error::InvalidFileStructure(format!(
            "Expected {} signature at offset {}",
            String::from_utf8_lossy(sig),
            pos
        )));
    }
    Ok(())
}

impl<'a> Walker<'a> {
    fn group(&mut self, btree: u64, heap: u64, prefix: &str, depth: usize) -> Result<()> {
        check_depth(depth, "group")?;
        self.groups.insert(prefix.to_string());
        let heap_data = self.local_heap_data(heap)?;
        self.btree(btree, heap_data, prefix, depth + 1)
    }

    /// Start of a local heap's data segment.
    fn local_heap_data(&self, heap_addr: u64) -> Result<usize> {
        let pos = self.ctx.resolve(heap_addr)?;
        check_signature(self.data, pos, HEAP_SIGNATURE)?;
        // sig(4) version(1) reserved(3) seg_size(L) free_list(L) seg_addr(O)
        let seg = self.ctx.read_offset(self.data, pos + 8 + 2 * self.ctx.length_size)?;
        self.ctx.resolve(seg)
    }

    /// Group B‑tree (node type 0): internal nodes point at nodes, leaves at SNODs.
    fn btree(&mut self, addr: u64, heap_data: usize, prefix: &str, depth: usize) -> Result<()> {
        check_depth(depth, "B-tree")?;
        let (o, l) = (self.ctx.offset_size, self.ctx.length_size);
        let pos = self.ctx.resolve(addr)?;
        check_signature(self.data, pos, TREE_SIGNATURE)?;

        let node_type = read_u8(self.data, pos + 4)?;
        if node_type != 0 {
            return Err(Error::InvalidFileStructure(format!(
                "Group B-tree at {} has node type {}",
                pos, node_type
            )));
        }
        let level = read_u8(self.data, pos + 5)?;
        let entries = read_u16_le(self.data, pos + 6)? as usize;

        // key[0] child[0] key[1] ... child[n-1] key[n]; keys are heap offsets (L)
        let keys_start = pos + 8 + 2 * o;
        for i in 0..entries {
            let child = self.ctx.read_offset(self.data, keys_start + l + i * (l + o))?;
            if child == UNDEF_ADDR {
                continue;
            }
            if level > 0 {
                self.btree(child, heap_data, prefix, depth + 1)?;
            } else {
                self.symbol_node(child, heap_data, prefix, depth + 1)?;
            }
        }
        Ok(())
    }

    fn symbol_node(&mut self, addr: u64, heap_data: usize, prefix: &str, depth: usize) -> Result<()> {
        check_depth(depth, "SNOD")?;
        let o = self.ctx.offset_size;
        let pos = self.ctx.resolve(addr)?;
        check_signature(self.data, pos, SNOD_SIGNATURE)?;

        let n_symbols = read_u16_le(self.data, pos + 6)? as usize;
        // name_offset(O) header(O) cache_type(4) reserved(4) scratch(16)
        let entry_size = 2 * o + 24;
        for i in 0..n_symbols {
            let entry = pos + 8 + i * entry_size;
            let name_offset = self.ctx.read_offset(self.data, entry)?;
            let header = self.ctx.read_offset(self.data, entry + o)?;
            let cache_type = read_u32_le(self.data, entry + 2 * o)?;
            if header == UNDEF_ADDR {
                continue;
            }

            let name = read_cstring(self.data, heap_data + to_usize(name_offset)?)?;
            if name.is_empty() {
                continue;
            }
            let full_name = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };

            if cache_type == 1 {
                let scratch = entry + 2 * o + 8;
                let btree = self.ctx.read_offset(self.data, scratch)?;
                let heap = self.ctx.read_offset(self.data, scratch + o)?;
                self.group(btree, heap, &full_name, depth + 1)?;
                continue;
            }

            let msgs = self.object_header(self.ctx.resolve(header)?, depth + 1)?;
            if let Some((btree, heap)) = msgs.symbol_table {
                self.group(btree, heap, &full_name, depth + 1)?;
            } else if let (Some(shape), Some(dtype), Some(storage)) = (msgs.shape, msgs.dtype, msgs.storage) {
                self.datasets.insert(
                    full_name,
                    Dataset { shape, dtype, storage, filters: msgs.filters },
                );
            }
        }
        Ok(())
    }

    /// Version‑1 object header: 16‑byte prefix, then 8‑byte aligned messages.
    fn object_header(&self, pos: usize, depth: usize) -> Result<HeaderMessages> {
        check_depth(depth, "object header")?;
        let version = read_u8(self.data, pos)?;
        if version != 1 {
            return Err(Error::InvalidFileStructure(format!(
                "Object header version {} at {} (only v1 supported)",
                version, pos
            )));
        }
        let mut budget = read_u16_le(self.data, pos + 2)? as usize;
        let header_size = read_u32_le(self.data, pos + 8)? as usize;

        let mut out = HeaderMessages::default();
        let start = pos + 16;
        self.messages(start, start + header_size, &mut budget, &mut out, depth)?;
        Ok(out)
    }

    fn messages(
        &self,
        start: usize,
        end: usize,
        budget: &mut usize,
        out: &mut HeaderMessages,
        depth: usize,
    ) -> Result<()> {
        check_depth(depth, "continuation")?;
        let mut pos = start;
        while pos + 8 <= end && *budget > 0 {
            // type(2) size(2) flags(1) reserved(3)
            let msg_type = read_u16_le(self.data, pos)?;
            let size = read_u16_le(self.data, pos + 2)? as usize;
            let flags = read_u8(self.data, pos + 4)?;
            let body = pos + 8;
            bytes_at(self.data, body, size)?;
            *budget -= 1;

            match msg_type {
                MSG_DATASPACE => out.shape = Some(self.dataspace(body)?),
                MSG_DATATYPE if flags & MSG_FLAG_SHARED != 0 => {
                    // committed datatype: shape stays usable, contents do not
                    out.dtype = Some(DType::Other { class: u8::MAX, size: 0 });
                }
                MSG_DATATYPE => out.dtype = Some(parse_datatype(self.data, body)?),
                MSG_DATA_LAYOUT => out.storage = Some(self.layout(body)?),
                MSG_FILTER_PIPELINE => out.filters = parse_filters(self.data, body)?,
                MSG_CONTINUATION => {
                    let addr = self.ctx.read_offset(self.data, body)?;
                    let len = to_usize(self.ctx.read_length(self.data, body + self.ctx.offset_size)?)?;
                    if addr != UNDEF_ADDR && len > 0 {
                        let cont = self.ctx.resolve(addr)?;
                        self.messages(cont, cont + len, budget, out, depth + 1)?;
                    }
                }
                MSG_SYMBOL_TABLE => {
                    let btree = self.ctx.read_offset(self.data, body)?;
                    let heap = self.ctx.read_offset(self.data, body + self.ctx.offset_size)?;
                    out.symbol_table = Some((btree, heap));
                }
                _ => {}
            }
            pos = body + size;
        }
        Ok(())
    }

    fn dataspace(&self, pos: usize) -> Result<Vec<u64>> {
        let version = read_u8(self.data, pos)?;
        let ndims = read_u8(self.data, pos + 1)? as usize;
        let dims_start = match version {
            1 => pos + 8, // version ndims flags reserved(5)
            2 => pos + 4, // version ndims flags type
            _ => {
                return Err(Error::InvalidFileStructure(format!(
                    "Unsupported HDF5 dataspace version: {}",
                    version
                )))
            }
        };
        (0..ndims)
            .map(|i| self.ctx.read_length(self.data, dims_start + i * self.ctx.length_size))
            .collect()
    }

    fn layout(&self, pos: usize) -> Result<Storage> {
        let o = self.ctx.offset_size;
        let version = read_u8(self.data, pos)?;
        match version {
            1 | 2 => {
                // version ndims class reserved(5) [address(O)] dims(4 * ndims)
                let ndims = read_u8(self.data, pos + 1)? as usize;
                let class = read_u8(self.data, pos + 2)?;
                let addr = self.ctx.read_offset(self.data, pos + 8)?;
                let dims = (0..ndims)
                    .map(|i| read_u32_le(self.data, pos + 8 + o + i * 4).map(u64::from))
                    .collect::<Result<Vec<_>>>()?;
                match class {
                    1 if addr == UNDEF_ADDR => Ok(Storage::Unallocated),
                    1 => Ok(Storage::Contiguous {
                        pos: self.ctx.resolve(addr)?,
                        size: to_usize(dims.iter().product())?,
                    }),
                    2 => Ok(Storage::Chunked { btree: addr, chunk_dims: dims }),
                    other => Ok(Storage::Unsupported(format!("layout v{} class {}", version, other))),
                }
            }
            3 => match read_u8(self.data, pos + 1)? {
                0 => {
                    let size = read_u16_le(self.data, pos + 2)? as usize;
                    Ok(Storage::Contiguous { pos: pos + 4, size })
                }
                1 => {
                    let addr = self.ctx.read_offset(self.data, pos + 2)?;
                    let size = to_usize(self.ctx.read_length(self.data, pos + 2 + o)?)?;
                    if addr == UNDEF_ADDR {
                        Ok(Storage::Unallocated)
                    } else {
                        Ok(Storage::Contiguous { pos: self.ctx.resolve(addr)?, size })
                    }
                }
                2 => {
                    let ndims = read_u8(self.data, pos + 2)? as usize;
                    let btree = self.ctx.read_offset(self.data, pos + 3)?;
                    let chunk_dims = (0..ndims)
                        .map(|i| read_u32_le(self.data, pos + 3 + o + i * 4).map(u64::from))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Storage::Chunked { btree, chunk_dims })
                }
                other => Ok(Storage::Unsupported(format!("layout v3 class {}", other))),
            },
            other => Ok(Storage::Unsupported(format!("layout message version {}", other))),
        }
    }
}

//=========================================================================//
//  Datatype / filter messages                                             //
//=========================================================================//

fn parse_datatype(data: &[u8], pos: usize) -> Result<DType> {
    // class_and_version(1) class_bits(3) size(4)
    let class = read_u8(data, pos)? & 0x0F;
    let bits0 = read_u8(data, pos + 1)?;
    let size = read_u32_le(data, pos + 4)? as usize;
    let other = DType::Other { class, size };

    Ok(match class {
        DT_CLASS_FIXED_POINT if bits0 & 0x01 == 0 => {
            let signed = bits0 & 0x08 != 0;
            match (size, signed) {
                (1, true) => DType::I8,
                (2, true) => DType::I16,
                (4, true) => DType::I32,
                (8, true) => DType::I64,
                (1, false) => DType::U8,
                (2, false) => DType::U16,
                (4, false) => DType::U32,
                (8, false) => DType::U64,
                _ => other,
            }
        }
        // bit 0 and bit 6 together encode byte order; both clear = little endian
        DT_CLASS_FLOATING_POINT if bits0 & 0x41 == 0 => match size {
            4 => DType::F32,
            8 => DType::F64,
            _ => other,
        },
        _ => other,
    })
}

fn parse_filters(data: &[u8], pos: usize) -> Result<Vec<Filter>> {
    let version = read_u8(data, pos)?;
    let n_filters = read_u8(data, pos + 1)? as usize;
    let mut cur = match version {
        1 => pos + 8,
        2 => pos + 2,
        _ => {
            return Err(Error::InvalidFileStructure(format!(
                "Unsupported filter pipeline version: {}",
                version
            )))
        }
    };

    let mut filters = Vec::with_capacity(n_filters);
    for _ in 0..n_filters {
        let id = read_u16_le(data, cur)?;
        cur += 2;
        let name_len = if version == 1 || id >= 256 {
            let n = read_u16_le(data, cur)? as usize;
            cur += 2;
            n
        } else {
            0
        };
        let _flags = read_u16_le(data, cur)?;
        let n_values = read_u16_le(data, cur + 2)? as usize;
        cur += 4;
        // v1 names are already padded to a multiple of eight
        cur += name_len;
        let client_data = (0..n_values)
            .map(|i| read_u32_le(data, cur + i * 4))
            .collect::<Result<Vec<_>>>()?;
        cur += n_values * 4;
        if version == 1 && n_values % 2 == 1 {
            cur += 4;
        }
        filters.push(Filter { id, client_data });
    }
    Ok(filters)
}

//=========================================================================//
//  Chunked storage                                                        //
//=========================================================================//

struct ChunkRef {
    size: usize,
    filter_mask: u32,
    offset: u64,
    addr: u64,
}

/// Walk a chunk B‑tree (node type 1) and collect every leaf chunk.
fn collect_chunks(
    data: &[u8],
    ctx: &Hdf5Ctx,
    addr: u64,
    ndims: usize,
    out: &mut Vec<ChunkRef>,
    depth: usize,
) -> Result<()> {
    check_depth(depth, "chunk B-tree")?;
    if addr == UNDEF_ADDR {
        return Ok(());
    }
    let o = ctx.offset_size;
    let pos = ctx.resolve(addr)?;
    check_signature(data, pos, TREE_SIGNATURE)?;
    if read_u8(data, pos + 4)? != 1 {
        return Err(Error::InvalidFileStructure(format!(
            "Chunk B-tree at {} is not a raw-data node",
            pos
        )));
    }
    let level = read_u8(data, pos + 5)?;
    let entries = read_u16_le(data, pos + 6)? as usize;

    // key: chunk_size(4) filter_mask(4) offsets(8 * ndims), then child(O)
    let key_size = 8 + 8 * ndims;
    let keys_start = pos + 8 + 2 * o;
    for i in 0..entries {
        let key = keys_start + i * (key_size + o);
        let child = ctx.read_offset(data, key + key_size)?;
        if level > 0 {
            collect_chunks(data, ctx, child, ndims, out, depth + 1)?;
        } else {
            out.push(ChunkRef {
                size: read_u32_le(data, key)? as usize,
                filter_mask: read_u32_le(data, key + 4)?,
                offset: read_uint(data, key + 8, 8)?,
                addr: child,
            });
        }
    }
    Ok(())
}

/// Undo the filter pipeline (applied in reverse order) for one chunk.
fn apply_filters<'b>(stored: &'b [u8], filters: &[Filter], mask: u32, elem: usize) -> Result<Cow<'b, [u8]>> {
    let mut buf = Cow::Borrowed(stored);
    for (i, filter) in filters.iter().enumerate().rev() {
        if i < 32 && mask & (1 << i) != 0 {
            continue;
        }
        buf = match filter.id {
            FILTER_DEFLATE => {
                let mut inflated = Vec::with_capacity(buf.len() * 4);
                ZlibDecoder::new(&buf[..])
                    .read_to_end(&mut inflated)
                    .map_err(Error::Decompression)?;
                Cow::Owned(inflated)
            }
            FILTER_SHUFFLE => {
                let width = filter.client_data.first().map(|&w| w as usize).unwrap_or(elem);
                Cow::Owned(unshuffle(&buf, width))
            }
            other => return Err(Error::UnsupportedFilter(other)),
        };
    }
    Ok(buf)
}

/// Reverse the byte shuffle: byte `b` of element `i` lives at `b * n + i`.
fn unshuffle(src: &[u8], width: usize) -> Vec<u8> {
    if width <= 1 || src.len() < width {
        return src.to_vec();
    }
    let n = src.len() / width;
    let mut out = vec![0u8; src.len()];
    for b in 0..width {
        for i in 0..n {
            out[i * width + b] = src[b * n + i];
        }
    }
    out[n * width..].copy_from_slice(&src[n * width..]);
    out
}

//=========================================================================//
//  Element decoding                                                       //
//=========================================================================//

macro_rules! decode_le {
    ($raw:expr, $t:ty) => {
        $raw.chunks_exact(std::mem::size_of::<$t>()).map(|c| {
            let mut b = [0u8; std::mem::size_of::<$t>()];
            b.copy_from_slice(c);
            <$t>::from_le_bytes(b)
        })
    };
}

fn decode_f64(raw: &[u8], dtype: DType, path: &str) -> Result<Vec<f64>> {
    Ok(match dtype {
        DType::I8 => raw.iter().map(|&b| f64::from(b as i8)).collect(),
        DType::U8 => raw.iter().map(|&b| f64::from(b)).collect(),
        DType::I16 => decode_le!(raw, i16).map(f64::from).collect(),
        DType::U16 => decode_le!(raw, u16).map(f64::from).collect(),
        DType::I32 => decode_le!(raw, i32).map(f64::from).collect(),
        DType::U32 => decode_le!(raw, u32).map(f64::from).collect(),
        DType::I64 => decode_le!(raw, i64).map(|v| v as f64).collect(),
        DType::U64 => decode_le!(raw, u64).map(|v| v as f64).collect(),
        DType::F32 => decode_le!(raw, f32).map(f64::from).collect(),
        DType::F64 => decode_le!(raw, f64).collect(),
        DType::Other { class, size } => {
            return Err(Error::UnsupportedDType(format!(
                "'{}': class {} size {} is not numeric",
                path, class, size
            )))
        }
    })
}

fn decode_usize(raw: &[u8], dtype: DType, path: &str) -> Result<Vec<usize>> {
    let negative = || Error::InvalidFileStructure(format!("'{}' contains a negative index", path));
    match dtype {
        DType::U8 => Ok(raw.iter().map(|&b| usize::from(b)).collect()),
        DType::U16 => Ok(decode_le!(raw, u16).map(usize::from).collect()),
        DType::U32 => decode_le!(raw, u32).map(|v| to_usize(u64::from(v))).collect(),
        DType::U64 => decode_le!(raw, u64).map(to_usize).collect(),
        DType::I8 => raw.iter().map(|&b| usize::try_from(b as i8).map_err(|_| negative())).collect(),
        DType::I16 => decode_le!(raw, i16).map(|v| usize::try_from(v).map_err(|_| negative())).collect(),
        DType::I32 => decode_le!(raw, i32).map(|v| usize::try_from(v).map_err(|_| negative())).collect(),
        DType::I64 => decode_le!(raw, i64).map(|v| usize::try_from(v).map_err(|_| negative())).collect(),
        other => Err(Error::UnsupportedDType(format!(
            "'{}': {:?} cannot hold indices",
            path, other
        ))),
    }
}
