use super::{
    names_equal, CfbVersion, DirEntry, EntryType, BYTE_ORDER_MARK, DIR_ENTRY_LEN, ENDOFCHAIN,
    FREESECT, HEADER_DIFAT_ENTRIES, HEADER_LEN, MAXREGSECT, MINI_SECTOR_LEN, MINI_SECTOR_SHIFT,
    MINI_STREAM_CUTOFF, NOSTREAM,
};
use crate::error::{OffcryptError, Result};
use crate::format::CFB_SIGNATURE;
use crate::util::Reader;

/// Read-only view over an in-memory compound file.
///
/// Every structural inconsistency surfaces as [`OffcryptError::MalformedContainer`]; the reader
/// never panics or allocates based on unchecked sizes.
#[derive(Debug)]
pub struct CfbReader<'a> {
    data: &'a [u8],
    version: CfbVersion,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    mini_stream: Vec<u8>,
    entries: Vec<DirEntry>,
    /// Directory ids reachable from the root storage's child tree.
    root_children: Vec<u32>,
}

struct Header {
    version: CfbVersion,
    num_fat_sectors: u32,
    first_dir_sector: u32,
    first_mini_fat_sector: u32,
    num_mini_fat_sectors: u32,
    first_difat_sector: u32,
    num_difat_sectors: u32,
    difat: Vec<u32>,
}

impl<'a> CfbReader<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(OffcryptError::malformed("file is shorter than the CFB header"));
        }
        if data.len() as u64 > u64::from(u32::MAX) {
            return Err(OffcryptError::OversizedInput {
                size: data.len() as u64,
            });
        }
        let header = parse_header(&data[..HEADER_LEN])?;

        let mut reader = Self {
            data,
            version: header.version,
            fat: Vec::new(),
            mini_fat: Vec::new(),
            mini_stream: Vec::new(),
            entries: Vec::new(),
            root_children: Vec::new(),
        };

        let fat_sectors = reader.collect_fat_sectors(&header)?;
        reader.fat = reader.read_fat(&fat_sectors)?;
        reader.entries = reader.read_directory(header.first_dir_sector)?;
        reader.root_children = reader.walk_root_children()?;

        if header.num_mini_fat_sectors > 0 && header.first_mini_fat_sector != ENDOFCHAIN {
            let chain = follow_chain(&reader.fat, header.first_mini_fat_sector)?;
            let mut mini_fat = Vec::with_capacity(chain.len() * reader.sector_len() / 4);
            for id in chain {
                mini_fat.extend(u32_entries(reader.sector(id)?));
            }
            reader.mini_fat = mini_fat;
        }

        let root = &reader.entries[0];
        let (root_start, root_size) = (root.start_sector, root.size);
        if root_size > 0 {
            reader.mini_stream =
                reader.read_regular_chain(root_start, checked_size(data, root_size)?)?;
        }

        log::debug!(
            "opened CFB {}: {} FAT entries, {} directory entries, {} root streams",
            reader.version,
            reader.fat.len(),
            reader.entries.len(),
            reader.root_children.len()
        );
        Ok(reader)
    }

    pub fn version(&self) -> CfbVersion {
        self.version
    }

    fn sector_len(&self) -> usize {
        self.version.sector_len()
    }

    /// Entries stored directly under the root storage.
    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> + '_ {
        self.root_children
            .iter()
            .map(move |id| &self.entries[*id as usize])
    }

    /// Look up a root-level entry by name (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.entries().find(|e| names_equal(&e.name, name))
    }

    pub fn has_stream(&self, name: &str) -> bool {
        matches!(self.find(name), Some(e) if e.entry_type == EntryType::Stream)
    }

    /// Read a root-level stream.
    pub fn read_stream(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)
            .filter(|e| e.entry_type == EntryType::Stream)
            .ok_or(OffcryptError::malformed("stream not found"))?;
        let size = checked_size(self.data, entry.size)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        if (size as u64) < u64::from(MINI_STREAM_CUTOFF) {
            self.read_mini_chain(entry.start_sector, size)
        } else {
            self.read_regular_chain(entry.start_sector, size)
        }
    }

    /// Bytes of sector `id`. The final sector of the file may be short.
    fn sector(&self, id: u32) -> Result<&'a [u8]> {
        let sector_len = self.sector_len();
        let start = (id as usize)
            .checked_add(1)
            .and_then(|n| n.checked_mul(sector_len))
            .ok_or(OffcryptError::malformed("sector id overflows"))?;
        if id > MAXREGSECT || start >= self.data.len() {
            return Err(OffcryptError::malformed("sector lies beyond the end of the file"));
        }
        let end = start.saturating_add(sector_len).min(self.data.len());
        Ok(&self.data[start..end])
    }

    fn sector_count(&self) -> usize {
        let sector_len = self.sector_len();
        self.data.len().saturating_sub(sector_len).div_ceil(sector_len)
    }

    fn collect_fat_sectors(&self, header: &Header) -> Result<Vec<u32>> {
        let wanted = header.num_fat_sectors as usize;
        if wanted == 0 {
            return Err(OffcryptError::malformed("header declares no FAT sectors"));
        }
        if wanted > self.sector_count() {
            return Err(OffcryptError::malformed(
                "header declares more FAT sectors than the file holds",
            ));
        }

        let mut fat_sectors: Vec<u32> = header
            .difat
            .iter()
            .copied()
            .take(wanted)
            .take_while(|id| *id != FREESECT)
            .collect();

        let per_sector = self.sector_len() / 4 - 1;
        let mut visited = vec![false; self.sector_count()];
        let mut next = header.first_difat_sector;
        let mut walked = 0u32;
        while fat_sectors.len() < wanted && next != ENDOFCHAIN && next != FREESECT {
            let seen = visited
                .get_mut(next as usize)
                .ok_or(OffcryptError::malformed("DIFAT sector id out of range"))?;
            if *seen {
                return Err(OffcryptError::malformed("DIFAT chain contains a cycle"));
            }
            *seen = true;
            walked += 1;

            let entries: Vec<u32> = u32_entries(self.sector(next)?).collect();
            if entries.len() <= per_sector {
                return Err(OffcryptError::malformed("DIFAT sector is truncated"));
            }
            for id in entries[..per_sector].iter().copied() {
                if fat_sectors.len() == wanted {
                    break;
                }
                if id != FREESECT {
                    fat_sectors.push(id);
                }
            }
            next = entries[per_sector];
        }

        if walked != header.num_difat_sectors && header.num_difat_sectors != 0 {
            log::debug!(
                "DIFAT chain length {walked} differs from header count {}",
                header.num_difat_sectors
            );
        }
        if fat_sectors.len() != wanted {
            return Err(OffcryptError::malformed(
                "DIFAT lists fewer FAT sectors than the header declares",
            ));
        }
        Ok(fat_sectors)
    }

    fn read_fat(&self, fat_sectors: &[u32]) -> Result<Vec<u32>> {
        let mut fat = Vec::with_capacity(fat_sectors.len() * (self.sector_len() / 4));
        for id in fat_sectors {
            fat.extend(u32_entries(self.sector(*id)?));
        }
        // Entries past the physical end of the file can never be valid sector ids.
        fat.truncate(self.sector_count());
        Ok(fat)
    }

    fn read_directory(&self, first_dir_sector: u32) -> Result<Vec<DirEntry>> {
        let chain = follow_chain(&self.fat, first_dir_sector)?;
        let mut entries = Vec::with_capacity(chain.len() * self.sector_len() / DIR_ENTRY_LEN);
        for id in chain {
            for raw in self.sector(id)?.chunks_exact(DIR_ENTRY_LEN) {
                entries.push(parse_dir_entry(raw, self.version)?);
            }
        }
        match entries.first() {
            Some(root) if root.entry_type == EntryType::Root => Ok(entries),
            _ => Err(OffcryptError::malformed(
                "first directory entry is not the root storage",
            )),
        }
    }

    fn walk_root_children(&self) -> Result<Vec<u32>> {
        let mut visited = vec![false; self.entries.len()];
        visited[0] = true;
        let mut out = Vec::new();
        let mut stack = vec![self.entries[0].child];
        while let Some(id) = stack.pop() {
            if id == NOSTREAM {
                continue;
            }
            let seen = visited
                .get_mut(id as usize)
                .ok_or(OffcryptError::malformed("directory entry id out of range"))?;
            if *seen {
                return Err(OffcryptError::malformed("directory tree contains a cycle"));
            }
            *seen = true;

            let entry = &self.entries[id as usize];
            match entry.entry_type {
                EntryType::Stream | EntryType::Storage => out.push(id),
                EntryType::Root => {
                    return Err(OffcryptError::malformed(
                        "root storage appears inside the directory tree",
                    ))
                }
                EntryType::Empty => {
                    return Err(OffcryptError::malformed(
                        "unallocated entry appears inside the directory tree",
                    ))
                }
            }
            stack.push(entry.right);
            stack.push(entry.left);
        }
        Ok(out)
    }

    fn read_regular_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let chain = follow_chain(&self.fat, start)?;
        if chain.len() != size.div_ceil(self.sector_len()) {
            return Err(OffcryptError::malformed(
                "sector chain length does not match the stream size",
            ));
        }
        let mut out = Vec::with_capacity(size);
        for id in chain {
            let sector = self.sector(id)?;
            let take = sector.len().min(size - out.len());
            out.extend_from_slice(&sector[..take]);
        }
        if out.len() != size {
            return Err(OffcryptError::malformed("stream data is truncated"));
        }
        Ok(out)
    }

    fn read_mini_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let chain = follow_chain(&self.mini_fat, start)?;
        if chain.len() != size.div_ceil(MINI_SECTOR_LEN) {
            return Err(OffcryptError::malformed(
                "mini sector chain length does not match the stream size",
            ));
        }
        let mut out = Vec::with_capacity(size);
        for id in chain {
            let offset = id as usize * MINI_SECTOR_LEN;
            let take = MINI_SECTOR_LEN.min(size - out.len());
            let bytes = self
                .mini_stream
                .get(offset..offset + take)
                .ok_or(OffcryptError::malformed("mini sector lies beyond the mini stream"))?;
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    let mut r = Reader::new(bytes, OffcryptError::malformed);
    if r.take(8, "CFB signature")? != CFB_SIGNATURE {
        return Err(OffcryptError::malformed("missing CFB signature"));
    }
    r.skip(16, "CFB header CLSID")?;
    let minor = r.read_u16_le("CFB minor version")?;
    let major = r.read_u16_le("CFB major version")?;
    let byte_order = r.read_u16_le("CFB byte order")?;
    let sector_shift = r.read_u16_le("CFB sector shift")?;
    let mini_sector_shift = r.read_u16_le("CFB mini sector shift")?;
    r.skip(6, "CFB reserved")?;
    let _num_dir_sectors = r.read_u32_le("CFB directory sector count")?;
    let num_fat_sectors = r.read_u32_le("CFB FAT sector count")?;
    let first_dir_sector = r.read_u32_le("CFB first directory sector")?;
    let _transaction = r.read_u32_le("CFB transaction signature")?;
    let mini_stream_cutoff = r.read_u32_le("CFB mini stream cutoff")?;
    let first_mini_fat_sector = r.read_u32_le("CFB first mini FAT sector")?;
    let num_mini_fat_sectors = r.read_u32_le("CFB mini FAT sector count")?;
    let first_difat_sector = r.read_u32_le("CFB first DIFAT sector")?;
    let num_difat_sectors = r.read_u32_le("CFB DIFAT sector count")?;
    let mut difat = Vec::with_capacity(HEADER_DIFAT_ENTRIES);
    for _ in 0..HEADER_DIFAT_ENTRIES {
        difat.push(r.read_u32_le("CFB header DIFAT")?);
    }

    if minor != super::MINOR_VERSION {
        log::trace!("unexpected CFB minor version {minor:#06x}");
    }
    let version = match (major, sector_shift) {
        (3, 9) => CfbVersion::V3,
        (4, 12) => CfbVersion::V4,
        (3 | 4, _) => {
            return Err(OffcryptError::malformed(
                "sector shift does not match the CFB major version",
            ))
        }
        _ => return Err(OffcryptError::malformed("unsupported CFB major version")),
    };
    if byte_order != BYTE_ORDER_MARK {
        return Err(OffcryptError::malformed("invalid CFB byte order mark"));
    }
    if mini_sector_shift != MINI_SECTOR_SHIFT {
        return Err(OffcryptError::malformed("invalid CFB mini sector shift"));
    }
    if mini_stream_cutoff != MINI_STREAM_CUTOFF {
        return Err(OffcryptError::malformed("invalid CFB mini stream cutoff"));
    }

    Ok(Header {
        version,
        num_fat_sectors,
        first_dir_sector,
        first_mini_fat_sector,
        num_mini_fat_sectors,
        first_difat_sector,
        num_difat_sectors,
        difat,
    })
}

fn parse_dir_entry(raw: &[u8], version: CfbVersion) -> Result<DirEntry> {
    let mut r = Reader::new(raw, OffcryptError::malformed);
    let name_bytes = r.take(64, "directory entry name")?;
    let name_len = r.read_u16_le("directory entry name length")? as usize;
    let entry_type = EntryType::from_u8(r.read_u8("directory entry type")?)
        .ok_or(OffcryptError::malformed("invalid directory entry type"))?;
    let _color = r.read_u8("directory entry color")?;
    let left = r.read_u32_le("directory entry left sibling")?;
    let right = r.read_u32_le("directory entry right sibling")?;
    let child = r.read_u32_le("directory entry child")?;
    r.skip(16 + 4 + 8 + 8, "directory entry CLSID/state/timestamps")?;
    let start_sector = r.read_u32_le("directory entry start sector")?;
    let mut size = r.read_u64_le("directory entry size")?;
    if version == CfbVersion::V3 {
        // v3 writers may leave garbage in the high DWORD.
        size &= 0xFFFF_FFFF;
    }

    if entry_type == EntryType::Empty {
        return Ok(DirEntry {
            name: String::new(),
            entry_type,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            start_sector,
            size: 0,
        });
    }

    if name_len > 64 || name_len % 2 != 0 {
        return Err(OffcryptError::malformed("invalid directory entry name length"));
    }
    let units: Vec<u16> = name_bytes[..name_len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();

    Ok(DirEntry {
        name: String::from_utf16_lossy(&units),
        entry_type,
        left,
        right,
        child,
        start_sector,
        size,
    })
}

/// Collect the sector ids of the chain starting at `start`.
///
/// The chain must end in `ENDOFCHAIN`; free or reserved markers, out-of-range ids and cycles are
/// all malformed.
fn follow_chain(table: &[u32], start: u32) -> Result<Vec<u32>> {
    let mut chain = Vec::new();
    let mut visited = vec![false; table.len()];
    let mut current = start;
    while current != ENDOFCHAIN {
        if current > MAXREGSECT {
            return Err(OffcryptError::malformed(
                "sector chain references a free or reserved sector",
            ));
        }
        let seen = visited
            .get_mut(current as usize)
            .ok_or(OffcryptError::malformed("sector chain id out of range"))?;
        if *seen {
            return Err(OffcryptError::malformed("sector chain contains a cycle"));
        }
        *seen = true;
        chain.push(current);
        current = table[current as usize];
    }
    Ok(chain)
}

fn u32_entries(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

/// Validate a declared stream size before anything is allocated for it.
fn checked_size(data: &[u8], size: u64) -> Result<usize> {
    if size > u64::from(u32::MAX) {
        return Err(OffcryptError::OversizedInput { size });
    }
    if size > data.len() as u64 {
        return Err(OffcryptError::malformed("stream size exceeds the file size"));
    }
    Ok(size as usize)
}
