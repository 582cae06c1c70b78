use super::{
    compare_names, names_equal, CfbVersion, EntryType, BYTE_ORDER_MARK, DIFSECT, DIR_ENTRY_LEN,
    ENDOFCHAIN, FATSECT, FREESECT, HEADER_DIFAT_ENTRIES, HEADER_LEN, MAX_NAME_UNITS,
    MINI_SECTOR_LEN, MINI_SECTOR_SHIFT, MINI_STREAM_CUTOFF, MINOR_VERSION, NOSTREAM,
};
use crate::error::{OffcryptError, Result};
use crate::format::CFB_SIGNATURE;
use crate::util::align_up;

const VERSION: CfbVersion = CfbVersion::V3;
const SECTOR_LEN: usize = 512;
const FAT_ENTRIES_PER_SECTOR: usize = SECTOR_LEN / 4;
const DIFAT_ENTRIES_PER_SECTOR: usize = FAT_ENTRIES_PER_SECTOR - 1;
const DIR_ENTRIES_PER_SECTOR: usize = SECTOR_LEN / DIR_ENTRY_LEN;

const COLOR_RED: u8 = 0;
const COLOR_BLACK: u8 = 1;

/// Builds a v3 compound file whose root storage holds a flat list of streams.
///
/// Streams shorter than 4096 bytes go to the mini stream; everything else gets regular sectors.
#[derive(Debug, Default)]
pub struct CfbWriter<'a> {
    streams: Vec<(&'a str, &'a [u8])>,
}

/// Where a stream's bytes ended up.
#[derive(Clone, Copy)]
enum Placement {
    Empty,
    Mini { start: u32 },
    Regular { start: u32 },
}

struct Layout {
    fat_sectors: usize,
    difat_sectors: usize,
    dir_sectors: usize,
    mini_fat_sectors: usize,
    mini_stream_sectors: usize,
    regular_sectors: usize,
}

impl Layout {
    fn first_dir(&self) -> usize {
        self.fat_sectors + self.difat_sectors
    }

    fn first_mini_fat(&self) -> usize {
        self.first_dir() + self.dir_sectors
    }

    fn first_mini_stream(&self) -> usize {
        self.first_mini_fat() + self.mini_fat_sectors
    }

    fn first_regular(&self) -> usize {
        self.first_mini_stream() + self.mini_stream_sectors
    }

    fn total(&self) -> usize {
        self.first_regular() + self.regular_sectors
    }
}

impl<'a> CfbWriter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, name: &'a str, data: &'a [u8]) -> Result<&mut Self> {
        let units = name.encode_utf16().count();
        if units == 0 || units > MAX_NAME_UNITS {
            return Err(OffcryptError::InvalidOptions(format!(
                "stream name {name:?} must be 1 to {MAX_NAME_UNITS} UTF-16 code units"
            )));
        }
        if name.contains(['/', '\\', ':', '!']) {
            return Err(OffcryptError::InvalidOptions(format!(
                "stream name {name:?} contains a reserved character"
            )));
        }
        if self.streams.iter().any(|(existing, _)| names_equal(existing, name)) {
            return Err(OffcryptError::InvalidOptions(format!(
                "duplicate stream name {name:?}"
            )));
        }
        if data.len() as u64 > u64::from(u32::MAX) {
            return Err(OffcryptError::OversizedInput {
                size: data.len() as u64,
            });
        }
        self.streams.push((name, data));
        Ok(self)
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        // Mini stream placement.
        let mut placements = Vec::with_capacity(self.streams.len());
        let mut mini_fat: Vec<u32> = Vec::new();
        let mut regular_sectors = 0usize;
        for (_, data) in &self.streams {
            let placement = if data.is_empty() {
                Placement::Empty
            } else if (data.len() as u64) < u64::from(MINI_STREAM_CUTOFF) {
                let start = mini_fat.len();
                let count = data.len().div_ceil(MINI_SECTOR_LEN);
                push_chain(&mut mini_fat, start, count);
                Placement::Mini {
                    start: sector_id(start)?,
                }
            } else {
                // Relative to the first regular sector until the layout is known.
                let start = regular_sectors;
                regular_sectors += data.len().div_ceil(SECTOR_LEN);
                Placement::Regular {
                    start: sector_id(start)?,
                }
            };
            placements.push(placement);
        }
        let mini_stream_len = mini_fat.len() * MINI_SECTOR_LEN;

        let mut layout = Layout {
            fat_sectors: 0,
            difat_sectors: 0,
            dir_sectors: (self.streams.len() + 1).div_ceil(DIR_ENTRIES_PER_SECTOR),
            mini_fat_sectors: (mini_fat.len() * 4).div_ceil(SECTOR_LEN),
            mini_stream_sectors: mini_stream_len.div_ceil(SECTOR_LEN),
            regular_sectors,
        };
        // The FAT has to describe itself and the DIFAT, so grow both until they stop changing.
        loop {
            let fat_sectors = layout.total().div_ceil(FAT_ENTRIES_PER_SECTOR);
            let difat_sectors = fat_sectors
                .saturating_sub(HEADER_DIFAT_ENTRIES)
                .div_ceil(DIFAT_ENTRIES_PER_SECTOR);
            if fat_sectors == layout.fat_sectors && difat_sectors == layout.difat_sectors {
                break;
            }
            layout.fat_sectors = fat_sectors;
            layout.difat_sectors = difat_sectors;
        }
        let total = layout.total();
        let out_len = HEADER_LEN + total * SECTOR_LEN;
        if out_len as u64 > u64::from(u32::MAX) {
            return Err(OffcryptError::OversizedInput {
                size: out_len as u64,
            });
        }

        let mut fat = vec![FREESECT; layout.fat_sectors * FAT_ENTRIES_PER_SECTOR];
        fat[..layout.fat_sectors].fill(FATSECT);
        fat[layout.fat_sectors..layout.first_dir()].fill(DIFSECT);
        push_chain_at(&mut fat, layout.first_dir(), layout.dir_sectors);
        push_chain_at(&mut fat, layout.first_mini_fat(), layout.mini_fat_sectors);
        push_chain_at(&mut fat, layout.first_mini_stream(), layout.mini_stream_sectors);
        let first_regular = layout.first_regular();
        for ((_, data), placement) in self.streams.iter().zip(&mut placements) {
            if let Placement::Regular { start } = placement {
                *start = sector_id(first_regular + *start as usize)?;
                push_chain_at(&mut fat, *start as usize, data.len().div_ceil(SECTOR_LEN));
            }
        }

        let mut out = Vec::with_capacity(out_len);
        out.extend_from_slice(&header_bytes(&layout, !mini_fat.is_empty())?);

        for chunk in fat.chunks(FAT_ENTRIES_PER_SECTOR) {
            put_u32s(&mut out, chunk);
        }

        // DIFAT sectors list the FAT sectors the header could not hold.
        let overflow: Vec<u32> = (HEADER_DIFAT_ENTRIES..layout.fat_sectors)
            .map(sector_id)
            .collect::<Result<_>>()?;
        for (i, chunk) in overflow.chunks(DIFAT_ENTRIES_PER_SECTOR).enumerate() {
            let mut entries = chunk.to_vec();
            entries.resize(DIFAT_ENTRIES_PER_SECTOR, FREESECT);
            let next = if i + 1 < layout.difat_sectors {
                sector_id(layout.fat_sectors + i + 1)?
            } else {
                ENDOFCHAIN
            };
            entries.push(next);
            put_u32s(&mut out, &entries);
        }

        let directory = self.directory(&placements, &layout, mini_stream_len)?;
        out.extend_from_slice(&directory);
        pad_to_sector(&mut out);

        let mut mini_fat_table = mini_fat.clone();
        mini_fat_table.resize(layout.mini_fat_sectors * FAT_ENTRIES_PER_SECTOR, FREESECT);
        put_u32s(&mut out, &mini_fat_table);

        for ((_, data), placement) in self.streams.iter().zip(&placements) {
            if let Placement::Mini { .. } = placement {
                out.extend_from_slice(data);
                out.resize(align_up(out.len(), MINI_SECTOR_LEN), 0);
            }
        }
        pad_to_sector(&mut out);

        for ((_, data), placement) in self.streams.iter().zip(&placements) {
            if let Placement::Regular { .. } = placement {
                out.extend_from_slice(data);
                pad_to_sector(&mut out);
            }
        }

        debug_assert_eq!(out.len(), out_len);
        log::debug!(
            "wrote CFB {VERSION}: {} streams, {total} sectors ({} FAT, {} DIFAT)",
            self.streams.len(),
            layout.fat_sectors,
            layout.difat_sectors
        );
        Ok(out)
    }

    fn directory(
        &self,
        placements: &[Placement],
        layout: &Layout,
        mini_stream_len: usize,
    ) -> Result<Vec<u8>> {
        // Stream i gets directory id i + 1; id 0 is the root.
        let mut ids: Vec<usize> = (0..self.streams.len()).collect();
        ids.sort_by(|a, b| compare_names(self.streams[*a].0, self.streams[*b].0));

        let mut nodes = vec![TreeNode::default(); self.streams.len()];
        let root_child = build_tree(&ids, 0, &mut nodes);
        let max_depth = nodes.iter().map(|n| n.depth).max().unwrap_or(0);

        let mut out = Vec::with_capacity(layout.dir_sectors * SECTOR_LEN);
        let (root_start, root_size) = if mini_stream_len == 0 {
            (ENDOFCHAIN, 0)
        } else {
            (sector_id(layout.first_mini_stream())?, mini_stream_len as u64)
        };
        write_dir_entry(
            &mut out,
            &RawEntry {
                name: "Root Entry",
                entry_type: EntryType::Root,
                color: COLOR_BLACK,
                left: NOSTREAM,
                right: NOSTREAM,
                child: root_child,
                start: root_start,
                size: root_size,
            },
        );

        for (i, ((name, data), placement)) in self.streams.iter().zip(placements).enumerate() {
            let node = &nodes[i];
            // Only the bottom level is red, which keeps every root-to-leaf path's black count equal.
            let color = if node.depth == max_depth && node.depth > 0 {
                COLOR_RED
            } else {
                COLOR_BLACK
            };
            let start = match placement {
                Placement::Empty => ENDOFCHAIN,
                Placement::Mini { start } | Placement::Regular { start } => *start,
            };
            write_dir_entry(
                &mut out,
                &RawEntry {
                    name,
                    entry_type: EntryType::Stream,
                    color,
                    left: node.left,
                    right: node.right,
                    child: NOSTREAM,
                    start,
                    size: data.len() as u64,
                },
            );
        }

        while out.len() < layout.dir_sectors * SECTOR_LEN {
            write_dir_entry(
                &mut out,
                &RawEntry {
                    name: "",
                    entry_type: EntryType::Empty,
                    color: COLOR_RED,
                    left: NOSTREAM,
                    right: NOSTREAM,
                    child: NOSTREAM,
                    start: 0,
                    size: 0,
                },
            );
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct TreeNode {
    left: u32,
    right: u32,
    depth: usize,
}

impl Default for TreeNode {
    fn default() -> Self {
        Self {
            left: NOSTREAM,
            right: NOSTREAM,
            depth: 0,
        }
    }
}

/// Build a balanced binary search tree over `sorted` (stream indexes in sibling order) by
/// splitting at the median. Returns the directory id of the subtree root.
fn build_tree(sorted: &[usize], depth: usize, nodes: &mut [TreeNode]) -> u32 {
    if sorted.is_empty() {
        return NOSTREAM;
    }
    let mid = sorted.len() / 2;
    let index = sorted[mid];
    let left = build_tree(&sorted[..mid], depth + 1, nodes);
    let right = build_tree(&sorted[mid + 1..], depth + 1, nodes);
    nodes[index] = TreeNode { left, right, depth };
    // Directory ids are bounded by the stream count, which is far below u32::MAX.
    (index + 1) as u32
}

struct RawEntry<'n> {
    name: &'n str,
    entry_type: EntryType,
    color: u8,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    size: u64,
}

fn write_dir_entry(out: &mut Vec<u8>, entry: &RawEntry<'_>) {
    let mut name = [0u8; 64];
    let mut name_len = 0usize;
    for (i, unit) in entry.name.encode_utf16().take(MAX_NAME_UNITS).enumerate() {
        name[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        name_len = (i + 1) * 2;
    }
    out.extend_from_slice(&name);
    let name_field_len = if entry.entry_type == EntryType::Empty {
        0
    } else {
        // Includes the terminating NUL.
        name_len as u16 + 2
    };
    out.extend_from_slice(&name_field_len.to_le_bytes());
    out.push(entry.entry_type.as_u8());
    out.push(entry.color);
    out.extend_from_slice(&entry.left.to_le_bytes());
    out.extend_from_slice(&entry.right.to_le_bytes());
    out.extend_from_slice(&entry.child.to_le_bytes());
    // CLSID, state bits, creation and modification times.
    out.extend_from_slice(&[0u8; 16 + 4 + 8 + 8]);
    out.extend_from_slice(&entry.start.to_le_bytes());
    out.extend_from_slice(&entry.size.to_le_bytes());
}

fn header_bytes(layout: &Layout, has_mini_fat: bool) -> Result<Vec<u8>> {
    let mut h = Vec::with_capacity(HEADER_LEN);
    h.extend_from_slice(&CFB_SIGNATURE);
    h.extend_from_slice(&[0u8; 16]);
    h.extend_from_slice(&MINOR_VERSION.to_le_bytes());
    h.extend_from_slice(&VERSION.major().to_le_bytes());
    h.extend_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
    h.extend_from_slice(&VERSION.sector_shift().to_le_bytes());
    h.extend_from_slice(&MINI_SECTOR_SHIFT.to_le_bytes());
    h.extend_from_slice(&[0u8; 6]);
    // v3 files must leave the directory sector count at zero.
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&sector_id(layout.fat_sectors)?.to_le_bytes());
    h.extend_from_slice(&sector_id(layout.first_dir())?.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&MINI_STREAM_CUTOFF.to_le_bytes());
    if has_mini_fat {
        h.extend_from_slice(&sector_id(layout.first_mini_fat())?.to_le_bytes());
    } else {
        h.extend_from_slice(&ENDOFCHAIN.to_le_bytes());
    }
    h.extend_from_slice(&sector_id(layout.mini_fat_sectors)?.to_le_bytes());
    if layout.difat_sectors > 0 {
        h.extend_from_slice(&sector_id(layout.fat_sectors)?.to_le_bytes());
    } else {
        h.extend_from_slice(&ENDOFCHAIN.to_le_bytes());
    }
    h.extend_from_slice(&sector_id(layout.difat_sectors)?.to_le_bytes());
    for i in 0..HEADER_DIFAT_ENTRIES {
        let entry = if i < layout.fat_sectors {
            sector_id(i)?
        } else {
            FREESECT
        };
        h.extend_from_slice(&entry.to_le_bytes());
    }
    debug_assert_eq!(h.len(), HEADER_LEN);
    Ok(h)
}

fn sector_id(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| OffcryptError::OversizedInput {
        size: index as u64,
    })
}

/// Append a contiguous chain of `count` entries starting at `start` to a growing table.
fn push_chain(table: &mut Vec<u32>, start: usize, count: usize) {
    table.resize(start + count, ENDOFCHAIN);
    push_chain_at(table, start, count);
}

/// Link `count` contiguous sectors starting at `start` in an allocated table.
fn push_chain_at(table: &mut [u32], start: usize, count: usize) {
    for i in 0..count {
        table[start + i] = if i + 1 == count {
            ENDOFCHAIN
        } else {
            (start + i + 1) as u32
        };
    }
}

fn put_u32s(out: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn pad_to_sector(out: &mut Vec<u8>) {
    // The header occupies exactly one v3 sector, so sector alignment is absolute.
    out.resize(align_up(out.len(), SECTOR_LEN), 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfb::CfbReader;

    #[test]
    fn rejects_bad_names_and_duplicates() {
        let too_long = "n".repeat(32);
        let longest = "n".repeat(31);
        let mut w = CfbWriter::new();
        assert!(w.add_stream("", b"x").is_err());
        assert!(w.add_stream("a/b", b"x").is_err());
        assert!(w.add_stream(&too_long, b"x").is_err());
        w.add_stream(&longest, b"x").unwrap();
        w.add_stream("EncryptionInfo", b"x").unwrap();
        assert!(matches!(
            w.add_stream("encryptioninfo", b"y"),
            Err(OffcryptError::InvalidOptions(_))
        ));
    }

    #[test]
    fn empty_and_boundary_sized_streams() {
        let at_cutoff = vec![0x5Au8; 4096];
        let below_cutoff = vec![0xA5u8; 4095];
        let mut w = CfbWriter::new();
        w.add_stream("Empty", &[])
            .unwrap()
            .add_stream("AtCutoff", &at_cutoff)
            .unwrap()
            .add_stream("BelowCutoff", &below_cutoff)
            .unwrap();
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes.len() % 512, 0);

        let r = CfbReader::open(&bytes).unwrap();
        assert_eq!(r.read_stream("Empty").unwrap(), b"");
        assert_eq!(r.read_stream("AtCutoff").unwrap(), at_cutoff);
        assert_eq!(r.read_stream("BelowCutoff").unwrap(), below_cutoff);
        assert_eq!(r.find("Empty").unwrap().start_sector, ENDOFCHAIN);
    }

    #[test]
    fn many_streams_build_a_valid_tree() {
        let names: Vec<String> = (0..40).map(|i| format!("Stream{i:02}")).collect();
        let payloads: Vec<Vec<u8>> = (0..40).map(|i| vec![i as u8; i * 37]).collect();
        let mut w = CfbWriter::new();
        for (name, data) in names.iter().zip(&payloads) {
            w.add_stream(name, data).unwrap();
        }
        let bytes = w.into_bytes().unwrap();
        let r = CfbReader::open(&bytes).unwrap();
        assert_eq!(r.entries().count(), 40);
        for (name, data) in names.iter().zip(&payloads) {
            assert_eq!(&r.read_stream(name).unwrap(), data);
        }
    }

    #[test]
    fn no_streams_is_still_a_valid_file() {
        let bytes = CfbWriter::new().into_bytes().unwrap();
        let r = CfbReader::open(&bytes).unwrap();
        assert_eq!(r.entries().count(), 0);
    }
}
