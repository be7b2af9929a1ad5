// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Gecko optimized jar archives.

`omni.ja` files are zip archives with a twist: when a preload log is
present, the archive starts with a little endian `u32` holding the number
of bytes to read eagerly at startup, immediately followed by the central
directory and a first end of central directory record whose central
directory offset is `4`. Local file headers and entry data come next, in
preload order, and the archive ends with a second copy of the end of
central directory record so regular zip tools can still locate things.

This crate reads such archives (as well as regular zip files) into raw
entries, without decompressing them, and writes them back out either in
the regular layout or in the optimized layout with a preload log. Entry
data is never recompressed: each entry keeps the compression method and
bytes it was read with.

ZIP64 archives are not supported.
*/

use {
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::{
        io::{Cursor, Read, Write},
        path::Path,
    },
};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CDIR_ENTRY_SIGNATURE: u32 = 0x0201_4b50;
const CDIR_END_SIGNATURE: u32 = 0x0605_4b50;

const LOCAL_HEADER_SIZE: usize = 30;
const CDIR_ENTRY_SIZE: usize = 46;
const CDIR_END_SIZE: usize = 22;

/// General purpose flag indicating sizes and crc follow the entry data.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// FAT directory attribute.
const MSDOS_DIRECTORY_ATTR: u32 = 0x10;
/// `S_IFDIR` in the high half of the external attributes.
const UNIX_DIRECTORY_ATTR: u32 = 0o040000 << 16;

#[derive(Debug, thiserror::Error)]
pub enum JarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no end of central directory record found; not a zip archive")]
    NoCentralDirectory,

    #[error("bad signature {found:#010x} for {what}")]
    BadSignature { what: &'static str, found: u32 },

    #[error("ZIP64 archives are not supported")]
    Zip64,

    #[error("malformed jar archive: {0}")]
    Malformed(String),

    #[error("jar archive too large: {0}")]
    TooLarge(&'static str),
}

/// Result type for this crate.
pub type JarResult<T> = Result<T, JarError>;

/// An archive member with its raw (possibly compressed) data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JarEntry {
    pub name: String,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    /// Compression method. `0` is stored, `8` is deflate.
    pub compression: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub uncompressed_size: u32,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    /// Entry data exactly as stored in the archive.
    pub data: Vec<u8>,
}

impl JarEntry {
    /// Whether this central directory entry describes a directory.
    pub fn is_directory(&self) -> bool {
        let host = self.version_made_by >> 8;

        self.name.ends_with('/')
            || (host == 0 && self.external_attributes & MSDOS_DIRECTORY_ATTR != 0)
            || (host == 3 && self.external_attributes & UNIX_DIRECTORY_ATTR != 0)
    }

    fn write_local_header(&self, writer: &mut impl Write) -> JarResult<()> {
        writer.write_u32::<LittleEndian>(LOCAL_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags & !FLAG_DATA_DESCRIPTOR)?;
        writer.write_u16::<LittleEndian>(self.compression)?;
        writer.write_u16::<LittleEndian>(self.last_modified_time)?;
        writer.write_u16::<LittleEndian>(self.last_modified_date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size()?)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name_len()?)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_all(self.name.as_bytes())?;

        Ok(())
    }

    fn write_cdir_entry(&self, writer: &mut impl Write, offset: u32) -> JarResult<()> {
        writer.write_u32::<LittleEndian>(CDIR_ENTRY_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags & !FLAG_DATA_DESCRIPTOR)?;
        writer.write_u16::<LittleEndian>(self.compression)?;
        writer.write_u16::<LittleEndian>(self.last_modified_time)?;
        writer.write_u16::<LittleEndian>(self.last_modified_date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size()?)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name_len()?)?;
        // Extra field, comment, disk number.
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(self.internal_attributes)?;
        writer.write_u32::<LittleEndian>(self.external_attributes)?;
        writer.write_u32::<LittleEndian>(offset)?;
        writer.write_all(self.name.as_bytes())?;

        Ok(())
    }

    fn compressed_size(&self) -> JarResult<u32> {
        u32::try_from(self.data.len()).map_err(|_| JarError::TooLarge("entry data"))
    }

    fn name_len(&self) -> JarResult<u16> {
        u16::try_from(self.name.len()).map_err(|_| JarError::TooLarge("entry name"))
    }

    fn local_size(&self) -> usize {
        LOCAL_HEADER_SIZE + self.name.len() + self.data.len()
    }

    fn cdir_size(&self) -> usize {
        CDIR_ENTRY_SIZE + self.name.len()
    }
}

struct CdirEnd {
    entries: u16,
    cdir_size: u32,
    cdir_offset: u32,
}

fn find_cdir_end(data: &[u8]) -> JarResult<CdirEnd> {
    if data.len() < CDIR_END_SIZE {
        return Err(JarError::NoCentralDirectory);
    }

    let last = data.len() - CDIR_END_SIZE;
    let first = last.saturating_sub(u16::MAX as usize);
    let magic = CDIR_END_SIGNATURE.to_le_bytes();

    let pos = (first..=last)
        .rev()
        .find(|pos| data[*pos..*pos + 4] == magic)
        .ok_or(JarError::NoCentralDirectory)?;

    let mut cursor = Cursor::new(&data[pos + 4..]);
    let disk = cursor.read_u16::<LittleEndian>()?;
    let cdir_disk = cursor.read_u16::<LittleEndian>()?;
    let disk_entries = cursor.read_u16::<LittleEndian>()?;
    let entries = cursor.read_u16::<LittleEndian>()?;
    let cdir_size = cursor.read_u32::<LittleEndian>()?;
    let cdir_offset = cursor.read_u32::<LittleEndian>()?;

    if entries == u16::MAX || cdir_size == u32::MAX || cdir_offset == u32::MAX {
        return Err(JarError::Zip64);
    }

    if disk != 0 || cdir_disk != 0 || disk_entries != entries {
        return Err(JarError::Malformed("multi-disk archives are not supported".into()));
    }

    Ok(CdirEnd {
        entries,
        cdir_size,
        cdir_offset,
    })
}

fn write_cdir_end(
    writer: &mut impl Write,
    entries: u16,
    cdir_size: u32,
    cdir_offset: u32,
) -> JarResult<()> {
    writer.write_u32::<LittleEndian>(CDIR_END_SIGNATURE)?;
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_u16::<LittleEndian>(entries)?;
    writer.write_u16::<LittleEndian>(entries)?;
    writer.write_u32::<LittleEndian>(cdir_size)?;
    writer.write_u32::<LittleEndian>(cdir_offset)?;
    writer.write_u16::<LittleEndian>(0)?;

    Ok(())
}

fn slice<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> JarResult<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| JarError::Malformed(format!("{} extends past end of archive", what)))
}

/// Reads the entries of a jar or zip archive.
#[derive(Clone, Debug)]
pub struct JarReader {
    entries: Vec<JarEntry>,
    preload_size: Option<u32>,
    last_preloaded: Option<String>,
}

impl JarReader {
    /// Parse an archive held in memory.
    pub fn from_bytes(data: &[u8]) -> JarResult<Self> {
        let end = find_cdir_end(data)?;

        let preload_size = if end.cdir_offset == 4 {
            Some(Cursor::new(data).read_u32::<LittleEndian>()?)
        } else {
            None
        };

        let cdir = slice(
            data,
            end.cdir_offset as usize,
            end.cdir_size as usize,
            "central directory",
        )?;
        let mut cursor = Cursor::new(cdir);

        let mut entries = vec![];
        let mut last_preloaded = None;

        for _ in 0..end.entries {
            let signature = cursor.read_u32::<LittleEndian>()?;
            if signature != CDIR_ENTRY_SIGNATURE {
                return Err(JarError::BadSignature {
                    what: "central directory entry",
                    found: signature,
                });
            }

            let version_made_by = cursor.read_u16::<LittleEndian>()?;
            let version_needed = cursor.read_u16::<LittleEndian>()?;
            let flags = cursor.read_u16::<LittleEndian>()?;
            let compression = cursor.read_u16::<LittleEndian>()?;
            let last_modified_time = cursor.read_u16::<LittleEndian>()?;
            let last_modified_date = cursor.read_u16::<LittleEndian>()?;
            let crc32 = cursor.read_u32::<LittleEndian>()?;
            let compressed_size = cursor.read_u32::<LittleEndian>()?;
            let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
            let name_len = cursor.read_u16::<LittleEndian>()?;
            let extra_len = cursor.read_u16::<LittleEndian>()?;
            let comment_len = cursor.read_u16::<LittleEndian>()?;
            let _disk = cursor.read_u16::<LittleEndian>()?;
            let internal_attributes = cursor.read_u16::<LittleEndian>()?;
            let external_attributes = cursor.read_u32::<LittleEndian>()?;
            let offset = cursor.read_u32::<LittleEndian>()?;

            if compressed_size == u32::MAX || uncompressed_size == u32::MAX || offset == u32::MAX {
                return Err(JarError::Zip64);
            }

            let mut name = vec![0u8; name_len as usize];
            cursor.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| JarError::Malformed("entry name is not UTF-8".into()))?;

            let mut skip = vec![0u8; extra_len as usize + comment_len as usize];
            cursor.read_exact(&mut skip)?;

            let mut local = Cursor::new(slice(
                data,
                offset as usize,
                LOCAL_HEADER_SIZE,
                "local file header",
            )?);
            let signature = local.read_u32::<LittleEndian>()?;
            if signature != LOCAL_HEADER_SIGNATURE {
                return Err(JarError::BadSignature {
                    what: "local file header",
                    found: signature,
                });
            }
            local.set_position(26);
            let local_name_len = local.read_u16::<LittleEndian>()? as usize;
            let local_extra_len = local.read_u16::<LittleEndian>()? as usize;

            let data_offset = offset as usize + LOCAL_HEADER_SIZE + local_name_len + local_extra_len;
            let entry_data = slice(data, data_offset, compressed_size as usize, &name)?;

            let entry = JarEntry {
                name,
                version_made_by,
                version_needed,
                flags,
                compression,
                last_modified_time,
                last_modified_date,
                crc32,
                uncompressed_size,
                internal_attributes,
                external_attributes,
                data: entry_data.to_vec(),
            };

            if entry.is_directory() {
                continue;
            }

            if let Some(preload) = preload_size {
                if offset < preload {
                    last_preloaded = Some(entry.name.clone());
                }
            }

            entries.push(entry);
        }

        Ok(Self {
            entries,
            preload_size,
            last_preloaded,
        })
    }

    /// Parse an archive from a reader.
    pub fn from_reader(mut reader: impl Read) -> JarResult<Self> {
        let mut data = vec![];
        reader.read_to_end(&mut data)?;

        Self::from_bytes(&data)
    }

    /// Parse an archive from a filesystem path.
    pub fn from_path(path: impl AsRef<Path>) -> JarResult<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// File entries in central directory order. Directories are skipped.
    pub fn entries(&self) -> &[JarEntry] {
        &self.entries
    }

    /// Find an entry by name.
    pub fn entry(&self, name: &str) -> Option<&JarEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Consume the reader, yielding its entries.
    pub fn into_entries(self) -> Vec<JarEntry> {
        self.entries
    }

    /// Number of bytes flagged for eager loading, if the archive is optimized.
    pub fn preload_size(&self) -> Option<u32> {
        self.preload_size
    }

    /// Name of the last entry falling within the preloaded region.
    pub fn last_preloaded(&self) -> Option<&str> {
        self.last_preloaded.as_deref()
    }

    /// Names of all preloaded entries, in order, ending at [Self::last_preloaded].
    pub fn preload_log(&self) -> Vec<&str> {
        match &self.last_preloaded {
            Some(last) => {
                let mut names = vec![];
                for entry in &self.entries {
                    names.push(entry.name.as_str());
                    if &entry.name == last {
                        break;
                    }
                }
                names
            }
            None => vec![],
        }
    }
}

/// Assembles raw entries into a jar archive.
#[derive(Clone, Debug, Default)]
pub struct JarWriter {
    entries: Vec<JarEntry>,
    last_preloaded: Option<String>,
}

impl JarWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    ///
    /// An existing entry of the same name is replaced in place, keeping its
    /// position.
    pub fn add(&mut self, entry: JarEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Entry names in the order they will be written.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Declare the preload log.
    ///
    /// Listed entries move to the front of the archive in the given order and
    /// the last of them becomes the last preloaded entry. Names not present in
    /// the archive are ignored.
    pub fn preload(&mut self, names: &[impl AsRef<str>]) {
        let mut preloaded = vec![];

        for name in names {
            let name = name.as_ref();
            if let Some(pos) = self.entries.iter().position(|e| e.name == name) {
                preloaded.push(self.entries.remove(pos));
                self.last_preloaded = Some(name.to_string());
            }
        }

        preloaded.append(&mut self.entries);
        self.entries = preloaded;
    }

    /// Serialize the archive.
    pub fn write_to(&self, writer: &mut impl Write) -> JarResult<()> {
        let count =
            u16::try_from(self.entries.len()).map_err(|_| JarError::TooLarge("entry count"))?;
        let cdir_size = self.entries.iter().map(|e| e.cdir_size()).sum::<usize>();

        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut local_size = 0usize;
        let mut preload_end = None;

        for entry in &self.entries {
            offsets.push(local_size);
            local_size += entry.local_size();

            if self.last_preloaded.as_deref() == Some(entry.name.as_str()) {
                preload_end = Some(local_size);
            }
        }

        let to_u32 = |v: usize, what| u32::try_from(v).map_err(|_| JarError::TooLarge(what));

        if let Some(preload_end) = preload_end {
            let header_size = 4 + cdir_size + CDIR_END_SIZE;

            writer.write_u32::<LittleEndian>(to_u32(header_size + preload_end, "preload size")?)?;
            for (entry, offset) in self.entries.iter().zip(&offsets) {
                entry.write_cdir_entry(writer, to_u32(header_size + offset, "entry offset")?)?;
            }
            write_cdir_end(writer, count, to_u32(cdir_size, "central directory")?, 4)?;

            for entry in &self.entries {
                entry.write_local_header(writer)?;
                writer.write_all(&entry.data)?;
            }

            write_cdir_end(writer, count, to_u32(cdir_size, "central directory")?, 4)?;
        } else {
            for entry in &self.entries {
                entry.write_local_header(writer)?;
                writer.write_all(&entry.data)?;
            }

            for (entry, offset) in self.entries.iter().zip(&offsets) {
                entry.write_cdir_entry(writer, to_u32(*offset, "entry offset")?)?;
            }

            write_cdir_end(
                writer,
                count,
                to_u32(cdir_size, "central directory")?,
                to_u32(local_size, "central directory offset")?,
            )?;
        }

        Ok(())
    }

    /// Serialize the archive to a new file.
    pub fn write_path(&self, path: impl AsRef<Path>) -> JarResult<()> {
        let mut data = vec![];
        self.write_to(&mut data)?;
        std::fs::write(path, data)?;

        Ok(())
    }
}
