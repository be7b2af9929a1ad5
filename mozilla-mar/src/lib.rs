// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mozilla ARchive (MAR) signature handling.

A MAR file is laid out as follows (all integers big endian):

* `MAR1` magic and a `u32` offset to the index.
* A signature section: `u64` total file size, `u32` signature count, then
  for each signature a `u32` algorithm id, `u32` length and the signature
  bytes.
* An additional section block: `u32` count, then for each section a `u32`
  block size (including the 8 byte block header), a `u32` block id and data.
* Entry content.
* The index: `u32` size followed by entries of `u32` offset, `u32` size,
  `u32` flags and a NUL terminated name.

Legacy MAR files have neither a signature section nor additional sections:
their content starts immediately after the 8 byte header. We detect this by
looking at where the first entry's content begins.

The data covered by a signature is the whole file *except* the signature
bytes themselves. Signature algorithm ids and lengths are covered. This
means a file carrying a placeholder signature of the right length hashes
identically to the same file carrying the real signature, which is what
allows signing a hash computed over a placeholder and injecting the result
afterwards.
*/

use {
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    sha2::Digest,
    std::{
        io::{Cursor, Read, Seek, SeekFrom, Write},
        str::FromStr,
    },
};

/// File magic of a MAR file.
pub const MAR_MAGIC: &[u8; 4] = b"MAR1";

/// Size of the fixed MAR header (magic + index offset).
const HEADER_SIZE: u64 = 8;

/// Upper bound on the number of signatures we accept in a signature section.
const MAX_SIGNATURES: u32 = 8;

/// Upper bound on the length of a single signature.
const MAX_SIGNATURE_LENGTH: u32 = 2048;

/// Upper bound on the number of additional sections.
const MAX_ADDITIONAL_SECTIONS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum MarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic value; not a MAR file")]
    BadMagic,

    #[error("unknown signature algorithm id: {0}")]
    UnknownSignatureAlgorithm(u32),

    #[error("unknown signature algorithm name: {0}")]
    UnknownSignatureAlgorithmName(String),

    #[error("MAR file has no signature block")]
    NoSignatureBlock,

    #[error("signature has length {actual}; {algorithm:?} requires {expected}")]
    SignatureLength {
        algorithm: SignatureAlgorithm,
        expected: usize,
        actual: usize,
    },

    #[error("malformed MAR file: {0}")]
    Malformed(String),

    #[error("MAR file too large: {0}")]
    TooLarge(&'static str),
}

/// Result type for this crate.
pub type MarResult<T> = Result<T, MarError>;

/// A signature algorithm usable in a MAR signature block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    /// RSA-PKCS1-SHA1 with a 2048 bit key.
    Sha1,
    /// RSA-PKCS1-SHA384 with a 4096 bit key.
    Sha384,
}

impl SignatureAlgorithm {
    /// The numeric id stored in the signature section.
    pub fn id(&self) -> u32 {
        match self {
            Self::Sha1 => 1,
            Self::Sha384 => 2,
        }
    }

    /// Resolve an algorithm from its numeric id.
    pub fn from_id(id: u32) -> MarResult<Self> {
        match id {
            1 => Ok(Self::Sha1),
            2 => Ok(Self::Sha384),
            _ => Err(MarError::UnknownSignatureAlgorithm(id)),
        }
    }

    /// The exact length in bytes a signature of this algorithm occupies.
    pub fn signature_length(&self) -> usize {
        match self {
            Self::Sha1 => 256,
            Self::Sha384 => 512,
        }
    }

    fn hasher(&self) -> MarHasher {
        match self {
            Self::Sha1 => MarHasher::Sha1(sha1::Sha1::new()),
            Self::Sha384 => MarHasher::Sha384(sha2::Sha384::new()),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = MarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha384" => Ok(Self::Sha384),
            _ => Err(MarError::UnknownSignatureAlgorithmName(s.to_string())),
        }
    }
}

enum MarHasher {
    Sha1(sha1::Sha1),
    Sha384(sha2::Sha384),
}

impl MarHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
        }
    }
}

/// A single signature in the signature section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureEntry {
    pub algorithm_id: u32,
    pub signature: Vec<u8>,
}

/// The signature section of a MAR file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureSection {
    /// Size of the whole MAR file, as recorded when the signature block was written.
    pub file_size: u64,
    pub signatures: Vec<SignatureEntry>,
}

impl SignatureSection {
    fn serialized_size(&self) -> u64 {
        12 + self
            .signatures
            .iter()
            .map(|s| 8 + s.signature.len() as u64)
            .sum::<u64>()
    }
}

/// An additional section, such as product information.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdditionalSection {
    pub id: u32,
    pub data: Vec<u8>,
}

/// An entry in the MAR index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Offset of the entry's content from the start of the file.
    pub offset: u32,
    pub size: u32,
    /// Permission bits of the entry.
    pub flags: u32,
    pub name: String,
}

/// Parsed structure of a MAR file.
///
/// Entry content is not held in memory: [Self::data_offset] and
/// [Self::data_length] describe where it lives in the source stream.
#[derive(Clone, Debug)]
pub struct MarFile {
    pub index_offset: u32,
    pub signatures: Option<SignatureSection>,
    pub additional: Option<Vec<AdditionalSection>>,
    pub index: Vec<IndexEntry>,
    /// Offset of the first byte of entry content.
    pub data_offset: u64,
    /// Number of content bytes between [Self::data_offset] and the index.
    pub data_length: u64,
}

impl MarFile {
    /// Parse the structure of a MAR from a seekable reader.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> MarResult<Self> {
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAR_MAGIC {
            return Err(MarError::BadMagic);
        }

        let index_offset = reader.read_u32::<BigEndian>()?;
        if (index_offset as u64) < HEADER_SIZE {
            return Err(MarError::Malformed(format!(
                "index offset {} points into header",
                index_offset
            )));
        }

        reader.seek(SeekFrom::Start(index_offset as u64))?;
        let index = read_index(reader)?;

        let data_offset = index
            .iter()
            .map(|e| e.offset as u64)
            .min()
            .unwrap_or(index_offset as u64);

        if data_offset < HEADER_SIZE || data_offset > index_offset as u64 {
            return Err(MarError::Malformed(format!(
                "entry content offset {} outside of [{}, {}]",
                data_offset, HEADER_SIZE, index_offset
            )));
        }

        for entry in &index {
            if entry.offset as u64 + entry.size as u64 > index_offset as u64 {
                return Err(MarError::Malformed(format!(
                    "entry {} extends into index",
                    entry.name
                )));
            }
        }

        reader.seek(SeekFrom::Start(HEADER_SIZE))?;

        let signatures = if data_offset > HEADER_SIZE {
            Some(read_signature_section(reader)?)
        } else {
            None
        };

        let additional = if signatures.is_some() && reader.stream_position()? + 4 <= data_offset {
            Some(read_additional_sections(reader)?)
        } else {
            None
        };

        if reader.stream_position()? > data_offset {
            return Err(MarError::Malformed(
                "header sections overlap entry content".into(),
            ));
        }

        Ok(Self {
            index_offset,
            signatures,
            additional,
            index,
            data_offset,
            data_length: index_offset as u64 - data_offset,
        })
    }

    /// Read the content of an index entry.
    pub fn read_entry<R: Read + Seek>(
        &self,
        reader: &mut R,
        entry: &IndexEntry,
    ) -> MarResult<Vec<u8>> {
        reader.seek(SeekFrom::Start(entry.offset as u64))?;
        let mut data = vec![0u8; entry.size as usize];
        reader.read_exact(&mut data)?;

        Ok(data)
    }

    /// Find an index entry by name.
    pub fn find_entry(&self, name: &str) -> Option<&IndexEntry> {
        self.index.iter().find(|e| e.name == name)
    }
}

fn read_index<R: Read>(reader: &mut R) -> MarResult<Vec<IndexEntry>> {
    let index_size = reader.read_u32::<BigEndian>()?;
    let mut data = vec![0u8; index_size as usize];
    reader.read_exact(&mut data)?;

    let len = data.len() as u64;
    let mut cursor = Cursor::new(data);
    let mut entries = vec![];

    while cursor.position() < len {
        let offset = cursor.read_u32::<BigEndian>()?;
        let size = cursor.read_u32::<BigEndian>()?;
        let flags = cursor.read_u32::<BigEndian>()?;

        let mut name = vec![];
        loop {
            let b = cursor.read_u8().map_err(|_| {
                MarError::Malformed("index entry name is not NUL terminated".into())
            })?;
            if b == 0 {
                break;
            }
            name.push(b);
        }

        entries.push(IndexEntry {
            offset,
            size,
            flags,
            name: String::from_utf8_lossy(&name).to_string(),
        });
    }

    Ok(entries)
}

fn write_index<W: Write>(writer: &mut W, entries: &[IndexEntry]) -> MarResult<()> {
    let mut data = vec![];
    for entry in entries {
        data.write_u32::<BigEndian>(entry.offset)?;
        data.write_u32::<BigEndian>(entry.size)?;
        data.write_u32::<BigEndian>(entry.flags)?;
        data.write_all(entry.name.as_bytes())?;
        data.write_u8(0)?;
    }

    let size = u32::try_from(data.len()).map_err(|_| MarError::TooLarge("index"))?;
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(&data)?;

    Ok(())
}

fn read_signature_section<R: Read>(reader: &mut R) -> MarResult<SignatureSection> {
    let file_size = reader.read_u64::<BigEndian>()?;
    let count = reader.read_u32::<BigEndian>()?;

    if count > MAX_SIGNATURES {
        return Err(MarError::Malformed(format!(
            "{} signatures exceeds maximum of {}",
            count, MAX_SIGNATURES
        )));
    }

    let mut signatures = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let algorithm_id = reader.read_u32::<BigEndian>()?;
        let size = reader.read_u32::<BigEndian>()?;

        if size > MAX_SIGNATURE_LENGTH {
            return Err(MarError::Malformed(format!(
                "signature length {} exceeds maximum of {}",
                size, MAX_SIGNATURE_LENGTH
            )));
        }

        let mut signature = vec![0u8; size as usize];
        reader.read_exact(&mut signature)?;

        signatures.push(SignatureEntry {
            algorithm_id,
            signature,
        });
    }

    Ok(SignatureSection {
        file_size,
        signatures,
    })
}

fn write_signature_section<W: Write>(writer: &mut W, section: &SignatureSection) -> MarResult<()> {
    writer.write_u64::<BigEndian>(section.file_size)?;
    writer.write_u32::<BigEndian>(section.signatures.len() as u32)?;

    for sig in &section.signatures {
        writer.write_u32::<BigEndian>(sig.algorithm_id)?;
        writer.write_u32::<BigEndian>(sig.signature.len() as u32)?;
        writer.write_all(&sig.signature)?;
    }

    Ok(())
}

fn read_additional_sections<R: Read>(reader: &mut R) -> MarResult<Vec<AdditionalSection>> {
    let count = reader.read_u32::<BigEndian>()?;

    if count > MAX_ADDITIONAL_SECTIONS {
        return Err(MarError::Malformed(format!(
            "{} additional sections exceeds maximum of {}",
            count, MAX_ADDITIONAL_SECTIONS
        )));
    }

    let mut sections = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let block_size = reader.read_u32::<BigEndian>()?;
        let id = reader.read_u32::<BigEndian>()?;

        if block_size < 8 {
            return Err(MarError::Malformed(format!(
                "additional section block size {} too small",
                block_size
            )));
        }

        let mut data = vec![0u8; block_size as usize - 8];
        reader.read_exact(&mut data)?;

        sections.push(AdditionalSection { id, data });
    }

    Ok(sections)
}

fn write_additional_sections<W: Write>(
    writer: &mut W,
    sections: &[AdditionalSection],
) -> MarResult<()> {
    writer.write_u32::<BigEndian>(sections.len() as u32)?;

    for section in sections {
        let block_size = u32::try_from(section.data.len() + 8)
            .map_err(|_| MarError::TooLarge("additional section"))?;
        writer.write_u32::<BigEndian>(block_size)?;
        writer.write_u32::<BigEndian>(section.id)?;
        writer.write_all(&section.data)?;
    }

    Ok(())
}

/// Write an unsigned MAR holding `entries` as `(name, permissions, content)`.
///
/// The output has no signature block and no additional sections. Use
/// [add_signature_block] to sign it.
pub fn write_mar<W: Write>(writer: &mut W, entries: &[(&str, u32, &[u8])]) -> MarResult<()> {
    let mut index = Vec::with_capacity(entries.len());
    let mut offset = HEADER_SIZE;

    for (name, flags, data) in entries {
        index.push(IndexEntry {
            offset: u32::try_from(offset).map_err(|_| MarError::TooLarge("entry offset"))?,
            size: u32::try_from(data.len()).map_err(|_| MarError::TooLarge("entry"))?,
            flags: *flags,
            name: name.to_string(),
        });
        offset += data.len() as u64;
    }

    writer.write_all(MAR_MAGIC)?;
    writer.write_u32::<BigEndian>(
        u32::try_from(offset).map_err(|_| MarError::TooLarge("index offset"))?,
    )?;
    for (_, _, data) in entries {
        writer.write_all(data)?;
    }
    write_index(writer, &index)?;

    Ok(())
}

/// Write a copy of `src` to `dest` carrying a single signature of `algorithm`.
///
/// Any existing signatures are replaced. When `signature` is `None`, a zeroed
/// placeholder of the algorithm's signature length is written instead.
///
/// Additional sections and entry content are copied verbatim; index offsets
/// are adjusted for the (possibly) different header size.
pub fn add_signature_block<R: Read + Seek, W: Write + Seek>(
    src: &mut R,
    dest: &mut W,
    algorithm: SignatureAlgorithm,
    signature: Option<&[u8]>,
) -> MarResult<()> {
    let signature = match signature {
        Some(data) => {
            if data.len() != algorithm.signature_length() {
                return Err(MarError::SignatureLength {
                    algorithm,
                    expected: algorithm.signature_length(),
                    actual: data.len(),
                });
            }
            data.to_vec()
        }
        None => vec![0u8; algorithm.signature_length()],
    };

    let mar = MarFile::from_reader(src)?;

    let mut section = SignatureSection {
        // Fixed up once we know the final size.
        file_size: 0,
        signatures: vec![SignatureEntry {
            algorithm_id: algorithm.id(),
            signature,
        }],
    };

    dest.seek(SeekFrom::Start(0))?;
    dest.write_all(MAR_MAGIC)?;
    dest.write_u32::<BigEndian>(0)?;
    write_signature_section(dest, &section)?;
    write_additional_sections(dest, mar.additional.as_deref().unwrap_or(&[]))?;

    let data_offset = dest.stream_position()?;

    src.seek(SeekFrom::Start(mar.data_offset))?;
    let copied = std::io::copy(&mut src.take(mar.data_length), dest)?;
    if copied != mar.data_length {
        return Err(MarError::Malformed(format!(
            "expected {} bytes of entry content; got {}",
            mar.data_length, copied
        )));
    }

    let index_offset = dest.stream_position()?;
    let delta = data_offset as i64 - mar.data_offset as i64;

    let index = mar
        .index
        .iter()
        .map(|e| {
            let offset = u32::try_from(e.offset as i64 + delta)
                .map_err(|_| MarError::TooLarge("entry offset"))?;

            Ok(IndexEntry {
                offset,
                ..e.clone()
            })
        })
        .collect::<MarResult<Vec<_>>>()?;

    write_index(dest, &index)?;
    let file_size = dest.stream_position()?;

    dest.seek(SeekFrom::Start(4))?;
    dest.write_u32::<BigEndian>(
        u32::try_from(index_offset).map_err(|_| MarError::TooLarge("index offset"))?,
    )?;

    section.file_size = file_size;
    dest.seek(SeekFrom::Start(HEADER_SIZE))?;
    write_signature_section(dest, &section)?;
    dest.seek(SeekFrom::Start(file_size))?;

    Ok(())
}

/// Compute the digests covered by each signature in a MAR's signature block.
///
/// Returns one `(algorithm, digest)` pair per signature, in signature block
/// order.
pub fn calculate_hashes<R: Read + Seek>(
    reader: &mut R,
) -> MarResult<Vec<(SignatureAlgorithm, Vec<u8>)>> {
    let mar = MarFile::from_reader(reader)?;
    let section = mar.signatures.ok_or(MarError::NoSignatureBlock)?;

    let mut hashers = section
        .signatures
        .iter()
        .map(|s| {
            let algorithm = SignatureAlgorithm::from_id(s.algorithm_id)?;
            Ok((algorithm, algorithm.hasher()))
        })
        .collect::<MarResult<Vec<_>>>()?;

    let mut covered = vec![];
    reader.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;
    covered.extend_from_slice(&header);
    covered.write_u64::<BigEndian>(section.file_size)?;
    covered.write_u32::<BigEndian>(section.signatures.len() as u32)?;
    for sig in &section.signatures {
        covered.write_u32::<BigEndian>(sig.algorithm_id)?;
        covered.write_u32::<BigEndian>(sig.signature.len() as u32)?;
    }

    for (_, h) in hashers.iter_mut() {
        h.update(&covered);
    }

    reader.seek(SeekFrom::Start(HEADER_SIZE + section.serialized_size()))?;
    let mut buffer = vec![0u8; 32768];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }

        for (_, h) in hashers.iter_mut() {
            h.update(&buffer[0..count]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(algorithm, h)| (algorithm, h.finalize()))
        .collect())
}
