//! Chunked binary mesh stream
//!
//! Layout, little endian:
//! index width (u8), component mask (u8), scale (f64), offset (3 x f32),
//! vertex word count (u32), index count (u32), vertex words, indices.
//!
//! Per vertex: `x<<16|y`, `z<<16|rgb565` (0xFFFF without colour), then the
//! optional `nx<<22|ny<<12|nz<<2` normal word and the optional `u<<16|v` word.

use crate::error::AssetError;
use glam::Vec3;
use std::io::Read;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 1 + 1 + 8 + 12 + 4 + 4;

/// Upper bound on what a header alone may reserve; larger streams grow as data arrives
pub const MAX_HEADER_RESERVE: usize = 1 << 20;

/// Component mask bits
pub const COMPONENT_UV: u8 = 1 << 0;
pub const COMPONENT_NORMAL: u8 = 1 << 1;
pub const COMPONENT_COLOR: u8 = 1 << 2;

/// Decoded mesh stream, still in its packed form
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Declared index width in bytes (1, 2 or 4)
    pub index_width: u8,
    pub components: u8,
    pub scale: f64,
    pub offset: Vec3,
    pub vertex_words: Vec<u32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn has_color(&self) -> bool {
        self.components & COMPONENT_COLOR != 0
    }

    pub fn has_normal(&self) -> bool {
        self.components & COMPONENT_NORMAL != 0
    }

    pub fn has_uv(&self) -> bool {
        self.components & COMPONENT_UV != 0
    }

    pub fn words_per_vertex(&self) -> usize {
        2 + self.has_normal() as usize + self.has_uv() as usize
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_words.len() / self.words_per_vertex()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Object-space position of a vertex
    pub fn position(&self, vertex: usize) -> Vec3 {
        let base = vertex * self.words_per_vertex();
        let w0 = self.vertex_words[base];
        let w1 = self.vertex_words[base + 1];
        let q = Vec3::new((w0 >> 16) as f32, (w0 & 0xFFFF) as f32, (w1 >> 16) as f32);
        (q / 65535.0 - 0.5) / self.scale as f32 + self.offset
    }

    /// Local bounding sphere: every quantised position fits in the cube
    /// `offset ± 0.5 / scale`
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let half_extent = 0.5 / self.scale as f32;
        (self.offset, 3.0f32.sqrt() * half_extent)
    }

    /// Serialise back into the stream layout
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.vertex_words.len() * 4 + self.indices.len() * self.index_width as usize,
        );
        out.push(self.index_width);
        out.push(self.components);
        out.extend_from_slice(&self.scale.to_le_bytes());
        for v in self.offset.to_array() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(self.vertex_words.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.indices.len() as u32).to_le_bytes());
        for word in &self.vertex_words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        for &index in &self.indices {
            match self.index_width {
                1 => out.push(index as u8),
                2 => out.extend_from_slice(&(index as u16).to_le_bytes()),
                _ => out.extend_from_slice(&index.to_le_bytes()),
            }
        }
        out
    }

    /// Unit cube centred at the origin with normals
    pub fn cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        let mut vertex_words = Vec::with_capacity(24 * 3);
        let mut indices = Vec::with_capacity(36);
        for (face, (normal, u, v)) in faces.iter().enumerate() {
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (su, sv) in corners {
                let p = (*normal + *u * su + *v * sv) * 0.5;
                let q = ((p + 0.5) * 65535.0).round();
                vertex_words.push(((q.x as u32) << 16) | q.y as u32);
                vertex_words.push(((q.z as u32) << 16) | 0xFFFF);
                vertex_words.push(pack_normal(*normal));
            }
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self {
            index_width: 2,
            components: COMPONENT_NORMAL,
            scale: 1.0,
            offset: Vec3::ZERO,
            vertex_words,
            indices,
        }
    }
}

/// 10:10:10 unsigned normal packing, each axis mapped from -1..1 to 0..1023
pub fn pack_normal(n: Vec3) -> u32 {
    let q = ((n.clamp(Vec3::splat(-1.0), Vec3::ONE) * 0.5 + 0.5) * 1023.0).round();
    ((q.x as u32) << 22) | ((q.y as u32) << 12) | ((q.z as u32) << 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Header,
    VertexWords { remaining: usize },
    Indices { remaining: usize },
    Done,
}

impl ReadState {
    fn name(&self) -> &'static str {
        match self {
            ReadState::Header => "header",
            ReadState::VertexWords { .. } => "vertex data",
            ReadState::Indices { .. } => "index data",
            ReadState::Done => "done",
        }
    }
}

struct Header {
    index_width: u8,
    components: u8,
    scale: f64,
    offset: Vec3,
    vertex_words: usize,
    index_count: usize,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self, AssetError> {
        let index_width = bytes[0];
        if !matches!(index_width, 1 | 2 | 4) {
            return Err(AssetError::UnsupportedIndexWidth(index_width));
        }
        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        let mut scale = [0u8; 8];
        scale.copy_from_slice(&bytes[2..10]);

        Ok(Self {
            index_width,
            components: bytes[1],
            scale: f64::from_le_bytes(scale),
            offset: Vec3::new(
                f32::from_le_bytes(word(10)),
                f32::from_le_bytes(word(14)),
                f32::from_le_bytes(word(18)),
            ),
            vertex_words: u32::from_le_bytes(word(22)) as usize,
            index_count: u32::from_le_bytes(word(26)) as usize,
        })
    }
}

/// Incremental parser fed with arbitrary chunk boundaries.
///
/// Bytes that do not yet form a whole record are kept and prefixed to the next chunk.
pub struct MeshStreamParser {
    state: ReadState,
    pending: Vec<u8>,
    trailing: usize,
    index_count: usize,
    mesh: MeshData,
}

impl Default for MeshStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshStreamParser {
    pub fn new() -> Self {
        Self {
            state: ReadState::Header,
            pending: Vec::new(),
            trailing: 0,
            index_count: 0,
            mesh: MeshData {
                index_width: 0,
                components: 0,
                scale: 1.0,
                offset: Vec3::ZERO,
                vertex_words: Vec::new(),
                indices: Vec::new(),
            },
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ReadState::Done
    }

    /// Bytes held back waiting for the rest of a record
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Consume one chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), AssetError> {
        if self.state == ReadState::Done {
            self.trailing += chunk.len();
            return Ok(());
        }

        self.pending.extend_from_slice(chunk);
        let mut cursor = 0;

        loop {
            let available = &self.pending[cursor..];
            match self.state {
                ReadState::Header => {
                    if available.len() < HEADER_SIZE {
                        break;
                    }
                    let header = Header::parse(&available[..HEADER_SIZE])?;
                    cursor += HEADER_SIZE;
                    self.start(header);
                }
                ReadState::VertexWords { remaining } => {
                    let whole = (available.len() / 4).min(remaining);
                    self.mesh.vertex_words.extend(
                        available[..whole * 4]
                            .chunks_exact(4)
                            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    );
                    cursor += whole * 4;
                    if whole == remaining {
                        self.state = if self.index_count == 0 {
                            ReadState::Done
                        } else {
                            ReadState::Indices {
                                remaining: self.index_count,
                            }
                        };
                    } else {
                        self.state = ReadState::VertexWords {
                            remaining: remaining - whole,
                        };
                        break;
                    }
                }
                ReadState::Indices { remaining } => {
                    let width = self.mesh.index_width as usize;
                    let whole = (available.len() / width).min(remaining);
                    let bytes = &available[..whole * width];
                    match width {
                        1 => self.mesh.indices.extend(bytes.iter().map(|&b| b as u32)),
                        2 => self.mesh.indices.extend(
                            bytes
                                .chunks_exact(2)
                                .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32),
                        ),
                        _ => self.mesh.indices.extend(
                            bytes
                                .chunks_exact(4)
                                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                        ),
                    }
                    cursor += whole * width;
                    if whole == remaining {
                        self.state = ReadState::Done;
                    } else {
                        self.state = ReadState::Indices {
                            remaining: remaining - whole,
                        };
                        break;
                    }
                }
                ReadState::Done => {
                    self.trailing += available.len();
                    cursor = self.pending.len();
                    break;
                }
            }
        }

        self.pending.drain(..cursor);
        Ok(())
    }

    fn start(&mut self, header: Header) {
        self.mesh.index_width = header.index_width;
        self.mesh.components = header.components;
        self.mesh.scale = header.scale;
        self.mesh.offset = header.offset;
        self.mesh
            .vertex_words
            .reserve(header.vertex_words.min(MAX_HEADER_RESERVE));
        self.mesh
            .indices
            .reserve(header.index_count.min(MAX_HEADER_RESERVE));
        self.index_count = header.index_count;
        self.state = ReadState::VertexWords {
            remaining: header.vertex_words,
        };
    }

    /// Finish the stream; incomplete or overlong streams are errors
    pub fn finish(self) -> Result<MeshData, AssetError> {
        if self.state != ReadState::Done {
            return Err(AssetError::UnexpectedEnd {
                stage: self.state.name(),
            });
        }
        let trailing = self.trailing + self.pending.len();
        if trailing > 0 {
            return Err(AssetError::TrailingData(trailing));
        }
        Ok(self.mesh)
    }
}

/// Parse a complete in-memory stream
pub fn parse_mesh(bytes: &[u8]) -> Result<MeshData, AssetError> {
    let mut parser = MeshStreamParser::new();
    parser.feed(bytes)?;
    parser.finish()
}

/// Parse a stream from a reader in fixed-size chunks
pub fn read_mesh<R: Read>(mut reader: R, chunk_size: usize) -> Result<MeshData, AssetError> {
    let mut parser = MeshStreamParser::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        parser.feed(&chunk[..read])?;
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_parses_across_every_chunk_size() {
        let cube = MeshData::cube();
        let bytes = cube.encode();

        for chunk_size in [1, 3, 7, HEADER_SIZE + 1, 64, bytes.len()] {
            let mut parser = MeshStreamParser::new();
            for chunk in bytes.chunks(chunk_size) {
                parser.feed(chunk).unwrap();
            }
            let parsed = parser.finish().unwrap();
            assert_eq!(parsed, cube, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_partial_word_is_retained() {
        let bytes = MeshData::cube().encode();
        let mut parser = MeshStreamParser::new();
        parser.feed(&bytes[..HEADER_SIZE + 6]).unwrap();
        assert_eq!(parser.pending_bytes(), 2);
        parser.feed(&bytes[HEADER_SIZE + 6..]).unwrap();
        assert!(parser.is_done());
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn test_cube_geometry() {
        let cube = MeshData::cube();
        assert_eq!(cube.words_per_vertex(), 3);
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        let (center, radius) = cube.bounding_sphere();
        for i in 0..cube.vertex_count() {
            let p = cube.position(i);
            assert!(p.abs().max_element() <= 0.5 + 1e-4);
            assert!(p.distance(center) <= radius + 1e-4);
        }
    }

    #[test]
    fn test_unsupported_index_width() {
        let mut bytes = MeshData::cube().encode();
        bytes[0] = 3;
        assert!(matches!(parse_mesh(&bytes), Err(AssetError::UnsupportedIndexWidth(3))));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = MeshData::cube().encode();
        assert!(matches!(
            parse_mesh(&bytes[..bytes.len() - 1]),
            Err(AssetError::UnexpectedEnd { stage: "index data" })
        ));

        let mut extra = bytes.clone();
        extra.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(parse_mesh(&extra), Err(AssetError::TrailingData(3))));
    }

    #[test]
    fn test_huge_declared_counts_stay_bounded() {
        let mut bytes = MeshData::cube().encode();
        bytes[22..26].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[26..30].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes.truncate(HEADER_SIZE + 10);

        let mut parser = MeshStreamParser::new();
        parser.feed(&bytes).unwrap();
        assert!(parser.mesh.vertex_words.capacity() <= 2 * MAX_HEADER_RESERVE);
        assert_eq!(parser.mesh.vertex_words.len(), 2);
        assert!(matches!(
            parser.finish(),
            Err(AssetError::UnexpectedEnd { stage: "vertex data" })
        ));
    }

    #[test]
    fn test_byte_indices_widen() {
        let mut mesh = MeshData::cube();
        mesh.index_width = 1;
        let parsed = read_mesh(std::io::Cursor::new(mesh.encode()), 5).unwrap();
        assert_eq!(parsed.indices, mesh.indices);
    }
}
