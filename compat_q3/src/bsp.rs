use std::fmt;
use std::fs;
use std::path::Path;

// IBSP v46 (0x2e) container: a fixed header followed by seventeen lumps of
// homogeneous little-endian records.

pub const LUMP_COUNT: usize = 17;
pub const MAX_QPATH: usize = 64;

const MAGIC: &[u8; 4] = b"IBSP";
const VERSION: u32 = 0x2e;
const HEADER_LEN: usize = 8 + LUMP_COUNT * 8;

#[derive(Debug)]
pub enum BspError {
    Io(std::io::Error),
    Truncated,
    InvalidMagic([u8; 4]),
    UnsupportedVersion(u32),
    LumpOutOfBounds {
        lump: LumpType,
    },
    InvalidLumpSize {
        lump: LumpType,
        size: usize,
        stride: usize,
    },
}

impl fmt::Display for BspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BspError::Io(err) => write!(f, "io error: {}", err),
            BspError::Truncated => write!(f, "bsp data is truncated"),
            BspError::InvalidMagic(magic) => {
                write!(f, "invalid bsp magic: {:02x?}", magic)
            }
            BspError::UnsupportedVersion(version) => {
                write!(f, "unsupported bsp version {:#x}", version)
            }
            BspError::LumpOutOfBounds { lump } => {
                write!(f, "bsp lump out of bounds: {}", lump.name())
            }
            BspError::InvalidLumpSize { lump, size, stride } => write!(
                f,
                "bsp lump has invalid size: {} (size {}, stride {})",
                lump.name(),
                size,
                stride
            ),
        }
    }
}

impl std::error::Error for BspError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BspError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BspError {
    fn from(err: std::io::Error) -> Self {
        BspError::Io(err)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LumpType {
    Entities = 0,
    Textures = 1,
    Planes = 2,
    Nodes = 3,
    Leafs = 4,
    LeafFaces = 5,
    LeafBrushes = 6,
    Models = 7,
    Brushes = 8,
    BrushSides = 9,
    Vertexes = 10,
    MeshVerts = 11,
    Effects = 12,
    Faces = 13,
    Lightmaps = 14,
    Lightvol = 15,
    VisData = 16,
}

impl LumpType {
    fn from_index(index: usize) -> Self {
        match index {
            0 => LumpType::Entities,
            1 => LumpType::Textures,
            2 => LumpType::Planes,
            3 => LumpType::Nodes,
            4 => LumpType::Leafs,
            5 => LumpType::LeafFaces,
            6 => LumpType::LeafBrushes,
            7 => LumpType::Models,
            8 => LumpType::Brushes,
            9 => LumpType::BrushSides,
            10 => LumpType::Vertexes,
            11 => LumpType::MeshVerts,
            12 => LumpType::Effects,
            13 => LumpType::Faces,
            14 => LumpType::Lightmaps,
            15 => LumpType::Lightvol,
            _ => LumpType::VisData,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LumpType::Entities => "entities",
            LumpType::Textures => "textures",
            LumpType::Planes => "planes",
            LumpType::Nodes => "nodes",
            LumpType::Leafs => "leafs",
            LumpType::LeafFaces => "leaf_faces",
            LumpType::LeafBrushes => "leaf_brushes",
            LumpType::Models => "models",
            LumpType::Brushes => "brushes",
            LumpType::BrushSides => "brush_sides",
            LumpType::Vertexes => "vertexes",
            LumpType::MeshVerts => "meshverts",
            LumpType::Effects => "effects",
            LumpType::Faces => "faces",
            LumpType::Lightmaps => "lightmaps",
            LumpType::Lightvol => "lightvol",
            LumpType::VisData => "visdata",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Lump {
    pub offset: u32,
    pub length: u32,
}

/// The parsed container: one owned buffer plus the seventeen lump ranges.
/// Lump views are resolved against the buffer on each access, so a view can
/// never outlive the bytes backing it.
#[derive(Debug)]
pub struct Bsp {
    buffer: Vec<u8>,
    lumps: [Lump; LUMP_COUNT],
}

impl Bsp {
    pub fn read(path: &Path) -> Result<Bsp, BspError> {
        Bsp::parse(fs::read(path)?)
    }

    pub fn parse(buffer: Vec<u8>) -> Result<Bsp, BspError> {
        if buffer.len() < HEADER_LEN {
            return Err(BspError::Truncated);
        }
        if &buffer[0..4] != MAGIC {
            return Err(BspError::InvalidMagic([
                buffer[0], buffer[1], buffer[2], buffer[3],
            ]));
        }
        let version = read_u32_le(&buffer[4..8]);
        if version != VERSION {
            return Err(BspError::UnsupportedVersion(version));
        }

        let mut lumps = [Lump::default(); LUMP_COUNT];
        for (i, lump) in lumps.iter_mut().enumerate() {
            let base = 8 + i * 8;
            let offset = read_u32_le(&buffer[base..base + 4]);
            let length = read_u32_le(&buffer[base + 4..base + 8]);
            let end = offset
                .checked_add(length)
                .ok_or(BspError::LumpOutOfBounds {
                    lump: LumpType::from_index(i),
                })?;
            if end as usize > buffer.len() {
                return Err(BspError::LumpOutOfBounds {
                    lump: LumpType::from_index(i),
                });
            }
            *lump = Lump { offset, length };
        }

        Ok(Bsp { buffer, lumps })
    }

    pub fn lump(&self, kind: LumpType) -> &[u8] {
        let lump = self.lumps[kind as usize];
        let start = lump.offset as usize;
        &self.buffer[start..start + lump.length as usize]
    }

    /// Decodes a lump as a run of fixed-stride records. The lump length must
    /// be a multiple of the record stride.
    pub fn records<T: LumpRecord>(&self, kind: LumpType) -> Result<Vec<T>, BspError> {
        let data = self.lump(kind);
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if !data.len().is_multiple_of(T::STRIDE) {
            return Err(BspError::InvalidLumpSize {
                lump: kind,
                size: data.len(),
                stride: T::STRIDE,
            });
        }
        Ok(data.chunks_exact(T::STRIDE).map(T::parse_record).collect())
    }

    /// The entity lump as text, with the trailing NUL padding stripped.
    pub fn entities_text(&self) -> String {
        String::from_utf8_lossy(self.lump(LumpType::Entities))
            .trim_end_matches('\0')
            .to_string()
    }
}

/// A fixed-stride little-endian record inside a lump.
pub trait LumpRecord: Sized {
    const STRIDE: usize;

    /// Decodes one record from a chunk of exactly `STRIDE` bytes.
    fn parse_record(chunk: &[u8]) -> Self;
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct DrawVert {
    pub xyz: [f32; 3],
    pub st: [f32; 2],
    pub lightmap: [f32; 2],
    pub normal: [f32; 3],
    pub color: [u8; 4],
}

impl LumpRecord for DrawVert {
    const STRIDE: usize = 44;

    fn parse_record(chunk: &[u8]) -> Self {
        DrawVert {
            xyz: read_vec3_le(&chunk[0..12]),
            st: read_vec2_le(&chunk[12..20]),
            lightmap: read_vec2_le(&chunk[20..28]),
            normal: read_vec3_le(&chunk[28..40]),
            color: [chunk[40], chunk[41], chunk[42], chunk[43]],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceKind {
    Bad,
    Planar,
    Patch,
    TriangleSoup,
    Flare,
}

impl SurfaceKind {
    pub fn from_raw(value: i32) -> Option<SurfaceKind> {
        match value {
            0 => Some(SurfaceKind::Bad),
            1 => Some(SurfaceKind::Planar),
            2 => Some(SurfaceKind::Patch),
            3 => Some(SurfaceKind::TriangleSoup),
            4 => Some(SurfaceKind::Flare),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct FaceRecord {
    pub shader_num: i32,
    pub fog_num: i32,
    pub surface_type: i32,
    pub first_vert: i32,
    pub num_verts: i32,
    pub first_index: i32,
    pub num_indexes: i32,
    pub lightmap_num: i32,
    pub lightmap_x: i32,
    pub lightmap_y: i32,
    pub lightmap_width: i32,
    pub lightmap_height: i32,
    pub lightmap_origin: [f32; 3],
    pub lightmap_vecs: [[f32; 3]; 3],
    pub patch_width: i32,
    pub patch_height: i32,
}

impl FaceRecord {
    pub fn surface_kind(&self) -> Option<SurfaceKind> {
        SurfaceKind::from_raw(self.surface_type)
    }
}

impl LumpRecord for FaceRecord {
    const STRIDE: usize = 104;

    fn parse_record(chunk: &[u8]) -> Self {
        FaceRecord {
            shader_num: read_i32_le(&chunk[0..4]),
            fog_num: read_i32_le(&chunk[4..8]),
            surface_type: read_i32_le(&chunk[8..12]),
            first_vert: read_i32_le(&chunk[12..16]),
            num_verts: read_i32_le(&chunk[16..20]),
            first_index: read_i32_le(&chunk[20..24]),
            num_indexes: read_i32_le(&chunk[24..28]),
            lightmap_num: read_i32_le(&chunk[28..32]),
            lightmap_x: read_i32_le(&chunk[32..36]),
            lightmap_y: read_i32_le(&chunk[36..40]),
            lightmap_width: read_i32_le(&chunk[40..44]),
            lightmap_height: read_i32_le(&chunk[44..48]),
            lightmap_origin: read_vec3_le(&chunk[48..60]),
            lightmap_vecs: [
                read_vec3_le(&chunk[60..72]),
                read_vec3_le(&chunk[72..84]),
                read_vec3_le(&chunk[84..96]),
            ],
            patch_width: read_i32_le(&chunk[96..100]),
            patch_height: read_i32_le(&chunk[100..104]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRecord {
    pub name: String,
    pub surface_flags: u32,
    pub content_flags: u32,
}

impl LumpRecord for ShaderRecord {
    const STRIDE: usize = MAX_QPATH + 8;

    fn parse_record(chunk: &[u8]) -> Self {
        let name_bytes = &chunk[0..MAX_QPATH];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        ShaderRecord {
            name: String::from_utf8_lossy(&name_bytes[..name_len]).into_owned(),
            surface_flags: read_u32_le(&chunk[MAX_QPATH..MAX_QPATH + 4]),
            content_flags: read_u32_le(&chunk[MAX_QPATH + 4..MAX_QPATH + 8]),
        }
    }
}

impl LumpRecord for i32 {
    const STRIDE: usize = 4;

    fn parse_record(chunk: &[u8]) -> Self {
        read_i32_le(chunk)
    }
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_i32_le(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_vec2_le(bytes: &[u8]) -> [f32; 2] {
    [read_f32_le(&bytes[0..4]), read_f32_le(&bytes[4..8])]
}

fn read_vec3_le(bytes: &[u8]) -> [f32; 3] {
    [
        read_f32_le(&bytes[0..4]),
        read_f32_le(&bytes[4..8]),
        read_f32_le(&bytes[8..12]),
    ]
}
