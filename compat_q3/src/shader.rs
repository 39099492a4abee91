use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use exporter_core::logging;
use exporter_core::vfs::Vfs;

// Quake 3 shader scripts: a free-form block language mapping a shader name
// to surface parameters and render stages. Only the subset feeding the
// exporter (flags, q3map light directives, stage textures and their
// texcoord modifiers / blend factors) is retained.

const SCRIPT_FOLDER: &str = "scripts";
const SHADER_EXTENSION: &str = "shader";

pub const SURF_NODAMAGE: u32 = 0x1;
pub const SURF_SLICK: u32 = 0x2;
pub const SURF_SKY: u32 = 0x4;
pub const SURF_LADDER: u32 = 0x8;
pub const SURF_NOIMPACT: u32 = 0x10;
pub const SURF_NOMARKS: u32 = 0x20;
pub const SURF_FLESH: u32 = 0x40;
pub const SURF_NODRAW: u32 = 0x80;
pub const SURF_HINT: u32 = 0x100;
pub const SURF_SKIP: u32 = 0x200;
pub const SURF_NOLIGHTMAP: u32 = 0x400;
pub const SURF_POINTLIGHT: u32 = 0x800;
pub const SURF_METALSTEPS: u32 = 0x1000;
pub const SURF_NOSTEPS: u32 = 0x2000;
pub const SURF_NONSOLID: u32 = 0x4000;
pub const SURF_LIGHTFILTER: u32 = 0x8000;
pub const SURF_ALPHASHADOW: u32 = 0x10000;
pub const SURF_NODLIGHT: u32 = 0x20000;
pub const SURF_DUST: u32 = 0x40000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveKind {
    #[default]
    None,
    Sine,
    Triangle,
    Square,
    Sawtooth,
    InverseSawtooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TcMod {
    #[default]
    NoOp,
    Scale {
        s: f32,
        t: f32,
    },
    Scroll {
        s: f32,
        t: f32,
    },
    Rotate {
        degrees_per_second: f32,
    },
    Turb {
        wave: WaveKind,
        base: f32,
        amplitude: f32,
        phase: f32,
        frequency: f32,
    },
    Stretch {
        wave: WaveKind,
        base: f32,
        amplitude: f32,
        phase: f32,
        frequency: f32,
    },
    /// Row-major 2x3 affine texture matrix: m00 m01 m10 m11 t0 t1.
    Transform {
        matrix: [f32; 6],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureLayer {
    pub path: PathBuf,
    pub tcmod: TcMod,
    pub blend_src: BlendFactor,
    pub blend_dst: BlendFactor,
}

impl TextureLayer {
    pub fn opaque(path: PathBuf) -> TextureLayer {
        TextureLayer {
            path,
            tcmod: TcMod::NoOp,
            blend_src: BlendFactor::One,
            blend_dst: BlendFactor::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunLight {
    pub color: [f32; 3],
    pub intensity: f32,
    pub yaw_degrees: f32,
    pub elevation_degrees: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShaderDef {
    pub name: String,
    pub surface_flags: u32,
    pub content_flags: u32,
    pub sun: Option<SunLight>,
    pub surfacelight: f32,
    pub light_image: Option<PathBuf>,
    pub layers: Vec<TextureLayer>,
}

/// Lists `*.shader` files under `scripts/` in the mount tree, sorted.
pub fn list_shader_scripts(vfs: &Vfs) -> Vec<PathBuf> {
    let root = vfs.resolve(SCRIPT_FOLDER);
    let mut scripts = Vec::new();
    collect_scripts(&root, &mut scripts);
    scripts.sort();
    scripts
}

fn collect_scripts(dir: &Path, scripts: &mut Vec<PathBuf>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_scripts(&path, scripts);
        } else if path.extension().is_some_and(|ext| ext == SHADER_EXTENSION) {
            scripts.push(path);
        }
    }
}

/// Parses every script into one table. A shader defined more than once
/// (within a script or across the sorted list) keeps the later definition.
pub fn parse_shader_scripts(vfs: &Vfs, script_paths: &[PathBuf]) -> HashMap<String, ShaderDef> {
    let mut table = HashMap::new();
    for path in script_paths {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                logging::warn(format!(
                    "failed to read shader script {}: {}",
                    path.display(),
                    err
                ));
                continue;
            }
        };
        for shader in parse_script(vfs, &text) {
            table.insert(shader.name.clone(), shader);
        }
    }
    table
}

/// Synthesizes a shader for a name no script defines: the name is an
/// extensionless texture path probed against the mount tree.
pub fn default_shader(name: &str, vfs: &Vfs) -> Option<ShaderDef> {
    let Some(path) = vfs.find_texture(&vfs.resolve(name)) else {
        logging::warn(format!("no texture found for shader {}", name));
        return None;
    };
    Some(ShaderDef {
        name: name.to_string(),
        layers: vec![TextureLayer::opaque(path)],
        ..ShaderDef::default()
    })
}

fn parse_script(vfs: &Vfs, text: &str) -> Vec<ShaderDef> {
    let mut tokenizer = Tokenizer::new(text);
    let mut shaders = Vec::new();

    while let Some(token) = tokenizer.next_token() {
        if token == "}" || token == "{" {
            continue;
        }
        let name = token;
        match tokenizer.next_token() {
            Some(open) if open == "{" => {}
            _ => {
                logging::warn(format!("expected '{{' after shader name {}", name));
                continue;
            }
        }
        if let Some(mut shader) = parse_shader_body(vfs, name, &mut tokenizer) {
            prune_layers(vfs, &mut shader);
            shaders.push(shader);
        }
    }

    shaders
}

/// Parses the body after the opening brace. A malformed argument or missing
/// brace abandons the shader and resumes after its closing brace.
fn parse_shader_body(vfs: &Vfs, name: String, tokenizer: &mut Tokenizer) -> Option<ShaderDef> {
    let mut shader = ShaderDef {
        name,
        ..ShaderDef::default()
    };

    loop {
        let Some(token) = tokenizer.next_token() else {
            logging::warn(format!("shader {} is missing its closing brace", shader.name));
            return None;
        };
        if token == "}" {
            return Some(shader);
        }
        if token == "{" {
            match parse_stage(vfs, tokenizer) {
                Ok(Some(layer)) => shader.layers.push(layer),
                Ok(None) => {}
                Err(()) => {
                    abandon(&shader.name, tokenizer, 2);
                    return None;
                }
            }
            continue;
        }
        if parse_parameter(vfs, &token, tokenizer, &mut shader).is_err() {
            abandon(&shader.name, tokenizer, 1);
            return None;
        }
    }
}

fn abandon(name: &str, tokenizer: &mut Tokenizer, mut depth: usize) {
    logging::warn(format!("abandoning malformed shader {}", name));
    while depth > 0 {
        match tokenizer.next_token() {
            None => return,
            Some(token) if token == "{" => depth += 1,
            Some(token) if token == "}" => depth -= 1,
            Some(_) => {}
        }
    }
}

fn parse_parameter(
    vfs: &Vfs,
    keyword: &str,
    tokenizer: &mut Tokenizer,
    shader: &mut ShaderDef,
) -> Result<(), ()> {
    match keyword.to_ascii_lowercase().as_str() {
        "surfaceparm" => {
            let parm = require_token(tokenizer)?;
            shader.surface_flags |= surface_parm_flag(&parm);
        }
        "q3map_sun" => {
            let r = require_f32(tokenizer)?;
            let g = require_f32(tokenizer)?;
            let b = require_f32(tokenizer)?;
            let intensity = require_f32(tokenizer)?;
            let yaw_degrees = require_f32(tokenizer)?;
            let elevation_degrees = require_f32(tokenizer)?;
            shader.sun = Some(SunLight {
                color: [r, g, b],
                intensity,
                yaw_degrees,
                elevation_degrees,
            });
        }
        "q3map_surfacelight" => {
            shader.surfacelight = require_f32(tokenizer)?;
        }
        "q3map_lightimage" => {
            let path = require_token(tokenizer)?;
            shader.light_image = Some(vfs.resolve(&path));
        }
        "q3map_sunmangle" => {
            require_token(tokenizer)?;
            require_token(tokenizer)?;
            require_token(tokenizer)?;
        }
        _ => {}
    }
    Ok(())
}

/// Parses one stage block. Returns a texture layer when the stage mapped a
/// real texture (`$lightmap` and `$whiteimage` stages yield nothing).
fn parse_stage(vfs: &Vfs, tokenizer: &mut Tokenizer) -> Result<Option<TextureLayer>, ()> {
    let mut path: Option<PathBuf> = None;
    let mut tcmod = TcMod::NoOp;
    let mut blend_src = BlendFactor::One;
    let mut blend_dst = BlendFactor::Zero;

    loop {
        let Some(token) = tokenizer.next_token() else {
            return Err(());
        };
        if token == "}" {
            break;
        }
        if token == "{" {
            skip_block(tokenizer)?;
            continue;
        }

        match token.to_ascii_lowercase().as_str() {
            "map" | "clampmap" => {
                let texture = require_token(tokenizer)?;
                if texture == "$lightmap" || texture == "$whiteimage" {
                    continue;
                }
                path = Some(vfs.resolve(&texture));
            }
            "tcmod" => {
                tcmod = parse_tcmod(tokenizer)?;
            }
            "blendfunc" => {
                if let Some((src, dst)) = parse_blendfunc(tokenizer)? {
                    blend_src = src;
                    blend_dst = dst;
                }
            }
            _ => {
                // Unknown stage keyword: skip its single argument, unless
                // the stage is ending right here.
                match tokenizer.next_token() {
                    None => return Err(()),
                    Some(arg) if arg == "}" => break,
                    Some(arg) if arg == "{" => skip_block(tokenizer)?,
                    Some(_) => {}
                }
            }
        }
    }

    Ok(path.map(|path| TextureLayer {
        path,
        tcmod,
        blend_src,
        blend_dst,
    }))
}

fn parse_tcmod(tokenizer: &mut Tokenizer) -> Result<TcMod, ()> {
    let op = require_token(tokenizer)?.to_ascii_lowercase();
    match op.as_str() {
        "scale" => {
            let s = require_f32(tokenizer)?;
            let t = require_f32(tokenizer)?;
            Ok(TcMod::Scale { s, t })
        }
        "scroll" => {
            let s = require_f32(tokenizer)?;
            let t = require_f32(tokenizer)?;
            Ok(TcMod::Scroll { s, t })
        }
        "rotate" => Ok(TcMod::Rotate {
            degrees_per_second: require_f32(tokenizer)?,
        }),
        "turb" => {
            // The wave token is optional for turb.
            let first = require_token(tokenizer)?;
            let wave = wave_kind(&first);
            let base = if wave == WaveKind::None {
                first.parse().map_err(|_| bad_number(&first))?
            } else {
                require_f32(tokenizer)?
            };
            Ok(TcMod::Turb {
                wave,
                base,
                amplitude: require_f32(tokenizer)?,
                phase: require_f32(tokenizer)?,
                frequency: require_f32(tokenizer)?,
            })
        }
        "stretch" => {
            let wave = wave_kind(&require_token(tokenizer)?);
            Ok(TcMod::Stretch {
                wave,
                base: require_f32(tokenizer)?,
                amplitude: require_f32(tokenizer)?,
                phase: require_f32(tokenizer)?,
                frequency: require_f32(tokenizer)?,
            })
        }
        "transform" => {
            let mut matrix = [0.0f32; 6];
            for slot in matrix.iter_mut() {
                *slot = require_f32(tokenizer)?;
            }
            Ok(TcMod::Transform { matrix })
        }
        _ => {
            logging::warn(format!("unknown tcmod operation: {}", op));
            Ok(TcMod::NoOp)
        }
    }
}

fn parse_blendfunc(tokenizer: &mut Tokenizer) -> Result<Option<(BlendFactor, BlendFactor)>, ()> {
    let first = require_token(tokenizer)?;
    match first.to_ascii_lowercase().as_str() {
        "add" => Ok(Some((BlendFactor::One, BlendFactor::One))),
        "filter" => Ok(Some((BlendFactor::DstColor, BlendFactor::Zero))),
        "blend" => Ok(Some((
            BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha,
        ))),
        _ => {
            let Some(src) = blend_factor(&first) else {
                logging::warn(format!("invalid blendfunc source: {}", first));
                return Ok(None);
            };
            let second = require_token(tokenizer)?;
            let Some(dst) = blend_factor(&second) else {
                logging::warn(format!("invalid blendfunc destination: {}", second));
                return Ok(None);
            };
            Ok(Some((src, dst)))
        }
    }
}

fn skip_block(tokenizer: &mut Tokenizer) -> Result<(), ()> {
    let mut depth = 1usize;
    while depth > 0 {
        match tokenizer.next_token() {
            None => return Err(()),
            Some(token) if token == "{" => depth += 1,
            Some(token) if token == "}" => depth -= 1,
            Some(_) => {}
        }
    }
    Ok(())
}

fn prune_layers(vfs: &Vfs, shader: &mut ShaderDef) {
    let name = shader.name.clone();
    shader.layers = shader
        .layers
        .drain(..)
        .filter_map(|mut layer| match vfs.find_texture(&layer.path) {
            Some(found) => {
                layer.path = found;
                Some(layer)
            }
            None => {
                logging::debug(format!(
                    "shader {} drops missing texture {}",
                    name,
                    layer.path.display()
                ));
                None
            }
        })
        .collect();

    if let Some(image) = shader.light_image.take() {
        shader.light_image = vfs.find_texture(&image);
    }
}

fn surface_parm_flag(parm: &str) -> u32 {
    match parm.to_ascii_lowercase().as_str() {
        "nodamage" => SURF_NODAMAGE,
        "slick" => SURF_SLICK,
        "sky" => SURF_SKY,
        "ladder" => SURF_LADDER,
        "noimpact" => SURF_NOIMPACT,
        "nomarks" => SURF_NOMARKS,
        "flesh" => SURF_FLESH,
        "nodraw" => SURF_NODRAW,
        "hint" => SURF_HINT,
        "skip" => SURF_SKIP,
        "nolightmap" => SURF_NOLIGHTMAP,
        "pointlight" => SURF_POINTLIGHT,
        "metalsteps" => SURF_METALSTEPS,
        "nosteps" => SURF_NOSTEPS,
        "nonsolid" => SURF_NONSOLID,
        "lightfilter" => SURF_LIGHTFILTER,
        "alphashadow" => SURF_ALPHASHADOW,
        "nodlight" => SURF_NODLIGHT,
        "dust" => SURF_DUST,
        _ => 0,
    }
}

fn wave_kind(token: &str) -> WaveKind {
    match token.to_ascii_lowercase().as_str() {
        "sin" => WaveKind::Sine,
        "triangle" => WaveKind::Triangle,
        "square" => WaveKind::Square,
        "sawtooth" => WaveKind::Sawtooth,
        "inversesawtooth" => WaveKind::InverseSawtooth,
        _ => WaveKind::None,
    }
}

fn blend_factor(token: &str) -> Option<BlendFactor> {
    match token.to_ascii_lowercase().as_str() {
        "gl_zero" => Some(BlendFactor::Zero),
        "gl_one" => Some(BlendFactor::One),
        "gl_src_color" => Some(BlendFactor::SrcColor),
        "gl_one_minus_src_color" => Some(BlendFactor::OneMinusSrcColor),
        "gl_dst_color" => Some(BlendFactor::DstColor),
        "gl_one_minus_dst_color" => Some(BlendFactor::OneMinusDstColor),
        "gl_src_alpha" => Some(BlendFactor::SrcAlpha),
        "gl_one_minus_src_alpha" => Some(BlendFactor::OneMinusSrcAlpha),
        "gl_dst_alpha" => Some(BlendFactor::DstAlpha),
        "gl_one_minus_dst_alpha" => Some(BlendFactor::OneMinusDstAlpha),
        _ => None,
    }
}

fn require_token(tokenizer: &mut Tokenizer) -> Result<String, ()> {
    match tokenizer.next_token() {
        Some(token) => Ok(token),
        None => {
            logging::warn("shader script ended mid-directive");
            Err(())
        }
    }
}

fn require_f32(tokenizer: &mut Tokenizer) -> Result<f32, ()> {
    let token = require_token(tokenizer)?;
    token.parse().map_err(|_| bad_number(&token))
}

fn bad_number(token: &str) {
    logging::warn(format!("expected a number, got {:?}", token));
}

/// Whitespace-delimited tokens; `//` comments run to end of line; a quoted
/// run is one token; braces are always single tokens.
struct Tokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Tokenizer {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn next_token(&mut self) -> Option<String> {
        self.skip_whitespace_and_comments();
        let byte = *self.bytes.get(self.pos)?;

        if byte == b'"' {
            return Some(self.parse_quoted());
        }
        if byte == b'{' || byte == b'}' {
            self.pos += 1;
            return Some((byte as char).to_string());
        }

        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'{' || b == b'}' {
                break;
            }
            self.pos += 1;
        }
        Some(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&byte) = self.bytes.get(self.pos) {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            if byte == b'/' && self.bytes.get(self.pos + 1) == Some(&b'/') {
                while let Some(&b) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn parse_quoted(&mut self) -> String {
        self.pos += 1;
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'"' {
                break;
            }
            self.pos += 1;
        }
        let token = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        if self.pos < self.bytes.len() {
            self.pos += 1;
        }
        token
    }
}
