use std::collections::HashMap;

// Entity lump text: brace-delimited blocks of quoted key/value pairs. The
// parser never aborts; junk bytes advance the cursor so it always
// terminates.

pub type EntityFields = HashMap<String, String>;

const DEFAULT_LIGHT_INTENSITY: f32 = 300.0;
const DEFAULT_SPOT_RADIUS: f32 = 64.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PointLightEntity {
    pub origin: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotLightEntity {
    pub origin: [f32; 3],
    /// Unit vector from the light towards its target.
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    /// Full cone angle in radians, `atan(radius / distance)`.
    pub spot_angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    PointLight(PointLightEntity),
    SpotLight(SpotLightEntity),
    Map(EntityFields),
}

/// Parses the entity lump into raw key/value records, in source order.
/// Duplicate keys inside a block keep the last occurrence.
pub fn parse_entities(text: &str) -> Vec<EntityFields> {
    let mut entities = Vec::new();
    let mut cursor = Cursor::new(text);

    loop {
        cursor.skip_whitespace();
        let Some(byte) = cursor.peek() else {
            break;
        };
        if cursor.at_comment() {
            cursor.skip_line();
            continue;
        }
        if byte != b'{' {
            cursor.advance();
            continue;
        }
        cursor.advance();

        let mut fields = EntityFields::new();
        loop {
            cursor.skip_whitespace();
            match cursor.peek() {
                None => break,
                Some(b'}') => {
                    cursor.advance();
                    break;
                }
                Some(_) if cursor.at_comment() => {
                    cursor.skip_line();
                }
                Some(b'"') => {
                    let key = cursor.read_quoted();
                    if key.is_empty() {
                        continue;
                    }
                    cursor.skip_whitespace();
                    let value = if cursor.peek() == Some(b'"') {
                        cursor.read_quoted()
                    } else {
                        String::new()
                    };
                    fields.insert(key, value);
                }
                Some(_) => {
                    cursor.advance();
                }
            }
        }
        entities.push(fields);
    }

    entities
}

/// Reclassifies raw records: `light` entities become point lights, or spot
/// lights when their `target` resolves to some entity's `targetname`.
pub fn classify_entities(raw: &[EntityFields]) -> Vec<Entity> {
    let mut targets: HashMap<&str, [f32; 3]> = HashMap::new();
    for fields in raw {
        if let (Some(name), Some(origin)) = (fields.get("targetname"), fields.get("origin")) {
            if let Some(origin) = parse_vec3(origin) {
                targets.insert(name.as_str(), origin);
            }
        }
    }

    raw.iter()
        .map(|fields| classify_one(fields, &targets))
        .collect()
}

fn classify_one(fields: &EntityFields, targets: &HashMap<&str, [f32; 3]>) -> Entity {
    if fields.get("classname").map(String::as_str) != Some("light") {
        return Entity::Map(fields.clone());
    }

    let origin = fields
        .get("origin")
        .and_then(|value| parse_vec3(value))
        .unwrap_or([0.0; 3]);
    let intensity = fields
        .get("light")
        .or_else(|| fields.get("_light"))
        .and_then(|value| parse_f32(value))
        .unwrap_or(DEFAULT_LIGHT_INTENSITY);
    let color = fields
        .get("_color")
        .and_then(|value| parse_color(value))
        .unwrap_or([1.0, 1.0, 1.0]);

    let target_origin = fields
        .get("target")
        .and_then(|name| targets.get(name.as_str()));
    if let Some(target_origin) = target_origin {
        let delta = [
            target_origin[0] - origin[0],
            target_origin[1] - origin[1],
            target_origin[2] - origin[2],
        ];
        let length = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
        let direction = if length > 0.0 {
            [delta[0] / length, delta[1] / length, delta[2] / length]
        } else {
            [0.0, 0.0, -1.0]
        };
        let distance = length.max(1.0);
        let radius = fields
            .get("radius")
            .and_then(|value| parse_f32(value))
            .unwrap_or(DEFAULT_SPOT_RADIUS);
        return Entity::SpotLight(SpotLightEntity {
            origin,
            direction,
            color,
            intensity,
            spot_angle: (radius / distance).atan(),
        });
    }

    Entity::PointLight(PointLightEntity {
        origin,
        color,
        intensity,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn at_comment(&self) -> bool {
        self.bytes.get(self.pos) == Some(&b'/') && self.bytes.get(self.pos + 1) == Some(&b'/')
    }

    fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(byte) = self.peek() {
            self.advance();
            if byte == b'\n' {
                break;
            }
        }
    }

    /// Reads a quoted string starting at the opening quote. Supports the
    /// `\"`, `\\` and `\n` escapes; unknown escapes keep the backslash.
    fn read_quoted(&mut self) -> String {
        debug_assert_eq!(self.peek(), Some(b'"'));
        self.advance();

        let mut token = Vec::new();
        while let Some(byte) = self.peek() {
            if byte == b'"' {
                self.advance();
                break;
            }
            if byte == b'\\' {
                match self.bytes.get(self.pos + 1) {
                    Some(b'"') => {
                        token.push(b'"');
                        self.pos += 2;
                        continue;
                    }
                    Some(b'\\') => {
                        token.push(b'\\');
                        self.pos += 2;
                        continue;
                    }
                    Some(b'n') => {
                        token.push(b'\n');
                        self.pos += 2;
                        continue;
                    }
                    _ => {}
                }
            }
            token.push(byte);
            self.advance();
        }
        String::from_utf8_lossy(&token).into_owned()
    }
}

fn parse_f32(value: &str) -> Option<f32> {
    value.trim().parse().ok()
}

fn parse_vec3(value: &str) -> Option<[f32; 3]> {
    let mut parts = value.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some([x, y, z])
}

/// Three floats, either 0..1 or 0..255; any component above 1 switches the
/// whole triple to the byte range.
fn parse_color(value: &str) -> Option<[f32; 3]> {
    let color = parse_vec3(value)?;
    if color.iter().any(|component| *component > 1.0) {
        Some([color[0] / 255.0, color[1] / 255.0, color[2] / 255.0])
    } else {
        Some(color)
    }
}
