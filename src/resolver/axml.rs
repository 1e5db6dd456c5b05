//! Reader for Android binary XML, limited to what a compiled
//! `AndroidManifest.xml` needs to list its components.
//!
//! The document is a `RES_XML_TYPE` chunk holding a string pool, an
//! optional resource map and a flat stream of element chunks. Only start
//! elements are inspected: `<manifest package>` and the `android:name` of
//! every component tag.

use crate::component::ComponentType;
use crate::error::{BlockerError, Result};

use super::dumpsys::KindTable;

const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_TYPE: u16 = 0x0003;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = u32::MAX;
const TYPE_STRING: u8 = 0x03;
/// Resource id of `android:name`.
const ATTR_NAME: u32 = 0x0101_0003;

const CHUNK_HEADER_LEN: usize = 8;
const ATTRIBUTE_LEN: usize = 20;

/// Components declared by one manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestComponents {
    pub package: String,
    /// Fully qualified class name to kind.
    pub components: KindTable,
}

/// Parse a compiled manifest.
pub fn parse_manifest(data: &[u8]) -> Result<ManifestComponents> {
    if read_u16(data, 0)? != RES_XML_TYPE {
        return Err(BlockerError::Apk("not a binary XML document".into()));
    }
    let header_len = read_u16(data, 2)? as usize;
    let total = (read_u32(data, 4)? as usize).min(data.len());

    let mut strings = Vec::new();
    let mut resource_ids = Vec::new();
    let mut package = String::new();
    let mut declared: Vec<(String, ComponentType)> = Vec::new();

    let mut offset = header_len;
    while offset + CHUNK_HEADER_LEN <= total {
        let kind = read_u16(data, offset)?;
        let size = read_u32(data, offset + 4)? as usize;
        if size < CHUNK_HEADER_LEN || offset + size > total {
            return Err(BlockerError::Apk(format!(
                "chunk at {offset:#x} has invalid size {size}"
            )));
        }
        let chunk = &data[offset..offset + size];
        match kind {
            RES_STRING_POOL_TYPE => strings = parse_string_pool(chunk)?,
            RES_XML_RESOURCE_MAP_TYPE => resource_ids = parse_resource_map(chunk)?,
            RES_XML_START_ELEMENT_TYPE => {
                let element = Element::parse(chunk, &strings, &resource_ids)?;
                match element.tag {
                    "manifest" => {
                        if let Some(name) = element.package {
                            package = name.to_string();
                        }
                    }
                    tag => {
                        if let (Some(kind), Some(name)) = (component_kind(tag), element.name) {
                            declared.push((name.to_string(), kind));
                        }
                    }
                }
            }
            _ => {}
        }
        offset += size;
    }

    let mut components = KindTable::new();
    for (name, kind) in declared {
        components.entry(qualify(&package, &name)).or_insert(kind);
    }
    Ok(ManifestComponents {
        package,
        components,
    })
}

fn component_kind(tag: &str) -> Option<ComponentType> {
    match tag {
        "activity" | "activity-alias" => Some(ComponentType::Activity),
        "receiver" => Some(ComponentType::Receiver),
        "service" => Some(ComponentType::Service),
        "provider" => Some(ComponentType::Provider),
        _ => None,
    }
}

/// Expand `.Foo` and bare `Foo` against the manifest package.
fn qualify(package: &str, name: &str) -> String {
    if name.starts_with('.') {
        format!("{package}{name}")
    } else if !name.contains('.') && !package.is_empty() {
        format!("{package}.{name}")
    } else {
        name.to_string()
    }
}

/// The attributes of a start element this reader cares about.
struct Element<'a> {
    tag: &'a str,
    /// `android:name`
    name: Option<&'a str>,
    /// Un-namespaced `package`
    package: Option<&'a str>,
}

impl<'a> Element<'a> {
    fn parse(chunk: &[u8], strings: &'a [String], resource_ids: &[u32]) -> Result<Self> {
        let header_len = read_u16(chunk, 2)? as usize;
        let ext = header_len;
        let tag = string_at(strings, read_u32(chunk, ext + 4)?);
        let attr_start = read_u16(chunk, ext + 8)? as usize;
        let attr_size = (read_u16(chunk, ext + 10)? as usize).max(ATTRIBUTE_LEN);
        let attr_count = read_u16(chunk, ext + 12)? as usize;

        let mut element = Element {
            tag,
            name: None,
            package: None,
        };
        for i in 0..attr_count {
            let at = ext + attr_start + i * attr_size;
            let ns = read_u32(chunk, at)?;
            let name_index = read_u32(chunk, at + 4)?;
            let raw = read_u32(chunk, at + 8)?;
            let data_type = *chunk.get(at + 15).ok_or_else(|| truncated(at + 15))?;
            let data = read_u32(chunk, at + 16)?;

            let value = if raw != NO_INDEX {
                Some(string_at(strings, raw))
            } else if data_type == TYPE_STRING {
                Some(string_at(strings, data))
            } else {
                None
            };
            let attr = string_at(strings, name_index);
            let is_android_name = resource_ids.get(name_index as usize) == Some(&ATTR_NAME)
                || (attr == "name" && ns != NO_INDEX);
            if is_android_name {
                element.name = value;
            } else if attr == "package" && ns == NO_INDEX {
                element.package = value;
            }
        }
        Ok(element)
    }
}

fn string_at(strings: &[String], index: u32) -> &str {
    strings
        .get(index as usize)
        .map(String::as_str)
        .unwrap_or_default()
}

fn parse_resource_map(chunk: &[u8]) -> Result<Vec<u32>> {
    let header_len = read_u16(chunk, 2)? as usize;
    (header_len..chunk.len())
        .step_by(4)
        .filter(|at| at + 4 <= chunk.len())
        .map(|at| read_u32(chunk, at))
        .collect()
}

fn parse_string_pool(chunk: &[u8]) -> Result<Vec<String>> {
    let header_len = read_u16(chunk, 2)? as usize;
    let count = read_u32(chunk, 8)? as usize;
    let flags = read_u32(chunk, 16)?;
    let strings_start = read_u32(chunk, 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    let mut strings = Vec::with_capacity(count.min(chunk.len() / 4));
    for i in 0..count {
        let offset = read_u32(chunk, header_len + i * 4)? as usize;
        let at = strings_start + offset;
        let s = if utf8 {
            read_utf8(chunk, at)?
        } else {
            read_utf16(chunk, at)?
        };
        strings.push(s);
    }
    Ok(strings)
}

/// UTF-8 entries carry the UTF-16 length, then the byte length; each is one
/// byte, or two when the high bit is set.
fn read_utf8(chunk: &[u8], at: usize) -> Result<String> {
    let (_, at) = read_len8(chunk, at)?;
    let (len, at) = read_len8(chunk, at)?;
    let bytes = chunk.get(at..at + len).ok_or_else(|| truncated(at))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_len8(chunk: &[u8], at: usize) -> Result<(usize, usize)> {
    let first = *chunk.get(at).ok_or_else(|| truncated(at))? as usize;
    if first & 0x80 == 0 {
        return Ok((first, at + 1));
    }
    let second = *chunk.get(at + 1).ok_or_else(|| truncated(at + 1))? as usize;
    Ok((((first & 0x7f) << 8) | second, at + 2))
}

fn read_utf16(chunk: &[u8], at: usize) -> Result<String> {
    let first = read_u16(chunk, at)? as usize;
    let (len, at) = if first & 0x8000 == 0 {
        (first, at + 2)
    } else {
        let second = read_u16(chunk, at + 2)? as usize;
        (((first & 0x7fff) << 16) | second, at + 4)
    };
    let units = (0..len)
        .map(|i| read_u16(chunk, at + i * 2))
        .collect::<Result<Vec<u16>>>()?;
    Ok(String::from_utf16_lossy(&units))
}

fn read_u16(data: &[u8], at: usize) -> Result<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated(at))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated(at))
}

fn truncated(at: usize) -> BlockerError {
    BlockerError::Apk(format!("binary XML truncated at offset {at:#x}"))
}

/// Builders for compiled manifests in tests.
#[cfg(test)]
pub(crate) mod fixture {
    use super::*;

    pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

    /// An attribute given by string pool indices.
    pub struct Attr {
        pub ns: u32,
        pub name: u32,
        pub raw: u32,
        pub data_type: u8,
        pub data: u32,
    }

    impl Attr {
        pub fn string(ns: u32, name: u32, value: u32) -> Self {
            Self {
                ns,
                name,
                raw: value,
                data_type: TYPE_STRING,
                data: value,
            }
        }
    }

    fn chunk(kind: u16, header_len: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&((body.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    pub fn string_pool(strings: &[&str], utf8: bool) -> Vec<u8> {
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for s in strings {
            offsets.push(data.len() as u32);
            if utf8 {
                data.push(s.chars().count() as u8);
                data.push(s.len() as u8);
                data.extend_from_slice(s.as_bytes());
                data.push(0);
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                data.extend_from_slice(&(units.len() as u16).to_le_bytes());
                for unit in units {
                    data.extend_from_slice(&unit.to_le_bytes());
                }
                data.extend_from_slice(&[0, 0]);
            }
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&(if utf8 { UTF8_FLAG } else { 0 }).to_le_bytes());
        body.extend_from_slice(&(28 + 4 * strings.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        for offset in offsets {
            body.extend_from_slice(&offset.to_le_bytes());
        }
        body.extend_from_slice(&data);
        chunk(RES_STRING_POOL_TYPE, 28, &body)
    }

    pub fn resource_map(ids: &[u32]) -> Vec<u8> {
        let body: Vec<u8> = ids.iter().flat_map(|id| id.to_le_bytes()).collect();
        chunk(RES_XML_RESOURCE_MAP_TYPE, 8, &body)
    }

    pub fn start_element(name: u32, attrs: &[Attr]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes()); // line
        body.extend_from_slice(&NO_INDEX.to_le_bytes()); // comment
        body.extend_from_slice(&NO_INDEX.to_le_bytes()); // ns
        body.extend_from_slice(&name.to_le_bytes());
        body.extend_from_slice(&20u16.to_le_bytes());
        body.extend_from_slice(&(ATTRIBUTE_LEN as u16).to_le_bytes());
        body.extend_from_slice(&(attrs.len() as u16).to_le_bytes());
        body.extend_from_slice(&[0; 6]);
        for attr in attrs {
            body.extend_from_slice(&attr.ns.to_le_bytes());
            body.extend_from_slice(&attr.name.to_le_bytes());
            body.extend_from_slice(&attr.raw.to_le_bytes());
            body.extend_from_slice(&8u16.to_le_bytes());
            body.push(0);
            body.push(attr.data_type);
            body.extend_from_slice(&attr.data.to_le_bytes());
        }
        chunk(RES_XML_START_ELEMENT_TYPE, 16, &body)
    }

    pub fn end_element(name: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&NO_INDEX.to_le_bytes());
        body.extend_from_slice(&NO_INDEX.to_le_bytes());
        body.extend_from_slice(&name.to_le_bytes());
        chunk(0x0103, 16, &body)
    }

    pub fn document(chunks: &[Vec<u8>]) -> Vec<u8> {
        chunk(RES_XML_TYPE, 8, &chunks.concat())
    }

    /// `com.example` with one component of each kind plus an alias.
    pub fn sample_manifest(utf8: bool) -> Vec<u8> {
        let strings = [
            "name",                          // 0, android:name via resource map
            "package",                       // 1
            ANDROID_NS,                      // 2
            "manifest",                      // 3
            "com.example",                   // 4
            "application",                   // 5
            "activity",                      // 6
            ".MainActivity",                 // 7
            "receiver",                      // 8
            "BootReceiver",                  // 9
            "service",                       // 10
            "com.google.firebase.Messaging", // 11
            "provider",                      // 12
            "androidx.core.FileProvider",    // 13
            "activity-alias",                // 14
            ".Launcher",                     // 15
        ];
        let ns = 2;
        document(&[
            string_pool(&strings, utf8),
            resource_map(&[ATTR_NAME]),
            start_element(3, &[Attr::string(NO_INDEX, 1, 4)]),
            start_element(5, &[]),
            start_element(6, &[Attr::string(ns, 0, 7)]),
            end_element(6),
            start_element(
                8,
                &[Attr {
                    ns,
                    name: 0,
                    raw: NO_INDEX,
                    data_type: TYPE_STRING,
                    data: 9,
                }],
            ),
            end_element(8),
            start_element(10, &[Attr::string(ns, 0, 11)]),
            end_element(10),
            start_element(12, &[Attr::string(ns, 0, 13)]),
            end_element(12),
            start_element(14, &[Attr::string(ns, 0, 15)]),
            end_element(14),
            end_element(5),
            end_element(3),
        ])
    }
}
