//! In-memory model of one package's Intent Firewall rule file.
//!
//! The on-device format is:
//!
//! ```xml
//! <rules>
//!   <activity block="true" log="false">
//!     <component-filter name="com.example/com.example.MainActivity" />
//!   </activity>
//!   <broadcast block="true" log="false">...</broadcast>
//!   <service block="true" log="false">...</service>
//! </rules>
//! ```
//!
//! Only `component-filter` elements that are direct children of a bucket
//! are modelled as filters. Every other rule (`intent-filter`, `sender`,
//! `<not>`/`<and>`/`<or>` composites, unknown top-level elements) is kept
//! verbatim as a fragment and written back after the filters of its bucket.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use tracing::debug;

use crate::component::ComponentType;
use crate::error::{BlockerError, Result};

const ROOT_TAG: &[u8] = b"rules";
const FILTER_TAG: &[u8] = b"component-filter";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// One `<activity>`, `<broadcast>` or `<service>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub block: bool,
    pub log: bool,
    filters: Vec<String>,
    /// Serialized non-`component-filter` children.
    other: Vec<String>,
}

impl Default for Bucket {
    fn default() -> Self {
        Self {
            block: true,
            log: false,
            filters: Vec::new(),
            other: Vec::new(),
        }
    }
}

impl Bucket {
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Rules this crate does not model, as XML fragments.
    pub fn other_rules(&self) -> &[String] {
        &self.other
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.other.is_empty()
    }

    fn contains(&self, filter: &str) -> bool {
        self.filters.iter().any(|f| f == filter)
    }

    fn insert(&mut self, filter: &str) -> bool {
        if self.contains(filter) {
            return false;
        }
        self.filters.push(filter.to_string());
        true
    }

    fn remove(&mut self, filter: &str) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f != filter);
        self.filters.len() != before
    }
}

/// The three component buckets of a rule file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Rules {
    activity: Bucket,
    broadcast: Bucket,
    service: Bucket,
    /// Top-level elements other than the three buckets.
    other: Vec<String>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket for `kind`, or `None` for providers.
    pub fn bucket(&self, kind: ComponentType) -> Option<&Bucket> {
        match kind {
            ComponentType::Activity => Some(&self.activity),
            ComponentType::Receiver => Some(&self.broadcast),
            ComponentType::Service => Some(&self.service),
            ComponentType::Provider => None,
        }
    }

    fn bucket_mut(&mut self, kind: ComponentType) -> Option<&mut Bucket> {
        match kind {
            ComponentType::Activity => Some(&mut self.activity),
            ComponentType::Receiver => Some(&mut self.broadcast),
            ComponentType::Service => Some(&mut self.service),
            ComponentType::Provider => None,
        }
    }

    /// Filters held in the bucket for `kind` (empty for providers).
    pub fn filters(&self, kind: ComponentType) -> &[String] {
        self.bucket(kind).map(Bucket::filters).unwrap_or(&[])
    }

    /// Add `filter` to the bucket for `kind`.
    ///
    /// The filter is first removed from the other buckets so it lives in at
    /// most one. Returns `true` if the rule set changed.
    pub fn insert(&mut self, kind: ComponentType, filter: &str) -> Result<bool> {
        if kind == ComponentType::Provider {
            return Err(BlockerError::UnsupportedComponent(format!(
                "{} is a content provider; the intent firewall cannot block providers",
                filter
            )));
        }
        let mut moved = false;
        for other in ComponentType::IFW_KINDS {
            if other != kind {
                if let Some(bucket) = self.bucket_mut(other) {
                    moved |= bucket.remove(filter);
                }
            }
        }
        let added = self
            .bucket_mut(kind)
            .map(|bucket| bucket.insert(filter))
            .unwrap_or(false);
        Ok(added || moved)
    }

    /// Remove `filter` from every bucket. Returns `true` if it was present.
    pub fn remove(&mut self, filter: &str) -> bool {
        let mut removed = false;
        for kind in ComponentType::IFW_KINDS {
            if let Some(bucket) = self.bucket_mut(kind) {
                removed |= bucket.remove(filter);
            }
        }
        removed
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.kind_of(filter).is_some()
    }

    /// Bucket the filter currently lives in.
    pub fn kind_of(&self, filter: &str) -> Option<ComponentType> {
        ComponentType::IFW_KINDS
            .into_iter()
            .find(|kind| self.bucket(*kind).is_some_and(|b| b.contains(filter)))
    }

    /// Number of component filters.
    pub fn len(&self) -> usize {
        self.activity.filters.len() + self.broadcast.filters.len() + self.service.filters.len()
    }

    /// Number of preserved rules that are not component filters.
    pub fn other_len(&self) -> usize {
        self.other.len()
            + self.activity.other.len()
            + self.broadcast.other.len()
            + self.service.other.len()
    }

    /// `true` when the document holds no rule of any kind.
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.other_len() == 0
    }

    /// Iterate `(kind, filter)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentType, &str)> {
        ComponentType::IFW_KINDS.into_iter().flat_map(move |kind| {
            self.filters(kind)
                .iter()
                .map(move |filter| (kind, filter.as_str()))
        })
    }

    /// Parse a rule document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut rules = Rules::new();
        let mut seen_root = false;
        let mut current: Option<ComponentType> = None;
        let mut buf = Vec::new();
        let mut skip_buf = Vec::new();

        loop {
            let step = match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => Some((e.into_owned(), true)),
                Ok(Event::Empty(e)) => Some((e.into_owned(), false)),
                Ok(Event::End(_)) => {
                    // Nested elements are consumed whole, so any end tag seen
                    // here closes a bucket or the root.
                    current = None;
                    None
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(parse_error(&reader, e)),
                _ => None,
            };
            buf.clear();
            let Some((start, has_children)) = step else {
                continue;
            };

            if !seen_root {
                if start.name().as_ref() != ROOT_TAG {
                    return Err(BlockerError::Xml(format!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(start.name().as_ref())
                    )));
                }
                seen_root = true;
                continue;
            }

            match current {
                None => {
                    if let Some(kind) = ComponentType::from_ifw_tag(start.name().as_ref()) {
                        let (block, log) = read_bucket_attrs(&start)?;
                        if let Some(bucket) = rules.bucket_mut(kind) {
                            bucket.block = block;
                            bucket.log = log;
                        }
                        if has_children {
                            current = Some(kind);
                        }
                    } else {
                        let fragment =
                            capture_element(&mut reader, start, has_children, &mut skip_buf)?;
                        debug!(fragment = %fragment, "Keeping top-level IFW element");
                        rules.other.push(fragment);
                    }
                }
                Some(kind) => {
                    let name = if start.name().as_ref() == FILTER_TAG {
                        read_attr(&start, b"name")?
                    } else {
                        None
                    };
                    match name {
                        Some(filter) => {
                            if has_children {
                                reader
                                    .read_to_end_into(start.name(), &mut skip_buf)
                                    .map_err(|e| parse_error(&reader, e))?;
                                skip_buf.clear();
                            }
                            rules.insert(kind, &filter)?;
                        }
                        None => {
                            let fragment =
                                capture_element(&mut reader, start, has_children, &mut skip_buf)?;
                            if let Some(bucket) = rules.bucket_mut(kind) {
                                bucket.other.push(fragment);
                            }
                        }
                    }
                }
            }
        }

        if !seen_root {
            return Err(BlockerError::Xml("missing <rules> root element".into()));
        }
        Ok(rules)
    }

    /// Serialize to a rule document. Empty buckets are omitted.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Start(BytesStart::new("rules")))?;

        for kind in ComponentType::IFW_KINDS {
            let (Some(tag), Some(bucket)) = (kind.ifw_tag(), self.bucket(kind)) else {
                continue;
            };
            if bucket.is_empty() {
                continue;
            }
            let start = BytesStart::new(tag).with_attributes([
                ("block", bool_str(bucket.block)),
                ("log", bool_str(bucket.log)),
            ]);
            writer.write_event(Event::Start(start))?;
            for filter in &bucket.filters {
                let elem = BytesStart::new("component-filter")
                    .with_attributes([("name", filter.as_str())]);
                writer.write_event(Event::Empty(elem))?;
            }
            for fragment in &bucket.other {
                write_fragment(&mut writer, fragment)?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        for fragment in &self.other {
            write_fragment(&mut writer, fragment)?;
        }

        writer.write_event(Event::End(BytesEnd::new("rules")))?;
        let mut xml = into_string(writer)?;
        xml.push('\n');
        Ok(xml)
    }
}

fn parse_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> BlockerError {
    BlockerError::Xml(format!(
        "parse error at position {}: {}",
        reader.error_position(),
        err
    ))
}

/// Serialize `start` and, if it has children, everything up to its end tag.
fn capture_element(
    reader: &mut Reader<&[u8]>,
    start: BytesStart<'static>,
    has_children: bool,
    buf: &mut Vec<u8>,
) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    if !has_children {
        writer.write_event(Event::Empty(start))?;
        return into_string(writer);
    }

    writer.write_event(Event::Start(start))?;
    let mut depth = 1usize;
    while depth > 0 {
        match reader.read_event_into(buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Ok(Event::End(e)) => {
                depth -= 1;
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Eof) => {
                return Err(BlockerError::Xml("unexpected end of document".into()));
            }
            Ok(event) => writer.write_event(event)?,
            Err(e) => return Err(parse_error(reader, e)),
        }
        buf.clear();
    }
    into_string(writer)
}

/// Re-emit a captured fragment through the indenting writer.
fn write_fragment(writer: &mut XmlWriter, fragment: &str) -> Result<()> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return Ok(()),
            Ok(event) => writer.write_event(event)?,
            Err(e) => return Err(parse_error(&reader, e)),
        }
    }
}

fn into_string(writer: XmlWriter) -> Result<String> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| BlockerError::Xml(format!("serialized rules are not UTF-8: {e}")))
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

fn read_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| BlockerError::Xml(format!("bad attribute: {err}")))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| BlockerError::Xml(format!("bad attribute value: {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn read_bucket_attrs(e: &BytesStart<'_>) -> Result<(bool, bool)> {
    let block = read_attr(e, b"block")?.map_or(true, |v| v.trim() == "true");
    let log = read_attr(e, b"log")?.is_some_and(|v| v.trim() == "true");
    Ok((block, log))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA: &str = "com.android.camera2/com.android.camera.CaptureActivity";
    const SETTINGS: &str = "com.android.camera2/com.android.camera.settings.CameraSettingsActivity";

    #[test]
    fn test_insert_and_contains() {
        let mut rules = Rules::new();
        assert!(rules.insert(ComponentType::Activity, CAMERA).unwrap());
        assert!(rules.contains(CAMERA));
        assert_eq!(rules.kind_of(CAMERA), Some(ComponentType::Activity));
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_insert_duplicate_is_noop() {
        let mut rules = Rules::new();
        assert!(rules.insert(ComponentType::Service, CAMERA).unwrap());
        assert!(!rules.insert(ComponentType::Service, CAMERA).unwrap());
        assert_eq!(rules.filters(ComponentType::Service).len(), 1);
    }

    #[test]
    fn test_insert_moves_between_buckets() {
        let mut rules = Rules::new();
        rules.insert(ComponentType::Activity, CAMERA).unwrap();
        assert!(rules.insert(ComponentType::Receiver, CAMERA).unwrap());
        assert!(rules.filters(ComponentType::Activity).is_empty());
        assert_eq!(rules.kind_of(CAMERA), Some(ComponentType::Receiver));
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_insert_provider_rejected() {
        let mut rules = Rules::new();
        let err = rules.insert(ComponentType::Provider, CAMERA).unwrap_err();
        assert!(matches!(err, BlockerError::UnsupportedComponent(_)));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut rules = Rules::new();
        rules.insert(ComponentType::Activity, CAMERA).unwrap();
        rules.insert(ComponentType::Activity, SETTINGS).unwrap();
        assert!(rules.remove(CAMERA));
        assert!(!rules.remove(CAMERA));
        assert_eq!(rules.filters(ComponentType::Activity), [SETTINGS.to_string()]);
    }

    #[test]
    fn test_to_xml_omits_empty_buckets() {
        let mut rules = Rules::new();
        rules.insert(ComponentType::Service, CAMERA).unwrap();
        let xml = rules.to_xml().unwrap();
        assert!(xml.starts_with("<rules>"));
        assert!(xml.contains(r#"<service block="true" log="false">"#));
        assert!(xml.contains(&format!(r#"<component-filter name="{}"/>"#, CAMERA)));
        assert!(!xml.contains("<activity"));
        assert!(!xml.contains("<broadcast"));
    }

    #[test]
    fn test_parse_written_document() {
        let mut rules = Rules::new();
        rules.insert(ComponentType::Activity, CAMERA).unwrap();
        rules.insert(ComponentType::Activity, SETTINGS).unwrap();
        rules.insert(ComponentType::Receiver, "com.a/com.a.Boot").unwrap();
        let parsed = Rules::from_xml(&rules.to_xml().unwrap()).unwrap();
        assert_eq!(parsed, rules);
        assert_eq!(
            parsed.filters(ComponentType::Activity),
            [CAMERA.to_string(), SETTINGS.to_string()]
        );
    }

    #[test]
    fn test_parse_device_file_with_foreign_elements() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<rules>
  <activity block="true" log="true">
    <intent-filter>
      <action name="android.intent.action.VIEW" />
    </intent-filter>
    <component-filter name="com.x/com.x.Ads" />
  </activity>
  <broadcast block="false" log="false">
    <component-filter name="com.x/com.x.Boot"></component-filter>
  </broadcast>
</rules>"#;
        let rules = Rules::from_xml(xml).unwrap();
        assert_eq!(rules.kind_of("com.x/com.x.Ads"), Some(ComponentType::Activity));
        assert_eq!(rules.kind_of("com.x/com.x.Boot"), Some(ComponentType::Receiver));
        assert_eq!(rules.len(), 2);
        let activity = rules.bucket(ComponentType::Activity).unwrap();
        assert!(activity.log);
        assert_eq!(activity.other_rules().len(), 1);
        assert!(activity.other_rules()[0].starts_with("<intent-filter>"));
        assert!(!rules.bucket(ComponentType::Receiver).unwrap().block);
    }

    #[test]
    fn test_nested_filters_are_not_lifted() {
        let xml = r#"<rules>
  <activity block="true" log="false">
    <not>
      <component-filter name="com.x/com.x.Allowed"/>
    </not>
    <or>
      <component-filter name="com.x/com.x.Either"/>
      <sender type="system"/>
    </or>
    <component-filter name="com.x/com.x.Blocked"/>
  </activity>
</rules>"#;
        let rules = Rules::from_xml(xml).unwrap();
        assert_eq!(rules.kind_of("com.x/com.x.Allowed"), None);
        assert_eq!(rules.kind_of("com.x/com.x.Either"), None);
        assert_eq!(rules.kind_of("com.x/com.x.Blocked"), Some(ComponentType::Activity));
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.other_len(), 2);

        let written = rules.to_xml().unwrap();
        assert!(written.contains("<not>"));
        assert!(written.contains(r#"<component-filter name="com.x/com.x.Allowed"/>"#));
        assert!(written.contains(r#"<sender type="system"/>"#));
        assert_eq!(Rules::from_xml(&written).unwrap(), rules);
    }

    #[test]
    fn test_removing_last_filter_keeps_other_rules() {
        let xml = r#"<rules>
  <service block="true" log="false">
    <intent-filter>
      <action name="com.x.action.SYNC"/>
    </intent-filter>
    <component-filter name="com.x/com.x.A"/>
  </service>
</rules>"#;
        let mut rules = Rules::from_xml(xml).unwrap();
        assert!(rules.remove("com.x/com.x.A"));
        assert_eq!(rules.len(), 0);
        assert!(!rules.is_empty());

        let written = rules.to_xml().unwrap();
        assert!(written.contains(r#"<service block="true" log="false">"#));
        assert!(written.contains(r#"<action name="com.x.action.SYNC"/>"#));
        assert!(!written.contains("component-filter"));
    }

    #[test]
    fn test_unknown_top_level_element_is_kept() {
        let xml = r#"<rules><custom-rule block="true"><x/></custom-rule></rules>"#;
        let rules = Rules::from_xml(xml).unwrap();
        assert!(!rules.is_empty());
        assert_eq!(rules.other_len(), 1);
        assert!(rules.to_xml().unwrap().contains("<custom-rule block=\"true\">"));
    }

    #[test]
    fn test_component_filter_with_children_is_read() {
        let xml = r#"<rules><broadcast><component-filter name="com.x/com.x.R"></component-filter></broadcast></rules>"#;
        let rules = Rules::from_xml(xml).unwrap();
        assert_eq!(rules.kind_of("com.x/com.x.R"), Some(ComponentType::Receiver));
        assert_eq!(rules.other_len(), 0);
    }

    #[test]
    fn test_parse_empty_rules_element() {
        let rules = Rules::from_xml("<rules/>").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            Rules::from_xml("<rules><activity></rules>"),
            Err(BlockerError::Xml(_))
        ));
        assert!(matches!(Rules::from_xml(""), Err(BlockerError::Xml(_))));
        assert!(matches!(
            Rules::from_xml("<config/>"),
            Err(BlockerError::Xml(_))
        ));
    }

    #[test]
    fn test_parse_duplicate_filters_collapse() {
        let xml = r#"<rules><service>
            <component-filter name="com.a/com.a.S"/>
            <component-filter name="com.a/com.a.S"/>
        </service></rules>"#;
        let rules = Rules::from_xml(xml).unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_iter_in_file_order() {
        let mut rules = Rules::new();
        rules.insert(ComponentType::Service, "p/p.S").unwrap();
        rules.insert(ComponentType::Activity, "p/p.A").unwrap();
        let items: Vec<_> = rules.iter().collect();
        assert_eq!(
            items,
            vec![
                (ComponentType::Activity, "p/p.A"),
                (ComponentType::Service, "p/p.S")
            ]
        );
    }
}
