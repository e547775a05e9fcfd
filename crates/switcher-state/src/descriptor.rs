//! XML descriptor loading (C10, ambient configuration).
//!
//! Flattens an attributed XML tree into the nested keyed shape the state
//! store (C3) expects: attributes and text become object fields, and
//! repeated child elements (`MixEffectBlock`, `DownstreamKey`,
//! `ColorGenerator`, `Input`) are re-indexed into maps keyed by their
//! `index`/`id` attribute. The top-level wrapper element (`Profile` in the
//! reference descriptor) is stripped so its own attributes (e.g. `product`)
//! land at the root.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

/// A minimal single-ME descriptor, compiled in so the server is runnable
/// with zero configuration.
pub const DEFAULT_DESCRIPTOR_XML: &str = r#"<Profile product="ATEM Television Studio HD">
  <VideoMode videoMode="1080p5994"/>
  <MixEffectBlocks>
    <MixEffectBlock index="0">
      <Program input="1"/>
      <Preview input="2"/>
      <TransitionStyle style="Mix" transitionPosition="0">
        <MixParameters rate="30"/>
        <DipParameters rate="30"/>
        <WipeParameters rate="30"/>
      </TransitionStyle>
    </MixEffectBlock>
  </MixEffectBlocks>
  <DownstreamKeys/>
  <ColorGenerators/>
  <Settings>
    <Inputs>
      <Input id="1" longName="Input 1" shortName="In 1"/>
      <Input id="2" longName="Input 2" shortName="In 2"/>
      <Input id="3" longName="Input 3" shortName="In 3"/>
      <Input id="4" longName="Input 4" shortName="In 4"/>
    </Inputs>
  </Settings>
</Profile>"#;

/// Errors loading or shaping a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The underlying XML was not well-formed.
    #[error("malformed descriptor xml: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The document had no root element.
    #[error("descriptor document has no root element")]
    EmptyDocument,
    /// The root element parsed to something other than an object.
    #[error("descriptor root element did not contain an attributed body")]
    UnexpectedShape,
}

struct BuildingNode {
    attrs: Map<String, Value>,
    children: Vec<(String, Value)>,
    text: String,
}

impl BuildingNode {
    fn new() -> Self {
        Self { attrs: Map::new(), children: Vec::new(), text: String::new() }
    }

    fn finish(self) -> Value {
        let mut map = self.attrs;
        if !self.children.is_empty() {
            let mut grouped: Map<String, Value> = Map::new();
            for (tag, value) in self.children {
                match grouped.get_mut(&tag) {
                    None => {
                        grouped.insert(tag, value);
                    },
                    Some(existing) => {
                        if let Value::Array(items) = existing {
                            items.push(value);
                        } else {
                            let previous = existing.take();
                            *existing = Value::Array(vec![previous, value]);
                        }
                    },
                }
            }
            map.extend(grouped);
        }
        let text = self.text.trim();
        if !text.is_empty() && map.is_empty() {
            return Value::String(text.to_string());
        }
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text.to_string()));
        }
        Value::Object(map)
    }
}

/// Parse raw XML into a generic nested-object tree, one entry per element
/// name (mirroring an `xml.etree.ElementTree`-to-dict flattening).
fn parse_tree(xml: &str) -> Result<Value, DescriptorError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<(String, BuildingNode)> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut node = BuildingNode::new();
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    node.attrs.insert(key, Value::String(value));
                }
                stack.push((name, node));
            },
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut node = BuildingNode::new();
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    node.attrs.insert(key, Value::String(value));
                }
                let value = node.finish();
                attach(&mut stack, &mut root, name, value);
            },
            Event::Text(text) => {
                if let Some((_, node)) = stack.last_mut() {
                    node.text.push_str(&text.unescape().unwrap_or_default());
                }
            },
            Event::End(_) => {
                if let Some((name, node)) = stack.pop() {
                    let value = node.finish();
                    attach(&mut stack, &mut root, name, value);
                }
            },
            _ => {},
        }
    }

    let (name, value) = root.ok_or(DescriptorError::EmptyDocument)?;
    let mut wrapper = Map::new();
    wrapper.insert(name, value);
    Ok(Value::Object(wrapper))
}

fn attach(stack: &mut [(String, BuildingNode)], root: &mut Option<(String, Value)>, name: String, value: Value) {
    if let Some((_, parent)) = stack.last_mut() {
        parent.children.push((name, value));
    } else {
        *root = Some((name, value));
    }
}

/// Re-index `parent[container][item_tag]` (a single item or array of items)
/// into `parent[container]` as a map keyed by each item's `attr` value.
fn reindex_container(parent: &mut Map<String, Value>, container: &str, item_tag: &str, attr: &str) {
    let Some(Value::Object(container_obj)) = parent.get(container) else { return };
    let Some(items) = container_obj.get(item_tag) else { return };
    let items_vec = match items.clone() {
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut indexed = Map::new();
    for item in items_vec {
        if let Value::Object(obj) = &item {
            if let Some(key) = obj.get(attr).and_then(Value::as_str) {
                indexed.insert(key.to_string(), item.clone());
            }
        }
    }
    parent.insert(container.to_string(), Value::Object(indexed));
}

/// Load a descriptor document into the nested shape the state store
/// consumes: top-level wrapper stripped, repeated elements re-indexed.
pub fn load_descriptor(xml: &str) -> Result<Value, DescriptorError> {
    let parsed = parse_tree(xml)?;
    let Value::Object(wrapper) = parsed else { return Err(DescriptorError::UnexpectedShape) };
    let (_, profile_value) = wrapper.into_iter().next().ok_or(DescriptorError::EmptyDocument)?;
    let Value::Object(mut profile) = profile_value else { return Err(DescriptorError::UnexpectedShape) };

    reindex_container(&mut profile, "MixEffectBlocks", "MixEffectBlock", "index");
    reindex_container(&mut profile, "DownstreamKeys", "DownstreamKey", "index");
    reindex_container(&mut profile, "ColorGenerators", "ColorGenerator", "index");

    if let Some(Value::Object(mut settings)) = profile.remove("Settings") {
        reindex_container(&mut settings, "Inputs", "Input", "id");
        profile.insert("Settings".to_string(), Value::Object(settings));
    }

    Ok(Value::Object(profile))
}

/// Load the compiled-in default descriptor.
pub fn load_default() -> Value {
    load_descriptor(DEFAULT_DESCRIPTOR_XML).expect("the compiled-in default descriptor is well-formed")
}
