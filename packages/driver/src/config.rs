//! Snapshot and restore of the topology as `zwcfg_<HomeIdHex8>.xml`.
//! The file lets a restarted application see its devices immediately
//! while live interviews refine them.

use crate::error::{Error, Result};
use crate::node::{ClassSlot, GroupInfo, InterviewStage, NodeRecord};
use homewave_cc::prelude::create_handler;
use homewave_core::prelude::*;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub fn config_file_name(home_id: HomeId) -> String {
    format!("zwcfg_{}.xml", home_id.to_hex())
}

pub fn config_file_path(user_path: &Path, home_id: HomeId) -> PathBuf {
    user_path.join(config_file_name(home_id))
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::Config(format!("config file: {}", e))
}

/// Serializes the registry and every value to the config file.
pub fn write_config(
    user_path: &Path,
    home_id: HomeId,
    own_node_id: NodeId,
    nodes: &BTreeMap<NodeId, NodeRecord>,
    values: &ValueStore,
) -> Result<PathBuf> {
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;

    let mut driver_el = BytesStart::new("Driver");
    driver_el.push_attribute(("home_id", home_id.to_hex().as_str()));
    driver_el.push_attribute(("node_id", u8::from(own_node_id).to_string().as_str()));
    writer.write_event(Event::Start(driver_el)).map_err(xml_err)?;

    for node in nodes.values() {
        write_node(&mut writer, node, values)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Driver")))
        .map_err(xml_err)?;

    let path = config_file_path(user_path, home_id);
    std::fs::write(&path, &buf).map_err(xml_err)?;
    Ok(path)
}

fn write_node(
    writer: &mut Writer<&mut Vec<u8>>,
    node: &NodeRecord,
    values: &ValueStore,
) -> Result<()> {
    let mut el = BytesStart::new("Node");
    el.push_attribute(("id", u8::from(node.id).to_string().as_str()));
    el.push_attribute(("name", node.name.as_str()));
    el.push_attribute(("location", node.location.as_str()));
    el.push_attribute(("interview", node.interview.as_str()));

    if let Some(info) = &node.protocol_info {
        el.push_attribute(("basic", format!("{:#04x}", info.device_class.basic).as_str()));
        el.push_attribute(("generic", format!("{:#04x}", info.device_class.generic).as_str()));
        el.push_attribute((
            "specific",
            format!("{:#04x}", info.device_class.specific).as_str(),
        ));
        el.push_attribute(("listening", bool_str(info.listening)));
        el.push_attribute(("routing", bool_str(info.routing)));
        el.push_attribute(("beaming", bool_str(info.beaming)));
        el.push_attribute(("max_baud_rate", info.max_baud_rate.to_string().as_str()));
    }
    if let (Some(m), Some(t), Some(p)) = (node.manufacturer_id, node.product_type, node.product_id)
    {
        el.push_attribute(("manufacturer_id", format!("{:04x}", m).as_str()));
        el.push_attribute(("product_type", format!("{:04x}", t).as_str()));
        el.push_attribute(("product_id", format!("{:04x}", p).as_str()));
    }
    el.push_attribute(("manufacturer_name", node.manufacturer_name.as_str()));
    el.push_attribute(("product_name", node.product_name.as_str()));
    el.push_attribute(("group_count", node.group_count.to_string().as_str()));
    writer.write_event(Event::Start(el)).map_err(xml_err)?;

    for class_byte in &node.advertised {
        let mut class_el = BytesStart::new("CommandClass");
        class_el.push_attribute(("id", format!("{:#04x}", class_byte).as_str()));
        if let Ok(class) = CommandClassId::try_from(*class_byte) {
            if let Some(slot) = node.classes.get(&class) {
                class_el.push_attribute(("version", slot.version.to_string().as_str()));
                class_el.push_attribute(("instances", slot.instances.to_string().as_str()));
            }
        }
        writer.write_event(Event::Empty(class_el)).map_err(xml_err)?;
    }

    for (index, group) in &node.groups {
        let mut group_el = BytesStart::new("Group");
        group_el.push_attribute(("index", index.to_string().as_str()));
        group_el.push_attribute(("max_members", group.max_members.to_string().as_str()));
        let members: Vec<String> = group
            .members
            .iter()
            .map(|id| u8::from(*id).to_string())
            .collect();
        group_el.push_attribute(("members", members.join(",").as_str()));
        writer.write_event(Event::Empty(group_el)).map_err(xml_err)?;
    }

    for value in values.node_values(node.id) {
        write_value(writer, value)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Node")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_value(writer: &mut Writer<&mut Vec<u8>>, value: &Value) -> Result<()> {
    let id = value.id;
    let mut el = BytesStart::new("Value");
    el.push_attribute(("genre", genre_str(id.genre())));
    el.push_attribute(("class", format!("{:#04x}", id.command_class_id()).as_str()));
    el.push_attribute(("instance", id.instance().to_string().as_str()));
    el.push_attribute(("index", id.index().to_string().as_str()));
    el.push_attribute(("type", id.value_type().as_str()));
    el.push_attribute(("label", value.meta.label.as_str()));
    el.push_attribute(("units", value.meta.units.as_str()));
    el.push_attribute(("help", value.meta.help.as_str()));
    el.push_attribute(("read_only", bool_str(value.meta.read_only)));
    el.push_attribute(("is_set", bool_str(value.meta.is_set)));
    el.push_attribute(("data", value.data.to_display_string().as_str()));

    if let ValueData::List(list) = &value.data {
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for (position, item) in list.items.iter().enumerate() {
            let mut item_el = BytesStart::new("Item");
            item_el.push_attribute(("label", item.label.as_str()));
            item_el.push_attribute(("value", item.value.to_string().as_str()));
            if position == list.selected {
                item_el.push_attribute(("selected", "true"));
            }
            writer.write_event(Event::Empty(item_el)).map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("Value")))
            .map_err(xml_err)?;
    } else {
        writer.write_event(Event::Empty(el)).map_err(xml_err)?;
    }
    Ok(())
}

fn bool_str(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

fn genre_str(genre: ValueGenre) -> &'static str {
    match genre {
        ValueGenre::User => "user",
        ValueGenre::Config => "config",
        ValueGenre::System => "system",
    }
}

fn genre_from_str(s: &str) -> Option<ValueGenre> {
    match s {
        "user" => Some(ValueGenre::User),
        "config" => Some(ValueGenre::Config),
        "system" => Some(ValueGenre::System),
        _ => None,
    }
}

/// The topology read back from disk, ready to preload a driver.
pub struct RestoredConfig {
    pub home_id: HomeId,
    pub own_node_id: NodeId,
    pub nodes: BTreeMap<NodeId, NodeRecord>,
    pub values: ValueStore,
}

/// Reads a config file written by [write_config]. A missing file is not
/// an error; any malformed content is.
pub fn read_config(path: &Path) -> Result<Option<RestoredConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(xml_err(e)),
    };

    let mut reader = Reader::from_str(&content);
    reader.trim_text(true);

    let mut home_id = None;
    let mut own_node_id = NodeId::unspecified();
    let mut nodes: BTreeMap<NodeId, NodeRecord> = BTreeMap::new();
    let mut values = ValueStore::new();
    let mut current_node: Option<NodeId> = None;
    let mut current_list: Option<(ValueId, ValueMeta, ListValue)> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(el) | Event::Empty(el) => {
                let attrs = collect_attributes(&el)?;
                match el.name().as_ref() {
                    b"Driver" => {
                        let hex = require(&attrs, "home_id")?;
                        let raw = u32::from_str_radix(&hex, 16)
                            .map_err(|_| xml_err("bad home_id"))?;
                        home_id = Some(HomeId::new(raw));
                        own_node_id =
                            NodeId::new(parse_num::<u8>(&require(&attrs, "node_id")?)?);
                    }
                    b"Node" => {
                        if home_id.is_none() {
                            return Err(xml_err("Node before Driver"));
                        }
                        let node = parse_node(&attrs)?;
                        current_node = Some(node.id);
                        nodes.insert(node.id, node);
                    }
                    b"CommandClass" => {
                        let node_id =
                            current_node.ok_or_else(|| xml_err("CommandClass outside Node"))?;
                        let node = nodes.get_mut(&node_id).expect("current node exists");
                        let class_byte = parse_hex_u8(&require(&attrs, "id")?)?;
                        node.advertised.insert(class_byte);
                        if let Ok(class) = CommandClassId::try_from(class_byte) {
                            if let Some(handler) = create_handler(class) {
                                let mut slot = ClassSlot::new(handler);
                                if let Some(version) = attrs.get("version") {
                                    slot.version = parse_num(version)?;
                                }
                                if let Some(instances) = attrs.get("instances") {
                                    slot.instances = parse_num(instances)?;
                                }
                                node.classes.insert(class, slot);
                            }
                        }
                    }
                    b"Group" => {
                        let node_id = current_node.ok_or_else(|| xml_err("Group outside Node"))?;
                        let node = nodes.get_mut(&node_id).expect("current node exists");
                        let index: u8 = parse_num(&require(&attrs, "index")?)?;
                        let max_members: u8 = parse_num(&require(&attrs, "max_members")?)?;
                        let members = attrs
                            .get("members")
                            .map(String::as_str)
                            .unwrap_or("")
                            .split(',')
                            .filter(|s| !s.is_empty())
                            .map(|s| parse_num::<u8>(s).map(NodeId::new))
                            .collect::<Result<Vec<_>>>()?;
                        node.groups.insert(index, GroupInfo { max_members, members });
                    }
                    b"Value" => {
                        let node_id = current_node.ok_or_else(|| xml_err("Value outside Node"))?;
                        let home_id = home_id.ok_or_else(|| xml_err("Value before Driver"))?;
                        let (id, meta, data) = parse_value(&attrs, home_id, node_id)?;
                        match data {
                            Some(data) => {
                                values.insert(Value::new(id, meta, data));
                            }
                            // A list collects its items before insertion
                            None => current_list = Some((id, meta, ListValue::default())),
                        }
                    }
                    b"Item" => {
                        let (_, _, list) = current_list
                            .as_mut()
                            .ok_or_else(|| xml_err("Item outside list Value"))?;
                        let label = require(&attrs, "label")?;
                        let value: i32 = parse_num(&require(&attrs, "value")?)?;
                        if attrs.get("selected").map(String::as_str) == Some("true") {
                            list.selected = list.items.len();
                        }
                        list.items.push(ListItem { label, value });
                    }
                    _ => {}
                }
            }
            Event::End(el) => match el.name().as_ref() {
                b"Node" => current_node = None,
                b"Value" => {
                    if let Some((id, meta, list)) = current_list.take() {
                        values.insert(Value::new(id, meta, ValueData::List(list)));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let home_id = home_id.ok_or_else(|| xml_err("missing Driver element"))?;
    Ok(Some(RestoredConfig {
        home_id,
        own_node_id,
        nodes,
        values,
    }))
}

fn collect_attributes(el: &BytesStart<'_>) -> Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for attr in el.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(xml_err)?
            .to_string();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn require(attrs: &std::collections::HashMap<String, String>, key: &str) -> Result<String> {
    attrs
        .get(key)
        .cloned()
        .ok_or_else(|| xml_err(format!("missing attribute {}", key)))
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| xml_err(format!("bad number: {}", s)))
}

fn parse_hex_u8(s: &str) -> Result<u8> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|_| xml_err(format!("bad hex byte: {}", s)))
}

fn parse_node(attrs: &std::collections::HashMap<String, String>) -> Result<NodeRecord> {
    let id = NodeId::new(parse_num::<u8>(&require(attrs, "id")?)?);
    let mut node = NodeRecord::new(id);
    node.name = attrs.get("name").cloned().unwrap_or_default();
    node.location = attrs.get("location").cloned().unwrap_or_default();
    node.manufacturer_name = attrs.get("manufacturer_name").cloned().unwrap_or_default();
    node.product_name = attrs.get("product_name").cloned().unwrap_or_default();
    if let Some(stage) = attrs.get("interview").and_then(|s| InterviewStage::from_str(s)) {
        node.interview = stage;
    }
    if let Some(count) = attrs.get("group_count") {
        node.group_count = parse_num(count)?;
    }
    if let (Some(m), Some(t), Some(p)) = (
        attrs.get("manufacturer_id"),
        attrs.get("product_type"),
        attrs.get("product_id"),
    ) {
        node.manufacturer_id =
            Some(u16::from_str_radix(m, 16).map_err(|_| xml_err("bad manufacturer_id"))?);
        node.product_type =
            Some(u16::from_str_radix(t, 16).map_err(|_| xml_err("bad product_type"))?);
        node.product_id =
            Some(u16::from_str_radix(p, 16).map_err(|_| xml_err("bad product_id"))?);
    }
    if let Some(generic) = attrs.get("generic") {
        let device_class = DeviceClass::new(
            parse_hex_u8(attrs.get("basic").map(String::as_str).unwrap_or("0x00"))?,
            parse_hex_u8(generic)?,
            parse_hex_u8(attrs.get("specific").map(String::as_str).unwrap_or("0x00"))?,
        );
        let listening = attrs.get("listening").map(String::as_str) == Some("true");
        let routing = attrs.get("routing").map(String::as_str) == Some("true");
        let beaming = attrs.get("beaming").map(String::as_str) == Some("true");
        let max_baud_rate = attrs
            .get("max_baud_rate")
            .map(|s| parse_num::<u32>(s))
            .transpose()?
            .unwrap_or(9_600);
        node.protocol_info = Some(ProtocolInfo {
            listening,
            routing,
            beaming,
            max_baud_rate,
            protocol_version: 0,
            device_class,
        });
        // Restored battery nodes are asleep until they say otherwise
        if !listening {
            node.awake = false;
        }
    }
    Ok(node)
}

fn parse_value(
    attrs: &std::collections::HashMap<String, String>,
    home_id: HomeId,
    node_id: NodeId,
) -> Result<(ValueId, ValueMeta, Option<ValueData>)> {
    let genre = genre_from_str(&require(attrs, "genre")?)
        .ok_or_else(|| xml_err("bad value genre"))?;
    let class = parse_hex_u8(&require(attrs, "class")?)?;
    let instance: u8 = parse_num(&require(attrs, "instance")?)?;
    let index: u8 = parse_num(&require(attrs, "index")?)?;
    let value_type = ValueType::from_str(&require(attrs, "type")?)
        .ok_or_else(|| xml_err("bad value type"))?;

    let id = ValueId::new(home_id, node_id, genre, class, instance, index, value_type);
    let mut meta = ValueMeta::new(attrs.get("label").cloned().unwrap_or_default());
    meta.units = attrs.get("units").cloned().unwrap_or_default();
    meta.help = attrs.get("help").cloned().unwrap_or_default();
    meta.read_only = attrs.get("read_only").map(String::as_str) == Some("true");
    meta.is_set = attrs.get("is_set").map(String::as_str) == Some("true");

    let raw = attrs.get("data").cloned().unwrap_or_default();
    let data = match value_type {
        ValueType::List => None,
        ValueType::Button => Some(ValueData::Button(false)),
        _ => Some(
            ValueData::parse_as(value_type, &raw)
                .ok_or_else(|| xml_err(format!("bad payload for {}: {}", value_type.as_str(), raw)))?,
        ),
    };
    Ok((id, meta, data))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_topology() -> (BTreeMap<NodeId, NodeRecord>, ValueStore, HomeId) {
        let home_id = HomeId::new(0xc0ffee01);
        let mut nodes = BTreeMap::new();
        let mut values = ValueStore::new();

        let mut node = NodeRecord::new(NodeId::new(2));
        node.protocol_info = Some(ProtocolInfo {
            listening: true,
            routing: true,
            beaming: true,
            max_baud_rate: 40_000,
            protocol_version: 4,
            device_class: DeviceClass::new(0x04, 0x10, 0x01),
        });
        node.set_name("Porch light");
        node.location = "porch".into();
        node.manufacturer_id = Some(0x0086);
        node.product_type = Some(0x0003);
        node.product_id = Some(0x0006);
        node.manufacturer_name = "Aeon Labs".into();
        node.product_name = "Smart Energy Switch".into();
        node.add_class(0x25);
        node.add_class(0x72);
        node.group_count = 1;
        node.groups.insert(
            1,
            GroupInfo {
                max_members: 5,
                members: vec![NodeId::new(1)],
            },
        );
        node.interview = InterviewStage::Ready;

        let switch_id = ValueId::new(
            home_id,
            NodeId::new(2),
            ValueGenre::User,
            0x25,
            1,
            0,
            ValueType::Bool,
        );
        let mut meta = ValueMeta::new("Switch");
        meta.is_set = true;
        values.insert(Value::new(switch_id, meta, ValueData::Bool(true)));

        let list_id = ValueId::new(
            home_id,
            NodeId::new(2),
            ValueGenre::System,
            0x84,
            1,
            1,
            ValueType::List,
        );
        let mut list = ListValue::new(vec![
            ListItem { label: "Idle".into(), value: 0 },
            ListItem { label: "Running".into(), value: 1 },
        ]);
        list.selected = 1;
        values.insert(Value::new(
            list_id,
            ValueMeta::new("Fan state"),
            ValueData::List(list),
        ));

        nodes.insert(node.id, node);
        (nodes, values, home_id)
    }

    #[test]
    fn test_round_trip_preserves_topology() {
        let (nodes, values, home_id) = sample_topology();
        let dir = std::env::temp_dir().join("homewave-config-test");
        std::fs::create_dir_all(&dir).unwrap();

        let path = write_config(&dir, home_id, NodeId::new(1), &nodes, &values).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("zwcfg_c0ffee01"));

        let restored = read_config(&path).unwrap().expect("config exists");
        assert_eq!(restored.home_id, home_id);
        assert_eq!(restored.own_node_id, NodeId::new(1));

        let node = restored.nodes.get(&NodeId::new(2)).expect("node restored");
        assert_eq!(node.name, "Porch light");
        assert_eq!(node.interview, InterviewStage::Ready);
        assert_eq!(node.manufacturer_id, Some(0x0086));
        assert_eq!(node.product_name, "Smart Energy Switch");
        assert!(node.supports(CommandClassId::BinarySwitch));
        assert_eq!(node.groups.get(&1).unwrap().members, vec![NodeId::new(1)]);

        // Structural equality on ids, types, labels and payloads
        assert_eq!(restored.values.len(), values.len());
        for (original, restored) in values.iter().zip(restored.values.iter()) {
            assert_eq!(original.id, restored.id);
            assert_eq!(original.meta.label, restored.meta.label);
            assert_eq!(original.data, restored.data);
        }

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("homewave-config-test-none/zwcfg_ffffffff.xml");
        assert!(read_config(&path).unwrap().is_none());
    }
}
