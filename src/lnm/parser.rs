//! LNM XML parser (spec §6), ground-truthed against
//! `examples/original_source/device_backends/LogicalNameMapping/src/LogicalNameMapParser.cc`'s
//! `LNMapXmlParser`: walks the document with a hand-rolled recursive tree
//! builder over [`quick_xml`]'s event reader (this core has no need for
//! `quick-xml`'s `serde` derive machinery -- the schema's nesting and
//! per-element attribute lookups are simpler to express as a direct event
//! walk) and interprets the tree against the XML schema into a
//! [`super::LogicalNameMap`].
//!
//! `<value index="i">`/parameter text may itself be `<ref>OtherPath</ref>`
//! (inlines a CONSTANT register's first element) or `<par>name</par>`
//! (inlines a CDD parameter, resolved immediately since the caller already
//! has the parsed [`crate::backend::DeviceDescriptor`] in hand). A `<ref>`
//! may only point at a register whose own kind is `<constant>` with
//! plain-literal values -- chained or forward `<ref>`s between constants are
//! rejected rather than generalised into a dependency graph, since the
//! schema never needs more than one level of indirection in practice.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::LogicError;
use crate::lnm::{LnmValueType, LogicalNameMap, LogicalRegister, PluginSpec, RegisterKind};
use crate::register_path::RegisterPath;

fn bad(reason: impl Into<String>) -> LogicError {
    LogicError::BadDescriptor { reason: reason.into() }
}

fn bad_param(plugin: &str, name: &str, reason: impl Into<String>) -> LogicError {
    LogicError::BadParameter {
        plugin: plugin.into(),
        name: name.into(),
        reason: reason.into(),
    }
}

#[derive(Debug, Default)]
struct XmlNode {
    tag: String,
    attrs: HashMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag.eq_ignore_ascii_case(tag))
    }

    fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.tag.eq_ignore_ascii_case(tag))
    }

    fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

fn build_tree(xml: &str) -> Result<XmlNode, LogicError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut attrs = HashMap::new();
                for a in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                    let value = a.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
                    attrs.insert(key, value);
                }
                stack.push(XmlNode {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut attrs = HashMap::new();
                for a in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                    let value = a.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
                    attrs.insert(key, value);
                }
                let node = XmlNode {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                };
                stack
                    .last_mut()
                    .ok_or_else(|| bad("unbalanced XML document"))?
                    .children
                    .push(node);
            }
            Ok(Event::Text(e)) | Ok(Event::CData(e)) => {
                let text = e.unescape().map(|v| v.into_owned()).unwrap_or_default();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| bad("unbalanced XML document"))?;
                stack
                    .last_mut()
                    .ok_or_else(|| bad("unbalanced XML document"))?
                    .children
                    .push(node);
            }
            Ok(_) => {}
            Err(e) => return Err(bad(format!("XML syntax error: {e}"))),
        }
        buf.clear();
    }
    let mut root = stack.pop().ok_or_else(|| bad("empty XML document"))?;
    root.children.pop().ok_or_else(|| bad("XML document has no root element"))
}

/// Raw value as written in the XML, before `<ref>` indirection is resolved.
#[derive(Debug, Clone)]
enum RawValue {
    Literal(f64),
    Ref(RegisterPath),
}

fn parse_value_source(node: &XmlNode, device_parameters: &HashMap<String, String>) -> Result<RawValue, LogicError> {
    if let Some(r) = node.child("ref") {
        return Ok(RawValue::Ref(RegisterPath::new(r.text_trimmed())));
    }
    if let Some(p) = node.child("par") {
        let name = p.text_trimmed();
        let value = device_parameters
            .get(name)
            .ok_or_else(|| bad(format!("<par>{name}</par> refers to an unknown CDD parameter")))?;
        return value
            .parse::<f64>()
            .map(RawValue::Literal)
            .map_err(|_| bad(format!("CDD parameter '{name}' is not numeric")));
    }
    let text = node.text_trimmed();
    text.parse::<f64>()
        .map(RawValue::Literal)
        .map_err(|_| bad(format!("'{text}' is not a number")))
}

fn parse_type(node: &XmlNode) -> Result<LnmValueType, LogicError> {
    let type_node = node.child("type").ok_or_else(|| bad("<constant>/<variable> requires a <type>"))?;
    parse_type_name(type_node.text_trimmed())
}

fn parse_type_name(name: &str) -> Result<LnmValueType, LogicError> {
    match name.to_ascii_lowercase().as_str() {
        "integer" | "int" => Ok(LnmValueType::Integer),
        "floatingpoint" | "float" | "double" => Ok(LnmValueType::FloatingPoint),
        "boolean" | "bool" => Ok(LnmValueType::Boolean),
        other => Err(bad(format!("unknown <type> '{other}'"))),
    }
}

fn parse_values(node: &XmlNode, device_parameters: &HashMap<String, String>) -> Result<Vec<RawValue>, LogicError> {
    let mut indexed: Vec<(usize, RawValue)> = Vec::new();
    for (i, value_node) in node.children_named("value").enumerate() {
        let index = value_node
            .attr("index")
            .map(|s| s.parse::<usize>())
            .transpose()
            .map_err(|_| bad("<value index=...> is not a number"))?
            .unwrap_or(i);
        indexed.push((index, parse_value_source(value_node, device_parameters)?));
    }
    if indexed.is_empty() {
        return Err(bad("<constant>/<variable> requires at least one <value>"));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn text_child(node: &XmlNode, tag: &str) -> Result<String, LogicError> {
    node.child(tag)
        .map(|c| c.text_trimmed().to_string())
        .ok_or_else(|| bad(format!("<{}> requires a <{tag}>", node.tag)))
}

enum RawKind {
    Register {
        target_device: String,
        target_register: RegisterPath,
        target_start_index: usize,
        number_of_elements: Option<usize>,
    },
    Channel {
        target_device: String,
        target_register: RegisterPath,
        target_channel: usize,
    },
    Bit {
        target_device: String,
        target_register: RegisterPath,
        target_bit: u8,
    },
    Constant {
        value_type: LnmValueType,
        values: Vec<RawValue>,
    },
    Variable {
        value_type: LnmValueType,
        values: Vec<RawValue>,
    },
}

enum RawPlugin {
    Multiplier {
        factor: RawValue,
    },
    Math {
        formula: String,
        self_variable_name: String,
        parameters: Vec<(String, RegisterPath)>,
    },
    MonostableTrigger {
        milliseconds: RawValue,
        active: RawValue,
        inactive: RawValue,
    },
    ForceReadOnly,
    ForcePollingRead,
    TypeHintModifier {
        value_type: LnmValueType,
    },
    FanOut {
        targets: Vec<RegisterPath>,
    },
    DoubleBuffer {
        second_buffer: RegisterPath,
        enable_double_buffer: RegisterPath,
        current_buffer_number: RegisterPath,
    },
}

struct RawRegister {
    path: RegisterPath,
    kind: RawKind,
    plugins: Vec<RawPlugin>,
}

fn parse_kind(node: &XmlNode, device_parameters: &HashMap<String, String>) -> Result<RawKind, LogicError> {
    match node.tag.to_ascii_lowercase().as_str() {
        "redirectedregister" => {
            let target_device = text_child(node, "targetDevice")?;
            let target_register = RegisterPath::new(text_child(node, "targetRegister")?);
            let target_start_index = node
                .child("targetStartIndex")
                .map(|c| c.text_trimmed().parse::<usize>())
                .transpose()
                .map_err(|_| bad("<targetStartIndex> is not a number"))?
                .unwrap_or(0);
            let number_of_elements = node
                .child("numberOfElements")
                .map(|c| c.text_trimmed().parse::<usize>())
                .transpose()
                .map_err(|_| bad("<numberOfElements> is not a number"))?;
            Ok(RawKind::Register {
                target_device,
                target_register,
                target_start_index,
                number_of_elements,
            })
        }
        "redirectedchannel" => {
            let target_device = text_child(node, "targetDevice")?;
            let target_register = RegisterPath::new(text_child(node, "targetRegister")?);
            let target_channel = text_child(node, "targetChannel")?
                .parse::<usize>()
                .map_err(|_| bad("<targetChannel> is not a number"))?;
            Ok(RawKind::Channel {
                target_device,
                target_register,
                target_channel,
            })
        }
        "redirectedbit" => {
            let target_device = text_child(node, "targetDevice")?;
            let target_register = RegisterPath::new(text_child(node, "targetRegister")?);
            let target_bit = text_child(node, "targetBit")?
                .parse::<u8>()
                .map_err(|_| bad("<targetBit> is not a number in [0,255]"))?;
            Ok(RawKind::Bit {
                target_device,
                target_register,
                target_bit,
            })
        }
        "constant" => Ok(RawKind::Constant {
            value_type: parse_type(node)?,
            values: parse_values(node, device_parameters)?,
        }),
        "variable" => Ok(RawKind::Variable {
            value_type: parse_type(node)?,
            values: parse_values(node, device_parameters)?,
        }),
        other => Err(bad(format!("unknown logical register element <{other}>"))),
    }
}

fn parse_plugins(node: &XmlNode, device_parameters: &HashMap<String, String>) -> Result<Vec<RawPlugin>, LogicError> {
    let mut plugins = Vec::new();
    for plugin_node in node.children_named("plugin") {
        let name = plugin_node
            .attr("name")
            .ok_or_else(|| bad("<plugin> requires a name attribute"))?
            .to_string();

        let params: HashMap<String, &XmlNode> = plugin_node
            .children_named("parameter")
            .filter_map(|p| p.attr("name").map(|n| (n.to_string(), p)))
            .collect();
        let require = |key: &str| -> Result<&XmlNode, LogicError> {
            params
                .get(key)
                .copied()
                .ok_or_else(|| bad_param(&name, key, "required parameter is missing"))
        };
        let require_path = |key: &str| -> Result<RegisterPath, LogicError> {
            Ok(RegisterPath::new(require(key)?.text_trimmed()))
        };

        let plugin = match name.to_ascii_lowercase().as_str() {
            "multiplier" => RawPlugin::Multiplier {
                factor: parse_value_source(require("factor")?, device_parameters)?,
            },
            "math" => {
                let formula = require("formula")?.text_trimmed().to_string();
                let self_variable_name = params
                    .get("selfVariableName")
                    .map(|n| n.text_trimmed().to_string())
                    .unwrap_or_else(|| "self".to_string());
                let reserved = ["formula", "selfVariableName"];
                let parameters = params
                    .iter()
                    .filter(|(k, _)| !reserved.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), RegisterPath::new(v.text_trimmed())))
                    .collect();
                RawPlugin::Math {
                    formula,
                    self_variable_name,
                    parameters,
                }
            }
            "monostabletrigger" => RawPlugin::MonostableTrigger {
                milliseconds: parse_value_source(require("milliseconds")?, device_parameters)?,
                active: parse_value_source(require("active")?, device_parameters)?,
                inactive: parse_value_source(require("inactive")?, device_parameters)?,
            },
            "forcereadonly" => RawPlugin::ForceReadOnly,
            "forcepollingread" => RawPlugin::ForcePollingRead,
            "typehintmodifier" => RawPlugin::TypeHintModifier {
                value_type: parse_type_name(require("type")?.text_trimmed())?,
            },
            "fanout" => {
                let targets = plugin_node
                    .children_named("parameter")
                    .filter(|p| p.attr("name") == Some("target"))
                    .map(|p| RegisterPath::new(p.text_trimmed()))
                    .collect::<Vec<_>>();
                if targets.is_empty() {
                    return Err(bad_param("FanOut", "target", "at least one target parameter is required"));
                }
                RawPlugin::FanOut { targets }
            }
            "doublebuffer" => RawPlugin::DoubleBuffer {
                second_buffer: require_path("secondBuffer")?,
                enable_double_buffer: require_path("enableDoubleBuffer")?,
                current_buffer_number: require_path("currentBufferNumber")?,
            },
            other => {
                return Err(LogicError::UnknownPlugin {
                    path: node.attr("name").unwrap_or_default().to_string(),
                    name: other.to_string(),
                })
            }
        };
        plugins.push(plugin);
    }
    Ok(plugins)
}

fn walk_module(
    node: &XmlNode,
    prefix: &RegisterPath,
    device_parameters: &HashMap<String, String>,
    out: &mut Vec<RawRegister>,
) -> Result<(), LogicError> {
    for child in &node.children {
        match child.tag.to_ascii_lowercase().as_str() {
            "module" => {
                let name = child.attr("name").ok_or_else(|| bad("<module> requires a name attribute"))?;
                walk_module(child, &prefix.join(name), device_parameters, out)?;
            }
            "redirectedregister" | "redirectedchannel" | "redirectedbit" | "constant" | "variable" => {
                let name = child.attr("name").ok_or_else(|| bad("logical register requires a name attribute"))?;
                let path = prefix.join(name);
                let kind = parse_kind(child, device_parameters)?;
                let plugins = parse_plugins(child, device_parameters)?;
                out.push(RawRegister { path, kind, plugins });
            }
            _ => {}
        }
    }
    Ok(())
}

fn resolve_literal(value: &RawValue, context: &str) -> Result<f64, LogicError> {
    match value {
        RawValue::Literal(x) => Ok(*x),
        RawValue::Ref(path) => Err(bad(format!(
            "{context}: <ref>{path}</ref> is not allowed here -- only non-constant values may reference a constant"
        ))),
    }
}

fn resolve(value: &RawValue, constants: &HashMap<RegisterPath, Vec<f64>>) -> Result<f64, LogicError> {
    match value {
        RawValue::Literal(x) => Ok(*x),
        RawValue::Ref(path) => constants
            .get(path)
            .and_then(|v| v.first())
            .copied()
            .ok_or_else(|| bad(format!("<ref>{path}</ref> does not name a constant register"))),
    }
}

/// Parse a full LNM map. `device_parameters` is the owning backend's CDD
/// parameter set, consulted for `<par>` inlines.
pub fn parse(xml: &str, device_parameters: &HashMap<String, String>) -> Result<LogicalNameMap, LogicError> {
    let tree = build_tree(xml)?;
    if !tree.tag.eq_ignore_ascii_case("logicalNameMap") {
        return Err(bad("root element must be <logicalNameMap>"));
    }
    let mut raw = Vec::new();
    walk_module(&tree, &RegisterPath::new(""), device_parameters, &mut raw)?;

    let mut constants: HashMap<RegisterPath, Vec<f64>> = HashMap::new();
    for r in &raw {
        if let RawKind::Constant { values, .. } = &r.kind {
            let resolved = values
                .iter()
                .map(|v| resolve_literal(v, "constant"))
                .collect::<Result<Vec<_>, _>>()?;
            constants.insert(r.path.clone(), resolved);
        }
    }

    let mut registers = Vec::with_capacity(raw.len());
    for r in raw {
        let kind = match r.kind {
            RawKind::Register {
                target_device,
                target_register,
                target_start_index,
                number_of_elements,
            } => RegisterKind::Register {
                target_device,
                target_register,
                target_start_index,
                number_of_elements,
            },
            RawKind::Channel {
                target_device,
                target_register,
                target_channel,
            } => RegisterKind::Channel {
                target_device,
                target_register,
                target_channel,
            },
            RawKind::Bit {
                target_device,
                target_register,
                target_bit,
            } => RegisterKind::Bit {
                target_device,
                target_register,
                target_bit,
            },
            RawKind::Constant { value_type, .. } => RegisterKind::Constant {
                value_type,
                values: constants.get(&r.path).cloned().unwrap_or_default(),
            },
            RawKind::Variable { value_type, values } => RegisterKind::Variable {
                value_type,
                values: values
                    .iter()
                    .map(|v| resolve(v, &constants))
                    .collect::<Result<Vec<_>, _>>()?,
            },
        };

        let plugins = r
            .plugins
            .into_iter()
            .map(|p| resolve_plugin(p, &constants))
            .collect::<Result<Vec<_>, _>>()?;

        registers.push(LogicalRegister {
            path: r.path,
            kind,
            plugins,
        });
    }

    Ok(LogicalNameMap { registers })
}

fn resolve_plugin(raw: RawPlugin, constants: &HashMap<RegisterPath, Vec<f64>>) -> Result<PluginSpec, LogicError> {
    Ok(match raw {
        RawPlugin::Multiplier { factor } => PluginSpec::Multiplier {
            factor: resolve(&factor, constants)?,
        },
        RawPlugin::Math {
            formula,
            self_variable_name,
            parameters,
        } => PluginSpec::Math {
            formula,
            self_variable_name,
            parameters,
        },
        RawPlugin::MonostableTrigger {
            milliseconds,
            active,
            inactive,
        } => PluginSpec::MonostableTrigger {
            milliseconds: resolve(&milliseconds, constants)?,
            active: resolve(&active, constants)? as u32,
            inactive: resolve(&inactive, constants)? as u32,
        },
        RawPlugin::ForceReadOnly => PluginSpec::ForceReadOnly,
        RawPlugin::ForcePollingRead => PluginSpec::ForcePollingRead,
        RawPlugin::TypeHintModifier { value_type } => PluginSpec::TypeHintModifier { value_type },
        RawPlugin::FanOut { targets } => PluginSpec::FanOut { targets },
        RawPlugin::DoubleBuffer {
            second_buffer,
            enable_double_buffer,
            current_buffer_number,
        } => PluginSpec::DoubleBuffer {
            second_buffer,
            enable_double_buffer,
            current_buffer_number,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_redirected_register_inside_a_module() {
        let xml = r#"
            <logicalNameMap>
              <module name="BSP">
                <redirectedRegister name="WORD_STATUS">
                  <targetDevice>target</targetDevice>
                  <targetRegister>BOARD/STATUS</targetRegister>
                </redirectedRegister>
              </module>
            </logicalNameMap>
        "#;
        let map = parse(xml, &HashMap::new()).unwrap();
        let reg = map.get(&RegisterPath::new("BSP/WORD_STATUS")).unwrap();
        match &reg.kind {
            RegisterKind::Register {
                target_device,
                target_register,
                ..
            } => {
                assert_eq!(target_device, "target");
                assert_eq!(target_register, &RegisterPath::new("BOARD/STATUS"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parses_constant_with_multiple_values_and_a_multiplier_plugin() {
        let xml = r#"
            <logicalNameMap>
              <constant name="TABLE">
                <type>integer</type>
                <value index="0">10</value>
                <value index="1">20</value>
              </constant>
              <variable name="GAIN">
                <type>floatingPoint</type>
                <value>1.0</value>
                <plugin name="multiplier">
                  <parameter name="factor">2.5</parameter>
                </plugin>
              </variable>
            </logicalNameMap>
        "#;
        let map = parse(xml, &HashMap::new()).unwrap();
        let table = map.get(&RegisterPath::new("TABLE")).unwrap();
        assert!(matches!(&table.kind, RegisterKind::Constant { values, .. } if values == &vec![10.0, 20.0]));
        let gain = map.get(&RegisterPath::new("GAIN")).unwrap();
        assert!(matches!(&gain.plugins[0], PluginSpec::Multiplier { factor } if *factor == 2.5));
    }

    #[test]
    fn par_inline_resolves_from_device_parameters() {
        let xml = r#"
            <logicalNameMap>
              <variable name="LIMIT">
                <type>integer</type>
                <value><par>limit</par></value>
              </variable>
            </logicalNameMap>
        "#;
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "42".to_string());
        let map = parse(xml, &params).unwrap();
        let reg = map.get(&RegisterPath::new("LIMIT")).unwrap();
        assert!(matches!(&reg.kind, RegisterKind::Variable { values, .. } if values == &vec![42.0]));
    }

    #[test]
    fn ref_inline_resolves_from_another_constant() {
        let xml = r#"
            <logicalNameMap>
              <constant name="BASE">
                <type>integer</type>
                <value>7</value>
              </constant>
              <variable name="DERIVED">
                <type>integer</type>
                <value><ref>BASE</ref></value>
              </variable>
            </logicalNameMap>
        "#;
        let map = parse(xml, &HashMap::new()).unwrap();
        let reg = map.get(&RegisterPath::new("DERIVED")).unwrap();
        assert!(matches!(&reg.kind, RegisterKind::Variable { values, .. } if values == &vec![7.0]));
    }

    #[test]
    fn unknown_plugin_name_is_rejected() {
        let xml = r#"
            <logicalNameMap>
              <variable name="V">
                <type>integer</type>
                <value>0</value>
                <plugin name="nonsense"></plugin>
              </variable>
            </logicalNameMap>
        "#;
        assert!(parse(xml, &HashMap::new()).is_err());
    }
}
