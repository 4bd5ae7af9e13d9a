//! Embedded CAP-XML reading.
//!
//! Some products embed a Common Alerting Protocol document in the message
//! body, sometimes with legacy text before it. The document is read into a
//! small tagged tree — [`CapValue`] — rather than a fixed schema, because
//! senders disagree about which elements repeat and which are scalar.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

/// A CAP node: scalar text, a repeated element, or a nested record.
#[derive(Debug, Clone, PartialEq)]
pub enum CapValue {
    Scalar(String),
    List(Vec<CapValue>),
    Record(BTreeMap<String, CapValue>),
}

impl CapValue {
    /// The textual content of this node, with one explicit branch per
    /// variant: scalars are themselves, lists defer to their first entry,
    /// records have no direct text.
    pub fn text(&self) -> Option<&str> {
        match self {
            CapValue::Scalar(s) => {
                let s = s.trim();
                (!s.is_empty()).then_some(s)
            }
            CapValue::List(items) => items.first().and_then(CapValue::text),
            CapValue::Record(_) => None,
        }
    }

    /// First child with the given element name, looking through lists.
    pub fn child(&self, name: &str) -> Option<&CapValue> {
        match self {
            CapValue::Record(map) => map.get(name),
            CapValue::List(items) => items.iter().find_map(|item| item.child(name)),
            CapValue::Scalar(_) => None,
        }
    }

    /// All children with the given element name, flattened across repeats.
    pub fn children(&self, name: &str) -> Vec<&CapValue> {
        match self {
            CapValue::Record(map) => match map.get(name) {
                Some(CapValue::List(items)) => items.iter().collect(),
                Some(single) => vec![single],
                None => Vec::new(),
            },
            CapValue::List(items) => items.iter().flat_map(|item| item.children(name)).collect(),
            CapValue::Scalar(_) => Vec::new(),
        }
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(CapValue::text)
    }
}

/// A parsed CAP block plus whatever preamble text preceded it.
#[derive(Debug, Clone)]
pub struct CapAlert {
    root: CapValue,
    pub preamble: String,
    /// Byte range of the `<alert>` block within the original text.
    pub span: (usize, usize),
}

impl CapAlert {
    /// Locate and parse the first `<alert>…</alert>` block in `text`.
    ///
    /// Returns `None` when no block exists or the XML is unreadable; parse
    /// problems never propagate.
    pub fn find(text: &str) -> Option<Self> {
        let open = text.find("<alert")?;
        let close = text[open..].find("</alert>")? + open + "</alert>".len();
        let xml = &text[open..close];

        let preamble_end = text.find("<?xml").unwrap_or(open);
        let preamble = text[..preamble_end].trim().to_string();

        let root = parse_tree(xml)?;
        Some(Self {
            root,
            preamble,
            span: (open, close),
        })
    }

    pub fn identifier(&self) -> Option<&str> {
        self.root.child_text("identifier")
    }

    /// Sender office: CAP `<sender>` addresses look like `w-nws.webmaster@…`;
    /// the short office form comes from the info preamble when present.
    pub fn sender(&self) -> Option<&str> {
        self.root.child_text("sender")
    }

    /// The human sender line, e.g. `NWS San Diego CA`.
    pub fn sender_name(&self) -> Option<&str> {
        self.info()?.child_text("senderName")
    }

    pub fn sent(&self) -> Option<DateTime<Utc>> {
        parse_cap_time(self.root.child_text("sent")?)
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        parse_cap_time(self.info()?.child_text("expires")?)
    }

    pub fn event(&self) -> Option<&str> {
        self.info()?.child_text("event")
    }

    pub fn severity(&self) -> Option<&str> {
        self.info()?.child_text("severity")
    }

    pub fn headline(&self) -> Option<&str> {
        self.parameter("NWSheadline")
            .or_else(|| self.info()?.child_text("headline"))
    }

    pub fn description(&self) -> Option<&str> {
        self.info()?.child_text("description")
    }

    pub fn instruction(&self) -> Option<&str> {
        self.info()?.child_text("instruction")
    }

    pub fn area_desc(&self) -> Option<&str> {
        self.area()?.child_text("areaDesc")
    }

    pub fn polygon(&self) -> Option<&str> {
        self.area()?.child_text("polygon")
    }

    /// The raw VTEC parameter payload, when the sender attached one.
    pub fn vtec(&self) -> Option<&str> {
        self.parameter("VTEC")
    }

    /// A named `<parameter>` value from any `<info>` block.
    pub fn parameter(&self, value_name: &str) -> Option<&str> {
        let info = self.info()?;
        for parameter in info.children("parameter") {
            if parameter.child_text("valueName") == Some(value_name) {
                return parameter.child_text("value");
            }
        }
        None
    }

    /// UGC identifiers from `<geocode>` entries named `UGC`.
    pub fn ugc_codes(&self) -> Vec<String> {
        let mut codes = Vec::new();
        if let Some(area) = self.area() {
            for geocode in area.children("geocode") {
                if geocode.child_text("valueName") == Some("UGC") {
                    if let Some(value) = geocode.child_text("value") {
                        for code in value.split([' ', ',', ';']) {
                            let code = code.trim();
                            if !code.is_empty() && !codes.iter().any(|c| c == code) {
                                codes.push(code.to_string());
                            }
                        }
                    }
                }
            }
        }
        codes
    }

    fn info(&self) -> Option<&CapValue> {
        self.root.child("info")
    }

    fn area(&self) -> Option<&CapValue> {
        self.info()?.child("area")
    }
}

/// CAP timestamps are RFC 3339 with an offset.
fn parse_cap_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_tree(xml: &str) -> Option<CapValue> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    // (element name, accumulated text, children in document order)
    let mut stack: Vec<(String, String, Vec<(String, CapValue)>)> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = local_name(start.name().as_ref());
                stack.push((name, String::new(), Vec::new()));
            }
            Ok(Event::Empty(empty)) => {
                let name = local_name(empty.name().as_ref());
                attach(&mut stack, &mut root, name, CapValue::Scalar(String::new()));
            }
            Ok(Event::Text(text)) => {
                if let Some((_, buffer, _)) = stack.last_mut() {
                    buffer.push_str(&text.unescape().ok()?);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some((_, buffer, _)) = stack.last_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(_)) => {
                let (name, text, children) = stack.pop()?;
                let value = if children.is_empty() {
                    CapValue::Scalar(text)
                } else {
                    CapValue::Record(fold_children(children))
                };
                attach(&mut stack, &mut root, name, value);
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    root
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn attach(
    stack: &mut [(String, String, Vec<(String, CapValue)>)],
    root: &mut Option<CapValue>,
    name: String,
    value: CapValue,
) {
    if let Some((_, _, children)) = stack.last_mut() {
        children.push((name, value));
    } else if root.is_none() {
        *root = Some(value);
    }
}

/// Repeated sibling names collapse into a `List`.
fn fold_children(children: Vec<(String, CapValue)>) -> BTreeMap<String, CapValue> {
    let mut map: BTreeMap<String, CapValue> = BTreeMap::new();
    for (name, value) in children {
        match map.remove(&name) {
            None => {
                map.insert(name, value);
            }
            Some(CapValue::List(mut items)) => {
                items.push(value);
                map.insert(name, CapValue::List(items));
            }
            Some(existing) => {
                map.insert(name, CapValue::List(vec![existing, value]));
            }
        }
    }
    map
}
