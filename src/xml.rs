use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::domain::{PropValue, Props};
use crate::error::SraGraphError;

/// Owned element tree. Attribute order follows the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn child(&self, tag: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.tag == tag)
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.tag == tag)
    }

    pub fn first_child(&self) -> Option<&XmlElement> {
        self.children.first()
    }

    /// Slash separated lookup of direct descendants, e.g. `SAMPLE_NAME/TAXON_ID`.
    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// All elements matching the last segment of `path` below the first match of the rest.
    pub fn find_all<'a>(&'a self, path: &'a str) -> Vec<&'a XmlElement> {
        match path.rsplit_once('/') {
            Some((parent, last)) => self
                .find(parent)
                .map(|node| node.children_named(last).collect())
                .unwrap_or_default(),
            None => self.children_named(path).collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text content, `None` when absent or blank.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Attributes as string properties.
    pub fn attr_props(&self) -> Props {
        self.attrs
            .iter()
            .map(|(key, value)| (key.clone(), PropValue::Str(value.clone())))
            .collect()
    }
}

/// Parses a document and returns its root element.
pub fn parse_document(input: &str) -> Result<XmlElement, SraGraphError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            SraGraphError::XmlParse(format!(
                "at byte {}: {err}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|err| SraGraphError::XmlParse(err.to_string()))?;
                append_text(&mut stack, &text);
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                append_text(&mut stack, &String::from_utf8_lossy(&bytes));
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    SraGraphError::XmlParse("closing tag without opening tag".to_string())
                })?;
                attach(&mut stack, &mut root, element);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(SraGraphError::XmlParse(format!(
            "unclosed element <{}>",
            open.tag
        )));
    }
    root.ok_or_else(|| SraGraphError::XmlParse("document has no root element".to_string()))
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, SraGraphError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|err| SraGraphError::XmlParse(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SraGraphError::XmlParse(err.to_string()))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(current) = stack.last_mut() {
        current.text.get_or_insert_with(String::new).push_str(text);
    }
}
