use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

/// Value reported for an optional field that has no element or no text.
pub const NOT_FOUND: &str = "not found";

#[derive(Debug, Clone, Copy)]
enum Source {
    Text,
    Attr(&'static str),
}

/// One named value read from each container.
#[derive(Debug, Clone)]
pub struct Field {
    name: &'static str,
    /// `None` reads from the container itself.
    selector: Option<Selector>,
    source: Source,
}

impl Field {
    pub fn text(name: &'static str, css: &str) -> Result<Self> {
        Ok(Field {
            name,
            selector: Some(parse(css)?),
            source: Source::Text,
        })
    }

    pub fn attr(name: &'static str, css: &str, attr: &'static str) -> Result<Self> {
        Ok(Field {
            name,
            selector: Some(parse(css)?),
            source: Source::Attr(attr),
        })
    }

    pub fn own_text(name: &'static str) -> Self {
        Field {
            name,
            selector: None,
            source: Source::Text,
        }
    }

    pub fn own_attr(name: &'static str, attr: &'static str) -> Self {
        Field {
            name,
            selector: None,
            source: Source::Attr(attr),
        }
    }

    fn read(&self, container: ElementRef<'_>) -> Option<String> {
        let el = match &self.selector {
            Some(sel) => container.select(sel).next()?,
            None => container,
        };
        let value = match self.source {
            Source::Text => collapse_whitespace(&el.text().collect::<String>()),
            Source::Attr(attr) => el.value().attr(attr)?.trim().to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    fields: Vec<(&'static str, Option<String>)>,
}

impl Record {
    /// Field value, or `NOT_FOUND`.
    pub fn get(&self, name: &str) -> &str {
        self.found(name).unwrap_or(NOT_FOUND)
    }

    pub fn found(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

/// Declarative scrape of a repeating container: the key field decides
/// whether a container yields a record, the rest may be missing.
#[derive(Debug, Clone)]
pub struct Extractor {
    container: Selector,
    key: Field,
    fields: Vec<Field>,
}

impl Extractor {
    pub fn new(container: &str, key: Field) -> Result<Self> {
        Ok(Extractor {
            container: parse(container)?,
            key,
            fields: Vec::new(),
        })
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn extract(&self, html: &str) -> Vec<Record> {
        let document = Html::parse_document(html);
        self.extract_from(&document)
    }

    pub fn extract_from(&self, document: &Html) -> Vec<Record> {
        document
            .select(&self.container)
            .filter_map(|container| {
                let key = self.key.read(container)?;
                let fields = self
                    .fields
                    .iter()
                    .map(|f| (f.name, f.read(container)))
                    .collect();
                Some(Record { key, fields })
            })
            .collect()
    }
}

fn parse(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {:?}: {:?}", css, e))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
