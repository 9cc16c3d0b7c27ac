// Resources handed to the normalization pipeline: spider payloads and
// repository elements

use serde::{Deserialize, Serialize};
use sitedex_scanner::result::SpiderResource;
use std::collections::BTreeMap;

/// Anything the classifier can be asked about. Shared read-only (behind an
/// `Arc`) once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetchedResource {
    Spider(SpiderResource),
    Element(Element),
}

impl FetchedResource {
    /// URL for spider payloads, structural path for repository elements
    pub fn locator(&self) -> &str {
        match self {
            FetchedResource::Spider(resource) => resource.url(),
            FetchedResource::Element(element) => element.path(),
        }
    }
}

impl From<SpiderResource> for FetchedResource {
    fn from(resource: SpiderResource) -> Self {
        FetchedResource::Spider(resource)
    }
}

impl From<Element> for FetchedResource {
    fn from(element: Element) -> Self {
        FetchedResource::Element(element)
    }
}

/// An element already known to the host content repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Element {
    Page(Page),
    Asset(Asset),
    DataObject(DataObject),
    Other(OtherElement),
}

impl Element {
    pub fn kind(&self) -> &str {
        match self {
            Element::Page(_) => "page",
            Element::Asset(_) => "asset",
            Element::DataObject(_) => "object",
            Element::Other(other) => &other.kind,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Element::Page(page) => page.id,
            Element::Asset(asset) => asset.id,
            Element::DataObject(object) => object.id,
            Element::Other(other) => other.id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Element::Page(page) => &page.path,
            Element::Asset(asset) => &asset.path,
            Element::DataObject(object) => &object.path,
            Element::Other(other) => &other.path,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub id: u64,
    pub key: String,
    /// Structural path, e.g. `/en/about`
    pub path: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub locale: Option<String>,
    pub published: bool,
    /// Rendered HTML
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub filename: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub locale: Option<String>,
    pub extracted_text: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataObject {
    pub id: u64,
    pub key: String,
    pub path: String,
    pub class_name: String,
    pub locale: Option<String>,
    pub published: bool,
    pub fields: BTreeMap<String, String>,
    /// Embedded elements indexed alongside the object
    pub children: Vec<Element>,
}

/// Element of a kind the pipeline has no normalizer for (folders, links, ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherElement {
    pub kind: String,
    pub id: u64,
    pub path: String,
}

/// Handle for single-resource provisioning. `options["path"]` is the locator
/// resolved against the configured host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub document_id: Option<String>,
    pub resource_type: String,
    pub options: BTreeMap<String, String>,
}

impl ResourceMeta {
    pub fn with_path(path: impl Into<String>) -> Self {
        let mut options = BTreeMap::new();
        options.insert("path".to_string(), path.into());
        Self {
            document_id: None,
            resource_type: "spider".to_string(),
            options,
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.options
            .get("path")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
    }
}

/// Indexing context a provider call runs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDefinition {
    pub name: String,
    /// Used when a resource carries no locale of its own
    pub default_locale: Option<String>,
}

impl ContextDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_locale: None,
        }
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = Some(locale.into());
        self
    }
}

impl Default for ContextDefinition {
    fn default() -> Self {
        Self::new("default")
    }
}
