// Per-kind normalizers turning fetched resources into index records

use crate::classify::{NormalizerTarget, classify};
use crate::error::NormalizationError;
use crate::resource::{Asset, ContextDefinition, DataObject, Element, FetchedResource, Page};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use sitedex_scanner::filter::canonicalize;
use sitedex_scanner::result::{BinaryDocument, HtmlPage, SpiderResource};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

type NormResult<T> = std::result::Result<T, NormalizationError>;

/// Elements whose text never counts as page content
const NON_CONTENT_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Elements that break words in rendered text; inline markup does not
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Html,
    Pdf,
    Page,
    Asset,
    DataObject,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Html => "html",
            RecordKind::Pdf => "pdf",
            RecordKind::Page => "page",
            RecordKind::Asset => "asset",
            RecordKind::DataObject => "data_object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMeta {
    pub document_id: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    /// URL for spider resources, structural path for repository elements
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

/// One indexable document plus the resource it was extracted from.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRecord {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    #[serde(skip)]
    pub source: Arc<FetchedResource>,
}

impl NormalizedRecord {
    pub fn new(meta: DocumentMeta, source: &Arc<FetchedResource>) -> Self {
        Self {
            meta,
            source: source.clone(),
        }
    }
}

/// One method per resource kind. `source` is the resource the borrowed
/// payload belongs to; records keep a reference to it.
pub trait ResourceNormalizer: Send + Sync {
    fn normalize_html(
        &self,
        ctx: &ContextDefinition,
        page: &HtmlPage,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>>;

    fn normalize_pdf(
        &self,
        ctx: &ContextDefinition,
        doc: &BinaryDocument,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>>;

    fn normalize_page(
        &self,
        ctx: &ContextDefinition,
        page: &Page,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>>;

    fn normalize_asset(
        &self,
        ctx: &ContextDefinition,
        asset: &Asset,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>>;

    fn normalize_data_object(
        &self,
        ctx: &ContextDefinition,
        object: &DataObject,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>>;
}

/// Classify `resource` and run the matching normalizer. Unclassifiable
/// resources yield no records.
pub fn normalize_to_records(
    normalizer: &dyn ResourceNormalizer,
    ctx: &ContextDefinition,
    resource: Arc<FetchedResource>,
) -> NormResult<Vec<NormalizedRecord>> {
    match (classify(&resource), resource.as_ref()) {
        (NormalizerTarget::Html, FetchedResource::Spider(SpiderResource::Html(page))) => {
            normalizer.normalize_html(ctx, page, &resource)
        }
        (NormalizerTarget::Pdf, FetchedResource::Spider(SpiderResource::Binary(doc))) => {
            normalizer.normalize_pdf(ctx, doc, &resource)
        }
        (NormalizerTarget::Page, FetchedResource::Element(Element::Page(page))) => {
            normalizer.normalize_page(ctx, page, &resource)
        }
        (NormalizerTarget::Asset, FetchedResource::Element(Element::Asset(asset))) => {
            normalizer.normalize_asset(ctx, asset, &resource)
        }
        (NormalizerTarget::DataObject, FetchedResource::Element(Element::DataObject(object))) => {
            normalizer.normalize_data_object(ctx, object, &resource)
        }
        _ => {
            debug!("No normalizer for {}", resource.locator());
            Ok(Vec::new())
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResourceNormalizer;

impl DefaultResourceNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceNormalizer for DefaultResourceNormalizer {
    fn normalize_html(
        &self,
        ctx: &ContextDefinition,
        page: &HtmlPage,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>> {
        let document = Html::parse_document(&page.body);
        let locator = page.url.as_str();

        if let Some(robots) = meta_content(&document, "meta[name=\"robots\"]", locator)?
            && robots.to_ascii_lowercase().contains("noindex")
        {
            debug!("{} is marked noindex", locator);
            return Ok(Vec::new());
        }

        let body_selector = selector("body", locator)?;
        let body = document
            .select(&body_selector)
            .next()
            .map(visible_text)
            .unwrap_or_default();
        if body.is_empty() {
            return Err(NormalizationError::EmptyBody {
                kind: "html page",
                locator: locator.to_string(),
            });
        }

        let title_selector = selector("title", locator)?;
        let title = document
            .select(&title_selector)
            .next()
            .map(|t| collapse_whitespace(t.text()))
            .filter(|t| !t.is_empty())
            .or(meta_content(&document, "meta[property=\"og:title\"]", locator)?)
            .unwrap_or_else(|| locator.to_string());

        let canonical_selector = selector("link[rel=\"canonical\"]", locator)?;
        let canonical = document
            .select(&canonical_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| Url::parse(locator).ok()?.join(href.trim()).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| locator.to_string());

        let html_selector = selector("html", locator)?;
        let lang = document
            .select(&html_selector)
            .next()
            .and_then(|html| html.value().attr("lang"))
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty());

        let description = meta_content(&document, "meta[name=\"description\"]", locator)?;

        let meta = DocumentMeta {
            document_id: format!("html:{}", canonical_key(&canonical)),
            kind: RecordKind::Html,
            title,
            body,
            structural_path: Url::parse(&canonical).ok().map(|u| u.path().to_string()),
            locator: canonical,
            content_type: Some("text/html".to_string()),
            size: Some(page.body.len() as u64),
            locale: lang.or_else(|| ctx.default_locale.clone()),
            description,
            page_count: None,
        };

        Ok(vec![NormalizedRecord::new(meta, source)])
    }

    fn normalize_pdf(
        &self,
        ctx: &ContextDefinition,
        doc: &BinaryDocument,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>> {
        let body = doc
            .extracted_text
            .as_deref()
            .map(|text| collapse_whitespace(std::iter::once(text)))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| NormalizationError::MissingField {
                kind: "pdf document",
                locator: doc.url.clone(),
                field: "extracted text",
            })?;

        let url = Url::parse(&doc.url).ok();
        let title = doc
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or_else(|| url.as_ref().and_then(last_path_segment))
            .unwrap_or_else(|| doc.url.clone());

        let meta = DocumentMeta {
            document_id: format!("pdf:{}", canonical_key(&doc.url)),
            kind: RecordKind::Pdf,
            title,
            body,
            locator: doc.url.clone(),
            content_type: Some("application/pdf".to_string()),
            size: Some(doc.size),
            structural_path: url.as_ref().map(|u| u.path().to_string()),
            locale: ctx.default_locale.clone(),
            description: None,
            page_count: doc.page_count,
        };

        Ok(vec![NormalizedRecord::new(meta, source)])
    }

    fn normalize_page(
        &self,
        ctx: &ContextDefinition,
        page: &Page,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>> {
        if !page.published {
            debug!("Page {} is unpublished", page.id);
            return Ok(Vec::new());
        }

        let fragment = Html::parse_fragment(&page.content);
        let body = visible_text(fragment.root_element());
        let title = page
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);

        if body.is_empty() && title.is_none() {
            return Err(NormalizationError::EmptyBody {
                kind: "page",
                locator: page.path.clone(),
            });
        }

        let meta = DocumentMeta {
            document_id: format!("page_{}", page.id),
            kind: RecordKind::Page,
            title: title.unwrap_or_else(|| page.key.clone()),
            body,
            locator: page.path.clone(),
            content_type: Some("text/html".to_string()),
            size: Some(page.content.len() as u64),
            structural_path: Some(page.path.clone()),
            locale: page.locale.clone().or_else(|| ctx.default_locale.clone()),
            description: page.description.clone(),
            page_count: None,
        };

        Ok(vec![NormalizedRecord::new(meta, source)])
    }

    fn normalize_asset(
        &self,
        ctx: &ContextDefinition,
        asset: &Asset,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>> {
        if asset.filename.trim().is_empty() {
            return Err(NormalizationError::MissingField {
                kind: "asset",
                locator: asset.path.clone(),
                field: "filename",
            });
        }

        let title = asset
            .metadata
            .get("title")
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| asset.filename.clone());

        let body = asset
            .extracted_text
            .as_deref()
            .map(|text| collapse_whitespace(std::iter::once(text)))
            .unwrap_or_default();

        let meta = DocumentMeta {
            document_id: format!("asset_{}", asset.id),
            kind: RecordKind::Asset,
            title,
            body,
            locator: asset.path.clone(),
            content_type: Some(asset.mime_type.clone()).filter(|m| !m.is_empty()),
            size: Some(asset.size),
            structural_path: Some(asset.path.clone()),
            locale: asset.locale.clone().or_else(|| ctx.default_locale.clone()),
            description: asset.metadata.get("description").cloned(),
            page_count: None,
        };

        Ok(vec![NormalizedRecord::new(meta, source)])
    }

    fn normalize_data_object(
        &self,
        ctx: &ContextDefinition,
        object: &DataObject,
        source: &Arc<FetchedResource>,
    ) -> NormResult<Vec<NormalizedRecord>> {
        if !object.published {
            debug!("Object {} is unpublished", object.id);
            return Ok(Vec::new());
        }

        let title = ["title", "name"]
            .iter()
            .filter_map(|field| object.fields.get(*field))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .map(String::from)
            .unwrap_or_else(|| object.key.clone());

        let body = collapse_whitespace(object.fields.values().map(String::as_str));

        let meta = DocumentMeta {
            document_id: format!("object_{}", object.id),
            kind: RecordKind::DataObject,
            title,
            body,
            locator: object.path.clone(),
            content_type: None,
            size: None,
            structural_path: Some(object.path.clone()),
            locale: object.locale.clone().or_else(|| ctx.default_locale.clone()),
            description: None,
            page_count: None,
        };

        let mut records = vec![NormalizedRecord::new(meta, source)];

        for child in &object.children {
            let child = Arc::new(FetchedResource::Element(child.clone()));
            match normalize_to_records(self, ctx, child) {
                Ok(child_records) => records.extend(child_records),
                Err(e) => warn!("Dropping child of object {}: {}", object.id, e),
            }
        }

        Ok(records)
    }
}

fn selector(css: &str, locator: &str) -> NormResult<Selector> {
    Selector::parse(css).map_err(|e| NormalizationError::Parse {
        locator: locator.to_string(),
        reason: e.to_string(),
    })
}

fn meta_content(document: &Html, css: &str, locator: &str) -> NormResult<Option<String>> {
    let selector = selector(css, locator)?;
    Ok(document
        .select(&selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty()))
}

/// Whitespace-collapsed text under `root`, skipping non-content elements.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in root.descendants() {
        if let Some(element) = node.value().as_element() {
            if is_block(element.name()) {
                raw.push(' ');
            }
            continue;
        }
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| NON_CONTENT_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        // Text right after a closed block starts a new word
        if node
            .prev_sibling()
            .and_then(|sibling| sibling.value().as_element())
            .is_some_and(|el| is_block(el.name()))
        {
            raw.push(' ');
        }
        raw.push_str(&**text);
    }
    collapse_whitespace(std::iter::once(raw.as_str()))
}

fn is_block(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(&name)
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn canonical_key(locator: &str) -> String {
    match Url::parse(locator) {
        Ok(url) => canonicalize(&url),
        Err(_) => locator.to_string(),
    }
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(String::from)
}
