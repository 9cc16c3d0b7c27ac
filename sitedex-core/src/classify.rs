use crate::resource::{Element, FetchedResource};
use sitedex_scanner::filter::mime_essence;
use sitedex_scanner::result::SpiderResource;

pub use sitedex_scanner::pdf::PDF_CONTENT_TYPES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizerTarget {
    Html,
    Pdf,
    Page,
    Asset,
    DataObject,
    /// Not indexable; yields no records
    None,
}

pub fn is_pdf_content_type(content_type: &str) -> bool {
    let essence = mime_essence(content_type);
    PDF_CONTENT_TYPES.contains(&essence.as_str())
}

/// Pick the normalizer for a resource. Rules are evaluated top-down.
pub fn classify(resource: &FetchedResource) -> NormalizerTarget {
    match resource {
        FetchedResource::Spider(SpiderResource::Html(_)) => NormalizerTarget::Html,
        FetchedResource::Spider(SpiderResource::Binary(doc)) => {
            if is_pdf_content_type(&doc.content_type) {
                NormalizerTarget::Pdf
            } else {
                NormalizerTarget::None
            }
        }
        FetchedResource::Element(Element::Page(_)) => NormalizerTarget::Page,
        FetchedResource::Element(Element::Asset(_)) => NormalizerTarget::Asset,
        FetchedResource::Element(Element::DataObject(_)) => NormalizerTarget::DataObject,
        FetchedResource::Element(Element::Other(_)) => NormalizerTarget::None,
    }
}

/// Pages, assets and data objects are the only elements accepted from an
/// untrusted element source.
pub fn is_indexable_element(resource: &FetchedResource) -> bool {
    matches!(
        resource,
        FetchedResource::Element(Element::Page(_) | Element::Asset(_) | Element::DataObject(_))
    )
}
