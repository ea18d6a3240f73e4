//! Shared test fixtures.

use crate::adapter::{Descriptor, DescriptorPage};

/// A descriptor whose media URL points at a synthetic address.
pub fn descriptor(source: &str, id: &str, format: &str, tags: &[&str]) -> Descriptor {
    Descriptor {
        source: source.to_string(),
        id: id.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        filename: format!("{}.{}", id, format),
        format: format.to_string(),
        expected_bytes: None,
        media_url: Some(format!("https://media.test/{}/{}.{}", source, id, format)),
    }
}

/// A descriptor with a known expected size.
pub fn sized_descriptor(source: &str, id: &str, format: &str, bytes: u64) -> Descriptor {
    Descriptor {
        expected_bytes: Some(bytes),
        ..descriptor(source, id, format, &[])
    }
}

/// A page of `count` sequentially-numbered descriptors.
pub fn page(source: &str, start_id: u64, count: u64, has_more: bool) -> DescriptorPage {
    DescriptorPage {
        descriptors: (start_id..start_id + count)
            .map(|id| descriptor(source, &id.to_string(), "png", &[]))
            .collect(),
        has_more,
    }
}
