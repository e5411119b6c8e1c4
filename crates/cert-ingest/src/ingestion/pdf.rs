//! PDF page operations for upload preparation

use crate::error::{Error, Result};

/// Number of pages in a PDF.
pub fn page_count(data: &[u8], filename: &str) -> Result<u32> {
    let doc = lopdf::Document::load_mem(data)
        .map_err(|e| Error::file_parse(filename, format!("Failed to load PDF: {}", e)))?;
    Ok(doc.get_pages().len() as u32)
}

/// First `limit` pages of a PDF, re-serialized.
///
/// Documents at or under the limit pass through unchanged. Certificate
/// content sits on the leading pages; anything past the limit is appendix
/// material and is not uploaded.
pub fn truncate_pages(data: &[u8], filename: &str, limit: u32) -> Result<Vec<u8>> {
    let mut doc = lopdf::Document::load_mem(data)
        .map_err(|e| Error::file_parse(filename, format!("Failed to load PDF: {}", e)))?;

    let total = doc.get_pages().len() as u32;
    if total <= limit {
        return Ok(data.to_vec());
    }

    let to_delete: Vec<u32> = ((limit + 1)..=total).collect();
    doc.delete_pages(&to_delete);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| Error::file_parse(filename, format!("Failed to save truncated PDF: {}", e)))?;

    tracing::debug!(
        "[{}] Truncated from {} to {} pages for upload",
        filename,
        total,
        limit
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_with_pages(n: usize) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for i in 0..n {
            let content = Stream::new(
                dictionary! {},
                format!("BT /F1 12 Tf (page {}) Tj ET", i + 1).into_bytes(),
            );
            let content_id = doc.add_object(content);
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => n as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_page_count() {
        let data = pdf_with_pages(5);
        assert_eq!(page_count(&data, "five.pdf").unwrap(), 5);
    }

    #[test]
    fn test_truncate_over_limit() {
        let data = pdf_with_pages(25);
        let truncated = truncate_pages(&data, "long.pdf", 20).unwrap();
        assert_eq!(page_count(&truncated, "long.pdf").unwrap(), 20);
    }

    #[test]
    fn test_truncate_under_limit_passthrough() {
        let data = pdf_with_pages(3);
        let out = truncate_pages(&data, "short.pdf", 20).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_page_count_rejects_garbage() {
        assert!(page_count(b"not a pdf", "junk.pdf").is_err());
    }
}
