//! Text extraction from scanned-document PDF renditions.

use lopdf::Document;

use crate::error::{HarvesterError, Result};

/// Extract text from PDF bytes, page by page in page order.
///
/// Pages are trimmed and joined with a blank line so the line-based text
/// parser sees page boundaries as block boundaries. Pages without text are
/// left out. A PDF without any text layer yields an empty string.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let document = Document::load_mem(bytes).map_err(|e| HarvesterError::Pdf(e.to_string()))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().into_keys() {
        match document.extract_text(&[page_number]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push(text.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(page = page_number, error = %e, "Failed to extract page text");
            }
        }
    }

    tracing::debug!(pages = pages.len(), bytes = bytes.len(), "Extracted PDF text");
    Ok(pages.join("\n\n"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a PDF with one page per entry, each line drawn with `Tj`.
    pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for page in pages {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 760.into()]),
            ];
            for line in page.lines() {
                operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
                operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            operations.push(Operation::new("ET", vec![]));

            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}
