use models::Id;

/// Blob name of a document's original upload, e.g. `0102..0c.pdf`.
pub fn original_name(document_id: Id, ext: &str) -> String {
    format!("{document_id}.{ext}")
}

/// Blob name of a rasterized page image. Pages are 1-based.
pub fn page_image_name(document_id: Id, page: u32) -> String {
    format!("{document_id}.page.{page}.png")
}

/// Blob name of the OCR blocks JSON artifact.
pub fn blocks_name(document_id: Id) -> String {
    format!("{document_id}.ocr_blocks.json")
}

/// Blob name of the joined OCR text (pages separated by form-feed).
pub fn text_name(document_id: Id) -> String {
    format!("{document_id}.ocr_text.txt")
}

/// Blob name of a single page's OCR text. Pages are 1-based.
pub fn page_text_name(document_id: Id, page: u32) -> String {
    format!("{document_id}.ocr_text.{page}.txt")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_artifact_naming_convention() {
        let id: Id = "0102030405060708090a0b0c".parse().unwrap();

        assert_eq!(original_name(id, "pdf"), "0102030405060708090a0b0c.pdf");
        assert_eq!(
            page_image_name(id, 1),
            "0102030405060708090a0b0c.page.1.png"
        );
        assert_eq!(
            blocks_name(id),
            "0102030405060708090a0b0c.ocr_blocks.json"
        );
        assert_eq!(text_name(id), "0102030405060708090a0b0c.ocr_text.txt");
        assert_eq!(
            page_text_name(id, 3),
            "0102030405060708090a0b0c.ocr_text.3.txt"
        );
    }
}
