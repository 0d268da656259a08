mod blocks;
mod provider;
mod raster;

pub use blocks::{
    blocks_from_text, joined_text, n_pages, page_text, Block, BlockType, PAGE_SEPARATOR,
};
pub use provider::{OcrProvider, ProviderError, RestProvider};
pub use raster::{is_pdf, rasterize};

/// How an uploaded file enters the pipeline: through the OCR provider, or
/// directly as text (pre-text formats skip the provider and its SPU charge).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    Ocr,
    PlainText,
}

/// Classify a file by its extension. Unknown extensions are treated as OCR
/// inputs and left to the provider to accept or reject.
pub fn input_kind(file_name: &str) -> InputKind {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "csv" | "md" | "json" => InputKind::PlainText,
        _ => InputKind::Ocr,
    }
}

/// File extension recorded for the original blob, lowercased, defaulting to
/// `bin` for extension-less names.
pub fn blob_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod test {
    use super::{blob_extension, input_kind, InputKind};

    #[test]
    fn test_input_kind_by_extension() {
        assert_eq!(input_kind("scan.pdf"), InputKind::Ocr);
        assert_eq!(input_kind("photo.PNG"), InputKind::Ocr);
        assert_eq!(input_kind("page.jpeg"), InputKind::Ocr);
        assert_eq!(input_kind("notes.txt"), InputKind::PlainText);
        assert_eq!(input_kind("table.csv"), InputKind::PlainText);
        assert_eq!(input_kind("readme.md"), InputKind::PlainText);
        // No extension: let the OCR provider decide.
        assert_eq!(input_kind("mystery"), InputKind::Ocr);
    }

    #[test]
    fn test_blob_extension() {
        assert_eq!(blob_extension("invoice.PDF"), "pdf");
        assert_eq!(blob_extension("archive.tar.gz"), "gz");
        assert_eq!(blob_extension("no_extension"), "bin");
    }
}
