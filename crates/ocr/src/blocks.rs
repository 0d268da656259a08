/// Separator between pages in the joined OCR text artifact.
pub const PAGE_SEPARATOR: char = '\u{0c}';

/// One OCR block as returned by the provider: a detected page, line, or
/// word, with its text and 1-based page number. Geometry is carried
/// verbatim for the blocks artifact but never interpreted here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Block {
    #[serde(default = "default_page")]
    pub page: u32,
    pub block_type: BlockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
}

fn default_page() -> u32 {
    1
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
}

/// Number of pages covered by a block set: the highest page number seen.
pub fn n_pages(blocks: &[Block]) -> u32 {
    blocks.iter().map(|b| b.page).max().unwrap_or(0)
}

/// Text of a single 1-based page: its LINE blocks joined with newlines.
pub fn page_text(blocks: &[Block], page: u32) -> String {
    let lines: Vec<&str> = blocks
        .iter()
        .filter(|b| b.page == page && b.block_type == BlockType::Line)
        .filter_map(|b| b.text.as_deref())
        .collect();
    lines.join("\n")
}

/// Text of all pages, joined with the form-feed page separator. This is the
/// artifact whose whole-document form must equal the concatenation of its
/// per-page forms.
pub fn joined_text(blocks: &[Block]) -> String {
    let pages = n_pages(blocks);
    (1..=pages)
        .map(|page| page_text(blocks, page))
        .collect::<Vec<String>>()
        .join(&PAGE_SEPARATOR.to_string())
}

/// Wrap raw text (a pre-text upload that skipped the provider) in a single
/// synthetic page of LINE blocks, so every document has a blocks artifact.
pub fn blocks_from_text(text: &str) -> Vec<Block> {
    let mut blocks = vec![Block {
        page: 1,
        block_type: BlockType::Page,
        text: None,
        confidence: None,
        geometry: None,
    }];
    blocks.extend(text.lines().map(|line| Block {
        page: 1,
        block_type: BlockType::Line,
        text: Some(line.to_string()),
        confidence: None,
        geometry: None,
    }));
    blocks
}

#[cfg(test)]
mod test {
    use super::*;

    fn line(page: u32, text: &str) -> Block {
        Block {
            page,
            block_type: BlockType::Line,
            text: Some(text.to_string()),
            confidence: Some(99.1),
            geometry: None,
        }
    }

    fn page_block(page: u32) -> Block {
        Block {
            page,
            block_type: BlockType::Page,
            text: None,
            confidence: None,
            geometry: None,
        }
    }

    #[test]
    fn test_joined_text_equals_concatenated_pages() {
        let blocks = vec![
            page_block(1),
            line(1, "Invoice 42"),
            line(1, "Total: $10"),
            page_block(2),
            line(2, "Terms and conditions"),
        ];

        assert_eq!(n_pages(&blocks), 2);
        assert_eq!(page_text(&blocks, 1), "Invoice 42\nTotal: $10");
        assert_eq!(page_text(&blocks, 2), "Terms and conditions");

        let joined = joined_text(&blocks);
        let expect = (1..=2)
            .map(|p| page_text(&blocks, p))
            .collect::<Vec<_>>()
            .join("\u{0c}");
        assert_eq!(joined, expect);
        assert_eq!(joined, "Invoice 42\nTotal: $10\u{0c}Terms and conditions");
    }

    #[test]
    fn test_word_blocks_do_not_duplicate_lines() {
        let mut blocks = vec![line(1, "hello world")];
        blocks.push(Block {
            page: 1,
            block_type: BlockType::Word,
            text: Some("hello".to_string()),
            confidence: None,
            geometry: None,
        });
        assert_eq!(page_text(&blocks, 1), "hello world");
    }

    #[test]
    fn test_empty_blocks() {
        assert_eq!(n_pages(&[]), 0);
        assert_eq!(joined_text(&[]), "");
    }

    #[test]
    fn test_blocks_from_text_round_trip() {
        let blocks = blocks_from_text("alpha\nbeta");
        assert_eq!(n_pages(&blocks), 1);
        assert_eq!(page_text(&blocks, 1), "alpha\nbeta");
    }

    #[test]
    fn test_block_serde_shape() {
        let block = line(3, "x");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["page"], 3);
        assert_eq!(json["block_type"], "LINE");
        assert_eq!(json["text"], "x");
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back.page, 3);
    }
}
