use anyhow::Context;

/// Render a PDF to one PNG per page by invoking `pdftoppm`, returning pages
/// in order. Non-PDF inputs (single images) are passed through as their own
/// single page.
pub async fn rasterize(bytes: &bytes::Bytes) -> anyhow::Result<Vec<bytes::Bytes>> {
    if !is_pdf(bytes) {
        return Ok(vec![bytes.clone()]);
    }

    let dir = tempfile::tempdir().context("creating rasterization scratch directory")?;
    let input = dir.path().join("input.pdf");
    tokio::fs::write(&input, bytes)
        .await
        .context("writing pdf to scratch directory")?;

    let prefix = dir.path().join("page");
    let output = tokio::process::Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg("150")
        .arg(&input)
        .arg(&prefix)
        .output()
        .await
        .context("spawning pdftoppm")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("pdftoppm exited with {}: {stderr}", output.status);
    }

    // pdftoppm names outputs page-1.png, page-2.png, ... (zero-padded when
    // the document has 10+ pages). Collect and order them by page number.
    let mut pages: Vec<(u32, std::path::PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir.path())
        .await
        .context("listing rasterized pages")?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(number) = name
            .strip_prefix("page-")
            .and_then(|rest| rest.strip_suffix(".png"))
        else {
            continue;
        };
        let number: u32 = number
            .parse()
            .with_context(|| format!("unexpected pdftoppm output name {name:?}"))?;
        pages.push((number, entry.path()));
    }
    pages.sort_by_key(|(number, _)| *number);

    let mut rendered = Vec::with_capacity(pages.len());
    for (_, path) in pages {
        let png = tokio::fs::read(&path).await.context("reading page png")?;
        rendered.push(bytes::Bytes::from(png));
    }

    if rendered.is_empty() {
        anyhow::bail!("pdftoppm produced no pages");
    }
    tracing::debug!(pages = rendered.len(), "rasterized pdf");
    Ok(rendered)
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

#[cfg(test)]
mod test {
    use super::is_pdf;

    #[test]
    fn test_pdf_magic_detection() {
        assert!(is_pdf(b"%PDF-1.4\nrest"));
        assert!(!is_pdf(b"\x89PNG\r\n"));
        assert!(!is_pdf(b""));
    }

    #[tokio::test]
    async fn test_images_pass_through_as_one_page() {
        let png = bytes::Bytes::from_static(b"\x89PNG\r\n\x1a\nfake");
        let pages = super::rasterize(&png).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0], png);
    }
}
