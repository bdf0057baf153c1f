use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Read the JSON array of storefront category URLs.
pub fn load(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed list {:?}", path))?;
    let urls = parse(&raw).with_context(|| format!("Invalid seed list {:?}", path))?;
    info!("Loaded {} seed URLs from {:?}", urls.len(), path);
    Ok(urls)
}

fn parse(raw: &str) -> Result<Vec<String>> {
    let urls: Vec<String> = serde_json::from_str(raw)?;
    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    for u in &urls {
        if url::Url::parse(u).is_err() {
            bail!("not an absolute URL: {}", u);
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_drops_blanks() {
        let urls = parse(r#"["https://a.test/x", "  ", " https://a.test/y "]"#).unwrap();
        assert_eq!(urls, ["https://a.test/x", "https://a.test/y"]);
    }

    #[test]
    fn rejects_relative_entries() {
        assert!(parse(r#"["/restaurantes"]"#).is_err());
        assert!(parse(r#"{"urls": []}"#).is_err());
    }
}
