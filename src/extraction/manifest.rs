use serde::Deserialize;
use std::path::Path;

/// Assets to acquire after the pages have been visited
///
/// Loaded from the JSON file named by `CRAWLER_ASSET_MANIFEST`:
/// `{"attachments": [{"url", "filename"}], "videos": [{"url", "filename"}]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub attachments: Vec<AssetEntry>,
    #[serde(default)]
    pub videos: Vec<AssetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetEntry {
    pub url: String,
    /// Defaults to the last path segment of the URL
    #[serde(default)]
    pub filename: Option<String>,
}

impl AssetEntry {
    pub fn filename(&self) -> String {
        if let Some(name) = self.filename.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| "download".to_string())
    }
}

impl AssetManifest {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.videos.is_empty()
    }
}
