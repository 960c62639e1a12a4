// Release feed parsing (GitHub releases API shape).

use serde::Deserialize;

use crate::fetch::FetchError;

/// Asset names matched exactly in the release's asset list.
pub const FIRMWARE_ASSET: &str = "firmware.bin";
pub const FILESYSTEM_ASSET: &str = "littlefs.bin";

/// One release worth of metadata, consumed once by the update manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Version with the tag marker stripped, e.g. "0.3.0" from "v0.3.0".
    pub version: String,
    pub notes: String,
    pub firmware_url: String,
    pub filesystem_url: Option<String>,
}

#[derive(Deserialize)]
struct ReleaseDoc {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    assets: Vec<AssetDoc>,
}

#[derive(Deserialize)]
struct AssetDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    browser_download_url: String,
}

/// Parse a releases-API response body. A release without a version tag or a
/// firmware asset is unusable regardless of version.
pub fn parse_release(body: &[u8]) -> Result<Release, FetchError> {
    let doc: ReleaseDoc =
        serde_json::from_slice(body).map_err(|_| FetchError::MalformedResponse)?;

    // Strip one leading marker character ("v1.2.3" -> "1.2.3").
    let version = match doc.tag_name.chars().next() {
        Some(c) if !c.is_ascii_digit() => doc.tag_name[c.len_utf8()..].to_string(),
        _ => doc.tag_name,
    };

    let mut firmware_url = None;
    let mut filesystem_url = None;
    for asset in &doc.assets {
        if asset.name == FIRMWARE_ASSET && !asset.browser_download_url.is_empty() {
            firmware_url = Some(asset.browser_download_url.clone());
        } else if asset.name == FILESYSTEM_ASSET && !asset.browser_download_url.is_empty() {
            filesystem_url = Some(asset.browser_download_url.clone());
        }
    }

    match (version.is_empty(), firmware_url) {
        (false, Some(firmware_url)) => Ok(Release {
            version,
            notes: doc.body,
            firmware_url,
            filesystem_url,
        }),
        _ => Err(FetchError::IncompleteRelease),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_release_parses() {
        let body = br#"{
            "tag_name": "v1.4.0",
            "body": "Fixes relay chatter",
            "assets": [
                {"name": "firmware.bin", "browser_download_url": "https://dl/fw.bin"},
                {"name": "littlefs.bin", "browser_download_url": "https://dl/fs.bin"},
                {"name": "checksums.txt", "browser_download_url": "https://dl/sums.txt"}
            ]
        }"#;
        let release = parse_release(body).unwrap();
        assert_eq!(release.version, "1.4.0");
        assert_eq!(release.notes, "Fixes relay chatter");
        assert_eq!(release.firmware_url, "https://dl/fw.bin");
        assert_eq!(release.filesystem_url.as_deref(), Some("https://dl/fs.bin"));
    }

    #[test]
    fn filesystem_asset_is_optional() {
        let body = br#"{
            "tag_name": "1.4.0",
            "assets": [{"name": "firmware.bin", "browser_download_url": "https://dl/fw.bin"}]
        }"#;
        let release = parse_release(body).unwrap();
        assert_eq!(release.version, "1.4.0");
        assert_eq!(release.filesystem_url, None);
        assert_eq!(release.notes, "");
    }

    #[test]
    fn missing_firmware_asset_is_incomplete() {
        let body = br#"{
            "tag_name": "v1.4.0",
            "assets": [{"name": "littlefs.bin", "browser_download_url": "https://dl/fs.bin"}]
        }"#;
        assert_eq!(parse_release(body).unwrap_err(), FetchError::IncompleteRelease);
    }

    #[test]
    fn missing_tag_is_incomplete() {
        let body = br#"{
            "assets": [{"name": "firmware.bin", "browser_download_url": "https://dl/fw.bin"}]
        }"#;
        assert_eq!(parse_release(body).unwrap_err(), FetchError::IncompleteRelease);
    }

    #[test]
    fn asset_names_match_exactly() {
        let body = br#"{
            "tag_name": "v1.4.0",
            "assets": [{"name": "firmware.bin.sig", "browser_download_url": "https://dl/sig"}]
        }"#;
        assert_eq!(parse_release(body).unwrap_err(), FetchError::IncompleteRelease);
    }

    #[test]
    fn non_json_body_is_malformed() {
        assert_eq!(
            parse_release(b"<html>rate limited</html>").unwrap_err(),
            FetchError::MalformedResponse
        );
    }
}
