//! バージョンからイメージタグを計算
//!
//! 3つのチャネルを生成する:
//! - 完全一致: `1.4.0`
//! - major.minor: `1.4`
//! - major: `1`
//!
//! 0.x 系とプレリリースでは粗いチャネルを生成しない
//! （`0` や `0.3` が別の破壊的変更を指すことを避けるため）。

use crate::error::{TagError, TagResult};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Docker タグの最大長
const MAX_TAG_LENGTH: usize = 128;

/// パース済みのセマンティックバージョン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// 1.0 未満（公開 API が安定していない）かどうか
    pub fn is_initial_development(&self) -> bool {
        self.major == 0
    }
}

impl FromStr for Version {
    type Err = TagError;

    fn from_str(s: &str) -> TagResult<Self> {
        let invalid = || TagError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (trimmed, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let numbers: Vec<u64> = core
            .split('.')
            .map(|part| parse_numeric(part).ok_or_else(invalid))
            .collect::<TagResult<_>>()?;
        let [major, minor, patch] = numbers[..] else {
            return Err(invalid());
        };

        for ident in [pre, build].into_iter().flatten() {
            if ident.is_empty()
                || ident
                    .split('.')
                    .any(|part| part.is_empty() || !part.chars().all(is_ident_char))
            {
                return Err(invalid());
            }
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre: pre.map(str::to_string),
            build: build.map(str::to_string),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

fn parse_numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // 先頭ゼロは不可（"0" 自体は可）
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// 1ジョブに付与するタグ（細かい順）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageTags(Vec<String>);

impl ImageTags {
    /// 完全一致タグ（常に先頭）
    pub fn exact(&self) -> &str {
        &self.0[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// バージョン文字列からタグを計算
pub fn compute_tags(version: &str) -> TagResult<ImageTags> {
    let version: Version = version.parse()?;

    // OCI タグに + は使えない
    let exact = version.to_string().replace('+', "-");
    let mut tags = vec![exact];

    if !version.is_initial_development() && !version.is_prerelease() {
        tags.push(format!("{}.{}", version.major, version.minor));
        tags.push(version.major.to_string());
    }

    for tag in &tags {
        validate_tag(tag)?;
    }

    Ok(ImageTags(tags))
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> TagResult<()> {
    if tag.is_empty() {
        return Err(TagError::InvalidTag("(empty)".to_string()));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(TagError::InvalidTag(format!(
            "Tag too long ({} characters, max {})",
            tag.len(),
            MAX_TAG_LENGTH
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(TagError::InvalidTag(tag.to_string()));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(TagError::InvalidTag(format!(
            "Invalid character '{}' in tag: {}",
            c, tag
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(version: &str) -> Vec<String> {
        compute_tags(version).unwrap().as_slice().to_vec()
    }

    #[test]
    fn test_stable_release_gets_all_channels() {
        assert_eq!(tags("1.4.0"), vec!["1.4.0", "1.4", "1"]);
        assert_eq!(tags("12.0.7"), vec!["12.0.7", "12.0", "12"]);
    }

    #[test]
    fn test_initial_development_only_exact() {
        assert_eq!(tags("0.3.1"), vec!["0.3.1"]);
        assert_eq!(tags("0.0.1"), vec!["0.0.1"]);
    }

    #[test]
    fn test_prerelease_only_exact() {
        assert_eq!(tags("2.0.0-rc.1"), vec!["2.0.0-rc.1"]);
    }

    #[test]
    fn test_leading_v_is_stripped() {
        assert_eq!(tags("v1.2.3"), vec!["1.2.3", "1.2", "1"]);
    }

    #[test]
    fn test_build_metadata_is_tag_safe() {
        let computed = compute_tags("1.2.3+build.5").unwrap();
        assert_eq!(computed.exact(), "1.2.3-build.5");
        assert_eq!(computed.len(), 3);
    }

    #[test]
    fn test_invalid_versions() {
        for version in ["", "1", "1.2", "1.2.3.4", "01.2.3", "a.b.c", "1.2.3-", "1.2.3-rc..1"] {
            assert!(
                matches!(compute_tags(version), Err(TagError::InvalidVersion(_))),
                "{version:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_version_display_roundtrip() {
        let version: Version = "1.0.0-beta.2+sha.abc".parse().unwrap();
        assert_eq!(version.to_string(), "1.0.0-beta.2+sha.abc");
        assert!(version.is_prerelease());
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("v1.0").is_ok());
        assert!(validate_tag("latest").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("-dash").is_err());
        assert!(validate_tag("a:b").is_err());
        assert!(validate_tag(&"a".repeat(129)).is_err());
    }
}
