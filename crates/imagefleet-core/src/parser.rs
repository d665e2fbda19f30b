//! イメージレジストリのパーサー
//!
//! `images.kdl`（KDL）と `images.yml` / `images.yaml`（YAML）を読み込み、
//! ImageRegistry を生成する。不整合はすべてロード時のエラーになる。

use crate::error::{RegistryError, RegistryResult};
use crate::model::{DEFAULT_REGISTRY_HOST, ImageDescriptor, ImageRegistry};
use kdl::{KdlDocument, KdlNode};
use serde::Deserialize;
use serde::de::{self, MapAccess, Visitor};
use std::fmt;
use std::path::{Path, PathBuf};

/// 記述子の解決前の状態（省略値の補完前）
#[derive(Debug, Default)]
struct PendingImage {
    image_name: String,
    display_name: Option<String>,
    file: Option<PathBuf>,
    owner: Option<String>,
}

/// レジストリ全体の hosting 既定値
#[derive(Debug, Default)]
struct HostingDefaults {
    host: Option<String>,
    owner: Option<String>,
}

/// ファイルを ImageRegistry にパース（拡張子で形式を判定）
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub fn parse_registry_file(path: &Path) -> RegistryResult<ImageRegistry> {
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let registry = match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => parse_registry_yaml(&content)?,
        _ => parse_registry(&content)?,
    };

    tracing::debug!(
        apps = registry.app_count(),
        images = registry.image_count(),
        "Loaded image registry"
    );
    Ok(registry)
}

/// KDL文字列を ImageRegistry にパース
pub fn parse_registry(content: &str) -> RegistryResult<ImageRegistry> {
    let doc: KdlDocument = content.parse()?;

    let mut defaults: Option<HostingDefaults> = None;
    let mut apps: Vec<(String, Vec<PendingImage>)> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "hosting" => {
                if defaults.is_some() {
                    return Err(RegistryError::InvalidConfig(
                        "トップレベルの hosting が複数回定義されています".to_string(),
                    ));
                }
                defaults = Some(parse_hosting(node));
            }
            "app" => {
                apps.push(parse_app(node)?);
            }
            other => {
                tracing::warn!(node = other, "Unknown node in image registry, skipping");
            }
        }
    }

    build_registry(defaults.unwrap_or_default(), apps)
}

/// hosting ノードをパース
fn parse_hosting(node: &KdlNode) -> HostingDefaults {
    let mut hosting = HostingDefaults::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "host" => hosting.host = first_string(child),
                "owner" => hosting.owner = first_string(child),
                _ => {}
            }
        }
    }

    hosting
}

/// app ノードをパース
fn parse_app(node: &KdlNode) -> RegistryResult<(String, Vec<PendingImage>)> {
    let name = first_string(node)
        .ok_or_else(|| RegistryError::InvalidConfig("app には名前が必要です".to_string()))?;

    let mut images = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => images.push(parse_image(&name, child)?),
                other => {
                    tracing::warn!(app = %name, node = other, "Unknown node in app, skipping");
                }
            }
        }
    }

    Ok((name, images))
}

/// image ノードをパース
fn parse_image(app: &str, node: &KdlNode) -> RegistryResult<PendingImage> {
    let image_name = first_string(node).ok_or_else(|| {
        RegistryError::InvalidConfig(format!("app '{}' の image には名前が必要です", app))
    })?;

    let mut image = PendingImage {
        image_name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "display-name" => image.display_name = first_string(child),
                "file" => image.file = first_string(child).map(PathBuf::from),
                "hosting" => image.owner = parse_hosting(child).owner,
                other => {
                    tracing::warn!(
                        app,
                        image = %image.image_name,
                        node = other,
                        "Unknown node in image, skipping"
                    );
                }
            }
        }
    }

    Ok(image)
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// YAML のトップレベル（app_name → 記述子）を、重複キーも含めて記述順に保持する
///
/// マップ型に直接読み込むと同名キーが後勝ちで潰れるため、エントリを列挙して
/// 重複判定を `ImageRegistry::insert_app` に任せる。
struct YamlApps(Vec<(String, YamlImages)>);

impl<'de> Deserialize<'de> for YamlApps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AppsVisitor;

        impl<'de> Visitor<'de> for AppsVisitor {
            type Value = YamlApps;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of app name to image descriptors")
            }

            fn visit_unit<E: de::Error>(self) -> Result<YamlApps, E> {
                Ok(YamlApps(Vec::new()))
            }

            fn visit_map<A>(self, mut map: A) -> Result<YamlApps, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut apps = Vec::new();
                while let Some(entry) = map.next_entry::<String, YamlImages>()? {
                    apps.push(entry);
                }
                Ok(YamlApps(apps))
            }
        }

        deserializer.deserialize_map(AppsVisitor)
    }
}

/// YAML 上の記述子（単体またはリスト）
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YamlImages {
    Many(Vec<YamlImage>),
    One(YamlImage),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlImage {
    image_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    hosting: Option<YamlHosting>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlHosting {
    owner: Option<String>,
}

/// YAML文字列を ImageRegistry にパース
///
/// トップレベルは app_name → 記述子（またはそのリスト）のマップ。
pub fn parse_registry_yaml(content: &str) -> RegistryResult<ImageRegistry> {
    let YamlApps(raw) = serde_yaml::from_str(content)?;

    let apps = raw
        .into_iter()
        .map(|(app, images)| {
            let images = match images {
                YamlImages::Many(images) => images,
                YamlImages::One(image) => vec![image],
            };
            let pending = images
                .into_iter()
                .map(|image| PendingImage {
                    image_name: image.image_name,
                    display_name: image.display_name,
                    file: image.file,
                    owner: image.hosting.and_then(|h| h.owner),
                })
                .collect();
            (app, pending)
        })
        .collect();

    build_registry(HostingDefaults::default(), apps)
}

/// 既定値を補完して ImageRegistry を組み立てる
fn build_registry(
    defaults: HostingDefaults,
    apps: Vec<(String, Vec<PendingImage>)>,
) -> RegistryResult<ImageRegistry> {
    let host = defaults
        .host
        .unwrap_or_else(|| DEFAULT_REGISTRY_HOST.to_string());
    let mut registry = ImageRegistry::new(host);

    for (app, images) in apps {
        let descriptors = images
            .into_iter()
            .map(|image| resolve_image(&app, image, defaults.owner.as_deref()))
            .collect::<RegistryResult<Vec<_>>>()?;
        registry.insert_app(app, descriptors)?;
    }

    Ok(registry)
}

fn resolve_image(
    app: &str,
    image: PendingImage,
    default_owner: Option<&str>,
) -> RegistryResult<ImageDescriptor> {
    let missing = |field| RegistryError::MissingField {
        app: app.to_string(),
        image: image.image_name.clone(),
        field,
    };

    let dockerfile_path = image.file.clone().ok_or_else(|| missing("file"))?;
    let owner = image
        .owner
        .clone()
        .or_else(|| default_owner.map(str::to_string))
        .ok_or_else(|| missing("hosting.owner"))?;

    Ok(ImageDescriptor {
        app_name: app.to_string(),
        display_name: image
            .display_name
            .clone()
            .unwrap_or_else(|| image.image_name.clone()),
        image_name: image.image_name,
        dockerfile_path,
        owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REGISTRY: &str = r#"
hosting {
    host "ghcr.io"
    owner "chronista-club"
}

app "sed-tool" {
    image "matrix-sed" {
        display-name "Matrix sed bot"
        file "crates/matrix-sed/Dockerfile"
    }
}

app "multi" {
    image "multi-a" {
        file "docker/multi-a.Dockerfile"
    }
    image "multi-b" {
        display-name "Multi (variant b)"
        file "docker/multi-b.Dockerfile"
        hosting {
            owner "other-org"
        }
    }
}
"#;

    #[test]
    fn test_parse_registry_full() {
        let registry = parse_registry(SAMPLE_REGISTRY).unwrap();

        assert_eq!(registry.host(), "ghcr.io");
        assert_eq!(registry.app_count(), 2);
        assert_eq!(registry.image_count(), 3);

        let sed = &registry.descriptors("sed-tool").unwrap()[0];
        assert_eq!(sed.image_name, "matrix-sed");
        assert_eq!(sed.display_name, "Matrix sed bot");
        assert_eq!(
            sed.dockerfile_path,
            PathBuf::from("crates/matrix-sed/Dockerfile")
        );
        assert_eq!(sed.owner, "chronista-club");

        let multi = registry.descriptors("multi").unwrap();
        assert_eq!(multi.len(), 2);
        // display-name 省略時はイメージ名
        assert_eq!(multi[0].display_name, "multi-a");
        assert_eq!(multi[0].owner, "chronista-club");
        assert_eq!(multi[1].owner, "other-org");
    }

    #[test]
    fn test_parse_registry_default_host() {
        let kdl = r#"
app "a" {
    image "a" {
        file "Dockerfile"
        hosting { owner "me"; }
    }
}
"#;
        let registry = parse_registry(kdl).unwrap();
        assert_eq!(registry.host(), DEFAULT_REGISTRY_HOST);
    }

    #[test]
    fn test_parse_registry_empty_document() {
        let registry = parse_registry("").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parse_registry_duplicate_app() {
        let kdl = r#"
hosting { owner "me"; }
app "a" {
    image "a-one" { file "Dockerfile"; }
}
app "a" {
    image "a-two" { file "Dockerfile"; }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateApp(name) if name == "a"));
    }

    #[test]
    fn test_parse_registry_duplicate_hosting() {
        let kdl = r#"
hosting { owner "a"; }
hosting { owner "b"; }
app "a" {
    image "a" { file "Dockerfile"; }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(msg) if msg.contains("hosting")));
    }

    #[test]
    fn test_parse_registry_app_without_images() {
        let kdl = r#"
app "lonely"
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyApp(_)));
    }

    #[test]
    fn test_parse_registry_missing_file() {
        let kdl = r#"
hosting { owner "me"; }
app "a" {
    image "a" {
        display-name "A"
    }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::MissingField { field: "file", .. }));
    }

    #[test]
    fn test_parse_registry_missing_owner() {
        let kdl = r#"
app "a" {
    image "a" { file "Dockerfile"; }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::MissingField {
                field: "hosting.owner",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_registry_missing_app_name() {
        let kdl = r#"
app {
    image "a" { file "Dockerfile"; }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_registry_duplicate_image() {
        let kdl = r#"
hosting { owner "me"; }
app "a" {
    image "shared" { file "a.Dockerfile"; }
}
app "b" {
    image "shared" { file "b.Dockerfile"; }
}
"#;
        let err = parse_registry(kdl).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateImage { .. }));
    }

    #[test]
    fn test_parse_registry_invalid_kdl() {
        let err = parse_registry("app \"a\" {").unwrap_err();
        assert!(matches!(err, RegistryError::KdlParse(_)));
    }

    #[test]
    fn test_parse_registry_yaml() {
        let yaml = r#"
sed-tool:
  - image_name: matrix-sed
    display_name: Matrix sed bot
    file: Dockerfile
    hosting:
      owner: chronista-club
multi:
  - image_name: multi-a
    file: a.Dockerfile
    hosting: { owner: chronista-club }
  - image_name: multi-b
    file: b.Dockerfile
    hosting: { owner: chronista-club }
single:
  image_name: single
  file: single.Dockerfile
  hosting: { owner: chronista-club }
"#;
        let registry = parse_registry_yaml(yaml).unwrap();
        assert_eq!(registry.app_count(), 3);
        assert_eq!(registry.image_count(), 4);
        assert_eq!(registry.descriptors("multi").unwrap()[1].image_name, "multi-b");
        assert_eq!(registry.descriptors("single").unwrap()[0].display_name, "single");
    }

    #[test]
    fn test_parse_registry_yaml_duplicate_app() {
        let yaml = r#"
sed-tool:
  image_name: matrix-sed
  file: Dockerfile
  hosting: { owner: chronista-club }
sed-tool:
  image_name: matrix-sed-next
  file: next.Dockerfile
  hosting: { owner: chronista-club }
"#;
        let err = parse_registry_yaml(yaml).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateApp(name) if name == "sed-tool"));
    }

    #[test]
    fn test_parse_registry_yaml_unknown_field() {
        let yaml = r#"
a:
  - image_name: a
    flie: Dockerfile
    hosting: { owner: me }
"#;
        assert!(matches!(
            parse_registry_yaml(yaml).unwrap_err(),
            RegistryError::Yaml(_)
        ));
    }

    #[test]
    fn test_parse_registry_file_dispatch() {
        let dir = tempfile::tempdir().unwrap();

        let kdl_path = dir.path().join("images.kdl");
        std::fs::write(&kdl_path, SAMPLE_REGISTRY).unwrap();
        assert_eq!(parse_registry_file(&kdl_path).unwrap().image_count(), 3);

        let yaml_path = dir.path().join("images.yml");
        std::fs::write(
            &yaml_path,
            "a:\n  image_name: a\n  file: Dockerfile\n  hosting:\n    owner: me\n",
        )
        .unwrap();
        assert_eq!(parse_registry_file(&yaml_path).unwrap().image_count(), 1);

        let err = parse_registry_file(&dir.path().join("missing.kdl")).unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
    }
}
