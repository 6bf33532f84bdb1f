//! Configuration scaffolding for `work-assistant init`.
//!
//! Writes `~/.work-assistant/config.toml` from the bundled template without
//! overwriting an existing file.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct TemplateFile {
    relative_path: &'static str,
    contents: &'static str,
}

const TEMPLATE_FILES: &[TemplateFile] = &[TemplateFile {
    relative_path: "config.toml",
    contents: include_str!("../../config-templates/config.toml"),
}];

pub async fn initialize_default() -> Result<InitReport> {
    initialize_at_root(&crate::config::default_home_dir()).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        ..InitReport::default()
    };

    for template in TEMPLATE_FILES {
        let target = root.join(template.relative_path);
        match tokio::fs::metadata(&target).await {
            Ok(_) => report.skipped.push(target),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&target, template.contents)
                    .await
                    .map_err(|e| {
                        anyhow::anyhow!("write config template {}: {e}", target.display())
                    })?;
                tracing::info!(path = %target.display(), "config template written");
                report.created.push(target);
            }
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "inspect config path {}: {err}",
                    target.display()
                ));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let root = tempfile::tempdir().expect("tempdir");
        let first = initialize_at_root(root.path()).await.expect("first init");
        assert_eq!(first.created.len(), TEMPLATE_FILES.len());
        assert!(first.skipped.is_empty());

        let config = root.path().join("config.toml");
        std::fs::write(&config, "# edited\n").expect("edit");

        let second = initialize_at_root(root.path()).await.expect("second init");
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), TEMPLATE_FILES.len());
        assert_eq!(
            std::fs::read_to_string(&config).expect("read"),
            "# edited\n"
        );
    }

    #[test]
    fn bundled_template_is_a_valid_config() {
        for template in TEMPLATE_FILES {
            let cfg = AppConfig::from_toml_str(template.contents).expect("template parses");
            cfg.validate().expect("template validates");
            assert_eq!(cfg.models.len(), 4);
        }
    }
}
