//! # Streamform Store
//!
//! Topology store over a directory of YAML files.
//!
//! Each unit is one `<name>.yaml` (or `<name>.yml`) file holding a single
//! domain document. Schema content is either inline (`content:`) or read
//! from a file relative to the directory (`file:`). Written units always
//! carry inline content.
//!
//! ```yaml
//! name: orders
//! maintainer: orders-team@example.com
//! principal: User:svc-orders
//! visibilities:
//!   - type: PUBLIC
//!     consumers:
//!       - principal: User:svc-billing
//!     topics:
//!       - name: created
//!         partitions: 6
//!         config:
//!           retention.ms: 7d
//!         valueSchema:
//!           file: schemas/order-created.avsc
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use streamform_core::ports::TopologyStore;
use streamform_core::{Domain, StoreError, TopologyUnit};
use tracing::{debug, info};

/// Recognized unit file extensions, in lookup order
pub const UNIT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.display().to_string();
    move |source| StoreError::Io { path, source }
}

fn is_unit_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| UNIT_EXTENSIONS.contains(&e))
}

/// Path of an existing unit file
async fn find_unit(directory: &Path, name: &str) -> Result<Option<PathBuf>, StoreError> {
    for extension in UNIT_EXTENSIONS {
        let path = directory.join(format!("{}.{}", name, extension));
        if tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Parse a unit document
pub fn parse_unit(name: &str, text: &str) -> Result<TopologyUnit, StoreError> {
    let domain: Domain = serde_yaml::from_str(text).map_err(|e| StoreError::Parse {
        source_name: name.to_string(),
        message: e.to_string(),
    })?;
    Ok(TopologyUnit::new(name, domain))
}

/// Serialize a unit document with inline schema content
pub fn render_unit(unit: &TopologyUnit) -> Result<String, StoreError> {
    let mut domain = unit.domain.clone();
    for topic in domain.visibilities.iter_mut().flat_map(|v| v.topics.iter_mut()) {
        for schema in [topic.key_schema.as_mut(), topic.value_schema.as_mut()]
            .into_iter()
            .flatten()
        {
            if !schema.content.is_empty() {
                schema.file = None;
            }
        }
    }
    serde_yaml::to_string(&domain).map_err(|e| StoreError::Serialize {
        source_name: unit.source.clone(),
        message: e.to_string(),
    })
}

/// Replace `file:` references with the referenced content
async fn resolve_schema_files(directory: &Path, unit: &mut TopologyUnit) -> Result<(), StoreError> {
    let source = unit.source.clone();
    for visibility in &mut unit.domain.visibilities {
        for topic in &mut visibility.topics {
            let topic_name = topic.name.clone();
            for schema in [topic.key_schema.as_mut(), topic.value_schema.as_mut()]
                .into_iter()
                .flatten()
            {
                let Some(file) = schema.file.clone() else {
                    continue;
                };
                if !schema.content.is_empty() {
                    return Err(StoreError::Parse {
                        source_name: source.clone(),
                        message: format!(
                            "a schema of topic '{}' declares both content and file",
                            topic_name
                        ),
                    });
                }
                let path = directory.join(&file);
                schema.content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(io_error(&path))?;
                debug!(topic = %topic_name, file = %file, "Resolved schema file");
            }
        }
    }
    Ok(())
}

/// Topology store over a directory of YAML files
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTopologyStore;

impl FsTopologyStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TopologyStore for FsTopologyStore {
    async fn list_units(&self, directory: &Path) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(directory = %directory.display(), "Topology directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error(directory)(e)),
        };

        let mut units: BTreeMap<String, PathBuf> = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(directory))? {
            let path = entry.path();
            if !is_unit_file(&path) {
                continue;
            }
            if !entry.file_type().await.map_err(io_error(&path))?.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let stem = stem.to_string();
            if let Some(previous) = units.insert(stem.clone(), path.clone()) {
                return Err(StoreError::Parse {
                    source_name: stem,
                    message: format!(
                        "unit is defined by both {} and {}",
                        previous.display(),
                        path.display()
                    ),
                });
            }
        }
        Ok(units.into_keys().collect())
    }

    async fn read_unit(&self, directory: &Path, name: &str) -> Result<TopologyUnit, StoreError> {
        let path = find_unit(directory, name)
            .await?
            .ok_or_else(|| StoreError::NotFound(directory.join(name).display().to_string()))?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(io_error(&path))?;
        let mut unit = parse_unit(name, &text).map_err(|e| match e {
            StoreError::Parse { message, .. } => StoreError::Parse {
                source_name: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        resolve_schema_files(directory, &mut unit).await?;
        Ok(unit)
    }

    async fn write_unit(&self, directory: &Path, unit: &TopologyUnit) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(io_error(directory))?;
        let path = match find_unit(directory, &unit.source).await? {
            Some(existing) => existing,
            None => directory.join(format!("{}.yaml", unit.source)),
        };

        let text = render_unit(unit)?;
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, text)
            .await
            .map_err(io_error(&staging))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(io_error(&path))?;
        info!(path = %path.display(), "Wrote topology unit");
        Ok(())
    }
}
