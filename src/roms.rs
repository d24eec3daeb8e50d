//! ROM slot registry
//!
//! A slot is resolved from the installation-type token the selector writes.
//! The builtin list matches the layout the multiboot app creates; a patched
//! zip may ship its own list as YAML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{InstallerError, Result, resource};

/// One installed ROM slot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rom {
    pub id: String,
    #[serde(rename = "system")]
    pub system_path: PathBuf,
    #[serde(rename = "cache")]
    pub cache_path: PathBuf,
    #[serde(rename = "data")]
    pub data_path: PathBuf,
    /// System storage is an ext4 image rather than a directory
    #[serde(default)]
    pub system_is_image: bool,
}

impl Rom {
    fn image_slot(id: &str, system: &str, cache: &str, data: &str) -> Self {
        Self {
            id: id.to_string(),
            system_path: PathBuf::from(system),
            cache_path: PathBuf::from(cache),
            data_path: PathBuf::from(data),
            system_is_image: true,
        }
    }
}

/// Looks up ROM slots by id
pub trait RomRegistry {
    fn find(&self, id: &str) -> Option<&Rom>;
}

/// On-disk registry format
#[derive(Debug, Deserialize)]
struct RegistryFile {
    roms: Vec<Rom>,
}

/// An ordered list of known slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomList {
    roms: Vec<Rom>,
}

impl RomList {
    pub fn new(roms: Vec<Rom>) -> Self {
        Self { roms }
    }

    /// Slots every multiboot installation knows about
    pub fn builtin() -> Self {
        let mut roms = vec![
            Rom {
                id: "primary".to_string(),
                system_path: PathBuf::from("/system"),
                cache_path: PathBuf::from("/cache"),
                data_path: PathBuf::from("/data"),
                system_is_image: false,
            },
            Rom::image_slot(
                "dual",
                "/system/multiboot/dual/system.img",
                "/cache/multiboot/dual/cache",
                "/data/multiboot/dual/data",
            ),
        ];
        for slot in 1..=3 {
            let id = format!("multi-slot-{slot}");
            roms.push(Rom::image_slot(
                &id,
                &format!("/cache/multiboot/{id}/system.img"),
                &format!("/system/multiboot/{id}/cache"),
                &format!("/data/multiboot/{id}/data"),
            ));
        }
        Self::new(roms)
    }

    /// Parse a YAML registry (`roms:` list of slots)
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let file: RegistryFile = serde_yaml::from_str(content)?;
        Ok(Self::new(file.roms))
    }

    /// Load a YAML registry from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| resource::read_failed(path, e))?;
        Self::from_yaml(&content).map_err(|e| InstallerError::RegistryParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.roms.iter().map(|r| r.id.as_str())
    }
}

impl Default for RomList {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RomRegistry for RomList {
    fn find(&self, id: &str) -> Option<&Rom> {
        self.roms.iter().find(|r| r.id == id)
    }
}
