//! Device verification
//!
//! A patched zip declares the device it was patched for in a one-line text
//! entry. The install only proceeds when that id occurs in one of the running
//! device's identity properties.

use std::path::Path;

use crate::common::fs::first_line;
use crate::error::{InstallerError, Result, resource};
use crate::extract::{ExtractionRequest, Extractor};
use crate::paths::ZIP_DEVICE;
use crate::properties::PropertySource;

/// Device codename property
pub const PRODUCT_DEVICE: &str = "ro.product.device";

/// Build product name property
pub const BUILD_PRODUCT: &str = "ro.build.product";

/// Identity strings of the device we are running on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningDevice {
    pub product_device: String,
    pub build_product: String,
}

impl RunningDevice {
    pub fn from_properties(props: &dyn PropertySource) -> Self {
        Self {
            product_device: props.get(PRODUCT_DEVICE).unwrap_or_default(),
            build_product: props.get(BUILD_PRODUCT).unwrap_or_default(),
        }
    }

    /// Whether `declared` occurs (case-sensitively) in either identity string
    pub fn matches(&self, declared: &str) -> bool {
        self.product_device.contains(declared) || self.build_product.contains(declared)
    }
}

/// Reads the device id the archive was patched for.
///
/// The entry is extracted to `staged` first.
pub fn get_target_device(extractor: &dyn Extractor, archive: &Path, staged: &Path) -> Result<String> {
    extractor.extract(archive, &ExtractionRequest::new().entry(ZIP_DEVICE, staged))?;

    let device = first_line(staged).map_err(|e| resource::read_failed(staged, e))?;
    let device = device.trim();
    if device.is_empty() {
        return Err(resource::read_failed(staged, "device id is empty"));
    }
    Ok(device.to_string())
}

/// Fails with a verification error unless `declared` matches `running`
pub fn verify(declared: &str, running: &RunningDevice) -> Result<()> {
    if running.matches(declared) {
        log::debug!("Device {declared} matches {running:?}");
        Ok(())
    } else {
        Err(InstallerError::DeviceMismatch {
            declared: declared.to_string(),
            device: running.product_device.clone(),
        })
    }
}
