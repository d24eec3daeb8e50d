//! Installation orchestration
//!
//! The installer walks one run through a fixed sequence of stages:
//!
//! ```text
//! Init -> SandboxBuilt -> DeviceVerified -> SlotSelected -> StorageBound -> InstallerRun -> SandboxTorn
//! ```
//!
//! Each failing stage reports what went wrong to the user and the sandbox is
//! always torn down before the failure is returned. A user who backs out of
//! the selector ends the run successfully without installing anything.

use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::bridge::{Bridge, Coordination};
use crate::common::fs::{CopyOptions, copy_file, first_line, set_mode};
use crate::config::{Config, EXECUTABLE_MODE};
use crate::device::{self, RunningDevice};
use crate::error::{InstallerError, Result, resource};
use crate::extract::{ExtractionRequest, Extractor};
use crate::host::Host;
use crate::image::ImageManager;
use crate::paths::{
    self, CANCELLED_TOKEN, SANDBOX_HELPER_TOOL, SANDBOX_INSTALL_TYPE, SANDBOX_INSTALL_ZIP,
    SANDBOX_SELECTOR_ZIP, SANDBOX_SYSTEM_IMG, SANDBOX_UPDATER, staging,
};
use crate::process::{CommandRunner, Invocation};
use crate::properties::PropertySource;
use crate::roms::{Rom, RomList, RomRegistry};
use crate::sandbox::{Sandbox, wrapper};
use crate::sniff::{self, Classification};
use crate::supervisor::Supervisor;
use crate::transaction::Transaction;
use crate::ui::ProgressReporter;

/// Mode of bound cache and data directories
const STORAGE_DIR_MODE: u32 = 0o771;

/// Arguments recovery passed to this run
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Recovery interface version, forwarded untouched
    pub interface: String,
    /// Progress descriptor number, forwarded untouched
    pub output_fd: String,
    /// The flashable zip
    pub archive: PathBuf,
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SandboxBuilt,
    DeviceVerified,
    SlotSelected,
    StorageBound,
    InstallerRun,
    SandboxTorn,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::SandboxBuilt => "sandbox built",
            Self::DeviceVerified => "device verified",
            Self::SlotSelected => "slot selected",
            Self::StorageBound => "storage bound",
            Self::InstallerRun => "installer run",
            Self::SandboxTorn => "sandbox torn down",
        };
        f.write_str(name)
    }
}

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed { rom_id: String },
    /// The user backed out of the selector
    Cancelled,
}

/// External collaborators of the installer
pub struct Services<'a> {
    pub host: &'a dyn Host,
    pub runner: &'a dyn CommandRunner,
    pub supervisor: &'a dyn Supervisor,
    pub extractor: &'a dyn Extractor,
    pub properties: &'a dyn PropertySource,
    pub reporter: &'a dyn ProgressReporter,
}

/// Runs one installation
pub struct Installer<'a> {
    config: &'a Config,
    services: Services<'a>,
    roms: RomList,
    helper_tool: Option<PathBuf>,
    stage: Cell<Stage>,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a Config, services: Services<'a>) -> Self {
        Self {
            config,
            services,
            roms: RomList::builtin(),
            helper_tool: None,
            stage: Cell::new(Stage::Init),
        }
    }

    /// Slots used when the archive ships no registry of its own
    #[cfg(test)]
    pub fn with_roms(mut self, roms: RomList) -> Self {
        self.roms = roms;
        self
    }

    /// Executable copied into the sandbox for the installer to call back into
    pub fn with_helper_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_tool = Some(path.into());
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage.get()
    }

    fn advance(&self, stage: Stage) {
        log::debug!("Stage: {} -> {stage}", self.stage.get());
        self.stage.set(stage);
    }

    fn print(&self, message: &str) {
        self.services.reporter.print(message);
    }

    /// Print `message` when `result` is an error
    fn report<T>(&self, result: Result<T>, message: impl FnOnce() -> String) -> Result<T> {
        if let Err(e) = &result {
            log::error!("{} error: {e}", e.kind());
            self.print(&message());
        }
        result
    }

    /// Run the whole installation
    pub fn run(&self, ctx: &InstallContext) -> Result<Outcome> {
        self.stage.set(Stage::Init);
        self.print("Creating chroot environment");

        let sandbox = Sandbox::new(self.services.host, self.services.runner, &self.config.layout);
        if let Err(e) = sandbox.build() {
            self.print("Failed to create chroot environment");
            self.print("Failed to flash zip file.");
            return Err(e);
        }
        self.advance(Stage::SandboxBuilt);

        let mut transaction = Transaction::begin(&sandbox);
        let result = self.install(ctx, &mut transaction);
        if let Err(e) = &result {
            log::error!("Installation failed after stage '{}': {e}", self.stage());
        }

        self.print("Destroying chroot environment");
        let teardown = transaction.close();
        self.advance(Stage::SandboxTorn);
        teardown.log();

        if !teardown.is_clean() {
            self.print(
                "Failed to destroy chroot environment. You should reboot into \
                 recovery again to avoid flashing issues.",
            );
        }

        match result {
            Ok(outcome) => teardown.into_result().map(|()| outcome),
            Err(e) => {
                self.print("Failed to flash zip file.");
                Err(e)
            }
        }
    }

    fn install(&self, ctx: &InstallContext, transaction: &mut Transaction<'_>) -> Result<Outcome> {
        let sandbox = transaction.sandbox();

        self.verify_device(ctx)?;
        self.advance(Stage::DeviceVerified);

        let Some(rom) = self.select_slot(ctx, sandbox)? else {
            self.print("Cancelled installation");
            return Ok(Outcome::Cancelled);
        };
        self.advance(Stage::SlotSelected);

        self.print(&format!("ROM ID: {}", rom.id));
        self.print(&format!("- /system: {}", rom.system_path.display()));
        self.print(&format!("- /cache: {}", rom.cache_path.display()));
        self.print(&format!("- /data: {}", rom.data_path.display()));

        self.bind_storage(ctx, &rom, transaction)?;
        self.advance(Stage::StorageBound);

        self.print("Running real update-binary");
        self.print("Here we go!");

        let installed = self.report(self.run_real_updater(ctx, sandbox), || {
            "Failed to run real update-binary".to_string()
        });
        self.advance(Stage::InstallerRun);

        if rom.system_is_image {
            // The installer may have mounted the image at /system
            if let Err(e) = sandbox.unmount("/system") {
                log::warn!("{e}");
            }
            let shrunk = self.report(
                self.images()
                    .shrink(&rom.system_path, self.config.shrink_passes),
                || "Failed to shrink system image".to_string(),
            );
            if installed.is_ok() {
                shrunk?;
            }
        }

        installed?;
        Ok(Outcome::Installed { rom_id: rom.id })
    }

    fn images(&self) -> ImageManager<'_> {
        let layout = &self.config.layout;
        ImageManager::new(
            self.services.runner,
            layout.staged(staging::E2FSCK),
            layout.staged(staging::RESIZE2FS),
            self.config.make_ext4fs.clone(),
        )
    }

    fn verify_device(&self, ctx: &InstallContext) -> Result<()> {
        let staged = self.config.layout.staged(staging::DEVICE);
        let declared = self.report(
            device::get_target_device(self.services.extractor, &ctx.archive, &staged),
            || "Failed to determine target device".to_string(),
        )?;

        let running = RunningDevice::from_properties(self.services.properties);
        let verified = device::verify(&declared, &running);
        self.report(verified, || {
            format!(
                "The patched zip is for '{declared}'. This device is '{}'.",
                running.product_device
            )
        })
    }

    /// Run the selector and resolve its token; `None` means cancelled
    fn select_slot(&self, ctx: &InstallContext, sandbox: &Sandbox<'_>) -> Result<Option<Rom>> {
        self.report(self.run_selector(ctx, sandbox), || {
            "Failed to run AROMA".to_string()
        })?;

        let token_path = sandbox.path(SANDBOX_INSTALL_TYPE);
        let token = self.report(
            first_line(&token_path).map_err(|e| resource::read_failed(&token_path, e)),
            || "Failed to determine install type".to_string(),
        )?;
        let token = token.trim();
        log::debug!("Selector returned '{token}'");

        if token == CANCELLED_TOKEN {
            return Ok(None);
        }

        let roms = self.report(self.registry(ctx), || {
            "Failed to load ROM registry".to_string()
        })?;
        match roms.find(token) {
            Some(rom) => Ok(Some(rom.clone())),
            None => {
                log::debug!("Known ROM IDs: {}", roms.ids().collect::<Vec<_>>().join(", "));
                let unknown = Err(InstallerError::UnknownRom {
                    id: token.to_string(),
                });
                self.report(unknown, || format!("Unknown ROM ID: {token}"))
            }
        }
    }

    fn run_selector(&self, ctx: &InstallContext, sandbox: &Sandbox<'_>) -> Result<()> {
        let selector_zip = sandbox.path(SANDBOX_SELECTOR_ZIP);
        let updater = sandbox.path(SANDBOX_UPDATER);

        self.services.extractor.extract(
            &ctx.archive,
            &ExtractionRequest::new().entry(paths::ZIP_SELECTOR, &selector_zip),
        )?;
        self.services.extractor.extract(
            &selector_zip,
            &ExtractionRequest::new().entry(paths::ZIP_UPDATER, &updater),
        )?;
        set_mode(&updater, EXECUTABLE_MODE).map_err(resource::with("chmod", &updater))?;

        let invocation = Invocation::new(SANDBOX_UPDATER)
            .args([ctx.interface.as_str(), ctx.output_fd.as_str(), SANDBOX_SELECTOR_ZIP])
            .chroot(sandbox.root());
        self.bridge().run(&invocation, Coordination::Suspend)
    }

    fn registry(&self, ctx: &InstallContext) -> Result<RomList> {
        if !self
            .services
            .extractor
            .contains(&ctx.archive, paths::ZIP_ROM_REGISTRY)?
        {
            return Ok(self.roms.clone());
        }

        let staged = self.config.layout.staged(staging::ROM_REGISTRY);
        self.services.extractor.extract(
            &ctx.archive,
            &ExtractionRequest::new().entry(paths::ZIP_ROM_REGISTRY, &staged),
        )?;
        log::info!("Using ROM registry from {}", paths::ZIP_ROM_REGISTRY);
        RomList::load(&staged)
    }

    fn bind_storage(
        &self,
        ctx: &InstallContext,
        rom: &Rom,
        transaction: &mut Transaction<'_>,
    ) -> Result<()> {
        let sandbox = transaction.sandbox();
        self.report(self.stage_e2fsprogs(ctx), || {
            "Failed to extract e2fsprogs".to_string()
        })?;
        self.report(self.stage_unzip(ctx, sandbox), || {
            "Failed to extract unzip tool".to_string()
        })?;

        for (source, target) in [(&rom.cache_path, "/cache"), (&rom.data_path, "/data")] {
            let bound = transaction.bind_dir(source, target, STORAGE_DIR_MODE);
            self.report(bound, || bind_message(source, &sandbox.path(target)))?;
        }

        if !rom.system_is_image {
            let unsupported = Err(InstallerError::UnsupportedSystemStorage {
                id: rom.id.clone(),
                path: rom.system_path.display().to_string(),
            });
            return self.report(unsupported, || {
                "Installing ROMs to a directory is no longer supported".to_string()
            });
        }

        let created = self
            .images()
            .create_or_enlarge(&rom.system_path, self.config.image_size);
        self.report(created, || {
            format!(
                "Failed to create or enlarge image {}",
                rom.system_path.display()
            )
        })?;

        let bound = transaction.bind_file(&rom.system_path, SANDBOX_SYSTEM_IMG);
        self.report(bound, || {
            bind_message(&rom.system_path, &sandbox.path(SANDBOX_SYSTEM_IMG))
        })?;

        let bound = transaction.bind_file(&ctx.archive, SANDBOX_INSTALL_ZIP);
        self.report(bound, || {
            bind_message(&ctx.archive, &sandbox.path(SANDBOX_INSTALL_ZIP))
        })?;

        let sbin = sandbox.path("/sbin");
        self.report(wrapper::install_busybox_shim(&sbin), || {
            "Failed to install busybox wrapper".to_string()
        })?;

        self.stage_helper_tool(sandbox);
        Ok(())
    }

    fn stage_e2fsprogs(&self, ctx: &InstallContext) -> Result<()> {
        let layout = &self.config.layout;
        let tools = [
            (paths::ZIP_E2FSCK, layout.staged(staging::E2FSCK)),
            (paths::ZIP_RESIZE2FS, layout.staged(staging::RESIZE2FS)),
        ];
        let request = tools
            .iter()
            .fold(ExtractionRequest::new(), |request, (entry, dest)| {
                request.entry(entry, dest)
            });
        self.services.extractor.extract(&ctx.archive, &request)?;

        for (_, dest) in &tools {
            set_mode(dest, EXECUTABLE_MODE).map_err(resource::with("chmod", dest))?;
        }
        Ok(())
    }

    fn stage_unzip(&self, ctx: &InstallContext, sandbox: &Sandbox<'_>) -> Result<()> {
        let staged = self.config.layout.staged(staging::UNZIP);
        self.services.extractor.extract(
            &ctx.archive,
            &ExtractionRequest::new().entry(paths::ZIP_UNZIP, &staged),
        )?;
        wrapper::install_unzip(&staged, &sandbox.path("/sbin"))
    }

    /// Copy ourselves into the sandbox; failure only limits what the
    /// installer can call back into
    fn stage_helper_tool(&self, sandbox: &Sandbox<'_>) {
        let Some(source) = &self.helper_tool else {
            return;
        };
        let target = sandbox.path(SANDBOX_HELPER_TOOL);
        let copied = copy_file(source, &target, CopyOptions::default())
            .and_then(|()| set_mode(&target, EXECUTABLE_MODE));
        if let Err(e) = copied {
            log::warn!(
                "Failed to copy {} to {}: {e}",
                source.display(),
                target.display()
            );
        }
    }

    fn run_real_updater(&self, ctx: &InstallContext, sandbox: &Sandbox<'_>) -> Result<()> {
        let updater = sandbox.path(SANDBOX_UPDATER);
        self.services.extractor.extract(
            &ctx.archive,
            &ExtractionRequest::new().entry(paths::ZIP_UPDATER_ORIG, &updater),
        )?;
        set_mode(&updater, EXECUTABLE_MODE).map_err(resource::with("chmod", &updater))?;

        let coordination = match sniff::classify(&updater) {
            Ok(Classification::Interactive { marker }) => {
                log::info!("Detected AROMA installer ({marker})");
                Coordination::Suspend
            }
            Ok(Classification::Plain) => Coordination::None,
            Err(e) => {
                log::warn!("{e}; running without suspending recovery");
                Coordination::None
            }
        };

        let invocation = Invocation::new(SANDBOX_UPDATER)
            .args([ctx.interface.as_str(), ctx.output_fd.as_str(), SANDBOX_INSTALL_ZIP])
            .chroot(sandbox.root());
        self.bridge().run(&invocation, coordination)
    }

    fn bridge(&self) -> Bridge<'a> {
        Bridge::new(self.services.runner, self.services.supervisor)
    }
}

fn bind_message(source: &Path, target: &Path) -> String {
    format!(
        "Failed to bind mount {} to {}",
        source.display(),
        target.display()
    )
}

#[cfg(test)]
mod tests;
