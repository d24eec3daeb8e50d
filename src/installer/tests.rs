//! End-to-end tests for the installer against in-memory collaborators

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::*;
use crate::host::Host;
use crate::paths::{
    ZIP_DEVICE, ZIP_E2FSCK, ZIP_RESIZE2FS, ZIP_ROM_REGISTRY, ZIP_SELECTOR, ZIP_UNZIP, ZIP_UPDATER,
    ZIP_UPDATER_ORIG,
};
use crate::test_fixtures::{
    FakeExtractor, FakeHost, FakeRunner, FakeSupervisor, MemoryReporter, SupervisorEvent,
    create_temp_dir, mounted_host, sandbox_layout,
};

const PARENT_PID: i32 = 77;

struct Harness {
    temp: TempDir,
    config: Config,
    host: FakeHost,
    runner: FakeRunner,
    supervisor: FakeSupervisor,
    extractor: FakeExtractor,
    properties: HashMap<String, String>,
    reporter: MemoryReporter,
    ctx: InstallContext,
}

impl Harness {
    fn new(token: &str) -> Self {
        let temp = create_temp_dir();
        let config = Config::new(sandbox_layout(temp.path()));
        let host = mounted_host(&config.layout);

        let extractor = FakeExtractor::new();
        extractor.add(ZIP_DEVICE, "shamu\n");
        extractor.add(ZIP_SELECTOR, "PK selector");
        extractor.add(ZIP_UPDATER, "selector binary");
        extractor.add(ZIP_UPDATER_ORIG, "\x7fELF edify updater");
        extractor.add(ZIP_E2FSCK, "e2fsck");
        extractor.add(ZIP_RESIZE2FS, "resize2fs");
        extractor.add(ZIP_UNZIP, "unzip");

        let mut properties = HashMap::new();
        properties.insert(device::PRODUCT_DEVICE.to_string(), "shamu".to_string());
        properties.insert(device::BUILD_PRODUCT.to_string(), "shamu".to_string());

        let ctx = InstallContext {
            interface: "3".to_string(),
            output_fd: "5".to_string(),
            archive: temp.path().join("rom.zip"),
        };

        let harness = Self {
            temp,
            config,
            host,
            runner: FakeRunner::new(),
            supervisor: FakeSupervisor::new(PARENT_PID),
            extractor,
            properties,
            reporter: MemoryReporter::new(),
            ctx,
        };
        harness.on_updater(token, |_| 0);
        harness
    }

    /// The selector writes `token`; the real installer runs `updater`
    /// against the sandbox root and exits with its result
    fn on_updater(&self, token: &str, updater: impl Fn(&Path) -> i32 + 'static) {
        let root = self.config.layout.sandbox_root.clone();
        let token = token.to_string();
        self.runner.on_run(SANDBOX_UPDATER, move |invocation| {
            let target = invocation.arguments().last().map(String::as_str);
            if target == Some(SANDBOX_SELECTOR_ZIP) {
                fs::write(root.join("tmp/installtype"), format!("{token}\n")).unwrap();
                0
            } else {
                updater(&root)
            }
        });
    }

    fn rom_dir(&self) -> PathBuf {
        self.temp.path().join("rom")
    }

    fn roms(&self) -> RomList {
        let dir = self.rom_dir();
        RomList::new(vec![
            Rom {
                id: "extra".to_string(),
                system_path: dir.join("extra/system.img"),
                cache_path: dir.join("extra/cache"),
                data_path: dir.join("extra/data"),
                system_is_image: true,
            },
            Rom {
                id: "legacy".to_string(),
                system_path: dir.join("legacy/system"),
                cache_path: dir.join("legacy/cache"),
                data_path: dir.join("legacy/data"),
                system_is_image: false,
            },
        ])
    }

    fn installer(&self) -> Installer<'_> {
        Installer::new(
            &self.config,
            Services {
                host: &self.host,
                runner: &self.runner,
                supervisor: &self.supervisor,
                extractor: &self.extractor,
                properties: &self.properties,
                reporter: &self.reporter,
            },
        )
        .with_roms(self.roms())
    }

    fn run(&self) -> Result<Outcome> {
        self.installer().run(&self.ctx)
    }

    fn staged(&self, name: &str) -> String {
        self.config.layout.staged(name).display().to_string()
    }

    fn assert_torn_down(&self) {
        assert_eq!(
            self.host.mount_points().unwrap(),
            self.config.layout.host_storage
        );
        assert!(!self.config.layout.sandbox_root.exists());
    }
}

#[test]
fn test_cancelled_selection_installs_nothing() {
    let h = Harness::new("cancelled");

    let outcome = h.run().unwrap();

    assert_eq!(outcome, Outcome::Cancelled);
    assert!(h.host.binds().is_empty());
    assert_eq!(
        h.runner.command_lines(),
        vec![
            "mount /system",
            "mount /cache",
            "mount /data",
            "/tmp/updater 3 5 /tmp/aromawrapper.zip",
        ]
    );
    assert_eq!(
        h.supervisor.events(),
        vec![
            SupervisorEvent::Suspend(PARENT_PID),
            SupervisorEvent::Resume(PARENT_PID)
        ]
    );
    assert!(h.reporter.contains("Cancelled installation"));
    assert!(!h.reporter.contains("Failed"));
    h.assert_torn_down();
}

#[test]
fn test_selector_runs_inside_sandbox() {
    let h = Harness::new("cancelled");

    h.run().unwrap();

    let selector = &h.runner.invocations()[3];
    assert_eq!(selector.root(), Some(h.config.layout.sandbox_root.as_path()));
    let extracted: Vec<_> = h.extractor.extracted().into_iter().map(|(_, e, _)| e).collect();
    assert_eq!(extracted, vec![ZIP_DEVICE, ZIP_SELECTOR, ZIP_UPDATER]);
}

#[test]
fn test_unknown_rom_fails_without_storage_mutation() {
    let h = Harness::new("bogus");

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::UnknownRom { ref id } if id == "bogus"));
    assert!(h.host.binds().is_empty());
    assert!(!h.rom_dir().exists());
    assert!(h.reporter.contains("Unknown ROM ID: bogus"));
    assert_eq!(
        h.reporter.messages().last().map(String::as_str),
        Some("Failed to flash zip file.")
    );
    h.assert_torn_down();
}

#[test]
fn test_device_mismatch_stops_before_selection() {
    let mut h = Harness::new("extra");
    h.properties
        .insert(device::PRODUCT_DEVICE.to_string(), "ryu".to_string());
    h.properties
        .insert(device::BUILD_PRODUCT.to_string(), "ryu".to_string());

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::DeviceMismatch { .. }));
    assert!(
        h.reporter
            .contains("The patched zip is for 'shamu'. This device is 'ryu'.")
    );
    assert_eq!(h.runner.invocations().len(), 3);
    assert!(h.supervisor.events().is_empty());
    h.assert_torn_down();
}

#[test]
fn test_missing_device_file_is_reported() {
    let h = Harness::new("extra");
    let extractor = FakeExtractor::new();
    let installer = Installer::new(
        &h.config,
        Services {
            host: &h.host,
            runner: &h.runner,
            supervisor: &h.supervisor,
            extractor: &extractor,
            properties: &h.properties,
            reporter: &h.reporter,
        },
    );

    let err = installer.run(&h.ctx).unwrap_err();

    assert_eq!(err.kind(), "extraction");
    assert!(h.reporter.contains("Failed to determine target device"));
    h.assert_torn_down();
}

#[test]
fn test_image_slot_installs_and_shrinks() {
    let h = Harness::new("extra");
    let image = h.rom_dir().join("extra/system.img");

    let outcome = h.run().unwrap();

    assert_eq!(
        outcome,
        Outcome::Installed {
            rom_id: "extra".to_string()
        }
    );
    let mut expected = vec![
        "mount /system".to_string(),
        "mount /cache".to_string(),
        "mount /data".to_string(),
        "/tmp/updater 3 5 /tmp/aromawrapper.zip".to_string(),
        format!("make_ext4fs -l 3G {}", image.display()),
        "/tmp/updater 3 5 /tmp/install.zip".to_string(),
        format!("{} -f -y {}", h.staged("e2fsck"), image.display()),
    ];
    expected.extend(
        std::iter::repeat_n(
            format!("{} -M {}", h.staged("resize2fs"), image.display()),
            5,
        ),
    );
    assert_eq!(h.runner.command_lines(), expected);

    let root = &h.config.layout.sandbox_root;
    assert_eq!(
        h.host.binds(),
        vec![
            (h.rom_dir().join("extra/cache"), root.join("cache")),
            (h.rom_dir().join("extra/data"), root.join("data")),
            (image.clone(), root.join("tmp/system.img")),
            (h.ctx.archive.clone(), root.join("tmp/install.zip")),
        ]
    );
    assert!(h.rom_dir().join("extra/cache").is_dir());
    assert!(h.rom_dir().join("extra/data").is_dir());
    // Plain installer: only the selector froze recovery
    assert_eq!(h.supervisor.events().len(), 2);
    assert!(h.reporter.contains("ROM ID: extra"));
    assert!(h.reporter.contains("Here we go!"));
    assert!(!h.reporter.contains("Failed"));
    h.assert_torn_down();
}

#[test]
fn test_sandbox_is_staged_before_real_installer() {
    let h = Harness::new("extra");
    let tool = h.temp.path().join("update-binary");
    fs::write(&tool, "self").unwrap();
    h.on_updater("extra", |root| {
        let staged = root.join("sbin/busybox_orig").is_file()
            && root.join("sbin/unzip").is_file()
            && root.join("update-binary-tool").is_file()
            && root.join("tmp/updater").is_file();
        if staged { 0 } else { 42 }
    });

    h.installer()
        .with_helper_tool(&tool)
        .run(&h.ctx)
        .unwrap();
}

#[test]
fn test_aroma_installer_suspends_recovery() {
    let h = Harness::new("extra");
    h.extractor
        .add(ZIP_UPDATER_ORIG, "\x7fELF ... AROMA Installer ... \x00");

    h.run().unwrap();

    assert_eq!(
        h.supervisor.events(),
        vec![
            SupervisorEvent::Suspend(PARENT_PID),
            SupervisorEvent::Resume(PARENT_PID),
            SupervisorEvent::Suspend(PARENT_PID),
            SupervisorEvent::Resume(PARENT_PID),
        ]
    );
}

#[test]
fn test_directory_slot_is_unsupported() {
    let h = Harness::new("legacy");

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::UnsupportedSystemStorage { .. }));
    assert!(
        h.reporter
            .contains("Installing ROMs to a directory is no longer supported")
    );
    assert!(
        !h.runner
            .command_lines()
            .iter()
            .any(|l| l.ends_with("/tmp/install.zip"))
    );
    h.assert_torn_down();
}

#[test]
fn test_installer_failure_still_shrinks_image() {
    let h = Harness::new("extra");
    h.on_updater("extra", |_| 1);

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::NonZeroExit { .. }));
    let shrinks = h
        .runner
        .command_lines()
        .iter()
        .filter(|l| l.contains(" -M "))
        .count();
    assert_eq!(shrinks, 5);
    assert!(h.reporter.contains("Failed to run real update-binary"));
    assert!(!h.reporter.contains("Failed to shrink system image"));
    assert_eq!(
        h.reporter.messages().last().map(String::as_str),
        Some("Failed to flash zip file.")
    );
    h.assert_torn_down();
}

#[test]
fn test_shrink_failure_fails_run() {
    let h = Harness::new("extra");
    h.runner.exit_with(&h.staged("e2fsck"), 8);

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::NonZeroExit { .. }));
    assert!(h.reporter.contains("Failed to shrink system image"));
    h.assert_torn_down();
}

#[test]
fn test_registry_shipped_in_archive() {
    let h = Harness::new("archived");
    let dir = h.rom_dir().join("archived");
    h.extractor.add(
        ZIP_ROM_REGISTRY,
        format!(
            "roms:\n  - id: archived\n    system: {0}/system.img\n    cache: {0}/cache\n    data: {0}/data\n    system_is_image: true\n",
            dir.display()
        ),
    );

    let outcome = h.run().unwrap();

    assert_eq!(
        outcome,
        Outcome::Installed {
            rom_id: "archived".to_string()
        }
    );
    assert!(dir.join("data").is_dir());
}

#[test]
fn test_build_failure_is_reported() {
    let h = Harness::new("extra");
    let host = FakeHost::new();
    let installer = Installer::new(
        &h.config,
        Services {
            host: &host,
            runner: &h.runner,
            supervisor: &h.supervisor,
            extractor: &h.extractor,
            properties: &h.properties,
            reporter: &h.reporter,
        },
    );

    let err = installer.run(&h.ctx).unwrap_err();

    assert!(matches!(err, InstallerError::NotMounted { .. }));
    assert_eq!(installer.stage(), Stage::Init);
    assert_eq!(
        h.reporter.messages(),
        vec![
            "Creating chroot environment",
            "Failed to create chroot environment",
            "Failed to flash zip file.",
        ]
    );
}

#[test]
fn test_teardown_failure_after_success() {
    let h = Harness::new("cancelled");
    h.host.pin_mount(h.config.layout.sandbox_root.join("proc"));
    let installer = h.installer();

    let err = installer.run(&h.ctx).unwrap_err();

    assert!(matches!(err, InstallerError::TeardownFailed { .. }));
    assert_eq!(installer.stage(), Stage::SandboxTorn);
    assert!(h.reporter.contains("You should reboot into recovery again"));
    assert!(!h.reporter.contains("Failed to flash zip file."));
}

#[test]
fn test_teardown_failure_after_error_keeps_primary_cause() {
    let h = Harness::new("bogus");
    h.host.pin_mount(h.config.layout.sandbox_root.join("proc"));

    let err = h.run().unwrap_err();

    assert!(matches!(err, InstallerError::UnknownRom { ref id } if id == "bogus"));
    let messages = h.reporter.messages();
    let hint = messages
        .iter()
        .position(|m| m.starts_with("Failed to destroy chroot environment"))
        .unwrap();
    let flash = messages
        .iter()
        .position(|m| m == "Failed to flash zip file.")
        .unwrap();
    assert!(hint < flash);
    assert_eq!(flash, messages.len() - 1);
}
