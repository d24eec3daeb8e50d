//! mbinstall - Multi-ROM update-binary wrapper
//!
//! Recovery runs this binary as the `update-binary` of a flashable zip. It
//! builds a chroot, lets the user pick a ROM slot, binds that slot's storage
//! into the chroot and runs the zip's real installer there.

use clap::Parser;
use std::env;
use std::process::ExitCode;

mod bridge;
mod cli;
mod common;
mod config;
mod device;
mod error;
mod extract;
mod host;
mod image;
mod installer;
mod paths;
mod process;
mod properties;
mod roms;
mod sandbox;
mod sniff;
mod supervisor;
#[cfg(test)]
mod test_fixtures;
mod transaction;
mod ui;

use cli::Cli;
use error::{InstallerError, Result};
use extract::ZipExtractor;
use host::LinuxHost;
use installer::{InstallContext, Installer, Outcome, Services};
use process::HostRunner;
use properties::SystemProperties;
use supervisor::ParentProcess;
use ui::RecoveryReporter;

fn init_logging(cli: &Cli) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<Outcome> {
    let config = cli.config();
    let fd = i32::try_from(cli.output_fd).map_err(|e| InstallerError::Io {
        message: format!("Invalid output fd {}: {e}", cli.output_fd),
    })?;
    let reporter = RecoveryReporter::from_fd(fd).map_err(|e| InstallerError::Io {
        message: format!("Invalid output fd {fd}: {e}"),
    })?;
    let properties = SystemProperties::new(config.prop_files.clone());

    let services = Services {
        host: &LinuxHost,
        runner: &HostRunner,
        supervisor: &ParentProcess,
        extractor: &ZipExtractor,
        properties: &properties,
        reporter: &reporter,
    };
    let mut installer = Installer::new(&config, services);
    match env::current_exe() {
        Ok(exe) => installer = installer.with_helper_tool(exe),
        Err(e) => log::warn!("Cannot locate own executable: {e}"),
    }

    installer.run(&InstallContext {
        interface: cli.interface.clone(),
        output_fd: cli.output_fd.to_string(),
        archive: cli.zip.clone(),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(Outcome::Installed { rom_id }) => {
            log::info!("Installed into {rom_id}");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Cancelled) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
