//! Machine Configuration
//!
//! A single description of the emulated machine, with the two built-in
//! profiles the lab uses.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// 9p root filesystem served to the guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Base URL of the flat file store
    pub base_url: String,
    /// JSON index describing the filesystem tree
    pub base_fs: String,
}

/// Peripheral enable flags; all disabled by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Peripherals {
    pub screen: bool,
    pub speaker: bool,
    pub mouse: bool,
    pub keyboard: bool,
}

/// Emulated machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Engine WebAssembly module
    pub wasm_path: Option<String>,
    /// Guest RAM in bytes
    pub memory_size: u64,
    /// VGA memory in bytes (0 disables VGA)
    pub vga_memory_size: Option<u64>,
    /// Boot firmware image
    pub bios: Option<String>,
    /// VGA firmware image
    pub vga_bios: Option<String>,
    /// CD-ROM image to boot from
    pub cdrom: Option<String>,
    /// 9p root filesystem
    pub filesystem: Option<FilesystemConfig>,
    /// Load kernel and initrd from the 9p filesystem
    pub bzimage_initrd_from_filesystem: bool,
    /// Boot device order
    pub boot_order: Option<u32>,
    /// Kernel command line
    pub cmdline: Option<String>,
    /// Saved machine state to resume from
    pub initial_state: Option<String>,
    /// Start executing as soon as the machine is constructed
    pub autostart: bool,
    /// Relay for guest networking; none disables the NIC
    pub network_relay_url: Option<String>,
    pub peripherals: Peripherals,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::alpine()
    }
}

impl MachineConfig {
    /// Alpine Linux on a 9p root filesystem, resumed from a saved state
    pub fn alpine() -> Self {
        Self {
            wasm_path: Some("/v86.wasm".to_string()),
            memory_size: 512 * MIB,
            vga_memory_size: None,
            bios: Some("bios/seabios.bin".to_string()),
            vga_bios: None,
            cdrom: None,
            filesystem: Some(FilesystemConfig {
                base_url: "images/alpine-rootfs-flat".to_string(),
                base_fs: "images/alpine-fs.json".to_string(),
            }),
            bzimage_initrd_from_filesystem: true,
            boot_order: None,
            cmdline: Some(
                "rw root=host9p rootfstype=9p rootflags=trans=virtio,cache=loose \
                 modules=virtio_pci tsc=reliable console=ttyS0"
                    .to_string(),
            ),
            initial_state: Some("images/alpine-state.bin".to_string()),
            autostart: true,
            network_relay_url: None,
            peripherals: Peripherals::default(),
        }
    }

    /// Small headless machine booting a Linux CD-ROM image
    pub fn minimal() -> Self {
        Self {
            wasm_path: Some("/v86.wasm".to_string()),
            memory_size: 32 * MIB,
            vga_memory_size: Some(0),
            bios: Some("/bios/seabios.bin".to_string()),
            vga_bios: Some("/bios/vgabios.bin".to_string()),
            cdrom: Some("/linux4.iso".to_string()),
            filesystem: None,
            bzimage_initrd_from_filesystem: false,
            boot_order: Some(1),
            cmdline: None,
            initial_state: None,
            autostart: true,
            network_relay_url: None,
            peripherals: Peripherals::default(),
        }
    }

    /// Look up a built-in profile by name
    pub fn profile(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "alpine" | "default" => Ok(Self::alpine()),
            "minimal" => Ok(Self::minimal()),
            _ => Err(Error::UnknownProfile {
                name: name.to_string(),
            }),
        }
    }

    /// Guest RAM in whole MiB
    pub fn memory_mib(&self) -> u64 {
        self.memory_size / MIB
    }

    /// Check the configuration for values no engine can boot with
    pub fn validate(&self) -> Result<()> {
        if self.memory_size < MIB {
            return Err(Error::ConfigValidationFailed {
                field: "machine.memory_size".to_string(),
                reason: "Memory size must be at least 1 MiB".to_string(),
            });
        }

        if self.cdrom.is_none() && self.filesystem.is_none() && self.initial_state.is_none() {
            return Err(Error::ConfigValidationFailed {
                field: "machine".to_string(),
                reason: "A CD-ROM image, root filesystem or initial state is required".to_string(),
            });
        }

        if self.bzimage_initrd_from_filesystem && self.filesystem.is_none() {
            return Err(Error::ConfigValidationFailed {
                field: "machine.bzimage_initrd_from_filesystem".to_string(),
                reason: "Loading the kernel from the filesystem requires a filesystem".to_string(),
            });
        }

        Ok(())
    }
}
