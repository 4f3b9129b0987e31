use std::path::PathBuf;

/// One installed PassThru interface as advertised by its vendor
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub library_path: PathBuf,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, library_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            library_path: library_path.into(),
        }
    }
}

/// Enumerates installed interfaces in a stable order
pub trait DeviceRegistry {
    fn list_devices(&self) -> Vec<DeviceInfo>;
}

/// Reads vendor entries under `SOFTWARE\PassThruSupport.04.04`
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThruRegistry;

impl DeviceRegistry for PassThruRegistry {
    fn list_devices(&self) -> Vec<DeviceInfo> {
        discover_devices()
    }
}

/// A fixed device list, e.g. a DLL path given on the command line
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry(pub Vec<DeviceInfo>);

impl DeviceRegistry for StaticRegistry {
    fn list_devices(&self) -> Vec<DeviceInfo> {
        self.0.clone()
    }
}

/// Searches both the native and the WOW6432Node view so 32-bit vendor
/// installs show up on 64-bit Windows.
#[cfg(target_os = "windows")]
fn discover_devices() -> Vec<DeviceInfo> {
    use winreg::enums::*;
    use winreg::RegKey;

    let mut results = Vec::new();
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    let registry_views = [
        (r"SOFTWARE\PassThruSupport.04.04", KEY_READ | KEY_WOW64_64KEY),
        (r"SOFTWARE\PassThruSupport.04.04", KEY_READ | KEY_WOW64_32KEY),
    ];

    let mut seen_libraries = std::collections::HashSet::new();

    for (path, flags) in &registry_views {
        let Ok(key) = hklm.open_subkey_with_flags(path, *flags) else {
            log::debug!("PassThru registry view {:#x} not present", flags);
            continue;
        };
        for vendor in key.enum_keys().filter_map(|k| k.ok()) {
            let Ok(subkey) = key.open_subkey_with_flags(&vendor, KEY_READ) else {
                continue;
            };
            let Ok(library) = subkey.get_value::<String, _>("FunctionLibrary") else {
                log::warn!("PassThru entry '{}' has no FunctionLibrary", vendor);
                continue;
            };
            // Same DLL registered in both views
            if !seen_libraries.insert(library.to_lowercase()) {
                continue;
            }
            let name = subkey
                .get_value::<String, _>("Name")
                .unwrap_or_else(|_| vendor.clone());
            results.push(DeviceInfo::new(name, library));
        }
    }

    log::info!("Found {} PassThru device(s) in registry", results.len());
    results
}

#[cfg(not(target_os = "windows"))]
fn discover_devices() -> Vec<DeviceInfo> {
    // No PassThruSupport registry outside Windows
    Vec::new()
}
