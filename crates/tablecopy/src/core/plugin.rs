//! Runtime-loaded driver plugins.
//!
//! A plugin is a shared library built against the same `tablecopy` version
//! that exports one [`PluginDeclaration`] under the symbol
//! `TABLECOPY_PLUGIN`, normally through [`export_driver_plugin!`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablecopy::core::plugin::DriverRegistrar;
//!
//! fn register(registrar: &mut dyn DriverRegistrar) {
//!     registrar.register_driver(Arc::new(OracleDriver::new()));
//! }
//!
//! tablecopy::export_driver_plugin!(register);
//! ```
//!
//! Trait objects cross the library boundary, so the host and plugin must
//! come from the same compiler and crate version. The declaration carries
//! both an ABI number and the core version and loading refuses mismatches.

use std::path::Path;
use std::sync::Arc;

use libloading::Library;

use super::traits::Driver;

/// Bumped whenever the driver traits change shape.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Version of the core a plugin must be built against.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exported symbol name, NUL-terminated for the loader.
pub const PLUGIN_SYMBOL: &[u8] = b"TABLECOPY_PLUGIN\0";

/// Sink for drivers announced by a plugin.
pub trait DriverRegistrar {
    fn register_driver(&mut self, driver: Arc<dyn Driver>);
}

impl DriverRegistrar for Vec<Arc<dyn Driver>> {
    fn register_driver(&mut self, driver: Arc<dyn Driver>) {
        self.push(driver);
    }
}

/// Static record every plugin exports.
#[derive(Copy, Clone)]
pub struct PluginDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub register: fn(&mut dyn DriverRegistrar),
}

/// Export a plugin declaration for `register`.
#[macro_export]
macro_rules! export_driver_plugin {
    ($register:expr) => {
        #[doc(hidden)]
        #[no_mangle]
        pub static TABLECOPY_PLUGIN: $crate::core::plugin::PluginDeclaration =
            $crate::core::plugin::PluginDeclaration {
                abi_version: $crate::core::plugin::PLUGIN_ABI_VERSION,
                core_version: $crate::core::plugin::CORE_VERSION,
                register: $register,
            };
    };
}

/// Drivers produced by one artifact, plus the library that must outlive them.
pub struct LoadedPlugin {
    pub drivers: Vec<Arc<dyn Driver>>,
    pub library: Option<Library>,
}

/// Turns files in a driver directory into drivers.
pub trait PluginLoader {
    /// Whether `path` should be treated as a plugin artifact at all.
    fn accepts(&self, path: &Path) -> bool;

    /// Load one artifact. The error string becomes the skip reason.
    fn load(&self, path: &Path) -> std::result::Result<LoadedPlugin, String>;
}

/// Loads platform shared libraries (`.so`, `.dylib`, `.dll`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePluginLoader;

impl NativePluginLoader {
    fn check(decl: &PluginDeclaration) -> std::result::Result<(), String> {
        if decl.abi_version != PLUGIN_ABI_VERSION {
            return Err(format!(
                "plugin ABI version {} does not match {}",
                decl.abi_version, PLUGIN_ABI_VERSION
            ));
        }
        if decl.core_version != CORE_VERSION {
            return Err(format!(
                "plugin built against tablecopy {} but this is {}",
                decl.core_version, CORE_VERSION
            ));
        }
        Ok(())
    }
}

impl PluginLoader for NativePluginLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == std::env::consts::DLL_EXTENSION)
            .unwrap_or(false)
    }

    fn load(&self, path: &Path) -> std::result::Result<LoadedPlugin, String> {
        // SAFETY: loading runs the library's initializers. Plugins are
        // trusted code placed in the driver directory by the operator.
        let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;

        // SAFETY: the symbol is the address of a `PluginDeclaration` static
        // produced by `export_driver_plugin!`; it is copied out while the
        // library is loaded and the library is kept alive afterwards.
        let decl = unsafe {
            let symbol = library
                .get::<*const PluginDeclaration>(PLUGIN_SYMBOL)
                .map_err(|e| format!("missing TABLECOPY_PLUGIN symbol: {}", e))?;
            symbol.read()
        };
        Self::check(&decl)?;

        let mut drivers: Vec<Arc<dyn Driver>> = Vec::new();
        (decl.register)(&mut drivers);
        if drivers.is_empty() {
            return Err("plugin registered no drivers".to_string());
        }

        Ok(LoadedPlugin {
            drivers,
            library: Some(library),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn noop(_: &mut dyn DriverRegistrar) {}

    #[test]
    fn test_declaration_version_checks() {
        let ok = PluginDeclaration {
            abi_version: PLUGIN_ABI_VERSION,
            core_version: CORE_VERSION,
            register: noop,
        };
        assert!(NativePluginLoader::check(&ok).is_ok());

        let wrong_abi = PluginDeclaration {
            abi_version: PLUGIN_ABI_VERSION + 1,
            ..ok
        };
        assert!(NativePluginLoader::check(&wrong_abi)
            .unwrap_err()
            .contains("ABI"));

        let wrong_core = PluginDeclaration {
            core_version: "0.0.0-other",
            ..ok
        };
        assert!(NativePluginLoader::check(&wrong_core)
            .unwrap_err()
            .contains("0.0.0-other"));
    }

    #[test]
    fn test_native_loader_accepts_platform_extension() {
        let loader = NativePluginLoader;
        let lib = format!("libtablecopy_oracle.{}", std::env::consts::DLL_EXTENSION);
        assert!(loader.accepts(Path::new(&lib)));
        assert!(!loader.accepts(Path::new("README.md")));
        assert!(!loader.accepts(Path::new("no_extension")));
    }

    #[test]
    fn test_native_loader_rejects_corrupt_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join(format!("corrupt.{}", std::env::consts::DLL_EXTENSION));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"definitely not a shared library").unwrap();
        drop(file);

        let result = NativePluginLoader.load(&path);
        assert!(result.is_err());
    }
}
