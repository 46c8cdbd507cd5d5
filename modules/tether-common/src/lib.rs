pub mod config;
pub mod module;

pub use config::{load_config, Config, FileConfig};
pub use module::{
    current_module, loader_module, ModuleInfo, ModuleRef, ModuleScope, LOADER_MODULE_ID,
};
