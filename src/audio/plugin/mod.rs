//! CLAP plugin hosting: discovery, loading, processing, and editors

pub mod clap_abi;
pub mod editor;
pub mod editors;
pub mod host;
pub mod probe;
pub mod registry;

pub use editors::EditorWindows;
pub use host::PluginHost;
pub use probe::PluginDescriptor;
pub use registry::PluginRegistry;
