mod provider;
mod runtime;

pub use provider::{ModelInfo, ModelSpec, ProviderInfo};
pub use runtime::{HostOs, HostRuntimeContext, PathStyle, ShellFamily};
