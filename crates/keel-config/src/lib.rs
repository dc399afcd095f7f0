mod parameters;
mod policy;

pub use parameters::{parse_build_arg, BuildParameters, InstallFlag};
pub use policy::{ImagePolicy, ManifestSpec, SourceTree};
