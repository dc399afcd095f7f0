mod backend;
mod command;
mod context;
mod docker;

pub use backend::{classify_build_failure, DockerBackend};
pub use command::{run_command, CommandOutput};
pub use context::BuildContext;
pub use docker::DockerCli;
