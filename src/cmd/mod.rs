//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`init`], [`validate`], or [`status`].
//! Each handler lives in its own submodule.

pub mod init;
pub mod run;
pub mod status;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::FulcrumError;

pub async fn dispatch(cli: Cli) -> Result<(), FulcrumError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Init(ref args)) => init::execute(args),
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Status(args)) => status::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  fulcrum v{version}: HTTP load balancer\n\n  \
         No command provided. To get started:\n\n    \
         fulcrum init                    Generate a starter config\n    \
         fulcrum run                     Start the balancer (auto-detects ./fulcrum.yaml)\n    \
         fulcrum run -c backends.yaml    Start with a specific config file\n    \
         fulcrum status                  Inspect a running instance\n    \
         fulcrum --help                  See all commands and options\n"
    );
}
