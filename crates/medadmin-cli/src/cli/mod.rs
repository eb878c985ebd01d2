pub mod command;
pub mod output;
pub mod toast;

pub use command::{run_command, watch, CliCommand};
pub use output::render;
pub use toast::ConsoleToast;
