mod args;
mod jobs;
mod sign;

pub use args::{Cli, CliCommand, JobsCliArgs, JobsCommand, SignCliArgs, SignProvider};
pub use jobs::handle_jobs_command;
pub use sign::{handle_sign_command, sign_tencent, SignedCallback};
