//! Command-line arguments.

use clap::Parser;

#[derive(Parser)]
#[command(
    about = "A WebSub hub written in Rust",
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION")
)]
pub struct CliArgs {
    /// Use `<directory>` to locate `config.toml` and the default SQLite file.
    #[arg(short, long, required = false)]
    pub work_dir: Option<String>,

    /// Use `<file>` as the configuration file instead of `<work-dir>/config.toml`.
    #[arg(short, long, required = false)]
    pub config: Option<String>,
}
