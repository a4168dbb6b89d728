use clap::Parser;
use std::path::PathBuf;

/// Staged build pipeline that assembles a deployable runtime bundle
#[derive(Parser, Debug)]
#[command(
    name = "packstage",
    about = "Staged build pipeline that assembles a deployable runtime bundle from an application project",
    version,
    long_about = "packstage resolves the runtime version an application project requires, \
                  acquires and caches the toolchain artifacts for that version, compiles the \
                  model with the external compiler and assembles the target directory layout.\n\n\
                  Examples:\n  \
                  packstage /workspace/build /var/cache/packstage\n  \
                  packstage --log-level debug /workspace/build /var/cache/packstage"
)]
pub struct CliArgs {
    #[arg(
        value_name = "BUILD_DIR",
        help = "Target directory the bundle is assembled into (contains the pushed project)"
    )]
    pub build_dir: PathBuf,

    #[arg(
        value_name = "CACHE_DIR",
        help = "Shared artifact cache root, durable across builds"
    )]
    pub cache_dir: PathBuf,

    #[arg(long, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, help = "Increase verbosity")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}
