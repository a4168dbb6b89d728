use packstage::cli::CliArgs;
use packstage::error::PackError;
use packstage::{BuildContext, Pipeline, VERSION};

use clap::Parser;
use std::env;
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("packstage v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let ctx = BuildContext::from_env(args.build_dir, args.cache_dir);
    let pipeline = Pipeline::new(ctx);

    if let Err(err) = pipeline.run() {
        if let PackError::CompileFailed { errors } = &err {
            for problem in errors {
                match &problem.location {
                    Some(location) => {
                        error!(severity = %problem.severity, location = %location, "{}", problem.message)
                    }
                    None => error!(severity = %problem.severity, "{}", problem.message),
                }
            }
        }
        error!("build failed: {err}");
        std::process::exit(1);
    }
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("PACKSTAGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let mut filter = EnvFilter::from_default_env();

    if env::var("RUST_LOG").is_err() {
        filter = filter
            .add_directive(format!("packstage={}", level).parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}
