use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use plume::{err, Compiler, Config, PagesPlugin, Stats};
use plume::config::CONFIG_FILE;
use plume::error::Result;

mod flags;

fn init_tracing(verbose: u32) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn config(flags: &flags::Plumage) -> Result<Config> {
    let path = flags.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = Config::read(&path)?;
    if let Some(n) = flags.concurrency {
        config.options.concurrency = match NonZeroUsize::new(n) {
            Some(n) => n,
            None => return err!(kind: Configuration; "concurrency must be at least 1"),
        };
    }

    Ok(config)
}

fn build(flags: &flags::Plumage) -> Result<usize> {
    let start = Instant::now();
    let config = config(flags)?;
    let plugin = PagesPlugin::new(config)?;
    let compiler = Compiler::new(plugin.config().destination.clone()).plugin(plugin);
    println!("setup time: {}ms", start.elapsed().as_millis());

    let build = Instant::now();
    let compilation = compiler.run()?;
    println!("build time: {}ms", build.elapsed().as_millis());
    println!("total time: {}ms", start.elapsed().as_millis());
    println!("{}", Stats::new(&compiler, &compilation));
    Ok(compilation.errors().len())
}

pub fn main() -> ExitCode {
    let flags = flags::Plumage::from_env_or_exit();
    init_tracing(flags.verbose);

    match build(&flags) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("error: {failed} page(s) failed to build");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
