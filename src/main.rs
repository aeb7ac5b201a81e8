use clap::{Parser, Subcommand};
use plume::cache::BuildCache;
use plume::config::{self, Config};
use plume::convert::ConverterRegistry;
use plume::logging::{self, Verbosity};
use plume::output;
use plume::pipeline::{self, BuildContext, BuildError, BuildSettings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Flags that only make sense for a full build.
#[derive(clap::Args, Clone)]
struct BuildArgs {
    /// Ignore cached artifacts and convert every document (results are still cached)
    #[arg(long)]
    no_cache: bool,

    /// Exit 0 even when some documents fail
    #[arg(long)]
    continue_on_error: bool,

    /// Maximum concurrent conversions (capped at the number of CPU cores)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-document conversion timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Include documents marked `draft = true`
    #[arg(long)]
    drafts: bool,
}

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "plume")]
#[command(about = "Incremental static site generator for blogs")]
#[command(long_about = "\
Incremental static site generator for blogs

Posts are Markdown or AsciiDoc files. Each post is converted once and cached
by a fingerprint of its content, metadata, converter and everything it
includes; unchanged posts are never converted twice.

Content structure:

  content/
  ├── config.toml                  # Site config (optional)
  ├── assets/                      # Copied verbatim to dist/assets/
  ├── _partials/footer.html        # Includable fragment, never rendered alone
  ├── 2024-05-01-fibers.md         # Post (date prefix → publish date)
  ├── runtime/010-actors.md        # Post (number prefix stripped from slug)
  └── sandboxing.adoc              # AsciiDoc post (needs asciidoctor)

Directives inside a post:

  {{ include \"path\" }}             # Splice another document or fragment
  {{ diagram \"path.svg\" }}         # Embed an image, copied to the output
  {{ ref \"other.md\" }}             # Link to another post by its permalink

Run 'plume gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory [default: build.output_dir from config]
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Cache directory [default: cache.dir from config]
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert, assemble and publish the site
    Build(BuildArgs),
    /// Validate content and directives without converting anything
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
    /// Show the size of the persistent cache
    CacheStats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<u8, BuildError> {
    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(0);
    }

    let mut config = config::load_config(&cli.source)?;
    if let Some(output) = &cli.output {
        config.build.output_dir = output.to_string_lossy().into_owned();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache.dir = dir.to_string_lossy().into_owned();
    }

    match cli.command {
        Command::Build(args) => {
            apply_build_args(&mut config, &args);
            config.validate()?;
            build(&cli.source, &config, args.no_cache)
        }
        Command::Check => {
            config.validate()?;
            let settings = BuildSettings::new(&cli.source, &config);
            let converters = ConverterRegistry::from_config(&config.converters);
            let report = pipeline::check(&settings, &converters)?;
            output::print_check_report(&report);
            Ok(report.exit_code())
        }
        Command::CacheStats => {
            let dir = PathBuf::from(&config.cache.dir);
            let usage = BuildCache::usage_on_disk(&dir, config.cache.max_bytes);
            output::print_cache_usage(&dir, &usage);
            Ok(0)
        }
        Command::GenConfig => Ok(0),
    }
}

fn apply_build_args(config: &mut Config, args: &BuildArgs) {
    if let Some(n) = args.concurrency {
        config.build.concurrency = Some(n);
    }
    if let Some(secs) = args.timeout_secs {
        config.build.timeout_secs = secs;
    }
    config.build.continue_on_error |= args.continue_on_error;
    config.build.drafts |= args.drafts;
}

fn build(source: &Path, config: &Config, no_cache: bool) -> Result<u8, BuildError> {
    let concurrency = config::effective_concurrency(&config.build);
    init_thread_pool(concurrency);

    let cache_dir = PathBuf::from(&config.cache.dir);
    let cache = if no_cache {
        BuildCache::open_fresh(&cache_dir, config.cache.max_bytes)?
    } else {
        BuildCache::open(&cache_dir, config.cache.max_bytes)?
    };
    let settings = BuildSettings::new(source, config);
    let continue_on_error = settings.continue_on_error;
    let converters = ConverterRegistry::from_config(&config.converters);
    let ctx = BuildContext::new(settings, cache, converters, concurrency);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BuildError::Runtime)?;

    let result = runtime.block_on(async {
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling build");
                cancel.cancel();
            }
        });
        pipeline::run(&ctx).await
    });
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            output::print_stopped_build(&ctx.outcomes());
            return Err(e);
        }
    };

    output::print_build_report(&report);
    Ok(report.exit_code(continue_on_error))
}

/// Initialize the rayon thread pool used for hashing.
///
/// Sized like the conversion limiter; the user can constrain down, not up.
fn init_thread_pool(threads: usize) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
