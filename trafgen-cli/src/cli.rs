use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use trafgen_engine::targets::load_targets;
use trafgen_engine::{
    DispatchConfig, Dispatcher, FileSink, HttpFetcher, Recorder, ResourceGraph, TargetSampler,
};

use crate::config::Config;
use crate::{observability, report};

/// Synthetic HTTP traffic generator.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Weights(WeightsCommand),
    Version(VersionCommand),
}

/// issue requests against the configured targets and write the request log
#[derive(Clone, Debug, Default, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// CSV file with the ranked target URLs
    #[argh(option)]
    targets: Option<PathBuf>,

    /// number of requests to issue
    #[argh(option)]
    requests: Option<usize>,

    /// fixed request rate in requests per second
    #[argh(option)]
    rate: Option<f64>,

    /// rank offset of the Zipf-Mandelbrot distribution
    #[argh(option)]
    zipf_q: Option<f64>,

    /// exponent of the Zipf-Mandelbrot distribution
    #[argh(option)]
    zipf_s: Option<f64>,

    /// maximum number of requests in flight
    #[argh(option)]
    concurrency: Option<usize>,

    /// path of the request log
    #[argh(option)]
    output: Option<PathBuf>,

    /// seed for target selection
    #[argh(option)]
    seed: Option<u64>,
}

impl RunCommand {
    /// Overrides configuration values with the flags given on the command line.
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.targets {
            config.targets.path = path;
        }
        if let Some(requests) = self.requests {
            config.run.total_requests = requests;
        }
        if let Some(rps) = self.rate {
            config.run.rate = trafgen_engine::RateSource::Fixed { rps };
        }
        if let Some(q) = self.zipf_q {
            config.run.zipf.q = q;
        }
        if let Some(s) = self.zipf_s {
            config.run.zipf.s = s;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(path) = self.output {
            config.output.path = path;
        }
        if let Some(seed) = self.seed {
            config.run.seed = Some(seed);
        }
    }
}

/// print the selection probability of every configured target
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "weights")]
struct WeightsCommand {
    /// CSV file with the ranked target URLs
    #[argh(option)]
    targets: Option<PathBuf>,
}

/// print the trafgen version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    match args.command {
        Command::Run(ref command) => command.clone().apply(&mut config),
        Command::Weights(WeightsCommand { ref targets }) => {
            if let Some(path) = targets {
                config.targets.path = path.clone();
            }
        }
        Command::Version(_) => unreachable!(),
    }

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("trafgen-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads.max(1))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(_) => run(config).await,
            Command::Weights(_) => weights(config),
            Command::Version(_) => unreachable!(),
        }
    })
}

fn build_sampler(config: &Config) -> Result<TargetSampler<url::Url>> {
    let targets = &config.targets;
    let urls = load_targets(&targets.path, &targets.column, targets.limit)
        .with_context(|| format!("failed to load targets from {}", targets.path.display()))?;

    let zipf = config.run.zipf;
    let mut builder = TargetSampler::builder(urls).zipf(zipf.q, zipf.s);
    if let Some(seed) = config.run.seed {
        builder = builder.seed(seed);
    }

    Ok(builder.build()?)
}

async fn run(config: Config) -> Result<()> {
    let sampler = build_sampler(&config)?;
    let rate = config
        .run
        .rate
        .resolve()
        .context("failed to determine the request rate")?;

    let fetcher = HttpFetcher::new(&config.http.client)?;
    let graph = ResourceGraph::new(Arc::new(fetcher))
        .expand_subresources(config.http.expand_subresources)
        .subresource_concurrency(config.http.subresource_concurrency);

    let dispatch = DispatchConfig {
        total_requests: config.run.total_requests,
        rate,
        concurrency: config.run.concurrency,
        pacing: config.run.pacing,
    };
    let dispatcher = Dispatcher::new(sampler, Recorder::new(graph), dispatch)?;

    let log_path = &config.output.path;
    let sink = FileSink::create(log_path, config.output.format)
        .with_context(|| format!("failed to create request log {}", log_path.display()))?;

    let stats = trafgen_engine::run(dispatcher, sink).await?;
    report::print_stats(&stats, log_path);

    Ok(())
}

fn weights(config: Config) -> Result<()> {
    let sampler = build_sampler(&config)?;
    report::print_weights(sampler.targets(), sampler.mass());
    Ok(())
}
