use clap::{Parser, ValueEnum};
use ring_pipeline::telemetry::init_tracing;
use ring_pipeline::{
    CsvSource, PipelineConfig, PipelineError, RawF32Source, Result, SampleSource, SineSource,
    StatsSink,
};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Stream samples through a chain of bounded ring buffers
#[derive(Parser, Debug)]
#[command(name = "ring-pipeline", version, about)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where samples come from
    #[arg(short, long, value_enum, default_value_t = SourceKind::Sine)]
    source: SourceKind,

    /// Input file for the csv and raw sources
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Stop after this many samples (the sine source is endless otherwise)
    #[arg(short = 'n', long)]
    samples: Option<u64>,

    /// Buffer capacities, first to last; overrides the config file
    #[arg(short, long, num_args = 1..)]
    buffers: Vec<usize>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Synthetic sine wave
    Sine,
    /// Second column of a CSV recording
    Csv,
    /// Little-endian f32 frames, as captured from a serial port
    Raw,
}

type BoxedSource = Box<dyn SampleSource + Send>;

fn open_source(cli: &Cli) -> Result<BoxedSource> {
    let source: BoxedSource = match cli.source {
        SourceKind::Sine => Box::new(SineSource::new()),
        SourceKind::Csv => Box::new(CsvSource::new(BufReader::new(File::open(input_path(cli)?)?))),
        SourceKind::Raw => Box::new(RawF32Source::new(BufReader::new(File::open(input_path(cli)?)?))),
    };
    Ok(match cli.samples {
        Some(limit) => Box::new(source.take(limit)),
        None => source,
    })
}

fn input_path(cli: &Cli) -> Result<&PathBuf> {
    cli.input.as_ref().ok_or_else(|| {
        PipelineError::ConfigError(format!("--input is required for the {:?} source", cli.source))
    })
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if !cli.buffers.is_empty() {
        config.buffers = cli.buffers.clone();
    }

    let source = open_source(&cli)?;
    let pipeline = config.into_builder()?.build()?;

    let shutdown = pipeline.shutdown_flag();
    ctrlc::set_handler(move || shutdown.trigger()).map_err(|e| {
        PipelineError::ThreadError(format!("cannot install Ctrl-C handler: {e}"))
    })?;

    info!(buffers = pipeline.buffer_count(), source = ?cli.source, "pipeline ready, Ctrl-C to stop");
    let output = pipeline.start(source, StatsSink::new())?.wait()?;

    println!("{}", output.sink.format());
    print!("{}", output.report.format());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_buffers() {
        let cli = Cli::parse_from(["ring-pipeline", "-n", "100", "--buffers", "4", "8"]);
        assert_eq!(cli.source, SourceKind::Sine);
        assert_eq!(cli.samples, Some(100));
        assert_eq!(cli.buffers, vec![4, 8]);
    }

    #[test]
    fn test_csv_requires_input() {
        let cli = Cli::parse_from(["ring-pipeline", "--source", "csv"]);
        assert!(matches!(
            open_source(&cli),
            Err(PipelineError::ConfigError(_))
        ));
    }
}
