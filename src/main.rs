use std::{collections::BTreeMap, path::PathBuf, process::ExitCode};

use clap::{AppSettings, Parser};
use log::{debug, error, info};

use mstransform::{config::ConfigValue, MsTransformManager, TransformConfig, TransformError};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// A toml or json file of transformation parameters (e.g. inputms,
    /// outputms, datacolumn, chanaverage).
    args_file: Option<PathBuf>,

    /// Set a parameter, overriding the arguments file. Can be given many
    /// times, e.g. -k chanaverage=true -k chanbin=4
    #[clap(short = 'k', long = "key", multiple_occurrences(true))]
    keys: Vec<String>,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbosity);

    let map = match parameters(&args) {
        Ok(map) => map,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Parameters: {map:?}");

    match transform(&map, !args.no_progress_bars) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn parameters(args: &Args) -> Result<BTreeMap<String, ConfigValue>, String> {
    let mut map = match &args.args_file {
        Some(path) => TransformConfig::read_arg_file(path).map_err(|e| e.to_string())?,
        None => BTreeMap::new(),
    };
    for kv in &args.keys {
        let (key, value) = kv
            .split_once('=')
            .ok_or_else(|| format!("'{kv}' is not of the form key=value"))?;
        map.insert(key.trim().to_lowercase(), ConfigValue::from_cli(value));
    }
    Ok(map)
}

fn transform(
    map: &BTreeMap<String, ConfigValue>,
    show_progress: bool,
) -> Result<(), TransformError> {
    let mut manager = MsTransformManager::new();
    manager.configure_from_map(map)?;
    manager.open()?;
    manager.setup()?;
    if let Some((rows, chans, corrs)) = manager.transformed_shape() {
        info!("First buffer becomes {rows} rows, {chans} channels, {corrs} correlations");
    }
    manager.run(show_progress)
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
