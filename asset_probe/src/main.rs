use std::fs;
use std::hint::black_box;
use std::io::{self, prelude::*};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::*;
use log::*;
use rayon::prelude::*;
use structopt::*;

use streaming_assets::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "asset_probe",
    about = "Mounts an asset package and pokes at its contents"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// A directory (or package) whose files shadow the package's
    #[structopt(long = "override")]
    overrides: Option<PathBuf>,

    /// Refuse packages with compressed entries
    #[structopt(long)]
    stored_only: bool,

    /// Check CRCs of stored entries as they're read
    #[structopt(long)]
    verify: bool,

    #[structopt(name("package"))]
    package: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Lists the directories and files in a directory of the package
    Ls {
        #[structopt(default_value = "/")]
        directory: String,

        /// Only list entries whose names match this wildcard
        #[structopt(short, long)]
        pattern: Option<String>,

        /// List the contents of subdirectories too
        #[structopt(short, long)]
        recursive: bool,
    },
    /// Writes a file from the package to stdout
    Cat { path: String },
    /// Reads every file in the package with each access strategy and times it
    Bench {
        /// How many times to read everything
        #[structopt(short = "n", long, default_value = "3")]
        passes: usize,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut options = PackageOptions::default().with_verify_checksums(args.verify);
    if args.stored_only {
        options = options.with_compressed_entries(CompressedEntryPolicy::Reject);
    }

    let location = match args.overrides {
        Some(primary) => PackageLocation::Override {
            primary,
            fallback: args.package.clone(),
        },
        None => PackageLocation::detect(args.package.clone()),
    };
    let assets = FilesystemContext::open(location, options)
        .with_context(|| format!("Couldn't mount {}", args.package.display()))?;

    match args.command {
        Command::Ls {
            directory,
            pattern,
            recursive,
        } => list(&assets, &directory, pattern.as_deref(), recursive),
        Command::Cat { path } => cat(&assets, &path),
        Command::Bench { passes } => bench(&assets, passes),
    }
}

fn list(
    assets: &FilesystemContext,
    directory: &str,
    pattern: Option<&str>,
    recursive: bool,
) -> Result<()> {
    let option = if recursive {
        SearchOption::AllDirectories
    } else {
        SearchOption::TopDirectoryOnly
    };
    let mut directories = assets
        .get_directories(directory, pattern, option)
        .with_context(|| format!("Couldn't list {}", directory))?;
    directories.sort();
    let mut files = assets.get_files(directory, pattern, option)?;
    files.sort();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for dir in &directories {
        writeln!(out, "{:>12} {}/", "", dir)?;
    }
    for file in &files {
        let entry = assets.entry(file)?;
        writeln!(out, "{:>12} {:?} {}", entry.size, entry.strategy, file)?;
    }
    Ok(())
}

fn cat(assets: &FilesystemContext, path: &str) -> Result<()> {
    let mut reader = assets
        .open_read(path)
        .with_context(|| format!("Couldn't open {}", path))?;
    io::copy(&mut reader, &mut io::stdout().lock())?;
    Ok(())
}

#[derive(Debug, Copy, Clone)]
enum Strategy {
    ReadAll,
    Stream,
    Bundle,
}

const STRATEGIES: [Strategy; 3] = [Strategy::ReadAll, Strategy::Stream, Strategy::Bundle];

struct Timing {
    pass: usize,
    strategy: Strategy,
    bytes: u64,
    elapsed: Duration,
}

/// Treats each bundle as its raw range,
/// touching each page so the timing includes faulting it in.
struct RawRange;

impl BundleLoader for RawRange {
    type Bundle = u64;
    type Error = anyhow::Error;

    fn load(&self, range: BundleRange<'_>) -> Result<u64> {
        match range.bytes() {
            Some(bytes) => {
                black_box(bytes.iter().step_by(4096).fold(0u8, |acc, b| acc ^ b));
            }
            None => {
                black_box(fs::read(range.file_path())?);
            }
        }
        Ok(range.len())
    }
}

fn read_with(assets: &FilesystemContext, path: &str, strategy: Strategy) -> Result<u64> {
    let bytes = match strategy {
        Strategy::ReadAll => assets.read_all_bytes(path)?.len() as u64,
        Strategy::Stream => {
            let mut reader = assets.open_read(path)?;
            io::copy(&mut reader, &mut io::sink())?
        }
        Strategy::Bundle => match assets.load_bundle(path, &RawRange) {
            Result::Ok(bytes) => bytes,
            Err(e) => match e.downcast_ref::<AssetError>() {
                Some(AssetError::UnsupportedEntry { .. }) => {
                    debug!("Skipping {} as a bundle: {}", path, e);
                    0
                }
                _ => return Err(e.context(format!("Couldn't load {}", path))),
            },
        },
    };
    Ok(bytes)
}

fn bench(assets: &FilesystemContext, passes: usize) -> Result<()> {
    let files = assets.get_files("/", None, SearchOption::AllDirectories)?;
    info!("Benchmarking {} files over {} passes", files.len(), passes);

    let (tx, rx) = mpsc::channel::<Result<Timing>>();
    thread::scope(|s| {
        // Drive the passes from a worker so results can be printed as they land.
        s.spawn(move || {
            for pass in 0..passes {
                for strategy in STRATEGIES {
                    let start = Instant::now();
                    let bytes = files
                        .par_iter()
                        .map(|path| read_with(assets, path, strategy))
                        .try_reduce(|| 0, |a, b| Ok(a + b));
                    let timing = bytes.map(|bytes| Timing {
                        pass,
                        strategy,
                        bytes,
                        elapsed: start.elapsed(),
                    });
                    let failed = timing.is_err();
                    if tx.send(timing).is_err() || failed {
                        return;
                    }
                }
            }
        });

        for timing in rx {
            let timing = timing?;
            let mib_per_sec =
                timing.bytes as f64 / (1024.0 * 1024.0) / timing.elapsed.as_secs_f64().max(1e-9);
            println!(
                "pass {:>2} {:>8}: {:>12} bytes in {:>10.3?} ({:.1} MiB/s)",
                timing.pass,
                format!("{:?}", timing.strategy),
                timing.bytes,
                timing.elapsed,
                mib_per_sec
            );
        }
        Ok(())
    })
}
