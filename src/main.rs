use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};

use keihash::analyser::classify::PortFilter;
use keihash::analyser::containers::BannerStyle;
use keihash::analyser::core::{analyse, AnalysisConfig};
use keihash::analyser::reassembly::ReassemblyPolicy;
use keihash::capture::{self, Decoder};
use keihash::input::files::{self, ExpandOptions};
use keihash::input::processed::ProcessedFiles;
use keihash::ui::logfile::RunLog;
use keihash::ui::output::{Output, RecordFormat};

/// Calculate the SSH Key Exchange Init (KEI) hash of every client and server in a capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap/pcapng files (optionally .gz), @files listing captures, or wildcards; stdin if none
    files: Vec<String>,

    /// Output to file (# switches supported)
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Process packets for all ports, not just the SSH port
    #[arg(short = 'a', long, action = ArgAction::SetTrue)]
    allports: bool,

    /// SSH port
    #[arg(short = 'p', long, default_value_t = 22)]
    port: u16,

    /// Output records as JSON lines
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// Output banners verbatim instead of as quoted literals
    #[arg(long, action = ArgAction::SetTrue)]
    raw_banner: bool,

    /// How KEXINIT messages split over several segments are put back together
    #[arg(long, value_enum, default_value_t = Reassembly::Push)]
    reassembly: Reassembly,

    /// Decode captures with tshark instead of the built-in reader
    #[arg(long, action = ArgAction::SetTrue)]
    tshark: bool,

    /// Do not interpret filenames
    #[arg(long, action = ArgAction::SetTrue)]
    literalfilenames: bool,

    /// Recurse directories (wildcards and @files allowed)
    #[arg(long, action = ArgAction::SetTrue)]
    recursedir: bool,

    /// Check that files exist before processing them
    #[arg(long, action = ArgAction::SetTrue)]
    checkfilenames: bool,

    /// File database (JSON) of processed files
    #[arg(long)]
    processedfilesdb: Option<String>,

    /// Create a journal file with the given keyword
    #[arg(long, default_value = "")]
    logfile: String,

    /// A comment to include in the journal file
    #[arg(long, default_value = "")]
    logcomment: String,

    /// Continue with the next file after an error while reading a capture
    #[arg(long, action = ArgAction::SetTrue)]
    ignoreprocessingerrors: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Reassembly {
    /// Append one more client segment when a client KEXINIT segment carries PSH
    Push,
    /// Append same-direction segments until the declared packet length is reached
    Length,
}

impl Args {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            ports: PortFilter { port: self.port, all_ports: self.allports },
            banner_style: if self.raw_banner { BannerStyle::Raw } else { BannerStyle::Literal },
            reassembly: match self.reassembly {
                Reassembly::Push => ReassemblyPolicy::Push,
                Reassembly::Length => ReassemblyPolicy::Length,
            },
        }
    }

    fn decoder(&self) -> Decoder {
        if self.tshark {
            Decoder::Tshark
        } else {
            Decoder::Native
        }
    }
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_env()?;

    let args = Args::parse();
    let argv: Vec<String> = std::env::args().collect();
    let mut run_log = RunLog::new(&args.logfile, &args.logcomment, &argv)?;

    let options = ExpandOptions {
        literal: args.literalfilenames,
        recurse: args.recursedir,
        check: args.checkfilenames,
    };
    let expansion = files::expand(&args.files, &options)?;
    run_log.line(&["FilesCount", &expansion.filenames.len().to_string()]);
    run_log.line(&["Files", &format!("{:?}", expansion.filenames)]);

    for warning in &expansion.warnings {
        eprintln!("\nWarning:\n{warning}");
        run_log.line(&["Warning", warning]);
    }

    let result = process_files(&expansion.filenames, &args, &mut run_log);

    if run_log.errors() > 0 {
        eprintln!("Number of errors: {}", run_log.errors());
    }
    run_log.close();

    result
}

fn process_files(filenames: &[String], args: &Args, run_log: &mut RunLog) -> anyhow::Result<()> {
    let mut processed = args.processedfilesdb.as_deref().map(ProcessedFiles::load);
    let mut output = Output::new(args.output.as_deref(), if args.json { RecordFormat::Json } else { RecordFormat::Csv })
        .context("cannot open output file")?;
    let config = args.analysis_config();

    for (index, filename) in filenames.iter().enumerate() {
        if processed.as_ref().is_some_and(|db| db.contains(filename)) {
            log::info!("Skipping {filename}, already processed");
            continue;
        }

        output.filename(filename, index, filenames.len())?;
        process_file(filename, &config, args, &mut output, run_log)?;

        if let Some(db) = processed.as_mut() {
            db.mark(filename);
        }
    }

    output.close();
    Ok(())
}

fn process_file(
    filename: &str,
    config: &AnalysisConfig,
    args: &Args,
    output: &mut Output,
    run_log: &mut RunLog,
) -> anyhow::Result<()> {
    let display = if filename.is_empty() { "<stdin>" } else { filename };

    let frames = match capture::open(filename, args.decoder()) {
        Ok(frames) => frames,
        Err(err) => {
            eprintln!("Error opening file {display}");
            eprintln!("{err}");
            if let Some(reason) = files::describe_open_failure(filename).filter(|_| !filename.is_empty()) {
                eprintln!("{reason}");
            }
            log::error!("Opening file {display}: {err}");
            run_log.error(&format!("Opening file {display} {err}"));
            return Ok(());
        }
    };
    run_log.line(&["Success", &format!("Opening file {display}")]);

    match analyse(frames, config, output) {
        Ok(summary) => {
            log::info!("{display}: {} records from {} handshakes", summary.records, summary.handshakes);
            Ok(())
        }
        Err(err) => {
            log::error!("Processing file {display}: {err}");
            run_log.error(&format!("Processing file {display} {err}"));
            if args.ignoreprocessingerrors {
                Ok(())
            } else {
                Err(err).with_context(|| format!("processing {display}"))
            }
        }
    }
}
