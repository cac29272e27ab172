//! Record rendering and output routing.
//!
//! Lines go to stdout unless `-o` names a file. An `-o` value of the form `#switches#name`
//! turns on extra behaviour:
//!
//! * `c` write to the console as well as to the file
//! * `g` generate the filename: `keihash-[name-]YYYYMMDD-HHMMSS.txt`
//! * `s` one output file per input; `name` is a template using `%f%` (input filename),
//!   `%b%` (base name), `%d%` (directory), `%r%` (root), `%ru%` (unique root) and `%e%`
//!   (extension)
//! * `p` report progress on stderr
//! * `l` literal, so a filename may itself start with `#`
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use ansi_term::Colour;
use chrono::{Duration, Local};

use crate::analyser::containers::OutputRecord;
use crate::analyser::core::RecordSink;
use crate::error::Result;

pub const CSV_SEPARATOR: &str = ";";
pub const QUOTE: &str = "\"";

/// Wraps `value` in quotes when it contains the separator or is empty.
pub fn quote(value: &str, separator: &str, quote: &str) -> String {
    if value.contains(separator) || value.is_empty() {
        format!("{quote}{value}{quote}")
    } else {
        value.to_string()
    }
}

pub fn make_csv_line(row: &[&str], separator: &str, quote_char: &str) -> String {
    row.iter()
        .map(|value| quote(value, separator, quote_char))
        .collect::<Vec<_>>()
        .join(separator)
}

/// `ROLE;banner;fingerprint;fields`
pub fn record_line(record: &OutputRecord) -> String {
    let role = record.role.to_string();
    make_csv_line(
        &[&role, &record.banner, &record.fingerprint, &record.fields],
        CSV_SEPARATOR,
        QUOTE,
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordFormat {
    #[default]
    Csv,
    Json,
}

pub fn render(record: &OutputRecord, format: RecordFormat) -> Result<String> {
    match format {
        RecordFormat::Csv => Ok(record_line(record)),
        RecordFormat::Json => Ok(serde_json::to_string(record)?),
    }
}

pub fn format_time(time: chrono::DateTime<Local>) -> String {
    time.format("%Y%m%d-%H%M%S").to_string()
}

/// Parsed form of the `-o` option.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Routing {
    pub filename: String,
    pub console: bool,
    pub separate: bool,
    pub progress: bool,
}

impl Routing {
    /// Interprets `option`, generating names with `now` where asked to.
    pub fn parse(option: &str, now: &str) -> Self {
        Self::parse_switches(option, now).unwrap_or_else(|| Routing {
            filename: option.to_string(),
            ..Routing::default()
        })
    }

    fn parse_switches(option: &str, now: &str) -> Option<Self> {
        let rest = option.strip_prefix('#')?;
        let position = rest.find('#').filter(|p| *p > 0)?;
        let mut routing = Routing { filename: rest[position + 1..].to_string(), ..Routing::default() };

        for switch in rest[..position].chars() {
            match switch {
                's' => routing.separate = true,
                'p' => routing.progress = true,
                'c' => routing.console = true,
                'l' => {}
                'g' => {
                    let extra = if routing.filename.is_empty() {
                        String::new()
                    } else {
                        format!("{}-", routing.filename)
                    };
                    routing.filename = format!("keihash-{extra}{now}.txt");
                }
                _ => return None,
            }
        }

        Some(routing)
    }
}

/// Fills a per-input filename template.
pub fn instantiate(template: &str, input: &str, unique_root: &str) -> String {
    let path = Path::new(input);
    let basename = path.file_name().map(|b| b.to_string_lossy().to_string()).unwrap_or_default();
    let dirname = path.parent().map(|d| d.to_string_lossy().to_string()).unwrap_or_default();
    let (root, extension) = split_extension(&basename);

    [
        ("%f%", input),
        ("%b%", basename.as_str()),
        ("%d%", dirname.as_str()),
        ("%ru%", unique_root),
        ("%r%", root),
        ("%e%", extension),
    ]
    .iter()
    .fold(template.to_string(), |acc, (name, value)| acc.replace(name, value))
}

/// `capture.pcap` -> (`capture`, `.pcap`); leading dots do not start an extension.
pub fn split_extension(basename: &str) -> (&str, &str) {
    match basename.rfind('.') {
        Some(pos) if pos > 0 && !basename[..pos].chars().all(|c| c == '.') => {
            (&basename[..pos], &basename[pos..])
        }
        _ => (basename, ""),
    }
}

/// Line-oriented destination for records.
pub struct Output {
    routing: Routing,
    format: RecordFormat,
    file: Option<File>,
    roots: HashSet<String>,
    start: Instant,
}

impl Output {
    pub fn new(option: Option<&str>, format: RecordFormat) -> Result<Self> {
        let routing = Routing::parse(option.unwrap_or_default(), &format_time(Local::now()));

        let file = if !routing.separate && !routing.filename.is_empty() {
            Some(File::create(&routing.filename)?)
        } else {
            None
        };

        Ok(Self { routing, format, file, roots: HashSet::new(), start: Instant::now() })
    }

    pub fn line(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() || self.routing.console {
            println!("{line}");
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{line}")?;
            file.flush()?;
        }
        Ok(())
    }

    /// Announces the next input: reports progress and switches per-input files.
    pub fn filename(&mut self, filename: &str, index: usize, total: usize) -> Result<()> {
        if self.routing.progress {
            self.report_progress(filename, index, total);
        }

        if self.routing.separate && !self.routing.filename.is_empty() {
            let basename = Path::new(filename).file_name().map(|b| b.to_string_lossy().to_string()).unwrap_or_default();
            let root = split_extension(&basename).0.to_string();
            let unique = self.unique_root(&root);
            let name = instantiate(&self.routing.filename, filename, &unique);

            self.close();
            log::info!("Writing results for {filename} to {name}");
            self.file = Some(File::create(name)?);
        }

        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    fn report_progress(&self, filename: &str, index: usize, total: usize) {
        let eta = if index == 0 {
            String::new()
        } else {
            let elapsed = self.start.elapsed().as_secs_f64();
            let seconds = (elapsed / index as f64 * (total - index) as f64) as i64;
            let finish = Local::now() + Duration::seconds(seconds);
            format!("estimation {} seconds left, finished {} ", seconds, format_time(finish))
        };
        let counter = format!("{}/{}", index + 1, total);
        eprintln!("{} {}{}", Colour::Fixed(226).paint(counter), eta, filename);
    }

    fn unique_root(&mut self, root: &str) -> String {
        if self.roots.insert(root.to_string()) {
            return root.to_string();
        }
        (1..)
            .map(|n| format!("{root}_{n:04}"))
            .find(|candidate| self.roots.insert(candidate.clone()))
            .unwrap_or_default()
    }
}

impl RecordSink for Output {
    fn write_record(&mut self, record: &OutputRecord) -> Result<()> {
        let line = render(record, self.format)?;
        self.line(&line)
    }
}
