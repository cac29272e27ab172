//! Optional run journal: a CSV file recording what a run opened, skipped and failed on.
use std::fs::File;
use std::io::Write;
use std::time::Instant;

use chrono::{Local, Utc};

use super::output::{format_time, make_csv_line, CSV_SEPARATOR, QUOTE};
use crate::error::Result;

pub struct RunLog {
    file: Option<File>,
    start: Instant,
    errors: usize,
}

impl RunLog {
    /// Opens `keihash-<keyword>-<time>.log`; an empty keyword only counts errors.
    pub fn new(keyword: &str, comment: &str, args: &[String]) -> Result<Self> {
        let file = if keyword.is_empty() {
            None
        } else {
            let name = format!("keihash-{}-{}.log", keyword, format_time(Local::now()));
            log::info!("Journaling to {name}");
            Some(File::create(name)?)
        };

        let mut run_log = Self { file, start: Instant::now(), errors: 0 };
        run_log.line(&["Start"]);
        run_log.line(&["UTC", &Utc::now().format("%Y%m%d-%H%M%S").to_string()]);
        run_log.line(&["Comment", comment]);
        run_log.line(&["Args", &format!("{args:?}")]);
        run_log.line(&["Version", env!("CARGO_PKG_VERSION")]);
        run_log.line(&["Platform", std::env::consts::OS]);
        let cwd = std::env::current_dir().map(|d| d.display().to_string()).unwrap_or_default();
        run_log.line(&["CWD", &format!("{cwd:?}")]);

        Ok(run_log)
    }

    pub fn line(&mut self, fields: &[&str]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let now = format_time(Local::now());
        let mut row = vec![now.as_str()];
        row.extend_from_slice(fields);
        let line = make_csv_line(&row, CSV_SEPARATOR, QUOTE);

        if let Err(err) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            log::warn!("Could not write to journal: {err}");
        }
    }

    pub fn error(&mut self, detail: &str) {
        self.errors += 1;
        self.line(&["Error", detail]);
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn close(&mut self) {
        let errors = format!("{} error(s)", self.errors);
        let elapsed = format!("{} second(s)", self.start.elapsed().as_secs());
        self.line(&["Finish", &errors, &elapsed]);
        self.file = None;
    }
}
