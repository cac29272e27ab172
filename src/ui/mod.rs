pub mod logfile;
pub mod output;
