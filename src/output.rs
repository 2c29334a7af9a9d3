use std::io::{self, Write};

use serde::Serialize;

use crate::app::RunResult;
use crate::report::StatusRecord;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(records: &[StatusRecord]) -> io::Result<()> {
        Self::print_json(&records)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        for item in &result.items {
            writeln!(
                stdout,
                "{:<12} download={:<8} extract={:<14} files={:<6} decoded={:<6} process={:<10} processed={}",
                item.sku,
                item.download_status.to_string(),
                item.extract_status.to_string(),
                item.extracted_files,
                item.decoded_images,
                item.process_status.to_string(),
                item.processed_count,
            )?;
        }
        Ok(())
    }
}
