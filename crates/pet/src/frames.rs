//! JSON-lines sink for blended parameter frames.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use pet_types::ParameterMap;

#[derive(Serialize)]
struct FrameLine<'a> {
    t_ms: f64,
    params: &'a ParameterMap,
}

pub struct FrameSink {
    out: Box<dyn Write + Send>,
    written: u64,
}

impl FrameSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, written: 0 }
    }

    /// Open `path` for writing; `-` means stdout.
    pub fn open(path: &Path) -> Result<Self> {
        if path == Path::new("-") {
            return Ok(Self::new(Box::new(std::io::stdout())));
        }
        let file = File::create(path).with_context(|| format!("create frames file {:?}", path))?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn write_frame(&mut self, t_ms: f64, params: &ParameterMap) -> Result<()> {
        let line = serde_json::to_string(&FrameLine { t_ms, params })?;
        writeln!(self.out, "{line}").context("write frame")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("flush frames")
    }
}
