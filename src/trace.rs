use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::TraceSink;

/// Trajectory of the manipulable coordinates during one iterative-ascent response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AscentTrace {
    /// 1-based response call number.
    pub call: u64,
    pub feature_indices: Vec<usize>,
    /// `steps[t][k]` is the value of `feature_indices[k]` after step `t`.
    pub steps: Vec<Vec<f64>>,
}

impl AscentTrace {
    pub fn new(call: u64, feature_indices: Vec<usize>) -> Self {
        Self {
            call,
            feature_indices,
            steps: Vec::new(),
        }
    }

    /// Values of a single feature across all steps, if it was traced.
    pub fn series(&self, feature: usize) -> Option<Vec<f64>> {
        let k = self.feature_indices.iter().position(|&f| f == feature)?;
        Some(self.steps.iter().map(|s| s[k]).collect())
    }
}

#[derive(Default)]
pub struct MemoryTraceSink {
    pub traces: Vec<AscentTrace>,
}

impl TraceSink for MemoryTraceSink {
    fn record(&mut self, trace: &AscentTrace) -> Result<()> {
        self.traces.push(trace.clone());
        Ok(())
    }
}

/// Shared handle so a caller can inspect traces while the responder owns the sink.
impl<S: TraceSink> TraceSink for Rc<RefCell<S>> {
    fn record(&mut self, trace: &AscentTrace) -> Result<()> {
        self.borrow_mut().record(trace)
    }
}

/// Writes one JSON object per trace, newline separated.
pub struct JsonLinesTraceSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for JsonLinesTraceSink<W> {
    fn record(&mut self, trace: &AscentTrace) -> Result<()> {
        serde_json::to_writer(&mut self.writer, trace)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}
