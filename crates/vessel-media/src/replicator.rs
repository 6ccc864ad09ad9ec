//! Fan-out handler.
//!
//! One replicator exists per (input, stream selector); every muxer branch for
//! that stream attaches downstream.  Payloads are reference-counted, so
//! duplication is a pointer copy, not a data copy.

use std::sync::{Arc, Mutex};

use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, StreamData};

const NAME: &str = "replicator";

#[derive(Default)]
pub struct Replicator {
    downstreams: Mutex<Vec<Arc<dyn MediaHandler>>>,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached branches.
    pub fn fan_out(&self) -> usize {
        self.downstreams.lock().unwrap().len()
    }
}

impl MediaHandler for Replicator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()> {
        self.downstreams.lock().unwrap().push(downstream);
        Ok(())
    }

    fn initialize(&self) -> Result<()> {
        let downstreams = self.downstreams.lock().unwrap().clone();
        if downstreams.is_empty() {
            return Err(PackagerError::Chain(
                "replicator has no downstream connected".into(),
            ));
        }
        for downstream in downstreams {
            downstream.initialize()?;
        }
        Ok(())
    }

    fn handle(&self, data: StreamData) -> Result<()> {
        let downstreams = self.downstreams.lock().unwrap().clone();
        for downstream in downstreams {
            downstream.handle(data.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let downstreams = self.downstreams.lock().unwrap().clone();
        for downstream in downstreams {
            downstream.flush()?;
        }
        Ok(())
    }
}
