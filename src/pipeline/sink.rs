use crate::classifier::PredictionSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Latest prediction set, shared with the render side
///
/// Sets are swapped in whole, so readers see either the previous set or the
/// new one. No history is kept.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: Arc<watch::Sender<PredictionSet>>,
}

impl ResultSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(empty());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, predictions: PredictionSet) {
        self.tx.send_replace(predictions);
    }

    /// Latest published set, empty before the first publish
    pub fn current(&self) -> PredictionSet {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<PredictionSet> {
        self.tx.subscribe()
    }

    pub fn clear(&self) {
        self.tx.send_replace(empty());
    }
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

fn empty() -> PredictionSet {
    Arc::from(Vec::new())
}
