//! Text render surface for the label list

use crate::classifier::{Prediction, PredictionSet};
use crate::error::Error;
use std::io::{self, Write};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One row per class, e.g. `Cat: 0.93`
pub fn format_prediction(prediction: &Prediction) -> String {
    format!("{}: {:.2}", prediction.label, prediction.probability)
}

/// What the surface shows at one moment
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Predictions(Vec<String>),
    Error(String),
}

impl View {
    /// The error state takes over the whole surface
    pub fn build(predictions: &PredictionSet, error: Option<&Error>) -> Self {
        match error {
            Some(error) => View::Error(error.to_string()),
            None => View::Predictions(predictions.iter().map(format_prediction).collect()),
        }
    }
}

/// Trait for things that can display a view
pub trait RenderSurface {
    fn draw(&mut self, view: &View) -> io::Result<()>;
}

/// Surface that writes the view to a terminal
pub struct TerminalSurface<W: Write> {
    out: W,
    /// Clear and home the cursor before each draw
    redraw_in_place: bool,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: io::stdout(),
            redraw_in_place: true,
        }
    }
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            redraw_in_place: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderSurface for TerminalSurface<W> {
    fn draw(&mut self, view: &View) -> io::Result<()> {
        if self.redraw_in_place {
            write!(self.out, "\x1b[2J\x1b[H")?;
        }

        match view {
            View::Predictions(rows) => {
                for row in rows {
                    writeln!(self.out, "{}", row)?;
                }
            }
            View::Error(message) => {
                writeln!(self.out, "Error: {}", message)?;
                writeln!(self.out, "Type 'r' to restart")?;
            }
        }

        self.out.flush()
    }
}

/// Redraw `surface` whenever the predictions or the error state change
///
/// Returns when `cancel` fires or both senders are gone.
pub async fn run_renderer<S: RenderSurface>(
    mut surface: S,
    mut predictions: watch::Receiver<PredictionSet>,
    mut error: watch::Receiver<Option<Error>>,
    cancel: CancellationToken,
) {
    let mut last = None;

    loop {
        let view = View::build(
            &predictions.borrow_and_update(),
            error.borrow_and_update().as_ref(),
        );
        if last.as_ref() != Some(&view) {
            if let Err(e) = surface.draw(&view) {
                tracing::warn!("Failed to draw predictions: {}", e);
            }
            last = Some(view);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = predictions.changed() => if changed.is_err() { break },
            changed = error.changed() => if changed.is_err() { break },
        }
    }
}
