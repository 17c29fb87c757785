//! Prints how long each phase takes when `-time` is given. Phases are info-level spans. They are
//! collected as they finish and printed to stderr as an indented tree once the outermost phase
//! finishes, so that the report itself can still go to stdout.

use crate::error::AlreadyInitialised;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use tracing::field::Visit;
use tracing_subscriber::registry::LookupSpan;

#[derive(Default)]
struct PhaseLog {
    finished: Mutex<Vec<Phase>>,
}

/// Stored in the extensions of a span that hasn't finished yet.
struct Running {
    started: Instant,
    label: String,
}

#[derive(Debug, Clone)]
struct Phase {
    started: Instant,
    elapsed: Duration,
    depth: usize,
    label: String,
}

/// Builds `name [field=value, ...]` from a span's name and fields.
struct Label {
    out: String,
    has_fields: bool,
}

impl Label {
    fn new(name: &str) -> Label {
        Label {
            out: name.to_owned(),
            has_fields: false,
        }
    }

    fn separator(&mut self) {
        self.out.push_str(if self.has_fields { ", " } else { " [" });
        self.has_fields = true;
    }

    fn finish(mut self) -> String {
        if self.has_fields {
            self.out.push(']');
        }
        self.out
    }
}

impl Visit for Label {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.separator();
        let _ = write!(&mut self.out, "{}={value:?}", field.name());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.separator();
        let _ = write!(&mut self.out, "{}={value}", field.name());
    }
}

impl<S> tracing_subscriber::Layer<S> for PhaseLog
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn max_level_hint(&self) -> Option<tracing::level_filters::LevelFilter> {
        Some(tracing::level_filters::LevelFilter::INFO)
    }

    fn on_new_span(
        &self,
        attributes: &tracing::span::Attributes,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<S>,
    ) {
        let metadata = attributes.metadata();
        if *metadata.level() > tracing::Level::INFO {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut label = Label::new(metadata.name());
        attributes.values().record(&mut label);
        span.extensions_mut().insert(Running {
            started: Instant::now(),
            label: label.finish(),
        });
    }

    fn on_enter(&self, id: &tracing::span::Id, ctx: tracing_subscriber::layer::Context<S>) {
        if let Some(span) = ctx.span(id)
            && let Some(running) = span.extensions_mut().get_mut::<Running>()
        {
            running.started = Instant::now();
        }
    }

    fn on_close(&self, id: tracing::span::Id, ctx: tracing_subscriber::layer::Context<S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(running) = span.extensions_mut().remove::<Running>() else {
            return;
        };
        let depth = span.scope().count() - 1;
        let Ok(mut finished) = self.finished.lock() else {
            return;
        };
        finished.push(Phase {
            started: running.started,
            elapsed: running.started.elapsed(),
            depth,
            label: running.label,
        });
        if depth == 0 {
            eprint!("{}", render(&mut finished));
            finished.clear();
        }
    }
}

pub(crate) fn init_tracing() -> Result<(), AlreadyInitialised> {
    use tracing_subscriber::prelude::*;
    let subscriber = tracing_subscriber::Registry::default().with(PhaseLog::default());
    tracing::subscriber::set_global_default(subscriber).map_err(|_| AlreadyInitialised)
}

/// One line per phase in the order the phases started, children indented under their parents.
fn render(phases: &mut [Phase]) -> String {
    phases.sort_by_key(|phase| (phase.started, phase.depth));
    let mut out = String::new();
    for phase in phases.iter() {
        let ms = phase.elapsed.as_secs_f64() * 1000.0;
        let _ = writeln!(
            out,
            "{ms:>10.2} ms  {:indent$}{}",
            "",
            phase.label,
            indent = phase.depth * 2
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_render_as_indented_tree() {
        let origin = Instant::now();
        let phase = |offset_ms: u64, elapsed_ms: u64, depth: usize, label: &str| Phase {
            started: origin + Duration::from_millis(offset_ms),
            elapsed: Duration::from_millis(elapsed_ms),
            depth,
            label: label.to_owned(),
        };
        // In the order that they finish.
        let mut phases = vec![
            phase(1, 2, 1, "Load symbols [path=a.txt]"),
            phase(4, 1, 1, "Write raw symbols"),
            phase(0, 6, 0, "Symsort"),
        ];
        itertools::assert_equal(
            render(&mut phases).lines(),
            [
                "      6.00 ms  Symsort",
                "      2.00 ms    Load symbols [path=a.txt]",
                "      1.00 ms    Write raw symbols",
            ],
        );
    }

    #[test]
    fn labels() {
        let mut label = Label::new("Merge symbols");
        label.separator();
        label.out.push_str("view=Symbol Tags");
        assert_eq!(label.finish(), "Merge symbols [view=Symbol Tags]");
        assert_eq!(Label::new("Symsort").finish(), "Symsort");
    }
}
