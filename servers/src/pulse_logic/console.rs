use colored::Colorize;
use lib_pulse::core::{RunningStats, SampleUpdate, Sink, SinkError, StatusSnapshot};
use std::io::{self, Write};

/// Prints every sample and status change to the terminal.
pub struct ConsoleSink;

impl ConsoleSink {
    fn sample_line(update: &SampleUpdate) -> String {
        format!(
            "{} {}",
            format!("❤ {} bpm", update.hr).red().bold(),
            stats_line(&update.stats).dimmed()
        )
    }

    fn status_line(snapshot: &StatusSnapshot) -> String {
        let connection = if snapshot.connected {
            "connected".green()
        } else {
            format!("{:?}", snapshot.connection).to_lowercase().yellow()
        };
        format!(
            "stream {} | streaming {} | activity {:?}{}",
            connection,
            on_off(snapshot.streaming_enabled),
            snapshot.activity,
            if snapshot.activity_enabled { "" } else { " (off)" }
        )
    }
}

impl Sink for ConsoleSink {
    fn receive_sample(&self, update: &SampleUpdate) -> Result<(), SinkError> {
        write_line(&mut io::stdout().lock(), &Self::sample_line(update))
    }

    fn receive_status(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        write_line(&mut io::stdout().lock(), &Self::status_line(snapshot))
    }
}

/// A closed terminal (broken pipe) retires the sink; other write errors are
/// reported for this update only.
fn write_line<W: Write>(out: &mut W, line: &str) -> Result<(), SinkError> {
    writeln!(out, "{}", line).map_err(|e| match e.kind() {
        io::ErrorKind::BrokenPipe => SinkError::Closed,
        _ => SinkError::Rejected(e.to_string()),
    })
}

fn stats_line(stats: &RunningStats) -> String {
    match (stats.min, stats.average, stats.max) {
        (Some(min), Some(avg), Some(max)) => {
            format!("(min {} / avg {:.1} / max {}, n={})", min, avg, max, stats.count)
        }
        _ => "(no data)".to_string(),
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_pulse::core::{Sample, StatsAggregator};

    #[test]
    fn sample_line_shows_value_and_stats() {
        colored::control::set_override(false);
        let mut stats = StatsAggregator::new();
        stats.update(60);
        let stats = stats.update(81).clone();
        let update = SampleUpdate::new(&Sample::new(81), &stats);

        assert_eq!(
            ConsoleSink::sample_line(&update),
            "❤ 81 bpm (min 60 / avg 70.5 / max 81, n=2)"
        );
        assert_eq!(stats_line(&RunningStats::default()), "(no data)");
    }

    struct FailingOut(io::ErrorKind);

    impl Write for FailingOut {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "stdout unavailable"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_become_sink_errors() {
        let mut out = Vec::new();
        write_line(&mut out, "stream connected").unwrap();
        assert_eq!(out, b"stream connected\n");

        assert!(matches!(
            write_line(&mut FailingOut(io::ErrorKind::BrokenPipe), "x"),
            Err(SinkError::Closed)
        ));
        assert!(matches!(
            write_line(&mut FailingOut(io::ErrorKind::Other), "x"),
            Err(SinkError::Rejected(_))
        ));
    }
}
