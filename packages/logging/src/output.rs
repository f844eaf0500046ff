use crate::definitions::{Direction, LogInfo, LogSink, Loglevel};
use std::sync::atomic::{AtomicU8, Ordering};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tokio::sync::mpsc;

fn level_to_u8(level: Loglevel) -> u8 {
    match level {
        Loglevel::Error => 0,
        Loglevel::Warn => 1,
        Loglevel::Info => 2,
        Loglevel::Debug => 3,
        Loglevel::Silly => 4,
    }
}

fn u8_to_level(val: u8) -> Loglevel {
    match val {
        0 => Loglevel::Error,
        1 => Loglevel::Warn,
        2 => Loglevel::Info,
        3 => Loglevel::Debug,
        _ => Loglevel::Silly,
    }
}

/// Writes records to stdout on a dedicated task, colorized per level.
pub struct BackgroundLogger {
    tx: mpsc::UnboundedSender<(LogInfo, Loglevel)>,
    level: AtomicU8,
}

impl BackgroundLogger {
    pub fn new(level: Loglevel) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(LogInfo, Loglevel)>();
        tokio::spawn(async move {
            let mut stream = StandardStream::stdout(ColorChoice::Auto);
            while let Some((info, level)) = rx.recv().await {
                let _ = write_record(&mut stream, &info, level);
            }
        });
        Self {
            tx,
            level: AtomicU8::new(level_to_u8(level)),
        }
    }
}

impl LogSink for BackgroundLogger {
    fn log(&self, info: LogInfo, level: Loglevel) {
        if self.level() < level {
            return;
        }
        let _ = self.tx.send((info, level));
    }

    fn level(&self) -> Loglevel {
        u8_to_level(self.level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: Loglevel) {
        self.level.store(level_to_u8(level), Ordering::Relaxed);
    }
}

/// Swallows everything. Used by tests and as the default sink.
pub struct NullLogger;

impl LogSink for NullLogger {
    fn log(&self, _info: LogInfo, _level: Loglevel) {}

    fn level(&self) -> Loglevel {
        Loglevel::Error
    }

    fn set_level(&self, _level: Loglevel) {}
}

fn level_color(level: Loglevel) -> Option<Color> {
    match level {
        Loglevel::Error => Some(Color::Red),
        Loglevel::Warn => Some(Color::Yellow),
        Loglevel::Info => None,
        Loglevel::Debug => Some(Color::Cyan),
        Loglevel::Silly => Some(Color::Magenta),
    }
}

fn write_record(
    out: &mut StandardStream,
    info: &LogInfo,
    level: Loglevel,
) -> std::io::Result<()> {
    use std::io::Write;

    let mut spec = ColorSpec::new();
    spec.set_fg(level_color(level));

    let direction = match info.direction {
        Direction::None => "  ",
        Direction::Inbound => "« ",
        Direction::Outbound => "» ",
    };

    out.set_color(&spec)?;
    write!(
        out,
        "{} {:<6} {}",
        info.timestamp.format("%H:%M:%S%.3f"),
        info.label,
        direction
    )?;
    for tag in &info.tags {
        write!(out, "[{}] ", tag)?;
    }
    writeln!(out, "{}", info.message)?;
    out.reset()
}
