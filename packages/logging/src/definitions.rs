use chrono::{DateTime, Utc};
use std::borrow::Cow;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Debug,
    Silly,
}

/// Whether a logged frame travelled to or from the controller stick.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[default]
    None,
    Inbound,
    Outbound,
}

/// One structured log record. The label identifies the emitting layer
/// (SERIAL, DRIVER, CNTRLR), tags carry addressing context.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LogInfo {
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    #[builder(default)]
    pub direction: Direction,
    pub label: &'static str,
    #[builder(default)]
    pub tags: Vec<Cow<'static, str>>,
    #[builder(setter(into))]
    pub message: Cow<'static, str>,
}

/// Sink the logger facades write into. Typically a channel to the
/// background writer task, so logging never blocks protocol work.
pub trait LogSink: Send + Sync {
    fn log(&self, info: LogInfo, level: Loglevel);
    fn level(&self) -> Loglevel;
    fn set_level(&self, level: Loglevel);
}
