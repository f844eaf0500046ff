use crate::definitions::{Direction, LogInfo, LogSink, Loglevel};
use homewave_core::definitions::NodeId;
use std::borrow::Cow;
use std::sync::Arc;

macro_rules! level_methods {
    () => {
        pub fn error(&self, message: impl Fn() -> String) {
            self.message(message, Loglevel::Error);
        }

        pub fn warn(&self, message: impl Fn() -> String) {
            self.message(message, Loglevel::Warn);
        }

        pub fn info(&self, message: impl Fn() -> String) {
            self.message(message, Loglevel::Info);
        }

        pub fn debug(&self, message: impl Fn() -> String) {
            self.message(message, Loglevel::Debug);
        }

        pub fn silly(&self, message: impl Fn() -> String) {
            self.message(message, Loglevel::Silly);
        }
    };
}

/// Driver-level messages: startup, shutdown, scheduler decisions.
#[derive(Clone)]
pub struct DriverLogger {
    sink: Arc<dyn LogSink>,
}

impl DriverLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn message(&self, message: impl Fn() -> String, level: Loglevel) {
        if self.sink.level() < level {
            return;
        }
        let info = LogInfo::builder()
            .label("DRIVER")
            .message(message())
            .build();
        self.sink.log(info, level);
    }

    level_methods!();
}

/// Raw traffic on the serial port.
#[derive(Clone)]
pub struct SerialLogger {
    sink: Arc<dyn LogSink>,
}

impl SerialLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn data(&self, bytes: &[u8], direction: Direction) {
        let level = Loglevel::Silly;
        if self.sink.level() < level {
            return;
        }
        let info = LogInfo::builder()
            .label("SERIAL")
            .direction(direction)
            .message(format!("0x{}", hex::encode(bytes)))
            .build();
        self.sink.log(info, level);
    }

    pub fn control(&self, name: &'static str, direction: Direction) {
        let level = Loglevel::Silly;
        if self.sink.level() < level {
            return;
        }
        let info = LogInfo::builder()
            .label("SERIAL")
            .direction(direction)
            .message(name)
            .build();
        self.sink.log(info, level);
    }

    pub fn discarded(&self, bytes: &[u8]) {
        let level = Loglevel::Warn;
        if self.sink.level() < level {
            return;
        }
        let info = LogInfo::builder()
            .label("SERIAL")
            .message(format!("discarded: 0x{}", hex::encode(bytes)))
            .build();
        self.sink.log(info, level);
    }
}

/// Messages about one node, tagged with its id.
#[derive(Clone)]
pub struct NodeLogger {
    sink: Arc<dyn LogSink>,
    node_id: NodeId,
}

impl NodeLogger {
    pub fn new(sink: Arc<dyn LogSink>, node_id: NodeId) -> Self {
        Self { sink, node_id }
    }

    pub fn message(&self, message: impl Fn() -> String, level: Loglevel) {
        if self.sink.level() < level {
            return;
        }
        let tags: Vec<Cow<'static, str>> = vec![format!("Node {}", self.node_id).into()];
        let info = LogInfo::builder()
            .label("CNTRLR")
            .tags(tags)
            .message(message())
            .build();
        self.sink.log(info, level);
    }

    level_methods!();
}
