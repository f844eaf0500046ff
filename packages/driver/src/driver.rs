use crate::error::{Error, Result};
use crate::notify::Watchers;
use crate::send_queue::TransmitOutcome;
use crate::storage::DriverStorage;
use homewave_cc::prelude::StateQuery;
use homewave_core::prelude::*;
use homewave_logging::{LogSink, NullLogger};
use homewave_serial::message::Message;
use homewave_serial::port::SerialBinding;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use typed_builder::TypedBuilder;

mod actor;
mod interview;

pub(crate) use actor::DriverActor;

/// Resolves when the report a class query asked for has been dispatched
/// into the value store.
pub(crate) type ReportWaiter = oneshot::Receiver<()>;

/// Progress callback for `begin_controller_command`.
pub type ControllerCallback = Box<dyn Fn(ControllerState) + Send + Sync>;

/// Which queries to run against one class of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassQuery {
    Static,
    State(StateQuery),
    Instances { of: CommandClassId },
    ClassVersion { of: CommandClassId },
    Groupings,
    Group { index: u8 },
}

/// Everything the public API and the internal tasks ask the driver
/// actor to do. The actor is the only place that touches the serial
/// port and the send queue; callers never block on I/O.
pub(crate) enum DriverInput {
    Execute {
        message: Message,
        priority: SendPriority,
        done: Option<oneshot::Sender<TransmitOutcome>>,
    },
    RunClassQuery {
        node: NodeId,
        class: CommandClassId,
        query: ClassQuery,
        reply: oneshot::Sender<Vec<ReportWaiter>>,
    },
    AwaitNif {
        node: NodeId,
        reply: oneshot::Sender<ReportWaiter>,
    },
    SetValue {
        value_id: ValueId,
        data: ValueData,
    },
    SelectListLabel {
        value_id: ValueId,
        label: String,
    },
    SetButton {
        value_id: ValueId,
        pressed: bool,
    },
    SetConfigParam {
        node: NodeId,
        param: u8,
        value: i32,
    },
    RequestConfigParam {
        node: NodeId,
        param: u8,
    },
    AddAssociation {
        node: NodeId,
        group: u8,
        target: NodeId,
    },
    RemoveAssociation {
        node: NodeId,
        group: u8,
        target: NodeId,
    },
    SetNodeName {
        node: NodeId,
        name: String,
    },
    SetNodeLocation {
        node: NodeId,
        location: String,
    },
    EnablePoll {
        node: NodeId,
    },
    DisablePoll {
        node: NodeId,
    },
    SetPollInterval {
        seconds: u64,
    },
    BeginControllerCommand {
        command: ControllerCommand,
        high_power: bool,
        callback: ControllerCallback,
    },
    CancelControllerCommand,
    ResetController,
    SoftReset,
    RequestNodeNeighborUpdate {
        node: NodeId,
    },
    RequestNetworkUpdate,
    RefreshNode {
        node: NodeId,
    },
    WriteConfig {
        reply: Option<oneshot::Sender<Result<PathBuf>>>,
    },
    InterviewFinished {
        node: NodeId,
        parked: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(TypedBuilder)]
pub struct DriverOptions {
    /// Where `zwcfg_<HomeIdHex8>.xml` lives.
    #[builder(setter(into))]
    pub user_path: PathBuf,
    #[builder(default = Arc::new(NullLogger))]
    pub log_sink: Arc<dyn LogSink>,
    /// Seconds for one full pass over the poll-enabled nodes.
    #[builder(default = 30)]
    pub poll_interval: u64,
}

/// The per-controller runtime handle. Cheap to clone; all mutation
/// happens in the actor task it points at.
#[derive(Clone)]
pub struct Driver {
    pub(crate) input_tx: mpsc::UnboundedSender<DriverInput>,
    pub(crate) storage: Arc<DriverStorage>,
}

impl Driver {
    /// Opens the runtime on an already-opened port and spawns its actor
    /// task. The driver registers itself in `registry` once the
    /// controller's Home ID is known.
    pub fn start<P: SerialBinding>(
        port: P,
        options: DriverOptions,
        watchers: Arc<Watchers>,
        registry: Arc<Mutex<HashMap<HomeId, Driver>>>,
        port_name: &str,
    ) -> Driver {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let storage = Arc::new(DriverStorage::new(port_name));

        let driver = Driver {
            input_tx: input_tx.clone(),
            storage: storage.clone(),
        };

        let actor = DriverActor::new(
            port,
            options,
            storage,
            watchers,
            registry,
            input_tx,
            input_rx,
            driver.clone(),
        );
        tokio::spawn(actor.run());

        driver
    }

    pub fn home_id(&self) -> Option<HomeId> {
        self.storage.home_id()
    }

    pub fn is_failed(&self) -> bool {
        self.storage.is_failed()
    }

    pub(crate) fn send_input(&self, input: DriverInput) -> bool {
        self.input_tx.send(input).is_ok()
    }

    /// Writes the config file and stops the actor. Pending outbound
    /// messages are dropped with `MessageFailed`.
    pub async fn shutdown(&self) {
        let _ = self.send_input(DriverInput::WriteConfig { reply: None });
        let (tx, rx) = oneshot::channel();
        if self.send_input(DriverInput::Shutdown { reply: tx }) {
            let _ = rx.await;
        }
    }
}

/// The cloneable context the startup and interview tasks run against.
#[derive(Clone)]
pub(crate) struct DriverCtx {
    pub input_tx: mpsc::UnboundedSender<DriverInput>,
    pub storage: Arc<DriverStorage>,
    pub watchers: Arc<Watchers>,
}

impl DriverCtx {
    /// Queues a message and waits for its transaction to finish.
    pub async fn execute(
        &self,
        message: Message,
        priority: SendPriority,
    ) -> Result<TransmitOutcome> {
        let (tx, rx) = oneshot::channel();
        self.input_tx
            .send(DriverInput::Execute {
                message,
                priority,
                done: Some(tx),
            })
            .map_err(|_| Error::ShutDown)?;
        rx.await.map_err(|_| Error::ShutDown)
    }

    /// Runs class queries in the actor and returns one waiter per
    /// report the class expects back.
    pub async fn run_class_query(
        &self,
        node: NodeId,
        class: CommandClassId,
        query: ClassQuery,
    ) -> Result<Vec<ReportWaiter>> {
        let (tx, rx) = oneshot::channel();
        self.input_tx
            .send(DriverInput::RunClassQuery {
                node,
                class,
                query,
                reply: tx,
            })
            .map_err(|_| Error::ShutDown)?;
        rx.await.map_err(|_| Error::ShutDown)
    }

    /// Registers interest in the node's next NIF before asking for it.
    pub async fn await_nif(&self, node: NodeId) -> Result<ReportWaiter> {
        let (tx, rx) = oneshot::channel();
        self.input_tx
            .send(DriverInput::AwaitNif { node, reply: tx })
            .map_err(|_| Error::ShutDown)?;
        rx.await.map_err(|_| Error::ShutDown)
    }

    pub fn notify(&self, notification: Notification) {
        self.watchers.dispatch(&notification);
    }

    pub fn interview_finished(&self, node: NodeId, parked: bool) {
        let _ = self
            .input_tx
            .send(DriverInput::InterviewFinished { node, parked });
    }
}
