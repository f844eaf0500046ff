use crate::driver::interview::{run_interview, run_startup};
use crate::driver::{
    ClassQuery, ControllerCallback, Driver, DriverCtx, DriverInput, DriverOptions, ReportWaiter,
};
use crate::node::{GroupInfo, InterviewStage, NodeRecord};
use crate::notify::Watchers;
use crate::poll::PollScheduler;
use crate::send_queue::{
    MAX_SEND_ATTEMPTS, PendingRequest, SendQueue, TransmitFailure, TransmitOutcome, TxState,
};
use crate::storage::DriverStorage;
use crate::{config, device_db};
use homewave_cc::prelude::*;
use homewave_core::prelude::*;
use homewave_logging::{Direction, DriverLogger, SerialLogger};
use homewave_serial::command::{
    AddNodeStatus, ApplicationCommand, ApplicationUpdate, Command, DataFrame, RemoveNodeStatus,
    UPDATE_STATE_NODE_INFO_RECEIVED, UPDATE_STATE_NODE_INFO_REQ_FAILED,
};
use homewave_serial::message::Message;
use homewave_serial::port::SerialBinding;
use homewave_serial::prelude::{
    ADD_NODE_ANY, ADD_NODE_OPTION_HIGH_POWER, ADD_NODE_STOP, REMOVE_NODE_ANY, REMOVE_NODE_STOP,
    RawFrame,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// The in-flight transaction. There is never more than one.
struct InFlight {
    request: PendingRequest,
    state: TxState,
    deadline: Instant,
    attempts: u8,
    response: Option<Command>,
}

struct AwaitedReport {
    node: NodeId,
    class: u8,
    command: u8,
    tx: oneshot::Sender<()>,
}

struct AwaitedNif {
    node: NodeId,
    tx: oneshot::Sender<()>,
}

struct ActiveControllerCommand {
    command: ControllerCommand,
    callback: ControllerCallback,
}

/// Adapter that lets command classes enqueue without seeing the queue.
struct QueueSink<'a> {
    queue: &'a mut SendQueue,
}

impl MessageSink for QueueSink<'_> {
    fn send(&mut self, message: Message, priority: SendPriority) {
        self.queue.push(PendingRequest::new(message, priority, None));
    }
}

/// How an inbound data frame relates to the in-flight transaction.
enum Route {
    Response,
    Callback,
    MismatchedResponse,
    Unsolicited,
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The driver's single event loop. Owns the port, the send queue and
/// the in-flight slot; everything else reaches it through the input
/// channel. Dispatch of inbound frames mutates the node registry and
/// the value store; API callers only ever read them.
pub(crate) struct DriverActor<P: SerialBinding> {
    port: P,
    options: DriverOptions,
    storage: Arc<DriverStorage>,
    watchers: Arc<Watchers>,
    registry: Arc<Mutex<HashMap<HomeId, Driver>>>,
    input_tx: mpsc::UnboundedSender<DriverInput>,
    input_rx: mpsc::UnboundedReceiver<DriverInput>,
    handle: Driver,

    queue: SendQueue,
    in_flight: Option<InFlight>,
    callback_ids: CallbackIdGen,
    awaited_reports: Vec<AwaitedReport>,
    awaited_nifs: Vec<AwaitedNif>,
    poll: PollScheduler,
    active_controller: Option<ActiveControllerCommand>,
    awake_announced: bool,
    all_announced: bool,

    driver_log: DriverLogger,
    serial_log: SerialLogger,
}

impl<P: SerialBinding> DriverActor<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port: P,
        options: DriverOptions,
        storage: Arc<DriverStorage>,
        watchers: Arc<Watchers>,
        registry: Arc<Mutex<HashMap<HomeId, Driver>>>,
        input_tx: mpsc::UnboundedSender<DriverInput>,
        input_rx: mpsc::UnboundedReceiver<DriverInput>,
        handle: Driver,
    ) -> Self {
        let poll = PollScheduler::new(Duration::from_secs(options.poll_interval.max(1)));
        let driver_log = DriverLogger::new(options.log_sink.clone());
        let serial_log = SerialLogger::new(options.log_sink.clone());
        Self {
            port,
            options,
            storage,
            watchers,
            registry,
            input_tx,
            input_rx,
            handle,
            queue: SendQueue::new(),
            in_flight: None,
            callback_ids: CallbackIdGen::new(),
            awaited_reports: Vec::new(),
            awaited_nifs: Vec::new(),
            poll,
            active_controller: None,
            awake_announced: false,
            all_announced: false,
            driver_log,
            serial_log,
        }
    }

    fn ctx(&self) -> DriverCtx {
        DriverCtx {
            input_tx: self.input_tx.clone(),
            storage: self.storage.clone(),
            watchers: self.watchers.clone(),
        }
    }

    pub async fn run(mut self) {
        self.driver_log
            .info(|| format!("opening controller on {}", self.storage.port_name()));

        tokio::spawn(run_startup(self.ctx(), self.options.user_path.clone()));

        loop {
            let tx_deadline = self.in_flight.as_ref().map(|f| f.deadline);
            let poll_due = self.poll.next_due();
            let poll_active = self.poll.is_active()
                && self.storage.home_id().is_some()
                && !self.storage.is_failed();

            tokio::select! {
                biased;

                input = self.input_rx.recv() => match input {
                    Some(DriverInput::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(input) => self.handle_input(input),
                    None => break,
                },

                frame = self.port.read() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        self.fail_driver();
                        break;
                    }
                },

                _ = maybe_sleep(tx_deadline) => self.handle_tx_timeout().await,

                _ = tokio::time::sleep_until(poll_due), if poll_active => self.handle_poll_tick(),
            }

            self.try_send_next().await;
        }

        self.driver_log.info(|| "driver loop stopped".to_string());
    }

    // ---- inputs ---------------------------------------------------------

    fn handle_input(&mut self, input: DriverInput) {
        match input {
            DriverInput::Execute {
                message,
                priority,
                done,
            } => self.queue.push(PendingRequest::new(message, priority, done)),

            DriverInput::RunClassQuery {
                node,
                class,
                query,
                reply,
            } => {
                let waiters = self.run_class_query(node, class, query);
                let _ = reply.send(waiters);
            }

            DriverInput::AwaitNif { node, reply } => {
                let (tx, rx) = oneshot::channel();
                self.awaited_nifs.push(AwaitedNif { node, tx });
                let _ = reply.send(rx);
            }

            DriverInput::SetValue { value_id, data } => self.handle_set_value(value_id, data),

            DriverInput::SelectListLabel { value_id, label } => {
                let outcome = self
                    .storage
                    .values_mut()
                    .select_list_label(&value_id, &label);
                if let Some(WriteOutcome::Changed) = outcome {
                    self.watchers
                        .dispatch(&Notification::ValueChanged { value_id });
                }
            }

            DriverInput::SetButton { value_id, pressed } => {
                let outcome = self
                    .storage
                    .values_mut()
                    .write(&value_id, ValueData::Button(pressed));
                if outcome.is_some() {
                    let notification = if pressed {
                        Notification::ButtonOn { value_id }
                    } else {
                        Notification::ButtonOff { value_id }
                    };
                    self.watchers.dispatch(&notification);
                }
            }

            DriverInput::SetConfigParam { node, param, value } => {
                self.with_configuration(node, |conf, ctx| conf.set_param(ctx, param, value));
            }

            DriverInput::RequestConfigParam { node, param } => {
                self.with_configuration(node, |conf, ctx| conf.request_param(ctx, param));
            }

            DriverInput::AddAssociation {
                node,
                group,
                target,
            } => self.handle_association(node, group, target, true),

            DriverInput::RemoveAssociation {
                node,
                group,
                target,
            } => self.handle_association(node, group, target, false),

            DriverInput::SetNodeName { node, name } => {
                let changed = match self.storage.nodes_mut().get_mut(&node) {
                    Some(record) => {
                        record.set_name(&name);
                        true
                    }
                    None => false,
                };
                if changed {
                    self.notify_node(node, |home_id, node_id| Notification::NodeNaming {
                        home_id,
                        node_id,
                    });
                }
            }

            DriverInput::SetNodeLocation { node, location } => {
                let changed = match self.storage.nodes_mut().get_mut(&node) {
                    Some(record) => {
                        record.location = location;
                        true
                    }
                    None => false,
                };
                if changed {
                    self.notify_node(node, |home_id, node_id| Notification::NodeNaming {
                        home_id,
                        node_id,
                    });
                }
            }

            DriverInput::EnablePoll { node } => {
                let known = self.storage.nodes_mut().get_mut(&node).map(|record| {
                    record.poll_enabled = true;
                });
                if known.is_some() && self.poll.enable(node) {
                    self.notify_node(node, |home_id, node_id| Notification::PollingEnabled {
                        home_id,
                        node_id,
                    });
                }
            }

            DriverInput::DisablePoll { node } => {
                if let Some(record) = self.storage.nodes_mut().get_mut(&node) {
                    record.poll_enabled = false;
                }
                if self.poll.disable(node) {
                    self.notify_node(node, |home_id, node_id| Notification::PollingDisabled {
                        home_id,
                        node_id,
                    });
                }
            }

            DriverInput::SetPollInterval { seconds } => {
                self.poll.set_interval(Duration::from_secs(seconds.max(1)));
            }

            DriverInput::BeginControllerCommand {
                command,
                high_power,
                callback,
            } => self.begin_controller_command(command, high_power, callback),

            DriverInput::CancelControllerCommand => self.cancel_controller_command(),

            DriverInput::ResetController => {
                self.queue.push(PendingRequest::new(
                    Message::set_default(),
                    SendPriority::Controller,
                    None,
                ));
            }

            DriverInput::SoftReset => {
                self.queue.push(PendingRequest::new(
                    Message::soft_reset(),
                    SendPriority::Controller,
                    None,
                ));
            }

            DriverInput::RequestNodeNeighborUpdate { node } => {
                self.queue.push(PendingRequest::new(
                    Message::request_node_neighbor_update(node),
                    SendPriority::Controller,
                    None,
                ));
            }

            DriverInput::RequestNetworkUpdate => {
                self.queue.push(PendingRequest::new(
                    Message::request_network_update(),
                    SendPriority::Controller,
                    None,
                ));
            }

            DriverInput::RefreshNode { node } => {
                let spawn = match self.storage.nodes_mut().get_mut(&node) {
                    Some(record) => {
                        // The one sanctioned regression of the interview
                        record.interview = InterviewStage::None;
                        if record.interview_active {
                            false
                        } else {
                            record.interview_active = true;
                            true
                        }
                    }
                    None => false,
                };
                if spawn {
                    tokio::spawn(run_interview(self.ctx(), node));
                }
            }

            DriverInput::WriteConfig { reply } => {
                let result = self.write_config();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            DriverInput::InterviewFinished { node, parked } => {
                self.handle_interview_finished(node, parked)
            }

            // Intercepted in the run loop; answered here only if it
            // arrives after a break was already decided
            DriverInput::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn write_config(&self) -> crate::error::Result<std::path::PathBuf> {
        let home_id = self
            .storage
            .home_id()
            .ok_or_else(|| crate::error::Error::State("controller identity unknown".into()))?;
        let nodes = self.storage.nodes();
        let values = self.storage.values();
        config::write_config(
            &self.options.user_path,
            home_id,
            self.storage.own_node_id(),
            &nodes,
            &values,
        )
    }

    fn notify_node(&self, node: NodeId, build: impl Fn(HomeId, NodeId) -> Notification) {
        if let Some(home_id) = self.storage.home_id() {
            self.watchers.dispatch(&build(home_id, node));
        }
    }

    // ---- command class plumbing ----------------------------------------

    /// Runs `work` on one node's class handler with a fully assembled
    /// context, then applies side effects and dispatches notifications.
    /// Returns one waiter per report the class said to expect.
    fn with_class_handler(
        &mut self,
        node: NodeId,
        class: CommandClassId,
        work: impl FnOnce(&mut CcHandler, &mut CcContext<'_>),
    ) -> Vec<ReportWaiter> {
        let storage = self.storage.clone();
        let Some(home_id) = storage.home_id() else {
            return Vec::new();
        };
        let own_node_id = storage.own_node_id();

        let mut notifications = Vec::new();
        let mut effects = Vec::new();
        let mut expected = Vec::new();
        {
            let mut nodes = storage.nodes_mut();
            let Some(record) = nodes.get_mut(&node) else {
                return Vec::new();
            };
            {
                let Some(slot) = record.classes.get_mut(&class) else {
                    return Vec::new();
                };
                let mut values = storage.values_mut();
                let mut sink = QueueSink {
                    queue: &mut self.queue,
                };
                let mut ctx = CcContext {
                    home_id,
                    node_id: node,
                    own_node_id,
                    store: &mut values,
                    sink: &mut sink,
                    notifications: &mut notifications,
                    effects: &mut effects,
                    expected: &mut expected,
                };
                work(&mut slot.handler, &mut ctx);
            }
            self.apply_side_effects(record, home_id, own_node_id, effects, &mut notifications);
        }
        self.watchers.dispatch_all(&notifications);

        expected
            .into_iter()
            .map(|report| {
                let (tx, rx) = oneshot::channel();
                self.awaited_reports.push(AwaitedReport {
                    node,
                    class: report.class as u8,
                    command: report.command,
                    tx,
                });
                rx
            })
            .collect()
    }

    fn run_class_query(
        &mut self,
        node: NodeId,
        class: CommandClassId,
        query: ClassQuery,
    ) -> Vec<ReportWaiter> {
        self.with_class_handler(node, class, |handler, ctx| match (query, handler) {
            (ClassQuery::Static, handler) => handler.request_static(ctx),
            (ClassQuery::State(kind), handler) => handler.request_state(ctx, kind),
            (ClassQuery::Instances { of }, CcHandler::MultiInstance(multi)) => {
                multi.request_instances(ctx, of)
            }
            (ClassQuery::ClassVersion { of }, CcHandler::Version(version)) => {
                version.request_class_version(ctx, of)
            }
            (ClassQuery::Groupings, CcHandler::Association(association)) => {
                association.request_groupings(ctx)
            }
            (ClassQuery::Group { index }, CcHandler::Association(association)) => {
                association.request_group(ctx, index)
            }
            _ => {}
        })
    }

    fn handle_set_value(&mut self, value_id: ValueId, data: ValueData) {
        let node = value_id.node_id();
        let Ok(class) = CommandClassId::try_from(value_id.command_class_id()) else {
            return;
        };
        self.with_class_handler(node, class, |handler, ctx| {
            handler.set_value(ctx, &value_id, &data);
        });
    }

    fn with_configuration(
        &mut self,
        node: NodeId,
        work: impl FnOnce(&mut Configuration, &mut CcContext<'_>),
    ) {
        self.with_class_handler(node, CommandClassId::Configuration, |handler, ctx| {
            if let CcHandler::Configuration(conf) = handler {
                work(conf, ctx);
            }
        });
    }

    fn handle_association(&mut self, node: NodeId, group: u8, target: NodeId, add: bool) {
        self.with_class_handler(node, CommandClassId::Association, |handler, ctx| {
            if let CcHandler::Association(association) = handler {
                if add {
                    association.add_member(ctx, group, target);
                } else {
                    association.remove_member(ctx, group, target);
                }
            }
        });

        // Optimistic local group update; the next Association report
        // either confirms or corrects it
        let changed = match self.storage.nodes_mut().get_mut(&node) {
            Some(record) => {
                let entry = record.groups.entry(group).or_default();
                if add {
                    if entry.members.contains(&target) {
                        false
                    } else {
                        entry.members.push(target);
                        true
                    }
                } else {
                    let before = entry.members.len();
                    entry.members.retain(|member| *member != target);
                    entry.members.len() != before
                }
            }
            None => false,
        };
        if changed {
            self.notify_node(node, |home_id, node_id| Notification::Group {
                home_id,
                node_id,
                group_index: group,
            });
        }
    }

    fn apply_side_effects(
        &mut self,
        record: &mut NodeRecord,
        home_id: HomeId,
        own_node_id: NodeId,
        effects: Vec<CcSideEffect>,
        notifications: &mut Vec<Notification>,
    ) {
        for effect in effects {
            match effect {
                CcSideEffect::Manufacturer {
                    manufacturer_id,
                    product_type,
                    product_id,
                } => {
                    record.manufacturer_id = Some(manufacturer_id);
                    record.product_type = Some(product_type);
                    record.product_id = Some(product_id);
                    match device_db::lookup(manufacturer_id, product_type, product_id) {
                        Some(entry) => {
                            record.manufacturer_name = entry.manufacturer_name.to_string();
                            record.product_name = entry.product_name.to_string();
                        }
                        // Database gaps degrade to generic labels
                        None => {
                            record.manufacturer_name =
                                device_db::manufacturer_name(manufacturer_id)
                                    .map(str::to_string)
                                    .unwrap_or_else(|| {
                                        format!("Unknown: id={:04x}", manufacturer_id)
                                    });
                            record.product_name = record
                                .protocol_info
                                .map(|info| info.device_class.generic_label().to_string())
                                .unwrap_or_else(|| {
                                    format!(
                                        "Unknown: type={:04x}, id={:04x}",
                                        product_type, product_id
                                    )
                                });
                        }
                    }
                    notifications.push(Notification::NodeNaming {
                        home_id,
                        node_id: record.id,
                    });
                }

                CcSideEffect::ClassVersion { class, version } => {
                    if let Some(slot) = record.classes.get_mut(&class) {
                        slot.version = version;
                    }
                }

                CcSideEffect::InstanceCount { class, count } => {
                    // The packed id has a 4-bit instance field
                    let count = count.clamp(1, 15);
                    let mut new_instances = Vec::new();
                    if let Some(slot) = record.classes.get_mut(&class) {
                        for instance in (slot.instances + 1)..=count {
                            new_instances.push(instance);
                        }
                        slot.instances = slot.instances.max(count);
                    }
                    for instance in new_instances {
                        let Some(slot) = record.classes.get_mut(&class) else {
                            continue;
                        };
                        let mut values = self.storage.values_mut();
                        let mut sink = QueueSink {
                            queue: &mut self.queue,
                        };
                        let mut inner_effects = Vec::new();
                        let mut expected = Vec::new();
                        let mut ctx = CcContext {
                            home_id,
                            node_id: record.id,
                            own_node_id,
                            store: &mut values,
                            sink: &mut sink,
                            notifications,
                            effects: &mut inner_effects,
                            expected: &mut expected,
                        };
                        slot.handler.create_values(&mut ctx, instance);
                    }
                }

                CcSideEffect::GroupCount { count } => {
                    record.group_count = count;
                }

                CcSideEffect::Group {
                    index,
                    max_members,
                    members,
                } => {
                    record.groups.insert(
                        index,
                        GroupInfo {
                            max_members,
                            members,
                        },
                    );
                    notifications.push(Notification::Group {
                        home_id,
                        node_id: record.id,
                        group_index: index,
                    });
                }
            }
        }
    }

    // ---- inbound frames -------------------------------------------------

    async fn handle_frame(&mut self, frame: RawFrame) {
        match frame {
            RawFrame::Ack => {
                self.serial_log.control("ACK", Direction::Inbound);
                self.handle_ack();
            }
            RawFrame::Nak => {
                self.serial_log.control("NAK", Direction::Inbound);
                self.handle_nak_or_can(TransmitFailure::Nak).await;
            }
            RawFrame::Can => {
                self.serial_log.control("CAN", Direction::Inbound);
                self.handle_nak_or_can(TransmitFailure::Can).await;
            }
            RawFrame::Data(bytes) => {
                self.serial_log.data(&bytes, Direction::Inbound);
                match DataFrame::parse(&bytes) {
                    Ok(frame) => {
                        // A good frame is acknowledged before anything
                        // else happens
                        self.write_port(RawFrame::Ack).await;
                        self.handle_data_frame(frame).await;
                    }
                    Err(e) => {
                        self.driver_log
                            .warn(|| format!("dropping bad frame: {}", e));
                        self.write_port(RawFrame::Nak).await;
                    }
                }
            }
            RawFrame::Garbage(bytes) => {
                self.serial_log.discarded(&bytes);
                self.write_port(RawFrame::Nak).await;
            }
        }
    }

    async fn handle_data_frame(&mut self, frame: DataFrame) {
        let command = match Command::parse(&frame) {
            Ok(command) => command,
            Err(e) => {
                // Protocol error: log and discard
                self.driver_log
                    .warn(|| format!("undecodable command: {}", e));
                return;
            }
        };

        let route = match &self.in_flight {
            Some(in_flight) => match in_flight.state {
                TxState::WaitResponse
                    if command.is_response_to(in_flight.request.message.function()) =>
                {
                    Route::Response
                }
                TxState::WaitResponse if frame.kind == FrameKind::Response => {
                    Route::MismatchedResponse
                }
                TxState::WaitCallback
                    if command.callback_id().is_some()
                        && command.callback_id() == in_flight.request.message.callback_id() =>
                {
                    Route::Callback
                }
                _ => Route::Unsolicited,
            },
            None => Route::Unsolicited,
        };

        match route {
            Route::Response => self.handle_matched_response(command).await,
            Route::Callback => self.complete_in_flight(Some(command)),
            Route::MismatchedResponse => {
                self.driver_log.warn(|| {
                    format!(
                        "discarding mismatched response 0x{:02x}",
                        frame.function_byte
                    )
                });
            }
            Route::Unsolicited => self.handle_unsolicited(command),
        }
    }

    async fn handle_matched_response(&mut self, command: Command) {
        // A rejected SEND_DATA is transient: the stick's queue was full
        if let Command::SendDataResponse(response) = &command {
            if !response.accepted {
                self.retry_or_fail(TransmitFailure::Rejected).await;
                return;
            }
        }

        self.capture_identity(&command);

        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        in_flight.response = Some(command);
        if in_flight.request.message.expects_callback() {
            in_flight.state = TxState::WaitCallback;
            in_flight.deadline = Instant::now() + TxState::WaitCallback.timeout();
        } else {
            self.complete_in_flight(None);
        }
    }

    /// Startup responses carry the controller identity; capture it no
    /// matter who asked.
    fn capture_identity(&mut self, command: &Command) {
        match command {
            Command::GetVersionResponse(response) => {
                self.storage
                    .set_library_version(response.library_version.clone());
            }
            Command::MemoryGetIdResponse(response) => {
                // A changed id means the controller was factory reset
                let first = self.storage.home_id() != Some(response.home_id);
                self.storage.set_home_id(response.home_id);
                self.storage.set_own_node_id(response.own_node_id);
                if first {
                    self.registry
                        .lock()
                        .expect("driver registry poisoned")
                        .insert(response.home_id, self.handle.clone());
                    self.driver_log.info(|| {
                        format!(
                            "controller ready: home {} node {}",
                            response.home_id, response.own_node_id
                        )
                    });
                    self.watchers.dispatch(&Notification::DriverReady {
                        home_id: response.home_id,
                        controller_node: response.own_node_id,
                    });
                }
            }
            _ => {}
        }
    }

    fn handle_unsolicited(&mut self, command: Command) {
        match command {
            Command::ApplicationCommand(app) => self.dispatch_application_command(app),
            Command::ApplicationUpdate(update) => self.handle_application_update(update),
            Command::AddNodeCallback(_)
            | Command::RemoveNodeCallback(_)
            | Command::NetworkManagementCallback(_) => self.handle_controller_event(&command),
            Command::SendDataCallback(callback) => {
                self.driver_log
                    .debug(|| format!("stale SEND_DATA callback id {}", callback.callback_id));
            }
            other => {
                self.driver_log
                    .debug(|| format!("unhandled frame: {:?}", other));
            }
        }
    }

    fn dispatch_application_command(&mut self, app: ApplicationCommand) {
        let node = app.source;
        let payload = app.class_payload.to_vec();

        // Wake-up notifications drive the pending-queue machinery before
        // any class sees them
        if payload.first() == Some(&(CommandClassId::WakeUp as u8))
            && payload.get(1) == Some(&wake_up::WAKE_UP_NOTIFICATION)
        {
            self.handle_wake_up_notification(node);
        }

        // A node-originated NoOp is only good for liveness signals
        if payload.first() == Some(&(CommandClassId::NoOperation as u8)) {
            self.notify_node(node, |home_id, node_id| Notification::Event {
                home_id,
                node_id,
                code: NotificationCode::NoOperation,
            });
            return;
        }

        // Unwrap MultiInstance encapsulation
        let (instance, payload) = match unwrap_encap(&payload) {
            Some((instance, inner)) => (instance.clamp(1, 15), inner.to_vec()),
            None => (1, payload),
        };

        let Some(&raw_class) = payload.first() else {
            return;
        };

        // Basic maps onto the node's primary actuator class when it has
        // one, so applications see a single coherent value
        let class_byte = {
            let nodes = self.storage.nodes();
            match nodes.get(&node) {
                Some(record) if raw_class == CommandClassId::Basic as u8 => record
                    .basic_mapping()
                    .map(|class| class as u8)
                    .unwrap_or(raw_class),
                _ => raw_class,
            }
        };

        let Ok(class) = CommandClassId::try_from(class_byte) else {
            self.driver_log
                .debug(|| format!("dropping frame of unknown class 0x{:02x}", class_byte));
            return;
        };

        let class_payload: Vec<u8> = payload[1..].to_vec();
        self.with_class_handler(node, class, move |handler, ctx| {
            handler.handle_msg(ctx, &class_payload, instance);
        });

        // Wake anyone who was waiting for exactly this report. Awaiters
        // key on the class that was actually on the wire, which the
        // Basic remap above must not disturb
        let command_byte = payload.get(1).copied().unwrap_or(0);
        self.resolve_awaited_reports(node, raw_class, command_byte);
    }

    fn resolve_awaited_reports(&mut self, node: NodeId, class: u8, command: u8) {
        let mut kept = Vec::with_capacity(self.awaited_reports.len());
        for awaited in self.awaited_reports.drain(..) {
            if awaited.node == node && awaited.class == class && awaited.command == command {
                let _ = awaited.tx.send(());
            } else {
                kept.push(awaited);
            }
        }
        self.awaited_reports = kept;
    }

    fn handle_application_update(&mut self, update: ApplicationUpdate) {
        match update.event {
            UPDATE_STATE_NODE_INFO_RECEIVED => {
                let node = update.node_id;
                self.learn_node_classes(node, &update.supported);
                // Resolve NIF waiters after the classes exist
                let mut kept = Vec::with_capacity(self.awaited_nifs.len());
                for awaited in self.awaited_nifs.drain(..) {
                    if awaited.node == node {
                        let _ = awaited.tx.send(());
                    } else {
                        kept.push(awaited);
                    }
                }
                self.awaited_nifs = kept;
            }
            UPDATE_STATE_NODE_INFO_REQ_FAILED => {
                // Dropping the waiters tells the interview the request
                // went unanswered
                let node = update.node_id;
                self.awaited_nifs.retain(|awaited| awaited.node != node);
            }
            other => {
                self.driver_log
                    .debug(|| format!("application update event 0x{:02x}", other));
            }
        }
    }

    /// Adds the advertised classes to the node and creates the values
    /// of every newly implemented class.
    fn learn_node_classes(&mut self, node: NodeId, supported: &[u8]) {
        let Some(home_id) = self.storage.home_id() else {
            return;
        };
        let own_node_id = self.storage.own_node_id();
        let mut notifications = Vec::new();
        {
            let mut nodes = self.storage.nodes_mut();
            let Some(record) = nodes.get_mut(&node) else {
                return;
            };
            let mut fresh = Vec::new();
            for &class_byte in supported {
                if let Some(class) = record.add_class(class_byte) {
                    fresh.push(class);
                }
            }
            for class in fresh {
                let Some(slot) = record.classes.get_mut(&class) else {
                    continue;
                };
                let mut values = self.storage.values_mut();
                let mut sink = QueueSink {
                    queue: &mut self.queue,
                };
                let mut effects = Vec::new();
                let mut expected = Vec::new();
                let mut ctx = CcContext {
                    home_id,
                    node_id: node,
                    own_node_id,
                    store: &mut values,
                    sink: &mut sink,
                    notifications: &mut notifications,
                    effects: &mut effects,
                    expected: &mut expected,
                };
                slot.handler.create_values(&mut ctx, 1);
            }
        }
        self.watchers.dispatch_all(&notifications);
    }

    // ---- wake-up buffering ----------------------------------------------

    fn handle_wake_up_notification(&mut self, node: NodeId) {
        let mut flushed = Vec::new();
        let mut resume_interview = false;
        let mut send_nmi = false;
        {
            let mut nodes = self.storage.nodes_mut();
            let Some(record) = nodes.get_mut(&node) else {
                return;
            };
            let was_asleep = !record.awake;
            record.awake = true;
            flushed.extend(record.pending.drain(..));

            if record.interview_parked {
                record.interview_parked = false;
                record.interview_active = true;
                resume_interview = true;
            } else if was_asleep && !record.interview_active {
                // Nothing more to learn: let it doze off once the
                // buffered traffic has drained
                send_nmi = true;
            }
        }

        self.driver_log.debug(|| {
            format!(
                "node {} woke up, flushing {} buffered messages",
                node,
                flushed.len()
            )
        });
        // Buffered messages re-enter the queue in their original order
        for request in flushed {
            self.queue.push(request);
        }
        if resume_interview {
            tokio::spawn(run_interview(self.ctx(), node));
        }
        if send_nmi {
            self.queue_no_more_information(node);
        }
    }

    fn queue_no_more_information(&mut self, node: NodeId) {
        // Poll priority sorts it behind everything the wake-up flushed
        let message = Message::send_data(node, &wake_up::NO_MORE_INFORMATION_PAYLOAD);
        self.queue
            .push(PendingRequest::new(message, SendPriority::Poll, None));
    }

    fn handle_interview_finished(&mut self, node: NodeId, parked: bool) {
        let send_nmi = match self.storage.nodes_mut().get_mut(&node) {
            Some(record) => {
                record.interview_active = false;
                record.interview_parked = parked;
                !parked && record.can_sleep() && record.awake
            }
            None => false,
        };
        if send_nmi {
            self.queue_no_more_information(node);
        }

        self.announce_query_progress();
    }

    fn announce_query_progress(&mut self) {
        let Some(home_id) = self.storage.home_id() else {
            return;
        };
        let (any_active, any_parked) = {
            let nodes = self.storage.nodes();
            (
                nodes.values().any(|record| record.interview_active),
                nodes.values().any(|record| record.interview_parked),
            )
        };
        if any_active {
            return;
        }
        if any_parked {
            if !self.awake_announced {
                self.awake_announced = true;
                self.watchers
                    .dispatch(&Notification::AwakeNodesQueried { home_id });
            }
        } else if !self.all_announced {
            self.all_announced = true;
            self.watchers
                .dispatch(&Notification::AllNodesQueried { home_id });
        }
    }

    // ---- controller commands --------------------------------------------

    fn begin_controller_command(
        &mut self,
        command: ControllerCommand,
        high_power: bool,
        callback: ControllerCallback,
    ) {
        if self.active_controller.is_some() || self.storage.is_failed() {
            callback(ControllerState::Failed);
            return;
        }

        let message = match command {
            ControllerCommand::AddDevice => {
                let mode = ADD_NODE_ANY | if high_power { ADD_NODE_OPTION_HIGH_POWER } else { 0 };
                Message::add_node_to_network(mode)
            }
            ControllerCommand::RemoveDevice => Message::remove_node_from_network(REMOVE_NODE_ANY),
        };

        callback(ControllerState::Starting);
        self.active_controller = Some(ActiveControllerCommand { command, callback });
        self.queue
            .push(PendingRequest::new(message, SendPriority::Controller, None));
    }

    fn cancel_controller_command(&mut self) {
        let Some(active) = self.active_controller.take() else {
            return;
        };

        // Abort the in-flight inclusion frame so the stop can go out
        let abort = self
            .in_flight
            .as_ref()
            .map(|in_flight| {
                matches!(
                    in_flight.request.message.function(),
                    FunctionType::AddNodeToNetwork | FunctionType::RemoveNodeFromNetwork
                )
            })
            .unwrap_or(false);
        if abort {
            let in_flight = self.in_flight.take().expect("checked above");
            in_flight
                .request
                .resolve(TransmitOutcome::Failed(TransmitFailure::Aborted));
        }

        let stop = match active.command {
            ControllerCommand::AddDevice => Message::add_node_to_network(ADD_NODE_STOP),
            ControllerCommand::RemoveDevice => Message::remove_node_from_network(REMOVE_NODE_STOP),
        };
        self.queue
            .push(PendingRequest::new(stop, SendPriority::Controller, None));
        (active.callback)(ControllerState::Failed);
    }

    fn handle_controller_event(&mut self, command: &Command) {
        if self.active_controller.is_none() {
            return;
        }

        match command {
            Command::AddNodeCallback(callback) => {
                let node = callback.node_id;
                match callback.status {
                    AddNodeStatus::LearnReady => self.controller_progress(ControllerState::Waiting),
                    AddNodeStatus::NodeFound
                    | AddNodeStatus::AddingSlave
                    | AddNodeStatus::AddingController => {
                        self.controller_progress(ControllerState::InProgress)
                    }
                    AddNodeStatus::ProtocolDone => {
                        self.queue.push(PendingRequest::new(
                            Message::add_node_to_network(ADD_NODE_STOP),
                            SendPriority::Controller,
                            None,
                        ));
                    }
                    AddNodeStatus::Done => {
                        let active = self.active_controller.take().expect("checked above");
                        (active.callback)(ControllerState::Completed);
                        if node.is_valid() {
                            self.add_discovered_node(node);
                        }
                    }
                    AddNodeStatus::Failed => {
                        let active = self.active_controller.take().expect("checked above");
                        self.queue.push(PendingRequest::new(
                            Message::add_node_to_network(ADD_NODE_STOP),
                            SendPriority::Controller,
                            None,
                        ));
                        (active.callback)(ControllerState::Failed);
                    }
                }
            }

            Command::RemoveNodeCallback(callback) => {
                let node = callback.node_id;
                match callback.status {
                    RemoveNodeStatus::LearnReady => {
                        self.controller_progress(ControllerState::Waiting)
                    }
                    RemoveNodeStatus::NodeFound
                    | RemoveNodeStatus::RemovingSlave
                    | RemoveNodeStatus::RemovingController => {
                        self.controller_progress(ControllerState::InProgress)
                    }
                    RemoveNodeStatus::Done => {
                        let active = self.active_controller.take().expect("checked above");
                        (active.callback)(ControllerState::Completed);
                        if node.is_valid() {
                            self.remove_node(node);
                        }
                    }
                    RemoveNodeStatus::Failed => {
                        let active = self.active_controller.take().expect("checked above");
                        (active.callback)(ControllerState::Failed);
                    }
                }
            }

            _ => {}
        }
    }

    fn controller_progress(&self, state: ControllerState) {
        if let Some(active) = &self.active_controller {
            (active.callback)(state);
        }
    }

    /// Registers a node that inclusion just brought into the network
    /// and starts its interview.
    fn add_discovered_node(&mut self, node: NodeId) {
        let mut is_new = false;
        {
            let mut nodes = self.storage.nodes_mut();
            let record = nodes.entry(node).or_insert_with(|| {
                is_new = true;
                NodeRecord::new(node)
            });
            record.interview_active = true;
        }
        if is_new {
            self.notify_node(node, |home_id, node_id| Notification::NodeNew {
                home_id,
                node_id,
            });
            self.notify_node(node, |home_id, node_id| Notification::NodeAdded {
                home_id,
                node_id,
            });
        }
        tokio::spawn(run_interview(self.ctx(), node));
    }

    fn remove_node(&mut self, node: NodeId) {
        let (existed, removed_values) = {
            let mut nodes = self.storage.nodes_mut();
            let existed = nodes.remove(&node).is_some();
            let removed = self.storage.values_mut().remove_node(node);
            (existed, removed)
        };
        if !existed {
            return;
        }
        self.poll.disable(node);
        for value_id in removed_values {
            self.watchers
                .dispatch(&Notification::ValueRemoved { value_id });
        }
        self.notify_node(node, |home_id, node_id| Notification::NodeRemoved {
            home_id,
            node_id,
        });
    }

    // ---- the send state machine -----------------------------------------

    async fn try_send_next(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        if self.storage.is_failed() {
            self.drop_all_pending();
            return;
        }

        let storage = self.storage.clone();
        let mut parked: Vec<(NodeId, PendingRequest)> = Vec::new();
        let next = self.queue.pop_next(
            |node| {
                storage
                    .nodes()
                    .get(&node)
                    .map(|record| record.is_asleep())
                    .unwrap_or(false)
            },
            |node, request| parked.push((node, request)),
        );

        if !parked.is_empty() {
            let mut nodes = self.storage.nodes_mut();
            for (node, request) in parked {
                match nodes.get_mut(&node) {
                    Some(record) => record.pending.push_back(request),
                    None => request.resolve(TransmitOutcome::Failed(TransmitFailure::Aborted)),
                }
            }
        }

        let Some(mut request) = next else {
            return;
        };

        if request.message.expects_callback() && request.message.callback_id().is_none() {
            request.message.set_callback_id(self.callback_ids.next());
        }

        let frame = RawFrame::Data(request.message.serialize());
        self.in_flight = Some(InFlight {
            request,
            state: TxState::WaitAck,
            deadline: Instant::now() + TxState::WaitAck.timeout(),
            attempts: 1,
            response: None,
        });
        self.write_port(frame).await;
    }

    fn handle_ack(&mut self) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        if in_flight.state != TxState::WaitAck {
            return;
        }
        let message = &in_flight.request.message;
        if message.expects_response() {
            in_flight.state = TxState::WaitResponse;
            in_flight.deadline = Instant::now() + TxState::WaitResponse.timeout();
        } else if message.expects_callback() {
            in_flight.state = TxState::WaitCallback;
            in_flight.deadline = Instant::now() + TxState::WaitCallback.timeout();
        } else {
            self.complete_in_flight(None);
        }
    }

    async fn handle_nak_or_can(&mut self, failure: TransmitFailure) {
        if self.in_flight.is_some() {
            self.retry_or_fail(failure).await;
        }
    }

    async fn handle_tx_timeout(&mut self) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        let failure = match in_flight.state {
            TxState::WaitAck => TransmitFailure::AckTimeout,
            TxState::WaitResponse => TransmitFailure::ResponseTimeout,
            TxState::WaitCallback => TransmitFailure::CallbackTimeout,
        };
        self.retry_or_fail(failure).await;
    }

    /// Transient failure: retransmit the same frame (with the same
    /// callback id) until the attempt cap, then give up on the message.
    async fn retry_or_fail(&mut self, failure: TransmitFailure) {
        let frame = {
            let Some(in_flight) = self.in_flight.as_mut() else {
                return;
            };
            if in_flight.attempts >= MAX_SEND_ATTEMPTS {
                self.fail_in_flight(failure);
                return;
            }
            in_flight.attempts += 1;
            in_flight.state = TxState::WaitAck;
            in_flight.deadline = Instant::now() + TxState::WaitAck.timeout();
            in_flight.response = None;
            RawFrame::Data(in_flight.request.message.serialize())
        };
        self.driver_log
            .debug(|| format!("retransmitting after {:?}", failure));
        self.write_port(frame).await;
    }

    fn fail_in_flight(&mut self, failure: TransmitFailure) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let target = in_flight.request.message.target_node();
        self.driver_log
            .warn(|| format!("message failed after retries: {:?}", failure));
        in_flight.request.resolve(TransmitOutcome::Failed(failure));

        let node = target.unwrap_or_else(|| self.storage.own_node_id());
        self.notify_node(node, |home_id, node_id| Notification::Event {
            home_id,
            node_id,
            code: NotificationCode::MessageFailed,
        });
    }

    fn complete_in_flight(&mut self, callback: Option<Command>) {
        let Some(mut in_flight) = self.in_flight.take() else {
            return;
        };
        if let Some(callback) = &callback {
            self.capture_identity(callback);
        }
        if let Some(response) = &in_flight.response {
            self.capture_identity(response);
        }

        // Completion of NO_MORE_INFORMATION puts the node back to sleep
        if let Some(node) = in_flight.request.message.target_node() {
            if is_no_more_information(&in_flight.request.message) {
                if let Some(record) = self.storage.nodes_mut().get_mut(&node) {
                    record.awake = false;
                }
            }
        }

        // The controller state machine wants inclusion callbacks even
        // when they completed a tracked transaction
        if let Some(callback) = &callback {
            self.handle_controller_event(callback);
        }

        let reset_done = matches!(
            &callback,
            Some(Command::NetworkManagementCallback(cb))
                if cb.function == FunctionType::SetDefault
        );

        let response = in_flight.response.take();
        in_flight
            .request
            .resolve(TransmitOutcome::Completed { response, callback });

        if reset_done {
            self.finish_reset();
        }
    }

    /// The stick wiped itself: drop the old topology and start over.
    /// The fresh MEMORY_GET_ID answer carries the new home id.
    fn finish_reset(&mut self) {
        let nodes: Vec<NodeId> = self.storage.nodes().keys().copied().collect();
        for node in nodes {
            self.remove_node(node);
        }
        if let Some(old_home) = self.storage.home_id() {
            self.registry
                .lock()
                .expect("driver registry poisoned")
                .remove(&old_home);
        }
        self.awake_announced = false;
        self.all_announced = false;
        tokio::spawn(run_startup(self.ctx(), self.options.user_path.clone()));
    }

    // ---- polling --------------------------------------------------------

    fn handle_poll_tick(&mut self) {
        let Some(node) = self.poll.tick(Instant::now()) else {
            return;
        };
        let class = {
            let nodes = self.storage.nodes();
            match nodes.get(&node) {
                Some(record) => record.poll_class(),
                None => return,
            }
        };
        // Basic and BinarySwitch share the Get command byte
        let message = Message::send_data(node, &[class as u8, 0x02]);
        self.queue
            .push(PendingRequest::new(message, SendPriority::Poll, None));
    }

    // ---- port and teardown ----------------------------------------------

    async fn write_port(&mut self, frame: RawFrame) {
        if let RawFrame::Data(bytes) = &frame {
            self.serial_log.data(bytes, Direction::Outbound);
        }
        if self.port.write(frame).await.is_err() {
            self.fail_driver();
        }
    }

    fn fail_driver(&mut self) {
        if self.storage.is_failed() {
            return;
        }
        self.storage.set_failed();
        self.driver_log
            .error(|| format!("controller on {} failed", self.storage.port_name()));
        self.drop_all_pending();
        self.watchers.dispatch(&Notification::DriverFailed {
            port: self.storage.port_name().to_string(),
        });
    }

    fn drop_all_pending(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight
                .request
                .resolve(TransmitOutcome::Failed(TransmitFailure::Aborted));
        }
        for request in self.queue.drain() {
            request.resolve(TransmitOutcome::Failed(TransmitFailure::Aborted));
        }
        let parked: Vec<PendingRequest> = {
            let mut nodes = self.storage.nodes_mut();
            nodes
                .values_mut()
                .flat_map(|record| record.pending.drain(..))
                .collect()
        };
        for request in parked {
            request.resolve(TransmitOutcome::Failed(TransmitFailure::Aborted));
        }
    }

    fn shutdown(&mut self) {
        self.drop_all_pending();
        self.driver_log.info(|| "driver shutting down".to_string());
    }
}

/// Whether a SEND_DATA message carries WakeUp::NoMoreInformation.
fn is_no_more_information(message: &Message) -> bool {
    message.function() == FunctionType::SendData
        && message.payload_bytes().get(2) == Some(&(CommandClassId::WakeUp as u8))
        && message.payload_bytes().get(3) == Some(&wake_up::WAKE_UP_NO_MORE_INFORMATION)
}
