//! The node discovery pipeline. Each newly seen node walks a fixed
//! ordered sequence of queries before it is declared ready; sleeping
//! nodes park mid-way and continue when they next report awake.

use crate::config;
use crate::driver::{ClassQuery, DriverCtx, ReportWaiter};
use crate::node::{InterviewStage, NodeRecord};
use crate::send_queue::TransmitOutcome;
use homewave_cc::prelude::StateQuery;
use homewave_core::prelude::*;
use homewave_serial::command::Command;
use homewave_serial::message::Message;
use std::path::PathBuf;
use std::time::Duration;

const NIF_TIMEOUT: Duration = Duration::from_secs(10);
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

enum Abort {
    /// The node is asleep; resume on its next wake-up.
    Park,
    /// A listening node stopped answering; keep it but stop asking.
    Failed,
    ShutDown,
}

impl From<crate::error::Error> for Abort {
    fn from(_: crate::error::Error) -> Self {
        Abort::ShutDown
    }
}

/// Brings a fresh driver up: controller identity, restored topology,
/// the present-node bitmask, and one interview task per node.
pub(crate) async fn run_startup(ctx: DriverCtx, user_path: PathBuf) {
    if startup(&ctx, user_path).await.is_err() {
        fail_driver(&ctx);
    }
}

async fn startup(ctx: &DriverCtx, user_path: PathBuf) -> crate::error::Result<()> {
    use crate::error::Error;

    let outcome = ctx
        .execute(Message::get_version(), SendPriority::Controller)
        .await?;
    if !outcome.is_ok() {
        return Err(Error::Transport("GET_VERSION failed".into()));
    }

    let outcome = ctx
        .execute(Message::memory_get_id(), SendPriority::Controller)
        .await?;
    if !outcome.is_ok() {
        return Err(Error::Transport("MEMORY_GET_ID failed".into()));
    }
    let home_id = ctx
        .storage
        .home_id()
        .ok_or_else(|| Error::Protocol("controller identity missing".into()))?;
    let own_node_id = ctx.storage.own_node_id();

    preload_config(ctx, &user_path, home_id);

    let outcome = ctx
        .execute(Message::get_init_data(), SendPriority::Controller)
        .await?;
    let present = match outcome {
        TransmitOutcome::Completed {
            response: Some(Command::GetInitDataResponse(response)),
            ..
        } => response.node_ids,
        _ => return Err(Error::Transport("GET_INIT_DATA failed".into())),
    };

    let mut fresh = Vec::new();
    let mut to_interview = Vec::new();
    {
        let mut nodes = ctx.storage.nodes_mut();
        for id in present {
            if id == own_node_id {
                let record = nodes.entry(id).or_insert_with(|| NodeRecord::new(id));
                record.interview = InterviewStage::Ready;
                continue;
            }
            if !nodes.contains_key(&id) {
                nodes.insert(id, NodeRecord::new(id));
                fresh.push(id);
            }
            let record = nodes.get_mut(&id).expect("just inserted");
            record.interview_active = true;
            to_interview.push(id);
        }
    }

    for id in fresh {
        ctx.notify(Notification::NodeNew {
            home_id,
            node_id: id,
        });
        ctx.notify(Notification::NodeAdded {
            home_id,
            node_id: id,
        });
    }
    for id in to_interview {
        tokio::spawn(run_interview(ctx.clone(), id));
    }

    // Kicks the queries-complete bookkeeping even for an empty network
    ctx.interview_finished(own_node_id, false);
    Ok(())
}

/// Loads the persisted topology, if any, so the application sees its
/// devices before the first interview answer arrives.
fn preload_config(ctx: &DriverCtx, user_path: &std::path::Path, home_id: HomeId) {
    let path = config::config_file_path(user_path, home_id);
    let restored = match config::read_config(&path) {
        Ok(Some(restored)) if restored.home_id == home_id => restored,
        Ok(_) => return,
        // Config problems degrade to a fresh start, never a dead driver
        Err(_) => return,
    };

    let mut added_nodes = Vec::new();
    let mut added_values = Vec::new();
    {
        let mut nodes = ctx.storage.nodes_mut();
        let mut values = ctx.storage.values_mut();
        for (id, record) in restored.nodes {
            if nodes.contains_key(&id) {
                continue;
            }
            nodes.insert(id, record);
            added_nodes.push(id);
        }
        for value in restored.values.into_values() {
            let id = value.id;
            let is_button = id.value_type() == ValueType::Button;
            if values.insert(value) {
                added_values.push((id, is_button));
            }
        }
    }

    for node_id in added_nodes {
        ctx.notify(Notification::NodeAdded { home_id, node_id });
    }
    for (value_id, is_button) in added_values {
        ctx.notify(if is_button {
            Notification::CreateButton { value_id }
        } else {
            Notification::ValueAdded { value_id }
        });
    }
}

fn fail_driver(ctx: &DriverCtx) {
    if ctx.storage.is_failed() {
        return;
    }
    ctx.storage.set_failed();
    ctx.notify(Notification::DriverFailed {
        port: ctx.storage.port_name().to_string(),
    });
}

/// Drives one node through the interview, starting from whatever stage
/// it last completed.
pub(crate) async fn run_interview(ctx: DriverCtx, node: NodeId) {
    match interview_node(&ctx, node).await {
        Ok(()) => {
            if let Some(home_id) = ctx.storage.home_id() {
                ctx.notify(Notification::NodeQueriesComplete {
                    home_id,
                    node_id: node,
                });
            }
            ctx.interview_finished(node, false);
        }
        Err(Abort::Park) => ctx.interview_finished(node, true),
        Err(Abort::Failed) => {
            if let Some(record) = ctx.storage.nodes_mut().get_mut(&node) {
                record.interview = InterviewStage::Failed;
            }
            ctx.interview_finished(node, false);
        }
        Err(Abort::ShutDown) => {}
    }
}

async fn interview_node(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    loop {
        let stage = current_stage(ctx, node).ok_or(Abort::ShutDown)?;
        match stage {
            InterviewStage::Failed => return Err(Abort::Failed),

            // A restored, fully interviewed node only refreshes its
            // dynamic values
            InterviewStage::Ready => {
                park_check(ctx, node)?;
                dynamic_stage(ctx, node).await?;
                return Ok(());
            }

            InterviewStage::None => {
                protocol_info_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::ProtocolInfo);
            }
            InterviewStage::ProtocolInfo => {
                park_check(ctx, node)?;
                node_info_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::NodeInfo);
            }
            InterviewStage::NodeInfo => {
                park_check(ctx, node)?;
                if supports(ctx, node, CommandClassId::ManufacturerSpecific) {
                    run_queries(ctx, node, vec![(
                        CommandClassId::ManufacturerSpecific,
                        ClassQuery::Static,
                    )])
                    .await?;
                }
                advance(ctx, node, InterviewStage::ManufacturerSpecific);
            }
            InterviewStage::ManufacturerSpecific => {
                park_check(ctx, node)?;
                instances_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::Instances);
            }
            InterviewStage::Instances => {
                park_check(ctx, node)?;
                static_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::Static);
            }
            InterviewStage::Static => {
                park_check(ctx, node)?;
                associations_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::Associations);
            }
            InterviewStage::Associations => {
                park_check(ctx, node)?;
                session_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::Session);
            }
            InterviewStage::Session => {
                park_check(ctx, node)?;
                dynamic_stage(ctx, node).await?;
                advance(ctx, node, InterviewStage::Dynamic);
                advance(ctx, node, InterviewStage::Ready);
                return Ok(());
            }
            InterviewStage::Dynamic => {
                advance(ctx, node, InterviewStage::Ready);
                return Ok(());
            }
        }
    }
}

async fn protocol_info_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    let outcome = ctx
        .execute(
            Message::get_node_protocol_info(node),
            SendPriority::Application,
        )
        .await?;

    let response = match outcome {
        TransmitOutcome::Completed {
            response: Some(Command::GetNodeProtocolInfoResponse(response)),
            ..
        } => response,
        _ => return Err(Abort::Failed),
    };
    if !response.is_present() {
        return Err(Abort::Failed);
    }

    {
        let mut nodes = ctx.storage.nodes_mut();
        let Some(record) = nodes.get_mut(&node) else {
            return Err(Abort::ShutDown);
        };
        record.protocol_info = Some(response.protocol_info);
        if !response.protocol_info.listening {
            // Battery device: asleep until its first wake-up
            record.awake = false;
        }
    }

    if let Some(home_id) = ctx.storage.home_id() {
        ctx.notify(Notification::NodeProtocolInfo {
            home_id,
            node_id: node,
        });
    }
    Ok(())
}

async fn node_info_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    let waiter = ctx.await_nif(node).await?;

    let outcome = ctx
        .execute(Message::request_node_info(node), SendPriority::Application)
        .await?;
    let accepted = matches!(
        outcome,
        TransmitOutcome::Completed {
            response: Some(Command::RequestNodeInfoResponse(response)),
            ..
        } if response.accepted
    );
    if !accepted {
        return Err(fail_or_park(ctx, node));
    }

    match tokio::time::timeout(NIF_TIMEOUT, waiter).await {
        Ok(Ok(())) => Ok(()),
        // Elapsed, or the actor dropped the waiter on a failed request
        _ => Err(fail_or_park(ctx, node)),
    }
}

async fn instances_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    if !supports(ctx, node, CommandClassId::MultiInstance) {
        return Ok(());
    }
    let queries: Vec<_> = implemented_classes(ctx, node)
        .into_iter()
        .filter(|class| is_application_class(*class))
        .map(|class| {
            (
                CommandClassId::MultiInstance,
                ClassQuery::Instances { of: class },
            )
        })
        .collect();
    run_queries(ctx, node, queries).await
}

async fn static_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    let classes = implemented_classes(ctx, node);

    let mut queries: Vec<_> = classes
        .iter()
        .filter(|class| {
            !matches!(
                **class,
                CommandClassId::NoOperation | CommandClassId::ManufacturerSpecific
            )
        })
        .map(|class| (*class, ClassQuery::Static))
        .collect();

    if classes.contains(&CommandClassId::Version) {
        queries.extend(
            classes
                .iter()
                .filter(|class| **class != CommandClassId::NoOperation)
                .map(|class| (CommandClassId::Version, ClassQuery::ClassVersion { of: *class })),
        );
    }

    run_queries(ctx, node, queries).await
}

async fn associations_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    if !supports(ctx, node, CommandClassId::Association) {
        return Ok(());
    }
    run_queries(ctx, node, vec![(CommandClassId::Association, ClassQuery::Groupings)]).await?;

    let group_count = ctx
        .storage
        .nodes()
        .get(&node)
        .map(|record| record.group_count)
        .unwrap_or(0);
    let queries: Vec<_> = (1..=group_count)
        .map(|index| (CommandClassId::Association, ClassQuery::Group { index }))
        .collect();
    run_queries(ctx, node, queries).await
}

async fn session_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    let queries: Vec<_> = implemented_classes(ctx, node)
        .into_iter()
        .map(|class| (class, ClassQuery::State(StateQuery::Session)))
        .collect();
    run_queries(ctx, node, queries).await
}

async fn dynamic_stage(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    // Basic is subordinate to a real actuator class: its reports are
    // remapped onto that class, so querying it separately would be
    // redundant traffic
    let skip_basic = ctx
        .storage
        .nodes()
        .get(&node)
        .map(|record| record.basic_mapping().is_some())
        .unwrap_or(false);

    let queries: Vec<_> = implemented_classes(ctx, node)
        .into_iter()
        .filter(|class| *class != CommandClassId::NoOperation)
        .filter(|class| !(skip_basic && *class == CommandClassId::Basic))
        .map(|class| (class, ClassQuery::State(StateQuery::Dynamic)))
        .collect();
    run_queries(ctx, node, queries).await
}

/// Runs class queries one at a time and waits for each expected report.
async fn run_queries(
    ctx: &DriverCtx,
    node: NodeId,
    queries: Vec<(CommandClassId, ClassQuery)>,
) -> Result<(), Abort> {
    for (class, query) in queries {
        let waiters: Vec<ReportWaiter> = ctx.run_class_query(node, class, query).await?;
        for waiter in waiters {
            match tokio::time::timeout(REPORT_TIMEOUT, waiter).await {
                Ok(Ok(())) => {}
                _ => return Err(fail_or_park(ctx, node)),
            }
        }
    }
    Ok(())
}

/// An unanswered query parks a battery node and fails a listening one.
fn fail_or_park(ctx: &DriverCtx, node: NodeId) -> Abort {
    let can_sleep = ctx
        .storage
        .nodes()
        .get(&node)
        .map(|record| record.can_sleep())
        .unwrap_or(false);
    if can_sleep {
        if let Some(record) = ctx.storage.nodes_mut().get_mut(&node) {
            record.awake = false;
        }
        Abort::Park
    } else {
        if let Some(home_id) = ctx.storage.home_id() {
            ctx.notify(Notification::Event {
                home_id,
                node_id: node,
                code: NotificationCode::Timeout,
            });
        }
        Abort::Failed
    }
}

fn park_check(ctx: &DriverCtx, node: NodeId) -> Result<(), Abort> {
    let asleep = ctx
        .storage
        .nodes()
        .get(&node)
        .map(|record| record.is_asleep())
        .ok_or(Abort::ShutDown)?;
    if asleep { Err(Abort::Park) } else { Ok(()) }
}

fn current_stage(ctx: &DriverCtx, node: NodeId) -> Option<InterviewStage> {
    ctx.storage
        .nodes()
        .get(&node)
        .map(|record| record.interview)
}

fn advance(ctx: &DriverCtx, node: NodeId, stage: InterviewStage) {
    if let Some(record) = ctx.storage.nodes_mut().get_mut(&node) {
        record.advance_interview(stage);
    }
}

fn supports(ctx: &DriverCtx, node: NodeId, class: CommandClassId) -> bool {
    ctx.storage
        .nodes()
        .get(&node)
        .map(|record| record.classes.contains_key(&class))
        .unwrap_or(false)
}

fn implemented_classes(ctx: &DriverCtx, node: NodeId) -> Vec<CommandClassId> {
    ctx.storage
        .nodes()
        .get(&node)
        .map(|record| record.classes.keys().copied().collect())
        .unwrap_or_default()
}

/// Classes that can live on several instances of one node.
fn is_application_class(class: CommandClassId) -> bool {
    matches!(
        class,
        CommandClassId::Basic | CommandClassId::BinarySwitch
    )
}
