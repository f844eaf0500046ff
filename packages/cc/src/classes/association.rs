use crate::classes::CommandClass;
use crate::context::{CcContext, CcSideEffect};
use homewave_core::prelude::*;

const ASSOCIATION_SET: u8 = 0x01;
const ASSOCIATION_GET: u8 = 0x02;
const ASSOCIATION_REPORT: u8 = 0x03;
const ASSOCIATION_REMOVE: u8 = 0x04;
const ASSOCIATION_GROUPINGS_GET: u8 = 0x05;
const ASSOCIATION_GROUPINGS_REPORT: u8 = 0x06;

/// COMMAND_CLASS_ASSOCIATION: per-group lists of nodes that receive a
/// device's unsolicited events. The group membership itself lives on
/// the node record; this handler does the wire work.
#[derive(Debug, Default)]
pub struct Association;

impl Association {
    /// Queues a query for the number of groups the device supports.
    pub fn request_groupings(&mut self, ctx: &mut CcContext<'_>) {
        ctx.send_to_node(&[
            CommandClassId::Association as u8,
            ASSOCIATION_GROUPINGS_GET,
        ]);
        ctx.expect_report(CommandClassId::Association, ASSOCIATION_GROUPINGS_REPORT);
    }

    /// Queues an enumeration of one group's members.
    pub fn request_group(&mut self, ctx: &mut CcContext<'_>, group: u8) {
        ctx.send_to_node(&[CommandClassId::Association as u8, ASSOCIATION_GET, group]);
        ctx.expect_report(CommandClassId::Association, ASSOCIATION_REPORT);
    }

    pub fn add_member(&mut self, ctx: &mut CcContext<'_>, group: u8, node: NodeId) {
        ctx.send_to_node(&[
            CommandClassId::Association as u8,
            ASSOCIATION_SET,
            group,
            u8::from(node),
        ]);
    }

    pub fn remove_member(&mut self, ctx: &mut CcContext<'_>, group: u8, node: NodeId) {
        ctx.send_to_node(&[
            CommandClassId::Association as u8,
            ASSOCIATION_REMOVE,
            group,
            u8::from(node),
        ]);
    }
}

impl CommandClass for Association {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::Association
    }

    fn create_values(&mut self, _ctx: &mut CcContext<'_>, _instance: u8) {}

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], _instance: u8) -> bool {
        match payload {
            [ASSOCIATION_GROUPINGS_REPORT, count, ..] => {
                ctx.effects.push(CcSideEffect::GroupCount { count: *count });
                true
            }
            [ASSOCIATION_REPORT, group, max_members, _reports_to_follow, members @ ..] => {
                ctx.effects.push(CcSideEffect::Group {
                    index: *group,
                    max_members: *max_members,
                    members: members.iter().map(|id| NodeId::new(*id)).collect(),
                });
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::{ExpectedReport, MessageSink};
    use homewave_serial::message::Message;

    struct Sink;

    impl MessageSink for Sink {
        fn send(&mut self, _message: Message, _priority: SendPriority) {}
    }

    #[test]
    fn test_group_report() {
        let mut store = ValueStore::new();
        let mut sink = Sink;
        let mut notifications = Vec::new();
        let mut effects: Vec<CcSideEffect> = Vec::new();
        let mut expected: Vec<ExpectedReport> = Vec::new();
        let mut ctx = CcContext {
            home_id: HomeId::new(0xdeadbeef),
            node_id: NodeId::new(4),
            own_node_id: NodeId::new(1),
            store: &mut store,
            sink: &mut sink,
            notifications: &mut notifications,
            effects: &mut effects,
            expected: &mut expected,
        };
        let mut handler = Association;

        let report = [ASSOCIATION_REPORT, 1, 5, 0, 1, 7];
        assert!(handler.handle_msg(&mut ctx, &report, 1));
        assert_eq!(
            effects,
            vec![CcSideEffect::Group {
                index: 1,
                max_members: 5,
                members: vec![NodeId::new(1), NodeId::new(7)],
            }]
        );
    }
}
